//! Helper functions that don't belong to any concrete component of the heap.

/// Rounds `to_be_aligned` up to the next multiple of `alignment`, which must
/// be a power of two.
///
/// This is used both to round payload sizes up to [`crate::block::ALIGNMENT`]
/// and to round committed lengths up to the computer's page size.
pub fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`], but returns `None` when the rounded value does not fit
/// in a `usize`.
pub fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    Some(to_be_aligned.checked_add(alignment - 1)? & !(alignment - 1))
}



#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ALIGNMENT;

    #[test]
    fn align_payload_size() {
        let aligments = vec![(1..5, 4), (5..9, 8), (9..13, 12), (13..17, 16)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, ALIGNMENT));
            }
        }
    }

    #[test]
    fn aligned_sizes_are_unchanged() {
        for size in (0..64).step_by(ALIGNMENT) {
            assert_eq!(size, align(size, ALIGNMENT));
        }
    }

    #[test]
    fn checked_align_near_the_top() {
        assert_eq!(checked_align(13, ALIGNMENT), Some(16));
        assert_eq!(checked_align(usize::MAX - 3, ALIGNMENT), Some(usize::MAX - 3));
        assert_eq!(checked_align(usize::MAX - 2, ALIGNMENT), None);
        assert_eq!(checked_align(usize::MAX, ALIGNMENT), None);
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }
}
