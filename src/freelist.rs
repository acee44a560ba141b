use std::{fmt, str::FromStr};

use log::trace;

use crate::{
    block::Block,
    error::HeapError,
    kernel::RegionSource,
    list::Link,
    region::Region,
};

/// Rule used to choose which free block satisfies a request.
///
/// There is no separate list of free blocks: every policy walks the chain of
/// all blocks and only looks at the ones flagged by [`Block::is_free`].
///
/// ```text
///   request: 4000
///
///   +--------+   +---+   +--------+   +----+   +--------+
///   | 1000 F | ->| 1 | ->| 5000 F | ->| 10 | ->| 8000 F |
///   +--------+   +---+   +--------+   +----+   +--------+
///                            ^                     ^
///             first / best / next              worst
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FitPolicy {
    /// First free block in address order that is large enough.
    #[default]
    FirstFit,
    /// Large enough free block leaving the smallest leftover.
    BestFit,
    /// Large enough free block leaving the largest leftover.
    WorstFit,
    /// Like first-fit, but resuming after the block handed out last and
    /// wrapping around to the head once.
    NextFit,
}

impl FitPolicy {
    pub const ALL: [FitPolicy; 4] = [
        FitPolicy::FirstFit,
        FitPolicy::BestFit,
        FitPolicy::WorstFit,
        FitPolicy::NextFit,
    ];
}

impl fmt::Display for FitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitPolicy::FirstFit => "first",
            FitPolicy::BestFit => "best",
            FitPolicy::WorstFit => "worst",
            FitPolicy::NextFit => "next",
        };

        f.write_str(name)
    }
}

impl FromStr for FitPolicy {
    type Err = HeapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first-fit" | "firstfit" => Ok(FitPolicy::FirstFit),
            "best" | "best-fit" | "bestfit" => Ok(FitPolicy::BestFit),
            "worst" | "worst-fit" | "worstfit" => Ok(FitPolicy::WorstFit),
            "next" | "next-fit" | "nextfit" => Ok(FitPolicy::NextFit),
            _ => Err(HeapError::UnknownPolicy(s.to_string())),
        }
    }
}

#[inline]
fn fits(block: &Block, size: usize) -> bool {
    block.is_free && block.size >= size
}

/// Returns the offset of a free block of at least `size` bytes chosen by
/// `policy`, or `None` if the heap has to grow.
///
/// `cursor` is only consulted by [`FitPolicy::NextFit`]: it is the block
/// right after the one handed out by the previous request, `None` meaning
/// "start from the head".
pub(crate) fn find_free_block<S: RegionSource>(
    region: &Region<S>,
    policy: FitPolicy,
    size: usize,
    cursor: Link,
) -> Link {
    let found = match policy {
        FitPolicy::FirstFit => first_fit(region, size),
        // Only a strictly smaller leftover replaces the current candidate, so
        // the earliest block wins ties.
        FitPolicy::BestFit => closest(region, size, |leftover, best| leftover < best),
        FitPolicy::WorstFit => closest(region, size, |leftover, worst| leftover > worst),
        FitPolicy::NextFit => next_fit(region, size, cursor),
    };

    trace!("{policy}-fit for {size} bytes: {found:?}");

    found
}

fn first_fit<S: RegionSource>(region: &Region<S>, size: usize) -> Link {
    region
        .iter()
        .find(|(_, block)| fits(block, size))
        .map(|(offset, _)| offset)
}

/// Scans the whole chain keeping the candidate whose leftover `better` prefers.
fn closest<S: RegionSource>(
    region: &Region<S>,
    size: usize,
    better: impl Fn(usize, usize) -> bool,
) -> Link {
    let mut candidate: Option<(usize, usize)> = None;

    for (offset, block) in region.iter() {
        if !fits(&block, size) {
            continue;
        }

        let leftover = block.size - size;
        match candidate {
            Some((_, current)) if !better(leftover, current) => {}
            _ => candidate = Some((offset, leftover)),
        }
    }

    candidate.map(|(offset, _)| offset)
}

fn next_fit<S: RegionSource>(region: &Region<S>, size: usize, cursor: Link) -> Link {
    let Some(start) = cursor else {
        return first_fit(region, size);
    };

    // From the cursor to the end, then from the head back up to the cursor.
    region
        .iter_from(Some(start))
        .chain(region.iter().take_while(|(offset, _)| *offset != start))
        .find(|(_, block)| fits(block, size))
        .map(|(offset, _)| offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::FixedRegion;

    /// Grows one block per size and frees the ones flagged in `free`.
    fn chain(blocks: &[(usize, bool)]) -> (Region<FixedRegion>, Vec<usize>) {
        let mut region = Region::new(FixedRegion::new(64 * 1024));
        let mut offsets = Vec::new();

        for &(size, free) in blocks {
            let offset = region.grow(size).unwrap();
            let mut block = region.read(offset);
            block.is_free = free;
            region.write(offset, block);
            offsets.push(offset);
        }

        (region, offsets)
    }

    #[test]
    fn policies_agree_on_trivial_chains() {
        let (empty, _) = chain(&[]);
        let (single, offsets) = chain(&[(64, true)]);

        for policy in FitPolicy::ALL {
            assert_eq!(find_free_block(&empty, policy, 8, None), None);
            assert_eq!(find_free_block(&single, policy, 8, None), Some(offsets[0]));
            assert_eq!(find_free_block(&single, policy, 8, Some(offsets[0])), Some(offsets[0]));
            assert_eq!(find_free_block(&single, policy, 128, None), None);
        }
    }

    #[test]
    fn allocated_blocks_are_skipped() {
        let (region, offsets) = chain(&[(64, false), (64, true)]);

        for policy in FitPolicy::ALL {
            assert_eq!(find_free_block(&region, policy, 64, None), Some(offsets[1]));
        }
    }

    #[test]
    fn best_and_worst_fit() {
        let (region, offsets) =
            chain(&[(1000, true), (4, false), (5000, true), (12, false), (8000, true)]);

        assert_eq!(find_free_block(&region, FitPolicy::FirstFit, 4000, None), Some(offsets[2]));
        assert_eq!(find_free_block(&region, FitPolicy::BestFit, 4000, None), Some(offsets[2]));
        assert_eq!(find_free_block(&region, FitPolicy::WorstFit, 4000, None), Some(offsets[4]));
        assert_eq!(find_free_block(&region, FitPolicy::WorstFit, 8004, None), None);
    }

    #[test]
    fn ties_go_to_the_earliest_block() {
        let (region, offsets) = chain(&[(64, true), (4, false), (64, true)]);

        assert_eq!(find_free_block(&region, FitPolicy::BestFit, 32, None), Some(offsets[0]));
        assert_eq!(find_free_block(&region, FitPolicy::WorstFit, 32, None), Some(offsets[0]));
    }

    #[test]
    fn next_fit_resumes_and_wraps() {
        let (region, offsets) = chain(&[(64, true), (64, false), (64, true), (64, false)]);

        let resumed = find_free_block(&region, FitPolicy::NextFit, 64, Some(offsets[1]));
        assert_eq!(resumed, Some(offsets[2]));
        // Nothing after the cursor, so the scan wraps to the head.
        let wrapped = find_free_block(&region, FitPolicy::NextFit, 64, Some(offsets[3]));
        assert_eq!(wrapped, Some(offsets[0]));
        assert_eq!(find_free_block(&region, FitPolicy::NextFit, 128, Some(offsets[3])), None);
    }

    #[test]
    fn parse_policy_names() {
        assert_eq!("best".parse::<FitPolicy>(), Ok(FitPolicy::BestFit));
        assert_eq!(" Worst-Fit ".parse::<FitPolicy>(), Ok(FitPolicy::WorstFit));
        assert_eq!("next".parse::<FitPolicy>(), Ok(FitPolicy::NextFit));
        assert_eq!(
            "buddy".parse::<FitPolicy>(),
            Err(HeapError::UnknownPolicy("buddy".to_string()))
        );

        for policy in FitPolicy::ALL {
            assert_eq!(policy.to_string().parse::<FitPolicy>(), Ok(policy));
        }
    }
}
