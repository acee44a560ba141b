use std::mem;
use crate::list::Link;


/// Every payload size is rounded up to a multiple of this many bytes, and every
/// payload address handed out is aligned to it.
pub const ALIGNMENT: usize = 4;

/// Size in bytes of the header that precedes every payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

/// A free block is only split when the bytes left over after carving out the
/// request are strictly more than this. Anything smaller stays inside the
/// allocated block as internal fragmentation.
pub const SPLIT_THRESHOLD: usize = HEADER_SIZE + ALIGNMENT;

// Offsets of headers and payloads only stay aligned if the header is.
const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

/// Encoding of an empty [`Link`] inside a header.
const NIL: usize = usize::MAX;

/// This is the header written in front of every block of the managed region.
/// The payload starts right after it, so the header of a payload pointer is
/// recovered by stepping [`HEADER_SIZE`] bytes back.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |   next (offset)     |        | -> Header
/// +---------------------+        |
/// |    is_free (1b)     |        |
/// +---------------------+ <------+
/// |       Payload       |        |
/// |         ...         |        | -> `size` usable bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// `next` is stored as a byte offset from the start of the region instead of
/// a raw pointer, so the chain stays meaningful wherever the region is mapped.
/// Headers live at offsets that are only [`ALIGNMENT`] aligned, so they are
/// always read and written unaligned (see [`crate::region::Region::read`]).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Block {
    /// Usable payload size, header excluded.
    pub size: usize,
    /// Offset of the next block in address order, [`NIL`] for the tail.
    next: usize,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
}

impl Block {
    pub fn new(size: usize, is_free: bool, next: Link) -> Self {
        Self { size, next: next.unwrap_or(NIL), is_free }
    }

    #[inline]
    pub fn next(&self) -> Link {
        (self.next != NIL).then_some(self.next)
    }

    #[inline]
    pub fn set_next(&mut self, next: Link) {
        self.next = next.unwrap_or(NIL);
    }
}

/// Read-only view of one block of the chain, as returned by
/// [`crate::Heap::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header from the start of the region.
    pub offset: usize,
    /// Usable payload size in bytes.
    pub size: usize,
    pub is_free: bool,
}

impl BlockInfo {
    pub(crate) fn new(offset: usize, block: &Block) -> Self {
        Self { offset, size: block.size, is_free: block.is_free }
    }

    /// Offset one past the last payload byte of this block.
    pub fn end(&self) -> usize {
        self.offset + HEADER_SIZE + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_link_round_trips() {
        let mut block = Block::new(16, true, None);
        assert_eq!(block.next(), None);

        block.set_next(Some(0));
        assert_eq!(block.next(), Some(0));

        block.set_next(None);
        assert_eq!(block.next(), None);
    }

    #[test]
    fn info_end_covers_header_and_payload() {
        let block = Block::new(40, false, None);
        let info = BlockInfo::new(8, &block);

        assert_eq!(info.end(), 8 + HEADER_SIZE + 40);
        assert!(!info.is_free);
    }
}
