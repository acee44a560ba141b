use std::ptr::NonNull;

use log::{debug, trace};

use crate::{
    block::{Block, HEADER_SIZE, ALIGNMENT, SPLIT_THRESHOLD},
    error::HeapError,
    kernel::RegionSource,
    list::{Iter, Link},
};

/// The managed region: one contiguous run of bytes obtained from a
/// [`RegionSource`], carved into a chain of blocks.
///
/// Blocks are addressed by the offset of their header from `base`. Because
/// blocks are only ever appended at the break (growth) or written right
/// after their parent (splitting), the chain is always in address order.
///
/// ```text
///  base                                                            base + top
///   |                                                                   |
///   v                                                                   v
///   +--------+---------+--------+---------+--------+--------------------+
///   | Header | payload | Header | payload | Header |      payload       |
///   +--------+---------+--------+---------+--------+--------------------+
///   ^ head                                ^ tail
/// ```
pub(crate) struct Region<S> {
    source: S,
    /// Start of the first extension. Dangling until the region first grows.
    base: NonNull<u8>,
    /// Bytes obtained so far, which is also the offset of the break.
    top: usize,
    head: Link,
    tail: Link,
}

impl<S: RegionSource> Region<S> {
    pub fn new(source: S) -> Self {
        Self { source, base: NonNull::dangling(), top: 0, head: None, tail: None }
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[inline]
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    #[cfg(test)]
    pub fn head(&self) -> Link {
        self.head
    }

    #[cfg(test)]
    pub fn tail(&self) -> Link {
        self.tail
    }

    /// Number of bytes the region has grown by, headers included.
    #[inline]
    pub fn len(&self) -> usize {
        self.top
    }

    /// Walks the whole chain from its head.
    pub fn iter(&self) -> Iter<'_, S> {
        Iter::new(self, self.head)
    }

    /// Walks the chain starting at `start` instead of the head.
    pub fn iter_from(&self, start: Link) -> Iter<'_, S> {
        Iter::new(self, start)
    }

    /// Copies out the header at `offset`.
    pub fn read(&self, offset: usize) -> Block {
        assert!(offset + HEADER_SIZE <= self.top, "header at {offset} is outside the region");

        // Headers are only `ALIGNMENT` aligned, hence the unaligned read.
        unsafe { self.base.as_ptr().add(offset).cast::<Block>().read_unaligned() }
    }

    /// Overwrites the header at `offset`.
    pub fn write(&mut self, offset: usize, block: Block) {
        assert!(offset + HEADER_SIZE <= self.top, "header at {offset} is outside the region");

        unsafe { self.base.as_ptr().add(offset).cast::<Block>().write_unaligned(block) }
    }

    /// Address of the first payload byte of the block at `offset`.
    #[inline]
    pub fn payload(&self, offset: usize) -> NonNull<u8> {
        unsafe { self.base.add(offset + HEADER_SIZE) }
    }

    /// Recovers the header offset from a payload address. Returns `None` for
    /// addresses that can not be payloads of this region.
    ///
    /// This only checks bounds and alignment: an in-range address that was
    /// never handed out still maps to some offset.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;

        let offset = addr.checked_sub(base)?.checked_sub(HEADER_SIZE)?;
        if offset + HEADER_SIZE >= self.top || offset % ALIGNMENT != 0 {
            return None;
        }

        Some(offset)
    }

    /// Extends the region by exactly `HEADER_SIZE + size` bytes and appends a
    /// new block of `size` bytes after the current tail.
    ///
    /// The block is created allocated, since it only exists to satisfy the
    /// request that triggered the growth. If this is the first block it
    /// becomes the head of the chain.
    pub fn grow(&mut self, size: usize) -> Result<usize, HeapError> {
        let increment = HEADER_SIZE.checked_add(size).ok_or(HeapError::TooLarge(size))?;

        let start = self
            .source
            .extend(increment)
            .ok_or(HeapError::Exhausted { increment })?;

        if self.top == 0 {
            self.base = start;
        } else {
            let expected = self.base.as_ptr() as usize + self.top;
            let found = start.as_ptr() as usize;
            if found != expected {
                return Err(HeapError::Discontiguous { expected, found });
            }
        }

        let offset = self.top;
        self.top += increment;
        self.write(offset, Block::new(size, false, None));

        // Attach the new block to the previous tail.
        match self.tail {
            Some(tail) => {
                let mut last = self.read(tail);
                last.set_next(Some(offset));
                self.write(tail, last);
            }
            None => self.head = Some(offset),
        }
        self.tail = Some(offset);

        debug!("heap grown by {increment} bytes, new block at offset {offset}");

        Ok(offset)
    }

    /// Shrinks the free block at `offset` to exactly `size` bytes, marks it
    /// allocated and writes a new free block with whatever is left right
    /// after it.
    ///
    /// ```text
    /// Before:
    /// +--------+-------------------------------------------+
    /// | Header |               free payload                |
    /// +--------+-------------------------------------------+
    ///
    /// After:
    /// +--------+-----------+--------+----------------------+
    /// | Header |   size    | Header |   leftover - header  |
    /// +--------+-----------+--------+----------------------+
    ///                           (free)
    /// ```
    ///
    /// Nothing happens unless the leftover is strictly larger than
    /// [`SPLIT_THRESHOLD`]. Returns the offset of the new free block if a
    /// split took place.
    pub fn split(&mut self, offset: usize, size: usize) -> Link {
        let mut block = self.read(offset);
        let leftover = block.size.checked_sub(size)?;

        if leftover <= SPLIT_THRESHOLD {
            return None;
        }

        let remainder = offset + HEADER_SIZE + size;
        self.write(remainder, Block::new(leftover - HEADER_SIZE, true, block.next()));

        block.size = size;
        block.is_free = false;
        block.set_next(Some(remainder));
        self.write(offset, block);

        if self.tail == Some(offset) {
            self.tail = Some(remainder);
        }

        trace!(
            "split block at offset {offset}: kept {size} bytes, {} bytes free at {remainder}",
            leftover - HEADER_SIZE
        );

        Some(remainder)
    }

    /// Merges every run of adjacent free blocks in the whole chain.
    ///
    /// The predecessor absorbs its successor's header and payload and takes
    /// over its link. It is then compared against its new successor, so any
    /// number of consecutive free blocks collapse in one pass. If `cursor`
    /// pointed at an absorbed block it is moved to the absorbing one.
    ///
    /// Returns the number of merges performed.
    pub fn coalesce(&mut self, cursor: &mut Link) -> usize {
        let mut merges = 0;
        let mut current = self.head;

        while let Some(offset) = current {
            let mut block = self.read(offset);
            let Some(next_offset) = block.next() else { break };
            let next = self.read(next_offset);

            if block.is_free && next.is_free {
                block.size += HEADER_SIZE + next.size;
                block.set_next(next.next());
                self.write(offset, block);

                if self.tail == Some(next_offset) {
                    self.tail = Some(offset);
                }
                if *cursor == Some(next_offset) {
                    *cursor = Some(offset);
                }

                merges += 1;
            } else {
                current = Some(next_offset);
            }
        }

        if merges > 0 {
            debug!("coalesced {merges} free blocks");
        }

        merges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::FixedRegion;

    fn region_with(sizes: &[usize]) -> (Region<FixedRegion>, Vec<usize>) {
        let mut region = Region::new(FixedRegion::new(64 * 1024));
        let offsets = sizes.iter().map(|&size| region.grow(size).unwrap()).collect();

        (region, offsets)
    }

    fn mark_free(region: &mut Region<FixedRegion>, offset: usize) {
        let mut block = region.read(offset);
        block.is_free = true;
        region.write(offset, block);
    }

    #[test]
    fn first_growth_sets_head_and_tail() {
        let (region, offsets) = region_with(&[16]);

        assert_eq!(region.head(), Some(offsets[0]));
        assert_eq!(region.tail(), Some(offsets[0]));
        assert_eq!(region.len(), HEADER_SIZE + 16);

        let block = region.read(offsets[0]);
        assert_eq!(block.size, 16);
        assert!(!block.is_free);
        assert_eq!(block.next(), None);
    }

    #[test]
    fn growth_links_previous_tail() {
        let (region, offsets) = region_with(&[16, 32]);

        assert_eq!(region.read(offsets[0]).next(), Some(offsets[1]));
        assert_eq!(region.tail(), Some(offsets[1]));
        assert_eq!(offsets[1], HEADER_SIZE + 16);
    }

    #[test]
    fn growth_fails_when_source_refuses() {
        let mut region = Region::new(FixedRegion::new(HEADER_SIZE + 16));

        assert!(region.grow(16).is_ok());
        assert_eq!(region.grow(4), Err(HeapError::Exhausted { increment: HEADER_SIZE + 4 }));
        assert_eq!(region.iter().count(), 1);
    }

    #[test]
    fn growth_of_unrepresentable_size_fails() {
        let (mut region, _) = region_with(&[16]);

        assert_eq!(region.grow(usize::MAX), Err(HeapError::TooLarge(usize::MAX)));
        assert!(matches!(region.grow(usize::MAX - HEADER_SIZE + 1), Err(HeapError::TooLarge(_))));
        assert_eq!(region.iter().count(), 1);
        assert_eq!(region.len(), HEADER_SIZE + 16);
    }

    #[test]
    fn payload_offset_round_trip() {
        let (region, offsets) = region_with(&[16, 8]);

        for offset in offsets {
            assert_eq!(region.offset_of(region.payload(offset)), Some(offset));
        }
    }

    #[test]
    fn offset_of_rejects_foreign_addresses() {
        let (region, _) = region_with(&[16]);
        let mut outside = 0u32;

        assert_eq!(region.offset_of(NonNull::from(&mut outside).cast()), None);
        // Past the end of the region.
        assert_eq!(region.offset_of(region.payload(HEADER_SIZE + 16)), None);
        // Not a multiple of the alignment.
        assert_eq!(region.offset_of(unsafe { region.payload(0).add(1) }), None);
    }

    #[test]
    fn split_only_above_threshold() {
        let (mut region, offsets) = region_with(&[100]);
        mark_free(&mut region, offsets[0]);

        // Leftover equal to the threshold is kept as internal fragmentation.
        assert_eq!(region.split(offsets[0], 100 - SPLIT_THRESHOLD), None);
        assert_eq!(region.read(offsets[0]).size, 100);

        let remainder = region.split(offsets[0], 100 - SPLIT_THRESHOLD - ALIGNMENT).unwrap();
        let block = region.read(offsets[0]);
        let free = region.read(remainder);

        assert_eq!(block.size, 100 - SPLIT_THRESHOLD - ALIGNMENT);
        assert!(!block.is_free);
        assert_eq!(block.next(), Some(remainder));
        assert_eq!(free.size, 100 - HEADER_SIZE - block.size);
        assert!(free.is_free);
        assert_eq!(region.tail(), Some(remainder));
    }

    #[test]
    fn split_keeps_successor_link() {
        let (mut region, offsets) = region_with(&[200, 8]);
        mark_free(&mut region, offsets[0]);

        let remainder = region.split(offsets[0], 40).unwrap();

        assert_eq!(region.read(remainder).next(), Some(offsets[1]));
        assert_eq!(region.tail(), Some(offsets[1]));
        assert_eq!(remainder + HEADER_SIZE + region.read(remainder).size, offsets[1]);
    }

    #[test]
    fn coalesce_collapses_runs() {
        let (mut region, offsets) = region_with(&[8, 12, 16, 20]);
        for &offset in &offsets[..3] {
            mark_free(&mut region, offset);
        }

        let mut cursor = Some(offsets[1]);
        assert_eq!(region.coalesce(&mut cursor), 2);

        let merged = region.read(offsets[0]);
        assert_eq!(merged.size, 8 + 12 + 16 + 2 * HEADER_SIZE);
        assert_eq!(merged.next(), Some(offsets[3]));
        assert_eq!(cursor, Some(offsets[0]));
        assert_eq!(region.iter().count(), 2);
    }

    #[test]
    fn coalesce_moves_tail() {
        let (mut region, offsets) = region_with(&[8, 12]);
        mark_free(&mut region, offsets[0]);
        mark_free(&mut region, offsets[1]);

        let mut cursor = None;
        assert_eq!(region.coalesce(&mut cursor), 1);
        assert_eq!(region.tail(), Some(offsets[0]));
        assert_eq!(cursor, None);
    }

    #[test]
    fn coalesce_without_free_pairs_is_noop() {
        let (mut region, offsets) = region_with(&[8, 12, 16]);
        mark_free(&mut region, offsets[0]);
        mark_free(&mut region, offsets[2]);

        let mut cursor = None;
        assert_eq!(region.coalesce(&mut cursor), 0);
        assert_eq!(region.iter().count(), 3);
    }
}
