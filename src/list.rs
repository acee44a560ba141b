use crate::{block::Block, kernel::RegionSource, region::Region};

/// Offset of a block header from the start of the region, or `None` at the
/// end of the chain.
pub(crate) type Link = Option<usize>;

/// Address-ordered walk over the chain of blocks.
///
/// Every block ever carved out of the region is on the chain, free or not,
/// so this is the only traversal the heap needs: the selector filters it by
/// [`Block::is_free`], the coalescer walks it pairwise and the statistics
/// count the free blocks left on it.
///
/// ```text
///  head                                                        tail
///   |                                                           |
/// +-v--------------+    +----------------+    +----------------+-v--------------+
/// | Block | data   | -> | Block(free)    | -> | Block | data   | Block(free)    |
/// +----------------+    +----------------+    +----------------+----------------+
/// ```
///
/// Each step yields the header offset together with a copy of the header.
pub(crate) struct Iter<'a, S> {
    region: &'a Region<S>,
    current: Link,
}

impl<'a, S: RegionSource> Iter<'a, S> {
    pub fn new(region: &'a Region<S>, start: Link) -> Self {
        Self { region, current: start }
    }
}

impl<S: RegionSource> Iterator for Iter<'_, S> {
    type Item = (usize, Block);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.current?;
        let block = self.region.read(offset);
        self.current = block.next();

        Some((offset, block))
    }
}
