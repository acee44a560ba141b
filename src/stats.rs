use std::fmt;

/// Counters describing everything a [`crate::Heap`] has done so far.
///
/// The `Display` implementation renders the report printed when the heap
/// goes away:
///
/// ```text
/// heap management statistics
/// mallocs:        5
/// frees:          3
/// ...
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Non-zero allocation requests, successful or not.
    pub mallocs: usize,
    pub frees: usize,
    /// Requests satisfied by an existing free block.
    pub reuses: usize,
    /// Times the region was extended.
    pub grows: usize,
    pub splits: usize,
    /// Individual merges of two adjacent free blocks.
    pub coalesces: usize,
    /// Free blocks on the chain when the snapshot was taken.
    pub blocks: usize,
    /// Bytes requested by callers, before alignment.
    pub requested: usize,
    /// Bytes the region has grown by, headers included.
    pub max_heap: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nheap management statistics")?;
        writeln!(f, "mallocs:\t{}", self.mallocs)?;
        writeln!(f, "frees:\t\t{}", self.frees)?;
        writeln!(f, "reuses:\t\t{}", self.reuses)?;
        writeln!(f, "grows:\t\t{}", self.grows)?;
        writeln!(f, "splits:\t\t{}", self.splits)?;
        writeln!(f, "coalesces:\t{}", self.coalesces)?;
        writeln!(f, "blocks:\t\t{}", self.blocks)?;
        writeln!(f, "requested:\t{}", self.requested)?;
        writeln!(f, "max heap:\t{}", self.max_heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_every_counter() {
        let stats = Statistics {
            mallocs: 5,
            frees: 3,
            reuses: 1,
            grows: 4,
            splits: 1,
            coalesces: 2,
            blocks: 1,
            requested: 18011,
            max_heap: 20000,
        };

        let report = stats.to_string();
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines[1], "heap management statistics");
        assert_eq!(lines[2], "mallocs:\t5");
        assert_eq!(lines[7], "coalesces:\t2");
        assert_eq!(lines[10], "max heap:\t20000");
        assert_eq!(lines.len(), 11);
    }
}
