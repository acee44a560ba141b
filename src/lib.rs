//! # heapfit
//!
//! A user-space heap implementing the classic malloc API (allocate, free,
//! zero-allocate, resize) on top of one growable region of address space,
//! with four interchangeable block selection policies.
//!
//! Every chunk of the region is a block: a small header followed by the
//! payload handed to the caller. All blocks ever carved out form a chain in
//! address order:
//!
//! ```text
//! +--------+---------+--------+---------------+--------+---------+
//! | Header | payload | Header | payload(free) | Header | payload | ...
//! +--------+---------+--------+---------------+--------+---------+
//!      |                  ^  |                     ^
//!      +------------------+  +---------------------+
//!               next                  next
//! ```
//!
//! - **Allocation** looks for a free block with the configured [`FitPolicy`],
//!   splits it if it is big enough to leave a useful free remainder, and
//!   otherwise grows the region by exactly one header plus the request.
//! - **Free** flags the block and then merges every run of adjacent free
//!   blocks in the chain.
//! - Counters of everything that happened are kept in [`Statistics`] and
//!   printed once, when the heap is dropped.
//!
//! ```rust
//! use heapfit::{FitPolicy, Heap, HeapConfig, Statistics};
//!
//! let config = HeapConfig::default()
//!     .with_policy(FitPolicy::BestFit)
//!     .with_capacity(1 << 20)
//!     .with_report(false);
//! let mut heap = Heap::new(config).unwrap();
//!
//! let ptr = heap.allocate(100);
//! assert!(!ptr.is_null());
//! unsafe { heap.free(ptr) };
//!
//! let stats: Statistics = heap.stats();
//! assert_eq!((stats.mallocs, stats.frees), (1, 1));
//! ```
//!
//! A heap is single threaded and memory is never returned to the operating
//! system before the heap itself is dropped.

mod block;
mod config;
mod error;
mod freelist;
mod heap;
pub mod kernel;
mod list;
mod region;
mod stats;
mod utils;

pub use block::{BlockInfo, ALIGNMENT, HEADER_SIZE, SPLIT_THRESHOLD};
pub use config::{HeapConfig, DEFAULT_CAPACITY};
pub use error::HeapError;
pub use freelist::FitPolicy;
pub use heap::Heap;
pub use kernel::{FixedRegion, RegionSource, Reserved};
pub use stats::Statistics;
pub use utils::{align, checked_align};
