use thiserror::Error;

/// Everything that can go wrong inside the heap.
///
/// Only [`HeapError::DoubleFree`] and [`HeapError::ForeignPointer`] are fatal:
/// the malloc-style entry points of [`crate::Heap`] panic on them, while every
/// other variant turns into a null result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeapError {
    #[error("zero-sized allocation request")]
    ZeroSize,

    #[error("the operating system refused to extend the heap by {increment} bytes")]
    Exhausted { increment: usize },

    #[error("heap extension at {found:#x} is not contiguous with the break at {expected:#x}")]
    Discontiguous { expected: usize, found: usize },

    #[error("a request of {0} bytes is too large to be represented")]
    TooLarge(usize),

    #[error("could not reserve {0} bytes of address space")]
    Reserve(usize),

    #[error("double free of the block at offset {offset}")]
    DoubleFree { offset: usize },

    #[error("pointer {0:#x} was not handed out by this heap")]
    ForeignPointer(usize),

    #[error("zero-allocate of {count} x {size} bytes overflows")]
    Overflow { count: usize, size: usize },

    #[error("unknown fit policy `{0}` (expected first, best, worst or next)")]
    UnknownPolicy(String),

    #[error("invalid value `{value}` for {var}")]
    InvalidConfig { var: &'static str, value: String },
}
