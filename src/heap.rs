use std::ptr::{self, NonNull};

use log::{info, warn};

use crate::{
    block::{BlockInfo, ALIGNMENT},
    config::HeapConfig,
    error::HeapError,
    freelist::{self, FitPolicy},
    kernel::{RegionSource, Reserved},
    list::Link,
    region::Region,
    stats::Statistics,
    utils::checked_align,
};

/// A heap: one growable region, the chain of blocks carved out of it, the
/// fit policy used to reuse them and the counters describing all of it.
///
/// The four malloc-style entry points are [`Heap::allocate`], [`Heap::free`],
/// [`Heap::zero_allocate`] and [`Heap::resize`]. They hand out and take raw
/// payload pointers, with null standing for "no memory". The `try_*`
/// variants report the reason instead.
///
/// ```text
/// allocate(n) ──> select free block ──found──> split if oversized ──┐
///                        │                                          ├──> payload
///                        └──none──> grow region by header + n ──────┘
///
/// free(p) ──> mark block free ──> coalesce the whole chain
/// ```
///
/// A heap is single threaded: every method takes `&mut self`, and wrapping
/// it in a lock is up to the caller.
pub struct Heap<S: RegionSource = Reserved> {
    region: Region<S>,
    policy: FitPolicy,
    /// Block right after the one handed out last. Only used by next-fit.
    cursor: Link,
    stats: Statistics,
    report_at_exit: bool,
    /// Set by the first allocation request, like registering an exit hook.
    report_armed: bool,
}

impl Heap<Reserved> {
    /// Creates a heap on top of a fresh [`Reserved`] region of `config.capacity` bytes.
    pub fn new(config: HeapConfig) -> Result<Self, HeapError> {
        Ok(Self::with_source(Reserved::new(config.capacity)?, config))
    }
}

impl<S: RegionSource> Heap<S> {
    /// Creates a heap that grows through `source`. `config.capacity` is not
    /// used here, the source decides how far it lets the heap grow.
    pub fn with_source(source: S, config: HeapConfig) -> Self {
        Self {
            region: Region::new(source),
            policy: config.policy,
            cursor: None,
            stats: Statistics::default(),
            report_at_exit: config.report_at_exit,
            report_armed: false,
        }
    }

    #[inline]
    pub fn policy(&self) -> FitPolicy {
        self.policy
    }

    pub fn source(&self) -> &S {
        self.region.source()
    }

    pub fn source_mut(&mut self) -> &mut S {
        self.region.source_mut()
    }

    /// Snapshot of the counters. The number of free blocks is counted by
    /// walking the chain now.
    pub fn stats(&self) -> Statistics {
        Statistics {
            blocks: self.region.iter().filter(|(_, block)| block.is_free).count(),
            ..self.stats
        }
    }

    /// Every block of the chain, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.region.iter().map(|(offset, block)| BlockInfo::new(offset, &block))
    }

    /// Returns a pointer to at least `size` usable bytes, aligned to
    /// [`ALIGNMENT`], or null if `size` is zero or no memory is left.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        match self.try_allocate(size) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    /// Same as [`Heap::allocate`], but tells why nothing could be handed out.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }

        self.report_armed = self.report_at_exit;
        self.stats.mallocs += 1;
        self.stats.requested = self.stats.requested.saturating_add(size);

        let Some(size) = checked_align(size, ALIGNMENT) else {
            warn!("allocation of {size} bytes can not be rounded to {ALIGNMENT} bytes");
            return Err(HeapError::TooLarge(size));
        };

        let offset = match freelist::find_free_block(&self.region, self.policy, size, self.cursor) {
            Some(offset) => {
                self.stats.reuses += 1;
                if self.region.split(offset, size).is_some() {
                    self.stats.splits += 1;
                }
                offset
            }
            None => {
                let before = self.region.len();
                let offset = self.region.grow(size).inspect_err(|err| {
                    warn!("allocation of {size} bytes failed: {err}");
                })?;

                self.stats.grows += 1;
                self.stats.max_heap += self.region.len() - before;
                offset
            }
        };

        let mut block = self.region.read(offset);
        block.is_free = false;
        self.region.write(offset, block);

        self.cursor = block.next();

        Ok(self.region.payload(offset))
    }

    /// Gives the block behind `ptr` back to the heap and merges adjacent
    /// free blocks. A null `ptr` is ignored.
    ///
    /// # Panics
    ///
    /// If the block is already free, or `ptr` does not point into this heap.
    ///
    /// **SAFETY**: `ptr` must be null or have been returned by this heap and
    /// not freed since. Nothing derived from it may be used afterwards.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else { return };

        if let Err(err) = unsafe { self.try_free(ptr) } {
            panic!("heap corruption: {err}");
        }
    }

    /// Same as [`Heap::free`], but reports double frees and foreign pointers
    /// instead of panicking. The heap is left untouched when an error is returned.
    ///
    /// **SAFETY**: See [`Heap::free`].
    pub unsafe fn try_free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let offset = self.owning_block(ptr)?;

        let mut block = self.region.read(offset);
        if block.is_free {
            return Err(HeapError::DoubleFree { offset });
        }

        block.is_free = true;
        self.region.write(offset, block);
        self.stats.frees += 1;

        self.stats.coalesces += self.region.coalesce(&mut self.cursor);

        Ok(())
    }

    /// Allocates `count * size` bytes and fills them with zeros. Returns null
    /// if the allocation fails or the multiplication overflows.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> *mut u8 {
        match self.try_zero_allocate(count, size) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    pub fn try_zero_allocate(
        &mut self,
        count: usize,
        size: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        let Some(total) = count.checked_mul(size) else {
            warn!("zero-allocate of {count} x {size} bytes overflows");
            return Err(HeapError::Overflow { count, size });
        };

        let ptr = self.try_allocate(total)?;
        // A reused block still holds whatever its previous owner wrote.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };

        Ok(ptr)
    }

    /// Moves the contents of `ptr` into a fresh block of `new_size` bytes.
    ///
    /// - `min(old size, new_size)` bytes are copied, never more than the old
    ///   block holds.
    /// - A null `ptr` is the same as [`Heap::allocate`].
    /// - A `new_size` of zero frees `ptr` and returns null.
    /// - If the new block can not be allocated, null is returned and `ptr`
    ///   stays valid and untouched.
    ///
    /// # Panics
    ///
    /// Same as [`Heap::free`].
    ///
    /// **SAFETY**: See [`Heap::free`]. On success `ptr` is freed.
    pub unsafe fn resize(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        let Some(old) = NonNull::new(ptr) else {
            return self.allocate(new_size);
        };

        if new_size == 0 {
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }

        match unsafe { self.try_resize(old, new_size) } {
            Ok(new) => new.as_ptr(),
            Err(err @ (HeapError::DoubleFree { .. } | HeapError::ForeignPointer(_))) => {
                panic!("heap corruption: {err}")
            }
            Err(_) => ptr::null_mut(),
        }
    }

    /// Fallible core of [`Heap::resize`] for a live, non-null `ptr`.
    ///
    /// **SAFETY**: See [`Heap::free`].
    pub unsafe fn try_resize(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        let old_size = unsafe { self.usable_size(ptr) }?;

        let new = self.try_allocate(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), old_size.min(new_size));
            self.try_free(ptr)?;
        }

        Ok(new)
    }

    /// Number of usable bytes in the live block behind `ptr`, which may be
    /// more than was requested.
    ///
    /// **SAFETY**: `ptr` must have been returned by this heap and not freed since.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        let offset = self.owning_block(ptr)?;
        let block = self.region.read(offset);

        if block.is_free {
            return Err(HeapError::DoubleFree { offset });
        }

        Ok(block.size)
    }

    /// Header offset of the block whose payload starts at `ptr`.
    fn owning_block(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        self.region
            .offset_of(ptr)
            .ok_or(HeapError::ForeignPointer(ptr.as_ptr() as usize))
    }
}

impl<S: RegionSource> Drop for Heap<S> {
    fn drop(&mut self) {
        if !self.report_armed {
            return;
        }

        let stats = self.stats();
        info!("{} bytes managed in {} blocks", self.region.len(), self.region.iter().count());
        print!("{stats}");
    }
}
