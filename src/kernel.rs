use std::{ptr::NonNull, sync::OnceLock};

use log::debug;

use crate::{error::HeapError, utils::align};

/// Source of the single growable stretch of address space a heap lives in.
/// This is the heap's view of the operating system: the only thing it ever
/// asks for is "move the break forward by `increment` bytes".
///
/// **SAFETY**: Implementors must guarantee that
///
/// - the bytes returned by [`RegionSource::extend`] are readable, writable and
///   initialized for `increment` bytes and stay valid until the source is dropped.
/// - every extension starts exactly where the previous one ended, and the first
///   one is at least [`crate::block::ALIGNMENT`] aligned.
/// - nothing else writes to memory that has been handed out.
pub unsafe trait RegionSource {
    /// Moves the break forward by `increment` bytes and returns the old break,
    /// which is the start of the new bytes. Returns `None` if the operating
    /// system refuses.
    fn extend(&mut self, increment: usize) -> Option<NonNull<u8>>;
}

/// Virtual memory page size of the computer. This is usually 4096.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Wrapper to query the computer's page size only once.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { Kernel::page_size() })
}

/// Zero sized handle for the platform-dependant stuff.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. Our top level view of this, the [`Reserved`] region, has
/// nothing to do with the concrete APIs offered by each kernel.
trait PlatformMemory {
    /// Reserves `len` bytes of address space without backing them. Returns
    /// the start of the reservation or None if the underlying syscall fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `len` bytes starting from `addr` (inside a reservation) readable
    /// and writable.
    unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns a whole reservation of size `len` starting from `addr` back to the kernel.
    unsafe fn release(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, mprotect, munmap, off_t, size_t};

    use std::{os::raw::{c_int, c_void}, ptr::NonNull};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // No access at all until pages get committed.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            unsafe { mprotect(addr.as_ptr().cast::<c_void>(), len as size_t, PROT) == 0 }
        }

        unsafe fn release(addr: NonNull<u8>, len: usize) {
            unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t); }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use crate::kernel::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr =
                    Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            unsafe {
                let addr = Memory::VirtualAlloc(
                    Some(addr.as_ptr() as *const c_void),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                !addr.is_null()
            }
        }

        unsafe fn release(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// A region backed by the operating system.
///
/// `capacity` bytes of address space are reserved up front so that the
/// region can only ever grow in place, the way a data segment grows with
/// `sbrk`. Pages are committed lazily as the break moves past them.
///
/// ```text
///  base                 break     committed                    base + capacity
///   |                     |           |                                 |
///   v                     v           v                                 v
///   +---------------------+-----------+---------------------------------+
///   |   handed to heap    |  backed   |     reserved, no access         |
///   +---------------------+-----------+---------------------------------+
/// ```
///
/// Nothing is returned to the kernel until the whole region is dropped.
pub struct Reserved {
    base: NonNull<u8>,
    capacity: usize,
    committed: usize,
    brk: usize,
}

impl Reserved {
    /// Reserves `capacity` bytes (rounded up to the page size).
    pub fn new(capacity: usize) -> Result<Self, HeapError> {
        let capacity = align(capacity.max(1), page_size());

        let base = unsafe { Kernel::reserve(capacity) }.ok_or(HeapError::Reserve(capacity))?;
        debug!("reserved {capacity} bytes of address space at {base:?}");

        Ok(Self { base, capacity, committed: 0, brk: 0 })
    }

    /// Size of the reservation, which bounds how far the region can grow.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn len(&self) -> usize {
        self.brk
    }

    pub fn is_empty(&self) -> bool {
        self.brk == 0
    }
}

unsafe impl RegionSource for Reserved {
    fn extend(&mut self, increment: usize) -> Option<NonNull<u8>> {
        let brk = self.brk.checked_add(increment)?;
        if brk > self.capacity {
            return None;
        }

        if brk > self.committed {
            let committed = align(brk, page_size());

            unsafe {
                let start = self.base.add(self.committed);
                if !Kernel::commit(start, committed - self.committed) {
                    return None;
                }
            }

            self.committed = committed;
        }

        let start = unsafe { self.base.add(self.brk) };
        self.brk = brk;

        Some(start)
    }
}

impl Drop for Reserved {
    fn drop(&mut self) {
        unsafe { Kernel::release(self.base, self.capacity) }
    }
}

/// A simulated operating system: a fixed buffer that refuses to grow past
/// its capacity, or past whatever point it has been [sealed](FixedRegion::seal) at.
pub struct FixedRegion {
    memory: Vec<u64>,
    base: NonNull<u8>,
    limit: usize,
    brk: usize,
}

impl FixedRegion {
    /// Creates a zeroed buffer able to hand out `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let mut memory = vec![0u64; capacity.div_ceil(8).max(1)];
        let base = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap_or(NonNull::dangling());

        Self { memory, base, limit: capacity, brk: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.memory.len() * 8
    }

    /// Bytes handed out so far.
    pub fn len(&self) -> usize {
        self.brk
    }

    pub fn is_empty(&self) -> bool {
        self.brk == 0
    }

    /// Refuses every later extension, like an operating system that has run
    /// out of memory.
    pub fn seal(&mut self) {
        self.limit = self.brk;
    }

    /// Allows growth again, up to the full capacity.
    pub fn unseal(&mut self) {
        self.limit = self.capacity();
    }
}

unsafe impl RegionSource for FixedRegion {
    fn extend(&mut self, increment: usize) -> Option<NonNull<u8>> {
        let brk = self.brk.checked_add(increment)?;
        if brk > self.limit {
            return None;
        }

        // `base` points into `memory`, whose buffer never moves.
        let start = unsafe { self.base.add(self.brk) };
        self.brk = brk;

        Some(start)
    }
}
