//! The underlying allocator the membrane delegates to.

use std::ptr::NonNull;

/// Opaque block allocator beneath the membrane.
///
/// # Safety
///
/// Implementations must return blocks aligned to at least
/// [`PAYLOAD_ALIGN`](crate::header::PAYLOAD_ALIGN) bytes and valid for
/// reads and writes of the requested size until released.
pub unsafe trait RawAllocator: Send + Sync {
    /// Obtain `bytes` bytes, or `None` if the allocator is exhausted.
    fn raw_allocate(&self, bytes: usize) -> Option<NonNull<u8>>;

    /// Return a block obtained from [`raw_allocate`](Self::raw_allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `raw_allocate` on this allocator and must not
    /// have been released already.
    unsafe fn raw_release(&self, ptr: NonNull<u8>);
}

/// `malloc`/`free` from the platform C library.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcAllocator;

// SAFETY: malloc returns memory aligned for max_align_t (16 bytes on the
// 64-bit targets this crate supports).
unsafe impl RawAllocator for LibcAllocator {
    fn raw_allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        // SAFETY: malloc accepts any size and returns null on failure.
        NonNull::new(unsafe { libc::malloc(bytes) }.cast::<u8>())
    }

    unsafe fn raw_release(&self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees ptr came from malloc and is released once.
        unsafe { libc::free(ptr.as_ptr().cast()) }
    }
}

/// Refuses any single request larger than `cap` bytes; forwards the rest.
#[derive(Debug, Default, Clone, Copy)]
pub struct CappedAllocator<A> {
    inner: A,
    cap: usize,
}

impl<A: RawAllocator> CappedAllocator<A> {
    #[must_use]
    pub const fn new(inner: A, cap: usize) -> Self {
        Self { inner, cap }
    }

    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }
}

// SAFETY: every block comes from `inner`, which upholds the contract.
unsafe impl<A: RawAllocator> RawAllocator for CappedAllocator<A> {
    fn raw_allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes > self.cap {
            return None;
        }
        self.inner.raw_allocate(bytes)
    }

    unsafe fn raw_release(&self, ptr: NonNull<u8>) {
        // SAFETY: forwarded from the caller.
        unsafe { self.inner.raw_release(ptr) }
    }
}
