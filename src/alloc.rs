//! Storage for table generations.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// An allocator for generation storage.
///
/// Every generation of a map is a single allocation requested from the allocator
/// the map was built with. Allocations are always cache-line aligned and never
/// zero-sized.
///
/// # Safety
///
/// `allocate_zeroed` must return either `None` or a pointer to zeroed memory that
/// is valid for reads and writes of `layout.size()` bytes and aligned to
/// `layout.align()`. The memory must stay valid until it is passed back to
/// `deallocate` with the same layout.
pub unsafe trait RawAlloc: Send + Sync {
    /// Allocate zeroed memory for the given layout.
    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Return memory obtained from `allocate_zeroed`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate_zeroed` on this allocator with
    /// the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global memory allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Global;

// Safety: Forwards to the global allocator, which upholds the same contract.
unsafe impl RawAlloc for Global {
    #[inline]
    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);

        // Safety: Generation layouts are never zero-sized.
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Safety: Guaranteed by caller.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

// Safety: Forwards to the shared allocator.
unsafe impl<A: RawAlloc> RawAlloc for std::sync::Arc<A> {
    #[inline]
    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        A::allocate_zeroed(self, layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Safety: Guaranteed by caller.
        unsafe { A::deallocate(self, ptr, layout) }
    }
}
