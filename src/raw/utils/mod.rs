mod counter;

pub use counter::Counter;

use std::ops::Deref;
use std::ptr::NonNull;

// Pads and aligns a value to the length of a cache line.
//
// Recent x86 and ARM cores prefetch cache lines in pairs, so shards are kept two
// lines apart on those targets.
#[derive(Default)]
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64"),
    repr(align(128))
)]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "powerpc64")),
    repr(align(64))
)]
pub struct CachePadded<T> {
    pub value: T,
}

// `Box<T>` but aliasable.
//
// Generations keep a raw pointer to the map's descriptor so that they can be
// reclaimed from any thread, which rules out a plain `Box` that asserts uniqueness
// whenever the map is moved.
pub struct Shared<T>(NonNull<T>);

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Shared<T> {
        // Safety: `Box::into_raw` never returns null.
        Shared(unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(value))) })
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        // Safety: The pointer was created from a live `Box` and is only freed on drop.
        unsafe { &*self.0.as_ptr() }
    }
}

impl<T> Drop for Shared<T> {
    #[inline]
    fn drop(&mut self) {
        // Safety: We own the allocation and it is not accessed after this call.
        let _ = unsafe { Box::from_raw(self.0.as_ptr()) };
    }
}

// Safety: `Shared<T>` only hands out shared references.
unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Sync> Sync for Shared<T> {}
