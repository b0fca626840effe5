use std::alloc::Layout;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use seize::Collector;

use super::probe::{self, Probe, BUCKET_SLOTS, CACHE_LINE};
use super::slot::{Slot, NO_KEY, RELOCATED};
use super::Descriptor;
use crate::alloc::RawAlloc;
use crate::key::KeyType;
use crate::Error;

/// The smallest supported scale, a generation always holds at least four buckets.
pub const MIN_SCALE: u32 = 4;

/// The largest supported scale.
pub const MAX_SCALE: u32 = 48;

// A generation laid out in a single allocation.
#[repr(transparent)]
pub struct RawGeneration(u8);

// The header of a generation allocation.
//
// The slot array follows the header. The header is padded to a full cache line
// so that the first bucket is cache aligned.
#[repr(C, align(64))]
struct GenerationLayout {
    scale: u32,
    limit: usize,
    state: State,
}

// The mutable state of a generation.
pub struct State {
    // The successor generation, written at most once.
    pub next: AtomicPtr<RawGeneration>,

    // The next slot index to be claimed by a copier.
    pub cursor: AtomicUsize,

    // The number of slots that have reached a terminal state through relocation.
    pub copied: AtomicUsize,

    // The number of installed keys.
    pub keys: AtomicUsize,

    // One reference for the generation chain plus one per live iterator.
    pub refs: AtomicUsize,

    // The map's `Descriptor<K, A>`, used for reclamation.
    descriptor: *const (),
}

// The result of a lookup in a single generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    // A slot holding a matching key.
    Found(usize),

    // The first slot with no key along the probe sequence.
    Empty(usize),

    // The probe limit was reached without finding either.
    Exhausted,
}

// A handle to a generation allocation.
pub struct Generation {
    // The raw allocation.
    pub raw: *mut RawGeneration,
    // The generation holds `2^scale` slots.
    pub scale: u32,
    // Mask for the number of slots.
    pub mask: usize,
    // The maximum number of buckets probed by a lookup.
    pub limit: usize,
}

impl Copy for Generation {}

impl Clone for Generation {
    fn clone(&self) -> Self {
        *self
    }
}

impl Generation {
    // Allocate a generation with `2^scale` empty slots.
    pub fn alloc<K, A: RawAlloc>(
        scale: u32,
        descriptor: &Descriptor<K, A>,
    ) -> Result<Generation, Error> {
        debug_assert!((MIN_SCALE..=MAX_SCALE).contains(&scale));

        let layout = Generation::layout(scale)?;
        let limit = probe::limit(scale);

        // Zeroed memory is a valid array of empty slots.
        let ptr = descriptor
            .alloc
            .allocate_zeroed(layout)
            .ok_or(Error::Alloc {
                bytes: layout.size(),
            })?;

        // Safety: The allocation is valid for `layout`, which begins with the header.
        unsafe {
            ptr.as_ptr().cast::<GenerationLayout>().write(GenerationLayout {
                scale,
                limit,
                state: State {
                    next: AtomicPtr::new(ptr::null_mut()),
                    cursor: AtomicUsize::new(0),
                    copied: AtomicUsize::new(0),
                    keys: AtomicUsize::new(0),
                    refs: AtomicUsize::new(1),
                    descriptor: (descriptor as *const Descriptor<K, A>).cast(),
                },
            });
        }

        Ok(Generation {
            raw: ptr.as_ptr().cast::<RawGeneration>(),
            scale,
            mask: (1 << scale) - 1,
            limit,
        })
    }

    // Creates a `Generation` from a raw pointer.
    //
    // # Safety
    //
    // The pointer must be a live generation allocation.
    #[inline]
    pub unsafe fn from_raw(raw: *mut RawGeneration) -> Generation {
        let layout = unsafe { &*raw.cast::<GenerationLayout>() };

        Generation {
            raw,
            scale: layout.scale,
            mask: (1 << layout.scale) - 1,
            limit: layout.limit,
        }
    }

    // Returns the slot at the given index.
    //
    // # Safety
    //
    // The index must be in bounds.
    #[inline]
    pub unsafe fn slot(&self, i: usize) -> &Slot {
        debug_assert!(i <= self.mask);

        unsafe {
            &*self
                .raw
                .add(mem::size_of::<GenerationLayout>())
                .cast::<Slot>()
                .add(i)
        }
    }

    // Returns the number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.mask + 1
    }

    // Returns a reference to the generation state.
    #[inline]
    pub fn state(&self) -> &State {
        // Safety: `raw` is a valid generation allocation.
        unsafe { &(*self.raw.cast::<GenerationLayout>()).state }
    }

    // Returns the successor generation, if one was installed.
    #[inline]
    pub fn next(&self) -> Option<Generation> {
        let next = self.state().next.load(Ordering::Acquire);

        if next.is_null() {
            return None;
        }

        // Safety: The successor pointer is either null or a live generation, it
        // is retired strictly after this generation.
        Some(unsafe { Generation::from_raw(next) })
    }

    // Returns the successor of a generation that is known to be migrating.
    #[inline]
    pub fn successor(&self) -> Generation {
        match self.next() {
            Some(next) => next,
            None => panic!("internal invariant broken: migrating generation has no successor"),
        }
    }

    // Returns the number of bytes held by this generation.
    #[inline]
    pub fn size(&self) -> usize {
        mem::size_of::<GenerationLayout>() + mem::size_of::<Slot>() * self.len()
    }

    // Find the slot for a key.
    //
    // Scans one bucket at a time and stops at the first matching key or the first
    // slot without a key. Stored keys are compared by raw word first, so `equals`
    // is only consulted for distinct handles.
    pub fn lookup<K: KeyType>(
        &self,
        key: u64,
        hash: u64,
        key_type: &K,
        ctx: &K::Context,
    ) -> Lookup {
        let mut probe = Probe::start(hash, self.scale);

        while probe.len < self.limit {
            for j in 0..BUCKET_SLOTS {
                let i = probe.slot(j);

                // Safety: `probe.slot` is masked to the table length.
                let found = unsafe { self.slot(i) }.key.load(Ordering::Acquire);

                if found == NO_KEY {
                    return Lookup::Empty(i);
                }

                if found == key || key_type.equals(found, key, ctx) {
                    return Lookup::Found(i);
                }
            }

            probe.next();
        }

        Lookup::Exhausted
    }

    // Take an additional reference to this generation.
    //
    // Fails if the generation has already been released by all of its owners.
    pub fn acquire(&self) -> bool {
        let refs = &self.state().refs;
        let mut current = refs.load(Ordering::Acquire);

        loop {
            if current == 0 {
                return false;
            }

            match refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(found) => current = found,
            }
        }
    }

    // Drop a reference to this generation, returning `true` if it was the last.
    pub fn release(&self) -> bool {
        let refs = self.state().refs.fetch_sub(1, Ordering::AcqRel);
        assert!(refs > 0, "internal invariant broken: generation released twice");
        refs == 1
    }

    // Free every key that is still owned by this generation.
    //
    // A `RELOCATED` value means the key handle was moved into the successor.
    fn free_keys<K: KeyType>(&self, key_type: &K) {
        for i in 0..self.len() {
            // Safety: `i` is in bounds.
            let slot = unsafe { self.slot(i) };

            let key = slot.key.load(Ordering::Acquire);
            if key != NO_KEY && slot.value.load(Ordering::Acquire) != RELOCATED {
                key_type.free(key);
            }
        }
    }

    // Deallocate the generation without touching its keys.
    //
    // # Safety
    //
    // The generation must be unreachable and must have been allocated by `alloc`.
    pub unsafe fn dealloc<A: RawAlloc>(gen: Generation, alloc: &A) {
        // The header fields are plain atomics, nothing needs to be dropped.
        if let Ok(layout) = Generation::layout(gen.scale) {
            // Safety: Guaranteed by caller.
            unsafe { alloc.deallocate(NonNull::new_unchecked(gen.raw.cast::<u8>()), layout) }
        }
    }

    // The layout of a generation allocation.
    fn layout(scale: u32) -> Result<Layout, Error> {
        let size = 1usize
            .checked_shl(scale)
            .and_then(|len| len.checked_mul(mem::size_of::<Slot>()))
            .and_then(|slots| slots.checked_add(mem::size_of::<GenerationLayout>()))
            .ok_or(Error::CapacityOverflow)?;

        Layout::from_size_align(size, CACHE_LINE).map_err(|_| Error::CapacityOverflow)
    }
}

// Reclaim a generation whose last reference was released.
//
// # Safety
//
// The generation must be unreachable by any thread. Its descriptor pointer must
// point to a live `Descriptor<K, A>`.
pub unsafe fn reclaim<K: KeyType, A: RawAlloc>(raw: *mut RawGeneration, _: &Collector) {
    unsafe {
        let gen = Generation::from_raw(raw);
        let descriptor = &*gen.state().descriptor.cast::<Descriptor<K, A>>();

        gen.free_keys(&descriptor.key_type);
        Generation::dealloc(gen, &descriptor.alloc);
    }
}
