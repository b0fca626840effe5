mod generation;
mod iter;
mod probe;
mod resize;
mod slot;
mod utils;

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use seize::{Collector, LocalGuard, OwnedGuard};
use tracing::{debug, trace, warn};

use self::generation::{reclaim, Generation, Lookup, RawGeneration};
use self::slot::{Value, NO_KEY, TOMBSTONE};
use self::utils::{Counter, Shared};
use crate::alloc::RawAlloc;
use crate::key::KeyType;
use crate::map::{Expected, ResizeEvent, Stats};
use crate::Error;

pub use generation::{MAX_SCALE, MIN_SCALE};
pub use iter::Iter;
pub use probe::BUCKET_SLOTS;
pub use slot::{is_valid_value, MAX_VALUE};

/// The default number of slots relocated by a single call to `help_copy`.
pub const COPY_CHUNK: usize = 2 * BUCKET_SLOTS;

// The key capabilities and allocator shared by all generations of a map.
pub struct Descriptor<K, A> {
    pub key_type: K,
    pub alloc: A,
}

// A callback invoked when a successor generation is installed.
pub type ResizeHook = Box<dyn Fn(ResizeEvent) + Send + Sync>;

// A lock-free hash table spanning a chain of generations.
pub struct HashMap<K: KeyType, A: RawAlloc> {
    // Collector for deferred reclamation of retired generations.
    collector: Collector,

    // The current generation, every operation starts here.
    table: AtomicPtr<RawGeneration>,

    // Key capabilities and the allocator, pointed to by every generation.
    shared: Shared<Descriptor<K, A>>,

    // An approximate count of live keys.
    count: Counter,

    // The number of successor generations installed.
    resizes: AtomicUsize,

    // The number of slots claimed per help-copy call.
    copy_chunk: usize,

    // Instrumentation hook for resizes.
    on_resize: Option<ResizeHook>,
}

// The result of a compare-and-swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Swap {
    // The value before the operation, `None` if the key was absent.
    pub previous: Option<u64>,

    // The key handle stored in the table, or `NO_KEY` if no slot was involved.
    pub key: u64,
}

// The result of a compare-and-swap attempt on a single generation.
enum Attempt {
    // The operation took effect, or failed its expectation, in this generation.
    Done(Swap),

    // The key lives in the successor generation.
    Retry,
}

impl<K: KeyType, A: RawAlloc> HashMap<K, A> {
    // Creates a map whose first generation holds `2^scale` slots.
    pub fn new(
        scale: u32,
        key_type: K,
        alloc: A,
        collector: Collector,
        copy_chunk: usize,
        on_resize: Option<ResizeHook>,
    ) -> Result<HashMap<K, A>, Error> {
        if scale > MAX_SCALE {
            return Err(Error::ScaleTooLarge {
                scale,
                max: MAX_SCALE,
            });
        }

        let scale = scale.max(MIN_SCALE);
        let shared = Shared::from(Descriptor { key_type, alloc });

        let table = Generation::alloc(scale, &*shared).map_err(|err| {
            warn!(scale, %err, "failed to allocate the initial generation");
            err
        })?;

        debug!(capacity = table.len(), "created map");

        Ok(HashMap {
            collector,
            shared,
            table: AtomicPtr::new(table.raw),
            count: Counter::new(),
            resizes: AtomicUsize::new(0),
            copy_chunk: copy_chunk.max(1),
            on_resize,
        })
    }

    // Returns a guard for this collector.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    // Returns an owned guard for this collector.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.collector.enter_owned()
    }

    // Verify a guard is valid to use with this map.
    #[inline]
    pub fn verify<G: seize::Guard>(&self, guard: &G) {
        assert_eq!(
            *guard.collector(),
            self.collector,
            "Attempted to access map with incorrect guard"
        );
    }

    // Returns the key capabilities.
    #[inline]
    pub fn key_type(&self) -> &K {
        &self.shared.key_type
    }

    // Returns the current generation.
    #[inline]
    fn root(&self, guard: &impl seize::Guard) -> Generation {
        let raw = guard.protect(&self.table, Ordering::Acquire);

        // Safety: The current generation is never null, and the guard keeps it
        // alive even if it is retired concurrently.
        unsafe { Generation::from_raw(raw) }
    }

    // Hash a key.
    #[inline]
    fn hash(&self, key: u64, ctx: &K::Context) -> u64 {
        self.shared.key_type.hash(key, ctx)
    }

    // Returns the number of live keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.sum()
    }

    // Returns the number of slots in the current generation.
    #[inline]
    pub fn capacity(&self, guard: &impl seize::Guard) -> usize {
        self.root(guard).len()
    }

    // Returns a snapshot of the table's shape.
    pub fn stats(&self, guard: &impl seize::Guard) -> Stats {
        let root = self.root(guard);

        let mut generations = 0;
        let mut memory = 0;
        let mut next = Some(root);
        while let Some(gen) = next {
            generations += 1;
            memory += gen.size();
            next = gen.next();
        }

        let keys = root.state().keys.load(Ordering::Relaxed);

        Stats {
            len: self.len(),
            capacity: root.len(),
            generations,
            resizes: self.resizes.load(Ordering::Relaxed),
            probe_limit: root.limit,
            key_density: keys as f64 / root.len() as f64 * 100.0,
            memory,
        }
    }

    // Returns the value for a key.
    #[inline]
    pub fn get(&self, key: u64, ctx: &K::Context, guard: &impl seize::Guard) -> Option<u64> {
        assert_ne!(key, NO_KEY, "the key 0 is reserved");

        let hash = self.hash(key, ctx);
        self.resolve(self.root(guard), key, hash, ctx)
    }

    // Resolve the current value of a key, starting at the given generation.
    //
    // Follows the key through the successor chain, helping any relocation it
    // runs into along the way.
    fn resolve(
        &self,
        mut gen: Generation,
        key: u64,
        hash: u64,
        ctx: &K::Context,
    ) -> Option<u64> {
        loop {
            let i = match gen.lookup(key, hash, &self.shared.key_type, ctx) {
                Lookup::Found(i) => i,

                // The key may have been inserted directly into the successor.
                Lookup::Exhausted => {
                    gen = gen.next()?;
                    continue;
                }

                Lookup::Empty(i) => {
                    // Safety: `lookup` returns in-bounds indices.
                    let value = unsafe { gen.slot(i) }.value.load(Ordering::Acquire);

                    // The slot was sealed by a migration, so the key could only
                    // have been inserted into the successor.
                    if Value::decode(value).is_terminal() {
                        gen = gen.successor();
                        continue;
                    }

                    return None;
                }
            };

            // Safety: `lookup` returns in-bounds indices.
            let slot = unsafe { gen.slot(i) };

            match Value::decode(slot.value.load(Ordering::Acquire)) {
                Value::Present(value) => return Some(value),
                Value::Empty | Value::Tombstone => return None,

                // Finish the relocation before reading from the successor.
                Value::Migrating(value) => match self.relocate(gen, i, Some(hash), ctx) {
                    Ok(copied) => {
                        if copied {
                            gen.state().copied.fetch_add(1, Ordering::AcqRel);
                        }

                        gen = gen.successor();
                    }

                    // The successor could not be grown, the value was never
                    // published anywhere else.
                    Err(_) => return Some(value),
                },

                Value::Relocated | Value::RelocatedTombstone => gen = gen.successor(),
            }
        }
    }

    // Compare the value of a key against an expectation and replace it.
    //
    // `None` as the new value deletes the key.
    pub fn compare_and_swap(
        &self,
        key: u64,
        expected: Expected,
        new: Option<u64>,
        ctx: &K::Context,
        guard: &impl seize::Guard,
    ) -> Result<Swap, Error> {
        assert_ne!(key, NO_KEY, "the key 0 is reserved");

        if let Some(value) = new {
            assert!(is_valid_value(value), "the value {value:#x} is reserved");
        }

        if let Expected::Value(value) = expected {
            assert!(is_valid_value(value), "the value {value:#x} is reserved");
        }

        let mut gen = self.root(guard);

        // Help with an in-progress resize.
        if gen.next().is_some() && self.help_copy(gen, ctx)? && self.try_promote(gen, guard)
        {
            gen = self.root(guard);
        }

        let hash = self.hash(key, ctx);

        loop {
            match self.cas_in(gen, key, hash, expected, new, ctx, guard)? {
                Attempt::Done(swap) => return Ok(swap),
                Attempt::Retry => gen = gen.successor(),
            }
        }
    }

    // Attempt a compare-and-swap in a single generation.
    #[allow(clippy::too_many_arguments)]
    fn cas_in(
        &self,
        gen: Generation,
        key: u64,
        hash: u64,
        expected: Expected,
        new: Option<u64>,
        ctx: &K::Context,
        guard: &impl seize::Guard,
    ) -> Result<Attempt, Error> {
        let key_type = &self.shared.key_type;

        loop {
            let (i, stored) = match gen.lookup(key, hash, key_type, ctx) {
                // There is no room for the key, continue in the successor.
                Lookup::Exhausted => {
                    self.next_or_resize(gen)?;
                    return Ok(Attempt::Retry);
                }

                Lookup::Found(i) => {
                    // Safety: `lookup` returns in-bounds indices.
                    let stored = unsafe { gen.slot(i) }.key.load(Ordering::Acquire);
                    (i, stored)
                }

                Lookup::Empty(i) => {
                    // Safety: `lookup` returns in-bounds indices.
                    let slot = unsafe { gen.slot(i) };

                    // The slot was sealed by a migration.
                    if Value::decode(slot.value.load(Ordering::Acquire)).is_tagged() {
                        return Ok(Attempt::Retry);
                    }

                    // A missing key only satisfies an expectation of absence.
                    if !expected.matches(None) {
                        return Ok(Attempt::Done(Swap {
                            previous: None,
                            key: NO_KEY,
                        }));
                    }

                    // The key is already deleted.
                    if new.is_none() {
                        return Ok(Attempt::Done(Swap {
                            previous: None,
                            key: NO_KEY,
                        }));
                    }

                    let clone = key_type.clone_key(key, ctx);
                    assert_ne!(clone, NO_KEY, "cloned key handles must be non-zero");

                    if let Err(found) =
                        slot.key
                            .compare_exchange(NO_KEY, clone, Ordering::AcqRel, Ordering::Acquire)
                    {
                        trace!(found, "lost race to install key");

                        // The clone was never published.
                        key_type.free(clone);
                        continue;
                    }

                    gen.state().keys.fetch_add(1, Ordering::Relaxed);
                    (i, clone)
                }
            };

            // Safety: `lookup` returns in-bounds indices.
            let slot = unsafe { gen.slot(i) };
            let current = slot.value.load(Ordering::Acquire);

            let previous = match Value::decode(current) {
                Value::Present(value) => Some(value),
                Value::Empty | Value::Tombstone => None,

                // The entry is being relocated, finish the copy and retry in the successor.
                Value::Migrating(_) => {
                    if self.relocate(gen, i, Some(hash), ctx)? {
                        gen.state().copied.fetch_add(1, Ordering::AcqRel);
                    }

                    return Ok(Attempt::Retry);
                }

                Value::Relocated | Value::RelocatedTombstone => return Ok(Attempt::Retry),
            };

            let done = Attempt::Done(Swap {
                previous,
                key: stored,
            });

            if !expected.matches(previous) {
                return Ok(done);
            }

            // The value is unchanged.
            if new == previous {
                return Ok(done);
            }

            let replacement = new.unwrap_or(TOMBSTONE);
            if let Err(found) = slot.value.compare_exchange(
                current,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                trace!(found, "lost race to update value");
                continue;
            }

            match (previous, new) {
                (None, Some(_)) => self.count.add(1, guard),
                (Some(_), None) => self.count.add(-1, guard),
                _ => {}
            }

            return Ok(done);
        }
    }

    // Returns an iterator over the live entries of the map.
    pub fn iter<'g, G: seize::Guard>(
        &'g self,
        ctx: &'g K::Context,
        guard: &'g G,
    ) -> Result<Iter<'g, K, A, G>, Error> {
        Iter::new(self, ctx, guard)
    }

    // Drop a reference to a generation, retiring it if it was the last.
    fn release(&self, gen: Generation, guard: &impl seize::Guard) {
        if gen.release() {
            debug!(capacity = gen.len(), "retiring generation");

            // Safety: The generation is no longer the current generation and no
            // iterator refers to it, so it is unreachable for new operations.
            // In-flight operations are protected by their guards.
            unsafe { guard.defer_retire(gen.raw, reclaim::<K, A>) };
        }
    }
}

impl<K: KeyType, A: RawAlloc> Drop for HashMap<K, A> {
    fn drop(&mut self) {
        // Retired generations read the shared descriptor when they are reclaimed,
        // so they must be reclaimed before it is dropped.
        //
        // Safety: We have unique access to the map, so no guards are active.
        unsafe { self.collector.reclaim_all() };

        let mut raw = *self.table.get_mut();

        // Free the current generation and any successors.
        while !raw.is_null() {
            // Safety: The current and successor pointers are always valid
            // generations or null.
            let gen = unsafe { Generation::from_raw(raw) };
            raw = gen.state().next.load(Ordering::Acquire);

            // Safety: We have unique access to the map, nothing else can observe
            // the generation.
            unsafe { reclaim::<K, A>(gen.raw, &self.collector) };
        }
    }
}
