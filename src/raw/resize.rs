use std::ptr;
use std::sync::atomic::Ordering;

use tracing::{debug, trace, warn};

use super::generation::{Generation, Lookup, MAX_SCALE};
use super::slot::{Value, EMPTY, MIGRATING, NO_KEY, RELOCATED, RELOCATED_TOMBSTONE};
use super::HashMap;
use crate::alloc::RawAlloc;
use crate::key::KeyType;
use crate::map::ResizeEvent;
use crate::Error;

impl<K: KeyType, A: RawAlloc> HashMap<K, A> {
    // Returns the successor of a generation, installing one if necessary.
    //
    // Called when a lookup exhausts its probe limit. Any number of threads may race
    // here, exactly one successor is installed and the losers free their allocation.
    pub(super) fn next_or_resize(&self, gen: Generation) -> Result<Generation, Error> {
        // The successor is already installed.
        if let Some(next) = gen.next() {
            return Ok(next);
        }

        let len = gen.len();
        let keys = gen.state().keys.load(Ordering::Relaxed);

        // Loading the length here is relatively expensive, but resizes are rare.
        let live = self.len();

        let scale = match live >= len >> 1 {
            // Double the table if it is at least half full.
            true => gen.scale + 1,

            // Avoid growing the table to stress the relocation protocol.
            false if cfg!(nbmap_stress) => gen.scale,

            // The probe limit was hit while most slots are still free, meaning the
            // probe sequences are clustered. Grow even though the live estimate is
            // below half: a copy of the same size hashes every key to the same home
            // bucket and stride, so it would reproduce the same clusters and exhaust
            // its probe limit again.
            false if keys < len >> 1 => gen.scale + 1,

            // Otherwise keep the capacity the same.
            //
            // The table is dense with deleted keys, which are dropped by the copy.
            false => gen.scale,
        };

        if scale > MAX_SCALE {
            warn!(scale, "table exceeded maximum capacity");
            return Err(Error::CapacityOverflow);
        }

        let next = Generation::alloc(scale, &*self.shared).map_err(|err| {
            warn!(scale, %err, "failed to allocate successor generation");
            err
        })?;

        match gen.state().next.compare_exchange(
            ptr::null_mut(),
            next.raw,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.resizes.fetch_add(1, Ordering::Relaxed);

                debug!(
                    from = len,
                    to = next.len(),
                    keys,
                    live,
                    "installed successor generation"
                );

                if let Some(on_resize) = &self.on_resize {
                    on_resize(ResizeEvent {
                        from_scale: gen.scale,
                        to_scale: scale,
                        keys,
                    });
                }

                Ok(next)
            }

            // Another thread beat us to it.
            Err(found) => {
                trace!("lost race to install successor generation");

                // Safety: The allocation was never published.
                unsafe { Generation::dealloc(next, &self.shared.alloc) };

                // Safety: The successor pointer is write-once.
                Ok(unsafe { Generation::from_raw(found) })
            }
        }
    }

    // Relocate the slot at index `i` into the successor generation.
    //
    // Safe to call redundantly from any number of threads. Returns `true` only for
    // the single call that moved the slot to a terminal state, so that callers can
    // account for progress.
    pub(super) fn relocate(
        &self,
        gen: Generation,
        i: usize,
        hash: Option<u64>,
        ctx: &K::Context,
    ) -> Result<bool, Error> {
        // Safety: The caller guarantees `i` is in bounds.
        let source = unsafe { gen.slot(i) };
        let mut current = source.value.load(Ordering::Acquire);

        // Already copied.
        if Value::decode(current).is_terminal() {
            return Ok(false);
        }

        // Seal empty slots, anything inserted here later must go to the successor.
        //
        // Any key installed here is still owned by this generation, hence the
        // tombstone encoding.
        if current == EMPTY {
            match source.value.compare_exchange(
                EMPTY,
                RELOCATED_TOMBSTONE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(true),
                Err(found) => current = found,
            }
        }

        // Tag the value to fence out writers.
        if current & MIGRATING == 0 {
            current = source.value.fetch_or(MIGRATING, Ordering::AcqRel);
        }

        let value = match Value::decode(current) {
            // Another thread completed the copy.
            Value::Relocated | Value::RelocatedTombstone => return Ok(false),

            // The tombstone became a terminal tombstone when we tagged it.
            Value::Tombstone => return Ok(true),

            Value::Present(value) | Value::Migrating(value) => value,

            // Values never return to empty.
            Value::Empty => panic!("internal invariant broken: tagged an empty value"),
        };

        let key = source.key.load(Ordering::Acquire);
        assert_ne!(key, NO_KEY, "internal invariant broken: value without a key");

        let key_type = &self.shared.key_type;
        let hash = hash.unwrap_or_else(|| key_type.hash(key, ctx));

        let mut target = gen.successor();

        loop {
            let j = match target.lookup(key, hash, key_type, ctx) {
                Lookup::Found(j) => j,

                // There is no room in the successor either, nested resizes are
                // expected under sustained load.
                Lookup::Exhausted => {
                    target = self.next_or_resize(target)?;
                    continue;
                }

                // The key handle moves to the successor along with the value.
                Lookup::Empty(j) => {
                    // Safety: `lookup` returns in-bounds indices.
                    let slot = unsafe { target.slot(j) };

                    if let Err(found) =
                        slot.key
                            .compare_exchange(NO_KEY, key, Ordering::AcqRel, Ordering::Acquire)
                    {
                        trace!(found, "lost race to install relocated key");
                        continue;
                    }

                    target.state().keys.fetch_add(1, Ordering::Relaxed);
                    j
                }
            };

            // Safety: `lookup` returns in-bounds indices.
            let slot = unsafe { target.slot(j) };

            match slot.value.compare_exchange(EMPTY, value, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    source.value.store(RELOCATED, Ordering::Release);
                    return Ok(true);
                }

                // The target slot was sealed by a nested migration before the value
                // arrived, follow it into the next generation. The key handle in
                // the sealed slot is ours, so ownership moves along with it.
                Err(RELOCATED_TOMBSTONE) => {
                    // Another copier placed the value and it was deleted before the
                    // nested migration, there is nothing left to move.
                    if source.value.load(Ordering::Acquire) == RELOCATED {
                        return Ok(false);
                    }

                    if slot.key.load(Ordering::Acquire) == key {
                        let _ = slot.value.compare_exchange(
                            RELOCATED_TOMBSTONE,
                            RELOCATED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                    }

                    target = target.successor();
                }

                // Another copier already moved the value onwards.
                Err(RELOCATED) => target = target.successor(),

                // Another copier won the race.
                Err(_) => {
                    source.value.store(RELOCATED, Ordering::Release);
                    return Ok(false);
                }
            }
        }
    }

    // Help copy a chunk of slots into the successor generation.
    //
    // Returns `true` once every slot of the generation has been relocated.
    pub(super) fn help_copy(&self, gen: Generation, ctx: &K::Context) -> Result<bool, Error> {
        let state = gen.state();
        let len = gen.len();

        if state.copied.load(Ordering::Acquire) == len {
            return Ok(true);
        }

        let chunk = self.copy_chunk.min(len);
        let start = state.cursor.fetch_add(chunk, Ordering::Relaxed);

        // The cursor wraps around the table while stalled copiers finish their
        // chunks. After two full passes, scan the whole table.
        let (start, count) = if start >= len << 1 {
            trace!(len, "falling back to a full copy scan");
            (0, len)
        } else {
            (start & gen.mask, chunk)
        };

        let mut copied = 0;
        let mut result = Ok(());

        for i in start..start + count {
            match self.relocate(gen, i & gen.mask, None, ctx) {
                Ok(true) => copied += 1,
                Ok(false) => {}
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        // Account for our progress even if the copy failed part way through.
        let total = match copied {
            0 => state.copied.load(Ordering::Acquire),
            _ => state.copied.fetch_add(copied, Ordering::AcqRel) + copied,
        };

        result?;

        debug_assert!(total <= len);
        Ok(total == len)
    }

    // Attempt to advance the current generation past a fully copied generation.
    //
    // Returns `true` if the current generation was advanced.
    pub(super) fn try_promote(&self, gen: Generation, guard: &impl seize::Guard) -> bool {
        let next = gen.successor();

        // Only the current generation can be promoted, a nested copy may not hold
        // every key until its predecessor has finished.
        if self
            .table
            .compare_exchange(gen.raw, next.raw, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        debug!(from = gen.len(), to = next.len(), "advanced current generation");

        // Drop the chain's reference to the retired generation.
        self.release(gen, guard);
        true
    }
}
