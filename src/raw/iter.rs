use std::sync::atomic::Ordering;

use super::generation::Generation;
use super::slot::{Value, NO_KEY};
use super::HashMap;
use crate::alloc::RawAlloc;
use crate::key::KeyType;
use crate::Error;

// An iterator over the live entries of a map.
//
// The iterator holds a reference to a single generation, the newest one at the
// time iteration began, which keeps its slots from being reclaimed even if the
// map advances past it. Entries that were relocated in the meantime are resolved
// through the successor chain, so every key is yielded once with its latest value.
pub struct Iter<'g, K: KeyType, A: RawAlloc, G: seize::Guard> {
    i: usize,
    gen: Generation,
    map: &'g HashMap<K, A>,
    ctx: &'g K::Context,
    guard: &'g G,
}

impl<'g, K: KeyType, A: RawAlloc, G: seize::Guard> Iter<'g, K, A, G> {
    // Begin iteration at the newest generation, finishing any in-progress copies.
    pub(super) fn new(
        map: &'g HashMap<K, A>,
        ctx: &'g K::Context,
        guard: &'g G,
    ) -> Result<Iter<'g, K, A, G>, Error> {
        loop {
            let mut gen = map.root(guard);

            while let Some(next) = gen.next() {
                while !map.help_copy(gen, ctx)? {}

                // Advance the current generation if this was it.
                map.try_promote(gen, guard);
                gen = next;
            }

            // The generation was retired while we were copying, start over from
            // the current generation.
            if gen.acquire() {
                return Ok(Iter {
                    i: 0,
                    gen,
                    map,
                    ctx,
                    guard,
                });
            }
        }
    }
}

impl<K: KeyType, A: RawAlloc, G: seize::Guard> Iterator for Iter<'_, K, A, G> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        while self.i < self.gen.len() {
            // Safety: We verified that `self.i` is in-bounds above.
            let slot = unsafe { self.gen.slot(self.i) };
            self.i += 1;

            let key = slot.key.load(Ordering::Acquire);
            if key == NO_KEY {
                continue;
            }

            match Value::decode(slot.value.load(Ordering::Acquire)) {
                Value::Present(value) => return Some((key, value)),

                // Deleted, or sealed before the key was written.
                Value::Empty | Value::Tombstone | Value::RelocatedTombstone => continue,

                // The entry moved after iteration began, read its latest value.
                Value::Migrating(_) | Value::Relocated => {
                    let hash = self.map.hash(key, self.ctx);

                    if let Some(value) = self.map.resolve(self.gen, key, hash, self.ctx) {
                        return Some((key, value));
                    }
                }
            }
        }

        None
    }
}

// Safety: The iterator yields plain words and otherwise only holds shared
// references. The generation pointer is kept alive by the iterator's reference,
// and it is released through the guard on drop, so the guard must be `Sync`.
unsafe impl<K, A, G> Send for Iter<'_, K, A, G>
where
    K: KeyType,
    K::Context: Sync,
    A: RawAlloc,
    G: seize::Guard + Sync,
{
}

unsafe impl<K, A, G> Sync for Iter<'_, K, A, G>
where
    K: KeyType,
    K::Context: Sync,
    A: RawAlloc,
    G: seize::Guard + Sync,
{
}

impl<K: KeyType, A: RawAlloc, G: seize::Guard> Drop for Iter<'_, K, A, G> {
    fn drop(&mut self) {
        self.map.release(self.gen, self.guard);
    }
}
