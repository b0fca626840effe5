use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::OnceLock;

use super::CachePadded;

// A sharded count of live keys.
//
// Every successful insert or delete touches the count, so it is spread over one
// padded shard per CPU. Threads pick their shard by guard thread ID.
pub struct Counter {
    shards: Box<[CachePadded<AtomicIsize>]>,
    mask: usize,
}

impl Counter {
    pub fn new() -> Counter {
        // Querying the parallelism takes microseconds, only do it once.
        static SHARDS: OnceLock<usize> = OnceLock::new();

        let shards = *SHARDS.get_or_init(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
                .next_power_of_two()
        });

        Counter {
            shards: (0..shards).map(|_| CachePadded::default()).collect(),
            mask: shards - 1,
        }
    }

    // Add `delta` to the shard of the thread owning the guard.
    #[inline]
    pub fn add(&self, delta: isize, guard: &impl seize::Guard) {
        let shard = &self.shards[guard.thread_id() & self.mask];
        shard.value.fetch_add(delta, Ordering::Relaxed);
    }

    // Returns the total across all shards.
    //
    // Shards are read independently, so a delete may be observed before the insert
    // it removes. A negative total is reported as zero.
    pub fn sum(&self) -> usize {
        let total = self
            .shards
            .iter()
            .map(|shard| shard.value.load(Ordering::Relaxed))
            .sum::<isize>();

        usize::try_from(total).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum() {
        let collector = seize::Collector::new();
        let counter = Counter::new();

        {
            let guard = collector.enter();
            counter.add(3, &guard);
            counter.add(-1, &guard);
        }

        assert_eq!(counter.sum(), 2);

        std::thread::scope(|s| {
            s.spawn(|| {
                let guard = collector.enter();
                counter.add(-5, &guard);
            });
        });

        assert_eq!(counter.sum(), 0);
    }
}
