use nbmap::{Expected, HashMap};
use rand::prelude::*;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

mod common;
use common::{init_tracing, threads, with_map};

#[test]
fn resize_from_tiny_table() {
    const ENTRIES: u64 = 256;
    const THREADS: u64 = 8;

    init_tracing();

    for _ in 0..if cfg!(miri) { 1 } else { 32 } {
        let resizes = Arc::new(AtomicUsize::new(0));

        let map = HashMap::builder()
            .scale(2)
            .on_resize({
                let resizes = resizes.clone();
                move |_| {
                    resizes.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build()
            .unwrap();

        let barrier = Barrier::new(THREADS as usize);
        thread::scope(|s| {
            for t in 0..THREADS {
                let map = &map;
                let barrier = &barrier;

                s.spawn(move || {
                    barrier.wait();
                    let map = map.pin();
                    for i in (t..ENTRIES).step_by(THREADS as usize) {
                        map.compare_and_swap(i + 1, Expected::DontCare, (i + 1) * 10)
                            .unwrap();
                    }
                });
            }
        });

        let map = map.pin();
        for i in 1..=ENTRIES {
            assert_eq!(map.get(i), Some(i * 10));
        }

        assert_eq!(map.len(), ENTRIES as usize);
        assert!(resizes.load(Ordering::Relaxed) >= 3);

        let mut seen = HashSet::new();
        for (key, value) in map.iter().unwrap() {
            assert_eq!(value, key * 10);
            assert!(seen.insert(key), "duplicate key {key}");
        }
        assert_eq!(seen.len(), ENTRIES as usize);
    }
}

#[test]
fn insert_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 32 };
    const ENTRIES: usize = if cfg!(miri) { 64 } else { 1 << 12 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let map = map();
            let threads = threads();
            let barrier = Barrier::new(threads);

            let inserted = thread::scope(|s| {
                let handles = (0..threads)
                    .map(|t| {
                        let map = &map;
                        let barrier = &barrier;

                        s.spawn(move || {
                            let mut rng = rand::thread_rng();
                            let keys = (0..ENTRIES)
                                .map(|_| rng.gen_range(1..u64::MAX))
                                .collect::<Vec<_>>();

                            barrier.wait();
                            let guard = map.guard();
                            for &key in &keys {
                                map.insert(key, t as u64 + 1, &(), &guard).unwrap();
                            }

                            keys
                        })
                    })
                    .collect::<Vec<_>>();

                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap())
                    .collect::<Vec<_>>()
            });

            let guard = map.guard();
            let mut unique = HashSet::new();
            for keys in &inserted {
                for &key in keys {
                    assert!(map.contains_key(key, &(), &guard));
                    unique.insert(key);
                }
            }

            assert_eq!(map.len(), unique.len());
        }
    });
}

#[test]
fn contains_key_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 64 };
    const ENTRIES: u64 = if cfg!(miri) { 64 } else { 1 << 10 };
    const ROUNDS: u64 = if cfg!(miri) { 1 } else { 16 };

    with_map(|map| {
        let map = map();

        {
            let guard = map.guard();
            for key in 1..=ENTRIES {
                map.insert(key, key, &(), &guard).unwrap();
            }
        }

        for _ in 0..ITERATIONS {
            let threads = threads();
            let barrier = Barrier::new(threads);
            thread::scope(|s| {
                for _ in 0..threads {
                    s.spawn(|| {
                        barrier.wait();
                        let guard = map.guard();
                        for i in 0..ENTRIES * ROUNDS {
                            let key = i % ENTRIES + 1;
                            assert!(map.contains_key(key, &(), &guard));
                        }
                    });
                }
            });
        }
    });
}

#[test]
fn update_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 16 };
    const ENTRIES: u64 = if cfg!(miri) { 64 } else { 1 << 12 };

    with_map(|map| {
        let map = map();

        {
            let guard = map.guard();
            for key in 1..=ENTRIES {
                map.insert(key, 1, &(), &guard).unwrap();
            }
        }

        for t in 0..ITERATIONS {
            let threads = threads();
            let barrier = Barrier::new(threads);

            thread::scope(|s| {
                for _ in 0..threads {
                    s.spawn(|| {
                        barrier.wait();
                        let guard = map.guard();
                        for key in 1..=ENTRIES {
                            // Increment the counter with a compare-and-swap loop.
                            loop {
                                let current = map.get(key, &(), &guard).unwrap();
                                let expected = Expected::Value(current);
                                let previous = map
                                    .compare_and_swap(key, expected, current + 1, &(), &guard)
                                    .unwrap();

                                if expected.matches(previous) {
                                    break;
                                }
                            }
                        }
                    });
                }
            });

            let guard = map.guard();
            let expected = (threads * (t + 1)) as u64 + 1;
            for key in 1..=ENTRIES {
                assert_eq!(map.get(key, &(), &guard), Some(expected));
            }
        }
    });
}

#[test]
fn try_insert_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 32 };
    const ENTRIES: u64 = if cfg!(miri) { 64 } else { 1 << 10 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let map = map();
            let threads = threads();
            let barrier = Barrier::new(threads);
            let wins = AtomicUsize::new(0);

            thread::scope(|s| {
                for t in 0..threads {
                    let (map, barrier, wins) = (&map, &barrier, &wins);

                    s.spawn(move || {
                        barrier.wait();
                        let map = map.pin();
                        for key in 1..=ENTRIES {
                            if map.try_insert(key, t as u64 + 1).unwrap().is_none() {
                                wins.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    });
                }
            });

            // Exactly one thread inserted each key.
            assert_eq!(wins.load(Ordering::Relaxed), ENTRIES as usize);
            assert_eq!(map.len(), ENTRIES as usize);
        }
    });
}

#[test]
fn remove_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 32 };
    const ENTRIES: u64 = if cfg!(miri) { 64 } else { 1 << 12 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let map = map();

            {
                let map = map.pin();
                for key in 1..=ENTRIES {
                    map.insert(key, key).unwrap();
                }
            }

            let threads = threads();
            let barrier = Barrier::new(threads);
            let removed = AtomicUsize::new(0);

            thread::scope(|s| {
                for _ in 0..threads {
                    let (map, barrier, removed) = (&map, &barrier, &removed);

                    s.spawn(move || {
                        let mut keys = (1..=ENTRIES).collect::<Vec<_>>();
                        keys.shuffle(&mut rand::thread_rng());

                        barrier.wait();
                        let map = map.pin();
                        for key in keys {
                            if let Some(value) = map.remove(key).unwrap() {
                                assert_eq!(value, key);
                                removed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    });
                }
            });

            // Every key was removed exactly once.
            assert_eq!(removed.load(Ordering::Relaxed), ENTRIES as usize);
            assert!(map.is_empty());

            let map = map.pin();
            assert_eq!(map.iter().unwrap().count(), 0);
        }
    });
}

#[test]
fn mixed_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 16 };
    const ENTRIES: u64 = if cfg!(miri) { 64 } else { 1 << 10 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let map = map();
            let threads = threads() as u64;
            let barrier = Barrier::new(threads as usize);

            // Each thread owns a disjoint range of keys, and cycles them through
            // insertions and deletions while the other threads force resizes.
            thread::scope(|s| {
                for t in 0..threads {
                    let (map, barrier) = (&map, &barrier);

                    s.spawn(move || {
                        let keys = (t * ENTRIES + 1)..=((t + 1) * ENTRIES);

                        barrier.wait();
                        let map = map.pin();
                        for round in 1..=4 {
                            for key in keys.clone() {
                                assert_eq!(map.insert(key, round).unwrap(), None);
                            }

                            for key in keys.clone() {
                                assert_eq!(map.get(key), Some(round));
                            }

                            for key in keys.clone().step_by(2) {
                                assert_eq!(map.remove(key).unwrap(), Some(round));
                            }

                            for key in keys.clone().skip(1).step_by(2) {
                                assert_eq!(map.remove(key).unwrap(), Some(round));
                            }
                        }

                        for key in keys {
                            assert_eq!(map.insert(key, key).unwrap(), None);
                        }
                    });
                }
            });

            let map = map.pin();
            let mut entries = map.iter().unwrap().collect::<Vec<_>>();
            entries.sort_unstable();

            let expected = (1..=threads * ENTRIES).map(|key| (key, key)).collect::<Vec<_>>();
            assert_eq!(entries, expected);
            assert_eq!(map.len(), expected.len());
        }
    });
}

#[test]
fn iter_during_resize() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 32 };
    const STABLE: u64 = if cfg!(miri) { 64 } else { 1 << 10 };
    const EXTRA: u64 = if cfg!(miri) { 64 } else { 1 << 13 };

    with_map(|map| {
        for _ in 0..ITERATIONS {
            let map = map();

            {
                let map = map.pin();
                for key in 1..=STABLE {
                    map.insert(key, key).unwrap();
                }
            }

            let threads = threads().max(2);
            let barrier = Barrier::new(threads);

            thread::scope(|s| {
                // Writers grow the table while the stable keys are iterated.
                for t in 1..threads {
                    let (map, barrier) = (&map, &barrier);

                    s.spawn(move || {
                        barrier.wait();
                        let map = map.pin();
                        for i in (t as u64..EXTRA).step_by(threads - 1) {
                            map.insert(STABLE + i + 1, i + 1).unwrap();
                        }
                    });
                }

                // Every stable key is observed exactly once.
                s.spawn(|| {
                    barrier.wait();
                    let guard = map.guard();

                    for _ in 0..8 {
                        let mut seen = HashSet::new();
                        for (key, value) in map.iter(&(), &guard).unwrap() {
                            assert!(seen.insert(key), "duplicate key {key}");

                            if key <= STABLE {
                                assert_eq!(value, key);
                            }
                        }

                        assert!((1..=STABLE).all(|key| seen.contains(&key)));
                    }
                });
            });
        }
    });
}

#[test]
fn owned_guard_stress() {
    const ENTRIES: u64 = if cfg!(miri) { 64 } else { 1 << 12 };

    with_map(|map| {
        let map = map();
        let threads = threads();
        let guard = map.owned_guard();

        thread::scope(|s| {
            for t in 0..threads as u64 {
                let (map, guard) = (&map, &guard);

                s.spawn(move || {
                    for key in (t * ENTRIES + 1)..=((t + 1) * ENTRIES) {
                        map.insert(key, key, &(), guard).unwrap();
                        assert_eq!(map.get(key, &(), guard), Some(key));
                    }
                });
            }
        });

        assert_eq!(map.len(), threads * ENTRIES as usize);
    });
}
