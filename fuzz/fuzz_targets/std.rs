#![no_main]

use libfuzzer_sys::fuzz_target;

use arbitrary::Arbitrary;
use nbmap::{Expected, HashMap as NbHashMap};
use std::collections::HashMap as StdHashMap;

#[derive(Debug, Arbitrary)]
enum Expect {
    DontCare,
    MustExist,
    MustNotExist,
    Value(u8),
}

#[derive(Debug, Arbitrary)]
enum Operation {
    Insert(u8, u8),
    TryInsert(u8, u8),
    Remove(u8),
    Get(u8),
    Contains(u8),
    Len,
    IsEmpty,
    CompareAndSwap(u8, Expect, u8),
    CompareAndRemove(u8, Expect),
    Intern(u8, u8),
    Iter,
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    scale: u8,
    copy_chunk: u8,
    operations: Vec<Operation>,
}

// Keys and values must avoid the reserved zero word.
fn word(x: u8) -> u64 {
    x as u64 + 1
}

fn expected(expect: Expect) -> Expected {
    match expect {
        Expect::DontCare => Expected::DontCare,
        Expect::MustExist => Expected::MustExist,
        Expect::MustNotExist => Expected::MustNotExist,
        Expect::Value(v) => Expected::Value(word(v)),
    }
}

fn fuzz_hashmap(input: FuzzInput) {
    let mut std_map = StdHashMap::new();
    let nb_raw = NbHashMap::builder()
        .scale(u32::from(input.scale % 8))
        .copy_chunk(usize::from(input.copy_chunk).max(1))
        .build()
        .unwrap();
    let nb_map = nb_raw.pin();

    for op in input.operations {
        match op {
            Operation::Insert(k, v) => {
                let (k, v) = (word(k), word(v));
                assert_eq!(std_map.insert(k, v), nb_map.insert(k, v).unwrap());
            }
            Operation::TryInsert(k, v) => {
                let (k, v) = (word(k), word(v));
                let current = std_map.get(&k).copied();
                if current.is_none() {
                    std_map.insert(k, v);
                }
                assert_eq!(current, nb_map.try_insert(k, v).unwrap());
            }
            Operation::Remove(k) => {
                let k = word(k);
                assert_eq!(std_map.remove(&k), nb_map.remove(k).unwrap());
            }
            Operation::Get(k) => {
                let k = word(k);
                assert_eq!(std_map.get(&k).copied(), nb_map.get(k));
            }
            Operation::Contains(k) => {
                let k = word(k);
                assert_eq!(std_map.contains_key(&k), nb_map.contains_key(k));
            }
            Operation::Len => {
                assert_eq!(std_map.len(), nb_map.len());
            }
            Operation::IsEmpty => {
                assert_eq!(std_map.is_empty(), nb_map.is_empty());
            }
            Operation::CompareAndSwap(k, expect, v) => {
                let (k, v, expect) = (word(k), word(v), expected(expect));
                let current = std_map.get(&k).copied();
                if expect.matches(current) {
                    std_map.insert(k, v);
                }
                assert_eq!(current, nb_map.compare_and_swap(k, expect, v).unwrap());
            }
            Operation::CompareAndRemove(k, expect) => {
                let (k, expect) = (word(k), expected(expect));
                let current = std_map.get(&k).copied();
                if expect.matches(current) {
                    std_map.remove(&k);
                }
                assert_eq!(current, nb_map.compare_and_remove(k, expect).unwrap());
            }
            Operation::Intern(k, v) => {
                let (k, v) = (word(k), word(v));
                let current = std_map.get(&k).copied();
                if current.is_none() {
                    std_map.insert(k, v);
                }

                let interned = nb_map.intern(k, v).unwrap();
                assert_eq!(interned.key, k);
                assert_eq!(interned.existing, current);
            }
            Operation::Iter => {
                let mut entries = nb_map.iter().unwrap().collect::<Vec<_>>();
                entries.sort_unstable();

                let mut expected = std_map.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>();
                expected.sort_unstable();

                assert_eq!(expected, entries);
            }
        }
    }

    // Final consistency checks
    for (&k, &v) in std_map.iter() {
        assert_eq!(Some(v), nb_map.get(k));
    }
    assert_eq!(std_map.len(), nb_map.len());
    assert_eq!(std_map.is_empty(), nb_map.is_empty());
}

fuzz_target!(|data: FuzzInput| {
    fuzz_hashmap(data);
});
