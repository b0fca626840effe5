#![doc = include_str!("../README.md")]

mod alloc;
mod error;
mod key;
mod map;
mod raw;

pub use alloc::{Global, RawAlloc};
pub use error::Error;
pub use key::{KeyType, Scalar};
pub use map::{Expected, HashMap, HashMapBuilder, HashMapRef, Interned, Iter, ResizeEvent, Stats};
pub use raw::{is_valid_value, BUCKET_SLOTS, COPY_CHUNK, MAX_SCALE, MAX_VALUE, MIN_SCALE};
pub use seize::{Collector, Guard, LocalGuard, OwnedGuard};
