//! Key capabilities.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

/// Describes how the map hashes, compares and owns its keys.
///
/// Keys are opaque 64-bit handles. A key type may interpret them as plain
/// integers (see [`Scalar`]) or as references to external storage such as interned
/// strings or state vectors, in which case the map takes ownership of one handle
/// per stored key through [`clone_key`](KeyType::clone_key) and gives it back
/// through [`free`](KeyType::free).
///
/// Every operation threads a caller-provided [`Context`](KeyType::Context) into
/// these methods, so key types never need global state.
///
/// The handle `0` is reserved and must never be used as a key.
pub trait KeyType: Send + Sync {
    /// State passed through hashing, comparison and cloning.
    type Context: ?Sized;

    /// Hash a key.
    ///
    /// The low bits select the home bucket and the high bits the probe stride,
    /// so the hash should be well distributed across all 64 bits.
    fn hash(&self, key: u64, ctx: &Self::Context) -> u64;

    /// Returns `true` if the stored key `stored` is equal to `key`.
    ///
    /// Handles are compared by value before this method is called, so it only
    /// needs to handle distinct handles referring to equal keys.
    #[inline]
    fn equals(&self, stored: u64, key: u64, ctx: &Self::Context) -> bool {
        let _ = ctx;
        stored == key
    }

    /// Create the handle the map will own for a newly inserted key.
    ///
    /// The returned handle must be non-zero and equal to `key`.
    #[inline]
    fn clone_key(&self, key: u64, ctx: &Self::Context) -> u64 {
        let _ = ctx;
        key
    }

    /// Release a handle previously returned by `clone_key`.
    #[inline]
    fn free(&self, key: u64) {
        let _ = key;
    }
}

/// Plain integer keys.
///
/// Keys are hashed with a [`BuildHasher`], compared by value and never cloned
/// or freed.
#[derive(Clone, Debug, Default)]
pub struct Scalar<S = RandomState> {
    build_hasher: S,
}

impl Scalar {
    /// Create a scalar key type with a randomly seeded hasher.
    pub fn new() -> Scalar {
        Scalar::default()
    }
}

impl<S> Scalar<S> {
    /// Create a scalar key type with the given hasher.
    pub fn with_hasher(build_hasher: S) -> Scalar<S> {
        Scalar { build_hasher }
    }
}

impl<S> KeyType for Scalar<S>
where
    S: BuildHasher + Send + Sync,
{
    type Context = ();

    #[inline]
    fn hash(&self, key: u64, _: &()) -> u64 {
        self.build_hasher.hash_one(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::BuildHasherDefault;

    #[test]
    fn scalar_defaults() {
        let scalar = Scalar::with_hasher(BuildHasherDefault::<DefaultHasher>::default());

        assert_eq!(scalar.hash(42, &()), scalar.hash(42, &()));
        assert_ne!(scalar.hash(42, &()), scalar.hash(43, &()));
        assert!(scalar.equals(42, 42, &()));
        assert!(!scalar.equals(42, 43, &()));
        assert_eq!(scalar.clone_key(42, &()), 42);
    }
}
