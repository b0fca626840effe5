use std::fmt;

use seize::{Collector, Guard, LocalGuard, OwnedGuard};

use crate::alloc::{Global, RawAlloc};
use crate::key::{KeyType, Scalar};
use crate::raw::{self, ResizeHook, COPY_CHUNK};
use crate::Error;

/// A lock-free concurrent hash map from 64-bit keys to 64-bit values.
///
/// The table grows by chaining a larger generation behind the current one and
/// migrating entries cooperatively: every writer that notices an in-progress
/// resize relocates a small chunk of slots before doing its own work. There is no
/// stop-the-world phase and no locks.
///
/// Most operations require a [`Guard`], which can be acquired through
/// [`HashMap::guard`] or using the [`HashMap::pin`] API. Key types that need
/// caller state for hashing and comparison take it as an explicit context, see
/// [`KeyType`].
///
/// Keys must not be `0`, and values must satisfy [`is_valid_value`](crate::is_valid_value).
/// Passing a reserved key or value panics.
pub struct HashMap<K: KeyType = Scalar, A: RawAlloc = Global> {
    raw: raw::HashMap<K, A>,
}

/// A builder for a [`HashMap`].
///
/// # Examples
///
/// ```rust
/// use nbmap::{HashMap, Scalar};
/// use std::collections::hash_map::RandomState;
///
/// let map: HashMap = HashMap::builder()
///     // Start with 2^12 slots.
///     .scale(12)
///     // Hash keys with a custom hasher.
///     .key_type(Scalar::with_hasher(RandomState::new()))
///     // Observe resizes.
///     .on_resize(|event| println!("resized to 2^{}", event.to_scale))
///     .build()
///     .unwrap();
/// ```
pub struct HashMapBuilder<K = Scalar, A = Global> {
    scale: u32,
    key_type: K,
    alloc: A,
    collector: Collector,
    copy_chunk: usize,
    on_resize: Option<ResizeHook>,
}

impl HashMapBuilder {
    fn new() -> HashMapBuilder {
        HashMapBuilder {
            scale: 10,
            key_type: Scalar::new(),
            alloc: Global,
            collector: Collector::new(),
            copy_chunk: COPY_CHUNK,
            on_resize: None,
        }
    }
}

impl<K, A> HashMapBuilder<K, A> {
    /// Set the initial capacity of the map to `2^scale` slots.
    ///
    /// Scales below [`MIN_SCALE`](crate::MIN_SCALE) are rounded up. Scales above
    /// [`MAX_SCALE`](crate::MAX_SCALE) are rejected by [`build`](Self::build).
    pub fn scale(self, scale: u32) -> Self {
        HashMapBuilder { scale, ..self }
    }

    /// Set the key capabilities used to hash, compare and own keys.
    pub fn key_type<K2: KeyType>(self, key_type: K2) -> HashMapBuilder<K2, A> {
        HashMapBuilder {
            key_type,
            scale: self.scale,
            alloc: self.alloc,
            collector: self.collector,
            copy_chunk: self.copy_chunk,
            on_resize: self.on_resize,
        }
    }

    /// Set the allocator used for table storage.
    pub fn allocator<A2: RawAlloc>(self, alloc: A2) -> HashMapBuilder<K, A2> {
        HashMapBuilder {
            alloc,
            scale: self.scale,
            key_type: self.key_type,
            collector: self.collector,
            copy_chunk: self.copy_chunk,
            on_resize: self.on_resize,
        }
    }

    /// Set the [`seize::Collector`] used for memory reclamation.
    ///
    /// This method may be useful when you want more control over memory reclamation.
    /// See [`seize::Collector`] for details.
    pub fn collector(self, collector: Collector) -> Self {
        HashMapBuilder { collector, ..self }
    }

    /// Set the number of slots each operation relocates while a resize is in progress.
    ///
    /// Larger chunks finish a resize with fewer operations at the cost of higher
    /// latency for the operations that do the copying.
    pub fn copy_chunk(self, copy_chunk: usize) -> Self {
        HashMapBuilder { copy_chunk, ..self }
    }

    /// Register a callback that runs whenever a thread installs a new generation.
    ///
    /// The callback runs on the thread that won the race to resize, while that
    /// thread is in the middle of a map operation. It must not access the map.
    pub fn on_resize<F>(self, on_resize: F) -> Self
    where
        F: Fn(ResizeEvent) + Send + Sync + 'static,
    {
        HashMapBuilder {
            on_resize: Some(Box::new(on_resize)),
            ..self
        }
    }

    /// Construct a [`HashMap`] from the builder, using the configured options.
    pub fn build(self) -> Result<HashMap<K, A>, Error>
    where
        K: KeyType,
        A: RawAlloc,
    {
        let raw = raw::HashMap::new(
            self.scale,
            self.key_type,
            self.alloc,
            self.collector,
            self.copy_chunk,
            self.on_resize,
        )?;

        Ok(HashMap { raw })
    }
}

impl<K, A> fmt::Debug for HashMapBuilder<K, A>
where
    K: fmt::Debug,
    A: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashMapBuilder")
            .field("scale", &self.scale)
            .field("key_type", &self.key_type)
            .field("alloc", &self.alloc)
            .field("collector", &self.collector)
            .field("copy_chunk", &self.copy_chunk)
            .field("on_resize", &self.on_resize.is_some())
            .finish()
    }
}

/// The expected current value of a compare-and-swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expected {
    /// Swap regardless of the current value.
    DontCare,

    /// Swap only if the key is present.
    MustExist,

    /// Swap only if the key is absent.
    MustNotExist,

    /// Swap only if the key is mapped to this value.
    Value(u64),
}

impl Expected {
    /// Returns `true` if `current` satisfies this expectation.
    ///
    /// A compare-and-swap took effect if and only if the previous value it returns
    /// satisfies its expectation.
    #[inline]
    pub fn matches(self, current: Option<u64>) -> bool {
        match self {
            Expected::DontCare => true,
            Expected::MustExist => current.is_some(),
            Expected::MustNotExist => current.is_none(),
            Expected::Value(value) => current == Some(value),
        }
    }
}

/// The result of [`HashMap::intern`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interned {
    /// The key handle owned by the map.
    ///
    /// This is the handle returned by [`KeyType::clone_key`] when the key was
    /// first inserted. It stays valid for as long as the key is in the map.
    pub key: u64,

    /// The value the key was already mapped to, or `None` if it was inserted.
    pub existing: Option<u64>,
}

/// Information about a resize, passed to the [`on_resize`](HashMapBuilder::on_resize) hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeEvent {
    /// The scale of the generation that ran out of room.
    pub from_scale: u32,

    /// The scale of the new generation.
    pub to_scale: u32,

    /// The number of keys installed in the full generation.
    pub keys: usize,
}

/// A snapshot of a map's internal shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stats {
    /// The approximate number of live keys.
    pub len: usize,

    /// The number of slots in the current generation.
    pub capacity: usize,

    /// The number of generations reachable from the current one, including itself.
    pub generations: usize,

    /// The number of generations installed since the map was created.
    pub resizes: usize,

    /// The number of buckets a lookup probes in the current generation.
    pub probe_limit: usize,

    /// The percentage of slots in the current generation with an installed key.
    pub key_density: f64,

    /// The number of bytes held by the current generation and its successors.
    pub memory: usize,
}

impl HashMap {
    /// Returns a builder for a `HashMap`.
    ///
    /// The builder can be used for more complex configuration, such as key types
    /// with owned handles or a custom allocator.
    pub fn builder() -> HashMapBuilder {
        HashMapBuilder::new()
    }

    /// Creates an empty `HashMap` with `2^scale` slots.
    ///
    /// # Examples
    ///
    /// ```
    /// use nbmap::HashMap;
    /// let map = HashMap::with_scale(4).unwrap();
    /// assert_eq!(map.capacity(), 16);
    /// ```
    pub fn with_scale(scale: u32) -> Result<HashMap, Error> {
        HashMap::builder().scale(scale).build()
    }
}

impl<K: KeyType, A: RawAlloc> HashMap<K, A> {
    /// Returns a pinned reference to the map.
    ///
    /// The returned reference manages a guard internally, preventing garbage collection
    /// for as long as it is held. See the [crate-level documentation](crate) for details.
    #[inline]
    pub fn pin(&self) -> HashMapRef<'_, K, A, LocalGuard<'_>>
    where
        K: KeyType<Context = ()>,
    {
        HashMapRef {
            guard: self.raw.guard(),
            ctx: &(),
            map: self,
        }
    }

    /// Returns a pinned reference to the map that threads `ctx` through every
    /// key operation.
    #[inline]
    pub fn pin_with<'map>(
        &'map self,
        ctx: &'map K::Context,
    ) -> HashMapRef<'map, K, A, LocalGuard<'map>> {
        HashMapRef {
            guard: self.raw.guard(),
            ctx,
            map: self,
        }
    }

    /// Returns a pinned reference to the map that can be sent across threads.
    #[inline]
    pub fn pin_owned_with<'map>(
        &'map self,
        ctx: &'map K::Context,
    ) -> HashMapRef<'map, K, A, OwnedGuard<'map>> {
        HashMapRef {
            guard: self.raw.owned_guard(),
            ctx,
            map: self,
        }
    }

    /// Returns a guard for use with this map.
    ///
    /// Note that holding on to a guard prevents garbage collection.
    /// See the [crate-level documentation](crate) for details.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.raw.guard()
    }

    /// Returns an owned guard for use with this map.
    ///
    /// Owned guards implement `Send` and `Sync`, allowing them to be shared across
    /// threads.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.raw.owned_guard()
    }

    /// Returns the key capabilities of this map.
    #[inline]
    pub fn key_type(&self) -> &K {
        self.raw.key_type()
    }

    /// Returns the number of entries in the map.
    ///
    /// The count is maintained by a sharded counter. It is exact when no writes
    /// are in flight and approximate otherwise.
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots in the current generation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.raw.capacity(&self.raw.guard())
    }

    /// Returns a snapshot of the map's internal shape.
    pub fn stats(&self) -> Stats {
        self.raw.stats(&self.raw.guard())
    }

    /// Returns the value corresponding to the key.
    #[inline]
    pub fn get(&self, key: u64, ctx: &K::Context, guard: &impl Guard) -> Option<u64> {
        self.raw.verify(guard);
        self.raw.get(key, ctx, guard)
    }

    /// Returns `true` if the map contains a value for the key.
    #[inline]
    pub fn contains_key(&self, key: u64, ctx: &K::Context, guard: &impl Guard) -> bool {
        self.get(key, ctx, guard).is_some()
    }

    /// Inserts a key-value pair into the map, returning the previous value.
    #[inline]
    pub fn insert(
        &self,
        key: u64,
        value: u64,
        ctx: &K::Context,
        guard: &impl Guard,
    ) -> Result<Option<u64>, Error> {
        self.compare_and_swap(key, Expected::DontCare, value, ctx, guard)
    }

    /// Inserts a key-value pair if the key is absent.
    ///
    /// Returns the current value if the key was present, in which case the map
    /// was not modified.
    #[inline]
    pub fn try_insert(
        &self,
        key: u64,
        value: u64,
        ctx: &K::Context,
        guard: &impl Guard,
    ) -> Result<Option<u64>, Error> {
        self.compare_and_swap(key, Expected::MustNotExist, value, ctx, guard)
    }

    /// Inserts a key-value pair if the key is absent, returning the key handle
    /// owned by the map.
    ///
    /// Equal keys always resolve to the same handle while they are present, which
    /// makes the map usable as an interning table for owned key types.
    pub fn intern(
        &self,
        key: u64,
        value: u64,
        ctx: &K::Context,
        guard: &impl Guard,
    ) -> Result<Interned, Error> {
        self.raw.verify(guard);

        let swap = self
            .raw
            .compare_and_swap(key, Expected::MustNotExist, Some(value), ctx, guard)?;

        Ok(Interned {
            key: swap.key,
            existing: swap.previous,
        })
    }

    /// Replaces the value of a key if its current value satisfies `expected`.
    ///
    /// Returns the value before the operation. The swap took effect if and only
    /// if the returned value satisfies `expected`, see [`Expected::matches`].
    #[inline]
    pub fn compare_and_swap(
        &self,
        key: u64,
        expected: Expected,
        new: u64,
        ctx: &K::Context,
        guard: &impl Guard,
    ) -> Result<Option<u64>, Error> {
        self.raw.verify(guard);
        self.raw
            .compare_and_swap(key, expected, Some(new), ctx, guard)
            .map(|swap| swap.previous)
    }

    /// Removes a key if its current value satisfies `expected`.
    ///
    /// Returns the value before the operation.
    #[inline]
    pub fn compare_and_remove(
        &self,
        key: u64,
        expected: Expected,
        ctx: &K::Context,
        guard: &impl Guard,
    ) -> Result<Option<u64>, Error> {
        self.raw.verify(guard);
        self.raw
            .compare_and_swap(key, expected, None, ctx, guard)
            .map(|swap| swap.previous)
    }

    /// Removes a key from the map, returning the value if the key was present.
    #[inline]
    pub fn remove(
        &self,
        key: u64,
        ctx: &K::Context,
        guard: &impl Guard,
    ) -> Result<Option<u64>, Error> {
        self.compare_and_remove(key, Expected::DontCare, ctx, guard)
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    ///
    /// Beginning iteration completes any in-progress resize. Entries inserted or
    /// removed during iteration may or may not be observed, but every key present
    /// for the whole iteration is yielded exactly once, with its latest value.
    #[inline]
    pub fn iter<'g, G: Guard>(
        &'g self,
        ctx: &'g K::Context,
        guard: &'g G,
    ) -> Result<Iter<'g, K, A, G>, Error> {
        self.raw.verify(guard);
        Ok(Iter {
            raw: self.raw.iter(ctx, guard)?,
        })
    }
}

impl<K, A> fmt::Debug for HashMap<K, A>
where
    K: KeyType<Context = ()>,
    A: RawAlloc,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.guard();

        let result = match self.iter(&(), &guard) {
            Ok(iter) => f.debug_map().entries(iter).finish(),
            Err(err) => f.debug_struct("HashMap").field("error", &err).finish(),
        };
        result
    }
}

/// A pinned reference to a [`HashMap`].
///
/// This type is created with [`HashMap::pin`] and can be used to easily access a [`HashMap`]
/// without explicitly managing a guard or key context. See the [crate-level documentation](crate)
/// for details.
pub struct HashMapRef<'map, K: KeyType, A: RawAlloc, G> {
    guard: G,
    ctx: &'map K::Context,
    map: &'map HashMap<K, A>,
}

impl<'map, K, A, G> HashMapRef<'map, K, A, G>
where
    K: KeyType,
    A: RawAlloc,
    G: Guard,
{
    /// Returns a reference to the inner [`HashMap`].
    #[inline]
    pub fn map(&self) -> &'map HashMap<K, A> {
        self.map
    }

    /// Returns the number of entries in the map.
    ///
    /// See [`HashMap::len`] for details.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.raw.len()
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    ///
    /// See [`HashMap::is_empty`] for details.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots in the current generation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.map.raw.capacity(&self.guard)
    }

    /// Returns a snapshot of the map's internal shape.
    #[inline]
    pub fn stats(&self) -> Stats {
        self.map.raw.stats(&self.guard)
    }

    /// Returns the value corresponding to the key.
    ///
    /// See [`HashMap::get`] for details.
    #[inline]
    pub fn get(&self, key: u64) -> Option<u64> {
        self.map.raw.get(key, self.ctx, &self.guard)
    }

    /// Returns `true` if the map contains a value for the key.
    ///
    /// See [`HashMap::contains_key`] for details.
    #[inline]
    pub fn contains_key(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a key-value pair into the map, returning the previous value.
    ///
    /// See [`HashMap::insert`] for details.
    #[inline]
    pub fn insert(&self, key: u64, value: u64) -> Result<Option<u64>, Error> {
        self.compare_and_swap(key, Expected::DontCare, value)
    }

    /// Inserts a key-value pair if the key is absent.
    ///
    /// See [`HashMap::try_insert`] for details.
    #[inline]
    pub fn try_insert(&self, key: u64, value: u64) -> Result<Option<u64>, Error> {
        self.compare_and_swap(key, Expected::MustNotExist, value)
    }

    /// Inserts a key-value pair if the key is absent, returning the key handle
    /// owned by the map.
    ///
    /// See [`HashMap::intern`] for details.
    #[inline]
    pub fn intern(&self, key: u64, value: u64) -> Result<Interned, Error> {
        self.map.intern(key, value, self.ctx, &self.guard)
    }

    /// Replaces the value of a key if its current value satisfies `expected`.
    ///
    /// See [`HashMap::compare_and_swap`] for details.
    #[inline]
    pub fn compare_and_swap(
        &self,
        key: u64,
        expected: Expected,
        new: u64,
    ) -> Result<Option<u64>, Error> {
        self.map
            .compare_and_swap(key, expected, new, self.ctx, &self.guard)
    }

    /// Removes a key if its current value satisfies `expected`.
    ///
    /// See [`HashMap::compare_and_remove`] for details.
    #[inline]
    pub fn compare_and_remove(&self, key: u64, expected: Expected) -> Result<Option<u64>, Error> {
        self.map
            .compare_and_remove(key, expected, self.ctx, &self.guard)
    }

    /// Removes a key from the map, returning the value if the key was present.
    ///
    /// See [`HashMap::remove`] for details.
    #[inline]
    pub fn remove(&self, key: u64) -> Result<Option<u64>, Error> {
        self.compare_and_remove(key, Expected::DontCare)
    }

    /// An iterator visiting all key-value pairs in arbitrary order.
    ///
    /// See [`HashMap::iter`] for details.
    #[inline]
    pub fn iter(&self) -> Result<Iter<'_, K, A, G>, Error> {
        Ok(Iter {
            raw: self.map.raw.iter(self.ctx, &self.guard)?,
        })
    }
}

impl<K, A, G> fmt::Debug for HashMapRef<'_, K, A, G>
where
    K: KeyType,
    A: RawAlloc,
    G: Guard,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.iter() {
            Ok(iter) => f.debug_map().entries(iter).finish(),
            Err(err) => f.debug_struct("HashMapRef").field("error", &err).finish(),
        }
    }
}

/// An iterator over a map's entries.
///
/// This struct is created by the [`iter`](HashMap::iter) method on [`HashMap`]. See its documentation for details.
pub struct Iter<'g, K: KeyType, A: RawAlloc, G: Guard> {
    raw: raw::Iter<'g, K, A, G>,
}

impl<K, A, G> Iterator for Iter<'_, K, A, G>
where
    K: KeyType,
    A: RawAlloc,
    G: Guard,
{
    type Item = (u64, u64);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.raw.next()
    }
}
