use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use allocator_api2::alloc::Allocator;
use allocator_api2::alloc::Global;

use crate::DefaultHashBuilder;
use crate::error::TryReserveError;
use crate::hash_table::Cursor;
use crate::hash_table::DEFAULT_MAX_LOAD;
use crate::hash_table::HashTable;
use crate::hash_table::Iter;
use crate::hash_table::Keys;
use crate::hash_table::Values;

/// A dictionary built on the group-probed [`HashTable`].
///
/// `Dict<K, V, S, A, MAX_LOAD>` maps keys implementing `Hash + Eq` to values.
/// Keys are hashed with the `S` hasher builder, storage comes from the `A`
/// allocator, and the table doubles whenever `len * 1024` would exceed
/// `capacity * MAX_LOAD` (50% by default). All four are fixed per type.
///
/// Entries cannot be removed one at a time; [`clear`](Dict::clear) empties
/// the whole dictionary and keeps its capacity.
///
/// `Dict` has no internal synchronization. Shared references may be read from
/// several threads at once when `K`, `V`, `S` and `A` are `Sync`; mutation
/// needs exclusive access, e.g. through a `Mutex`.
///
/// # Examples
///
/// ```rust
/// # #[cfg(any(feature = "std", feature = "foldhash"))]
/// # {
/// use group_dict::Dict;
///
/// let mut dict = Dict::new();
/// dict.set(1, "abc").unwrap();
/// dict.set(2, "xyz").unwrap();
/// dict.set(3, "ijk").unwrap();
///
/// assert_eq!(dict.get(&1), Some(&"abc"));
/// assert_eq!(dict.get(&2), Some(&"xyz"));
/// assert_eq!(dict.get(&3), Some(&"ijk"));
/// assert_eq!(dict.get(&4), None);
/// # }
/// ```
pub struct Dict<
    K,
    V,
    S = DefaultHashBuilder,
    A: Allocator = Global,
    const MAX_LOAD: usize = DEFAULT_MAX_LOAD,
> {
    table: HashTable<K, V, A, MAX_LOAD>,
    hash_builder: S,
}

impl<K, V, S, A, const MAX_LOAD: usize> Debug for Dict<K, V, S, A, MAX_LOAD>
where
    K: Debug,
    V: Debug,
    A: Allocator,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(any(feature = "std", feature = "foldhash"))]
impl<K, V> Dict<K, V> {
    /// Creates an empty dictionary with one group (16 slots) of capacity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::Dict;
    /// #
    /// let dict: Dict<u32, String> = Dict::new();
    /// assert!(dict.is_empty());
    /// assert_eq!(dict.capacity(), 16);
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates an empty dictionary with at least `capacity` slots.
    ///
    /// The slot count is rounded up to `16 * 2^n`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::Dict;
    /// #
    /// assert_eq!(Dict::<u32, u32>::with_capacity(0).capacity(), 16);
    /// assert_eq!(Dict::<u32, u32>::with_capacity(16).capacity(), 16);
    /// assert_eq!(Dict::<u32, u32>::with_capacity(17).capacity(), 32);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }

    /// Fallible version of [`with_capacity`](Dict::with_capacity).
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        Self::try_with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

#[cfg(any(feature = "std", feature = "foldhash"))]
impl<K, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S, const MAX_LOAD: usize> Dict<K, V, S, Global, MAX_LOAD> {
    /// Creates an empty dictionary which will use `hash_builder` to hash
    /// keys.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasherDefault;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use group_dict::Dict;
    /// #
    /// let mut dict: Dict<&str, u32, BuildHasherDefault<SipHasher>> =
    ///     Dict::with_hasher(BuildHasherDefault::default());
    /// dict.insert("one", 1);
    /// assert_eq!(dict.get(&"one"), Some(&1));
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty dictionary with at least `capacity` slots which will
    /// use `hash_builder` to hash keys.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::with_capacity_and_hasher_in(capacity, hash_builder, Global)
    }

    /// Fallible version of
    /// [`with_capacity_and_hasher`](Dict::with_capacity_and_hasher).
    pub fn try_with_capacity_and_hasher(
        capacity: usize,
        hash_builder: S,
    ) -> Result<Self, TryReserveError> {
        Self::try_with_capacity_and_hasher_in(capacity, hash_builder, Global)
    }
}

impl<K, V, S, A: Allocator, const MAX_LOAD: usize> Dict<K, V, S, A, MAX_LOAD> {
    /// Creates an empty dictionary with at least `capacity` slots, hashing
    /// with `hash_builder` and allocating from `alloc`.
    pub fn with_capacity_and_hasher_in(capacity: usize, hash_builder: S, alloc: A) -> Self {
        Self {
            table: HashTable::with_capacity_in(capacity, alloc),
            hash_builder,
        }
    }

    /// Creates an empty dictionary with at least `capacity` slots, hashing
    /// with `hash_builder` and allocating from `alloc`, reporting allocation
    /// failure instead of aborting.
    pub fn try_with_capacity_and_hasher_in(
        capacity: usize,
        hash_builder: S,
        alloc: A,
    ) -> Result<Self, TryReserveError> {
        Ok(Self {
            table: HashTable::try_with_capacity_in(capacity, alloc)?,
            hash_builder,
        })
    }

    /// Returns the number of entries in the dictionary.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the dictionary contains no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of slots, always `16 * 2^n` and at least 16.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns a reference to the dictionary's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns a reference to the dictionary's allocator.
    pub fn allocator(&self) -> &A {
        self.table.allocator()
    }

    /// Removes all entries, keeping the allocated capacity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::Dict;
    /// #
    /// let mut dict = Dict::new();
    /// for i in 0..100u32 {
    ///     dict.insert(i, i);
    /// }
    /// let capacity = dict.capacity();
    ///
    /// dict.clear();
    /// assert!(dict.is_empty());
    /// assert_eq!(dict.capacity(), capacity);
    /// assert_eq!(dict.next_key(None), None);
    /// ```
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Returns the first key after `prev` in storage order, together with its
    /// position. Pass `None` to start from the beginning; `None` is returned
    /// once every key has been produced.
    ///
    /// Positions are shared with [`next_value`](Dict::next_value), so walking
    /// both from `None` pairs every key with its value. A position must not be
    /// reused after an insert that may have grown the dictionary.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::Dict;
    /// #
    /// let mut dict = Dict::new();
    /// dict.insert("a", 1);
    /// dict.insert("b", 2);
    ///
    /// let mut keys = Vec::new();
    /// let mut prev = None;
    /// while let Some((at, key)) = dict.next_key(prev) {
    ///     keys.push(*key);
    ///     prev = Some(at);
    /// }
    /// keys.sort();
    /// assert_eq!(keys, ["a", "b"]);
    /// ```
    pub fn next_key(&self, prev: Option<Cursor>) -> Option<(Cursor, &K)> {
        let at = self.table.next_occupied(prev)?;
        Some((at, self.table.key_at(at)?))
    }

    /// Returns the first value after `prev` in storage order, together with
    /// its position. See [`next_key`](Dict::next_key).
    pub fn next_value(&self, prev: Option<Cursor>) -> Option<(Cursor, &V)> {
        let at = self.table.next_occupied(prev)?;
        Some((at, self.table.value_at(at)?))
    }

    /// Returns an iterator over all entries, in storage order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.table.iter()
    }

    /// Returns an iterator over all keys, in storage order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        self.table.keys()
    }

    /// Returns an iterator over all values, in storage order.
    ///
    /// Values come out in the same order as [`keys`](Dict::keys).
    pub fn values(&self) -> Values<'_, K, V> {
        self.table.values()
    }

    /// Returns a snapshot of the dictionary's occupancy.
    #[cfg(feature = "stats")]
    pub fn debug_stats(&self) -> crate::hash_table::DebugStats {
        self.table.debug_stats()
    }
}

impl<K, V, S, A, const MAX_LOAD: usize> Dict<K, V, S, A, MAX_LOAD>
where
    K: Hash + Eq,
    S: BuildHasher,
    A: Allocator,
{
    /// Stores `value` under `key`, returning the value it replaced.
    ///
    /// If an equal key is already present only its value changes: the key
    /// already stored stays, and `key` is dropped.
    ///
    /// # Errors
    ///
    /// Fails only when the insert pushes the dictionary past its load limit
    /// and the growth allocation fails. The entry is still stored in that
    /// case, and the dictionary stays usable above its target load; a value
    /// it replaced is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::Dict;
    /// #
    /// let mut dict = Dict::new();
    /// assert_eq!(dict.set(37, "a"), Ok(None));
    /// assert_eq!(dict.set(37, "b"), Ok(Some("a")));
    /// assert_eq!(dict.get(&37), Some(&"b"));
    /// ```
    pub fn set(&mut self, key: K, value: V) -> Result<Option<V>, TryReserveError> {
        let hash = self.hash_builder.hash_one(&key);
        let hash_builder = &self.hash_builder;
        self.table.set(
            hash,
            key,
            value,
            |new, stored| new == stored,
            |stored| hash_builder.hash_one(stored),
        )
    }

    /// Infallible version of [`set`](Dict::set).
    ///
    /// # Panics
    ///
    /// Panics on capacity overflow and aborts if growing fails to allocate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::Dict;
    /// #
    /// let mut dict = Dict::new();
    /// assert_eq!(dict.insert(37, "a"), None);
    /// assert_eq!(dict.insert(37, "b"), Some("a"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.set(key, value) {
            Ok(displaced) => displaced,
            Err(error) => error.raise(),
        }
    }

    /// Returns a reference to the value stored under `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::Dict;
    /// #
    /// let mut dict = Dict::new();
    /// dict.insert(1, "a");
    /// assert_eq!(dict.get(&1), Some(&"a"));
    /// assert_eq!(dict.get(&2), None);
    /// ```
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_, v)| v)
    }

    /// Returns the stored key equal to `key` and its value.
    ///
    /// The stored key is the one inserted first, which matters when equal
    /// keys are distinguishable.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let hash = self.hash_builder.hash_one(key);
        self.table.find(hash, |stored| stored == key)
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.hash_builder.hash_one(key);
        self.table
            .find_mut(hash, |stored| stored == key)
            .map(|(_, v)| v)
    }

    /// Returns `true` if the dictionary holds a value for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get_key_value(key).is_some()
    }

    /// Makes room for at least `additional` more entries within the load
    /// limit, leaving the dictionary unchanged on error.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        let hash_builder = &self.hash_builder;
        self.table
            .try_reserve(additional, |key| hash_builder.hash_one(key))
    }

    /// Infallible version of [`try_reserve`](Dict::try_reserve).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::Dict;
    /// #
    /// # use group_dict::DEFAULT_MAX_LOAD;
    /// # use group_dict::LOAD_SCALE;
    /// #
    /// let mut dict: Dict<u32, u32> = Dict::new();
    /// dict.reserve(100);
    /// assert!(100 * LOAD_SCALE <= dict.capacity() * DEFAULT_MAX_LOAD);
    /// ```
    pub fn reserve(&mut self, additional: usize) {
        if let Err(error) = self.try_reserve(additional) {
            error.raise();
        }
    }

    /// Computes how many groups past its home group each entry is stored.
    #[cfg(feature = "stats")]
    pub fn probe_histogram(&self) -> crate::hash_table::ProbeHistogram {
        self.table
            .probe_histogram(|key| self.hash_builder.hash_one(key))
    }
}

impl<K, V, S, A, const MAX_LOAD: usize> Dict<K, V, S, A, MAX_LOAD>
where
    K: Clone,
    V: Clone,
    S: Clone,
    A: Allocator + Clone,
{
    /// Clones the dictionary, reporting allocation failure.
    ///
    /// The clone has the same capacity and the same slot layout, so it
    /// enumerates in the same order.
    pub fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(Self {
            table: self.table.try_clone()?,
            hash_builder: self.hash_builder.clone(),
        })
    }
}

impl<K, V, S, A, const MAX_LOAD: usize> Clone for Dict<K, V, S, A, MAX_LOAD>
where
    K: Clone,
    V: Clone,
    S: Clone,
    A: Allocator + Clone,
{
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<K, V, S, A, const MAX_LOAD: usize> Extend<(K, V)> for Dict<K, V, S, A, MAX_LOAD>
where
    K: Hash + Eq,
    S: BuildHasher,
    A: Allocator,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V, S, const MAX_LOAD: usize> FromIterator<(K, V)> for Dict<K, V, S, Global, MAX_LOAD>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut dict = Self::with_hasher(S::default());
        dict.extend(iter);
        dict
    }
}

impl<'a, K, V, S, A: Allocator, const MAX_LOAD: usize> IntoIterator
    for &'a Dict<K, V, S, A, MAX_LOAD>
{
    type IntoIter = Iter<'a, K, V>;
    type Item = (&'a K, &'a V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
