//! The raw group-probed table.
//!
//! [`HashTable`] stores keys and values in two parallel arrays next to a
//! metadata array of [`Group`]s, all carved out of one allocation. Callers
//! supply the hash and the key equality for every operation, which is what
//! lets [`Dict`](crate::Dict) layer `Hash + Eq` keys on top while still
//! allowing arbitrary hashing schemes here.

use core::alloc::Layout;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use allocator_api2::alloc::Allocator;
use allocator_api2::alloc::Global;

use crate::error::TryReserveError;
use crate::group::EMPTY;
use crate::group::GROUP_WIDTH;
use crate::group::Group;
use crate::group::tag;

cfg_if::cfg_if! {
    if #[cfg(feature = "max-load-eighty-seven-point-five")] {
        /// Default maximum load numerator, out of 1024.
        pub const DEFAULT_MAX_LOAD: usize = 896;
    } else if #[cfg(feature = "max-load-seventy-five")] {
        /// Default maximum load numerator, out of 1024.
        pub const DEFAULT_MAX_LOAD: usize = 768;
    } else {
        /// Default maximum load numerator, out of 1024.
        pub const DEFAULT_MAX_LOAD: usize = 512;
    }
}

/// Denominator of the `MAX_LOAD` ratio.
pub const LOAD_SCALE: usize = 1024;

/// Rounds a requested slot count up to `16 * 2^n`, never below one group.
#[inline]
fn capacity_for_request(requested: usize) -> Result<usize, TryReserveError> {
    requested
        .div_ceil(GROUP_WIDTH)
        .max(1)
        .checked_next_power_of_two()
        .and_then(|groups| groups.checked_mul(GROUP_WIDTH))
        .ok_or(TryReserveError::CapacityOverflow)
}

#[inline(always)]
fn exceeds_load(len: usize, capacity: usize, max_load: usize) -> bool {
    (len as u128) * (LOAD_SCALE as u128) > (capacity as u128) * (max_load as u128)
}

/// Opaque position of an occupied slot, used to resume enumeration.
///
/// A cursor does not borrow the table. It stays meaningful only until the
/// table grows: after a rehash the same cursor may skip or repeat entries,
/// although it can never read outside the table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Cursor {
    group: usize,
    slot: usize,
}

impl Cursor {
    #[inline(always)]
    fn index(self) -> usize {
        self.group * GROUP_WIDTH + self.slot
    }
}

/// Outcome of walking a probe sequence.
enum Probe {
    Found(Cursor),
    Vacant(Cursor),
    Full,
}

#[derive(Clone, Copy, Debug)]
struct DataLayout {
    layout: Layout,
    keys_offset: usize,
    values_offset: usize,
}

impl DataLayout {
    fn new<K, V>(capacity: usize) -> Result<Self, TryReserveError> {
        let overflow = |_| TryReserveError::CapacityOverflow;

        let metadata_layout = Layout::array::<Group>(capacity / GROUP_WIDTH).map_err(overflow)?;
        let keys_layout = Layout::array::<MaybeUninit<K>>(capacity).map_err(overflow)?;
        let values_layout = Layout::array::<MaybeUninit<V>>(capacity).map_err(overflow)?;

        let (layout, keys_offset) = metadata_layout.extend(keys_layout).map_err(overflow)?;
        let (layout, values_offset) = layout.extend(values_layout).map_err(overflow)?;

        Ok(DataLayout {
            layout: layout.pad_to_align(),
            keys_offset,
            values_offset,
        })
    }
}

/// Handle to one table allocation: metadata groups, then keys, then values.
///
/// It never drops entries or frees itself; [`HashTable`] decides when both
/// happen.
struct RawStorage<K, V> {
    ptr: NonNull<u8>,
    layout: DataLayout,
    group_mask: usize,
    marker: PhantomData<(K, V)>,
}

impl<K, V> Clone for RawStorage<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for RawStorage<K, V> {}

impl<K, V> RawStorage<K, V> {
    /// Allocates zeroed storage for exactly `capacity` slots, which must
    /// already be rounded by [`capacity_for_request`].
    fn allocate<A: Allocator>(alloc: &A, capacity: usize) -> Result<Self, TryReserveError> {
        debug_assert!(capacity.is_power_of_two() && capacity >= GROUP_WIDTH);

        let layout = DataLayout::new::<K, V>(capacity)?;
        let ptr = alloc
            .allocate_zeroed(layout.layout)
            .map_err(|_| TryReserveError::AllocError {
                layout: layout.layout,
            })?;

        Ok(RawStorage {
            ptr: ptr.cast(),
            layout,
            group_mask: capacity / GROUP_WIDTH - 1,
            marker: PhantomData,
        })
    }

    /// # Safety
    ///
    /// `alloc` must be the allocator this storage came from, and the storage
    /// must not be used afterwards. Live entries are not dropped.
    unsafe fn deallocate<A: Allocator>(self, alloc: &A) {
        // SAFETY: Caller guarantees `ptr` was allocated by `alloc` with this
        // layout and is not used again.
        unsafe { alloc.deallocate(self.ptr, self.layout.layout) }
    }

    #[inline(always)]
    fn groups(&self) -> usize {
        self.group_mask + 1
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.groups() * GROUP_WIDTH
    }

    #[inline(always)]
    fn metadata(&self) -> &[Group] {
        // SAFETY: The allocation starts with `groups()` zero-initialized,
        // 16-byte aligned `Group`s, and every byte pattern is a valid `Group`.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr().cast::<Group>(), self.groups()) }
    }

    #[inline(always)]
    fn metadata_mut(&mut self) -> &mut [Group] {
        // SAFETY: See `metadata`; `&mut self` guarantees exclusive access.
        unsafe {
            core::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<Group>(), self.groups())
        }
    }

    #[inline(always)]
    fn keys_ptr(&self) -> *mut MaybeUninit<K> {
        // SAFETY: `keys_offset` lies within the allocation.
        unsafe { self.ptr.as_ptr().add(self.layout.keys_offset).cast() }
    }

    #[inline(always)]
    fn values_ptr(&self) -> *mut MaybeUninit<V> {
        // SAFETY: `values_offset` lies within the allocation.
        unsafe { self.ptr.as_ptr().add(self.layout.values_offset).cast() }
    }

    #[inline(always)]
    fn is_occupied(&self, at: Cursor) -> bool {
        at.group < self.groups()
            && at.slot < GROUP_WIDTH
            && self.metadata()[at.group].byte(at.slot) != EMPTY
    }

    /// # Safety
    ///
    /// `index` must be below `capacity()` and refer to an occupied slot.
    #[inline(always)]
    unsafe fn key(&self, index: usize) -> &K {
        // SAFETY: Caller guarantees the slot is in bounds and initialized.
        unsafe { (*self.keys_ptr().add(index)).assume_init_ref() }
    }

    /// # Safety
    ///
    /// `index` must be below `capacity()` and refer to an occupied slot.
    #[inline(always)]
    unsafe fn value(&self, index: usize) -> &V {
        // SAFETY: Caller guarantees the slot is in bounds and initialized.
        unsafe { (*self.values_ptr().add(index)).assume_init_ref() }
    }

    /// # Safety
    ///
    /// `index` must be below `capacity()` and refer to an occupied slot.
    #[inline(always)]
    unsafe fn entry_mut(&mut self, index: usize) -> (&K, &mut V) {
        // SAFETY: Caller guarantees the slot is in bounds and initialized. Keys
        // and values live in disjoint arrays, so the two references never
        // alias.
        unsafe {
            (
                (*self.keys_ptr().add(index)).assume_init_ref(),
                (*self.values_ptr().add(index)).assume_init_mut(),
            )
        }
    }

    /// # Safety
    ///
    /// `at` must be an empty slot of this storage.
    #[inline(always)]
    unsafe fn write(&mut self, at: Cursor, tag: u8, key: K, value: V) {
        debug_assert!(!self.is_occupied(at));
        // SAFETY: Caller guarantees `at` is in bounds and empty, so nothing is
        // overwritten without being dropped.
        unsafe {
            self.keys_ptr().add(at.index()).write(MaybeUninit::new(key));
            self.values_ptr().add(at.index()).write(MaybeUninit::new(value));
        }
        self.metadata_mut()[at.group].set(at.slot, tag);
    }

    /// Walks the probe sequence of `hash` one group at a time.
    ///
    /// Candidates are the slots whose metadata byte equals the hash's tag;
    /// `eq` decides the match. The first group with a free slot ends the
    /// walk, since an insert would have stopped there too.
    #[inline]
    fn probe(&self, hash: u64, mut eq: impl FnMut(&K) -> bool) -> Probe {
        let tag = tag(hash);
        let metadata = self.metadata();
        let mut group = hash as usize & self.group_mask;

        for _ in 0..metadata.len() {
            // SAFETY: `group` is masked by `group_mask`, so it indexes
            // `metadata`.
            let meta = unsafe { metadata.get_unchecked(group) };

            for slot in meta.match_tag(tag) {
                // SAFETY: A tag match implies the slot is occupied, and
                // `group * 16 + slot` is below the capacity.
                if eq(unsafe { self.key(group * GROUP_WIDTH + slot) }) {
                    return Probe::Found(Cursor { group, slot });
                }
            }

            if let Some(slot) = meta.match_occupied().lowest_unset() {
                return Probe::Vacant(Cursor { group, slot });
            }

            group = (group + 1) & self.group_mask;
        }

        Probe::Full
    }

    /// First empty slot on the probe sequence of `hash`, without comparing
    /// keys. The storage must have at least one empty slot.
    #[inline]
    fn find_insert_slot(&self, hash: u64) -> Cursor {
        let metadata = self.metadata();
        let mut group = hash as usize & self.group_mask;
        loop {
            if let Some(slot) = metadata[group].match_occupied().lowest_unset() {
                return Cursor { group, slot };
            }
            group = (group + 1) & self.group_mask;
        }
    }

    /// Next occupied slot in storage order after `after`, or the first one
    /// when `after` is `None`.
    fn next_occupied(&self, after: Option<Cursor>) -> Option<Cursor> {
        let (mut group, mut slot) = match after {
            None => (0, 0),
            Some(at) if at.slot + 1 < GROUP_WIDTH => (at.group, at.slot + 1),
            Some(at) => (at.group.checked_add(1)?, 0),
        };

        let metadata = self.metadata();
        while group < metadata.len() {
            let next = metadata[group].match_occupied().from_slot(slot).lowest_set();
            if let Some(found) = next {
                return Some(Cursor { group, slot: found });
            }
            group += 1;
            slot = 0;
        }

        None
    }
}

/// Frees a storage block that is still being filled if the fill unwinds.
struct FreeOnUnwind<'a, K, V, A: Allocator> {
    storage: RawStorage<K, V>,
    alloc: &'a A,
}

impl<K, V, A: Allocator> FreeOnUnwind<'_, K, V, A> {
    fn into_inner(self) -> RawStorage<K, V> {
        let storage = self.storage;
        core::mem::forget(self);
        storage
    }
}

impl<K, V, A: Allocator> Drop for FreeOnUnwind<'_, K, V, A> {
    fn drop(&mut self) {
        // SAFETY: The block came from `alloc`; entries copied into it are still
        // owned by the source table, so only the memory is released.
        unsafe { self.storage.deallocate(self.alloc) }
    }
}

/// Debug statistics for table analysis.
#[cfg(feature = "stats")]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of entries in the table
    pub len: usize,
    /// Total number of slots
    pub capacity: usize,
    /// Number of metadata groups
    pub groups: usize,
    /// Groups with all 16 slots occupied
    pub full_groups: usize,
    /// Groups with no occupied slot
    pub empty_groups: usize,
    /// len / capacity
    pub load_factor: f64,
    /// MAX_LOAD / 1024
    pub max_load_factor: f64,
    /// Bytes held by the table allocation
    pub total_bytes: usize,
}

#[cfg(feature = "stats")]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Dict Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load, limit {:.2}%)",
            self.len,
            self.capacity,
            self.load_factor * 100.0,
            self.max_load_factor * 100.0
        );
        println!(
            "Groups: {} total, {} full, {} empty",
            self.groups, self.full_groups, self.empty_groups
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
    }
}

/// Histogram of probe distances, measured in groups from each entry's home
/// group. `distances[0]` counts entries stored in their home group.
#[cfg(feature = "stats")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHistogram {
    /// Entry count per probe distance.
    pub distances: alloc::vec::Vec<usize>,
}

#[cfg(feature = "stats")]
impl ProbeHistogram {
    /// Longest probe distance present in the table.
    pub fn max_distance(&self) -> usize {
        self.distances.len().saturating_sub(1)
    }

    /// Pretty-print the histogram.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Probe Distance Histogram ===");
        let total: usize = self.distances.iter().sum();
        for (distance, &count) in self.distances.iter().enumerate() {
            let share = if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            };
            println!("{distance:>4} groups: {count:>8} ({share:.2}%)");
        }
    }
}

/// An open-addressing table probing 16-slot groups with one SIMD compare.
///
/// `HashTable<K, V>` stores `(K, V)` entries in a structure-of-arrays layout.
/// Like a raw table, it does not hash keys itself: every operation takes the
/// key's hash and an equality predicate, and operations that may rehash also
/// take a function recomputing a stored key's hash.
///
/// The table keeps `len * 1024 <= capacity * MAX_LOAD` after every
/// successful insert by doubling its storage. Single entries cannot be
/// removed; [`clear`](HashTable::clear) empties the table in place.
///
/// ## Example
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use group_dict::HashTable;
/// # use siphasher::sip::SipHasher;
/// #
/// # fn hash_str(s: &str) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     s.hash(&mut hasher);
/// #     hasher.finish()
/// # }
/// #
/// let mut table: HashTable<String, u32> = HashTable::with_capacity(0);
///
/// let hash = hash_str("alice");
/// table
///     .set(hash, "alice".to_string(), 1, |a, b| a == b, |k| hash_str(k))
///     .unwrap();
///
/// assert_eq!(table.find(hash, |k| k == "alice"), Some((&"alice".to_string(), &1)));
/// ```
pub struct HashTable<K, V, A: Allocator = Global, const MAX_LOAD: usize = DEFAULT_MAX_LOAD> {
    storage: RawStorage<K, V>,
    len: usize,
    alloc: A,
}

// SAFETY: The table owns its keys and values; sending it sends them.
unsafe impl<K: Send, V: Send, A: Allocator + Send, const MAX_LOAD: usize> Send
    for HashTable<K, V, A, MAX_LOAD>
{
}

// SAFETY: Shared access only hands out shared references to keys and values.
unsafe impl<K: Sync, V: Sync, A: Allocator + Sync, const MAX_LOAD: usize> Sync
    for HashTable<K, V, A, MAX_LOAD>
{
}

impl<K, V, A: Allocator, const MAX_LOAD: usize> Debug for HashTable<K, V, A, MAX_LOAD> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::string::String;
        use alloc::vec::Vec;
        use core::fmt::Write;

        let metadata = self
            .storage
            .metadata()
            .iter()
            .map(|group| {
                let mut row = String::new();
                for slot in 0..GROUP_WIDTH {
                    let byte = group.byte(slot);
                    if slot != 0 {
                        row.push(' ');
                    }
                    if byte == EMPTY {
                        row.push_str("..");
                    } else {
                        let _ = write!(row, "{byte:02x}");
                    }
                }
                row
            })
            .collect::<Vec<_>>();

        f.debug_struct("HashTable")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("max_load", &MAX_LOAD)
            .field("metadata", &metadata)
            .finish()
    }
}

impl<K, V, A: Allocator, const MAX_LOAD: usize> Drop for HashTable<K, V, A, MAX_LOAD> {
    fn drop(&mut self) {
        self.drop_entries();
        // SAFETY: The storage came from `self.alloc` and every entry has been
        // dropped above.
        unsafe { self.storage.deallocate(&self.alloc) }
    }
}

impl<K, V, const MAX_LOAD: usize> HashTable<K, V, Global, MAX_LOAD> {
    /// Creates a table with room for at least `capacity` slots.
    ///
    /// The slot count is rounded up to `16 * 2^n`; a request of 0 yields 16.
    ///
    /// # Panics
    ///
    /// Panics on capacity overflow and aborts on allocation failure, like the
    /// standard collections. Use [`try_with_capacity`] to handle both.
    ///
    /// [`try_with_capacity`]: HashTable::try_with_capacity
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::HashTable;
    /// #
    /// let table: HashTable<u64, String> = HashTable::with_capacity(17);
    /// assert_eq!(table.capacity(), 32);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_in(capacity, Global)
    }

    /// Fallible version of [`with_capacity`](HashTable::with_capacity).
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        Self::try_with_capacity_in(capacity, Global)
    }
}

impl<K, V, A: Allocator, const MAX_LOAD: usize> HashTable<K, V, A, MAX_LOAD> {
    const VALID_MAX_LOAD: () = assert!(
        MAX_LOAD > 0 && MAX_LOAD < LOAD_SCALE,
        "MAX_LOAD must lie in 1..1024 so every probe sequence keeps an empty slot"
    );

    /// Creates a table with room for at least `capacity` slots, allocating
    /// from `alloc`.
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        match Self::try_with_capacity_in(capacity, alloc) {
            Ok(table) => table,
            Err(error) => error.raise(),
        }
    }

    /// Creates a table with room for at least `capacity` slots, allocating
    /// from `alloc`, reporting allocation failure instead of aborting.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use allocator_api2::alloc::Global;
    /// # use group_dict::HashTable;
    /// # use group_dict::TryReserveError;
    /// #
    /// let table: HashTable<u32, u32> = HashTable::try_with_capacity_in(0, Global).unwrap();
    /// assert_eq!(table.capacity(), 16);
    ///
    /// let huge = HashTable::<u32, u32>::try_with_capacity_in(usize::MAX, Global);
    /// assert_eq!(huge.unwrap_err(), TryReserveError::CapacityOverflow);
    /// ```
    pub fn try_with_capacity_in(capacity: usize, alloc: A) -> Result<Self, TryReserveError> {
        let () = Self::VALID_MAX_LOAD;

        let capacity = capacity_for_request(capacity)?;
        let storage = RawStorage::allocate(&alloc, capacity)?;
        log::trace!("allocated table with {capacity} slots");

        Ok(Self {
            storage,
            len: 0,
            alloc,
        })
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the table contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of slots, always `16 * 2^n`.
    ///
    /// The table grows once `len * 1024` would exceed
    /// `capacity * MAX_LOAD`, so the number of entries it accepts before
    /// growing is a fraction of this value.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Returns a reference to the table's allocator.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Finds the entry whose hash is `hash` and whose key satisfies `eq`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::HashTable;
    /// #
    /// let mut table: HashTable<u64, &str> = HashTable::with_capacity(0);
    /// table.set(7, 7, "seven", |a, b| a == b, |&k| k).unwrap();
    ///
    /// assert_eq!(table.find(7, |&k| k == 7), Some((&7, &"seven")));
    /// assert_eq!(table.find(8, |&k| k == 8), None);
    /// ```
    #[inline]
    pub fn find(&self, hash: u64, eq: impl FnMut(&K) -> bool) -> Option<(&K, &V)> {
        if self.len == 0 {
            return None;
        }

        match self.storage.probe(hash, eq) {
            // SAFETY: `probe` only reports occupied, in-bounds slots as found.
            Probe::Found(at) => unsafe {
                Some((self.storage.key(at.index()), self.storage.value(at.index())))
            },
            Probe::Vacant(_) | Probe::Full => None,
        }
    }

    /// Finds the entry whose hash is `hash` and whose key satisfies `eq`,
    /// returning a mutable reference to its value.
    #[inline]
    pub fn find_mut(&mut self, hash: u64, eq: impl FnMut(&K) -> bool) -> Option<(&K, &mut V)> {
        if self.len == 0 {
            return None;
        }

        match self.storage.probe(hash, eq) {
            // SAFETY: `probe` only reports occupied, in-bounds slots as found.
            Probe::Found(at) => Some(unsafe { self.storage.entry_mut(at.index()) }),
            Probe::Vacant(_) | Probe::Full => None,
        }
    }

    /// Inserts `value` under `key`, or replaces the value of an equal key.
    ///
    /// `hash` is the hash of `key`, `eq(&key, stored)` decides whether a
    /// stored key is equal, and `hasher` recomputes the hash of a stored key
    /// when the table has to grow.
    ///
    /// When an equal key is already present, only the value is replaced: the
    /// stored key stays and `key` is dropped. The previous value is returned.
    ///
    /// # Errors
    ///
    /// If the insert pushes the table past its load limit and the growth
    /// allocation fails, the entry **stays inserted**, the table remains fully
    /// usable (just above its target load), and the error is returned. A value
    /// displaced by the insert is dropped in that case. The only case where
    /// nothing is inserted is a completely full table (reachable only after
    /// earlier growth failures) whose growth fails again.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::HashTable;
    /// #
    /// let mut table: HashTable<u64, &str> = HashTable::with_capacity(0);
    ///
    /// assert_eq!(table.set(1, 1, "a", |a, b| a == b, |&k| k), Ok(None));
    /// assert_eq!(table.set(1, 1, "b", |a, b| a == b, |&k| k), Ok(Some("a")));
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn set(
        &mut self,
        hash: u64,
        key: K,
        value: V,
        mut eq: impl FnMut(&K, &K) -> bool,
        hasher: impl Fn(&K) -> u64,
    ) -> Result<Option<V>, TryReserveError> {
        let displaced = loop {
            match self.storage.probe(hash, |stored| eq(&key, stored)) {
                Probe::Found(at) => {
                    // SAFETY: `probe` only reports occupied, in-bounds slots as
                    // found.
                    let (_, stored) = unsafe { self.storage.entry_mut(at.index()) };
                    break Some(core::mem::replace(stored, value));
                }
                Probe::Vacant(at) => {
                    // SAFETY: `probe` reported `at` as an empty slot.
                    unsafe { self.storage.write(at, tag(hash), key, value) };
                    self.len += 1;
                    break None;
                }
                Probe::Full => self.grow(&hasher)?,
            }
        };

        if exceeds_load(self.len, self.capacity(), MAX_LOAD) {
            self.grow(&hasher)?;
        }

        Ok(displaced)
    }

    /// Removes all entries, keeping the allocated capacity.
    ///
    /// Every entry is dropped and all metadata is reset to empty.
    pub fn clear(&mut self) {
        self.drop_entries();
        self.storage.metadata_mut().fill(Group::empty());
        self.len = 0;
    }

    /// Drops every entry, leaving the metadata untouched.
    fn drop_entries(&mut self) {
        if !(core::mem::needs_drop::<K>() || core::mem::needs_drop::<V>()) || self.len == 0 {
            return;
        }

        for group in 0..self.storage.groups() {
            let occupied = self.storage.metadata()[group].match_occupied();
            if !occupied.any() {
                continue;
            }
            // Reset first so a panicking destructor can only leak.
            self.storage.metadata_mut()[group] = Group::empty();
            self.len -= occupied.0.count_ones() as usize;
            for slot in occupied {
                let index = group * GROUP_WIDTH + slot;
                // SAFETY: The slot was occupied, and its metadata is already
                // cleared so it will not be dropped twice.
                unsafe {
                    (*self.storage.keys_ptr().add(index)).assume_init_drop();
                    (*self.storage.values_ptr().add(index)).assume_init_drop();
                }
            }
        }
    }

    /// Returns the position of the first occupied slot after `after`, in
    /// storage order, or of the first occupied slot when `after` is `None`.
    ///
    /// Keys and values are enumerated through the same positions, so a key
    /// and a value read at one cursor always belong together.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use group_dict::HashTable;
    /// #
    /// let mut table: HashTable<u64, u64> = HashTable::with_capacity(0);
    /// for k in [3u64, 1, 2] {
    ///     table.set(k, k, k * 10, |a, b| a == b, |&k| k).unwrap();
    /// }
    ///
    /// let mut cursor = None;
    /// let mut keys = Vec::new();
    /// while let Some(at) = table.next_occupied(cursor) {
    ///     keys.push(*table.key_at(at).unwrap());
    ///     cursor = Some(at);
    /// }
    /// // All three share group 0 and took its slots in insertion order.
    /// assert_eq!(keys, [3, 1, 2]);
    /// ```
    pub fn next_occupied(&self, after: Option<Cursor>) -> Option<Cursor> {
        self.storage.next_occupied(after)
    }

    /// Returns the key stored at `at`, or `None` if that slot is empty.
    pub fn key_at(&self, at: Cursor) -> Option<&K> {
        if !self.storage.is_occupied(at) {
            return None;
        }
        // SAFETY: Bounds and occupancy checked above.
        Some(unsafe { self.storage.key(at.index()) })
    }

    /// Returns the value stored at `at`, or `None` if that slot is empty.
    pub fn value_at(&self, at: Cursor) -> Option<&V> {
        if !self.storage.is_occupied(at) {
            return None;
        }
        // SAFETY: Bounds and occupancy checked above.
        Some(unsafe { self.storage.value(at.index()) })
    }

    /// Returns an iterator over all entries in storage order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            storage: &self.storage,
            cursor: None,
            remaining: self.len,
        }
    }

    /// Returns an iterator over all keys in storage order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over all values in storage order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Makes room for at least `additional` more entries without exceeding
    /// the load limit, rehashing with `hasher` if needed.
    ///
    /// On error the table is left unchanged.
    pub fn try_reserve(
        &mut self,
        additional: usize,
        hasher: impl Fn(&K) -> u64,
    ) -> Result<(), TryReserveError> {
        let required = self
            .len
            .checked_add(additional)
            .ok_or(TryReserveError::CapacityOverflow)?;
        if !exceeds_load(required, self.capacity(), MAX_LOAD) {
            return Ok(());
        }

        let capacity = Self::capacity_for_len(required)?;
        self.resize(capacity, &hasher)
    }

    /// Infallible version of [`try_reserve`](HashTable::try_reserve).
    pub fn reserve(&mut self, additional: usize, hasher: impl Fn(&K) -> u64) {
        if let Err(error) = self.try_reserve(additional, hasher) {
            error.raise();
        }
    }

    /// Smallest capacity holding `len` entries within the load limit.
    fn capacity_for_len(len: usize) -> Result<usize, TryReserveError> {
        let slots = (len as u128 * LOAD_SCALE as u128).div_ceil(MAX_LOAD as u128);
        let slots = usize::try_from(slots).map_err(|_| TryReserveError::CapacityOverflow)?;
        capacity_for_request(slots)
    }

    #[cold]
    #[inline(never)]
    fn grow(&mut self, hasher: &impl Fn(&K) -> u64) -> Result<(), TryReserveError> {
        let doubled = self
            .capacity()
            .checked_mul(2)
            .ok_or(TryReserveError::CapacityOverflow)?;
        let capacity = doubled.max(Self::capacity_for_len(self.len)?);
        self.resize(capacity, hasher)
    }

    /// Moves every entry into fresh storage of `capacity` slots.
    ///
    /// The old storage stays intact and authoritative until the new one is
    /// fully populated, so an allocation failure or a panicking hasher leaves
    /// the table as it was.
    fn resize(
        &mut self,
        capacity: usize,
        hasher: &impl Fn(&K) -> u64,
    ) -> Result<(), TryReserveError> {
        debug_assert!(capacity > self.len);

        let old_capacity = self.capacity();
        let new_storage = match RawStorage::allocate(&self.alloc, capacity) {
            Ok(storage) => storage,
            Err(error) => {
                log::warn!(
                    "failed to grow table from {old_capacity} to {capacity} slots with {} entries: {error}",
                    self.len
                );
                return Err(error);
            }
        };
        let mut target = FreeOnUnwind {
            storage: new_storage,
            alloc: &self.alloc,
        };

        let mut cursor = None;
        while let Some(at) = self.storage.next_occupied(cursor) {
            cursor = Some(at);

            // SAFETY: `next_occupied` only yields occupied, in-bounds slots.
            let hash = hasher(unsafe { self.storage.key(at.index()) });
            let slot = target.storage.find_insert_slot(hash);

            // SAFETY: `slot` is an empty, in-bounds slot of the new storage,
            // and `at` an occupied slot of the old one. The entry is copied
            // bitwise; ownership moves once the old storage is released below
            // without dropping its entries.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    self.storage.keys_ptr().add(at.index()),
                    target.storage.keys_ptr().add(slot.index()),
                    1,
                );
                core::ptr::copy_nonoverlapping(
                    self.storage.values_ptr().add(at.index()),
                    target.storage.values_ptr().add(slot.index()),
                    1,
                );
            }
            target.storage.metadata_mut()[slot.group].set(slot.slot, tag(hash));
        }

        let old = core::mem::replace(&mut self.storage, target.into_inner());
        // SAFETY: Every entry of `old` now lives in the new storage, so only
        // the memory is released.
        unsafe { old.deallocate(&self.alloc) };

        log::debug!(
            "grew table from {old_capacity} to {capacity} slots with {} entries",
            self.len
        );
        Ok(())
    }

    /// Returns a snapshot of the table's occupancy.
    #[cfg(feature = "stats")]
    pub fn debug_stats(&self) -> DebugStats {
        let metadata = self.storage.metadata();
        DebugStats {
            len: self.len,
            capacity: self.capacity(),
            groups: metadata.len(),
            full_groups: metadata
                .iter()
                .filter(|g| g.match_occupied().is_full())
                .count(),
            empty_groups: metadata
                .iter()
                .filter(|g| !g.match_occupied().any())
                .count(),
            load_factor: self.len as f64 / self.capacity() as f64,
            max_load_factor: MAX_LOAD as f64 / LOAD_SCALE as f64,
            total_bytes: self.storage.layout.layout.size(),
        }
    }

    /// Computes how many groups past its home group each entry is stored,
    /// using `hasher` to recompute entry hashes.
    #[cfg(feature = "stats")]
    pub fn probe_histogram(&self, hasher: impl Fn(&K) -> u64) -> ProbeHistogram {
        let mut distances = alloc::vec::Vec::new();
        let mut cursor = None;
        while let Some(at) = self.storage.next_occupied(cursor) {
            cursor = Some(at);
            // SAFETY: `next_occupied` only yields occupied, in-bounds slots.
            let hash = hasher(unsafe { self.storage.key(at.index()) });
            let home = hash as usize & self.storage.group_mask;
            let distance = at.group.wrapping_sub(home) & self.storage.group_mask;
            if distances.len() <= distance {
                distances.resize(distance + 1, 0);
            }
            distances[distance] += 1;
        }
        ProbeHistogram { distances }
    }
}

impl<K, V, A, const MAX_LOAD: usize> HashTable<K, V, A, MAX_LOAD>
where
    K: Clone,
    V: Clone,
    A: Allocator + Clone,
{
    /// Clones the table into a new allocation with the same capacity and the
    /// same slot layout, reporting allocation failure.
    pub fn try_clone(&self) -> Result<Self, TryReserveError> {
        let mut table = Self::try_with_capacity_in(self.capacity(), self.alloc.clone())?;
        debug_assert_eq!(table.capacity(), self.capacity());

        let mut cursor = None;
        while let Some(at) = self.storage.next_occupied(cursor) {
            cursor = Some(at);
            // SAFETY: `next_occupied` only yields occupied, in-bounds slots.
            let (key, value) = unsafe {
                (
                    self.storage.key(at.index()).clone(),
                    self.storage.value(at.index()).clone(),
                )
            };
            let tag = self.storage.metadata()[at.group].byte(at.slot);
            // SAFETY: Both tables have the same capacity and the clone fills
            // the same slots in the same order, so `at` is still empty there.
            unsafe { table.storage.write(at, tag, key, value) };
            table.len += 1;
        }

        Ok(table)
    }
}

impl<K, V, A, const MAX_LOAD: usize> Clone for HashTable<K, V, A, MAX_LOAD>
where
    K: Clone,
    V: Clone,
    A: Allocator + Clone,
{
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(table) => table,
            Err(error) => error.raise(),
        }
    }
}

impl<'a, K, V, A: Allocator, const MAX_LOAD: usize> IntoIterator
    for &'a HashTable<K, V, A, MAX_LOAD>
{
    type IntoIter = Iter<'a, K, V>;
    type Item = (&'a K, &'a V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over the entries of a table, in storage order.
///
/// Created by [`HashTable::iter`] and [`Dict::iter`](crate::Dict::iter).
pub struct Iter<'a, K, V> {
    storage: &'a RawStorage<K, V>,
    cursor: Option<Cursor>,
    remaining: usize,
}

// SAFETY: The iterator only hands out shared references.
unsafe impl<K: Sync, V: Sync> Send for Iter<'_, K, V> {}
// SAFETY: The iterator only hands out shared references.
unsafe impl<K: Sync, V: Sync> Sync for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            storage: self.storage,
            cursor: self.cursor,
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let at = self.storage.next_occupied(self.cursor)?;
        self.cursor = Some(at);
        self.remaining -= 1;

        // SAFETY: `next_occupied` only yields occupied, in-bounds slots, and
        // the shared borrow of the table keeps them alive for `'a`.
        unsafe { Some((self.storage.key(at.index()), self.storage.value(at.index()))) }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> core::iter::FusedIterator for Iter<'_, K, V> {}

/// An iterator over the keys of a table, in storage order.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// An iterator over the values of a table, in storage order.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
