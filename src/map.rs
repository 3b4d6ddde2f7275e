use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use core::mem;
use std::io;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::raw::{self, RawTable};

/// Default hasher for [`HopscotchMap`].
pub type DefaultHashBuilder = ahash::RandomState;

/// Capacity a map starts with, and returns to on [`clear`](HopscotchMap::clear).
const BASELINE_CAPACITY: usize = 32;

/// Hashes a key with the map's hash builder.
#[cfg_attr(feature = "inline-more", inline)]
fn make_hash<Q, S>(hash_builder: &S, val: &Q) -> u64
where
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    let mut state = hash_builder.build_hasher();
    val.hash(&mut state);
    state.finish()
}

/// Hashes a stored `(key, value)` pair by projecting out its key.
///
/// This is what lets the element-generic [`RawTable`] back a keyed map: the table only ever
/// sees whole elements, and this adapter makes "hash the element" mean "hash the key".
#[cfg_attr(feature = "inline-more", inline)]
fn make_hasher<K, V, S>(hash_builder: &S) -> impl Fn(&(K, V)) -> u64 + '_
where
    K: Hash,
    S: BuildHasher,
{
    move |val: &(K, V)| make_hash(hash_builder, &val.0)
}

/// Probe predicate matching a stored pair against a borrowed key.
#[cfg_attr(feature = "inline-more", inline)]
fn equivalent_key<'a, Q, K, V>(k: &'a Q) -> impl FnMut(&(K, V)) -> bool + 'a
where
    K: Borrow<Q>,
    Q: ?Sized + Eq,
{
    move |x| k.eq(x.0.borrow())
}

/// Compares two stored pairs by their keys alone.
#[cfg_attr(feature = "inline-more", inline)]
fn pair_equivalent<K, V>(a: &(K, V), b: &(K, V)) -> bool
where
    K: Eq,
{
    a.0 == b.0
}

/// A growable hash map over fixed-capacity neighborhood tables, with lock-free exclusive
/// access and a shared-lock protocol for concurrent access.
///
/// The map owns exactly one [`RawTable`] at a time. A reader/writer lock guards the table's
/// *identity* — which table is current — while the table's own per-neighborhood locks guard its
/// contents. Operations taking `&mut self` bypass every lock; the `_sync` operations take
/// `&self`, acquire the identity lock in shared mode, and escalate to exclusive mode only when
/// the table signals that it is out of room and must be replaced by a larger one.
///
/// See the [crate documentation](crate) for the full protocol.
///
/// # Examples
///
/// ```
/// use sidewalk::HopscotchMap;
///
/// let mut map = HopscotchMap::new();
/// map.insert("mercury", 0.39);
/// map.insert("venus", 0.72);
/// assert_eq!(map.get("mercury"), Some(&0.39));
/// assert_eq!(map.len(), 2);
/// assert_eq!(map.erase("venus"), Some(0.72));
/// assert_eq!(map.get("venus"), None);
/// ```
pub struct HopscotchMap<K, V, S = DefaultHashBuilder> {
    table: RwLock<RawTable<(K, V)>>,
    hash_builder: S,
}

impl<K, V> HopscotchMap<K, V, DefaultHashBuilder> {
    /// Creates an empty map with the baseline capacity and the default hasher.
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates an empty map that can hold at least `capacity` entries before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S> HopscotchMap<K, V, S> {
    /// Creates an empty map with the baseline capacity and the given hash builder.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(BASELINE_CAPACITY, hash_builder)
    }

    /// Creates an empty map with at least `capacity` slots and the given hash builder.
    ///
    /// Capacity never drops below the baseline.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            table: RwLock::new(RawTable::with_capacity(capacity.max(BASELINE_CAPACITY))),
            hash_builder,
        }
    }

    /// Returns a reference to the map's hash builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns the number of entries in the map.
    ///
    /// A point-in-time snapshot: under concurrent `_sync` traffic it may be stale by the time
    /// you look at it.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Returns true if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots in the current table.
    ///
    /// Capacity only ever grows, except through [`clear`](Self::clear).
    pub fn capacity(&self) -> usize {
        self.table.read().capacity()
    }

    /// Returns the fraction of slots currently occupied.
    pub fn load_factor(&self) -> f64 {
        self.table.read().load_factor()
    }

    /// Iterates over all entries in unspecified order.
    ///
    /// Takes `&mut self`: iteration is only meaningful while nothing else can mutate the map,
    /// and the exclusive borrow is what guarantees that.
    pub fn iter(&mut self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.get_mut().iter(),
        }
    }

    /// Discards every entry and returns the map to its baseline capacity.
    ///
    /// This is the one operation that shrinks.
    pub fn clear(&mut self) {
        *self.table.get_mut() = RawTable::with_capacity(BASELINE_CAPACITY);
    }
}

impl<K, V, S> HopscotchMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Returns a reference to the value stored for `key`, if any.
    ///
    /// Lock-free; the exclusive borrow stands in for any synchronization. Use
    /// [`get_sync`](Self::get_sync) from shared contexts.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = make_hash(&self.hash_builder, key);
        let table = self.table.get_mut();
        let bucket = table.find(hash, equivalent_key(key))?;
        Some(&table.entry_mut(bucket).1)
    }

    /// Returns a mutable reference to the value stored for `key`, if any.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = make_hash(&self.hash_builder, key);
        let table = self.table.get_mut();
        let bucket = table.find(hash, equivalent_key(key))?;
        Some(&mut table.entry_mut(bucket).1)
    }

    /// Returns the stored key and value for `key`, if any.
    pub fn get_key_value<Q>(&mut self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = make_hash(&self.hash_builder, key);
        let table = self.table.get_mut();
        let bucket = table.find(hash, equivalent_key(key))?;
        let entry = table.entry_mut(bucket);
        Some((&entry.0, &entry.1))
    }

    /// Returns true if the map contains `key`.
    pub fn contains_key<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Inserts `key → value` if `key` is absent.
    ///
    /// Returns a reference to the stored value together with whether an insert happened. If the
    /// key was already present, the existing entry is returned untouched and `value` is
    /// dropped — this method never overwrites. (For overwrite semantics, use
    /// [`put_sync`](Self::put_sync) or assign through [`get_mut`](Self::get_mut).)
    ///
    /// The existence check here is load-bearing: the underlying table's insert does not look
    /// for duplicates, and this is the only call site that reaches it on the exclusive path.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidewalk::HopscotchMap;
    ///
    /// let mut map = HopscotchMap::new();
    /// let (v, inserted) = map.insert(1, "one");
    /// assert!(inserted && *v == "one");
    /// let (v, inserted) = map.insert(1, "uno");
    /// assert!(!inserted && *v == "one");
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> (&mut V, bool) {
        let hash = make_hash(&self.hash_builder, &key);
        let table = self.table.get_mut();
        if let Some(bucket) = table.find(hash, equivalent_key(&key)) {
            return (&mut table.entry_mut(bucket).1, false);
        }
        let bucket = match table.insert(hash, (key, value)) {
            Ok(bucket) => bucket,
            Err(pair) => Self::grow_and_insert(&mut *table, &self.hash_builder, hash, pair),
        };
        (&mut table.entry_mut(bucket).1, true)
    }

    /// Returns a mutable reference to the value for `key`, inserting `V::default()` first if
    /// the key is absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidewalk::HopscotchMap;
    ///
    /// let mut tally = HopscotchMap::new();
    /// for word in ["the", "quick", "the"] {
    ///     *tally.entry_or_default(word) += 1;
    /// }
    /// assert_eq!(tally.get("the"), Some(&2));
    /// ```
    pub fn entry_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        let hash = make_hash(&self.hash_builder, &key);
        let table = self.table.get_mut();
        let bucket = match table.find(hash, equivalent_key(&key)) {
            Some(bucket) => bucket,
            None => match table.insert(hash, (key, V::default())) {
                Ok(bucket) => bucket,
                Err(pair) => Self::grow_and_insert(&mut *table, &self.hash_builder, hash, pair),
            },
        };
        &mut table.entry_mut(bucket).1
    }

    /// Removes `key` from the map, returning its value if it was present.
    pub fn erase<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = make_hash(&self.hash_builder, key);
        self.table
            .get_mut()
            .erase(hash, equivalent_key(key))
            .map(|(_, v)| v)
    }

    /// Grows the table so it can hold at least `capacity` entries.
    ///
    /// Every live entry is re-placed in the new table; the old one is dropped after the swap.
    /// A no-op when the map is already that large — capacity never shrinks this way.
    pub fn rehash(&mut self, capacity: usize) {
        let table = self.table.get_mut();
        if capacity <= table.capacity() {
            return;
        }
        let old = mem::replace(table, RawTable::new());
        let mut new = RawTable::with_capacity(capacity);
        Self::migrate(old, &mut new, &self.hash_builder);
        *table = new;
    }

    /// Inserts or replaces `key → value`, safely callable from many threads at once.
    ///
    /// Fast path: a shared lock on the table handle plus one neighborhood lock. Only when the
    /// table is out of room for this key does the call escalate to an exclusive lock, re-check
    /// (another thread may already have grown the table), and, if still necessary, replace the
    /// table with one of twice the capacity before retrying.
    ///
    /// Concurrent `put_sync` calls for the same key race; the one that reaches the neighborhood
    /// lock last wins.
    pub fn put_sync(&self, key: K, value: V) {
        let hash = make_hash(&self.hash_builder, &key);
        let rejected = {
            let table = self.table.read();
            table.put_sync(hash, (key, value), pair_equivalent)
        };
        let pair = match rejected {
            Ok(()) => return,
            Err(pair) => pair,
        };

        // Out of room. Take the table handle exclusively; from here the unsynchronized
        // accessors are safe.
        let mut table = self.table.write();
        if let Some(bucket) = table.find(hash, equivalent_key(&pair.0)) {
            table.entry_mut(bucket).1 = pair.1;
            return;
        }
        let pair = match table.insert(hash, pair) {
            Ok(_) => return,
            Err(pair) => pair,
        };
        Self::grow_and_insert(&mut table, &self.hash_builder, hash, pair);
    }

    /// Returns a snapshot of the value stored for `key`, safely callable from many threads.
    ///
    /// The value is cloned out under the neighborhood lock; no reference into the table
    /// escapes, so a concurrent resize cannot invalidate the result.
    pub fn get_sync<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let hash = make_hash(&self.hash_builder, key);
        let table = self.table.read();
        table.get_sync(hash, equivalent_key(key), |entry| entry.1.clone())
    }

    /// Removes `key`, safely callable from many threads at once.
    ///
    /// Returns true if an entry existed and was removed. Removal can never run the table out
    /// of room, so there is no exclusive-lock slow path.
    pub fn erase_sync<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = make_hash(&self.hash_builder, key);
        let table = self.table.read();
        table.erase_sync(hash, equivalent_key(key))
    }

    /// Replaces a full table with one of twice the capacity and places `pair` in it.
    ///
    /// Callers hold exclusive access to the table (either `&mut self` or the identity lock in
    /// write mode). The doubled table must be able to place both every migrated entry and the
    /// entry that triggered growth; a failure there is an algorithmic invariant violation, not
    /// a recoverable condition, and aborts.
    fn grow_and_insert(
        table: &mut RawTable<(K, V)>,
        hash_builder: &S,
        hash: u64,
        pair: (K, V),
    ) -> raw::Bucket {
        let old = mem::replace(table, RawTable::new());
        let mut new = RawTable::with_capacity((old.capacity() * 2).max(BASELINE_CAPACITY));
        Self::migrate(old, &mut new, hash_builder);
        let bucket = match new.insert(hash, pair) {
            Ok(bucket) => bucket,
            Err(_) => unreachable!("doubled table failed to place the entry that forced growth"),
        };
        *table = new;
        bucket
    }

    /// Moves every entry of `old` into `new`, which must be at least as large.
    fn migrate(old: RawTable<(K, V)>, new: &mut RawTable<(K, V)>, hash_builder: &S) {
        let hasher = make_hasher(hash_builder);
        for entry in old {
            let hash = hasher(&entry);
            assert!(
                new.insert(hash, entry).is_ok(),
                "replacement table ran out of room while migrating"
            );
        }
    }
}

impl<K, V, S> HopscotchMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Writes the map to `writer` as a positional byte stream.
    ///
    /// Layout: entry count, capacity, then every entry in table order, each through its serde
    /// implementation. There is no versioning or checksum; [`load`](Self::load) must be called
    /// with the same key and value types.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidewalk::HopscotchMap;
    ///
    /// let mut map = HopscotchMap::new();
    /// map.insert(1u32, String::from("one"));
    ///
    /// let mut bytes = Vec::new();
    /// map.save(&mut bytes).unwrap();
    ///
    /// let mut restored: HopscotchMap<u32, String> = HopscotchMap::new();
    /// restored.load(bytes.as_slice()).unwrap();
    /// assert_eq!(restored.get(&1).map(String::as_str), Some("one"));
    /// ```
    pub fn save<W>(&mut self, mut writer: W) -> bincode::Result<()>
    where
        W: io::Write,
        K: Serialize,
        V: Serialize,
    {
        let table = self.table.get_mut();
        bincode::serialize_into(&mut writer, &(table.len() as u64))?;
        bincode::serialize_into(&mut writer, &(table.capacity() as u64))?;
        for entry in table.iter() {
            bincode::serialize_into(&mut writer, entry)?;
        }
        Ok(())
    }

    /// Rebuilds the map from a stream written by [`save`](Self::save).
    ///
    /// The table is rebuilt at the saved capacity: if it differs from the current capacity the
    /// table is replaced outright, otherwise it is cleared in place. Entries are then re-added
    /// through the duplicate-checked insert path, which may grow past the saved capacity if the
    /// map's hasher distributes them differently than the saver's did. A truncated or malformed
    /// stream yields an error and may leave the map cleared or partially repopulated.
    pub fn load<R>(&mut self, mut reader: R) -> bincode::Result<()>
    where
        R: io::Read,
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let len: u64 = bincode::deserialize_from(&mut reader)?;
        let capacity: u64 = bincode::deserialize_from(&mut reader)?;
        let table = self.table.get_mut();
        if table.capacity() != capacity as usize {
            *table = RawTable::with_capacity(capacity as usize);
        } else {
            table.clear();
        }
        for _ in 0..len {
            let (key, value): (K, V) = bincode::deserialize_from(&mut reader)?;
            self.insert(key, value);
        }
        Ok(())
    }
}

impl<K, V, S: Default> Default for HopscotchMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K: Clone, V: Clone, S: Clone> Clone for HopscotchMap<K, V, S> {
    /// Deep-copies the entries into a fresh table of the same capacity.
    ///
    /// Safe to call while `_sync` operations run, but the copy is then only consistent one
    /// neighborhood at a time: entries written concurrently may or may not be included. The
    /// copy's `len` always matches its contents.
    fn clone(&self) -> Self {
        Self {
            table: RwLock::new(self.table.read().clone()),
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for HopscotchMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        self.table.read().for_each(|(k, v)| {
            map.entry(k, v);
        });
        map.finish()
    }
}

impl<K, V, S> IntoIterator for HopscotchMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        IntoIter {
            inner: self.table.into_inner().into_iter(),
        }
    }
}

/// Borrowing iterator over a map's entries, in unspecified order.
pub struct Iter<'a, K, V> {
    inner: raw::RawIter<'a, (K, V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| (&entry.0, &entry.1))
    }
}

impl<K, V> core::iter::FusedIterator for Iter<'_, K, V> {}

/// Consuming iterator over a map's entries, in unspecified order.
pub struct IntoIter<K, V> {
    inner: raw::RawIntoIter<(K, V)>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<K, V> core::iter::FusedIterator for IntoIter<K, V> {}
