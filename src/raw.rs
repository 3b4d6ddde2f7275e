//! The fixed-capacity neighborhood table that backs the map.
//!
//! A [`RawTable`] is an open-addressing slot table whose capacity never changes. Every element
//! has a *home neighborhood* — an aligned group of [`NEIGHBORHOOD`] slots selected by its hash —
//! and may occupy any slot in that neighborhood but no other. That bound is what makes the rest
//! of the crate work: lookups probe at most one neighborhood, an insert either finds a free slot
//! in the neighborhood or *fails* (it never degrades into an unbounded probe sequence), and a
//! point operation can be made thread-safe by locking that one neighborhood.
//!
//! The table knows nothing about keys, values, or hash functions. Callers pass in precomputed
//! hashes and equality predicates; the map layer projects its `(key, value)` pairs down to keys
//! before calling in here.
//!
//! There are two ways to talk to a `RawTable`, mirroring the map's two API planes:
//!
//!  - `&mut self` operations ([`find`], [`insert`], [`erase`], [`iter`], ...) reach the slots
//!    through [`RwLock::get_mut`] and therefore never lock anything.
//!  - `&self` operations ([`put_sync`], [`get_sync`], [`erase_sync`], [`for_each`]) take the
//!    affected neighborhood's lock, and are safe to call from any number of threads at once.
//!    Because the whole neighborhood is locked for the duration of a point operation, the
//!    `_sync` operations are linearizable per key.
//!
//! Failed placements surface as `Err(value)`, handing the rejected element back to the caller.
//! The table does not resize itself and it does not check for duplicates; both are the map
//! layer's job.
//!
//! [`find`]: RawTable::find
//! [`insert`]: RawTable::insert
//! [`erase`]: RawTable::erase
//! [`iter`]: RawTable::iter
//! [`put_sync`]: RawTable::put_sync
//! [`get_sync`]: RawTable::get_sync
//! [`erase_sync`]: RawTable::erase_sync
//! [`for_each`]: RawTable::for_each
//! [`RwLock::get_mut`]: parking_lot::RwLock::get_mut

use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::RwLock;

/// Number of slots in one neighborhood.
///
/// An element whose neighborhood holds 32 other elements cannot be placed, full stop, so this
/// width bounds the cost of every probe. It also has to be wide enough that a table at twice
/// the capacity of a just-failed one can always re-place every element; 32 gives that a very
/// comfortable statistical margin for any reasonable hasher.
pub const NEIGHBORHOOD: usize = 32;

/// One aligned group of slots plus the lock that guards it during shared-mode access.
struct Neighborhood<T> {
    slots: RwLock<[Option<T>; NEIGHBORHOOD]>,
}

impl<T> Neighborhood<T> {
    fn empty() -> Self {
        Neighborhood {
            slots: RwLock::new([(); NEIGHBORHOOD].map(|()| None)),
        }
    }
}

/// A handle to an occupied slot in a [`RawTable`].
///
/// Only meaningful for the table that produced it, and only until that table is next mutated.
#[derive(Clone, Copy)]
pub struct Bucket {
    group: usize,
    slot: usize,
}

/// A fixed-capacity neighborhood hash table.
///
/// See the [module documentation](self) for the contract.
pub struct RawTable<T> {
    groups: Box<[Neighborhood<T>]>,
    /// `groups.len() - 1`; group count is always a power of two.
    mask: usize,
    /// Maintained atomically so `&self` operations can keep it current.
    len: AtomicUsize,
}

impl<T> RawTable<T> {
    /// Creates a table with no capacity at all, without allocating.
    ///
    /// Every operation on it reports a miss or a placement failure. Useful as a placeholder
    /// while swapping a real table out from behind a reference.
    #[cfg_attr(feature = "inline-more", inline)]
    pub fn new() -> Self {
        Self {
            groups: Box::from([]),
            mask: 0,
            len: AtomicUsize::new(0),
        }
    }

    /// Allocates a table that can hold at least `capacity` elements.
    ///
    /// The actual capacity is rounded up to a power-of-two number of neighborhoods.
    pub fn with_capacity(capacity: usize) -> Self {
        let groups = ((capacity + NEIGHBORHOOD - 1) / NEIGHBORHOOD)
            .max(1)
            .next_power_of_two();
        Self {
            groups: (0..groups).map(|_| Neighborhood::empty()).collect(),
            mask: groups - 1,
            len: AtomicUsize::new(0),
        }
    }

    #[cfg_attr(feature = "inline-more", inline)]
    fn group_of(&self, hash: u64) -> usize {
        hash as usize & self.mask
    }

    /// Returns the number of elements in the table.
    #[cfg_attr(feature = "inline-more", inline)]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns true if the table holds no elements.
    #[cfg_attr(feature = "inline-more", inline)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots in the table.
    #[cfg_attr(feature = "inline-more", inline)]
    pub fn capacity(&self) -> usize {
        self.groups.len() * NEIGHBORHOOD
    }

    /// Returns the fraction of slots that are occupied.
    pub fn load_factor(&self) -> f64 {
        if self.groups.is_empty() {
            0.0
        } else {
            self.len() as f64 / self.capacity() as f64
        }
    }

    /// Searches the element's neighborhood for a match.
    #[cfg_attr(feature = "inline-more", inline)]
    pub fn find(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<Bucket> {
        if self.groups.is_empty() {
            return None;
        }
        let group = self.group_of(hash);
        let slots = self.groups[group].slots.get_mut();
        for (slot, entry) in slots.iter().enumerate() {
            if let Some(entry) = entry {
                if eq(entry) {
                    return Some(Bucket { group, slot });
                }
            }
        }
        None
    }

    /// Returns a mutable reference to the element a [`find`](Self::find) produced.
    #[cfg_attr(feature = "inline-more", inline)]
    pub fn entry_mut(&mut self, bucket: Bucket) -> &mut T {
        match self.groups[bucket.group].slots.get_mut()[bucket.slot] {
            Some(ref mut entry) => entry,
            None => unreachable!("invalid bucket state"),
        }
    }

    /// Places an element in its neighborhood.
    ///
    /// Fails with `Err(value)` when the neighborhood is full; the caller decides whether that
    /// means growing a replacement table or giving up.
    ///
    /// This does **not** check whether an equal element is already present. Callers that need
    /// uniqueness must run [`find`](Self::find) first.
    #[cfg_attr(feature = "inline-more", inline)]
    pub fn insert(&mut self, hash: u64, value: T) -> Result<Bucket, T> {
        if self.groups.is_empty() {
            return Err(value);
        }
        let group = self.group_of(hash);
        let slots = self.groups[group].slots.get_mut();
        for (slot, entry) in slots.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(value);
                *self.len.get_mut() += 1;
                return Ok(Bucket { group, slot });
            }
        }
        Err(value)
    }

    /// Removes and returns the first element in the neighborhood matching `eq`.
    pub fn erase(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<T> {
        if self.groups.is_empty() {
            return None;
        }
        let group = self.group_of(hash);
        let slots = self.groups[group].slots.get_mut();
        for entry in slots.iter_mut() {
            if entry.as_ref().map_or(false, |e| eq(e)) {
                *self.len.get_mut() -= 1;
                return entry.take();
            }
        }
        None
    }

    /// Empties every slot, keeping the allocation.
    pub fn clear(&mut self) {
        for group in self.groups.iter_mut() {
            for slot in group.slots.get_mut().iter_mut() {
                *slot = None;
            }
        }
        *self.len.get_mut() = 0;
    }

    /// Inserts or replaces an element under the neighborhood lock.
    ///
    /// `eq` compares a resident element against the incoming one; on a match the resident is
    /// replaced (last writer wins). Otherwise the element takes a free slot. Fails with
    /// `Err(value)` when the neighborhood is full and holds no match — the fixed capacity has
    /// been exhausted for this hash, and only the exclusive-access paths can fix that.
    ///
    /// Safe to call concurrently with any other `_sync` operation.
    pub fn put_sync(
        &self,
        hash: u64,
        value: T,
        mut eq: impl FnMut(&T, &T) -> bool,
    ) -> Result<(), T> {
        if self.groups.is_empty() {
            return Err(value);
        }
        let group = self.group_of(hash);
        let mut slots = self.groups[group].slots.write();
        let mut free = None;
        for slot in 0..NEIGHBORHOOD {
            match &slots[slot] {
                Some(resident) => {
                    if eq(resident, &value) {
                        slots[slot] = Some(value);
                        return Ok(());
                    }
                }
                None => {
                    if free.is_none() {
                        free = Some(slot);
                    }
                }
            }
        }
        match free {
            Some(slot) => {
                slots[slot] = Some(value);
                self.len.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Applies `read` to the first element matching `eq`, under the neighborhood lock.
    ///
    /// The result is a snapshot: no reference to the element escapes the lock. Safe to call
    /// concurrently with any other `_sync` operation.
    pub fn get_sync<U>(
        &self,
        hash: u64,
        mut eq: impl FnMut(&T) -> bool,
        read: impl FnOnce(&T) -> U,
    ) -> Option<U> {
        if self.groups.is_empty() {
            return None;
        }
        let slots = self.groups[self.group_of(hash)].slots.read();
        let found = slots.iter().flatten().find(|&e| eq(e))?;
        Some(read(found))
    }

    /// Removes the first element matching `eq`, under the neighborhood lock.
    ///
    /// Safe to call concurrently with any other `_sync` operation.
    pub fn erase_sync(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> bool {
        if self.groups.is_empty() {
            return false;
        }
        let mut slots = self.groups[self.group_of(hash)].slots.write();
        for slot in 0..NEIGHBORHOOD {
            if slots[slot].as_ref().map_or(false, |e| eq(e)) {
                slots[slot] = None;
                self.len.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Visits every element, read-locking one neighborhood at a time.
    ///
    /// Safe to call concurrently with the `_sync` operations. Elements inserted or removed by
    /// other threads while the traversal runs may or may not be visited.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for group in self.groups.iter() {
            let slots = group.slots.read();
            for entry in slots.iter().flatten() {
                f(entry);
            }
        }
    }

    /// Iterates over every element. Order is unspecified but complete.
    pub fn iter(&mut self) -> RawIter<'_, T> {
        RawIter {
            groups: self.groups.iter_mut(),
            slots: None,
        }
    }
}

impl<T> Default for RawTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for RawTable<T> {
    /// Snapshots each neighborhood under its read lock.
    ///
    /// The copy's `len` is counted from the snapshotted slots, not read from the source's
    /// counter: under concurrent `_sync` mutation the two can disagree, and the copy must be
    /// internally consistent. Each neighborhood is copied at a single instant, but different
    /// neighborhoods may be copied at different instants.
    fn clone(&self) -> Self {
        let mut len = 0;
        let groups: Box<[Neighborhood<T>]> = self
            .groups
            .iter()
            .map(|group| {
                let slots = group.slots.read().clone();
                len += slots.iter().flatten().count();
                Neighborhood {
                    slots: RwLock::new(slots),
                }
            })
            .collect();
        Self {
            groups,
            mask: self.mask,
            len: AtomicUsize::new(len),
        }
    }
}

impl<T> IntoIterator for RawTable<T> {
    type Item = T;
    type IntoIter = RawIntoIter<T>;

    fn into_iter(self) -> RawIntoIter<T> {
        RawIntoIter {
            groups: self.groups.into_vec().into_iter(),
            slots: None,
        }
    }
}

/// Borrowing iterator over a table's elements, in unspecified order.
pub struct RawIter<'a, T> {
    groups: core::slice::IterMut<'a, Neighborhood<T>>,
    slots: Option<core::slice::Iter<'a, Option<T>>>,
}

impl<'a, T> Iterator for RawIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        loop {
            match self.slots.as_mut().and_then(|s| s.next()) {
                Some(Some(entry)) => return Some(entry),
                Some(None) => continue,
                None => {
                    let group = self.groups.next()?;
                    self.slots = Some(group.slots.get_mut().iter());
                }
            }
        }
    }
}

impl<T> core::iter::FusedIterator for RawIter<'_, T> {}

/// Consuming iterator over a table's elements, in unspecified order.
pub struct RawIntoIter<T> {
    groups: std::vec::IntoIter<Neighborhood<T>>,
    slots: Option<core::array::IntoIter<Option<T>, NEIGHBORHOOD>>,
}

impl<T> Iterator for RawIntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            match self.slots.as_mut().and_then(|s| s.next()) {
                Some(Some(entry)) => return Some(entry),
                Some(None) => continue,
                None => {
                    let group = self.groups.next()?;
                    self.slots = Some(group.slots.into_inner().into_iter());
                }
            }
        }
    }
}

impl<T> core::iter::FusedIterator for RawIntoIter<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    // Two neighborhoods; even hashes land in group 0, odd in group 1.
    fn table() -> RawTable<u64> {
        RawTable::with_capacity(2 * NEIGHBORHOOD)
    }

    #[test]
    fn capacity_rounds_to_neighborhoods() {
        assert_eq!(RawTable::<u64>::with_capacity(0).capacity(), NEIGHBORHOOD);
        assert_eq!(RawTable::<u64>::with_capacity(1).capacity(), NEIGHBORHOOD);
        assert_eq!(
            RawTable::<u64>::with_capacity(NEIGHBORHOOD + 1).capacity(),
            2 * NEIGHBORHOOD
        );
        assert_eq!(RawTable::<u64>::with_capacity(100).capacity(), 128);
    }

    #[test]
    fn placeholder_rejects_everything() {
        let mut t = RawTable::new();
        assert_eq!(t.capacity(), 0);
        assert_eq!(t.load_factor(), 0.0);
        assert_eq!(t.insert(0, 1u64).err(), Some(1));
        assert!(t.find(0, |_| true).is_none());
        assert!(t.erase(0, |_| true).is_none());
        assert_eq!(t.put_sync(0, 1u64, |a, b| a == b).err(), Some(1));
        assert!(t.get_sync(0, |_| true, |&v| v).is_none());
        assert!(!t.erase_sync(0, |_| true));
    }

    #[test]
    fn insert_fails_when_neighborhood_full() {
        let mut t = table();
        for i in 0..NEIGHBORHOOD as u64 {
            assert!(t.insert(0, i).is_ok());
        }
        // Group 0 is full; group 1 still has room.
        assert_eq!(t.insert(0, 99).err(), Some(99));
        assert!(t.insert(1, 99).is_ok());
        assert_eq!(t.len(), NEIGHBORHOOD + 1);
    }

    #[test]
    fn find_and_erase() {
        let mut t = table();
        t.insert(0, 10).unwrap();
        t.insert(0, 12).unwrap();
        let b = t.find(0, |&v| v == 12).expect("present");
        assert_eq!(*t.entry_mut(b), 12);
        assert!(t.find(0, |&v| v == 13).is_none());
        // Same hash, different element: erase must be eq-driven.
        assert_eq!(t.erase(0, |&v| v == 10), Some(10));
        assert_eq!(t.erase(0, |&v| v == 10), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn put_sync_is_an_upsert() {
        let t: RawTable<(u64, u64)> = RawTable::with_capacity(2 * NEIGHBORHOOD);
        assert_eq!(t.put_sync(2, (7u64, 1u64), |a, b| a.0 == b.0), Ok(()));
        assert_eq!(t.put_sync(2, (7, 2), |a, b| a.0 == b.0), Ok(()));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get_sync(2, |e| e.0 == 7, |e| e.1), Some(2));
        assert!(t.erase_sync(2, |e| e.0 == 7));
        assert!(!t.erase_sync(2, |e| e.0 == 7));
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn put_sync_reports_exhaustion() {
        let t = RawTable::with_capacity(NEIGHBORHOOD);
        for i in 0..NEIGHBORHOOD as u64 {
            assert_eq!(t.put_sync(0, i, |a, b| a == b), Ok(()));
        }
        assert_eq!(t.put_sync(0, 100, |a, b| a == b).err(), Some(100));
        // Replacing a resident still works on a full neighborhood.
        assert_eq!(t.put_sync(0, 3, |a, b| a == b), Ok(()));
        assert_eq!(t.len(), NEIGHBORHOOD);
    }

    #[test]
    fn iteration_is_complete() {
        let mut t = table();
        for i in 0..40u64 {
            t.insert(i, i).unwrap();
        }
        let mut seen: Vec<u64> = t.iter().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());

        let mut drained: Vec<u64> = t.into_iter().collect();
        drained.sort_unstable();
        assert_eq!(drained, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn clone_preserves_layout() {
        let mut t = table();
        for i in 0..10u64 {
            t.insert(i, i).unwrap();
        }
        let mut c = t.clone();
        assert_eq!(c.len(), 10);
        assert_eq!(c.capacity(), t.capacity());
        for i in 0..10u64 {
            assert!(c.find(i, |&v| v == i).is_some());
        }
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut t = table();
        for i in 0..20u64 {
            t.insert(i, i).unwrap();
        }
        t.clear();
        assert_eq!(t.len(), 0);
        assert_eq!(t.capacity(), 2 * NEIGHBORHOOD);
        assert!(t.find(3, |_| true).is_none());
    }
}
