// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational item registry shared by every partition.
//!
//! The registry owns the caller's items, their last-known tight bounds, and a small piece
//! of per-slot data belonging to the structure (a leaf node, endpoint positions, ...).
//! Structures refer to items by *slot*; callers refer to them by value or by [`Key`].

use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::Hash;

use hashbrown::HashMap;

use crate::error::Error;
use crate::partition::Bounded;
use crate::types::{Aabb3D, Scalar};

/// Generational handle for items.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key(u32, u32);

impl Key {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Item keys are intentionally 32-bit; higher bits are truncated by design."
    )]
    const fn new(idx: usize, generation: u32) -> Self {
        Self(idx as u32, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Entry<T, P, D> {
    pub(crate) item: P,
    /// Tight bounds as of the last `add`/`update`.
    pub(crate) aabb: Aabb3D<T>,
    pub(crate) data: D,
}

/// Read the item's bounds, rejecting NaN, infinite, or inverted boxes.
pub(crate) fn checked_aabb<T: Scalar, P: Bounded<T>>(item: &P) -> Result<Aabb3D<T>, Error> {
    let aabb = item.aabb();
    if aabb.is_valid() {
        Ok(aabb)
    } else {
        Err(Error::InvalidAabb)
    }
}

pub(crate) struct Items<T, P, D> {
    entries: Vec<Option<Entry<T, P, D>>>,
    /// Last generation per slot (persists across frees).
    generations: Vec<u32>,
    free_list: Vec<usize>,
    lookup: HashMap<P, Key>,
}

impl<T, P, D> Default for Items<T, P, D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            lookup: HashMap::new(),
        }
    }
}

impl<T, P, D> Debug for Items<T, P, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Items")
            .field("slots_total", &self.entries.len())
            .field("alive", &self.lookup.len())
            .field("free_list", &self.free_list.len())
            .finish_non_exhaustive()
    }
}

impl<T, P, D> Items<T, P, D>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    pub(crate) fn len(&self) -> usize {
        self.lookup.len()
    }

    pub(crate) fn contains(&self, item: &P) -> bool {
        self.lookup.contains_key(item)
    }

    pub(crate) fn key_of(&self, item: &P) -> Option<Key> {
        self.lookup.get(item).copied()
    }

    /// Slot of a present item.
    pub(crate) fn slot_of(&self, item: &P) -> Result<usize, Error> {
        self.lookup
            .get(item)
            .map(|k| k.idx())
            .ok_or(Error::NotFound)
    }

    pub(crate) fn key(&self, slot: usize) -> Key {
        Key::new(slot, self.generations[slot])
    }

    /// Register a new item.
    ///
    /// Validates the item and its bounds first; only then is `data` called with the
    /// chosen slot to produce the structure's per-slot data.
    pub(crate) fn insert_with(
        &mut self,
        item: P,
        data: impl FnOnce(usize, Aabb3D<T>) -> D,
    ) -> Result<Key, Error> {
        if self.lookup.contains_key(&item) {
            return Err(Error::DuplicateItem);
        }
        let aabb = checked_aabb(&item)?;
        let slot = if let Some(slot) = self.free_list.pop() {
            self.generations[slot] = self.generations[slot].wrapping_add(1);
            slot
        } else {
            self.entries.push(None);
            self.generations.push(1);
            self.entries.len() - 1
        };
        let key = Key::new(slot, self.generations[slot]);
        let data = data(slot, aabb);
        let _ = self.lookup.insert(item.clone(), key);
        self.entries[slot] = Some(Entry { item, aabb, data });
        Ok(key)
    }

    /// Unregister an item and hand back its slot and entry.
    pub(crate) fn remove(&mut self, item: &P) -> Result<(usize, Entry<T, P, D>), Error> {
        let key = self.lookup.remove(item).ok_or(Error::NotFound)?;
        let slot = key.idx();
        let entry = self.entries[slot]
            .take()
            .expect("registry invariant violated: lookup references vacant slot");
        self.free_list.push(slot);
        Ok((slot, entry))
    }

    /// Store a new value (and its bounds) for the item occupying `slot`.
    pub(crate) fn replace(&mut self, slot: usize, item: P, aabb: Aabb3D<T>) -> Key {
        let entry = self.entry_mut(slot);
        entry.item = item;
        entry.aabb = aabb;
        self.key(slot)
    }

    pub(crate) fn entry(&self, slot: usize) -> &Entry<T, P, D> {
        self.entries
            .get(slot)
            .and_then(Option::as_ref)
            .expect("registry invariant violated: structure references vacant slot")
    }

    pub(crate) fn entry_mut(&mut self, slot: usize) -> &mut Entry<T, P, D> {
        self.entries
            .get_mut(slot)
            .and_then(Option::as_mut)
            .expect("registry invariant violated: structure references vacant slot")
    }

    pub(crate) fn get(&self, key: Key) -> Option<&P> {
        if self.generations.get(key.idx()) != Some(&key.1) {
            return None;
        }
        self.entries.get(key.idx())?.as_ref().map(|e| &e.item)
    }

    /// Live entries with their slots, in slot order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &Entry<T, P, D>)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(slot, e)| e.as_ref().map(|e| (slot, e)))
    }

    /// Slots and bounds of every live item, for bulk builds.
    pub(crate) fn slot_boxes(&self) -> Result<Vec<(usize, Aabb3D<T>)>, Error> {
        let mut out = Vec::new();
        out.try_reserve_exact(self.len())?;
        out.extend(self.iter().map(|(slot, e)| (slot, e.aabb)));
        Ok(out)
    }

    /// Drop every item. Generations are kept so stale keys never resolve.
    pub(crate) fn clear(&mut self) {
        for (slot, e) in self.entries.iter_mut().enumerate() {
            if e.take().is_some() {
                self.free_list.push(slot);
            }
        }
        self.lookup.clear();
    }
}
