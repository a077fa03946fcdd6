// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The uniform contract every spatial partition implements.

use core::hash::Hash;

use crate::error::Error;
use crate::items::Key;
use crate::types::{Aabb3D, Ray3D, Scalar};

/// Capability to report an item's current bounding box.
///
/// Partitions call this whenever they need an item's bounds: on `add`, and on `update`
/// with the item's new value. Item identity is the item's `Eq`/`Hash`, so an item whose
/// box changes must still compare equal to its previous value (typically by comparing an
/// id field only).
pub trait Bounded<T> {
    /// Current tight bounds of the item.
    fn aabb(&self) -> Aabb3D<T>;
}

impl<T, B: Bounded<T> + ?Sized> Bounded<T> for &B {
    #[inline]
    fn aabb(&self) -> Aabb3D<T> {
        (**self).aabb()
    }
}

/// Spatial partition over items of type `P` with `T` coordinates.
///
/// All queries are lazy, single-pass iterators that borrow the partition; the partition
/// cannot be mutated while one is alive. Result order is unspecified and never contains
/// duplicates.
pub trait SpatialPartition<T: Scalar, P: Bounded<T> + Clone + Eq + Hash> {
    /// Insert an item. Returns a stable handle `Key`.
    ///
    /// Fails with [`Error::DuplicateItem`] if an equal item is present and with
    /// [`Error::InvalidAabb`] if its bounds are not finite and ordered.
    fn add(&mut self, item: P) -> Result<Key, Error>;

    /// Remove an item, returning the stored value.
    ///
    /// Fails with [`Error::NotFound`] if no equal item is present.
    fn remove(&mut self, item: &P) -> Result<P, Error>;

    /// Store the item's new value and account for its (possibly) new bounds.
    ///
    /// Fails with [`Error::NotFound`] or [`Error::InvalidAabb`]; on failure the partition is
    /// unchanged.
    fn update(&mut self, item: P) -> Result<Key, Error>;

    /// Number of items.
    fn len(&self) -> usize;

    /// Whether the partition holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an equal item is present.
    fn contains(&self, item: &P) -> bool;

    /// Handle of a present item.
    fn key_of(&self, item: &P) -> Option<Key>;

    /// Item for a handle; `None` for stale or foreign handles.
    fn get(&self, key: Key) -> Option<&P>;

    /// Remove every item.
    fn clear(&mut self);

    /// Rebuild the structure from scratch from the current items.
    ///
    /// Transactional: on [`Error::Allocation`] the previous structure is kept.
    fn rebuild(&mut self) -> Result<(), Error>;

    /// Every item with its last-known tight bounds.
    fn items<'a>(&'a self) -> impl Iterator<Item = (&'a P, Aabb3D<T>)>
    where
        P: 'a;

    /// Items whose bounds overlap `aabb`.
    fn query_aabb<'a>(&'a self, aabb: Aabb3D<T>) -> impl Iterator<Item = &'a P>
    where
        P: 'a;

    /// Items hit by the segment `ray.origin + t * ray.dir` for `t` in `[0, max_len]`.
    fn query_ray<'a>(&'a self, ray: Ray3D<T>, max_len: T) -> impl Iterator<Item = &'a P>
    where
        P: 'a;

    /// Items whose bounds contain the point.
    fn query_point<'a>(&'a self, point: [T; 3]) -> impl Iterator<Item = &'a P>
    where
        P: 'a,
    {
        self.query_aabb(Aabb3D::from_point(point))
    }

    /// Every unordered pair of items whose bounds overlap, each reported once.
    fn pairs<'a>(&'a self) -> impl Iterator<Item = (&'a P, &'a P)>
    where
        P: 'a;

    /// Every pair `(mine, theirs)` whose bounds overlap.
    ///
    /// Works against any other partition by querying it with each of this partition's
    /// items; trees also offer a dual-tree traversal against a tree of the same kind.
    fn pairs_with<'a, Q, O>(&'a self, other: &'a O) -> impl Iterator<Item = (&'a P, &'a Q)>
    where
        Q: Bounded<T> + Clone + Eq + Hash + 'a,
        O: SpatialPartition<T, Q>,
        P: 'a,
        T: 'a,
    {
        self.items()
            .flat_map(move |(mine, aabb)| other.query_aabb(aabb).map(move |theirs| (mine, theirs)))
    }

    /// Visit items whose bounds overlap `aabb` (does not allocate result storage).
    fn visit_aabb<'a, F: FnMut(&P)>(&'a self, aabb: Aabb3D<T>, mut f: F)
    where
        P: 'a,
    {
        for item in self.query_aabb(aabb) {
            f(item);
        }
    }

    /// Visit every overlapping pair (does not allocate result storage).
    fn visit_pairs<'a, F: FnMut(&P, &P)>(&'a self, mut f: F)
    where
        P: 'a,
    {
        for (a, b) in self.pairs() {
            f(a, b);
        }
    }
}
