// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Static bounding volume hierarchy built top-down.
//!
//! [`AabbTree`] is built once from a complete item set with SAH splits and gives the best
//! query performance of the tree family. Incremental `add`/`remove`/`update` are
//! supported (best-fit insertion, sibling promotion) but never rotate, so balance decays
//! under churn; call [`rebuild`][SpatialPartition::rebuild] to restore it.

use core::fmt::Debug;
use core::hash::Hash;

use crate::backends::indexed::Indexed;
use crate::backends::tree::TreeQuality;
use crate::error::Error;
use crate::items::{Key, checked_aabb};
use crate::partition::{Bounded, SpatialPartition};
use crate::types::{Aabb3D, Ray3D, Scalar, ScalarAcc};

/// A statically built AABB tree.
///
/// ```rust
/// use understory_partition::{Aabb3D, Bounded, SpatialPartition};
/// use understory_partition::backends::AabbTree;
///
/// #[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// struct Crate(u32);
///
/// impl Bounded<f32> for Crate {
///     fn aabb(&self) -> Aabb3D<f32> {
///         let x = self.0 as f32 * 2.0;
///         Aabb3D::new([x, 0.0, 0.0], [x + 1.5, 1.0, 1.0])
///     }
/// }
///
/// let tree = AabbTree::<f32, _>::from_items((0..8).map(Crate)).unwrap();
/// let hits: Vec<_> = tree.query_point([2.5, 0.5, 0.5]).collect();
/// assert_eq!(hits, [&Crate(1)]);
/// assert_eq!(tree.pairs().count(), 0);
/// ```
pub struct AabbTree<T: Scalar, P> {
    inner: Indexed<T, P>,
}

impl<T: Scalar, P> Default for AabbTree<T, P> {
    fn default() -> Self {
        Self {
            inner: Indexed::default(),
        }
    }
}

impl<T: Scalar, P> Debug for AabbTree<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AabbTree")
            .field("items", &self.inner.items)
            .field("tree", &self.inner.tree)
            .finish()
    }
}

impl<T, P> AabbTree<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a balanced tree from a complete item set.
    pub fn from_items<I: IntoIterator<Item = P>>(items: I) -> Result<Self, Error> {
        let mut tree = Self::new();
        tree.inner.register_all(items)?;
        tree.inner.rebuild_with(|b| b)?;
        Ok(tree)
    }

    /// Pairs between this tree and another static tree, by simultaneous descent.
    pub fn pairs_with_tree<'a, Q>(
        &'a self,
        other: &'a AabbTree<T, Q>,
    ) -> impl Iterator<Item = (&'a P, &'a Q)>
    where
        Q: Bounded<T> + Clone + Eq + Hash,
    {
        self.inner.cross_pairs(&other.inner)
    }

    /// Depth statistics of the current tree.
    pub fn quality(&self) -> TreeQuality<ScalarAcc<T>> {
        self.inner.quality()
    }
}

impl<T, P> SpatialPartition<T, P> for AabbTree<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    fn add(&mut self, item: P) -> Result<Key, Error> {
        let tree = &mut self.inner.tree;
        self.inner
            .items
            .insert_with(item, |slot, aabb| tree.insert_leaf(slot, aabb, false))
    }

    fn remove(&mut self, item: &P) -> Result<P, Error> {
        let (_, entry) = self.inner.items.remove(item)?;
        self.inner.tree.remove_leaf(entry.data, false);
        Ok(entry.item)
    }

    fn update(&mut self, item: P) -> Result<Key, Error> {
        let slot = self.inner.items.slot_of(&item)?;
        let aabb = checked_aabb(&item)?;
        let entry = self.inner.items.entry(slot);
        if entry.aabb != aabb {
            self.inner.tree.move_leaf(entry.data, aabb, false);
        }
        Ok(self.inner.items.replace(slot, item, aabb))
    }

    fn len(&self) -> usize {
        self.inner.items.len()
    }

    fn contains(&self, item: &P) -> bool {
        self.inner.items.contains(item)
    }

    fn key_of(&self, item: &P) -> Option<Key> {
        self.inner.items.key_of(item)
    }

    fn get(&self, key: Key) -> Option<&P> {
        self.inner.items.get(key)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn rebuild(&mut self) -> Result<(), Error> {
        self.inner.rebuild_with(|b| b)
    }

    fn items<'a>(&'a self) -> impl Iterator<Item = (&'a P, Aabb3D<T>)>
    where
        P: 'a,
    {
        self.inner.items()
    }

    fn query_aabb<'a>(&'a self, aabb: Aabb3D<T>) -> impl Iterator<Item = &'a P>
    where
        P: 'a,
    {
        self.inner.query_aabb(aabb)
    }

    fn query_ray<'a>(&'a self, ray: Ray3D<T>, max_len: T) -> impl Iterator<Item = &'a P>
    where
        P: 'a,
    {
        self.inner.query_ray(ray, max_len)
    }

    fn pairs<'a>(&'a self) -> impl Iterator<Item = (&'a P, &'a P)>
    where
        P: 'a,
    {
        self.inner.pairs()
    }
}

/// Static tree with f32 coordinates and f64 metrics.
pub type AabbTreeF32<P> = AabbTree<f32, P>;

/// Static tree with f64 coordinates and f64 metrics.
pub type AabbTreeF64<P> = AabbTree<f64, P>;
