// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incrementally balanced AABB tree with fattened leaves.
//!
//! Leaves hold the item's tight box grown by [`DynamicConfig::margin`]. An `update` whose new
//! tight box still fits inside the leaf's fat box only touches the registry; otherwise the
//! leaf is detached, refattened and reinserted with best-fit descent and height rotations.

use core::fmt::Debug;
use core::hash::Hash;

use tracing::trace;

use crate::backends::indexed::Indexed;
use crate::backends::tree::TreeQuality;
use crate::error::Error;
use crate::items::{Key, checked_aabb};
use crate::partition::{Bounded, SpatialPartition};
use crate::types::{Aabb3D, Ray3D, Scalar, ScalarAcc};

/// Tuning for [`DynamicAabbTree`].
///
/// A margin that is negative or not finite would shrink leaves below their items, so the
/// tree replaces it with zero.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DynamicConfig<T> {
    /// Distance added on every side of a tight box to form the leaf's fat box.
    pub margin: T,
    /// Apply height rotations on the path to the root after every structural change.
    pub balance: bool,
}

impl<T: Scalar> Default for DynamicConfig<T> {
    fn default() -> Self {
        Self {
            margin: T::from_f64(0.1),
            balance: true,
        }
    }
}

/// AABB tree for moving items.
///
/// ```rust
/// use core::hash::{Hash, Hasher};
/// use understory_partition::{Aabb3D, Bounded, SpatialPartition};
/// use understory_partition::backends::{DynamicAabbTree, DynamicConfig};
///
/// #[derive(Clone, Debug)]
/// struct Ball { id: u32, x: f64 }
///
/// impl PartialEq for Ball {
///     fn eq(&self, other: &Self) -> bool { self.id == other.id }
/// }
/// impl Eq for Ball {}
/// impl Hash for Ball {
///     fn hash<H: Hasher>(&self, state: &mut H) { self.id.hash(state) }
/// }
/// impl Bounded<f64> for Ball {
///     fn aabb(&self) -> Aabb3D<f64> {
///         Aabb3D::new([self.x - 0.5, -0.5, -0.5], [self.x + 0.5, 0.5, 0.5])
///     }
/// }
///
/// let mut tree = DynamicAabbTree::with_config(DynamicConfig { margin: 0.25, balance: true });
/// tree.add(Ball { id: 1, x: 0.0 }).unwrap();
/// tree.add(Ball { id: 2, x: 3.0 }).unwrap();
/// assert_eq!(tree.pairs().count(), 0);
///
/// tree.update(Ball { id: 2, x: 0.8 }).unwrap();
/// assert_eq!(tree.pairs().count(), 1);
/// ```
pub struct DynamicAabbTree<T: Scalar, P> {
    pub(crate) inner: Indexed<T, P>,
    config: DynamicConfig<T>,
}

impl<T: Scalar> DynamicConfig<T> {
    /// The same tuning with an unusable margin replaced by zero.
    pub(crate) fn sanitized(self) -> Self {
        let usable = T::is_finite(self.margin) && self.margin >= T::zero();
        Self {
            margin: if usable { self.margin } else { T::zero() },
            ..self
        }
    }
}

impl<T: Scalar, P> Default for DynamicAabbTree<T, P> {
    fn default() -> Self {
        Self::with_config(DynamicConfig::default())
    }
}

impl<T: Scalar, P> Debug for DynamicAabbTree<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DynamicAabbTree")
            .field("config", &self.config)
            .field("items", &self.inner.items)
            .field("tree", &self.inner.tree)
            .finish()
    }
}

impl<T: Scalar, P> DynamicAabbTree<T, P> {
    /// Create an empty tree with the given tuning.
    ///
    /// A negative or non-finite `margin` is treated as zero.
    pub fn with_config(config: DynamicConfig<T>) -> Self {
        Self {
            inner: Indexed::default(),
            config: config.sanitized(),
        }
    }

    /// Current tuning.
    pub const fn config(&self) -> &DynamicConfig<T> {
        &self.config
    }
}

impl<T, P> DynamicAabbTree<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    /// Create an empty tree with default tuning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load items with a top-down build instead of one insertion each.
    pub fn from_items<I: IntoIterator<Item = P>>(
        config: DynamicConfig<T>,
        items: I,
    ) -> Result<Self, Error> {
        let mut tree = Self::with_config(config);
        tree.inner.register_all(items)?;
        tree.rebuild()?;
        Ok(tree)
    }

    /// Like [`update`][SpatialPartition::update], but when the leaf has to be reinserted its
    /// fat box is also stretched by `displacement`, the expected motion until the next update.
    pub fn update_with_displacement(&mut self, item: P, displacement: [T; 3]) -> Result<Key, Error> {
        self.update_inner(item, Some(displacement)).map(|(key, _)| key)
    }

    /// Pairs between this tree and another dynamic tree, by simultaneous descent.
    pub fn pairs_with_tree<'a, Q>(
        &'a self,
        other: &'a DynamicAabbTree<T, Q>,
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

    fn fat_box(&self, aabb: Aabb3D<T>, displacement: Option<[T; 3]>) -> Aabb3D<T> {
        let mut fat = aabb.fattened(self.config.margin);
        if let Some(d) = displacement {
            for (a, d) in d.into_iter().enumerate() {
                if d < T::zero() {
                    fat.min[a] = T::add(fat.min[a], d);
                } else {
                    fat.max[a] = T::add(fat.max[a], d);
                }
            }
        }
        fat
    }

    /// Shared `update` path; the flag reports whether the tree was restructured.
    pub(crate) fn update_inner(
        &mut self,
        item: P,
        displacement: Option<[T; 3]>,
    ) -> Result<(Key, bool), Error> {
        let slot = self.inner.items.slot_of(&item)?;
        let aabb = checked_aabb(&item)?;
        let leaf = self.inner.items.entry(slot).data;
        let escaped = !self.inner.tree.node(leaf).bbox.contains(&aabb);
        if escaped {
            let fat = self.fat_box(aabb, displacement);
            if !fat.is_valid() {
                return Err(Error::InvalidAabb);
            }
            trace!(slot, "item left its fat box; reinserting leaf");
            self.inner.tree.move_leaf(leaf, fat, self.config.balance);
        }
        Ok((self.inner.items.replace(slot, item, aabb), escaped))
    }
}

impl<T, P> SpatialPartition<T, P> for DynamicAabbTree<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    fn add(&mut self, item: P) -> Result<Key, Error> {
        let DynamicConfig { margin, balance } = self.config;
        let tree = &mut self.inner.tree;
        self.inner.items.insert_with(item, |slot, aabb| {
            tree.insert_leaf(slot, aabb.fattened(margin), balance)
        })
    }

    fn remove(&mut self, item: &P) -> Result<P, Error> {
        let (_, entry) = self.inner.items.remove(item)?;
        self.inner.tree.remove_leaf(entry.data, self.config.balance);
        Ok(entry.item)
    }

    fn update(&mut self, item: P) -> Result<Key, Error> {
        self.update_inner(item, None).map(|(key, _)| key)
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
        let margin = self.config.margin;
        self.inner.rebuild_with(|b| b.fattened(margin))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Body, boxed, brute_force_pairs, random_scene, sorted_pairs};
    use alloc::vec::Vec;

    fn config(margin: f64) -> DynamicConfig<f64> {
        DynamicConfig {
            margin,
            balance: true,
        }
    }

    #[test]
    fn small_motion_stays_inside_fat_box() {
        let mut tree = DynamicAabbTree::with_config(config(0.5));
        for i in 0..16 {
            let _ = tree.add(Body::new(i, boxed([i as f64 * 3., 0., 0.], 1.))).unwrap();
        }
        let (_, fat_before) = tree.inner.boxes_of(&Body::new(7, boxed([0.; 3], 0.))).unwrap();

        let (_, restructured) = tree
            .update_inner(Body::new(7, boxed([21.3, 0.2, -0.4], 1.)), None)
            .unwrap();
        assert!(!restructured);
        let (tight, fat_after) = tree.inner.boxes_of(&Body::new(7, boxed([0.; 3], 0.))).unwrap();
        assert_eq!(fat_after, fat_before, "leaf box is untouched");
        assert_eq!(tight, boxed([21.3, 0.2, -0.4], 1.), "registry holds the new tight box");
        tree.inner.validate();

        // The old position no longer reports the item.
        assert_eq!(tree.query_point([21.1, 0.1, 0.9]).count(), 0);
    }

    #[test]
    fn large_motion_reinserts_and_refattens() {
        let mut tree = DynamicAabbTree::with_config(config(0.5));
        for i in 0..16 {
            let _ = tree.add(Body::new(i, boxed([i as f64 * 3., 0., 0.], 1.))).unwrap();
        }
        let (_, restructured) = tree
            .update_inner(Body::new(3, boxed([100., 100., 100.], 1.)), None)
            .unwrap();
        assert!(restructured);
        tree.inner.validate();
        let (tight, fat) = tree.inner.boxes_of(&Body::new(3, boxed([0.; 3], 0.))).unwrap();
        assert_eq!(fat, tight.fattened(0.5));
    }

    #[test]
    fn displacement_stretches_the_fat_box_along_the_motion() {
        let mut tree = DynamicAabbTree::with_config(config(0.1));
        let _ = tree.add(Body::new(0, boxed([0.; 3], 1.))).unwrap();
        let _ = tree
            .update_with_displacement(Body::new(0, boxed([5., 0., 0.], 1.)), [2., 0., -1.])
            .unwrap();
        let (_, fat) = tree.inner.boxes_of(&Body::new(0, boxed([0.; 3], 0.))).unwrap();
        assert_eq!(fat.max[0], 6.0 + 0.1 + 2.);
        assert_eq!(fat.min[0], 5.0 - 0.1);
        assert_eq!(fat.min[2], 0.0 - 0.1 - 1.);

        // Moving along the predicted path does not reinsert.
        let (_, restructured) = tree
            .update_inner(Body::new(0, boxed([6.5, 0., -0.8], 1.)), None)
            .unwrap();
        assert!(!restructured);
    }

    #[test]
    fn sorted_insertions_keep_logarithmic_height() {
        let mut tree = DynamicAabbTree::<f64, Body>::new();
        for i in 0..512 {
            let _ = tree.add(Body::new(i, boxed([i as f64 * 2., 0., 0.], 1.))).unwrap();
        }
        tree.inner.validate();
        // Rotations keep the tree within a small factor of log2(512) = 9.
        assert!(tree.inner.tree.height() <= 18, "height {}", tree.inner.tree.height());
        assert!(tree.quality().depth_ratio < 2.0, "{:?}", tree.quality());
    }

    #[test]
    fn churn_keeps_pairs_exact() {
        let mut bodies = random_scene(7, 120, 0);
        let mut tree = DynamicAabbTree::from_items(config(0.3), bodies.iter().cloned()).unwrap();
        tree.inner.validate();
        for step in 0..5 {
            for b in bodies.iter_mut().filter(|b| b.id % 3 == step % 3) {
                let dx = if step % 2 == 0 { 0.2 } else { 4.0 };
                b.aabb.min[0] += dx;
                b.aabb.max[0] += dx;
                let _ = tree.update(b.clone()).unwrap();
            }
            tree.inner.validate();
            assert_eq!(sorted_pairs(tree.pairs()), brute_force_pairs(&bodies));
        }

        let removed: Vec<_> = bodies.drain(..40).collect();
        for b in &removed {
            let _ = tree.remove(b).unwrap();
        }
        tree.inner.validate();
        assert_eq!(tree.len(), 80);
        assert_eq!(sorted_pairs(tree.pairs()), brute_force_pairs(&bodies));
    }

    #[test]
    fn unusable_margin_is_treated_as_zero() {
        for margin in [-1.0, f64::NAN, f64::INFINITY] {
            let mut tree = DynamicAabbTree::with_config(config(margin));
            assert_eq!(tree.config().margin, 0.0);
            let _ = tree.add(Body::new(1, boxed([0.; 3], 1.))).unwrap();
            let _ = tree.add(Body::new(2, boxed([0.5; 3], 1.))).unwrap();
            assert_eq!(tree.query_point([0.75; 3]).count(), 2);
            assert_eq!(sorted_pairs(tree.pairs()), [(1, 2)]);

            let _ = tree.update(Body::new(2, boxed([0.6; 3], 1.))).unwrap();
            tree.inner.validate();
            assert_eq!(sorted_pairs(tree.pairs()), [(1, 2)]);
        }
    }
}
