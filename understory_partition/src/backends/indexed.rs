// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Item registry + arena tree, the common core of the pointer-style trees.

use core::fmt::Debug;
use core::hash::Hash;

use crate::backends::tree::{NodeIdx, Tree, TreeQuality};
use crate::error::Error;
use crate::items::Items;
use crate::partition::Bounded;
use crate::types::{Aabb3D, Ray3D, Scalar, ScalarAcc};

/// Items plus the tree indexing them. Each item's per-slot data is its leaf node.
pub(crate) struct Indexed<T, P> {
    pub(crate) items: Items<T, P, NodeIdx>,
    pub(crate) tree: Tree<T>,
}

impl<T: Scalar, P> Default for Indexed<T, P> {
    fn default() -> Self {
        Self {
            items: Items::default(),
            tree: Tree::default(),
        }
    }
}

impl<T: Scalar, P> Debug for Indexed<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Indexed")
            .field("items", &self.items)
            .field("tree", &self.tree)
            .finish()
    }
}

impl<T, P> Indexed<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    /// Register items without touching the tree; callers follow up with a rebuild.
    pub(crate) fn register_all<I: IntoIterator<Item = P>>(&mut self, items: I) -> Result<(), Error> {
        for item in items {
            let _ = self.items.insert_with(item, |_, _| NodeIdx::PLACEHOLDER)?;
        }
        Ok(())
    }

    /// Rebuild the tree top-down, giving each leaf the box produced by `leaf_box`.
    ///
    /// Nothing is modified unless the new tree was built completely.
    pub(crate) fn rebuild_with(
        &mut self,
        leaf_box: impl Fn(Aabb3D<T>) -> Aabb3D<T>,
    ) -> Result<(), Error> {
        let mut boxes = self.items.slot_boxes()?;
        for (_, b) in &mut boxes {
            *b = leaf_box(*b);
        }
        let (tree, leaves) = Tree::build(&mut boxes)?;
        for (slot, leaf) in leaves {
            self.items.entry_mut(slot).data = leaf;
        }
        self.tree = tree;
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.tree.clear();
    }

    pub(crate) fn quality(&self) -> TreeQuality<ScalarAcc<T>> {
        self.tree.quality()
    }

    pub(crate) fn items(&self) -> impl Iterator<Item = (&P, Aabb3D<T>)> {
        self.items.iter().map(|(_, e)| (&e.item, e.aabb))
    }

    pub(crate) fn query_aabb(&self, aabb: Aabb3D<T>) -> impl Iterator<Item = &P> {
        let items = &self.items;
        self.tree
            .descend(move |b| b.overlaps(&aabb))
            .filter_map(move |slot| {
                let e = items.entry(slot);
                e.aabb.overlaps(&aabb).then_some(&e.item)
            })
    }

    pub(crate) fn query_ray(&self, ray: Ray3D<T>, max_len: T) -> impl Iterator<Item = &P> {
        let items = &self.items;
        self.tree
            .descend(move |b| b.intersect_ray(&ray, max_len).is_some())
            .filter_map(move |slot| {
                let e = items.entry(slot);
                e.aabb.intersect_ray(&ray, max_len).map(|_| &e.item)
            })
    }

    pub(crate) fn pairs(&self) -> impl Iterator<Item = (&P, &P)> {
        let items = &self.items;
        self.tree.self_pairs().filter_map(move |(a, b)| {
            let (ea, eb) = (items.entry(a), items.entry(b));
            ea.aabb.overlaps(&eb.aabb).then_some((&ea.item, &eb.item))
        })
    }

    pub(crate) fn cross_pairs<'a, Q>(
        &'a self,
        other: &'a Indexed<T, Q>,
    ) -> impl Iterator<Item = (&'a P, &'a Q)>
    where
        Q: Bounded<T> + Clone + Eq + Hash,
    {
        let (mine, theirs) = (&self.items, &other.items);
        self.tree.cross_pairs(&other.tree).filter_map(move |(a, b)| {
            let (ea, eb) = (mine.entry(a), theirs.entry(b));
            ea.aabb.overlaps(&eb.aabb).then_some((&ea.item, &eb.item))
        })
    }

    /// Tight bounds and leaf box of a present item.
    #[cfg(test)]
    pub(crate) fn boxes_of(&self, item: &P) -> Option<(Aabb3D<T>, Aabb3D<T>)> {
        let slot = self.items.slot_of(item).ok()?;
        let e = self.items.entry(slot);
        Some((e.aabb, self.tree.node(e.data).bbox))
    }

    #[cfg(test)]
    pub(crate) fn validate(&self) {
        self.tree.validate();
        for (slot, e) in self.items.iter() {
            let leaf = self.tree.node(e.data);
            assert!(
                matches!(leaf.kind, crate::backends::tree::Kind::Leaf(s) if s == slot),
                "registry and leaf disagree on the slot"
            );
            assert!(leaf.bbox.contains(&e.aabb), "leaf box must contain the tight box");
        }
    }
}
