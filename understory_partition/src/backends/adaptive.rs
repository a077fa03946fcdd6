// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dynamic tree that watches its own balance and rebuilds when it degrades.

use core::fmt::Debug;
use core::hash::Hash;

use tracing::{debug, warn};

use crate::backends::dynamic::{DynamicAabbTree, DynamicConfig};
use crate::backends::tree::TreeQuality;
use crate::error::Error;
use crate::items::Key;
use crate::partition::{Bounded, SpatialPartition};
use crate::types::{Aabb3D, Ray3D, Scalar, ScalarAcc};

/// Tuning for [`AdaptiveAabbTree`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AdaptiveConfig<T> {
    /// Tuning of the underlying dynamic tree.
    pub dynamic: DynamicConfig<T>,
    /// Rebuild once [`TreeQuality::depth_ratio`] exceeds this.
    pub max_depth_ratio: f64,
    /// Number of structural mutations between automatic quality checks.
    pub check_interval: usize,
    /// Trees smaller than this are never rebuilt.
    pub min_items: usize,
}

impl<T: Scalar> Default for AdaptiveConfig<T> {
    fn default() -> Self {
        Self {
            dynamic: DynamicConfig::default(),
            max_depth_ratio: 2.0,
            check_interval: 64,
            min_items: 16,
        }
    }
}

/// A [`DynamicAabbTree`] that periodically measures its average leaf depth against the
/// optimum and performs a full top-down rebuild when the ratio grows too large.
///
/// Checks run every [`AdaptiveConfig::check_interval`] structural mutations (inserts,
/// removals, and updates that had to reinsert a leaf) and on [`end_batch`](Self::end_batch).
pub struct AdaptiveAabbTree<T: Scalar, P> {
    tree: DynamicAabbTree<T, P>,
    config: AdaptiveConfig<T>,
    /// Structural mutations since the last check.
    pending: usize,
    rebuilds: usize,
}

impl<T: Scalar, P> Default for AdaptiveAabbTree<T, P> {
    fn default() -> Self {
        Self::with_config(AdaptiveConfig::default())
    }
}

impl<T: Scalar, P> Debug for AdaptiveAabbTree<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdaptiveAabbTree")
            .field("max_depth_ratio", &self.config.max_depth_ratio)
            .field("pending", &self.pending)
            .field("rebuilds", &self.rebuilds)
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, P> AdaptiveAabbTree<T, P> {
    /// Create an empty tree with the given tuning.
    pub fn with_config(mut config: AdaptiveConfig<T>) -> Self {
        config.dynamic = config.dynamic.sanitized();
        Self {
            tree: DynamicAabbTree::with_config(config.dynamic),
            config,
            pending: 0,
            rebuilds: 0,
        }
    }

    /// Current tuning.
    pub const fn config(&self) -> &AdaptiveConfig<T> {
        &self.config
    }

    /// Number of automatic or batch-triggered rebuilds performed so far.
    pub const fn rebuild_count(&self) -> usize {
        self.rebuilds
    }
}

impl<T, P> AdaptiveAabbTree<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    /// Create an empty tree with default tuning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth statistics of the current tree.
    pub fn quality(&self) -> TreeQuality<ScalarAcc<T>> {
        self.tree.quality()
    }

    /// Check the tree now and rebuild it if it has degraded.
    ///
    /// Call after a burst of mutations so the next queries run on a healthy tree. Returns
    /// whether a rebuild happened.
    pub fn end_batch(&mut self) -> Result<bool, Error> {
        self.pending = 0;
        if self.tree.len() < self.config.min_items {
            return Ok(false);
        }
        let quality = self.tree.quality();
        if quality.depth_ratio <= self.config.max_depth_ratio {
            return Ok(false);
        }
        self.tree.rebuild()?;
        self.rebuilds += 1;
        debug!(
            items = quality.leaves,
            depth_ratio = quality.depth_ratio,
            max_depth = quality.max_depth,
            "rebuilt degraded tree"
        );
        Ok(true)
    }

    /// Count a structural mutation and run the periodic check when due.
    ///
    /// A failed automatic rebuild leaves the (valid, if slow) tree in place; the mutation
    /// that triggered it has already succeeded and is not undone.
    fn note_mutation(&mut self) {
        self.pending += 1;
        if self.pending < self.config.check_interval {
            return;
        }
        if let Err(err) = self.end_batch() {
            warn!(%err, "automatic rebuild failed; keeping the current tree");
        }
    }
}

impl<T, P> SpatialPartition<T, P> for AdaptiveAabbTree<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    fn add(&mut self, item: P) -> Result<Key, Error> {
        let key = self.tree.add(item)?;
        self.note_mutation();
        Ok(key)
    }

    fn remove(&mut self, item: &P) -> Result<P, Error> {
        let item = self.tree.remove(item)?;
        self.note_mutation();
        Ok(item)
    }

    fn update(&mut self, item: P) -> Result<Key, Error> {
        let (key, restructured) = self.tree.update_inner(item, None)?;
        if restructured {
            self.note_mutation();
        }
        Ok(key)
    }

    fn len(&self) -> usize {
        self.tree.len()
    }

    fn contains(&self, item: &P) -> bool {
        self.tree.contains(item)
    }

    fn key_of(&self, item: &P) -> Option<Key> {
        self.tree.key_of(item)
    }

    fn get(&self, key: Key) -> Option<&P> {
        self.tree.get(key)
    }

    fn clear(&mut self) {
        self.tree.clear();
        self.pending = 0;
    }

    fn rebuild(&mut self) -> Result<(), Error> {
        self.tree.rebuild()?;
        self.pending = 0;
        Ok(())
    }

    fn items<'a>(&'a self) -> impl Iterator<Item = (&'a P, Aabb3D<T>)>
    where
        P: 'a,
    {
        self.tree.items()
    }

    fn query_aabb<'a>(&'a self, aabb: Aabb3D<T>) -> impl Iterator<Item = &'a P>
    where
        P: 'a,
    {
        self.tree.query_aabb(aabb)
    }

    fn query_ray<'a>(&'a self, ray: Ray3D<T>, max_len: T) -> impl Iterator<Item = &'a P>
    where
        P: 'a,
    {
        self.tree.query_ray(ray, max_len)
    }

    fn pairs<'a>(&'a self) -> impl Iterator<Item = (&'a P, &'a P)>
    where
        P: 'a,
    {
        self.tree.pairs()
    }
}
