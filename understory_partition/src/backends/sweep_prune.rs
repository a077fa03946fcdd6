// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sweep-and-prune over three sorted endpoint lists.
//!
//! Every item contributes a min and a max endpoint on each axis. The lists are kept sorted
//! by `(value, is_max)` so that, at equal values, min endpoints come first and touching
//! boxes are reported. Small moves are cheap: `update` rewrites the item's endpoints in place
//! and restores order with insertion sort, which only walks as far as the item moved.

use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::Hash;

use smallvec::SmallVec;

use crate::error::Error;
use crate::items::{Entry, Items, Key, checked_aabb};
use crate::partition::{Bounded, SpatialPartition};
use crate::types::{Aabb3D, Ray3D, Scalar};

/// Positions of an item's `[min, max]` endpoints on each axis.
type Positions = [[usize; 2]; 3];

#[derive(Copy, Clone, Debug, PartialEq)]
struct Endpoint<T> {
    value: T,
    slot: usize,
    is_max: bool,
}

impl<T: Scalar> Endpoint<T> {
    /// Strict `(value, is_max)` order with `false < true`.
    fn precedes(&self, other: &Self) -> bool {
        self.value < other.value || (self.value == other.value && !self.is_max && other.is_max)
    }
}

/// Broad phase that keeps items sorted along each axis.
///
/// ```rust
/// use understory_partition::{Aabb3D, Bounded, SpatialPartition};
/// use understory_partition::backends::SweepAndPrune;
///
/// #[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// struct Cell(i32);
///
/// impl Bounded<f64> for Cell {
///     fn aabb(&self) -> Aabb3D<f64> {
///         let x = f64::from(self.0);
///         Aabb3D::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0])
///     }
/// }
///
/// let mut sap = SweepAndPrune::<f64, _>::new();
/// for i in [0, 1, 5] {
///     sap.add(Cell(i)).unwrap();
/// }
/// // Cells 0 and 1 touch at x = 1.
/// let pairs: Vec<_> = sap.pairs().collect();
/// assert_eq!(pairs.len(), 1);
/// ```
pub struct SweepAndPrune<T: Scalar, P> {
    items: Items<T, P, Positions>,
    axes: [Vec<Endpoint<T>>; 3],
}

impl<T: Scalar, P> Default for SweepAndPrune<T, P> {
    fn default() -> Self {
        Self {
            items: Items::default(),
            axes: [Vec::new(), Vec::new(), Vec::new()],
        }
    }
}

impl<T: Scalar, P> Debug for SweepAndPrune<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SweepAndPrune")
            .field("items", &self.items)
            .field("endpoints_per_axis", &self.axes[0].len())
            .finish_non_exhaustive()
    }
}

/// Point every endpoint of `axis` from position `from` on back at its own position.
fn reindex<T, P>(
    items: &mut Items<T, P, Positions>,
    endpoints: &[Endpoint<T>],
    axis: usize,
    from: usize,
) where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    for (pos, e) in endpoints.iter().enumerate().skip(from) {
        items.entry_mut(e.slot).data[axis][usize::from(e.is_max)] = pos;
    }
}

/// Move the endpoint at `pos` left or right until its neighbors are in order.
fn sift<T, P>(
    items: &mut Items<T, P, Positions>,
    endpoints: &mut [Endpoint<T>],
    axis: usize,
    mut pos: usize,
) where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    let mut swap = |endpoints: &mut [Endpoint<T>], a: usize, b: usize| {
        endpoints.swap(a, b);
        for p in [a, b] {
            let e = endpoints[p];
            items.entry_mut(e.slot).data[axis][usize::from(e.is_max)] = p;
        }
    };
    while pos > 0 && endpoints[pos].precedes(&endpoints[pos - 1]) {
        swap(endpoints, pos - 1, pos);
        pos -= 1;
    }
    while pos + 1 < endpoints.len() && endpoints[pos + 1].precedes(&endpoints[pos]) {
        swap(endpoints, pos, pos + 1);
        pos += 1;
    }
}

impl<T, P> SweepAndPrune<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    /// Create an empty sweep-and-prune set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a complete item set, sorting each axis once.
    pub fn from_items<I: IntoIterator<Item = P>>(items: I) -> Result<Self, Error> {
        let mut sap = Self::new();
        for item in items {
            let _ = sap.items.insert_with(item, |_, _| [[0; 2]; 3])?;
        }
        sap.rebuild()?;
        Ok(sap)
    }

    /// Axis along which item centers are most spread out, the best one to sweep.
    pub fn sweep_axis(&self) -> usize {
        let n = self.items.len();
        if n < 2 {
            return 0;
        }
        let mut sum = [0.0_f64; 3];
        let mut sum_sq = [0.0_f64; 3];
        for (_, e) in self.items.iter() {
            for a in 0..3 {
                let c = T::to_f64(e.aabb.min[a]) + T::to_f64(e.aabb.max[a]);
                sum[a] += c;
                sum_sq[a] += c * c;
            }
        }
        #[allow(clippy::cast_precision_loss, reason = "Only a ratio is needed.")]
        let n = n as f64;
        let variance = |a: usize| sum_sq[a] / n - (sum[a] / n) * (sum[a] / n);
        let mut best = 0;
        for a in 1..3 {
            if variance(a) > variance(best) {
                best = a;
            }
        }
        best
    }

    fn insert_endpoints(&mut self, slot: usize, aabb: &Aabb3D<T>) {
        for axis in 0..3 {
            let list = &mut self.axes[axis];
            let min = Endpoint {
                value: aabb.min[axis],
                slot,
                is_max: false,
            };
            let at = list.partition_point(|e| !min.precedes(e));
            list.insert(at, min);
            let max = Endpoint {
                value: aabb.max[axis],
                slot,
                is_max: true,
            };
            let at_max = list.partition_point(|e| !max.precedes(e));
            list.insert(at_max, max);
            reindex(&mut self.items, &self.axes[axis], axis, at);
        }
    }

    #[cfg(test)]
    fn validate(&self) {
        for axis in 0..3 {
            let list = &self.axes[axis];
            assert_eq!(list.len(), 2 * self.items.len());
            for w in list.windows(2) {
                assert!(!w[1].precedes(&w[0]), "axis {axis} out of order: {w:?}");
            }
            for (pos, e) in list.iter().enumerate() {
                let entry = self.items.entry(e.slot);
                assert_eq!(entry.data[axis][usize::from(e.is_max)], pos, "stale position");
                let expected = if e.is_max {
                    entry.aabb.max[axis]
                } else {
                    entry.aabb.min[axis]
                };
                assert_eq!(e.value, expected, "stale endpoint value");
            }
        }
    }
}

impl<T, P> SpatialPartition<T, P> for SweepAndPrune<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    fn add(&mut self, item: P) -> Result<Key, Error> {
        let key = self.items.insert_with(item, |_, _| [[0; 2]; 3])?;
        let aabb = self.items.entry(key.idx()).aabb;
        self.insert_endpoints(key.idx(), &aabb);
        Ok(key)
    }

    fn remove(&mut self, item: &P) -> Result<P, Error> {
        let (_, entry) = self.items.remove(item)?;
        for (axis, [min_pos, max_pos]) in entry.data.into_iter().enumerate() {
            let list = &mut self.axes[axis];
            let _ = list.remove(max_pos);
            let _ = list.remove(min_pos);
            reindex(&mut self.items, &self.axes[axis], axis, min_pos);
        }
        Ok(entry.item)
    }

    fn update(&mut self, item: P) -> Result<Key, Error> {
        let slot = self.items.slot_of(&item)?;
        let aabb = checked_aabb(&item)?;
        let Entry {
            aabb: old,
            data: positions,
            ..
        } = *self.items.entry(slot);
        let key = self.items.replace(slot, item, aabb);
        for (axis, [min_pos, max_pos]) in positions.into_iter().enumerate() {
            let list = &mut self.axes[axis];
            list[min_pos].value = aabb.min[axis];
            list[max_pos].value = aabb.max[axis];
            // Sift the endpoint leading the motion first so the other never blocks it.
            let order = if aabb.max[axis] > old.max[axis] {
                [true, false]
            } else {
                [false, true]
            };
            for is_max in order {
                let pos = self.items.entry(slot).data[axis][usize::from(is_max)];
                sift(&mut self.items, &mut self.axes[axis], axis, pos);
            }
        }
        Ok(key)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn contains(&self, item: &P) -> bool {
        self.items.contains(item)
    }

    fn key_of(&self, item: &P) -> Option<Key> {
        self.items.key_of(item)
    }

    fn get(&self, key: Key) -> Option<&P> {
        self.items.get(key)
    }

    fn clear(&mut self) {
        self.items.clear();
        for list in &mut self.axes {
            list.clear();
        }
    }

    fn rebuild(&mut self) -> Result<(), Error> {
        let mut axes: [Vec<Endpoint<T>>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for (axis, list) in axes.iter_mut().enumerate() {
            list.try_reserve_exact(2 * self.items.len())?;
            for (slot, e) in self.items.iter() {
                list.push(Endpoint {
                    value: e.aabb.min[axis],
                    slot,
                    is_max: false,
                });
                list.push(Endpoint {
                    value: e.aabb.max[axis],
                    slot,
                    is_max: true,
                });
            }
            list.sort_unstable_by(|a, b| {
                if a.precedes(b) {
                    core::cmp::Ordering::Less
                } else if b.precedes(a) {
                    core::cmp::Ordering::Greater
                } else {
                    core::cmp::Ordering::Equal
                }
            });
        }
        self.axes = axes;
        for axis in 0..3 {
            reindex(&mut self.items, &self.axes[axis], axis, 0);
        }
        Ok(())
    }

    fn items<'a>(&'a self) -> impl Iterator<Item = (&'a P, Aabb3D<T>)>
    where
        P: 'a,
    {
        self.items.iter().map(|(_, e)| (&e.item, e.aabb))
    }

    fn query_aabb<'a>(&'a self, aabb: Aabb3D<T>) -> impl Iterator<Item = &'a P>
    where
        P: 'a,
    {
        let items = &self.items;
        self.axes[0]
            .iter()
            .take_while(move |e| e.value <= aabb.max[0])
            .filter(|e| !e.is_max)
            .filter_map(move |e| {
                let entry = items.entry(e.slot);
                entry.aabb.overlaps(&aabb).then_some(&entry.item)
            })
    }

    fn query_ray<'a>(&'a self, ray: Ray3D<T>, max_len: T) -> impl Iterator<Item = &'a P>
    where
        P: 'a,
    {
        let items = &self.items;
        let bounds = ray.segment_aabb(max_len);
        self.axes[0]
            .iter()
            .take_while(move |e| e.value <= bounds.max[0])
            .filter(|e| !e.is_max)
            .filter_map(move |e| {
                let entry = items.entry(e.slot);
                (entry.aabb.overlaps(&bounds) && entry.aabb.intersect_ray(&ray, max_len).is_some())
                    .then_some(&entry.item)
            })
    }

    fn pairs<'a>(&'a self) -> impl Iterator<Item = (&'a P, &'a P)>
    where
        P: 'a,
    {
        SweepPairs {
            items: &self.items,
            endpoints: &self.axes[self.sweep_axis()],
            next: 0,
            active: SmallVec::new(),
            entering: None,
        }
    }
}

/// Lazy sweep over one axis.
///
/// Reaching a min endpoint tests the entering item against every active item; reaching a
/// max endpoint retires it.
struct SweepPairs<'a, T, P> {
    items: &'a Items<T, P, Positions>,
    endpoints: &'a [Endpoint<T>],
    next: usize,
    active: SmallVec<[usize; 16]>,
    /// Slot being entered and how many active items it has been tested against.
    entering: Option<(usize, usize)>,
}

impl<'a, T, P> Iterator for SweepPairs<'a, T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    type Item = (&'a P, &'a P);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((slot, tested)) = self.entering {
                if let Some(&other) = self.active.get(tested) {
                    self.entering = Some((slot, tested + 1));
                    let (a, b) = (self.items.entry(other), self.items.entry(slot));
                    if a.aabb.overlaps(&b.aabb) {
                        return Some((&a.item, &b.item));
                    }
                    continue;
                }
                self.active.push(slot);
                self.entering = None;
            }
            let e = self.endpoints.get(self.next)?;
            self.next += 1;
            if e.is_max {
                if let Some(i) = self.active.iter().position(|&s| s == e.slot) {
                    let _ = self.active.swap_remove(i);
                }
            } else {
                self.entering = Some((e.slot, 0));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        Body, boxed, brute_force_pairs, brute_force_query, ids, random_scene, sorted_pairs,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn touching_boxes_pair_on_every_axis() {
        for axis in 0..3 {
            let mut offset = [0.; 3];
            offset[axis] = 1.;
            let mut sap = SweepAndPrune::<f64, Body>::new();
            let _ = sap.add(Body::new(0, boxed([0.; 3], 1.))).unwrap();
            let _ = sap.add(Body::new(1, boxed(offset, 1.))).unwrap();
            sap.validate();
            assert_eq!(sorted_pairs(sap.pairs()), [(0, 1)], "axis {axis}");
        }
    }

    #[test]
    fn sweep_axis_follows_the_spread() {
        let bodies = (0..20).map(|i| Body::new(i, boxed([0., 0., i as f64 * 5.], 1.)));
        let sap = SweepAndPrune::<f64, Body>::from_items(bodies).unwrap();
        sap.validate();
        assert_eq!(sap.sweep_axis(), 2);
    }

    #[test]
    fn coherent_motion_keeps_lists_sorted() {
        let mut bodies = random_scene(21, 150, 0);
        let mut sap = SweepAndPrune::<f64, Body>::new();
        for b in &bodies {
            let _ = sap.add(b.clone()).unwrap();
        }
        sap.validate();

        let mut rng = StdRng::seed_from_u64(22);
        for _ in 0..30 {
            for b in &mut bodies {
                for a in 0..3 {
                    let d: f64 = rng.random_range(-1.5..1.5);
                    let grow: f64 = rng.random_range(-0.2..0.2);
                    b.aabb.min[a] += d;
                    b.aabb.max[a] = (b.aabb.max[a] + d + grow).max(b.aabb.min[a]);
                }
                let _ = sap.update(b.clone()).unwrap();
            }
            sap.validate();
        }
        assert_eq!(sorted_pairs(sap.pairs()), brute_force_pairs(&bodies));
    }

    #[test]
    fn shrink_grow_and_jump() {
        let mut sap = SweepAndPrune::<f64, Body>::new();
        for i in 0..8 {
            let _ = sap.add(Body::new(i, boxed([i as f64 * 2., 0., 0.], 1.))).unwrap();
        }
        let moves = [
            Aabb3D::new([6.4, 0.2, 0.2], [6.6, 0.8, 0.8]),
            Aabb3D::new([-3., -3., -3.], [20., 3., 3.]),
            Aabb3D::new([30., 30., 30.], [31., 31., 31.]),
            Aabb3D::new([-9., 0., 0.], [-8., 1., 1.]),
        ];
        for aabb in moves {
            let _ = sap.update(Body::new(3, aabb)).unwrap();
            sap.validate();
        }
        let _ = sap.remove(&Body::new(5, boxed([0.; 3], 0.))).unwrap();
        sap.validate();
        let _ = sap.remove(&Body::new(0, boxed([0.; 3], 0.))).unwrap();
        sap.validate();
        assert_eq!(sap.len(), 6);
    }

    #[test]
    fn queries_scan_the_x_list() {
        let bodies = random_scene(31, 120, 0);
        let sap = SweepAndPrune::<f64, Body>::from_items(bodies.iter().cloned()).unwrap();
        for q in random_scene(32, 25, 500) {
            assert_eq!(ids(sap.query_aabb(q.aabb)), brute_force_query(&bodies, &q.aabb));
        }
        let ray = Ray3D::new([-1., 50., 50.], [1., 0., 0.]);
        let expected: Vec<_> = {
            let mut v: Vec<_> = bodies
                .iter()
                .filter(|b| b.aabb.intersect_ray(&ray, 60.).is_some())
                .map(|b| b.id)
                .collect();
            v.sort_unstable();
            v
        };
        assert_eq!(ids(sap.query_ray(ray, 60.)), expected);
    }
}
