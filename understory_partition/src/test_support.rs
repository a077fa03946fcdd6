// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared fixtures for unit tests.

use alloc::vec::Vec;
use core::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::partition::Bounded;
use crate::types::Aabb3D;

/// A test item identified by `id` only, so updates can carry new bounds.
#[derive(Clone, Debug)]
pub(crate) struct Body {
    pub(crate) id: u32,
    pub(crate) aabb: Aabb3D<f64>,
}

impl Body {
    pub(crate) fn new(id: u32, aabb: Aabb3D<f64>) -> Self {
        Self { id, aabb }
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Body {}

impl Hash for Body {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Bounded<f64> for Body {
    fn aabb(&self) -> Aabb3D<f64> {
        self.aabb
    }
}

/// Cube with corner `min` and side `size`.
pub(crate) fn boxed(min: [f64; 3], size: f64) -> Aabb3D<f64> {
    Aabb3D::new(min, [min[0] + size, min[1] + size, min[2] + size])
}

/// `n` random boxes in a 100-unit cube with sides up to 15, ids starting at `first_id`.
pub(crate) fn random_scene(seed: u64, n: usize, first_id: u32) -> Vec<Body> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let min = [
                rng.random_range(0.0..100.0),
                rng.random_range(0.0..100.0),
                rng.random_range(0.0..100.0),
            ];
            let size = [
                rng.random_range(0.0..15.0),
                rng.random_range(0.0..15.0),
                rng.random_range(0.0..15.0),
            ];
            let max = [min[0] + size[0], min[1] + size[1], min[2] + size[2]];
            let id = first_id + u32::try_from(i).expect("test scenes are small");
            Body::new(id, Aabb3D::new(min, max))
        })
        .collect()
}

/// Normalize pairs to `(low id, high id)` and sort them.
pub(crate) fn sorted_pairs<'a>(pairs: impl Iterator<Item = (&'a Body, &'a Body)>) -> Vec<(u32, u32)> {
    let mut out: Vec<_> = pairs
        .map(|(a, b)| if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) })
        .collect();
    out.sort_unstable();
    out
}

/// Every overlapping unordered pair by double loop.
pub(crate) fn brute_force_pairs(bodies: &[Body]) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    for (i, a) in bodies.iter().enumerate() {
        for b in &bodies[i + 1..] {
            if a.aabb.overlaps(&b.aabb) {
                out.push(if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) });
            }
        }
    }
    out.sort_unstable();
    out
}

/// Every overlapping `(left, right)` pair by double loop.
pub(crate) fn brute_force_cross(left: &[Body], right: &[Body]) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    for a in left {
        for b in right {
            if a.aabb.overlaps(&b.aabb) {
                out.push((a.id, b.id));
            }
        }
    }
    out.sort_unstable();
    out
}

/// Ids of bodies overlapping `q`, sorted.
pub(crate) fn brute_force_query(bodies: &[Body], q: &Aabb3D<f64>) -> Vec<u32> {
    let mut out: Vec<_> = bodies
        .iter()
        .filter(|b| b.aabb.overlaps(q))
        .map(|b| b.id)
        .collect();
    out.sort_unstable();
    out
}

/// Sorted ids from a query result.
pub(crate) fn ids<'a>(items: impl Iterator<Item = &'a Body>) -> Vec<u32> {
    let mut out: Vec<_> = items.map(|b| b.id).collect();
    out.sort_unstable();
    out
}
