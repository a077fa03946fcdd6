// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Partition: interchangeable 3D spatial partitions for broad-phase queries.
//!
//! Understory Partition indexes a changing set of items by their axis-aligned bounding boxes
//! (AABBs) and answers:
//!
//! - which items overlap a box, contain a point, or are hit by a ray segment;
//! - which pairs of items currently overlap (each unordered pair once);
//! - which items of this partition overlap items of another one.
//!
//! Every structure implements [`SpatialPartition`], so the code asking for overlaps does not
//! care which one backs it. Items are any `Clone + Eq + Hash` value that can report its box
//! through [`Bounded`]; identity is the item's `Eq`, so a moved item is passed to
//! [`update`](SpatialPartition::update) as its new value.
//!
//! It is generic over the scalar type `T` (`f32` or `f64`) and does not depend on any
//! geometry crate.
//!
//! # Example
//!
//! ```rust
//! use understory_partition::{Aabb3D, Bounded, SpatialPartition};
//! use understory_partition::backends::DynamicAabbTree;
//!
//! #[derive(Clone, Debug, PartialEq, Eq, Hash)]
//! struct Crate {
//!     id: u32,
//!     at: [i32; 3],
//! }
//!
//! impl Bounded<f32> for Crate {
//!     fn aabb(&self) -> Aabb3D<f32> {
//!         let min = self.at.map(|c| c as f32);
//!         Aabb3D::new(min, min.map(|c| c + 1.0))
//!     }
//! }
//!
//! let mut crates = DynamicAabbTree::<f32, Crate>::new();
//! crates.add(Crate { id: 1, at: [0, 0, 0] }).unwrap();
//! crates.add(Crate { id: 2, at: [1, 0, 0] }).unwrap();
//! crates.add(Crate { id: 3, at: [9, 9, 9] }).unwrap();
//!
//! // Crates 1 and 2 share a face, which counts as overlap.
//! let pairs: Vec<_> = crates.pairs().map(|(a, b)| (a.id.min(b.id), a.id.max(b.id))).collect();
//! assert_eq!(pairs, [(1, 2)]);
//!
//! let hits: Vec<_> = crates.query_point([9.5, 9.5, 9.5]).map(|c| c.id).collect();
//! assert_eq!(hits, [3]);
//! ```
//!
//! Since `Crate` compares every field, moving it means removing the old value and adding
//! the new one. Items that should be updated in place compare an id only:
//!
//! ```rust
//! use core::hash::{Hash, Hasher};
//! use understory_partition::{Aabb3D, Bounded, Ray3D, SpatialPartition};
//! use understory_partition::backends::SweepAndPrune;
//!
//! #[derive(Clone, Debug)]
//! struct Sensor {
//!     id: u32,
//!     bounds: Aabb3D<f64>,
//! }
//!
//! impl PartialEq for Sensor {
//!     fn eq(&self, other: &Self) -> bool {
//!         self.id == other.id
//!     }
//! }
//! impl Eq for Sensor {}
//! impl Hash for Sensor {
//!     fn hash<H: Hasher>(&self, state: &mut H) {
//!         self.id.hash(state);
//!     }
//! }
//! impl Bounded<f64> for Sensor {
//!     fn aabb(&self) -> Aabb3D<f64> {
//!         self.bounds
//!     }
//! }
//!
//! let mut sensors = SweepAndPrune::<f64, Sensor>::new();
//! let bounds = Aabb3D::new([0.0; 3], [1.0; 3]);
//! let key = sensors.add(Sensor { id: 7, bounds }).unwrap();
//!
//! let moved = Aabb3D::new([4.0, 0.0, 0.0], [5.0, 1.0, 1.0]);
//! sensors.update(Sensor { id: 7, bounds: moved }).unwrap();
//!
//! let ray = Ray3D::new([0.0, 0.5, 0.5], [1.0, 0.0, 0.0]);
//! assert_eq!(sensors.query_ray(ray, 3.0).count(), 0);
//! assert_eq!(sensors.query_ray(ray, 10.0).count(), 1);
//! assert_eq!(sensors.get(key).map(|p| p.bounds), Some(moved));
//! ```
//!
//! ## Choosing a partition
//!
//! - `AabbTree`: built once from the full item set; best queries. Incremental edits work but
//!   never rebalance, so call [`rebuild`](SpatialPartition::rebuild) after heavy churn.
//! - `DynamicAabbTree`: fattened leaves absorb small motion and rotations keep the tree
//!   balanced. The default for scenes where most items move a little every frame.
//! - `AdaptiveAabbTree`: a dynamic tree that measures its own depth and rebuilds when it
//!   degrades. Useful when motion is bursty or insertion order is adversarial.
//! - `CompressedAabbTree`: 16 bytes per node with bounds rounded outward. For large, mostly
//!   static scenes; queries may report near misses but never miss a hit.
//! - `SweepAndPrune`: sorted endpoint lists. Very cheap updates for small, coherent motion;
//!   pair enumeration sweeps the most spread-out axis.
//!
//! See the [`backends`] docs for a brief SAH overview.
//!
//! ### Float semantics
//!
//! Boxes must be finite with `min <= max` on every axis; other boxes are rejected with
//! [`Error::InvalidAabb`]. Boundaries are inclusive: boxes that touch overlap.
//!
//! ## Features
//!
//! - `std` *(default)*: forwards `std` to `thiserror` and `tracing`. The crate itself is
//!   `no_std` and only needs `alloc`.

#![no_std]

extern crate alloc;

pub mod backends;
mod error;
mod items;
mod partition;
mod types;
pub(crate) mod util;

#[cfg(test)]
mod conformance_tests;
#[cfg(test)]
mod test_support;

pub use backends::TreeQuality;
pub use error::Error;
pub use items::Key;
pub use partition::{Bounded, SpatialPartition};
pub use types::{Aabb3D, Ray3D, Scalar, ScalarAcc};
