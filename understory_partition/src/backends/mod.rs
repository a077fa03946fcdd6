// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Spatial partition implementations.
//!
//! - `aabb_tree`: static BVH built top-down with SAH splits (aliases: `AabbTreeF32`, `AabbTreeF64`).
//! - `dynamic`: incrementally balanced BVH with fattened leaves for moving items.
//! - `adaptive`: dynamic BVH that rebuilds itself when its depth ratio degrades.
//! - `compressed`: flat BVH with 16-byte quantized nodes; conservative queries.
//! - `sweep_prune`: three sorted endpoint lists with incremental insertion sort.
//!
//! SAH note
//! --------
//! The top-down builder shared by the trees sorts items by centroid along each axis and,
//! for a split point `k`, minimizes:
//!
//! `cost(k) = area(LB_k) * k + area(RB_k) * (n - k)`
//!
//! where `LB_k` and `RB_k` are the bounding boxes of the first `k` and remaining `n - k` items.
//! All `k` are evaluated in O(n) per axis using prefix/suffix bounding boxes. Surface areas
//! are accumulated in widened types (`f32`→`f64`, `f64`→`f64`). Equal costs prefer the most
//! even split; items with coincident centroids are split at the median.
//!
//! Insertion into the pointer-style trees descends toward the sibling with the lowest
//! combined cost of a new parent plus the area growth inherited by every ancestor.

pub(crate) mod aabb_tree;
pub(crate) mod adaptive;
pub(crate) mod compressed;
pub(crate) mod dynamic;
pub(crate) mod indexed;
pub(crate) mod sweep_prune;
pub(crate) mod tree;

pub use aabb_tree::{AabbTree, AabbTreeF32, AabbTreeF64};
pub use adaptive::{AdaptiveAabbTree, AdaptiveConfig};
pub use compressed::CompressedAabbTree;
pub use dynamic::{DynamicAabbTree, DynamicConfig};
pub use sweep_prune::SweepAndPrune;
pub use tree::TreeQuality;
