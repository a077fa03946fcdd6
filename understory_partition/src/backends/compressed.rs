// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Read-mostly AABB tree with 16-byte quantized nodes.
//!
//! The tree is built top-down like [`AabbTree`](crate::backends::AabbTree) and then flattened
//! depth-first into one array. Node bounds are stored as `u16` per axis relative to the
//! global bounds of all items, rounded outward, so a decoded box always contains the true
//! box. Queries test decoded boxes and may therefore report items whose true bounds miss
//! the query slightly; they never miss an item that overlaps.
//!
//! Every mutation re-encodes the whole array. Use [`CompressedAabbTree::from_items`] or
//! [`CompressedAabbTree::extend`] to load many items with a single encode.

use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::Hash;

use smallvec::SmallVec;

use crate::backends::tree::{Kind, NodeIdx, Tree};
use crate::error::Error;
use crate::items::{Items, Key, checked_aabb};
use crate::partition::{Bounded, SpatialPartition};
use crate::types::{Aabb3D, Ray3D, Scalar};

/// Marks a node's link as a leaf slot rather than a right-child index.
const LEAF_BIT: u32 = 1 << 31;

/// Leaf position of an item that has not been encoded yet.
const UNPLACED: u32 = u32::MAX;

type Stack<E> = SmallVec<[E; 32]>;

/// One node of the flattened tree.
///
/// The left child of an internal node is always the next node; `link` holds the right
/// child's index, or the item slot with [`LEAF_BIT`] set for leaves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
struct QuantizedNode {
    min: [u16; 3],
    max: [u16; 3],
    link: u32,
}

const _: () = assert!(
    size_of::<QuantizedNode>() == 16,
    "quantized nodes must stay 16 bytes"
);

impl QuantizedNode {
    const fn leaf_slot(&self) -> Option<usize> {
        if self.link & LEAF_BIT != 0 {
            Some((self.link & !LEAF_BIT) as usize)
        } else {
            None
        }
    }
}

/// Maps coordinates to `u16` levels between the global bounds.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Quantizer<T> {
    min: [T; 3],
    max: [T; 3],
}

impl<T: Scalar> Quantizer<T> {
    fn new(bounds: Aabb3D<T>) -> Self {
        Self {
            min: bounds.min,
            max: bounds.max,
        }
    }

    /// Level `0` is the global minimum and `u16::MAX` the global maximum, both exactly.
    fn decode(&self, axis: usize, q: u16) -> T {
        match q {
            0 => self.min[axis],
            u16::MAX => self.max[axis],
            _ => {
                let lo = T::to_f64(self.min[axis]);
                let hi = T::to_f64(self.max[axis]);
                T::from_f64(lo + (hi - lo) * f64::from(q) / f64::from(u16::MAX))
            }
        }
    }

    /// Approximate level of `v`, rounded down or up.
    fn guess(&self, axis: usize, v: T, up: bool) -> u16 {
        let lo = T::to_f64(self.min[axis]);
        let extent = T::to_f64(self.max[axis]) - lo;
        if !(extent > 0.0 && extent.is_finite()) {
            return if up { u16::MAX } else { 0 };
        }
        let levels = f64::from(u16::MAX);
        let t = ((T::to_f64(v) - lo) / extent * levels).clamp(0.0, levels);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "t is clamped to [0, u16::MAX], so the cast is a floor."
        )]
        let floor = t as u16;
        if up && f64::from(floor) < t {
            floor + 1
        } else {
            floor
        }
    }

    /// Largest level whose decoded value does not exceed `v`.
    fn encode_min(&self, axis: usize, v: T) -> u16 {
        let mut q = self.guess(axis, v, false);
        while q > 0 && self.decode(axis, q) > v {
            q -= 1;
        }
        q
    }

    /// Smallest level whose decoded value is not below `v`.
    fn encode_max(&self, axis: usize, v: T) -> u16 {
        let mut q = self.guess(axis, v, true);
        while q < u16::MAX && self.decode(axis, q) < v {
            q += 1;
        }
        q
    }

    fn encode(&self, bbox: &Aabb3D<T>, link: u32) -> QuantizedNode {
        let axes = [0, 1, 2];
        QuantizedNode {
            min: axes.map(|a| self.encode_min(a, bbox.min[a])),
            max: axes.map(|a| self.encode_max(a, bbox.max[a])),
            link,
        }
    }

    fn decode_box(&self, node: &QuantizedNode) -> Aabb3D<T> {
        let axes = [0, 1, 2];
        Aabb3D::new(
            axes.map(|a| self.decode(a, node.min[a])),
            axes.map(|a| self.decode(a, node.max[a])),
        )
    }
}

/// A complete encoding, built off to the side and installed only once finished.
struct Encoded<T> {
    nodes: Vec<QuantizedNode>,
    quantizer: Quantizer<T>,
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "Slots and node positions are limited to 31 bits."
)]
fn encode<T: Scalar>(boxes: &mut [(usize, Aabb3D<T>)]) -> Result<Encoded<T>, Error> {
    let (tree, _) = Tree::build(boxes)?;
    let mut nodes = Vec::new();
    let Some(root) = tree.root() else {
        return Ok(Encoded {
            nodes,
            quantizer: Quantizer::new(Aabb3D::from_point([T::zero(); 3])),
        });
    };
    let quantizer = Quantizer::new(tree.node(root).bbox);
    nodes.try_reserve_exact(2 * boxes.len() - 1)?;

    // (node, position of the parent whose right link points here)
    let mut stack: Stack<(NodeIdx, Option<usize>)> = Stack::new();
    stack.push((root, None));
    while let Some((idx, right_of)) = stack.pop() {
        let pos = nodes.len();
        if let Some(parent) = right_of {
            nodes[parent].link = pos as u32;
        }
        let node = tree.node(idx);
        match node.kind {
            Kind::Leaf(slot) => {
                debug_assert!(slot < LEAF_BIT as usize, "slot does not fit in a leaf link");
                nodes.push(quantizer.encode(&node.bbox, LEAF_BIT | slot as u32));
            }
            Kind::Internal([left, right]) => {
                nodes.push(quantizer.encode(&node.bbox, 0));
                stack.push((right, Some(pos)));
                stack.push((left, None));
            }
        }
    }
    Ok(Encoded { nodes, quantizer })
}

/// Quantized, flattened AABB tree for large, mostly static scenes.
///
/// ```rust
/// use understory_partition::{Aabb3D, Bounded, SpatialPartition};
/// use understory_partition::backends::CompressedAabbTree;
///
/// #[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// struct Tile(u16, u16);
///
/// impl Bounded<f32> for Tile {
///     fn aabb(&self) -> Aabb3D<f32> {
///         let (x, y) = (f32::from(self.0), f32::from(self.1));
///         Aabb3D::new([x, y, 0.0], [x + 0.9, y + 0.9, 0.1])
///     }
/// }
///
/// let tiles = (0..32).flat_map(|x| (0..32).map(move |y| Tile(x, y)));
/// let tree = CompressedAabbTree::<f32, _>::from_items(tiles).unwrap();
///
/// // Never misses, but may include near neighbors.
/// let hits: Vec<_> = tree.query_point([10.5, 20.5, 0.05]).collect();
/// assert!(hits.contains(&&Tile(10, 20)));
/// ```
pub struct CompressedAabbTree<T: Scalar, P> {
    /// Per-slot data is the position of the item's leaf in `nodes`.
    items: Items<T, P, u32>,
    nodes: Vec<QuantizedNode>,
    quantizer: Quantizer<T>,
}

impl<T: Scalar, P> Default for CompressedAabbTree<T, P> {
    fn default() -> Self {
        Self {
            items: Items::default(),
            nodes: Vec::new(),
            quantizer: Quantizer::new(Aabb3D::from_point([T::zero(); 3])),
        }
    }
}

impl<T: Scalar, P> Debug for CompressedAabbTree<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompressedAabbTree")
            .field("items", &self.items)
            .field("nodes", &self.nodes.len())
            .field("bounds_min", &self.quantizer.min)
            .field("bounds_max", &self.quantizer.max)
            .finish_non_exhaustive()
    }
}

impl<T, P> CompressedAabbTree<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a complete item set with a single encode.
    pub fn from_items<I: IntoIterator<Item = P>>(items: I) -> Result<Self, Error> {
        let mut tree = Self::new();
        tree.extend(items)?;
        Ok(tree)
    }

    /// Add many items and re-encode once.
    ///
    /// All or nothing: if any item is rejected or the encode fails, none are added.
    pub fn extend<I: IntoIterator<Item = P>>(&mut self, items: I) -> Result<(), Error> {
        let mut added = Vec::new();
        let mut registered = Ok(());
        for item in items {
            match self.items.insert_with(item, |_, _| UNPLACED) {
                Ok(key) => added.push(key),
                Err(err) => {
                    registered = Err(err);
                    break;
                }
            }
        }
        match registered.and_then(|()| self.encode_current()) {
            Ok(encoded) => {
                self.install(encoded);
                Ok(())
            }
            Err(err) => {
                for key in added {
                    self.forget(key);
                }
                Err(err)
            }
        }
    }

    /// Decoded bounds of an item's leaf; always contains the item's true bounds.
    pub fn decoded_bounds(&self, key: Key) -> Option<Aabb3D<T>> {
        let _ = self.items.get(key)?;
        let pos = self.items.entry(key.idx()).data;
        let node = self.nodes.get(pos as usize)?;
        Some(self.quantizer.decode_box(node))
    }

    /// Number of encoded nodes (`2 * len - 1` for a non-empty tree).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn encode_current(&self) -> Result<Encoded<T>, Error> {
        let mut boxes = self.items.slot_boxes()?;
        encode(&mut boxes)
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Node positions are limited to 31 bits."
    )]
    fn install(&mut self, encoded: Encoded<T>) {
        for (pos, node) in encoded.nodes.iter().enumerate() {
            if let Some(slot) = node.leaf_slot() {
                self.items.entry_mut(slot).data = pos as u32;
            }
        }
        self.nodes = encoded.nodes;
        self.quantizer = encoded.quantizer;
    }

    /// Undo a registration whose encode failed.
    fn forget(&mut self, key: Key) {
        if let Some(item) = self.items.get(key).cloned() {
            let _ = self.items.remove(&item);
        }
    }

    fn descend<F>(&self, hit: F) -> impl Iterator<Item = &P>
    where
        F: FnMut(&Aabb3D<T>) -> bool,
    {
        let mut stack = Stack::new();
        if !self.nodes.is_empty() {
            stack.push(0);
        }
        let items = &self.items;
        FlatDescend {
            nodes: &self.nodes,
            quantizer: &self.quantizer,
            stack,
            hit,
        }
        .map(move |slot| &items.entry(slot).item)
    }

    #[cfg(test)]
    fn validate(&self) {
        let n = self.items.len();
        if n == 0 {
            assert!(self.nodes.is_empty());
            return;
        }
        assert_eq!(self.nodes.len(), 2 * n - 1);
        for (slot, e) in self.items.iter() {
            let node = &self.nodes[e.data as usize];
            assert_eq!(node.leaf_slot(), Some(slot), "leaf position out of date");
            assert!(self.quantizer.decode_box(node).contains(&e.aabb));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.leaf_slot().is_none() {
                let outer = self.quantizer.decode_box(node);
                for child in [i + 1, node.link as usize] {
                    let inner = self.quantizer.decode_box(&self.nodes[child]);
                    assert!(outer.contains(&inner), "decoded parent must contain children");
                }
            }
        }
    }
}

impl<T, P> SpatialPartition<T, P> for CompressedAabbTree<T, P>
where
    T: Scalar,
    P: Bounded<T> + Clone + Eq + Hash,
{
    fn add(&mut self, item: P) -> Result<Key, Error> {
        let key = self.items.insert_with(item, |_, _| UNPLACED)?;
        match self.encode_current() {
            Ok(encoded) => {
                self.install(encoded);
                Ok(key)
            }
            Err(err) => {
                self.forget(key);
                Err(err)
            }
        }
    }

    fn remove(&mut self, item: &P) -> Result<P, Error> {
        let slot = self.items.slot_of(item)?;
        let mut boxes = self.items.slot_boxes()?;
        boxes.retain(|(s, _)| *s != slot);
        let encoded = encode(&mut boxes)?;
        let (_, entry) = self.items.remove(item)?;
        self.install(encoded);
        Ok(entry.item)
    }

    fn update(&mut self, item: P) -> Result<Key, Error> {
        let slot = self.items.slot_of(&item)?;
        let aabb = checked_aabb(&item)?;
        if self.items.entry(slot).aabb == aabb {
            return Ok(self.items.replace(slot, item, aabb));
        }
        let mut boxes = self.items.slot_boxes()?;
        for (s, b) in &mut boxes {
            if *s == slot {
                *b = aabb;
            }
        }
        let encoded = encode(&mut boxes)?;
        let key = self.items.replace(slot, item, aabb);
        self.install(encoded);
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
        self.nodes.clear();
        self.quantizer = Quantizer::new(Aabb3D::from_point([T::zero(); 3]));
    }

    fn rebuild(&mut self) -> Result<(), Error> {
        let encoded = self.encode_current()?;
        self.install(encoded);
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
        self.descend(move |b| b.overlaps(&aabb))
    }

    fn query_ray<'a>(&'a self, ray: Ray3D<T>, max_len: T) -> impl Iterator<Item = &'a P>
    where
        P: 'a,
    {
        self.descend(move |b| b.intersect_ray(&ray, max_len).is_some())
    }

    fn pairs<'a>(&'a self) -> impl Iterator<Item = (&'a P, &'a P)>
    where
        P: 'a,
    {
        let mut stack = Stack::new();
        if !self.nodes.is_empty() {
            stack.push(FlatTask::Within(0));
        }
        let items = &self.items;
        FlatPairs {
            nodes: &self.nodes,
            quantizer: &self.quantizer,
            stack,
        }
        .map(move |(a, b)| (&items.entry(a).item, &items.entry(b).item))
    }
}

/// Branch-and-bound descent over decoded boxes, yielding leaf slots.
struct FlatDescend<'a, T, F> {
    nodes: &'a [QuantizedNode],
    quantizer: &'a Quantizer<T>,
    stack: Stack<usize>,
    hit: F,
}

impl<T: Scalar, F: FnMut(&Aabb3D<T>) -> bool> Iterator for FlatDescend<'_, T, F> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while let Some(i) = self.stack.pop() {
            let node = &self.nodes[i];
            if !(self.hit)(&self.quantizer.decode_box(node)) {
                continue;
            }
            match node.leaf_slot() {
                Some(slot) => return Some(slot),
                None => {
                    self.stack.push(node.link as usize);
                    self.stack.push(i + 1);
                }
            }
        }
        None
    }
}

#[derive(Copy, Clone, Debug)]
enum FlatTask {
    Within(usize),
    Between(usize, usize),
}

/// Self-pair traversal over decoded boxes; each unordered leaf pair at most once.
struct FlatPairs<'a, T> {
    nodes: &'a [QuantizedNode],
    quantizer: &'a Quantizer<T>,
    stack: Stack<FlatTask>,
}

impl<T: Scalar> FlatPairs<'_, T> {
    fn children(&self, i: usize) -> Option<[usize; 2]> {
        let node = &self.nodes[i];
        match node.leaf_slot() {
            Some(_) => None,
            None => Some([i + 1, node.link as usize]),
        }
    }
}

impl<T: Scalar> Iterator for FlatPairs<'_, T> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        while let Some(task) = self.stack.pop() {
            match task {
                FlatTask::Within(i) => {
                    if let Some([l, r]) = self.children(i) {
                        self.stack.push(FlatTask::Between(l, r));
                        self.stack.push(FlatTask::Within(r));
                        self.stack.push(FlatTask::Within(l));
                    }
                }
                FlatTask::Between(a, b) => {
                    let (na, nb) = (&self.nodes[a], &self.nodes[b]);
                    let (ba, bb) = (self.quantizer.decode_box(na), self.quantizer.decode_box(nb));
                    if !ba.overlaps(&bb) {
                        continue;
                    }
                    match (self.children(a), self.children(b)) {
                        (None, None) => {
                            if let (Some(sa), Some(sb)) = (na.leaf_slot(), nb.leaf_slot()) {
                                return Some((sa, sb));
                            }
                        }
                        (Some([a0, a1]), None) => {
                            self.stack.push(FlatTask::Between(a1, b));
                            self.stack.push(FlatTask::Between(a0, b));
                        }
                        (None, Some([b0, b1])) => {
                            self.stack.push(FlatTask::Between(a, b1));
                            self.stack.push(FlatTask::Between(a, b0));
                        }
                        (Some([a0, a1]), Some([b0, b1])) => {
                            if ba.surface_area() >= bb.surface_area() {
                                self.stack.push(FlatTask::Between(a1, b));
                                self.stack.push(FlatTask::Between(a0, b));
                            } else {
                                self.stack.push(FlatTask::Between(a, b1));
                                self.stack.push(FlatTask::Between(a, b0));
                            }
                        }
                    }
                }
            }
        }
        None
    }
}
