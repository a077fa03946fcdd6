// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Arena-backed binary AABB tree shared by the static, dynamic and adaptive partitions.
//!
//! Nodes live in a flat arena and refer to each other by [`NodeIdx`]. The arena owns every
//! node; parent and child links are plain indices. Freed nodes go on a free list and are
//! reused by later insertions.
//!
//! The tree only knows item *slots* and the boxes it was given for them (possibly
//! fattened). Iterators here yield candidate slots; the owning partition confirms them
//! against tight bounds.

use alloc::vec::Vec;
use core::fmt::Debug;

use smallvec::SmallVec;

use crate::error::Error;
use crate::types::{Aabb3D, Scalar, ScalarAcc};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeIdx(u32);

impl NodeIdx {
    /// Stand-in for a leaf that a pending bulk build will assign.
    pub(crate) const PLACEHOLDER: Self = Self(u32::MAX);

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Node arenas are limited to 32-bit indices."
    )]
    const fn new(i: usize) -> Self {
        Self(i as u32)
    }

    pub(crate) const fn get(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) enum Kind {
    Leaf(usize),
    Internal([NodeIdx; 2]),
}

#[derive(Clone, Debug)]
pub(crate) struct Node<T> {
    pub(crate) bbox: Aabb3D<T>,
    pub(crate) parent: Option<NodeIdx>,
    /// 0 for leaves.
    pub(crate) height: u32,
    pub(crate) kind: Kind,
}

impl<T> Node<T> {
    pub(crate) const fn is_leaf(&self) -> bool {
        matches!(self.kind, Kind::Leaf(_))
    }
}

/// Traversal stack; inline storage covers a balanced tree, deeper ones spill to the heap.
type Stack<E> = SmallVec<[E; 32]>;

/// Depth statistics of a tree, used to judge whether a rebuild pays off.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TreeQuality<A> {
    /// Number of leaves.
    pub leaves: usize,
    /// Mean depth of the leaves (root has depth 0).
    pub average_depth: f64,
    /// Deepest leaf.
    pub max_depth: usize,
    /// `average_depth / max(1, ceil(log2(leaves)))`; 1.0 or lower is a well balanced tree.
    pub depth_ratio: f64,
    /// Sum of surface areas of internal nodes (the SAH traversal cost, unnormalized).
    pub node_area_sum: A,
}

pub(crate) struct Tree<T> {
    nodes: Vec<Node<T>>,
    free_list: Vec<NodeIdx>,
    root: Option<NodeIdx>,
    leaves: usize,
}

impl<T: Scalar> Default for Tree<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: None,
            leaves: 0,
        }
    }
}

impl<T: Scalar> Debug for Tree<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tree")
            .field("arena_nodes", &self.nodes.len())
            .field("free_nodes", &self.free_list.len())
            .field("leaves", &self.leaves)
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

impl<T: Scalar> Tree<T> {
    pub(crate) const fn root(&self) -> Option<NodeIdx> {
        self.root
    }

    pub(crate) fn node(&self, idx: NodeIdx) -> &Node<T> {
        &self.nodes[idx.get()]
    }

    fn node_mut(&mut self, idx: NodeIdx) -> &mut Node<T> {
        &mut self.nodes[idx.get()]
    }

    /// Height of the root (0 for a single leaf or an empty tree).
    pub(crate) fn height(&self) -> u32 {
        self.root.map(|r| self.node(r).height).unwrap_or(0)
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.free_list.clear();
        self.root = None;
        self.leaves = 0;
    }

    fn allocate(&mut self, node: Node<T>) -> NodeIdx {
        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx.get()] = node;
            idx
        } else {
            self.nodes.push(node);
            NodeIdx::new(self.nodes.len() - 1)
        }
    }

    fn release(&mut self, idx: NodeIdx) {
        self.free_list.push(idx);
    }

    /// Recompute an internal node's box and height from its children.
    fn refit(&mut self, idx: NodeIdx) {
        if let Kind::Internal([a, b]) = self.node(idx).kind {
            let bbox = self.node(a).bbox.union(&self.node(b).bbox);
            let height = 1 + self.node(a).height.max(self.node(b).height);
            let n = self.node_mut(idx);
            n.bbox = bbox;
            n.height = height;
        }
    }

    fn replace_child(&mut self, parent: Option<NodeIdx>, old: NodeIdx, new: NodeIdx) {
        match parent {
            Some(p) => {
                if let Kind::Internal(children) = &mut self.node_mut(p).kind {
                    if children[0] == old {
                        children[0] = new;
                    } else {
                        debug_assert_eq!(children[1], old, "parent link out of sync");
                        children[1] = new;
                    }
                }
            }
            None => self.root = Some(new),
        }
        self.node_mut(new).parent = parent;
    }

    /// Insert a new leaf for `slot` and return its node.
    pub(crate) fn insert_leaf(&mut self, slot: usize, bbox: Aabb3D<T>, balance: bool) -> NodeIdx {
        let leaf = self.allocate(Node {
            bbox,
            parent: None,
            height: 0,
            kind: Kind::Leaf(slot),
        });
        self.leaves += 1;
        self.attach(leaf, balance);
        leaf
    }

    /// Remove a leaf node from the tree and free it.
    pub(crate) fn remove_leaf(&mut self, leaf: NodeIdx, balance: bool) {
        self.detach(leaf, balance);
        self.release(leaf);
        self.leaves -= 1;
    }

    /// Give a leaf a new box and reposition it.
    ///
    /// The leaf keeps its node index, so callers holding it stay valid.
    pub(crate) fn move_leaf(&mut self, leaf: NodeIdx, bbox: Aabb3D<T>, balance: bool) {
        self.detach(leaf, balance);
        self.node_mut(leaf).bbox = bbox;
        self.attach(leaf, balance);
    }

    /// Cost-guided descent for the best sibling of a new leaf.
    ///
    /// At each internal node, compare the cost of pairing the leaf with the node itself
    /// against the cheapest growth of either child plus the area every ancestor inherits.
    fn find_sibling(&self, root: NodeIdx, leaf_box: &Aabb3D<T>) -> NodeIdx {
        let mut index = root;
        while let Kind::Internal([c1, c2]) = self.node(index).kind {
            let node = self.node(index);
            let area = node.bbox.surface_area();
            let combined_area = node.bbox.union(leaf_box).surface_area();
            let cost = combined_area + combined_area;
            let growth = combined_area - area;
            let inheritance = growth + growth;

            let descend_cost = |child: NodeIdx| -> ScalarAcc<T> {
                let c = self.node(child);
                let new_area = c.bbox.union(leaf_box).surface_area();
                if c.is_leaf() {
                    new_area + inheritance
                } else {
                    (new_area - c.bbox.surface_area()) + inheritance
                }
            };
            let cost1 = descend_cost(c1);
            let cost2 = descend_cost(c2);

            if cost < cost1 && cost < cost2 {
                break;
            }
            index = if cost1 < cost2 { c1 } else { c2 };
        }
        index
    }

    fn attach(&mut self, leaf: NodeIdx, balance: bool) {
        let Some(root) = self.root else {
            self.root = Some(leaf);
            self.node_mut(leaf).parent = None;
            return;
        };

        let leaf_box = self.node(leaf).bbox;
        let sibling = self.find_sibling(root, &leaf_box);

        let old_parent = self.node(sibling).parent;
        let new_parent = self.allocate(Node {
            bbox: leaf_box.union(&self.node(sibling).bbox),
            parent: None,
            height: self.node(sibling).height + 1,
            kind: Kind::Internal([sibling, leaf]),
        });
        self.replace_child(old_parent, sibling, new_parent);
        self.node_mut(sibling).parent = Some(new_parent);
        self.node_mut(leaf).parent = Some(new_parent);

        self.refit_upward(Some(new_parent), balance);
    }

    fn detach(&mut self, leaf: NodeIdx, balance: bool) {
        let Some(parent) = self.node(leaf).parent else {
            debug_assert_eq!(self.root, Some(leaf), "orphan leaf that is not the root");
            self.root = None;
            return;
        };
        let Kind::Internal([a, b]) = self.node(parent).kind else {
            unreachable!("leaf parent must be internal");
        };
        let sibling = if a == leaf { b } else { a };
        let grand_parent = self.node(parent).parent;

        // Promote the sibling into the parent's slot.
        self.replace_child(grand_parent, parent, sibling);
        self.release(parent);
        self.node_mut(leaf).parent = None;

        self.refit_upward(grand_parent, balance);
    }

    /// Walk from `start` to the root, rebalancing (optionally) and refitting.
    fn refit_upward(&mut self, start: Option<NodeIdx>, balance: bool) {
        let mut index = start;
        while let Some(i) = index {
            let i = if balance { self.rotate(i) } else { i };
            self.refit(i);
            index = self.node(i).parent;
        }
    }

    /// AVL-style rotation: lift the taller child of `a` when the heights of its children
    /// differ by more than one. Returns the node now occupying `a`'s position.
    fn rotate(&mut self, a: NodeIdx) -> NodeIdx {
        let Kind::Internal([b, c]) = self.node(a).kind else {
            return a;
        };
        let hb = self.node(b).height;
        let hc = self.node(c).height;
        if hc > hb + 1 {
            self.lift(a, 1)
        } else if hb > hc + 1 {
            self.lift(a, 0)
        } else {
            a
        }
    }

    /// Lift `a`'s child at `side` into `a`'s position.
    ///
    /// The lifted child `c` keeps its taller child and hands the other one down to `a`.
    /// With equal child heights, the one that makes `a` smaller moves down.
    fn lift(&mut self, a: NodeIdx, side: usize) -> NodeIdx {
        let Kind::Internal(a_children) = self.node(a).kind else {
            return a;
        };
        let c = a_children[side];
        let stay = a_children[1 - side];
        let Kind::Internal([f, g]) = self.node(c).kind else {
            return a;
        };

        let hf = self.node(f).height;
        let hg = self.node(g).height;
        let (keep, give) = if hf > hg {
            (f, g)
        } else if hg > hf {
            (g, f)
        } else {
            let stay_box = self.node(stay).bbox;
            let with_f = stay_box.union(&self.node(f).bbox).surface_area();
            let with_g = stay_box.union(&self.node(g).bbox).surface_area();
            if with_f <= with_g { (g, f) } else { (f, g) }
        };

        let a_parent = self.node(a).parent;
        self.replace_child(a_parent, a, c);

        let mut new_a_children = a_children;
        new_a_children[side] = give;
        self.node_mut(a).kind = Kind::Internal(new_a_children);
        self.node_mut(give).parent = Some(a);

        self.node_mut(c).kind = Kind::Internal([a, keep]);
        self.node_mut(a).parent = Some(c);

        self.refit(a);
        self.refit(c);
        c
    }

    /// Build a balanced tree top-down from `items`.
    ///
    /// Each node splits its items with an SAH sweep over all three axes. Returns the tree
    /// and the leaf node of every slot. Fails without side effects if storage cannot be
    /// reserved.
    pub(crate) fn build(
        items: &mut [(usize, Aabb3D<T>)],
    ) -> Result<(Self, Vec<(usize, NodeIdx)>), Error> {
        let mut tree = Self::default();
        let mut leaves = Vec::new();
        let n = items.len();
        if n == 0 {
            return Ok((tree, leaves));
        }
        tree.nodes.try_reserve_exact(2 * n - 1)?;
        leaves.try_reserve_exact(n)?;
        let mut prefix = Vec::new();
        prefix.try_reserve_exact(n)?;

        // (range start, range end, parent, side in parent)
        let mut tasks: Stack<(usize, usize, Option<NodeIdx>, usize)> = Stack::new();
        tasks.push((0, n, None, 0));
        while let Some((start, end, parent, side)) = tasks.pop() {
            let range = &mut items[start..end];
            let bbox = bbox_of(range);
            let idx = if range.len() == 1 {
                let slot = range[0].0;
                let idx = tree.allocate(Node {
                    bbox,
                    parent,
                    height: 0,
                    kind: Kind::Leaf(slot),
                });
                leaves.push((slot, idx));
                tree.leaves += 1;
                idx
            } else {
                let k = split_sah(range, &mut prefix);
                // Children are patched in when their tasks run.
                let idx = tree.allocate(Node {
                    bbox,
                    parent,
                    height: 0,
                    kind: Kind::Internal([NodeIdx::new(0), NodeIdx::new(0)]),
                });
                tasks.push((start + k, end, Some(idx), 1));
                tasks.push((start, start + k, Some(idx), 0));
                idx
            };
            match parent {
                Some(p) => {
                    if let Kind::Internal(children) = &mut tree.node_mut(p).kind {
                        children[side] = idx;
                    }
                }
                None => tree.root = Some(idx),
            }
        }

        // Children are always allocated after their parent, so a reverse sweep sees
        // every child before the node above it.
        for i in (0..tree.nodes.len()).rev() {
            if let Kind::Internal([a, b]) = tree.nodes[i].kind {
                tree.nodes[i].height = 1 + tree.node(a).height.max(tree.node(b).height);
            }
        }
        Ok((tree, leaves))
    }

    /// Leaves whose node box satisfies `hit`, pruning subtrees whose box does not.
    pub(crate) fn descend<F>(&self, hit: F) -> Descend<'_, T, F>
    where
        F: FnMut(&Aabb3D<T>) -> bool,
    {
        let mut stack = Stack::new();
        stack.extend(self.root);
        Descend {
            tree: self,
            stack,
            hit,
        }
    }

    /// Every unordered pair of leaves whose node boxes overlap, each exactly once.
    pub(crate) fn self_pairs(&self) -> SelfPairs<'_, T> {
        let mut stack = Stack::new();
        stack.extend(self.root.map(PairTask::Within));
        SelfPairs { tree: self, stack }
    }

    /// Every pair `(leaf of self, leaf of other)` whose node boxes overlap.
    pub(crate) fn cross_pairs<'a>(&'a self, other: &'a Self) -> CrossPairs<'a, T> {
        let mut stack = Stack::new();
        if let (Some(a), Some(b)) = (self.root, other.root) {
            stack.push((a, b));
        }
        CrossPairs {
            left: self,
            right: other,
            stack,
        }
    }

    pub(crate) fn quality(&self) -> TreeQuality<ScalarAcc<T>> {
        let zero = T::widen(T::zero());
        let mut q = TreeQuality {
            leaves: 0,
            average_depth: 0.0,
            max_depth: 0,
            depth_ratio: 0.0,
            node_area_sum: zero,
        };
        let mut depth_sum = 0_usize;
        let mut stack: Stack<(NodeIdx, usize)> = Stack::new();
        stack.extend(self.root.map(|r| (r, 0)));
        while let Some((idx, depth)) = stack.pop() {
            let node = self.node(idx);
            match node.kind {
                Kind::Leaf(_) => {
                    q.leaves += 1;
                    depth_sum += depth;
                    q.max_depth = q.max_depth.max(depth);
                }
                Kind::Internal([a, b]) => {
                    q.node_area_sum = q.node_area_sum + node.bbox.surface_area();
                    stack.push((a, depth + 1));
                    stack.push((b, depth + 1));
                }
            }
        }
        if q.leaves > 0 {
            q.average_depth = depth_sum as f64 / q.leaves as f64;
            let optimal = crate::util::log2_ceil(q.leaves).max(1);
            q.depth_ratio = q.average_depth / optimal as f64;
        }
        q
    }

    /// Check structural invariants; panics on violation.
    #[cfg(test)]
    pub(crate) fn validate(&self) {
        let mut leaves = 0;
        let mut stack: Stack<NodeIdx> = Stack::new();
        if let Some(r) = self.root {
            assert_eq!(self.node(r).parent, None, "root must not have a parent");
            stack.push(r);
        }
        while let Some(idx) = stack.pop() {
            let node = self.node(idx);
            match node.kind {
                Kind::Leaf(_) => {
                    assert_eq!(node.height, 0, "leaf height");
                    leaves += 1;
                }
                Kind::Internal([a, b]) => {
                    for c in [a, b] {
                        assert_eq!(self.node(c).parent, Some(idx), "child -> parent link");
                    }
                    let union = self.node(a).bbox.union(&self.node(b).bbox);
                    assert_eq!(node.bbox, union, "internal box must be the union of children");
                    let h = 1 + self.node(a).height.max(self.node(b).height);
                    assert_eq!(node.height, h, "internal height");
                    stack.push(a);
                    stack.push(b);
                }
            }
        }
        assert_eq!(leaves, self.leaves, "leaf count");
    }
}

fn bbox_of<T: Scalar>(items: &[(usize, Aabb3D<T>)]) -> Aabb3D<T> {
    let mut it = items.iter();
    let Some((_, first)) = it.next() else {
        return Aabb3D::from_point([T::zero(); 3]);
    };
    it.fold(*first, |acc, (_, b)| acc.union(b))
}

fn sort_by_center<T: Scalar>(items: &mut [(usize, Aabb3D<T>)], axis: usize) {
    items.sort_unstable_by(|a, b| {
        a.1.center(axis)
            .partial_cmp(&b.1.center(axis))
            .unwrap_or(core::cmp::Ordering::Equal)
    });
}

/// SAH split: sort along each axis by centroid, precompute prefix/suffix areas, and
/// choose `k` that minimizes `area(LB_k) * k + area(RB_k) * (n - k)`.
///
/// Equal costs prefer the split closest to the middle. When every centroid coincides the
/// split is the median. Leaves `items` sorted along the chosen axis and returns `k`.
fn split_sah<T: Scalar>(
    items: &mut [(usize, Aabb3D<T>)],
    prefix: &mut Vec<ScalarAcc<T>>,
) -> usize {
    let n = items.len();
    debug_assert!(n >= 2, "split requires at least two items");
    let half = n / 2;
    let first = &items[0].1;
    let coincident = items[1..]
        .iter()
        .all(|(_, b)| (0..3).all(|a| b.center(a) == first.center(a)));
    if coincident {
        return half;
    }
    let mut best: Option<(ScalarAcc<T>, usize, usize)> = None;
    for axis in 0..3 {
        sort_by_center(items, axis);

        prefix.clear();
        let mut acc = items[0].1;
        for (_, bb) in items.iter() {
            acc = acc.union(bb);
            prefix.push(acc.surface_area());
        }

        // Walk k downward so the suffix box can be accumulated in place.
        let mut suffix = items[n - 1].1;
        for k in (1..n).rev() {
            suffix = suffix.union(&items[k].1);
            let cost = prefix[k - 1] * T::acc_from_usize(k)
                + suffix.surface_area() * T::acc_from_usize(n - k);
            let better = match best {
                None => true,
                Some((bc, _, bk)) => cost < bc || (cost == bc && k.abs_diff(half) < bk.abs_diff(half)),
            };
            if better {
                best = Some((cost, axis, k));
            }
        }
    }
    let (_, axis, k) = best.unwrap_or((T::widen(T::zero()), 0, half));
    if axis != 2 {
        sort_by_center(items, axis);
    }
    k
}

/// Lazy branch-and-bound traversal; see [`Tree::descend`].
pub(crate) struct Descend<'a, T, F> {
    tree: &'a Tree<T>,
    stack: Stack<NodeIdx>,
    hit: F,
}

impl<T: Scalar, F: FnMut(&Aabb3D<T>) -> bool> Iterator for Descend<'_, T, F> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while let Some(idx) = self.stack.pop() {
            let node = self.tree.node(idx);
            if !(self.hit)(&node.bbox) {
                continue;
            }
            match node.kind {
                Kind::Leaf(slot) => return Some(slot),
                Kind::Internal([a, b]) => {
                    self.stack.push(b);
                    self.stack.push(a);
                }
            }
        }
        None
    }
}

#[derive(Copy, Clone, Debug)]
enum PairTask {
    /// Pairs inside one subtree.
    Within(NodeIdx),
    /// Pairs with one leaf in each of two disjoint subtrees.
    Between(NodeIdx, NodeIdx),
}

/// Lazy self-pair traversal; see [`Tree::self_pairs`].
pub(crate) struct SelfPairs<'a, T> {
    tree: &'a Tree<T>,
    stack: Stack<PairTask>,
}

impl<T: Scalar> Iterator for SelfPairs<'_, T> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        let tree = self.tree;
        while let Some(task) = self.stack.pop() {
            match task {
                PairTask::Within(idx) => {
                    if let Kind::Internal([a, b]) = tree.node(idx).kind {
                        self.stack.push(PairTask::Between(a, b));
                        self.stack.push(PairTask::Within(b));
                        self.stack.push(PairTask::Within(a));
                    }
                }
                PairTask::Between(a, b) => {
                    let (na, nb) = (tree.node(a), tree.node(b));
                    if !na.bbox.overlaps(&nb.bbox) {
                        continue;
                    }
                    match (na.kind, nb.kind) {
                        (Kind::Leaf(sa), Kind::Leaf(sb)) => return Some((sa, sb)),
                        (Kind::Internal([a0, a1]), Kind::Leaf(_)) => {
                            self.stack.push(PairTask::Between(a1, b));
                            self.stack.push(PairTask::Between(a0, b));
                        }
                        (Kind::Leaf(_), Kind::Internal([b0, b1])) => {
                            self.stack.push(PairTask::Between(a, b1));
                            self.stack.push(PairTask::Between(a, b0));
                        }
                        (Kind::Internal([a0, a1]), Kind::Internal([b0, b1])) => {
                            if na.bbox.surface_area() >= nb.bbox.surface_area() {
                                self.stack.push(PairTask::Between(a1, b));
                                self.stack.push(PairTask::Between(a0, b));
                            } else {
                                self.stack.push(PairTask::Between(a, b1));
                                self.stack.push(PairTask::Between(a, b0));
                            }
                        }
                    }
                }
            }
        }
        None
    }
}

/// Lazy dual-tree traversal; see [`Tree::cross_pairs`].
pub(crate) struct CrossPairs<'a, T> {
    left: &'a Tree<T>,
    right: &'a Tree<T>,
    stack: Stack<(NodeIdx, NodeIdx)>,
}

impl<T: Scalar> Iterator for CrossPairs<'_, T> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        while let Some((a, b)) = self.stack.pop() {
            let (na, nb) = (self.left.node(a), self.right.node(b));
            if !na.bbox.overlaps(&nb.bbox) {
                continue;
            }
            match (na.kind, nb.kind) {
                (Kind::Leaf(sa), Kind::Leaf(sb)) => return Some((sa, sb)),
                (Kind::Internal([a0, a1]), Kind::Leaf(_)) => {
                    self.stack.push((a1, b));
                    self.stack.push((a0, b));
                }
                (Kind::Leaf(_), Kind::Internal([b0, b1])) => {
                    self.stack.push((a, b1));
                    self.stack.push((a, b0));
                }
                (Kind::Internal([a0, a1]), Kind::Internal([b0, b1])) => {
                    if na.bbox.surface_area() >= nb.bbox.surface_area() {
                        self.stack.push((a1, b));
                        self.stack.push((a0, b));
                    } else {
                        self.stack.push((a, b1));
                        self.stack.push((a, b0));
                    }
                }
            }
        }
        None
    }
}
