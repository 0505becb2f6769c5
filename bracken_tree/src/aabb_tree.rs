// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incrementally buildable binary AABB tree.
//!
//! The tree is built from an element snapshot either eagerly or in
//! time-sliced steps: splitting work is queued and
//! [`AabbTree::progress_time_slicing`] performs a bounded number of splits
//! per call. A time-sliced build and an immediate build of the same
//! snapshot produce identical node layouts.
//!
//! Elements mutated after the build do not reshape the tree. They move to a
//! dirty side list that every query scans linearly; once the list outgrows
//! [`TreeConfig::dirty_limit`] the tree re-seeds a full rebuild from its
//! current element view. Elements with no bounds live in a global set that
//! every query visits.

use alloc::vec::Vec;
use core::fmt::Debug;

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::Payload;
use crate::bounds::{Aabb3, Ray, ray_hits_aabb, sweep_hits_aabb};
use crate::grid::BoundingGrid;
use crate::tree::TreeConfig;
use crate::visit::{CurrentLength, QueryVisitor, VisitorControl};

/// One element as seen by a leaf: payload plus world-space bounds.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeafElement<P> {
    /// Opaque handle back into the caller's storage.
    pub payload: P,
    /// World-space bounds at build time.
    pub bounds: Aabb3,
}

/// Storage strategy for the elements under one tree leaf.
///
/// Implementations receive the leaf's element slice at build time and serve
/// the same visitor queries as a whole tree. A leaf may itself be another
/// spatial structure (see [`GridLeaf`]), which yields a two-level hybrid for
/// clustered data.
pub trait TreeLeaf<P: Payload>: Clone + Debug {
    /// Build a leaf from its elements.
    fn from_elements(config: &TreeConfig, elements: Vec<LeafElement<P>>) -> Self;

    /// Visit elements overlapping `bounds`.
    fn overlap<V: QueryVisitor<P>>(&self, bounds: &Aabb3, v: &mut V) -> VisitorControl;

    /// Visit elements hit by the ray within the current length.
    fn raycast<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl;

    /// Visit elements touched by a swept box within the current length.
    fn sweep<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        half_extents: [f64; 3],
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl;

    /// Remove an element, reporting whether it was present.
    fn remove(&mut self, payload: P) -> bool;

    /// Elements currently stored, for rebuild re-seeding.
    fn elements(&self) -> Vec<LeafElement<P>>;

    /// Number of elements stored.
    fn len(&self) -> usize;

    /// Whether the leaf stores no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flat-array leaf: linear scans over a short element list.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeafArray<P> {
    elements: Vec<LeafElement<P>>,
}

impl<P: Payload> TreeLeaf<P> for LeafArray<P> {
    fn from_elements(_config: &TreeConfig, elements: Vec<LeafElement<P>>) -> Self {
        Self { elements }
    }

    fn overlap<V: QueryVisitor<P>>(&self, bounds: &Aabb3, v: &mut V) -> VisitorControl {
        for e in &self.elements {
            if e.bounds.overlaps(bounds) && v.overlap(e.payload) == VisitorControl::Stop {
                return VisitorControl::Stop;
            }
        }
        VisitorControl::Continue
    }

    fn raycast<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        for e in &self.elements {
            if ray_hits_aabb(ray, &e.bounds, cur.get()).is_some()
                && v.raycast(e.payload, cur) == VisitorControl::Stop
            {
                return VisitorControl::Stop;
            }
        }
        VisitorControl::Continue
    }

    fn sweep<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        half_extents: [f64; 3],
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        for e in &self.elements {
            if sweep_hits_aabb(ray, &e.bounds, half_extents, cur.get()).is_some()
                && v.sweep(e.payload, cur) == VisitorControl::Stop
            {
                return VisitorControl::Stop;
            }
        }
        VisitorControl::Continue
    }

    fn remove(&mut self, payload: P) -> bool {
        if let Some(pos) = self.elements.iter().position(|e| e.payload == payload) {
            self.elements.swap_remove(pos);
            true
        } else {
            false
        }
    }

    fn elements(&self) -> Vec<LeafElement<P>> {
        self.elements.clone()
    }

    fn len(&self) -> usize {
        self.elements.len()
    }
}

/// Nested-grid leaf: a small uniform grid under each tree leaf.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridLeaf<P: Payload> {
    grid: BoundingGrid<P>,
}

impl<P: Payload> TreeLeaf<P> for GridLeaf<P> {
    fn from_elements(config: &TreeConfig, elements: Vec<LeafElement<P>>) -> Self {
        let grid = BoundingGrid::from_elements(
            config.grid,
            elements
                .iter()
                .map(|e| (e.payload, e.bounds, true))
                .collect::<Vec<_>>()
                .iter(),
        );
        Self { grid }
    }

    fn overlap<V: QueryVisitor<P>>(&self, bounds: &Aabb3, v: &mut V) -> VisitorControl {
        self.grid.overlap(bounds, v)
    }

    fn raycast<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        self.grid.raycast_with(ray, cur, v)
    }

    fn sweep<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        half_extents: [f64; 3],
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        self.grid.sweep_with(ray, half_extents, cur, v)
    }

    fn remove(&mut self, payload: P) -> bool {
        self.grid.remove_element(payload)
    }

    fn elements(&self) -> Vec<LeafElement<P>> {
        self.grid
            .elements()
            .map(|(payload, bounds, _)| LeafElement { payload, bounds })
            .collect()
    }

    fn len(&self) -> usize {
        self.grid.len()
    }
}

const NONE: i32 = -1;

#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct Node {
    bounds: Aabb3,
    children: [i32; 2],
    leaf: i32,
}

#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct WorkItem {
    node: usize,
    start: usize,
    end: usize,
    depth: u32,
}

/// Binary AABB tree over leaves of type `L`.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AabbTree<P: Payload, L: TreeLeaf<P>> {
    config: TreeConfig,
    nodes: Vec<Node>,
    leaves: Vec<L>,
    payload_to_leaf: HashMap<P, usize>,
    /// Elements with no bounds; visited by every query.
    global: HashSet<P>,
    /// Bounded elements mutated after the build, scanned linearly.
    dirty: Vec<LeafElement<P>>,
    dirty_map: HashMap<P, usize>,
    /// Build snapshot; drained once time-slicing completes.
    scratch: Vec<LeafElement<P>>,
    order: Vec<usize>,
    work: Vec<WorkItem>,
    complete: bool,
}

impl<P: Payload, L: TreeLeaf<P>> Debug for AabbTree<P, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AabbTree")
            .field("nodes", &self.nodes.len())
            .field("leaves", &self.leaves.len())
            .field("dirty", &self.dirty.len())
            .field("global", &self.global.len())
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}

impl<P: Payload, L: TreeLeaf<P>> AabbTree<P, L> {
    /// Create an empty, complete tree.
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            leaves: Vec::new(),
            payload_to_leaf: HashMap::new(),
            global: HashSet::new(),
            dirty: Vec::new(),
            dirty_map: HashMap::new(),
            scratch: Vec::new(),
            order: Vec::new(),
            work: Vec::new(),
            complete: true,
        }
    }

    /// Build from an initial element view.
    ///
    /// With `time_sliced`, construction work is queued and must be advanced
    /// with [`AabbTree::progress_time_slicing`]; otherwise the tree is built
    /// eagerly before returning.
    pub fn from_elements(
        config: TreeConfig,
        elements: &[(P, Aabb3, bool)],
        time_sliced: bool,
    ) -> Self {
        let mut tree = Self::new(config);
        tree.seed_build(elements);
        if !time_sliced {
            tree.progress_time_slicing(true);
        }
        tree
    }

    /// Total number of elements stored (clean, dirty, and unbounded).
    pub fn len(&self) -> usize {
        let clean = if self.complete {
            self.leaves.iter().map(TreeLeaf::len).sum()
        } else {
            self.scratch.len()
        };
        clean + self.dirty.len() + self.global.len()
    }

    /// Whether the tree stores no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of elements stored outside the clean built structure.
    ///
    /// This grows by one for each element first touched after the build and
    /// resets to zero when the dirty limit forces a rebuild.
    pub fn num_dirty_elements(&self) -> usize {
        self.dirty.len()
    }

    /// Whether all queued build work has been performed.
    pub fn is_time_slicing_complete(&self) -> bool {
        self.complete
    }

    /// Discard the current structure and queue a rebuild over `elements`.
    pub fn seed_build(&mut self, elements: &[(P, Aabb3, bool)]) {
        self.nodes.clear();
        self.leaves.clear();
        self.payload_to_leaf.clear();
        self.global.clear();
        self.dirty.clear();
        self.dirty_map.clear();
        self.scratch.clear();
        self.order.clear();
        self.work.clear();

        for &(payload, bounds, has_bounds) in elements {
            if has_bounds {
                self.scratch.push(LeafElement { payload, bounds });
            } else {
                self.global.insert(payload);
            }
        }
        if self.scratch.is_empty() {
            self.complete = true;
            return;
        }
        self.order = (0..self.scratch.len()).collect();
        let root_bounds = self.range_bounds(0, self.scratch.len());
        self.nodes.push(Node {
            bounds: root_bounds,
            children: [NONE; 2],
            leaf: NONE,
        });
        self.work.push(WorkItem {
            node: 0,
            start: 0,
            end: self.scratch.len(),
            depth: 0,
        });
        self.complete = false;
    }

    /// Perform a bounded amount of queued build work.
    ///
    /// Each call performs at most [`TreeConfig::iterations_per_slice`] split
    /// steps (0 means unbounded). `force` ignores the budget and drains the
    /// queue. Returns whether the build is now complete.
    pub fn progress_time_slicing(&mut self, force: bool) -> bool {
        if self.complete {
            return true;
        }
        let budget = if force || self.config.iterations_per_slice == 0 {
            usize::MAX
        } else {
            self.config.iterations_per_slice
        };
        for _ in 0..budget {
            let Some(item) = self.work.pop() else {
                break;
            };
            self.process_work_item(item);
        }
        if self.work.is_empty() {
            self.complete = true;
            self.scratch.clear();
            self.order.clear();
        }
        self.complete
    }

    fn range_bounds(&self, start: usize, end: usize) -> Aabb3 {
        let mut bounds = Aabb3::EMPTY;
        for &i in &self.order[start..end] {
            bounds = bounds.union(&self.scratch[i].bounds);
        }
        bounds
    }

    fn process_work_item(&mut self, item: WorkItem) {
        let count = item.end - item.start;
        let at_capacity = count <= self.config.max_children_in_leaf;
        let at_depth = item.depth >= self.config.max_tree_depth;
        if at_capacity || at_depth {
            let elements: Vec<LeafElement<P>> = self.order[item.start..item.end]
                .iter()
                .map(|&i| self.scratch[i])
                .collect();
            let leaf_idx = self.leaves.len();
            for e in &elements {
                self.payload_to_leaf.insert(e.payload, leaf_idx);
            }
            self.leaves.push(L::from_elements(&self.config, elements));
            #[allow(
                clippy::cast_possible_truncation,
                reason = "Leaf and node counts stay well below i32::MAX."
            )]
            {
                self.nodes[item.node].leaf = leaf_idx as i32;
            }
            return;
        }

        // Spatial-mid split on the widest axis; median fallback keeps the
        // recursion terminating when every centroid lands on one side.
        let bounds = self.nodes[item.node].bounds;
        let axis = bounds.largest_axis();
        let split = bounds.center()[axis];
        let slice = &mut self.order[item.start..item.end];
        let scratch = &self.scratch;
        let mut mid = partition_in_place(slice, |&i| scratch[i].bounds.center()[axis] < split);
        if mid == 0 || mid == count {
            slice.sort_unstable_by(|&a, &b| {
                let ca = scratch[a].bounds.center()[axis];
                let cb = scratch[b].bounds.center()[axis];
                ca.partial_cmp(&cb).unwrap_or(core::cmp::Ordering::Equal)
            });
            mid = count / 2;
        }
        let mid = item.start + mid;

        let left_bounds = self.range_bounds(item.start, mid);
        let right_bounds = self.range_bounds(mid, item.end);
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Leaf and node counts stay well below i32::MAX."
        )]
        let (left, right) = {
            let left = self.nodes.len();
            self.nodes.push(Node {
                bounds: left_bounds,
                children: [NONE; 2],
                leaf: NONE,
            });
            let right = self.nodes.len();
            self.nodes.push(Node {
                bounds: right_bounds,
                children: [NONE; 2],
                leaf: NONE,
            });
            self.nodes[item.node].children = [left as i32, right as i32];
            (left, right)
        };

        // Push right first so the left child is processed next (LIFO); the
        // order is identical for sliced and immediate builds.
        self.work.push(WorkItem {
            node: right,
            start: mid,
            end: item.end,
            depth: item.depth + 1,
        });
        self.work.push(WorkItem {
            node: left,
            start: item.start,
            end: mid,
            depth: item.depth + 1,
        });
    }

    /// Collect the full element view: clean leaves, dirty list, and
    /// unbounded elements.
    pub(crate) fn element_view(&self) -> Vec<(P, Aabb3, bool)> {
        let mut out = Vec::with_capacity(self.len());
        if self.complete {
            for leaf in &self.leaves {
                for e in leaf.elements() {
                    out.push((e.payload, e.bounds, true));
                }
            }
        } else {
            // The build snapshot still holds every bounded element; leaves
            // built so far are copies of part of it.
            for e in &self.scratch {
                out.push((e.payload, e.bounds, true));
            }
        }
        for e in &self.dirty {
            out.push((e.payload, e.bounds, true));
        }
        for &p in &self.global {
            out.push((p, Aabb3::EMPTY, false));
        }
        out
    }

    /// Finish any in-flight build before mutating. Mutations against a
    /// half-built structure would be lost when the remaining work runs.
    fn finish_build_for_mutation(&mut self) {
        if !self.complete {
            self.progress_time_slicing(true);
        }
    }

    /// Insert a new element or reposition an existing one.
    ///
    /// Repositioned and newly inserted elements go to the dirty list; once
    /// it exceeds the configured dirty limit the tree rebuilds itself
    /// synchronously from its full element view.
    pub fn update_element(&mut self, payload: P, bounds: Aabb3, has_bounds: bool) {
        self.finish_build_for_mutation();

        if let Some(&slot) = self.dirty_map.get(&payload) {
            if has_bounds {
                self.dirty[slot].bounds = bounds;
                return;
            }
            self.remove_from_dirty(payload, slot);
            self.global.insert(payload);
            return;
        }
        if let Some(leaf_idx) = self.payload_to_leaf.remove(&payload) {
            let removed = self.leaves[leaf_idx].remove(payload);
            debug_assert!(removed, "payload_to_leaf pointed at a leaf without it");
        }
        self.global.remove(&payload);

        if !has_bounds {
            self.global.insert(payload);
            return;
        }
        self.dirty_map.insert(payload, self.dirty.len());
        self.dirty.push(LeafElement { payload, bounds });

        if self.dirty.len() > self.config.dirty_limit {
            // Anti-starvation: fold the backlog into a fresh build now.
            let view = self.element_view();
            self.seed_build(&view);
            self.progress_time_slicing(true);
        }
    }

    /// Remove an element. A no-op if it is absent (idempotent cleanup).
    pub fn remove_element(&mut self, payload: P) {
        self.finish_build_for_mutation();

        if let Some(&slot) = self.dirty_map.get(&payload) {
            self.remove_from_dirty(payload, slot);
            return;
        }
        if self.global.remove(&payload) {
            return;
        }
        if let Some(leaf_idx) = self.payload_to_leaf.remove(&payload) {
            let removed = self.leaves[leaf_idx].remove(payload);
            debug_assert!(removed, "payload_to_leaf pointed at a leaf without it");
        }
    }

    fn remove_from_dirty(&mut self, payload: P, slot: usize) {
        self.dirty_map.remove(&payload);
        self.dirty.swap_remove(slot);
        if let Some(moved) = self.dirty.get(slot) {
            // Patch the moved element's back-reference.
            self.dirty_map.insert(moved.payload, slot);
        }
    }

    /// Visit elements whose bounds overlap `bounds`.
    pub fn overlap<V: QueryVisitor<P>>(&self, bounds: &Aabb3, v: &mut V) -> VisitorControl {
        for e in &self.dirty {
            if e.bounds.overlaps(bounds) && v.overlap(e.payload) == VisitorControl::Stop {
                return VisitorControl::Stop;
            }
        }
        for &p in &self.global {
            if v.overlap(p) == VisitorControl::Stop {
                return VisitorControl::Stop;
            }
        }
        if !self.complete {
            for e in &self.scratch {
                if e.bounds.overlaps(bounds) && v.overlap(e.payload) == VisitorControl::Stop {
                    return VisitorControl::Stop;
                }
            }
            return VisitorControl::Continue;
        }

        let mut stack: SmallVec<[usize; 32]> = SmallVec::new();
        if !self.nodes.is_empty() {
            stack.push(0);
        }
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if !node.bounds.overlaps(bounds) {
                continue;
            }
            if node.leaf >= 0 {
                #[allow(clippy::cast_sign_loss, reason = "Checked non-negative above.")]
                let leaf = &self.leaves[node.leaf as usize];
                if leaf.overlap(bounds, v) == VisitorControl::Stop {
                    return VisitorControl::Stop;
                }
            } else {
                for &child in &node.children {
                    if child >= 0 {
                        #[allow(clippy::cast_sign_loss, reason = "Checked non-negative above.")]
                        stack.push(child as usize);
                    }
                }
            }
        }
        VisitorControl::Continue
    }

    /// Visit elements whose bounds the ray hits within `max_len`.
    pub fn raycast<V: QueryVisitor<P>>(&self, ray: Ray, max_len: f64, v: &mut V) {
        let mut cur = CurrentLength::new(max_len);
        let _ = self.raycast_with(&ray, &mut cur, v);
    }

    pub(crate) fn raycast_with<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        self.cast_with(
            v,
            cur,
            |b, limit| ray_hits_aabb(ray, b, limit).is_some(),
            |leaf, cur, v| leaf.raycast(ray, cur, v),
            |p, cur, v| v.raycast(p, cur),
        )
    }

    /// Visit elements a box swept along the ray would touch within
    /// `max_len`.
    pub fn sweep<V: QueryVisitor<P>>(
        &self,
        ray: Ray,
        max_len: f64,
        half_extents: [f64; 3],
        v: &mut V,
    ) {
        let mut cur = CurrentLength::new(max_len);
        let _ = self.sweep_with(&ray, half_extents, &mut cur, v);
    }

    pub(crate) fn sweep_with<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        half_extents: [f64; 3],
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        self.cast_with(
            v,
            cur,
            |b, limit| sweep_hits_aabb(ray, b, half_extents, limit).is_some(),
            |leaf, cur, v| leaf.sweep(ray, half_extents, cur, v),
            |p, cur, v| v.sweep(p, cur),
        )
    }

    /// Shared raycast/sweep traversal: dirty list, then the global set,
    /// then the node hierarchy (or the build snapshot while incomplete).
    fn cast_with<V: QueryVisitor<P>>(
        &self,
        v: &mut V,
        cur: &mut CurrentLength,
        hits: impl Fn(&Aabb3, f64) -> bool,
        visit_leaf: impl Fn(&L, &mut CurrentLength, &mut V) -> VisitorControl,
        visit_one: impl Fn(P, &mut CurrentLength, &mut V) -> VisitorControl,
    ) -> VisitorControl {
        for e in &self.dirty {
            if hits(&e.bounds, cur.get()) && visit_one(e.payload, cur, v) == VisitorControl::Stop {
                return VisitorControl::Stop;
            }
        }
        for &p in &self.global {
            if visit_one(p, cur, v) == VisitorControl::Stop {
                return VisitorControl::Stop;
            }
        }
        if !self.complete {
            for e in &self.scratch {
                if hits(&e.bounds, cur.get())
                    && visit_one(e.payload, cur, v) == VisitorControl::Stop
                {
                    return VisitorControl::Stop;
                }
            }
            return VisitorControl::Continue;
        }

        let mut stack: SmallVec<[usize; 32]> = SmallVec::new();
        if !self.nodes.is_empty() {
            stack.push(0);
        }
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            // Re-testing against the narrowed length prunes subtrees that
            // were pushed before the visitor shrank it.
            if !hits(&node.bounds, cur.get()) {
                continue;
            }
            if node.leaf >= 0 {
                #[allow(clippy::cast_sign_loss, reason = "Checked non-negative above.")]
                let leaf = &self.leaves[node.leaf as usize];
                if visit_leaf(leaf, cur, v) == VisitorControl::Stop {
                    return VisitorControl::Stop;
                }
            } else {
                for &child in &node.children {
                    if child >= 0 {
                        #[allow(clippy::cast_sign_loss, reason = "Checked non-negative above.")]
                        stack.push(child as usize);
                    }
                }
            }
        }
        VisitorControl::Continue
    }

    /// Node bounds as `(center, extents)` pairs in tree order.
    ///
    /// Two trees built from the same snapshot compare equal here regardless
    /// of time-slicing.
    pub fn node_bounds(&self) -> Vec<([f64; 3], [f64; 3])> {
        self.nodes
            .iter()
            .map(|n| (n.bounds.center(), n.bounds.extents()))
            .collect()
    }
}

/// Reorders `slice` so elements satisfying `pred` come first; returns their
/// count. Deterministic for a given input order.
fn partition_in_place<T: Copy>(slice: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..slice.len() {
        if pred(&slice[i]) {
            slice.swap(mid, i);
            mid += 1;
        }
    }
    mid
}
