// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The closed set of spatial tree kinds behind one dispatch type.
//!
//! Callers pick a kind once, at construction, via [`TreeConfig`]; the hot
//! query path then dispatches with a plain `match` instead of a virtual
//! call.

use alloc::vec::Vec;

use crate::Payload;
use crate::aabb_tree::{AabbTree, GridLeaf, LeafArray};
use crate::bounds::{Aabb3, Ray};
use crate::grid::{BoundingGrid, GridConfig};
use crate::visit::{CurrentLength, QueryVisitor, VisitorControl};

/// Which concrete structure a [`SpatialTree`] uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TreeKind {
    /// Uniform grid; O(1) updates, best for roughly uniform density.
    Grid,
    /// Binary AABB tree with flat-array leaves; the general-purpose choice.
    #[default]
    Tree,
    /// AABB tree whose leaves are small uniform grids; a two-level hybrid
    /// for clustered-then-dense data.
    TreeOfGrids,
}

/// Tuning constants for building a [`SpatialTree`].
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeConfig {
    /// Concrete structure to build.
    pub kind: TreeKind,
    /// Elements per leaf before a node splits.
    pub max_children_in_leaf: usize,
    /// Maximum split depth; deeper ranges become (possibly large) leaves.
    pub max_tree_depth: u32,
    /// Split steps performed per [`SpatialTree::progress_time_slicing`]
    /// call; 0 builds eagerly within a single call.
    pub iterations_per_slice: usize,
    /// Post-build updates tolerated before a full rebuild is forced.
    pub dirty_limit: usize,
    /// Configuration for grids (top-level or nested in leaves).
    pub grid: GridConfig,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            kind: TreeKind::default(),
            max_children_in_leaf: 12,
            max_tree_depth: 16,
            iterations_per_slice: 0,
            dirty_limit: 1000,
            grid: GridConfig::default(),
        }
    }
}

/// A single queryable spatial index over a set of payload-keyed bounds.
///
/// All kinds share one contract: visitor-driven raycast/sweep/overlap
/// queries, per-element update/removal, optional time-sliced construction,
/// and deep cloning (via `Clone`) for copy-on-write snapshots.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpatialTree<P: Payload> {
    /// Uniform grid.
    Grid(BoundingGrid<P>),
    /// AABB tree with flat-array leaves.
    Tree(AabbTree<P, LeafArray<P>>),
    /// AABB tree with nested grid leaves.
    TreeOfGrids(AabbTree<P, GridLeaf<P>>),
}

impl<P: Payload> SpatialTree<P> {
    /// Create an empty structure of the configured kind.
    pub fn new(config: TreeConfig) -> Self {
        Self::from_elements(config, &[], false)
    }

    /// Build a structure of the configured kind from an element view.
    ///
    /// With `time_sliced`, tree kinds queue their construction work for
    /// [`SpatialTree::progress_time_slicing`]; a grid always builds in one
    /// step.
    pub fn from_elements(
        config: TreeConfig,
        elements: &[(P, Aabb3, bool)],
        time_sliced: bool,
    ) -> Self {
        match config.kind {
            TreeKind::Grid => Self::Grid(BoundingGrid::from_elements(config.grid, elements)),
            TreeKind::Tree => Self::Tree(AabbTree::from_elements(config, elements, time_sliced)),
            TreeKind::TreeOfGrids => {
                Self::TreeOfGrids(AabbTree::from_elements(config, elements, time_sliced))
            }
        }
    }

    /// Number of elements stored.
    pub fn len(&self) -> usize {
        match self {
            Self::Grid(g) => g.len(),
            Self::Tree(t) => t.len(),
            Self::TreeOfGrids(t) => t.len(),
        }
    }

    /// Whether the structure stores no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a new element or reposition an existing one.
    pub fn update_element(&mut self, payload: P, bounds: Aabb3, has_bounds: bool) {
        match self {
            Self::Grid(g) => g.update_element(payload, bounds, has_bounds),
            Self::Tree(t) => t.update_element(payload, bounds, has_bounds),
            Self::TreeOfGrids(t) => t.update_element(payload, bounds, has_bounds),
        }
    }

    /// Remove an element. A no-op if it is absent (idempotent cleanup).
    pub fn remove_element(&mut self, payload: P) {
        match self {
            Self::Grid(g) => {
                let _ = g.remove_element(payload);
            }
            Self::Tree(t) => t.remove_element(payload),
            Self::TreeOfGrids(t) => t.remove_element(payload),
        }
    }

    /// Count of elements stored outside the clean built structure.
    pub fn num_dirty_elements(&self) -> usize {
        match self {
            // A grid absorbs every update directly into its cells.
            Self::Grid(_) => 0,
            Self::Tree(t) => t.num_dirty_elements(),
            Self::TreeOfGrids(t) => t.num_dirty_elements(),
        }
    }

    /// Perform a bounded amount of queued build work; returns whether the
    /// build is now complete. `force` ignores the per-call budget.
    pub fn progress_time_slicing(&mut self, force: bool) -> bool {
        match self {
            Self::Grid(_) => true,
            Self::Tree(t) => t.progress_time_slicing(force),
            Self::TreeOfGrids(t) => t.progress_time_slicing(force),
        }
    }

    /// Whether all queued build work has been performed.
    pub fn is_time_slicing_complete(&self) -> bool {
        match self {
            Self::Grid(_) => true,
            Self::Tree(t) => t.is_time_slicing_complete(),
            Self::TreeOfGrids(t) => t.is_time_slicing_complete(),
        }
    }

    /// Visit elements whose bounds overlap `bounds`.
    pub fn overlap<V: QueryVisitor<P>>(&self, bounds: &Aabb3, v: &mut V) -> VisitorControl {
        match self {
            Self::Grid(g) => g.overlap(bounds, v),
            Self::Tree(t) => t.overlap(bounds, v),
            Self::TreeOfGrids(t) => t.overlap(bounds, v),
        }
    }

    /// Visit elements whose bounds the ray hits within `max_len`.
    pub fn raycast<V: QueryVisitor<P>>(&self, ray: Ray, max_len: f64, v: &mut V) {
        let mut cur = CurrentLength::new(max_len);
        let _ = self.raycast_with(&ray, &mut cur, v);
    }

    /// Raycast with an externally owned [`CurrentLength`], so one query can
    /// narrow across several structures.
    pub fn raycast_with<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        match self {
            Self::Grid(g) => g.raycast_with(ray, cur, v),
            Self::Tree(t) => t.raycast_with(ray, cur, v),
            Self::TreeOfGrids(t) => t.raycast_with(ray, cur, v),
        }
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

    /// Sweep with an externally owned [`CurrentLength`]; see
    /// [`SpatialTree::raycast_with`].
    pub fn sweep_with<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        half_extents: [f64; 3],
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        match self {
            Self::Grid(g) => g.sweep_with(ray, half_extents, cur, v),
            Self::Tree(t) => t.sweep_with(ray, half_extents, cur, v),
            Self::TreeOfGrids(t) => t.sweep_with(ray, half_extents, cur, v),
        }
    }

    /// Elements currently stored, as `(payload, bounds, has_bounds)`, in an
    /// unspecified order. Intended for re-seeding rebuilds and persistence.
    pub fn elements(&self) -> Vec<(P, Aabb3, bool)> {
        match self {
            Self::Grid(g) => g.elements().collect(),
            Self::Tree(t) => t.element_view(),
            Self::TreeOfGrids(t) => t.element_view(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visit::CollectingVisitor;

    fn row(n: u32) -> Vec<(u32, Aabb3, bool)> {
        (0..n)
            .map(|i| {
                let x = f64::from(i) * 2.0;
                (i, Aabb3::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0]), true)
            })
            .collect()
    }

    #[test]
    fn kinds_agree_on_raycast_counts() {
        let elems = row(10);
        for kind in [TreeKind::Grid, TreeKind::Tree, TreeKind::TreeOfGrids] {
            let tree = SpatialTree::from_elements(
                TreeConfig {
                    kind,
                    max_children_in_leaf: 3,
                    ..TreeConfig::default()
                },
                &elems,
                false,
            );
            let mut v = CollectingVisitor::default();
            tree.raycast(Ray::new([-1.0, 0.5, 0.5], [1.0, 0.0, 0.0]), 100.0, &mut v);
            assert_eq!(v.hits.len(), 10, "kind {kind:?} missed hits");
        }
    }

    #[test]
    fn deep_clone_is_independent() {
        let mut a = SpatialTree::from_elements(TreeConfig::default(), &row(4), false);
        let b = a.clone();
        a.remove_element(0);

        let probe = Aabb3::new([0.0; 3], [1.0; 3]);
        let mut va = CollectingVisitor::default();
        let _ = a.overlap(&probe, &mut va);
        assert!(va.hits.is_empty());
        let mut vb = CollectingVisitor::default();
        let _ = b.overlap(&probe, &mut vb);
        assert_eq!(vb.hits, [0]);
    }

    #[test]
    fn elements_roundtrip_through_view() {
        let tree = SpatialTree::from_elements(TreeConfig::default(), &row(5), false);
        let mut view = tree.elements();
        view.sort_unstable_by_key(|&(p, _, _)| p);
        assert_eq!(view.len(), 5);
        assert_eq!(view[2].0, 2);
        assert!(view[2].2);
    }
}
