// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bracken Tree: 3D AABB spatial trees for broadphase queries.
//!
//! Bracken Tree is the query layer of the Bracken broadphase. It indexes
//! world-space axis-aligned bounding boxes keyed by an opaque payload and
//! answers raycast, sweep, and overlap queries through a visitor callback.
//!
//! - Two concrete structures behind one closed [`SpatialTree`] enum: a
//!   uniform [`BoundingGrid`] and an incrementally buildable [`AabbTree`]
//!   whose leaves are either flat arrays or nested grids.
//! - Per-element [`update`](SpatialTree::update_element) and
//!   [`remove`](SpatialTree::remove_element) keep a built structure usable
//!   between full rebuilds; elements touched after a build live in a dirty
//!   set that every query also visits.
//! - Large builds can be **time-sliced**: construction work is queued and
//!   advanced a bounded number of steps per call to
//!   [`SpatialTree::progress_time_slicing`], so an initial build of a huge
//!   world spreads its cost over many frames. A time-sliced build produces
//!   exactly the same structure as an immediate one.
//!
//! Queries call a [`QueryVisitor`] once per candidate element in an
//! implementation-defined order. The visitor can stop the search (any-hit
//! queries) or shrink the remaining search length through
//! [`CurrentLength`], which traversal uses to prune farther subtrees.
//!
//! The crate is `no_std` and uses `alloc`. Floating-point inputs are
//! assumed finite (no NaNs); debug builds may assert. Ray and sweep
//! directions are expected to be normalized by the caller.
//!
//! # Example
//!
//! ```rust
//! use bracken_tree::{Aabb3, CollectingVisitor, Ray, SpatialTree, TreeConfig};
//!
//! let elems = [
//!     (1_u32, Aabb3::new([0.0; 3], [1.0; 3]), true),
//!     (2_u32, Aabb3::new([5.0, 0.0, 0.0], [6.0, 1.0, 1.0]), true),
//! ];
//! let tree = SpatialTree::from_elements(TreeConfig::default(), &elems, false);
//!
//! let mut hits = CollectingVisitor::default();
//! tree.raycast(Ray::new([-1.0, 0.5, 0.5], [1.0, 0.0, 0.0]), 100.0, &mut hits);
//! assert_eq!(hits.hits.len(), 2);
//! ```

#![no_std]

extern crate alloc;

mod aabb_tree;
mod bounds;
mod grid;
mod tree;
mod visit;

pub use aabb_tree::{AabbTree, GridLeaf, LeafArray, LeafElement, TreeLeaf};
pub use bounds::{Aabb3, Ray};
pub use grid::{BoundingGrid, GridConfig};
pub use tree::{SpatialTree, TreeConfig, TreeKind};
pub use visit::{CollectingVisitor, CurrentLength, QueryFlags, QueryVisitor, VisitorControl};

use core::fmt::Debug;
use core::hash::Hash;

/// Bounds required of payloads stored in a spatial structure.
///
/// Payloads are opaque handles back into the caller's own storage; the trees
/// never interpret them beyond equality and hashing.
pub trait Payload: Copy + Eq + Hash + Debug {}

impl<P: Copy + Eq + Hash + Debug> Payload for P {}
