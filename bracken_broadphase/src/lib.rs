// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bracken Broadphase: concurrent orchestration of spatial trees.
//!
//! This crate sits on top of [`bracken_tree`] and keeps its structures
//! usable from a running simulation:
//!
//! - A [`SpatialCollection`] groups one [`SpatialTree`] per element
//!   *bucket* (dynamic vs. static, collision channels) and fans queries
//!   out across them.
//! - The [`AccelerationManager`] owns three generations of collections:
//!   an always-current internal one for the stepping thread, an async one
//!   rebuilt from the [`BoundedElementCache`] by a background worker, and
//!   a published external snapshot that consumers pick up through an
//!   [`ExternalHandle`] without ever blocking on a build.
//! - Changes flow through coalescing [`PendingOpQueue`]s tagged with a
//!   [`SyncTimestamp`], which bounds how stale an external view can get:
//!   a held snapshot is patched by replaying exactly the operations newer
//!   than its stamp.
//! - [`snapshot`] persists a collection (versioned, with a full-rebuild
//!   fallback for pre-structural data).
//!
//! # Example
//!
//! ```rust
//! use bracken_broadphase::{
//!     AccelerationManager, CollectingVisitor, DefaultFactory, DirtyElement, ManagerConfig,
//! };
//! use bracken_tree::Aabb3;
//!
//! let mut manager: AccelerationManager<u64> =
//!     AccelerationManager::new(Box::new(DefaultFactory::default()), ManagerConfig::default());
//!
//! let id = manager.allocate_element_id();
//! manager.dirty_element(DirtyElement {
//!     id,
//!     payload: 42,
//!     bounds: Aabb3::new([0.0; 3], [1.0; 3]),
//!     has_bounds: true,
//!     bucket: DefaultFactory::dynamic_bucket(),
//! });
//! manager.flush();
//!
//! let mut hits = CollectingVisitor::default();
//! let probe = Aabb3::new([-1.0; 3], [2.0; 3]);
//! let _ = manager.internal().unwrap().overlap(&probe, &mut hits);
//! assert_eq!(hits.hits, [42]);
//! ```

mod cache;
mod collection;
mod factory;
mod ids;
mod manager;
mod ops;
pub mod snapshot;

pub use bracken_tree::{
    Aabb3, CollectingVisitor, CurrentLength, Payload, QueryFlags, QueryVisitor, Ray, SpatialTree,
    TreeConfig, TreeKind, VisitorControl,
};

pub use cache::{BoundedElementCache, CacheRow};
pub use collection::{BucketIndex, BucketMask, MAX_BUCKETS, SpatialCollection};
pub use factory::{CollectionFactory, DefaultFactory, empty_collection};
pub use ids::{ElementId, ElementIdAllocator};
pub use manager::{
    AccelerationManager, DirtyElement, ExternalHandle, GenerationState, ManagerConfig,
};
pub use ops::{OpKind, PendingOp, PendingOpQueue, SyncTimestamp};
