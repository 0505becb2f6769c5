// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A bucketed set of spatial trees queried as one structure.

use bracken_tree::{
    Aabb3, CurrentLength, Payload, QueryVisitor, Ray, SpatialTree, VisitorControl,
};
use serde::{Deserialize, Serialize};

use crate::ops::{OpKind, PendingOp, SyncTimestamp};

/// Most buckets a collection can hold; [`BucketMask`] is one bit per
/// bucket.
pub const MAX_BUCKETS: usize = 16;

/// Index of a bucket within a [`SpatialCollection`].
///
/// Buckets partition elements by lifecycle so each group can use the
/// structure that suits it, such as a rebuild-friendly tree for dynamic
/// elements and a grid-leaf hybrid for static ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketIndex(u8);

impl BucketIndex {
    /// Create a bucket index.
    ///
    /// # Panics
    ///
    /// If `index` is not below [`MAX_BUCKETS`].
    pub fn new(index: u8) -> Self {
        assert!((index as usize) < MAX_BUCKETS, "bucket {index} out of range");
        Self(index)
    }

    /// The raw index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Set of active buckets, one bit per [`BucketIndex`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMask(u16);

impl BucketMask {
    /// The empty mask.
    pub const EMPTY: Self = Self(0);

    /// Mask with the single bucket `index` set.
    pub fn single(index: BucketIndex) -> Self {
        Self(1 << index.0)
    }

    /// Whether `index` is in the mask.
    #[inline]
    pub fn contains(self, index: BucketIndex) -> bool {
        self.0 & (1 << index.0) != 0
    }

    /// This mask with `index` added.
    #[must_use]
    pub fn with(self, index: BucketIndex) -> Self {
        Self(self.0 | (1 << index.0))
    }

    /// Iterate the bucket indices in the mask, ascending.
    pub fn iter(self) -> impl Iterator<Item = BucketIndex> {
        (0_u8..16).filter(move |i| self.0 & (1 << i) != 0).map(BucketIndex)
    }
}

/// A group of [`SpatialTree`] substructures addressed by bucket.
///
/// Elements route to their bucket's tree; elements tagged with an inactive
/// bucket fall back to bucket 0. Queries fan out across every present
/// substructure, sharing one narrowing search length, so a hit found in an
/// earlier bucket prunes the search in later ones.
///
/// The collection carries the [`SyncTimestamp`] of the newest operation
/// applied to it, which snapshot consumers use to prune and replay queued
/// operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpatialCollection<P: Payload> {
    buckets: Vec<Option<SpatialTree<P>>>,
    active: BucketMask,
    sync_stamp: SyncTimestamp,
}

impl<P: Payload> SpatialCollection<P> {
    /// Create a collection with no substructures.
    pub fn new(active: BucketMask) -> Self {
        Self {
            buckets: Vec::new(),
            active,
            sync_stamp: SyncTimestamp::default(),
        }
    }

    /// The active bucket mask.
    pub fn active_buckets(&self) -> BucketMask {
        self.active
    }

    /// Newest operation timestamp applied to this collection.
    pub fn sync_stamp(&self) -> SyncTimestamp {
        self.sync_stamp
    }

    /// Total elements across substructures.
    pub fn len(&self) -> usize {
        self.trees().map(SpatialTree::len).sum()
    }

    /// Whether no substructure holds an element.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install `tree` as the substructure for `bucket`, returning the
    /// previous one.
    pub fn add_substructure(
        &mut self,
        bucket: BucketIndex,
        tree: SpatialTree<P>,
    ) -> Option<SpatialTree<P>> {
        if self.buckets.len() <= bucket.index() {
            self.buckets.resize_with(bucket.index() + 1, || None);
        }
        self.buckets[bucket.index()].replace(tree)
    }

    /// Take the substructure for `bucket` out of the collection.
    pub fn remove_substructure(&mut self, bucket: BucketIndex) -> Option<SpatialTree<P>> {
        self.buckets.get_mut(bucket.index()).and_then(Option::take)
    }

    /// The substructure for `bucket`, if present.
    pub fn substructure(&self, bucket: BucketIndex) -> Option<&SpatialTree<P>> {
        self.buckets.get(bucket.index()).and_then(Option::as_ref)
    }

    /// Bucket an element tagged `bucket` actually routes to.
    fn route(&self, bucket: BucketIndex) -> BucketIndex {
        if self.active.contains(bucket) {
            bucket
        } else {
            BucketIndex(0)
        }
    }

    fn routed_tree_mut(&mut self, bucket: BucketIndex) -> Option<&mut SpatialTree<P>> {
        let routed = self.route(bucket);
        let tree = self
            .buckets
            .get_mut(routed.index())
            .and_then(Option::as_mut);
        debug_assert!(tree.is_some(), "no substructure for bucket {routed:?}");
        tree
    }

    /// Insert or reposition an element in its routed substructure.
    pub fn update_element_in(
        &mut self,
        payload: P,
        bounds: Aabb3,
        has_bounds: bool,
        bucket: BucketIndex,
    ) {
        if let Some(tree) = self.routed_tree_mut(bucket) {
            tree.update_element(payload, bounds, has_bounds);
        }
    }

    /// Remove an element from its routed substructure.
    pub fn remove_element_from(&mut self, payload: P, bucket: BucketIndex) {
        if let Some(tree) = self.routed_tree_mut(bucket) {
            tree.remove_element(payload);
        }
    }

    /// Apply a queued operation and advance the sync stamp to its ticket.
    pub fn apply_op(&mut self, op: &PendingOp<P>) {
        match op.kind {
            OpKind::Upsert => {
                self.update_element_in(op.payload, op.bounds, op.has_bounds, op.bucket);
            }
            OpKind::Delete => self.remove_element_from(op.payload, op.bucket),
        }
        self.sync_stamp = self.sync_stamp.max(op.ticket);
    }

    /// Elements moved or removed since the substructures were last built.
    pub fn num_dirty_elements(&self) -> usize {
        self.trees().map(SpatialTree::num_dirty_elements).sum()
    }

    /// Advance queued build work, giving every incomplete substructure one
    /// slice; returns whether every substructure is now complete. `force`
    /// finishes everything in this call.
    pub fn progress_time_slicing(&mut self, force: bool) -> bool {
        let mut all_done = true;
        for tree in self.buckets.iter_mut().flatten() {
            if !tree.is_time_slicing_complete() && !tree.progress_time_slicing(force) {
                all_done = false;
            }
        }
        all_done
    }

    /// Whether every substructure has finished building.
    pub fn is_time_slicing_complete(&self) -> bool {
        self.trees().all(SpatialTree::is_time_slicing_complete)
    }

    /// Visit elements overlapping `bounds` in every present substructure.
    pub fn overlap<V: QueryVisitor<P>>(&self, bounds: &Aabb3, v: &mut V) -> VisitorControl {
        for tree in self.trees() {
            if tree.overlap(bounds, v) == VisitorControl::Stop {
                return VisitorControl::Stop;
            }
        }
        VisitorControl::Continue
    }

    /// Raycast every present substructure, sharing one narrowing length.
    pub fn raycast<V: QueryVisitor<P>>(&self, ray: Ray, max_len: f64, v: &mut V) {
        let mut cur = CurrentLength::new(max_len);
        for tree in self.trees() {
            if tree.raycast_with(&ray, &mut cur, v) == VisitorControl::Stop {
                return;
            }
        }
    }

    /// Sweep every present substructure, sharing one narrowing length.
    pub fn sweep<V: QueryVisitor<P>>(
        &self,
        ray: Ray,
        max_len: f64,
        half_extents: [f64; 3],
        v: &mut V,
    ) {
        let mut cur = CurrentLength::new(max_len);
        for tree in self.trees() {
            if tree.sweep_with(&ray, half_extents, &mut cur, v) == VisitorControl::Stop {
                return;
            }
        }
    }

    fn trees(&self) -> impl Iterator<Item = &SpatialTree<P>> {
        self.buckets.iter().flatten()
    }
}
