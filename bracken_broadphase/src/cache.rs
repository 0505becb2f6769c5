// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flat cache of every bounded element known to the broadphase.
//!
//! The cache is the source of truth the background task rebuilds trees
//! from. It stores one row per live element in parallel columns so a
//! rebuild can stream bounds without chasing pointers.

use bracken_tree::Aabb3;

use crate::collection::BucketIndex;
use crate::ids::ElementId;

/// One row of the cache, as handed to rebuilds.
#[derive(Copy, Clone, Debug)]
pub struct CacheRow<P> {
    /// Id of the element this row describes.
    pub id: ElementId,
    /// Opaque payload stored in the spatial structures.
    pub payload: P,
    /// World-space bounds; meaningless when `has_bounds` is false.
    pub bounds: Aabb3,
    /// Whether the element has finite bounds.
    pub has_bounds: bool,
    /// Bucket the element is routed to.
    pub bucket: BucketIndex,
}

/// Struct-of-arrays store of elements, keyed by dense slot index.
///
/// Rows are appended with [`push`] and removed with [`destroy_element`],
/// which swap-removes and reports which element moved into the vacated
/// slot so the caller can patch its id-to-slot map.
///
/// [`push`]: BoundedElementCache::push
/// [`destroy_element`]: BoundedElementCache::destroy_element
#[derive(Debug, Default)]
pub struct BoundedElementCache<P> {
    ids: Vec<ElementId>,
    payloads: Vec<P>,
    bounds: Vec<Aabb3>,
    has_bounds: Vec<bool>,
    buckets: Vec<BucketIndex>,
}

impl<P: Copy> BoundedElementCache<P> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            payloads: Vec::new(),
            bounds: Vec::new(),
            has_bounds: Vec::new(),
            buckets: Vec::new(),
        }
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the cache holds no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append a row; returns its slot.
    pub fn push(
        &mut self,
        id: ElementId,
        payload: P,
        bounds: Aabb3,
        has_bounds: bool,
        bucket: BucketIndex,
    ) -> usize {
        let slot = self.ids.len();
        self.ids.push(id);
        self.payloads.push(payload);
        self.bounds.push(bounds);
        self.has_bounds.push(has_bounds);
        self.buckets.push(bucket);
        slot
    }

    /// Overwrite the mutable fields of an existing row.
    pub fn set(&mut self, slot: usize, bounds: Aabb3, has_bounds: bool, bucket: BucketIndex) {
        self.bounds[slot] = bounds;
        self.has_bounds[slot] = has_bounds;
        self.buckets[slot] = bucket;
    }

    /// Swap-remove the row at `slot`.
    ///
    /// Returns the id of the row that now occupies `slot`, if any, so the
    /// caller can repoint its map entry for that id.
    pub fn destroy_element(&mut self, slot: usize) -> Option<ElementId> {
        self.ids.swap_remove(slot);
        self.payloads.swap_remove(slot);
        self.bounds.swap_remove(slot);
        self.has_bounds.swap_remove(slot);
        self.buckets.swap_remove(slot);
        (slot < self.ids.len()).then(|| self.ids[slot])
    }

    /// Row at `slot`.
    pub fn row(&self, slot: usize) -> CacheRow<P> {
        CacheRow {
            id: self.ids[slot],
            payload: self.payloads[slot],
            bounds: self.bounds[slot],
            has_bounds: self.has_bounds[slot],
            bucket: self.buckets[slot],
        }
    }

    /// Iterate over every row.
    pub fn rows(&self) -> impl Iterator<Item = CacheRow<P>> + '_ {
        (0..self.len()).map(|slot| self.row(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> ElementId {
        let mut alloc = crate::ids::ElementIdAllocator::default();
        let mut last = alloc.allocate();
        for _ in 0..n {
            last = alloc.allocate();
        }
        last
    }

    #[test]
    fn destroy_reports_moved_row() {
        let mut cache = BoundedElementCache::new();
        let b = Aabb3::new([0.0; 3], [1.0; 3]);
        let bucket = BucketIndex::new(0);
        let s0 = cache.push(id(0), 'a', b, true, bucket);
        let _s1 = cache.push(id(1), 'b', b, true, bucket);
        let s2 = cache.push(id(2), 'c', b, true, bucket);

        // Removing the first slot moves the last row into it.
        let moved = cache.destroy_element(s0);
        assert_eq!(moved, Some(id(2)));
        assert_eq!(cache.row(s0).payload, 'c');
        assert_eq!(cache.len(), 2);

        // Removing the tail moves nothing.
        assert_eq!(cache.destroy_element(s2 - 1), None);
    }

    #[test]
    fn set_updates_in_place() {
        let mut cache = BoundedElementCache::new();
        let slot = cache.push(
            id(0),
            7_u32,
            Aabb3::new([0.0; 3], [1.0; 3]),
            true,
            BucketIndex::new(0),
        );
        cache.set(
            slot,
            Aabb3::new([5.0; 3], [6.0; 3]),
            true,
            BucketIndex::new(1),
        );
        let row = cache.row(slot);
        assert_eq!(row.bounds.min, [5.0; 3]);
        assert_eq!(row.bucket, BucketIndex::new(1));
    }
}
