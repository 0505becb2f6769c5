// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Policy hook deciding which buckets exist and how their trees are built.

use bracken_tree::{Payload, SpatialTree, TreeConfig, TreeKind};

use crate::collection::{BucketIndex, BucketMask, SpatialCollection};

/// Decides the bucket layout and per-bucket tree configuration for every
/// collection a manager creates.
///
/// The factory is consulted on the manager thread only; build jobs carry
/// the resolved configurations with them.
pub trait CollectionFactory {
    /// Buckets collections built by this factory activate.
    fn active_buckets(&self) -> BucketMask;

    /// Tree configuration for `bucket`.
    fn config_for(&self, bucket: BucketIndex) -> TreeConfig;

    /// Whether `bucket` builds incrementally across background cycles.
    ///
    /// Non-time-sliced buckets are built in one step once every sliced
    /// bucket has finished.
    fn is_bucket_time_sliced(&self, bucket: BucketIndex) -> bool;
}

/// Build an empty collection with one empty substructure per active
/// bucket.
pub fn empty_collection<P: Payload>(factory: &dyn CollectionFactory) -> SpatialCollection<P> {
    let mut collection = SpatialCollection::new(factory.active_buckets());
    for bucket in factory.active_buckets().iter() {
        let tree = SpatialTree::new(factory.config_for(bucket));
        let replaced = collection.add_substructure(bucket, tree);
        debug_assert!(replaced.is_none());
    }
    collection
}

/// Default two-bucket layout.
///
/// Bucket 0 holds dynamic elements in an incrementally built AABB tree;
/// bucket 1 holds static elements in a tree-of-grids hybrid built in one
/// step, since static content is dense, clustered, and rarely edited.
#[derive(Clone, Debug)]
pub struct DefaultFactory {
    /// Configuration for the dynamic bucket.
    pub dynamic: TreeConfig,
    /// Configuration for the static bucket.
    pub static_elements: TreeConfig,
}

impl DefaultFactory {
    /// Bucket for elements that move every step.
    pub fn dynamic_bucket() -> BucketIndex {
        BucketIndex::new(0)
    }

    /// Bucket for elements that rarely move.
    pub fn static_bucket() -> BucketIndex {
        BucketIndex::new(1)
    }
}

impl Default for DefaultFactory {
    fn default() -> Self {
        Self {
            dynamic: TreeConfig {
                kind: TreeKind::Tree,
                iterations_per_slice: 512,
                ..TreeConfig::default()
            },
            static_elements: TreeConfig {
                kind: TreeKind::TreeOfGrids,
                ..TreeConfig::default()
            },
        }
    }
}

impl CollectionFactory for DefaultFactory {
    fn active_buckets(&self) -> BucketMask {
        BucketMask::single(Self::dynamic_bucket()).with(Self::static_bucket())
    }

    fn config_for(&self, bucket: BucketIndex) -> TreeConfig {
        if bucket == Self::static_bucket() {
            self.static_elements
        } else {
            self.dynamic
        }
    }

    fn is_bucket_time_sliced(&self, bucket: BucketIndex) -> bool {
        bucket == Self::dynamic_bucket()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_factory_layout() {
        let f = DefaultFactory::default();
        assert!(f.active_buckets().contains(DefaultFactory::dynamic_bucket()));
        assert!(f.active_buckets().contains(DefaultFactory::static_bucket()));
        assert!(f.is_bucket_time_sliced(DefaultFactory::dynamic_bucket()));
        assert!(!f.is_bucket_time_sliced(DefaultFactory::static_bucket()));

        let c: SpatialCollection<u32> = empty_collection(&f);
        assert!(c.substructure(DefaultFactory::dynamic_bucket()).is_some());
        assert!(c.substructure(DefaultFactory::static_bucket()).is_some());
        assert!(c.is_empty());
    }
}
