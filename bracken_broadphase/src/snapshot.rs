// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Persisted-state layout for a broadphase collection.
//!
//! A snapshot is `{version, broadphase type tag, body}` encoded with
//! bincode. Version 2 serializes the collection structurally, so loading
//! restores warm, query-ready trees. Version 1 predates structural
//! serialization and stores the raw element list; loading it reports the
//! elements back so the manager can treat them as fully dirty and rebuild
//! from scratch.

use bracken_tree::{Aabb3, Payload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::collection::{BucketIndex, SpatialCollection};
use crate::manager::AccelerationManager;

/// Legacy format: a bare element list, no structure.
pub const SNAPSHOT_VERSION_ELEMENTS: u32 = 1;
/// Current format: the collection serialized structurally.
pub const SNAPSHOT_VERSION_STRUCTURAL: u32 = 2;

/// Type tag for a bucketed collection; single-tree tags are reserved.
const COLLECTION_TAG: u8 = 3;

/// Failures while encoding or decoding a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The snapshot was written by an unknown, newer format.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    /// The snapshot holds a structure kind this build cannot restore.
    #[error("unsupported broadphase type tag {0}")]
    UnsupportedType(u8),
    /// The underlying codec rejected the data.
    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Serialize, Deserialize)]
struct Header {
    version: u32,
    broadphase_type: u8,
}

/// One element of a legacy (version 1) snapshot.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct SavedElement<P> {
    /// Opaque payload stored in the spatial structures.
    pub payload: P,
    /// World-space bounds; meaningless when `has_bounds` is false.
    pub bounds: Aabb3,
    /// Whether the element has finite bounds.
    pub has_bounds: bool,
    /// Bucket the element routes to.
    pub bucket: BucketIndex,
}

/// What a snapshot decoded to.
#[derive(Debug)]
pub enum LoadedSnapshot<P: Payload> {
    /// A warm collection, ready to serve queries as loaded.
    Structural(SpatialCollection<P>),
    /// A pre-structural element list; everything must be rebuilt.
    Legacy(Vec<SavedElement<P>>),
}

/// Serialize the manager's current structure.
///
/// Drains the pipeline first so the written structure reflects every
/// operation recorded so far.
pub fn save_collection<P>(manager: &mut AccelerationManager<P>) -> Result<Vec<u8>, SnapshotError>
where
    P: Payload + Send + Serialize + 'static,
{
    manager.flush();
    let Some(collection) = manager.internal() else {
        // flush() bootstraps; this is unreachable in practice.
        return Err(SnapshotError::UnsupportedType(0));
    };
    let mut bytes = Vec::new();
    bincode::serialize_into(
        &mut bytes,
        &Header {
            version: SNAPSHOT_VERSION_STRUCTURAL,
            broadphase_type: COLLECTION_TAG,
        },
    )?;
    bincode::serialize_into(&mut bytes, collection)?;
    Ok(bytes)
}

/// Decode a snapshot produced by [`save_collection`] or by the legacy
/// element-list writer.
pub fn load_collection<P>(bytes: &[u8]) -> Result<LoadedSnapshot<P>, SnapshotError>
where
    P: Payload + DeserializeOwned,
{
    let mut cursor = std::io::Cursor::new(bytes);
    let header: Header = bincode::deserialize_from(&mut cursor)?;
    if header.broadphase_type != COLLECTION_TAG {
        return Err(SnapshotError::UnsupportedType(header.broadphase_type));
    }
    match header.version {
        SNAPSHOT_VERSION_ELEMENTS => {
            Ok(LoadedSnapshot::Legacy(bincode::deserialize_from(&mut cursor)?))
        }
        SNAPSHOT_VERSION_STRUCTURAL => Ok(LoadedSnapshot::Structural(bincode::deserialize_from(
            &mut cursor,
        )?)),
        version => Err(SnapshotError::UnsupportedVersion(version)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::DefaultFactory;
    use crate::manager::{DirtyElement, ManagerConfig};
    use bracken_tree::CollectingVisitor;

    fn manager() -> AccelerationManager<u32> {
        AccelerationManager::new(
            Box::new(DefaultFactory::default()),
            ManagerConfig::default(),
        )
    }

    fn unit_box(x: f64) -> Aabb3 {
        Aabb3::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0])
    }

    fn overlap_hits(c: &SpatialCollection<u32>, bounds: &Aabb3) -> Vec<u32> {
        let mut v = CollectingVisitor::default();
        let _ = c.overlap(bounds, &mut v);
        v.hits.sort_unstable();
        v.hits
    }

    fn populate(m: &mut AccelerationManager<u32>) {
        for (payload, x, bucket) in [
            (1, 0.0, DefaultFactory::dynamic_bucket()),
            (2, 5.0, DefaultFactory::dynamic_bucket()),
            (3, 9.0, DefaultFactory::static_bucket()),
        ] {
            let id = m.allocate_element_id();
            m.dirty_element(DirtyElement {
                id,
                payload,
                bounds: unit_box(x),
                has_bounds: true,
                bucket,
            });
        }
    }

    #[test]
    fn structural_roundtrip_restores_warm_structure() {
        let mut m = manager();
        populate(&mut m);
        let bytes = save_collection(&mut m).unwrap();

        let mut restored = manager();
        restored.restore_snapshot(load_collection(&bytes).unwrap());

        // Queryable immediately, before any pipeline step.
        let probe = Aabb3::new([-1.0; 3], [20.0; 3]);
        assert_eq!(overlap_hits(restored.internal().unwrap(), &probe), [
            1, 2, 3
        ]);

        // And still present after the next rebuild cycles.
        restored.flush();
        restored.flush();
        assert_eq!(overlap_hits(restored.internal().unwrap(), &probe), [
            1, 2, 3
        ]);
        let handle = restored.external_handle();
        let mut view = handle.new_view();
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &probe), [1, 2, 3]);
    }

    #[test]
    fn legacy_snapshot_falls_back_to_full_rebuild() {
        let elements = vec![
            SavedElement {
                payload: 4_u32,
                bounds: unit_box(0.0),
                has_bounds: true,
                bucket: DefaultFactory::dynamic_bucket(),
            },
            SavedElement {
                payload: 5_u32,
                bounds: unit_box(3.0),
                has_bounds: true,
                bucket: DefaultFactory::static_bucket(),
            },
        ];
        let mut bytes = Vec::new();
        bincode::serialize_into(
            &mut bytes,
            &Header {
                version: SNAPSHOT_VERSION_ELEMENTS,
                broadphase_type: 3,
            },
        )
        .unwrap();
        bincode::serialize_into(&mut bytes, &elements).unwrap();

        let loaded = load_collection::<u32>(&bytes).unwrap();
        assert!(matches!(loaded, LoadedSnapshot::Legacy(ref e) if e.len() == 2));

        let mut m = manager();
        m.restore_snapshot(loaded);
        m.flush();
        let probe = Aabb3::new([-1.0; 3], [20.0; 3]);
        assert_eq!(overlap_hits(m.internal().unwrap(), &probe), [4, 5]);
    }

    #[test]
    fn unknown_version_and_tag_are_rejected() {
        let mut bytes = Vec::new();
        bincode::serialize_into(
            &mut bytes,
            &Header {
                version: 99,
                broadphase_type: 3,
            },
        )
        .unwrap();
        assert!(matches!(
            load_collection::<u32>(&bytes),
            Err(SnapshotError::UnsupportedVersion(99))
        ));

        let mut bytes = Vec::new();
        bincode::serialize_into(
            &mut bytes,
            &Header {
                version: SNAPSHOT_VERSION_STRUCTURAL,
                broadphase_type: 0,
            },
        )
        .unwrap();
        assert!(matches!(
            load_collection::<u32>(&bytes),
            Err(SnapshotError::UnsupportedType(0))
        ));
    }
}
