// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The acceleration manager: triple-buffered generations of spatial
//! collections with background rebuilds.
//!
//! The manager keeps three generations of [`SpatialCollection`] alive:
//!
//! - **Internal**: owned by the stepping thread, kept current every step by
//!   flushing the internal op queue into it.
//! - **Async**: rebuilt from the [`BoundedElementCache`] by a background
//!   worker, a bounded slice of work per cycle. When a rebuild finishes,
//!   the async queue is flushed into it and it swaps with Internal.
//! - **External**: a consistent snapshot published at each swap. Consumers
//!   pick it up through an [`ExternalHandle`] without ever waiting on a
//!   build, and keep their copy fresh between swaps by replaying queued
//!   operations newer than the snapshot's sync stamp.

use std::sync::Arc;
use std::thread;

use bracken_tree::{Aabb3, Payload, SpatialTree, TreeConfig};
use crossbeam_channel::{Receiver, Sender};
use hashbrown::HashMap;
use log::{debug, trace};
use parking_lot::Mutex;

use crate::cache::{BoundedElementCache, CacheRow};
use crate::collection::{BucketIndex, BucketMask, SpatialCollection};
use crate::factory::{CollectionFactory, empty_collection};
use crate::ids::{ElementId, ElementIdAllocator};
use crate::ops::{OpKind, PendingOp, PendingOpQueue, SyncTimestamp};
use crate::snapshot::LoadedSnapshot;

/// Tuning knobs for the manager.
#[derive(Copy, Clone, Debug)]
pub struct ManagerConfig {
    /// When more internal operations than this are pending at a step, the
    /// next background build is forced to finish in one slice so the async
    /// generation cannot starve behind a flood of updates.
    pub force_full_build_threshold: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            force_full_build_threshold: 1000,
        }
    }
}

/// Lifecycle of the async generation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GenerationState {
    /// No build in flight and nothing rebuilt yet.
    Empty,
    /// A background build is in progress (possibly across several cycles).
    Building,
    /// A finished build is being promoted.
    Ready,
    /// The last finished build has been swapped in as Internal.
    Active,
}

/// A changed element, as reported by the caller.
#[derive(Copy, Clone, Debug)]
pub struct DirtyElement<P> {
    /// Id previously allocated through
    /// [`AccelerationManager::allocate_element_id`].
    pub id: ElementId,
    /// Opaque payload stored in the spatial structures.
    pub payload: P,
    /// New world-space bounds.
    pub bounds: Aabb3,
    /// Whether `bounds` is meaningful; unbounded elements are visited by
    /// every query.
    pub has_bounds: bool,
    /// Bucket the element routes to.
    pub bucket: BucketIndex,
}

#[derive(Clone, Debug)]
struct BucketBuild {
    bucket: BucketIndex,
    config: TreeConfig,
    time_sliced: bool,
}

/// Element snapshot a rebuild cycle works from, carried across jobs until
/// the cycle completes.
struct PendingRebuild<P> {
    elements: Vec<CacheRow<P>>,
    seeded: bool,
}

struct BuildJob<P: Payload> {
    collection: SpatialCollection<P>,
    pending: Option<PendingRebuild<P>>,
    force: bool,
    builds: Vec<BucketBuild>,
}

struct BuildResult<P: Payload> {
    collection: SpatialCollection<P>,
    external: Option<SpatialCollection<P>>,
    pending: Option<PendingRebuild<P>>,
    complete: bool,
}

struct NextAsync<P: Payload> {
    collection: SpatialCollection<P>,
    reseed: bool,
    pending: Option<PendingRebuild<P>>,
}

struct ExternalSlot<P: Payload> {
    collection: Option<SpatialCollection<P>>,
    fresh: bool,
}

struct ExternalShared<P: Payload> {
    slot: Mutex<ExternalSlot<P>>,
    queue: Mutex<PendingOpQueue<P>>,
}

/// Consumer-side handle to the published external snapshot.
///
/// Cloned handles share one snapshot slot and one replay queue; the
/// manager assumes a single consumer view is kept fresh through them.
pub struct ExternalHandle<P: Payload>(Arc<ExternalShared<P>>);

impl<P: Payload> Clone for ExternalHandle<P> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<P: Payload> core::fmt::Debug for ExternalHandle<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExternalHandle")
            .field("fresh", &self.0.slot.lock().fresh)
            .field("queued_ops", &self.0.queue.lock().len())
            .finish_non_exhaustive()
    }
}

impl<P: Payload> ExternalHandle<P> {
    /// An empty view to pass to [`update`](ExternalHandle::update).
    pub fn new_view(&self) -> SpatialCollection<P> {
        SpatialCollection::new(BucketMask::EMPTY)
    }

    /// Bring `view` up to date without waiting on any build.
    ///
    /// If a fresh snapshot has been published since the last call, `view`
    /// is swapped for it. Queued operations strictly older than the view
    /// are pruned; the rest are replayed onto `view` so it lags the
    /// producer by at most the operations of the current step. Ops sharing
    /// the view's own stamp are replayed too, since an op recorded later in
    /// the same step carries the same ticket as ones the view has already
    /// seen, and re-applying those is harmless.
    pub fn update(&self, view: &mut SpatialCollection<P>) {
        // Lock order is slot then queue, same as the publishing side, so a
        // view can never pair a stale snapshot with an already-pruned
        // queue.
        let mut slot = self.0.slot.lock();
        if slot.fresh {
            if let Some(snapshot) = slot.collection.as_mut() {
                core::mem::swap(view, snapshot);
            }
            slot.fresh = false;
        }
        if view.active_buckets() == BucketMask::EMPTY {
            // Nothing published yet; there is nothing to replay onto.
            return;
        }
        let mut queue = self.0.queue.lock();
        queue.prune_older_than(view.sync_stamp());
        for op in queue.iter() {
            view.apply_op(op);
        }
    }
}

/// Owner of the three generations and the background rebuild worker.
///
/// All methods except those on [`ExternalHandle`] belong to the stepping
/// thread.
pub struct AccelerationManager<P: Payload + Send + 'static> {
    config: ManagerConfig,
    builds: Vec<BucketBuild>,
    stamp: SyncTimestamp,
    ids: ElementIdAllocator,
    cache: BoundedElementCache<P>,
    slot_of: HashMap<ElementId, usize>,
    internal: Option<SpatialCollection<P>>,
    next_async: Option<NextAsync<P>>,
    internal_queue: PendingOpQueue<P>,
    async_queue: PendingOpQueue<P>,
    external: Arc<ExternalShared<P>>,
    job_tx: Sender<BuildJob<P>>,
    done_rx: Receiver<BuildResult<P>>,
    worker: Option<thread::JoinHandle<()>>,
    job_in_flight: bool,
    state: GenerationState,
    factory: Box<dyn CollectionFactory + Send>,
}

impl<P: Payload + Send + 'static> AccelerationManager<P> {
    /// Create a manager and spawn its background worker.
    pub fn new(factory: Box<dyn CollectionFactory + Send>, config: ManagerConfig) -> Self {
        let builds = factory
            .active_buckets()
            .iter()
            .map(|bucket| BucketBuild {
                bucket,
                config: factory.config_for(bucket),
                time_sliced: factory.is_bucket_time_sliced(bucket),
            })
            .collect();
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<BuildJob<P>>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<BuildResult<P>>();
        let worker = thread::spawn(move || {
            for job in job_rx.iter() {
                let result = run_build(job);
                if done_tx.send(result).is_err() {
                    break;
                }
            }
        });
        Self {
            config,
            builds,
            // Stamp 0 is reserved for "nothing baked yet" in snapshots.
            stamp: SyncTimestamp::new(1),
            ids: ElementIdAllocator::default(),
            cache: BoundedElementCache::new(),
            slot_of: HashMap::new(),
            internal: None,
            next_async: None,
            internal_queue: PendingOpQueue::default(),
            async_queue: PendingOpQueue::default(),
            external: Arc::new(ExternalShared {
                slot: Mutex::new(ExternalSlot {
                    collection: None,
                    fresh: false,
                }),
                queue: Mutex::new(PendingOpQueue::default()),
            }),
            job_tx,
            done_rx,
            worker: Some(worker),
            job_in_flight: false,
            state: GenerationState::Empty,
            factory,
        }
    }

    /// Allocate an id for a new element.
    pub fn allocate_element_id(&mut self) -> ElementId {
        self.ids.allocate()
    }

    /// The collection serving internal queries; `None` before the first
    /// [`compute_intermediate`](AccelerationManager::compute_intermediate).
    pub fn internal(&self) -> Option<&SpatialCollection<P>> {
        self.internal.as_ref()
    }

    /// Lifecycle state of the async generation.
    pub fn generation_state(&self) -> GenerationState {
        self.state
    }

    /// Logical timestamp of the current step.
    pub fn current_stamp(&self) -> SyncTimestamp {
        self.stamp
    }

    /// A handle for external consumers of published snapshots.
    pub fn external_handle(&self) -> ExternalHandle<P> {
        ExternalHandle(Arc::clone(&self.external))
    }

    /// Record that an element appeared or moved.
    pub fn dirty_element(&mut self, elem: DirtyElement<P>) {
        let op = PendingOp {
            id: elem.id,
            payload: elem.payload,
            bounds: elem.bounds,
            has_bounds: elem.has_bounds,
            bucket: elem.bucket,
            ticket: self.stamp,
            kind: OpKind::Upsert,
        };
        self.internal_queue.enqueue(op);
        self.async_queue.enqueue(op);
        self.external.queue.lock().enqueue(op);
    }

    /// Remove an element everywhere.
    ///
    /// Internal stops reporting the element from this step on: a pending
    /// insert is cancelled and the element is removed from Internal
    /// synchronously. The other generations pick the removal up through
    /// their queues, and the id is parked until the next promotion so no
    /// in-flight build can see it reused.
    pub fn remove_element(&mut self, id: ElementId, payload: P, bucket: BucketIndex) {
        self.internal_queue.remove(id);
        if let Some(internal) = self.internal.as_mut() {
            internal.remove_element_from(payload, bucket);
        }
        let op = PendingOp {
            id,
            payload,
            bounds: Aabb3::EMPTY,
            has_bounds: false,
            bucket,
            ticket: self.stamp,
            kind: OpKind::Delete,
        };
        self.async_queue.enqueue(op);
        self.external.queue.lock().enqueue(op);
        self.ids.release_deferred(id);
    }

    /// Advance the rebuild pipeline by one step.
    ///
    /// Flushes the internal queue into Internal, collects a finished
    /// background build (waiting for it when `block` is set), promotes it
    /// when its rebuild cycle is complete, and kicks the next build. With
    /// `block`, the kicked build is forced to finish in one slice.
    pub fn compute_intermediate(&mut self, block: bool) {
        if self.internal.is_none() {
            self.bootstrap();
        }

        if self.job_in_flight {
            let result = if block {
                self.done_rx.recv().ok()
            } else {
                self.done_rx.try_recv().ok()
            };
            if let Some(result) = result {
                self.job_in_flight = false;
                if result.complete {
                    self.state = GenerationState::Ready;
                    self.promote(result);
                } else {
                    self.next_async = Some(NextAsync {
                        collection: result.collection,
                        reseed: false,
                        pending: result.pending,
                    });
                }
            }
        }

        let backlog = self.internal_queue.len();
        let ops = self.internal_queue.drain();
        if let Some(internal) = self.internal.as_mut() {
            for op in &ops {
                internal.apply_op(op);
            }
        }

        self.kick_if_idle(block || backlog > self.config.force_full_build_threshold);

        self.stamp = self.stamp.next();
    }

    /// Drain the whole pipeline: finish the in-flight build, promote it,
    /// and rebuild once more so every generation reflects every operation
    /// recorded so far.
    pub fn flush(&mut self) {
        for _ in 0..3 {
            self.compute_intermediate(true);
        }
    }

    /// Adopt a decoded snapshot.
    ///
    /// A structural snapshot is installed as Internal, so queries are warm
    /// immediately, and its elements are re-recorded through the async and
    /// external queues so the next promotion seeds the cache with them. A
    /// legacy snapshot only carries elements; everything is re-recorded as
    /// dirty and the structures are rebuilt from scratch.
    ///
    /// Intended for freshly created managers; elements registered earlier
    /// keep their ids but lose their snapshot counterparts.
    pub fn restore_snapshot(&mut self, loaded: LoadedSnapshot<P>) {
        debug_assert!(
            self.cache.is_empty(),
            "snapshots should be restored into a fresh manager"
        );
        match loaded {
            LoadedSnapshot::Structural(collection) => {
                if self.internal.is_none() {
                    self.bootstrap();
                }
                for bucket in collection.active_buckets().iter() {
                    if let Some(tree) = collection.substructure(bucket) {
                        for (payload, bounds, has_bounds) in tree.elements() {
                            self.record_restored(payload, bounds, has_bounds, bucket, false);
                        }
                    }
                }
                debug!(
                    "restored structural snapshot: {} elements across buckets",
                    collection.len()
                );
                self.internal = Some(collection);
            }
            LoadedSnapshot::Legacy(elements) => {
                debug!(
                    "restored legacy snapshot: rebuilding {} elements from scratch",
                    elements.len()
                );
                for elem in elements {
                    self.record_restored(
                        elem.payload,
                        elem.bounds,
                        elem.has_bounds,
                        elem.bucket,
                        true,
                    );
                }
            }
        }
    }

    fn record_restored(
        &mut self,
        payload: P,
        bounds: Aabb3,
        has_bounds: bool,
        bucket: BucketIndex,
        include_internal: bool,
    ) {
        let op = PendingOp {
            id: self.ids.allocate(),
            payload,
            bounds,
            has_bounds,
            bucket,
            ticket: self.stamp,
            kind: OpKind::Upsert,
        };
        if include_internal {
            self.internal_queue.enqueue(op);
        }
        self.async_queue.enqueue(op);
        self.external.queue.lock().enqueue(op);
    }

    fn bootstrap(&mut self) {
        self.internal = Some(empty_collection(self.factory.as_ref()));
        self.next_async = Some(NextAsync {
            collection: empty_collection(self.factory.as_ref()),
            reseed: true,
            pending: None,
        });
        self.state = GenerationState::Empty;
        debug!("broadphase bootstrapped with buckets {:?}", self.builds);
    }

    fn promote(&mut self, result: BuildResult<P>) {
        let mut internal_new = result.collection;
        let mut external_new = match result.external {
            Some(external) => external,
            None => internal_new.clone(),
        };

        let ops = self.async_queue.drain();
        for op in &ops {
            internal_new.apply_op(op);
            external_new.apply_op(op);
            self.apply_to_cache(op);
        }

        let old_internal = self.internal.replace(internal_new);
        if let Some(old) = old_internal {
            self.next_async = Some(NextAsync {
                collection: old,
                reseed: true,
                pending: None,
            });
        }

        {
            let mut slot = self.external.slot.lock();
            let mut queue = self.external.queue.lock();
            // Everything strictly before the baked stamp is in the
            // snapshot; same-stamp ops stay queued for replay.
            queue.prune_older_than(external_new.sync_stamp());
            slot.collection = Some(external_new);
            slot.fresh = true;
        }

        let freed = self.ids.drain_deferred();
        self.state = GenerationState::Active;
        debug!(
            "promoted broadphase generation at {:?}: {} ops flushed, {} ids freed",
            self.stamp,
            ops.len(),
            freed
        );
    }

    fn apply_to_cache(&mut self, op: &PendingOp<P>) {
        match op.kind {
            OpKind::Upsert => match self.slot_of.get(&op.id) {
                Some(&slot) => self.cache.set(slot, op.bounds, op.has_bounds, op.bucket),
                None => {
                    let slot =
                        self.cache
                            .push(op.id, op.payload, op.bounds, op.has_bounds, op.bucket);
                    self.slot_of.insert(op.id, slot);
                }
            },
            OpKind::Delete => {
                if let Some(slot) = self.slot_of.remove(&op.id) {
                    if let Some(moved) = self.cache.destroy_element(slot) {
                        self.slot_of.insert(moved, slot);
                    }
                }
            }
        }
    }

    fn kick_if_idle(&mut self, force: bool) {
        if self.job_in_flight {
            return;
        }
        let Some(mut next) = self.next_async.take() else {
            return;
        };
        let pending = if next.reseed {
            Some(PendingRebuild {
                elements: self.cache.rows().collect(),
                seeded: false,
            })
        } else {
            next.pending.take()
        };
        if pending.is_none() && next.collection.is_time_slicing_complete() {
            self.next_async = Some(next);
            return;
        }
        trace!(
            "kicking broadphase build at {:?} (force={force}, {} cached elements)",
            self.stamp,
            pending.as_ref().map_or(0, |p| p.elements.len())
        );
        let job = BuildJob {
            collection: next.collection,
            pending,
            force,
            builds: self.builds.clone(),
        };
        self.job_in_flight = true;
        self.state = GenerationState::Building;
        let _ = self.job_tx.send(job);
    }
}

impl<P: Payload + Send + 'static> Drop for AccelerationManager<P> {
    fn drop(&mut self) {
        // Disconnect the job channel so the worker loop ends, then reap it.
        let (disconnected, rx) = crossbeam_channel::unbounded();
        drop(rx);
        drop(core::mem::replace(&mut self.job_tx, disconnected));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<P: Payload + Send + 'static> core::fmt::Debug for AccelerationManager<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccelerationManager")
            .field("stamp", &self.stamp)
            .field("state", &self.state)
            .field("cached_elements", &self.cache.len())
            .field("job_in_flight", &self.job_in_flight)
            .finish_non_exhaustive()
    }
}

/// One background build cycle step, run on the worker thread.
fn run_build<P: Payload>(job: BuildJob<P>) -> BuildResult<P> {
    let BuildJob {
        mut collection,
        mut pending,
        force,
        builds,
    } = job;

    if let Some(p) = pending.as_mut() {
        if !p.seeded {
            seed_sliced_buckets(&mut collection, &builds, &p.elements, force);
            p.seeded = true;
        }
    }

    let sliced_done = collection.progress_time_slicing(force);
    let complete = if sliced_done {
        if let Some(p) = pending.take() {
            build_unsliced_buckets(&mut collection, &builds, &p.elements);
        }
        true
    } else {
        false
    };

    let external = complete.then(|| collection.clone());
    BuildResult {
        collection,
        external,
        pending,
        complete,
    }
}

fn seed_sliced_buckets<P: Payload>(
    collection: &mut SpatialCollection<P>,
    builds: &[BucketBuild],
    elements: &[CacheRow<P>],
    force: bool,
) {
    let active = collection.active_buckets();
    for build in builds.iter().filter(|b| b.time_sliced) {
        let elems = routed_elements(elements, active, build.bucket);
        let tree = SpatialTree::from_elements(build.config, &elems, !force);
        collection.add_substructure(build.bucket, tree);
    }
}

fn build_unsliced_buckets<P: Payload>(
    collection: &mut SpatialCollection<P>,
    builds: &[BucketBuild],
    elements: &[CacheRow<P>],
) {
    let active = collection.active_buckets();
    for build in builds.iter().filter(|b| !b.time_sliced) {
        let elems = routed_elements(elements, active, build.bucket);
        let tree = SpatialTree::from_elements(build.config, &elems, false);
        collection.add_substructure(build.bucket, tree);
    }
}

fn routed_elements<P: Payload>(
    elements: &[CacheRow<P>],
    active: BucketMask,
    bucket: BucketIndex,
) -> Vec<(P, Aabb3, bool)> {
    elements
        .iter()
        .filter(|row| {
            let routed = if active.contains(row.bucket) {
                row.bucket
            } else {
                BucketIndex::new(0)
            };
            routed == bucket
        })
        .map(|row| (row.payload, row.bounds, row.has_bounds))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::DefaultFactory;
    use bracken_tree::{CollectingVisitor, Ray};

    fn manager() -> AccelerationManager<u32> {
        AccelerationManager::new(
            Box::new(DefaultFactory::default()),
            ManagerConfig::default(),
        )
    }

    fn unit_box(x: f64) -> Aabb3 {
        Aabb3::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0])
    }

    fn dirty(m: &mut AccelerationManager<u32>, payload: u32, x: f64) -> ElementId {
        let id = m.allocate_element_id();
        m.dirty_element(DirtyElement {
            id,
            payload,
            bounds: unit_box(x),
            has_bounds: true,
            bucket: DefaultFactory::dynamic_bucket(),
        });
        id
    }

    fn overlap_hits(c: &SpatialCollection<u32>, bounds: &Aabb3) -> Vec<u32> {
        let mut v = CollectingVisitor::default();
        let _ = c.overlap(bounds, &mut v);
        v.hits.sort_unstable();
        v.hits
    }

    #[test]
    fn internal_is_current_after_one_step() {
        let mut m = manager();
        dirty(&mut m, 1, 0.0);
        m.compute_intermediate(true);

        let internal = m.internal().unwrap();
        assert_eq!(overlap_hits(internal, &unit_box(0.0)), [1]);

        // No promotion has happened yet: nothing published externally.
        let handle = m.external_handle();
        let mut view = handle.new_view();
        handle.update(&mut view);
        assert!(overlap_hits(&view, &unit_box(0.0)).is_empty());
    }

    #[test]
    fn flush_publishes_external_snapshot() {
        let mut m = manager();
        dirty(&mut m, 1, 0.0);
        dirty(&mut m, 2, 5.0);
        m.flush();

        let handle = m.external_handle();
        let mut view = handle.new_view();
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &Aabb3::new([-1.0; 3], [10.0; 3])), [
            1, 2
        ]);
        // The last step both promoted and kicked the next rebuild cycle.
        assert_eq!(m.generation_state(), GenerationState::Building);

        let mut v = CollectingVisitor::default();
        view.raycast(Ray::new([-1.0, 0.5, 0.5], [1.0, 0.0, 0.0]), 50.0, &mut v);
        v.hits.sort_unstable();
        assert_eq!(v.hits, [1, 2]);
    }

    #[test]
    fn external_view_replays_between_promotions() {
        let mut m = manager();
        dirty(&mut m, 1, 0.0);
        m.flush();

        let handle = m.external_handle();
        let mut view = handle.new_view();
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &unit_box(0.0)), [1]);

        // A new element is recorded but no step runs; the replay queue
        // still brings the held view up to date.
        dirty(&mut m, 2, 3.0);
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &unit_box(3.0)), [2]);

        // Replay is idempotent across repeated updates.
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &unit_box(3.0)), [2]);
    }

    #[test]
    fn same_step_ops_all_reach_a_view_updated_between_them() {
        let mut m = manager();
        dirty(&mut m, 1, 0.0);
        m.flush();

        let handle = m.external_handle();
        let mut view = handle.new_view();

        // Two elements recorded in the same step, with a view update in
        // between: the second op carries the same timestamp the view
        // already advanced to and must still be replayed.
        dirty(&mut m, 2, 3.0);
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &unit_box(3.0)), [2]);

        dirty(&mut m, 3, 6.0);
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &unit_box(6.0)), [3]);
        assert_eq!(overlap_hits(&view, &unit_box(3.0)), [2]);
    }

    #[test]
    fn interrupted_rebuild_resumes_from_carried_snapshot() {
        let mut m = manager();
        m.flush();
        // Reap the build flush left in flight so the worker is idle.
        let _ = m.done_rx.recv();
        m.job_in_flight = false;

        // A rebuild cycle interrupted mid-build carries its element
        // snapshot to the next kick instead of reseeding from the cache.
        let id = m.allocate_element_id();
        m.next_async = Some(NextAsync {
            collection: empty_collection(m.factory.as_ref()),
            reseed: false,
            pending: Some(PendingRebuild {
                elements: vec![CacheRow {
                    id,
                    payload: 9,
                    bounds: unit_box(4.0),
                    has_bounds: true,
                    bucket: DefaultFactory::dynamic_bucket(),
                }],
                seeded: false,
            }),
        });
        m.compute_intermediate(true);
        m.compute_intermediate(true);
        assert_eq!(overlap_hits(m.internal().unwrap(), &unit_box(4.0)), [9]);
    }

    #[test]
    fn remove_cancels_pending_insert() {
        let mut m = manager();
        let id = dirty(&mut m, 1, 0.0);
        m.remove_element(id, 1, DefaultFactory::dynamic_bucket());
        m.flush();

        assert!(m.internal().unwrap().is_empty());
        let handle = m.external_handle();
        let mut view = handle.new_view();
        handle.update(&mut view);
        assert!(overlap_hits(&view, &unit_box(0.0)).is_empty());
    }

    #[test]
    fn removal_is_synchronous_on_internal() {
        let mut m = manager();
        let id = dirty(&mut m, 1, 0.0);
        m.flush();
        assert_eq!(overlap_hits(m.internal().unwrap(), &unit_box(0.0)), [1]);

        m.remove_element(id, 1, DefaultFactory::dynamic_bucket());
        // No step needed: Internal already stopped reporting it.
        assert!(overlap_hits(m.internal().unwrap(), &unit_box(0.0)).is_empty());
    }

    #[test]
    fn ids_are_reused_only_after_promotion() {
        let mut m = manager();
        let id = dirty(&mut m, 1, 0.0);
        m.remove_element(id, 1, DefaultFactory::dynamic_bucket());

        // Parked: a fresh id is handed out while the removal is in flight.
        let fresh = m.allocate_element_id();
        assert_ne!(fresh, id);

        m.flush();
        assert_eq!(m.allocate_element_id(), id);
    }

    #[test]
    fn static_bucket_elements_survive_rebuilds() {
        let mut m = manager();
        let id = m.allocate_element_id();
        m.dirty_element(DirtyElement {
            id,
            payload: 7,
            bounds: unit_box(2.0),
            has_bounds: true,
            bucket: DefaultFactory::static_bucket(),
        });
        m.flush();
        m.flush();

        assert_eq!(overlap_hits(m.internal().unwrap(), &unit_box(2.0)), [7]);
        let handle = m.external_handle();
        let mut view = handle.new_view();
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &unit_box(2.0)), [7]);
    }

    #[test]
    fn moved_element_is_reported_at_new_bounds_only() {
        let mut m = manager();
        let id = dirty(&mut m, 1, 0.0);
        m.flush();

        m.dirty_element(DirtyElement {
            id,
            payload: 1,
            bounds: unit_box(8.0),
            has_bounds: true,
            bucket: DefaultFactory::dynamic_bucket(),
        });
        m.flush();

        let internal = m.internal().unwrap();
        assert!(overlap_hits(internal, &unit_box(0.0)).is_empty());
        assert_eq!(overlap_hits(internal, &unit_box(8.0)), [1]);
    }

    #[test]
    fn random_elements_match_brute_force() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x6b72_6163);
        let mut m = manager();
        let mut expected = Vec::new();
        for payload in 0..200_u32 {
            let min = [
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
            ];
            let size = rng.gen_range(0.1..4.0);
            let bounds = Aabb3::new(min, [min[0] + size, min[1] + size, min[2] + size]);
            let bucket = if rng.gen_bool(0.3) {
                DefaultFactory::static_bucket()
            } else {
                DefaultFactory::dynamic_bucket()
            };
            let id = m.allocate_element_id();
            m.dirty_element(DirtyElement {
                id,
                payload,
                bounds,
                has_bounds: true,
                bucket,
            });
            expected.push((payload, bounds));
        }
        m.flush();

        let probe = Aabb3::new([-10.0; 3], [10.0; 3]);
        let mut brute: Vec<u32> = expected
            .iter()
            .filter(|(_, b)| b.overlaps(&probe))
            .map(|&(p, _)| p)
            .collect();
        brute.sort_unstable();
        assert_eq!(overlap_hits(m.internal().unwrap(), &probe), brute);

        let handle = m.external_handle();
        let mut view = handle.new_view();
        handle.update(&mut view);
        assert_eq!(overlap_hits(&view, &probe), brute);
    }
}
