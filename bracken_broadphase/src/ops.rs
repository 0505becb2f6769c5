// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pending element operations and the coalescing queues that hold them.

use bracken_tree::Aabb3;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::collection::BucketIndex;
use crate::ids::ElementId;

/// Monotonic logical time, advanced once per manager step.
///
/// Every queued operation carries the timestamp of the step that produced
/// it; snapshots embed the highest timestamp baked into them, which is
/// what lets consumers prune and replay queued operations exactly once.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SyncTimestamp(u64);

impl SyncTimestamp {
    /// Create a timestamp from a raw step counter.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw step counter.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// The next timestamp.
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// What a pending operation does to its element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// Insert the element or move it to new bounds.
    Upsert,
    /// Remove the element.
    Delete,
}

/// A queued change to one element, applied when its target structure is
/// next flushed.
#[derive(Copy, Clone, Debug)]
pub struct PendingOp<P> {
    /// Element the operation applies to.
    pub id: ElementId,
    /// Payload stored in the spatial structures.
    pub payload: P,
    /// New bounds for an upsert; ignored for deletes.
    pub bounds: Aabb3,
    /// Whether `bounds` is meaningful.
    pub has_bounds: bool,
    /// Bucket the element routes to.
    pub bucket: BucketIndex,
    /// Step that produced the operation.
    pub ticket: SyncTimestamp,
    /// Upsert or delete.
    pub kind: OpKind,
}

/// FIFO of pending operations holding at most one entry per element.
///
/// A newer upsert overwrites a queued upsert in place; a delete overwrites
/// anything. An upsert arriving after a queued delete is a caller bug (the
/// id may already be parked for reuse) and is dropped, with a debug
/// assertion to surface it.
#[derive(Debug)]
pub struct PendingOpQueue<P> {
    ops: Vec<PendingOp<P>>,
    index: HashMap<ElementId, usize>,
}

impl<P> Default for PendingOpQueue<P> {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<P: Copy> PendingOpQueue<P> {
    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queue an operation, coalescing with any queued one for the same
    /// element.
    pub fn enqueue(&mut self, op: PendingOp<P>) {
        if let Some(&slot) = self.index.get(&op.id) {
            let existing = &mut self.ops[slot];
            if existing.kind == OpKind::Delete && op.kind == OpKind::Upsert {
                debug_assert!(false, "upsert queued after delete for {:?}", op.id);
                return;
            }
            *existing = op;
        } else {
            self.index.insert(op.id, self.ops.len());
            self.ops.push(op);
        }
    }

    /// Remove and return the queued operation for `id`, if any.
    pub fn remove(&mut self, id: ElementId) -> Option<PendingOp<P>> {
        let slot = self.index.remove(&id)?;
        let op = self.ops.swap_remove(slot);
        if let Some(moved) = self.ops.get(slot) {
            self.index.insert(moved.id, slot);
        }
        Some(op)
    }

    /// Take every queued operation, oldest first.
    pub fn drain(&mut self) -> Vec<PendingOp<P>> {
        self.index.clear();
        core::mem::take(&mut self.ops)
    }

    /// Drop every operation with a ticket strictly before `stamp`.
    ///
    /// Operations at `stamp` itself are kept: a consumer whose view sits at
    /// `stamp` may still be missing ops recorded later in that same step.
    /// Re-applying one it has already seen is harmless, since the queue
    /// holds at most one operation per element.
    pub fn prune_older_than(&mut self, stamp: SyncTimestamp) {
        self.ops.retain(|op| op.ticket >= stamp);
        self.index.clear();
        for (slot, op) in self.ops.iter().enumerate() {
            self.index.insert(op.id, slot);
        }
    }

    /// Iterate queued operations, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingOp<P>> {
        self.ops.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ElementIdAllocator;

    fn upsert(id: ElementId, x: f64, ticket: u64) -> PendingOp<u32> {
        PendingOp {
            id,
            payload: id.index(),
            bounds: Aabb3::new([x; 3], [x + 1.0; 3]),
            has_bounds: true,
            bucket: BucketIndex::new(0),
            ticket: SyncTimestamp(ticket),
            kind: OpKind::Upsert,
        }
    }

    #[test]
    fn upserts_coalesce_and_delete_wins() {
        let mut alloc = ElementIdAllocator::default();
        let a = alloc.allocate();
        let b = alloc.allocate();

        let mut q = PendingOpQueue::default();
        q.enqueue(upsert(a, 0.0, 1));
        q.enqueue(upsert(b, 0.0, 1));
        q.enqueue(upsert(a, 5.0, 2));
        assert_eq!(q.len(), 2);

        q.enqueue(PendingOp {
            kind: OpKind::Delete,
            ..upsert(a, 0.0, 3)
        });
        assert_eq!(q.len(), 2);

        let ops = q.drain();
        assert!(q.is_empty());
        let on_a = ops.iter().find(|op| op.id == a).unwrap();
        assert_eq!(on_a.kind, OpKind::Delete);
    }

    #[test]
    fn prune_keeps_same_and_newer_tickets() {
        let mut alloc = ElementIdAllocator::default();
        let ids: Vec<_> = (0..4).map(|_| alloc.allocate()).collect();

        let mut q = PendingOpQueue::default();
        for (i, &id) in ids.iter().enumerate() {
            q.enqueue(upsert(id, 0.0, i as u64 + 1));
        }
        q.prune_older_than(SyncTimestamp(3));
        assert_eq!(q.len(), 2);
        assert!(q.iter().all(|op| op.ticket >= SyncTimestamp(3)));
        // The index still resolves survivors after the rebuild.
        assert!(q.remove(ids[3]).is_some());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_patches_moved_entry() {
        let mut alloc = ElementIdAllocator::default();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();

        let mut q = PendingOpQueue::default();
        q.enqueue(upsert(a, 0.0, 1));
        q.enqueue(upsert(b, 0.0, 1));
        q.enqueue(upsert(c, 0.0, 1));

        assert_eq!(q.remove(a).map(|op| op.id), Some(a));
        // c was swapped into a's slot; it must still be addressable.
        assert_eq!(q.remove(c).map(|op| op.id), Some(c));
        assert_eq!(q.len(), 1);
    }
}
