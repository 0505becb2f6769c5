// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stable element identifiers and their allocator.

use serde::{Deserialize, Serialize};

/// Dense identifier for an element tracked by the broadphase.
///
/// Ids are handed out by [`ElementIdAllocator`] and stay valid until the
/// element is removed. Removal parks the id; it is only handed out again
/// after the next generation promotion, so no in-flight build or queued
/// operation can confuse an old element with a new one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(u32);

impl ElementId {
    /// The raw index value.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Allocator with deferred reuse.
///
/// Released ids sit in a parked list until [`drain_deferred`] moves them to
/// the free list, which the manager calls once every structure referencing
/// them has been rebuilt or flushed.
///
/// [`drain_deferred`]: ElementIdAllocator::drain_deferred
#[derive(Debug, Default)]
pub struct ElementIdAllocator {
    next: u32,
    free: Vec<u32>,
    parked: Vec<u32>,
}

impl ElementIdAllocator {
    /// Allocate an id, reusing a free one when available.
    pub fn allocate(&mut self) -> ElementId {
        if let Some(idx) = self.free.pop() {
            ElementId(idx)
        } else {
            let idx = self.next;
            self.next += 1;
            ElementId(idx)
        }
    }

    /// Park a released id until the next [`drain_deferred`] call.
    ///
    /// [`drain_deferred`]: ElementIdAllocator::drain_deferred
    pub fn release_deferred(&mut self, id: ElementId) {
        debug_assert!(
            !self.parked.contains(&id.index()) && !self.free.contains(&id.index()),
            "double release of {id:?}"
        );
        self.parked.push(id.index());
    }

    /// Move every parked id to the free list; returns how many moved.
    pub fn drain_deferred(&mut self) -> usize {
        let n = self.parked.len();
        self.free.append(&mut self.parked);
        n
    }

    /// Ids currently parked and not yet reusable.
    pub fn num_parked(&self) -> usize {
        self.parked.len()
    }
}
