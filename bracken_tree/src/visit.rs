// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Query visitor contract shared by all tree kinds.

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::Payload;

/// Whether a traversal keeps enumerating candidates after a visitor call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VisitorControl {
    /// Keep enumerating candidates.
    Continue,
    /// Stop the whole query (used for any-hit searches).
    Stop,
}

bitflags! {
    /// Behavior flags for the built-in collecting visitor.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct QueryFlags: u8 {
        /// Report the first candidate only and stop the search.
        const ANY_HIT = 1 << 0;
    }
}

/// Mutable remaining search length for raycast and sweep queries.
///
/// The visitor may shrink it once it has found enough blocking hits; the
/// traversal prunes every subtree and cell farther than the narrowed length
/// and never revisits anything it already rejected.
#[derive(Clone, Debug)]
pub struct CurrentLength(f64);

impl CurrentLength {
    /// Create a search length. Callers composing queries across several
    /// structures build one and thread it through each of them.
    pub fn new(length: f64) -> Self {
        debug_assert!(length >= 0.0, "query length must be non-negative");
        Self(length)
    }

    /// The remaining search length.
    #[inline]
    pub fn get(&self) -> f64 {
        self.0
    }

    /// Shrink the remaining search length. Growing it is a contract
    /// violation; release builds ignore the attempt.
    #[inline]
    pub fn shrink(&mut self, length: f64) {
        debug_assert!(
            length <= self.0,
            "visitors may only shrink the current length"
        );
        if length < self.0 {
            self.0 = length;
        }
    }
}

/// Narrow-phase callback consulted once per candidate element.
///
/// The spatial structures only test bounding volumes; the visitor owns the
/// precise shape math and decides whether a candidate is a real hit. The
/// payload is the opaque handle supplied at insertion.
pub trait QueryVisitor<P: Payload> {
    /// A candidate whose bounds overlap the query volume.
    fn overlap(&mut self, payload: P) -> VisitorControl;

    /// A candidate whose bounds pass the ray slab test within the current
    /// length. `cur` may be shrunk to tighten the remaining search.
    fn raycast(&mut self, payload: P, cur: &mut CurrentLength) -> VisitorControl;

    /// A candidate whose inflated bounds pass the swept slab test within the
    /// current length. `cur` may be shrunk to tighten the remaining search.
    fn sweep(&mut self, payload: P, cur: &mut CurrentLength) -> VisitorControl;
}

/// A visitor that records every candidate payload.
///
/// Intended for tests and callers that post-filter hits themselves. With
/// [`QueryFlags::ANY_HIT`] it records at most one candidate.
#[derive(Clone, Debug)]
pub struct CollectingVisitor<P> {
    /// Candidates in visit order.
    pub hits: Vec<P>,
    flags: QueryFlags,
}

impl<P> CollectingVisitor<P> {
    /// Create a collecting visitor with the given flags.
    pub fn new(flags: QueryFlags) -> Self {
        Self {
            hits: Vec::new(),
            flags,
        }
    }
}

impl<P> Default for CollectingVisitor<P> {
    fn default() -> Self {
        Self::new(QueryFlags::empty())
    }
}

impl<P: Payload> CollectingVisitor<P> {
    fn record(&mut self, payload: P) -> VisitorControl {
        self.hits.push(payload);
        if self.flags.contains(QueryFlags::ANY_HIT) {
            VisitorControl::Stop
        } else {
            VisitorControl::Continue
        }
    }
}

impl<P: Payload> QueryVisitor<P> for CollectingVisitor<P> {
    fn overlap(&mut self, payload: P) -> VisitorControl {
        self.record(payload)
    }

    fn raycast(&mut self, payload: P, _cur: &mut CurrentLength) -> VisitorControl {
        self.record(payload)
    }

    fn sweep(&mut self, payload: P, _cur: &mut CurrentLength) -> VisitorControl {
        self.record(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_length_only_shrinks() {
        let mut cur = CurrentLength::new(10.0);
        cur.shrink(4.0);
        assert_eq!(cur.get(), 4.0);
    }

    #[test]
    fn any_hit_stops_after_first() {
        let mut v: CollectingVisitor<u32> = CollectingVisitor::new(QueryFlags::ANY_HIT);
        assert_eq!(v.overlap(7), VisitorControl::Stop);
        assert_eq!(v.hits, [7]);
    }
}
