// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Uniform grid over 3D AABBs.
//!
//! Elements are bucketed into fixed-size grid cells and queries touch only
//! the cells overlapping the query primitive, which makes per-element
//! updates O(1). It is the structure of choice for roughly uniform spatial
//! density. Elements with no bounds, or whose bounds would cover more cells
//! than [`GridConfig::max_covered_cells`], go to a global overflow set that
//! every query visits.

use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::Payload;
use crate::bounds::{Aabb3, Ray, ray_hits_aabb, ray_slab_range, sweep_hits_aabb};
use crate::visit::{CurrentLength, QueryVisitor, VisitorControl};

/// Tuning constants for a [`BoundingGrid`].
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridConfig {
    /// Uniform cell size along every axis. Must be strictly positive.
    pub cell_size: f64,
    /// World-space position of cell `(0, 0, 0)`'s minimum corner.
    pub origin: [f64; 3],
    /// Elements covering more cells than this go to the overflow set.
    pub max_covered_cells: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: 100.0,
            origin: [0.0; 3],
            max_covered_cells: 64,
        }
    }
}

/// Map a scalar coordinate to a grid coordinate along one axis.
///
/// The mapping rounds towards -∞ and saturates to the `i32` range, so it is
/// monotonic in `value` for a fixed origin and cell size.
#[allow(
    clippy::cast_possible_truncation,
    reason = "Grid cell indices are intentionally i32; out-of-range values are saturated."
)]
#[inline]
pub(crate) fn cell_coord(value: f64, origin: f64, cell_size: f64) -> i32 {
    debug_assert!(cell_size > 0.0, "grid cell_size must be strictly positive");
    let t = (value - origin) / cell_size;
    if t >= i32::MAX as f64 {
        return i32::MAX;
    }
    if t <= i32::MIN as f64 {
        return i32::MIN;
    }
    let coord = t as i32;

    // Round towards -∞ (the cast above has already truncated).
    if t < 0.0 && (coord as f64) > t {
        coord.saturating_sub(1)
    } else {
        coord
    }
}

type CellKey = [i32; 3];

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct Cell<P> {
    slots: SmallVec<[P; 8]>,
}

// Derived `Default` would demand `P: Default`, which payloads do not carry.
impl<P> Default for Cell<P> {
    fn default() -> Self {
        Self {
            slots: SmallVec::new(),
        }
    }
}

/// Where an element currently lives in the grid.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum Placement {
    /// Registered in these cells.
    Cells(SmallVec<[CellKey; 8]>),
    /// In the overflow set (no bounds, or bounds covering too many cells).
    Global,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct GridEntry {
    bounds: Aabb3,
    has_bounds: bool,
    placement: Placement,
}

/// Uniform grid spatial structure with fixed cell size.
///
/// Implements the common tree contract: visitor queries, O(1)
/// update/remove, and (trivially complete) time-slicing. A grid never has
/// dirty elements; every update lands directly in its cells.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingGrid<P: Payload> {
    config: GridConfig,
    cells: HashMap<CellKey, Cell<P>>,
    entries: HashMap<P, GridEntry>,
    global: Vec<P>,
    /// Conservative bounds of occupied cells; never shrinks on removal.
    occupied: Option<(CellKey, CellKey)>,
}

impl<P: Payload> core::fmt::Debug for BoundingGrid<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoundingGrid")
            .field("cell_size", &self.config.cell_size)
            .field("elements", &self.entries.len())
            .field("cells", &self.cells.len())
            .field("global", &self.global.len())
            .finish_non_exhaustive()
    }
}

impl<P: Payload> BoundingGrid<P> {
    /// Create an empty grid.
    pub fn new(config: GridConfig) -> Self {
        debug_assert!(
            config.cell_size > 0.0,
            "grid cell_size must be strictly positive"
        );
        Self {
            config,
            cells: HashMap::new(),
            entries: HashMap::new(),
            global: Vec::new(),
            occupied: None,
        }
    }

    /// Build a grid from an initial element view.
    pub fn from_elements<'a, I>(config: GridConfig, elements: I) -> Self
    where
        I: IntoIterator<Item = &'a (P, Aabb3, bool)>,
        P: 'a,
    {
        let mut grid = Self::new(config);
        for &(payload, bounds, has_bounds) in elements {
            grid.update_element(payload, bounds, has_bounds);
        }
        grid
    }

    /// Number of elements stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the grid stores no elements.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over stored elements as `(payload, bounds, has_bounds)`.
    ///
    /// The order is unspecified; intended for re-seeding rebuilds.
    pub fn elements(&self) -> impl Iterator<Item = (P, Aabb3, bool)> + '_ {
        self.entries
            .iter()
            .map(|(&p, e)| (p, e.bounds, e.has_bounds))
    }

    fn cell_range(&self, min: f64, max: f64, axis: usize) -> (i32, i32) {
        let c0 = cell_coord(min, self.config.origin[axis], self.config.cell_size);
        let c1 = cell_coord(max, self.config.origin[axis], self.config.cell_size);
        if c0 <= c1 { (c0, c1) } else { (c1, c0) }
    }

    /// Cells covered by `aabb`, or `None` when it exceeds the coverage cap.
    fn covered_cells(&self, aabb: &Aabb3) -> Option<SmallVec<[CellKey; 8]>> {
        let (x0, x1) = self.cell_range(aabb.min[0], aabb.max[0], 0);
        let (y0, y1) = self.cell_range(aabb.min[1], aabb.max[1], 1);
        let (z0, z1) = self.cell_range(aabb.min[2], aabb.max[2], 2);
        let count = (x1 - x0 + 1) as u64 * (y1 - y0 + 1) as u64 * (z1 - z0 + 1) as u64;
        if count > self.config.max_covered_cells as u64 {
            return None;
        }
        let mut out = SmallVec::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                for z in z0..=z1 {
                    out.push([x, y, z]);
                }
            }
        }
        Some(out)
    }

    fn insert_into_cells(&mut self, payload: P, keys: &[CellKey]) {
        for &key in keys {
            self.cells.entry(key).or_default().slots.push(payload);
            match &mut self.occupied {
                Some((lo, hi)) => {
                    for a in 0..3 {
                        lo[a] = lo[a].min(key[a]);
                        hi[a] = hi[a].max(key[a]);
                    }
                }
                occ @ None => *occ = Some((key, key)),
            }
        }
    }

    fn remove_placement(&mut self, payload: P, placement: &Placement) {
        match placement {
            Placement::Cells(keys) => {
                for key in keys {
                    let cell = self
                        .cells
                        .get_mut(key)
                        .expect("grid invariant violated: missing cell while removing element");
                    let pos = cell
                        .slots
                        .iter()
                        .position(|&s| s == payload)
                        .expect("grid invariant violated: element not found in expected cell");
                    cell.slots.swap_remove(pos);
                    if cell.slots.is_empty() {
                        // Dropping empty cells keeps the map compact for sparse worlds.
                        self.cells.remove(key);
                    }
                }
            }
            Placement::Global => {
                let pos = self
                    .global
                    .iter()
                    .position(|&s| s == payload)
                    .expect("grid invariant violated: element not found in overflow set");
                self.global.swap_remove(pos);
            }
        }
    }

    /// Insert or reposition an element. O(1) in the number of stored
    /// elements.
    pub fn update_element(&mut self, payload: P, bounds: Aabb3, has_bounds: bool) {
        if let Some(old) = self.entries.remove(&payload) {
            if old.has_bounds == has_bounds && old.bounds == bounds && has_bounds {
                self.entries.insert(payload, old);
                return;
            }
            self.remove_placement(payload, &old.placement);
        }

        let placement = if has_bounds {
            match self.covered_cells(&bounds) {
                Some(keys) => {
                    self.insert_into_cells(payload, &keys);
                    Placement::Cells(keys)
                }
                None => {
                    self.global.push(payload);
                    Placement::Global
                }
            }
        } else {
            self.global.push(payload);
            Placement::Global
        };
        self.entries.insert(
            payload,
            GridEntry {
                bounds,
                has_bounds,
                placement,
            },
        );
    }

    /// Remove an element, reporting whether it was present. Removing an
    /// absent element is a no-op, not an error (idempotent cleanup).
    pub fn remove_element(&mut self, payload: P) -> bool {
        if let Some(entry) = self.entries.remove(&payload) {
            self.remove_placement(payload, &entry.placement);
            true
        } else {
            false
        }
    }

    /// Visit the global overflow set. `test` filters bounded entries.
    fn visit_global<V: QueryVisitor<P>>(
        &self,
        v: &mut V,
        cur: Option<&mut CurrentLength>,
        test: impl Fn(&GridEntry, f64) -> bool,
        mode: QueryMode,
    ) -> VisitorControl {
        let mut cur = cur;
        for &payload in &self.global {
            let entry = &self.entries[&payload];
            let limit = cur.as_ref().map_or(f64::INFINITY, |c| c.get());
            if entry.has_bounds && !test(entry, limit) {
                continue;
            }
            let control = match (&mut cur, mode) {
                (_, QueryMode::Overlap) => v.overlap(payload),
                (Some(c), QueryMode::Raycast) => v.raycast(payload, c),
                (Some(c), QueryMode::Sweep) => v.sweep(payload, c),
                (None, _) => unreachable!("length-limited query without a current length"),
            };
            if control == VisitorControl::Stop {
                return VisitorControl::Stop;
            }
        }
        VisitorControl::Continue
    }

    /// Visit elements whose bounds overlap `bounds`.
    pub fn overlap<V: QueryVisitor<P>>(&self, bounds: &Aabb3, v: &mut V) -> VisitorControl {
        if self.visit_global(v, None, |e, _| e.bounds.overlaps(bounds), QueryMode::Overlap)
            == VisitorControl::Stop
        {
            return VisitorControl::Stop;
        }

        let (x0, x1) = self.cell_range(bounds.min[0], bounds.max[0], 0);
        let (y0, y1) = self.cell_range(bounds.min[1], bounds.max[1], 1);
        let (z0, z1) = self.cell_range(bounds.min[2], bounds.max[2], 2);
        let mut seen: HashSet<P> = HashSet::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                for z in z0..=z1 {
                    let Some(cell) = self.cells.get(&[x, y, z]) else {
                        continue;
                    };
                    for &payload in &cell.slots {
                        if !seen.insert(payload) {
                            continue;
                        }
                        if self.entries[&payload].bounds.overlaps(bounds)
                            && v.overlap(payload) == VisitorControl::Stop
                        {
                            return VisitorControl::Stop;
                        }
                    }
                }
            }
        }
        VisitorControl::Continue
    }

    /// Visit elements whose bounds the ray hits within `max_len`.
    pub fn raycast<V: QueryVisitor<P>>(&self, ray: Ray, max_len: f64, v: &mut V) {
        let mut cur = CurrentLength::new(max_len);
        let _ = self.raycast_with(&ray, &mut cur, v);
    }

    /// Raycast sharing an outer query's [`CurrentLength`] (nested use).
    pub(crate) fn raycast_with<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        if self.visit_global(
            v,
            Some(cur),
            |e, limit| ray_hits_aabb(ray, &e.bounds, limit).is_some(),
            QueryMode::Raycast,
        ) == VisitorControl::Stop
        {
            return VisitorControl::Stop;
        }

        // Walk cells in increasing entry distance so a narrowed length
        // terminates the walk as early as possible.
        let Some((occ_lo, occ_hi)) = self.occupied else {
            return VisitorControl::Continue;
        };
        let world = self.occupied_world_bounds(occ_lo, occ_hi);
        let Some((walk_start, walk_end)) = ray_slab_range(ray, &world, cur.get()) else {
            return VisitorControl::Continue;
        };

        let cs = self.config.cell_size;
        let start = ray.at(walk_start);
        let mut cell = [
            cell_coord(start[0], self.config.origin[0], cs),
            cell_coord(start[1], self.config.origin[1], cs),
            cell_coord(start[2], self.config.origin[2], cs),
        ];
        let mut step = [0_i32; 3];
        let mut t_next = [f64::INFINITY; 3];
        let mut t_delta = [f64::INFINITY; 3];
        for a in 0..3 {
            if ray.dir[a] > 0.0 {
                step[a] = 1;
                let boundary = self.config.origin[a] + f64::from(cell[a] + 1) * cs;
                t_next[a] = (boundary - ray.origin[a]) * ray.inv_dir[a];
                t_delta[a] = cs * ray.inv_dir[a];
            } else if ray.dir[a] < 0.0 {
                step[a] = -1;
                let boundary = self.config.origin[a] + f64::from(cell[a]) * cs;
                t_next[a] = (boundary - ray.origin[a]) * ray.inv_dir[a];
                t_delta[a] = -cs * ray.inv_dir[a];
            }
        }

        let mut seen: HashSet<P> = HashSet::new();
        let mut t_entry = walk_start;
        loop {
            if t_entry > f64::min(cur.get(), walk_end) {
                return VisitorControl::Continue;
            }
            if let Some(c) = self.cells.get(&cell) {
                for &payload in &c.slots {
                    if !seen.insert(payload) {
                        continue;
                    }
                    if ray_hits_aabb(ray, &self.entries[&payload].bounds, cur.get()).is_some()
                        && v.raycast(payload, cur) == VisitorControl::Stop
                    {
                        return VisitorControl::Stop;
                    }
                }
            }
            // Advance to the next cell boundary crossing.
            let mut axis = 0;
            if t_next[1] < t_next[axis] {
                axis = 1;
            }
            if t_next[2] < t_next[axis] {
                axis = 2;
            }
            t_entry = t_next[axis];
            t_next[axis] += t_delta[axis];
            cell[axis] += step[axis];
        }
    }

    /// Visit elements a box swept along the ray would touch within
    /// `max_len`.
    pub fn sweep<V: QueryVisitor<P>>(
        &self,
        ray: Ray,
        max_len: f64,
        half_extents: [f64; 3],
        v: &mut V,
    ) {
        let mut cur = CurrentLength::new(max_len);
        let _ = self.sweep_with(&ray, half_extents, &mut cur, v);
    }

    /// Sweep sharing an outer query's [`CurrentLength`] (nested use).
    pub(crate) fn sweep_with<V: QueryVisitor<P>>(
        &self,
        ray: &Ray,
        half_extents: [f64; 3],
        cur: &mut CurrentLength,
        v: &mut V,
    ) -> VisitorControl {
        if self.visit_global(
            v,
            Some(cur),
            |e, limit| sweep_hits_aabb(ray, &e.bounds, half_extents, limit).is_some(),
            QueryMode::Sweep,
        ) == VisitorControl::Stop
        {
            return VisitorControl::Stop;
        }

        // Candidate cells come from the motion AABB; per-element pruning is
        // the swept slab test against the narrowed length.
        let start = Aabb3::new(ray.origin, ray.origin).grown(half_extents);
        let end_point = ray.at(cur.get());
        let motion = start.union(&Aabb3::new(end_point, end_point).grown(half_extents));
        let scan = match self.occupied {
            Some((lo, hi)) => motion.intersect(&self.occupied_world_bounds(lo, hi)),
            None => return VisitorControl::Continue,
        };
        if scan.is_empty() {
            return VisitorControl::Continue;
        }

        let (x0, x1) = self.cell_range(scan.min[0], scan.max[0], 0);
        let (y0, y1) = self.cell_range(scan.min[1], scan.max[1], 1);
        let (z0, z1) = self.cell_range(scan.min[2], scan.max[2], 2);
        let mut seen: HashSet<P> = HashSet::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                for z in z0..=z1 {
                    let Some(cell) = self.cells.get(&[x, y, z]) else {
                        continue;
                    };
                    for &payload in &cell.slots {
                        if !seen.insert(payload) {
                            continue;
                        }
                        let entry = &self.entries[&payload];
                        if sweep_hits_aabb(ray, &entry.bounds, half_extents, cur.get()).is_some()
                            && v.sweep(payload, cur) == VisitorControl::Stop
                        {
                            return VisitorControl::Stop;
                        }
                    }
                }
            }
        }
        VisitorControl::Continue
    }

    fn occupied_world_bounds(&self, lo: CellKey, hi: CellKey) -> Aabb3 {
        let cs = self.config.cell_size;
        let mut out = Aabb3::EMPTY;
        for a in 0..3 {
            out.min[a] = self.config.origin[a] + f64::from(lo[a]) * cs;
            out.max[a] = self.config.origin[a] + f64::from(hi[a] + 1) * cs;
        }
        out
    }
}

#[derive(Copy, Clone)]
enum QueryMode {
    Overlap,
    Raycast,
    Sweep,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visit::{CollectingVisitor, QueryFlags};

    fn boxed(min: [f64; 3], max: [f64; 3]) -> Aabb3 {
        Aabb3::new(min, max)
    }

    #[test]
    fn update_remove_roundtrip() {
        let mut grid: BoundingGrid<u32> = BoundingGrid::new(GridConfig {
            cell_size: 10.0,
            ..GridConfig::default()
        });
        grid.update_element(1, boxed([0.0; 3], [5.0; 3]), true);

        let mut v = CollectingVisitor::default();
        let _ = grid.overlap(&boxed([1.0; 3], [2.0; 3]), &mut v);
        assert_eq!(v.hits, [1]);

        // Move the element; queries should follow.
        grid.update_element(1, boxed([20.0; 3], [25.0; 3]), true);
        let mut v = CollectingVisitor::default();
        let _ = grid.overlap(&boxed([1.0; 3], [2.0; 3]), &mut v);
        assert!(v.hits.is_empty());
        let mut v = CollectingVisitor::default();
        let _ = grid.overlap(&boxed([21.0; 3], [22.0; 3]), &mut v);
        assert_eq!(v.hits, [1]);

        grid.remove_element(1);
        let mut v = CollectingVisitor::default();
        let _ = grid.overlap(&boxed([21.0; 3], [22.0; 3]), &mut v);
        assert!(v.hits.is_empty());

        // Removing again is a no-op, not an error.
        grid.remove_element(1);
    }

    #[test]
    fn overlap_deduplicates_cell_spanning_elements() {
        let mut grid: BoundingGrid<u32> = BoundingGrid::new(GridConfig {
            cell_size: 5.0,
            ..GridConfig::default()
        });
        grid.update_element(7, boxed([0.0; 3], [12.0; 3]), true);

        let mut v = CollectingVisitor::default();
        let _ = grid.overlap(&boxed([1.0; 3], [11.0; 3]), &mut v);
        assert_eq!(v.hits, [7]);
    }

    #[test]
    fn raycast_row_of_boxes() {
        // N unit boxes spaced one apart along x; an axis ray crosses all.
        let mut grid: BoundingGrid<u32> = BoundingGrid::new(GridConfig {
            cell_size: 2.0,
            ..GridConfig::default()
        });
        let n = 8_u32;
        for i in 0..n {
            let x = f64::from(i) * 2.0;
            grid.update_element(i, boxed([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0]), true);
        }

        let ray = Ray::new([-1.0, 0.5, 0.5], [1.0, 0.0, 0.0]);
        let mut v = CollectingVisitor::default();
        grid.raycast(ray, 100.0, &mut v);
        let mut hits = v.hits.clone();
        hits.sort_unstable();
        assert_eq!(hits, (0..n).collect::<alloc::vec::Vec<_>>());

        // Entirely outside the row.
        let mut v = CollectingVisitor::default();
        grid.raycast(Ray::new([-1.0, 50.0, 0.5], [1.0, 0.0, 0.0]), 100.0, &mut v);
        assert!(v.hits.is_empty());

        // Truncated halfway: boxes 0..4 start at x = 0,2,4,6 and the ray
        // starts at x = -1, so a length of 7.5 reaches exactly four.
        let mut v = CollectingVisitor::default();
        grid.raycast(ray, 7.5, &mut v);
        let mut hits = v.hits.clone();
        hits.sort_unstable();
        assert_eq!(hits, [0, 1, 2, 3]);
    }

    #[test]
    fn raycast_any_hit_reports_one() {
        let mut grid: BoundingGrid<u32> = BoundingGrid::new(GridConfig::default());
        for i in 0..4 {
            let x = f64::from(i) * 10.0;
            grid.update_element(i, boxed([x, 0.0, 0.0], [x + 5.0, 5.0, 5.0]), true);
        }
        let mut v = CollectingVisitor::new(QueryFlags::ANY_HIT);
        grid.raycast(Ray::new([-1.0, 1.0, 1.0], [1.0, 0.0, 0.0]), 1000.0, &mut v);
        assert_eq!(v.hits.len(), 1);
    }

    #[test]
    fn unbounded_elements_always_visited() {
        let mut grid: BoundingGrid<u32> = BoundingGrid::new(GridConfig::default());
        grid.update_element(9, Aabb3::EMPTY, false);

        let mut v = CollectingVisitor::default();
        let _ = grid.overlap(&boxed([1000.0; 3], [1001.0; 3]), &mut v);
        assert_eq!(v.hits, [9]);

        let mut v = CollectingVisitor::default();
        grid.raycast(Ray::new([0.0; 3], [0.0, 0.0, 1.0]), 1.0, &mut v);
        assert_eq!(v.hits, [9]);
    }

    #[test]
    fn oversized_elements_overflow_to_global() {
        let mut grid: BoundingGrid<u32> = BoundingGrid::new(GridConfig {
            cell_size: 1.0,
            max_covered_cells: 8,
            ..GridConfig::default()
        });
        // Covers far more than 8 cells.
        grid.update_element(3, boxed([0.0; 3], [50.0; 3]), true);

        let mut v = CollectingVisitor::default();
        let _ = grid.overlap(&boxed([20.0; 3], [21.0; 3]), &mut v);
        assert_eq!(v.hits, [3]);

        // Still precise: a disjoint query misses it.
        let mut v = CollectingVisitor::default();
        let _ = grid.overlap(&boxed([200.0; 3], [201.0; 3]), &mut v);
        assert!(v.hits.is_empty());
    }

    #[test]
    fn sweep_touches_offset_boxes() {
        let mut grid: BoundingGrid<u32> = BoundingGrid::new(GridConfig {
            cell_size: 4.0,
            ..GridConfig::default()
        });
        // Box offset from the ray line by 2 on y.
        grid.update_element(1, boxed([10.0, 2.5, -1.0], [12.0, 4.0, 1.0]), true);

        let ray = Ray::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let mut v = CollectingVisitor::default();
        grid.raycast(ray, 100.0, &mut v);
        assert!(v.hits.is_empty());

        let mut v = CollectingVisitor::default();
        grid.sweep(ray, 100.0, [3.0, 3.0, 3.0], &mut v);
        assert_eq!(v.hits, [1]);
    }

    #[test]
    fn stores_payloads_without_default() {
        // Payloads only promise Copy + Eq + Hash + Debug.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        struct Tag(u32);

        let mut grid: BoundingGrid<Tag> = BoundingGrid::new(GridConfig::default());
        grid.update_element(Tag(1), boxed([0.0; 3], [1.0; 3]), true);
        grid.update_element(Tag(2), boxed([5.0; 3], [6.0; 3]), true);
        assert_eq!(grid.len(), 2);
        assert!(grid.remove_element(Tag(1)));
    }

    #[test]
    fn cell_coord_floors_and_saturates() {
        assert_eq!(cell_coord(-0.5, 0.0, 1.0), -1);
        assert_eq!(cell_coord(0.5, 0.0, 1.0), 0);
        assert_eq!(cell_coord(1e20, 0.0, 1.0), i32::MAX);
        assert_eq!(cell_coord(-1e20, 0.0, 1.0), i32::MIN);
    }
}
