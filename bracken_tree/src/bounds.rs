// Copyright 2026 the Bracken Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and intersection helpers.

/// Axis-aligned bounding box in 3D.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: [f64; 3],
    /// Maximum corner.
    pub max: [f64; 3],
}

impl Aabb3 {
    /// An inverted box that unions as the identity.
    pub const EMPTY: Self = Self {
        min: [f64::INFINITY; 3],
        max: [f64::NEG_INFINITY; 3],
    };

    /// Create a new AABB from min/max corners.
    #[inline(always)]
    pub const fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// Whether this AABB contains the point.
    ///
    /// The boundary is considered part of the box.
    #[inline]
    pub fn contains_point(&self, p: [f64; 3]) -> bool {
        (0..3).all(|a| self.min[a] <= p[a] && p[a] <= self.max[a])
    }

    /// Determines whether this AABB overlaps with another in any way.
    ///
    /// Two AABBs that share a face are considered to overlap.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        (0..3).all(|a| self.min[a] <= other.max[a] && self.max[a] >= other.min[a])
    }

    /// The intersection of two AABBs. May be inverted if they are disjoint.
    #[inline]
    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = *self;
        for a in 0..3 {
            out.min[a] = f64::max(self.min[a], other.min[a]);
            out.max[a] = f64::min(self.max[a], other.max[a]);
        }
        out
    }

    /// The smallest AABB enclosing two AABBs.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        for a in 0..3 {
            out.min[a] = f64::min(self.min[a], other.min[a]);
            out.max[a] = f64::max(self.max[a], other.max[a]);
        }
        out
    }

    /// Center point of the box.
    #[inline]
    pub fn center(&self) -> [f64; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    /// Full extents (max - min) of the box.
    #[inline]
    pub fn extents(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// The box grown by `half` on every side (swept-volume inflation).
    #[inline]
    pub fn grown(&self, half: [f64; 3]) -> Self {
        let mut out = *self;
        for a in 0..3 {
            out.min[a] -= half[a];
            out.max[a] += half[a];
        }
        out
    }

    /// Return true if the AABB is inverted on any axis. Assumes no NaN.
    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|a| self.max[a] < self.min[a])
    }

    /// Index of the widest axis.
    #[inline]
    pub fn largest_axis(&self) -> usize {
        let e = self.extents();
        let mut axis = 0;
        if e[1] > e[axis] {
            axis = 1;
        }
        if e[2] > e[axis] {
            axis = 2;
        }
        axis
    }
}

/// A ray with precomputed reciprocal direction for slab tests.
///
/// The direction is expected to be normalized; query lengths are measured
/// along it.
#[derive(Copy, Clone, Debug)]
pub struct Ray {
    /// Ray origin.
    pub origin: [f64; 3],
    /// Normalized direction.
    pub dir: [f64; 3],
    /// Per-axis reciprocal of `dir` (infinite on degenerate axes).
    pub inv_dir: [f64; 3],
}

impl Ray {
    /// Create a ray, precomputing reciprocal direction components.
    #[inline]
    pub fn new(origin: [f64; 3], dir: [f64; 3]) -> Self {
        let len_sq = dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2];
        debug_assert!(
            (len_sq - 1.0).abs() < 1e-4,
            "ray direction must be normalized"
        );
        let inv_dir = [1.0 / dir[0], 1.0 / dir[1], 1.0 / dir[2]];
        Self {
            origin,
            dir,
            inv_dir,
        }
    }

    /// Point at parameter `t` along the ray.
    #[inline]
    pub fn at(&self, t: f64) -> [f64; 3] {
        [
            self.origin[0] + t * self.dir[0],
            self.origin[1] + t * self.dir[1],
            self.origin[2] + t * self.dir[2],
        ]
    }
}

/// Slab test over `[0, max_len]`: the parameter range for which the ray is
/// inside `aabb`, or `None` if it never is.
#[inline]
pub(crate) fn ray_slab_range(ray: &Ray, aabb: &Aabb3, max_len: f64) -> Option<(f64, f64)> {
    let mut t_min = 0.0_f64;
    let mut t_max = max_len;
    for a in 0..3 {
        if ray.dir[a] == 0.0 {
            // Parallel to the slab: hit only if the origin lies within it.
            if ray.origin[a] < aabb.min[a] || ray.origin[a] > aabb.max[a] {
                return None;
            }
            continue;
        }
        let mut t0 = (aabb.min[a] - ray.origin[a]) * ray.inv_dir[a];
        let mut t1 = (aabb.max[a] - ray.origin[a]) * ray.inv_dir[a];
        if t0 > t1 {
            core::mem::swap(&mut t0, &mut t1);
        }
        t_min = f64::max(t_min, t0);
        t_max = f64::min(t_max, t1);
        if t_min > t_max {
            return None;
        }
    }
    Some((t_min, t_max))
}

/// Slab test: entry distance of `ray` into `aabb`, if it hits within
/// `max_len`.
///
/// A ray starting inside the box reports an entry distance of `0.0`.
#[inline]
pub(crate) fn ray_hits_aabb(ray: &Ray, aabb: &Aabb3, max_len: f64) -> Option<f64> {
    ray_slab_range(ray, aabb, max_len).map(|(t_min, _)| t_min)
}

/// Swept-box test: slab test against the target box inflated by the swept
/// half-extents.
#[inline]
pub(crate) fn sweep_hits_aabb(
    ray: &Ray,
    aabb: &Aabb3,
    half_extents: [f64; 3],
    max_len: f64,
) -> Option<f64> {
    ray_hits_aabb(ray, &aabb.grown(half_extents), max_len)
}
