// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and helpers.

use core::cmp::Ordering;
use core::fmt::Debug;

/// Axis-aligned bounding box in 3D.
///
/// Boundaries are inclusive: two boxes that share a face, an edge or a corner overlap.
/// A box whose `min` equals its `max` is a valid point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Aabb3D<T> {
    /// Minimum corner (x, y, z).
    pub min: [T; 3],
    /// Maximum corner (x, y, z).
    pub max: [T; 3],
}

impl<T> Aabb3D<T> {
    /// Create a new AABB from min/max corners.
    #[inline(always)]
    pub const fn new(min: [T; 3], max: [T; 3]) -> Self {
        Self { min, max }
    }
}

impl<T: Copy> Aabb3D<T> {
    /// A degenerate AABB covering a single point.
    #[inline]
    pub const fn from_point(p: [T; 3]) -> Self {
        Self { min: p, max: p }
    }
}

impl<T: Copy + PartialOrd> Aabb3D<T> {
    /// Whether this AABB contains the point.
    #[inline]
    pub fn contains_point(&self, p: [T; 3]) -> bool {
        (0..3).all(|a| self.min[a] <= p[a] && p[a] <= self.max[a])
    }

    /// Whether `other` lies entirely inside this AABB (boundaries included).
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        (0..3).all(|a| self.min[a] <= other.min[a] && other.max[a] <= self.max[a])
    }

    /// Determines whether this AABB overlaps with another in any way.
    ///
    /// Note that the faces of the AABB are considered to be part of itself, meaning
    /// that two AABBs that share a face are considered to overlap.
    ///
    /// # Examples
    ///
    /// ```
    /// use understory_partition::Aabb3D;
    ///
    /// let a = Aabb3D::new([0.0, 0.0, 0.0], [10.0, 10.0, 10.0]);
    /// let b = Aabb3D::new([5.0, 5.0, 5.0], [15.0, 15.0, 15.0]);
    /// assert!(a.overlaps(&b));
    ///
    /// let c = Aabb3D::new([10.0, 0.0, 0.0], [20.0, 10.0, 10.0]);
    /// assert!(a.overlaps(&c));
    ///
    /// let d = Aabb3D::new([11.0, 0.0, 0.0], [20.0, 10.0, 10.0]);
    /// assert!(!a.overlaps(&d));
    /// ```
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min[0] <= other.max[0]
            && self.max[0] >= other.min[0]
            && self.min[1] <= other.max[1]
            && self.max[1] >= other.min[1]
            && self.min[2] <= other.max[2]
            && self.max[2] >= other.min[2]
    }

    /// The smallest AABB enclosing two AABBs.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: [
                min_t(self.min[0], other.min[0]),
                min_t(self.min[1], other.min[1]),
                min_t(self.min[2], other.min[2]),
            ],
            max: [
                max_t(self.max[0], other.max[0]),
                max_t(self.max[1], other.max[1]),
                max_t(self.max[2], other.max[2]),
            ],
        }
    }
}

impl<T: Scalar> Aabb3D<T> {
    /// Whether every coordinate is finite and `min <= max` on every axis.
    #[inline]
    pub fn is_valid(&self) -> bool {
        (0..3).all(|a| {
            T::is_finite(self.min[a]) && T::is_finite(self.max[a]) && self.min[a] <= self.max[a]
        })
    }

    /// Midpoint along one axis.
    #[inline]
    pub fn center(&self, axis: usize) -> T {
        T::mid(self.min[axis], self.max[axis])
    }

    /// Side length along one axis.
    #[inline]
    pub fn extent(&self, axis: usize) -> T {
        T::max(T::sub(self.max[axis], self.min[axis]), T::zero())
    }

    /// Grow the box by `margin` on every side.
    #[inline]
    pub fn fattened(&self, margin: T) -> Self {
        Self {
            min: [
                T::sub(self.min[0], margin),
                T::sub(self.min[1], margin),
                T::sub(self.min[2], margin),
            ],
            max: [
                T::add(self.max[0], margin),
                T::add(self.max[1], margin),
                T::add(self.max[2], margin),
            ],
        }
    }

    /// Surface area using the scalar's widened accumulator type.
    ///
    /// Inverted extents count as zero.
    #[inline]
    pub fn surface_area(&self) -> T::Acc {
        let x = T::widen(self.extent(0));
        let y = T::widen(self.extent(1));
        let z = T::widen(self.extent(2));
        let half = x * y + y * z + z * x;
        half + half
    }

    /// Intersect a ray segment `origin + t * dir` for `t` in `[0, max_len]`.
    ///
    /// Returns the entry parameter (`0` when the origin is inside the box). When `dir` is
    /// unit length the parameter is a distance.
    pub fn intersect_ray(&self, ray: &Ray3D<T>, max_len: T) -> Option<T> {
        let mut t_min = T::zero();
        let mut t_max = max_len;
        for a in 0..3 {
            let o = ray.origin[a];
            let d = ray.dir[a];
            if d == T::zero() {
                if o < self.min[a] || o > self.max[a] {
                    return None;
                }
                continue;
            }
            let t1 = T::div(T::sub(self.min[a], o), d);
            let t2 = T::div(T::sub(self.max[a], o), d);
            let (near, far) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
            t_min = T::max(t_min, near);
            t_max = T::min(t_max, far);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

/// A ray (or, with a maximum length, a segment) in 3D.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray3D<T> {
    /// Start point.
    pub origin: [T; 3],
    /// Direction; need not be normalized.
    pub dir: [T; 3],
}

impl<T> Ray3D<T> {
    /// Create a ray from an origin and a direction.
    #[inline(always)]
    pub const fn new(origin: [T; 3], dir: [T; 3]) -> Self {
        Self { origin, dir }
    }
}

impl<T: Scalar> Ray3D<T> {
    /// Point at parameter `t`.
    #[inline]
    pub fn at(&self, t: T) -> [T; 3] {
        [
            T::add(self.origin[0], T::mul(self.dir[0], t)),
            T::add(self.origin[1], T::mul(self.dir[1], t)),
            T::add(self.origin[2], T::mul(self.dir[2], t)),
        ]
    }

    /// Bounding box of the segment `[0, max_len]`.
    #[inline]
    pub fn segment_aabb(&self, max_len: T) -> Aabb3D<T> {
        let start = Aabb3D::from_point(self.origin);
        start.union(&Aabb3D::from_point(self.at(max_len)))
    }

    /// Whether the ray has finite components.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.origin.iter().chain(self.dir.iter()).all(|&v| T::is_finite(v))
    }
}

/// Numeric scalar abstraction for 3D AABBs used by the partitions.
///
/// This trait provides the operations required for SAH metrics, centroid ordering,
/// ray tests and quantization, and an associated widened accumulator type for
/// surface areas (f32→f64).
pub trait Scalar: Copy + PartialOrd + Debug {
    /// Widened accumulator type suitable for area/cost computations.
    type Acc: Copy
        + PartialOrd
        + core::ops::Add<Output = Self::Acc>
        + core::ops::Sub<Output = Self::Acc>
        + core::ops::Mul<Output = Self::Acc>
        + Debug;

    /// Add two scalar values.
    fn add(a: Self, b: Self) -> Self;

    /// Subtract two scalar values: a - b.
    fn sub(a: Self, b: Self) -> Self;

    /// Multiply two scalar values.
    fn mul(a: Self, b: Self) -> Self;

    /// Divide two scalar values: a / b.
    fn div(a: Self, b: Self) -> Self;

    /// Zero value for the scalar type.
    fn zero() -> Self;

    /// Max of the two scalar values.
    fn max(a: Self, b: Self) -> Self;

    /// Min of the two scalar values.
    fn min(a: Self, b: Self) -> Self;

    /// Midpoint between a and b (used for centroid ordering).
    fn mid(a: Self, b: Self) -> Self;

    /// Whether the value is neither NaN nor infinite.
    fn is_finite(v: Self) -> bool;

    /// Convert a scalar to the accumulator type.
    fn widen(v: Self) -> Self::Acc;

    /// Convert a `usize` to the accumulator type (for SAH weighting).
    fn acc_from_usize(n: usize) -> Self::Acc;

    /// Lossless (or nearest) conversion to `f64`, used by quantization.
    fn to_f64(v: Self) -> f64;

    /// Conversion from `f64`, used when decoding quantized bounds.
    fn from_f64(v: f64) -> Self;
}

impl Scalar for f32 {
    type Acc = f64;

    #[inline]
    fn add(a: Self, b: Self) -> Self {
        a + b
    }

    #[inline]
    fn sub(a: Self, b: Self) -> Self {
        a - b
    }

    #[inline]
    fn mul(a: Self, b: Self) -> Self {
        a * b
    }

    #[inline]
    fn div(a: Self, b: Self) -> Self {
        a / b
    }

    #[inline(always)]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn max(a: Self, b: Self) -> Self {
        Self::max(a, b)
    }

    #[inline]
    fn min(a: Self, b: Self) -> Self {
        Self::min(a, b)
    }

    #[inline]
    fn mid(a: Self, b: Self) -> Self {
        0.5 * (a + b)
    }

    #[inline]
    fn is_finite(v: Self) -> bool {
        Self::is_finite(v)
    }

    #[inline]
    fn widen(v: Self) -> Self::Acc {
        v as f64
    }

    #[inline]
    fn acc_from_usize(n: usize) -> Self::Acc {
        n as f64
    }

    #[inline]
    fn to_f64(v: Self) -> f64 {
        v as f64
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Compressed encoding steps quantization levels until the decoded value is outside the bound."
    )]
    #[inline]
    fn from_f64(v: f64) -> Self {
        v as Self
    }
}

impl Scalar for f64 {
    type Acc = Self;

    #[inline]
    fn add(a: Self, b: Self) -> Self {
        a + b
    }

    #[inline]
    fn sub(a: Self, b: Self) -> Self {
        a - b
    }

    #[inline]
    fn mul(a: Self, b: Self) -> Self {
        a * b
    }

    #[inline]
    fn div(a: Self, b: Self) -> Self {
        a / b
    }

    #[inline(always)]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn max(a: Self, b: Self) -> Self {
        Self::max(a, b)
    }

    #[inline]
    fn min(a: Self, b: Self) -> Self {
        Self::min(a, b)
    }

    #[inline]
    fn mid(a: Self, b: Self) -> Self {
        0.5 * (a + b)
    }

    #[inline]
    fn is_finite(v: Self) -> bool {
        Self::is_finite(v)
    }

    #[inline(always)]
    fn widen(v: Self) -> Self::Acc {
        v
    }

    #[inline]
    fn acc_from_usize(n: usize) -> Self::Acc {
        n as Self::Acc
    }

    #[inline(always)]
    fn to_f64(v: Self) -> f64 {
        v
    }

    #[inline(always)]
    fn from_f64(v: f64) -> Self {
        v
    }
}

/// Helper alias for the widened accumulator type `Scalar::Acc` associated with a `T: Scalar`.
pub type ScalarAcc<T> = <T as Scalar>::Acc;

pub(crate) fn min_t<T: PartialOrd + Copy>(a: T, b: T) -> T {
    match a.partial_cmp(&b) {
        Some(Ordering::Greater) => b,
        _ => a,
    }
}

pub(crate) fn max_t<T: PartialOrd + Copy>(a: T, b: T) -> T {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => b,
        _ => a,
    }
}

#[cfg(test)]
mod tests {
    use super::{Aabb3D, Ray3D};

    #[test]
    fn surface_area_and_validity() {
        const EPSILON: f64 = 1e-10;

        let mut aabb = Aabb3D::<f64>::new([0., 0., 0.], [1., 2., 3.]);
        assert!((aabb.surface_area() - 2. * (2. + 6. + 3.)).abs() < EPSILON);
        assert!(aabb.is_valid());

        // Inverted boxes are invalid and contribute no area along the inverted axis.
        aabb.max[0] = -1.;
        assert!(!aabb.is_valid());
        assert!((aabb.surface_area() - 2. * 6.).abs() < EPSILON);

        aabb.max[0] = f64::NAN;
        assert!(!aabb.is_valid());
        aabb.max[0] = f64::INFINITY;
        assert!(!aabb.is_valid());

        // Points are valid.
        assert!(Aabb3D::from_point([1.0_f32, 2.0, 3.0]).is_valid());
    }

    #[test]
    fn containment_and_union() {
        let a = Aabb3D::new([0., 0., 0.], [2., 2., 2.]);
        let b = Aabb3D::new([1., 1., 1.], [3., 3., 3.]);
        let u = a.union(&b);
        assert_eq!(u, Aabb3D::new([0., 0., 0.], [3., 3., 3.]));
        assert!(u.contains(&a));
        assert!(u.contains(&b));
        assert!(!a.contains(&b));
        assert!(a.contains(&a));
        assert!(a.fattened(0.5).contains(&Aabb3D::new([-0.5, 0., 0.], [2.5, 2., 2.])));
    }

    #[test]
    fn ray_slab_test() {
        let b = Aabb3D::new([2., -1., -1.], [4., 1., 1.]);
        let ray = Ray3D::new([0., 0., 0.], [1., 0., 0.]);
        assert_eq!(b.intersect_ray(&ray, 10.), Some(2.));
        // Segment too short.
        assert_eq!(b.intersect_ray(&ray, 1.5), None);
        // Pointing away.
        let back = Ray3D::new([0., 0., 0.], [-1., 0., 0.]);
        assert_eq!(b.intersect_ray(&back, 10.), None);
        // Parallel to a slab and outside it.
        let above = Ray3D::new([0., 5., 0.], [1., 0., 0.]);
        assert_eq!(b.intersect_ray(&above, 10.), None);
        // Origin inside.
        let inside = Ray3D::new([3., 0., 0.], [0., 1., 0.]);
        assert_eq!(b.intersect_ray(&inside, 10.), Some(0.));
        assert_eq!(
            ray.segment_aabb(3.),
            Aabb3D::new([0., 0., 0.], [3., 0., 0.])
        );
    }
}
