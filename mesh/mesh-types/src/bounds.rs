//! Axis-aligned bounding box.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box (AABB).
///
/// Boxes are plain values: they are derived from geometry on demand and never
/// mutated behind the caller's back. NaN coordinates are not rejected; they
/// propagate into NaN-valued boxes so that bad input stays visible downstream.
///
/// # Example
///
/// ```
/// use mesh_types::{Aabb, Point3};
///
/// let aabb = Aabb::new(
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(10.0, 10.0, 10.0),
/// );
///
/// assert!(aabb.contains(&Point3::new(5.0, 5.0, 5.0)));
/// assert_eq!(aabb.distance_squared_to_point(&Point3::new(13.0, 14.0, 5.0)), 25.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point3<f64>,
    /// Maximum corner.
    pub max: Point3<f64>,
}

/// `min` that lets NaN through instead of discarding it.
#[inline]
fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

/// `max` that lets NaN through instead of discarding it.
#[inline]
fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

impl Aabb {
    /// Create a box from two corners, swapping coordinates where `min > max`.
    #[must_use]
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self {
            min: Point3::new(min.x.min(max.x), min.y.min(max.y), min.z.min(max.z)),
            max: Point3::new(min.x.max(max.x), min.y.max(max.y), min.z.max(max.z)),
        }
    }

    /// Create a zero-volume box around a single point.
    #[inline]
    #[must_use]
    pub const fn from_point(point: Point3<f64>) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// The empty box: `min = +inf`, `max = -inf`.
    ///
    /// This is the identity element of [`Aabb::union`].
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Point3::new is not const in nalgebra
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Smallest box containing all points of the iterator.
    ///
    /// Returns [`Aabb::empty`] for an empty iterator.
    #[must_use]
    pub fn from_points<'a>(points: impl Iterator<Item = &'a Point3<f64>>) -> Self {
        let mut aabb = Self::empty();
        for point in points {
            aabb.expand_to_include(point);
        }
        aabb
    }

    /// Tight box around a triangle given by its three corners.
    ///
    /// Zero-area triangles still yield a valid (possibly flat) box.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_types::{Aabb, Point3};
    ///
    /// let bbox = Aabb::from_triangle(
    ///     &Point3::new(0.0, 0.0, 0.0),
    ///     &Point3::new(1.0, 0.0, 0.0),
    ///     &Point3::new(0.5, 1.0, 0.0),
    /// );
    /// assert_eq!(bbox.max, Point3::new(1.0, 1.0, 0.0));
    /// assert_eq!(bbox.size().z, 0.0);
    /// ```
    #[must_use]
    pub fn from_triangle(v0: &Point3<f64>, v1: &Point3<f64>, v2: &Point3<f64>) -> Self {
        Self {
            min: Point3::new(
                nan_min(nan_min(v0.x, v1.x), v2.x),
                nan_min(nan_min(v0.y, v1.y), v2.y),
                nan_min(nan_min(v0.z, v1.z), v2.z),
            ),
            max: Point3::new(
                nan_max(nan_max(v0.x, v1.x), v2.x),
                nan_max(nan_max(v0.y, v1.y), v2.y),
                nan_max(nan_max(v0.z, v1.z), v2.z),
            ),
        }
    }

    /// Check whether the box contains nothing (`min > max` on some axis).
    ///
    /// NaN boxes are not empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Check whether any coordinate is NaN.
    #[inline]
    #[must_use]
    pub fn has_nan(&self) -> bool {
        self.min.coords.iter().chain(self.max.coords.iter()).any(|c| c.is_nan())
    }

    /// Extent along each axis.
    #[inline]
    #[must_use]
    pub fn size(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Center of the box.
    #[inline]
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        Point3::from((self.min.coords + self.max.coords) * 0.5)
    }

    /// Index of the longest axis (0 = X, 1 = Y, 2 = Z). Ties prefer the lower axis.
    #[must_use]
    pub fn longest_axis(&self) -> usize {
        let s = self.size();
        if s.x >= s.y && s.x >= s.z {
            0
        } else if s.y >= s.z {
            1
        } else {
            2
        }
    }

    /// Length of the longest edge.
    #[inline]
    #[must_use]
    pub fn max_extent(&self) -> f64 {
        let s = self.size();
        s.x.max(s.y).max(s.z)
    }

    /// Surface area, 0 for empty boxes.
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let s = self.size();
        2.0 * s.z.mul_add(s.x, s.x.mul_add(s.y, s.y * s.z))
    }

    /// Volume, 0 for empty boxes.
    #[must_use]
    pub fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let s = self.size();
        s.x * s.y * s.z
    }

    /// Point containment; points on the boundary are inside.
    #[inline]
    #[must_use]
    pub fn contains(&self, point: &Point3<f64>) -> bool {
        self.contains_with_tolerance(point, 0.0)
    }

    /// Point containment with the box grown by `tolerance` on every side.
    #[must_use]
    pub fn contains_with_tolerance(&self, point: &Point3<f64>, tolerance: f64) -> bool {
        (0..3).all(|axis| {
            point[axis] >= self.min[axis] - tolerance && point[axis] <= self.max[axis] + tolerance
        })
    }

    /// Check whether `other` lies entirely inside this box.
    ///
    /// The empty box is contained in every box.
    #[must_use]
    pub fn contains_aabb(&self, other: &Self) -> bool {
        if other.is_empty() {
            return true;
        }
        self.contains(&other.min) && self.contains(&other.max)
    }

    /// Overlap test; touching boxes intersect.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersects_with_tolerance(other, 0.0)
    }

    /// Overlap test with a separation margin.
    ///
    /// Boxes closer than `tolerance` along every axis count as intersecting.
    #[must_use]
    pub fn intersects_with_tolerance(&self, other: &Self, tolerance: f64) -> bool {
        (0..3).all(|axis| {
            self.min[axis] <= other.max[axis] + tolerance
                && other.min[axis] <= self.max[axis] + tolerance
        })
    }

    /// Smallest box enclosing both boxes.
    ///
    /// Associative and commutative, with [`Aabb::empty`] as identity.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_types::{Aabb, Point3};
    ///
    /// let a = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
    /// let b = Aabb::new(Point3::new(2.0, -1.0, 0.5), Point3::new(3.0, 0.0, 0.5));
    ///
    /// assert_eq!(a.union(&b), b.union(&a));
    /// assert_eq!(a.union(&Aabb::empty()), a);
    /// ```
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            min: Point3::new(
                nan_min(self.min.x, other.min.x),
                nan_min(self.min.y, other.min.y),
                nan_min(self.min.z, other.min.z),
            ),
            max: Point3::new(
                nan_max(self.max.x, other.max.x),
                nan_max(self.max.y, other.max.y),
                nan_max(self.max.z, other.max.z),
            ),
        }
    }

    /// In-place [`Aabb::union`].
    pub fn merge(&mut self, other: &Self) {
        *self = self.union(other);
    }

    /// Grow the box to include a point.
    pub fn expand_to_include(&mut self, point: &Point3<f64>) {
        self.merge(&Self::from_point(*point));
    }

    /// Copy of the box padded by `margin` on every side.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        let pad = Vector3::repeat(margin);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Squared distance from `point` to the closest point of the box.
    ///
    /// Zero for points inside. This is an exact lower bound on the squared
    /// distance from `point` to anything the box encloses.
    #[must_use]
    pub fn distance_squared_to_point(&self, point: &Point3<f64>) -> f64 {
        let mut d2 = 0.0;
        for axis in 0..3 {
            let p = point[axis];
            let gap = if p < self.min[axis] {
                self.min[axis] - p
            } else if p > self.max[axis] {
                p - self.max[axis]
            } else if p.is_nan() || self.min[axis].is_nan() || self.max[axis].is_nan() {
                f64::NAN
            } else {
                0.0
            };
            d2 += gap * gap;
        }
        d2
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
