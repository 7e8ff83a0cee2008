//! Concrete triangle primitive.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Aabb;

/// A triangle with resolved vertex positions.
///
/// This is the primitive the distance engines index. The vertex order
/// defines the orientation: counter-clockwise seen from the side the
/// normal points to.
///
/// # Example
///
/// ```
/// use mesh_types::{Triangle, Point3};
///
/// let tri = Triangle::new(
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 1.0, 0.0),
/// );
///
/// assert!((tri.area() - 0.5).abs() < 1e-12);
/// assert!(tri.normal().is_some_and(|n| (n.z - 1.0).abs() < 1e-12));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Triangle {
    /// First vertex.
    pub v0: Point3<f64>,
    /// Second vertex.
    pub v1: Point3<f64>,
    /// Third vertex.
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a triangle from three points.
    #[inline]
    #[must_use]
    pub const fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Create a triangle from coordinate arrays.
    #[inline]
    #[must_use]
    pub fn from_arrays(v0: [f64; 3], v1: [f64; 3], v2: [f64; 3]) -> Self {
        Self::new(Point3::from(v0), Point3::from(v1), Point3::from(v2))
    }

    /// The three corners in order.
    #[inline]
    #[must_use]
    pub const fn vertices(&self) -> [Point3<f64>; 3] {
        [self.v0, self.v1, self.v2]
    }

    /// Corner `i`, taken modulo 3.
    #[inline]
    #[must_use]
    pub const fn vertex(&self, i: usize) -> Point3<f64> {
        match i % 3 {
            0 => self.v0,
            1 => self.v1,
            _ => self.v2,
        }
    }

    /// Edge `i` as `(start, end)`: it joins corner `i` to corner `(i + 1) % 3`.
    #[inline]
    #[must_use]
    pub const fn edge(&self, i: usize) -> (Point3<f64>, Point3<f64>) {
        (self.vertex(i), self.vertex(i + 1))
    }

    /// Cross product of the two edges leaving `v0`. Its length is twice the area.
    #[inline]
    #[must_use]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Unit normal, or `None` for a degenerate triangle.
    #[must_use]
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let n = self.normal_unnormalized();
        let len = n.norm();
        if len > f64::EPSILON {
            Some(n / len)
        } else {
            None
        }
    }

    /// Surface area.
    #[inline]
    #[must_use]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Average of the three corners.
    #[inline]
    #[must_use]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    /// Tight bounding box.
    #[inline]
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        Aabb::from_triangle(&self.v0, &self.v1, &self.v2)
    }

    /// Interior angle at corner `i` (radians).
    ///
    /// Returns 0 when either adjacent edge has zero length.
    #[must_use]
    pub fn angle_at(&self, i: usize) -> f64 {
        let p = self.vertex(i);
        let a = self.vertex(i + 1) - p;
        let b = self.vertex(i + 2) - p;
        let (la, lb) = (a.norm(), b.norm());
        if la <= f64::EPSILON || lb <= f64::EPSILON {
            return 0.0;
        }
        (a.dot(&b) / (la * lb)).clamp(-1.0, 1.0).acos()
    }

    /// Check whether the area is at most `epsilon`.
    #[inline]
    #[must_use]
    pub fn is_degenerate(&self, epsilon: f64) -> bool {
        self.area() <= epsilon
    }

    /// Same triangle with opposite winding.
    #[inline]
    #[must_use]
    pub const fn reversed(&self) -> Self {
        Self::new(self.v0, self.v2, self.v1)
    }
}
