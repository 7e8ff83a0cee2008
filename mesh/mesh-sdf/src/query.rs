//! Point-to-triangle closest point kernel.
//!
//! Besides the closest point itself, the kernel reports which feature of the
//! triangle (corner, edge or interior) holds it, which is what the
//! pseudo-normal sign test needs.

use mesh_types::Triangle;
use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The part of a triangle that holds a closest point.
///
/// Indices are local to the triangle. Edge `i` joins corner `i` to corner
/// `(i + 1) % 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TriangleFeature {
    /// One of the three corners.
    Vertex(u8),
    /// The open segment of one of the three edges.
    Edge(u8),
    /// The interior of the triangle.
    Face,
}

/// Result of [`closest_point_on_triangle`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoint {
    /// Closest point on the triangle.
    pub point: Point3<f64>,
    /// Squared distance from the query to `point`.
    pub distance_squared: f64,
    /// Feature of the triangle that holds `point`.
    pub feature: TriangleFeature,
}

impl ClosestPoint {
    fn new(query: &Point3<f64>, point: Point3<f64>, feature: TriangleFeature) -> Self {
        Self {
            point,
            distance_squared: (query - point).norm_squared(),
            feature,
        }
    }
}

/// Closest point on a triangle to `point`, with its feature classification.
///
/// Voronoi-region walk from "Real-Time Collision Detection" (Ericson, 5.1.5).
/// Degenerate triangles (repeated corners, collinear corners, or an area that
/// vanishes relative to the edge lengths) skip the walk and take the closest
/// of the three edges, so the result is always finite for finite input.
///
/// # Example
///
/// ```
/// use mesh_sdf::{closest_point_on_triangle, TriangleFeature};
/// use mesh_types::{Point3, Triangle};
///
/// let tri = Triangle::from_arrays([0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [5.0, 10.0, 0.0]);
///
/// let hit = closest_point_on_triangle(&Point3::new(5.0, 3.0, 2.0), &tri);
/// assert_eq!(hit.feature, TriangleFeature::Face);
/// assert!((hit.distance_squared - 4.0).abs() < 1e-12);
///
/// let hit = closest_point_on_triangle(&Point3::new(-1.0, -1.0, 0.0), &tri);
/// assert_eq!(hit.feature, TriangleFeature::Vertex(0));
/// ```
#[must_use]
pub fn closest_point_on_triangle(point: &Point3<f64>, tri: &Triangle) -> ClosestPoint {
    let (a, b, c) = (tri.v0, tri.v1, tri.v2);
    let ab = b - a;
    let ac = c - a;
    if is_degenerate(&ab, &ac, &(c - b)) {
        return closest_on_edges(point, tri);
    }

    let ap = point - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return ClosestPoint::new(point, a, TriangleFeature::Vertex(0));
    }

    let bp = point - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return ClosestPoint::new(point, b, TriangleFeature::Vertex(1));
    }

    let vc = d1.mul_add(d4, -(d3 * d2));
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return on_edge(point, tri, 0, ratio(d1, d1 - d3));
    }

    let cp = point - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return ClosestPoint::new(point, c, TriangleFeature::Vertex(2));
    }

    let vb = d5.mul_add(d2, -(d1 * d6));
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        // edge 2 runs from c back to a
        return on_edge(point, tri, 2, 1.0 - ratio(d2, d2 - d6));
    }

    let va = d3.mul_add(d6, -(d5 * d4));
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return on_edge(point, tri, 1, ratio(d4 - d3, (d4 - d3) + (d5 - d6)));
    }

    let denom = va + vb + vc;
    if denom > 0.0 && denom.is_finite() {
        let v = vb / denom;
        let w = vc / denom;
        return ClosestPoint::new(point, a + ab * v + ac * w, TriangleFeature::Face);
    }

    closest_on_edges(point, tri)
}

/// Squared distance from `point` to the nearest point of `tri`.
#[inline]
#[must_use]
pub fn point_triangle_distance_squared(point: &Point3<f64>, tri: &Triangle) -> f64 {
    closest_point_on_triangle(point, tri).distance_squared
}

/// Squared distance from `point` to the segment `a`-`b`.
///
/// A zero-length segment behaves like the point `a`.
#[must_use]
pub fn point_segment_distance_squared(point: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let t = segment_parameter(point, a, b);
    (point - (a + (b - a) * t)).norm_squared()
}

/// True when the corners span no usable plane.
///
/// Compares the squared cross product against the longest squared edge, so
/// the test is scale free.
#[inline]
fn is_degenerate(ab: &Vector3<f64>, ac: &Vector3<f64>, bc: &Vector3<f64>) -> bool {
    let longest = ab.norm_squared().max(ac.norm_squared()).max(bc.norm_squared());
    ab.cross(ac).norm_squared() <= f64::EPSILON * longest * longest
}

/// `n / d`, or 0 when the denominator vanishes.
#[inline]
fn ratio(n: f64, d: f64) -> f64 {
    if d == 0.0 { 0.0 } else { n / d }
}

/// Clamped projection parameter of `point` onto `a`-`b`.
fn segment_parameter(point: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= 0.0 {
        return 0.0;
    }
    ((point - a).dot(&ab) / len2).clamp(0.0, 1.0)
}

/// Point at parameter `t` along edge `edge`, snapped to a corner at the ends.
#[allow(clippy::cast_possible_truncation)]
fn on_edge(point: &Point3<f64>, tri: &Triangle, edge: usize, t: f64) -> ClosestPoint {
    let (start, end) = tri.edge(edge);
    if t <= 0.0 {
        ClosestPoint::new(point, start, TriangleFeature::Vertex(edge as u8))
    } else if t >= 1.0 {
        ClosestPoint::new(point, end, TriangleFeature::Vertex(((edge + 1) % 3) as u8))
    } else {
        ClosestPoint::new(point, start + (end - start) * t, TriangleFeature::Edge(edge as u8))
    }
}

/// Best of the three edges, for triangles without a usable interior.
fn closest_on_edges(point: &Point3<f64>, tri: &Triangle) -> ClosestPoint {
    let mut best = ClosestPoint::new(point, tri.v0, TriangleFeature::Vertex(0));
    for edge in 0..3 {
        let (start, end) = tri.edge(edge);
        let candidate = on_edge(point, tri, edge, segment_parameter(point, &start, &end));
        if candidate.distance_squared < best.distance_squared {
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn simple_triangle() -> Triangle {
        Triangle::from_arrays([0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [5.0, 10.0, 0.0])
    }

    #[test]
    fn interior_projects_onto_plane() {
        let hit = closest_point_on_triangle(&Point3::new(5.0, 3.0, 5.0), &simple_triangle());
        assert_eq!(hit.feature, TriangleFeature::Face);
        assert_relative_eq!(hit.point, Point3::new(5.0, 3.0, 0.0), epsilon = 1e-10);
        assert_relative_eq!(hit.distance_squared, 25.0, epsilon = 1e-10);
    }

    #[test]
    fn corner_regions() {
        let tri = simple_triangle();
        let cases = [
            (Point3::new(-5.0, -5.0, 0.0), 0, tri.v0),
            (Point3::new(15.0, -1.0, 0.0), 1, tri.v1),
            (Point3::new(5.0, 15.0, 1.0), 2, tri.v2),
        ];
        for (query, corner, expected) in cases {
            let hit = closest_point_on_triangle(&query, &tri);
            assert_eq!(hit.feature, TriangleFeature::Vertex(corner));
            assert_relative_eq!(hit.point, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn edge_regions() {
        let tri = simple_triangle();

        let hit = closest_point_on_triangle(&Point3::new(5.0, -5.0, 0.0), &tri);
        assert_eq!(hit.feature, TriangleFeature::Edge(0));
        assert_relative_eq!(hit.point, Point3::new(5.0, 0.0, 0.0), epsilon = 1e-12);

        // beyond the v1-v2 edge
        let hit = closest_point_on_triangle(&Point3::new(9.0, 6.0, 0.0), &tri);
        assert_eq!(hit.feature, TriangleFeature::Edge(1));
        assert_relative_eq!(hit.point.z, 0.0, epsilon = 1e-12);

        // beyond the v2-v0 edge
        let hit = closest_point_on_triangle(&Point3::new(0.0, 6.0, 0.0), &tri);
        assert_eq!(hit.feature, TriangleFeature::Edge(2));
        let expected = point_segment_distance_squared(&Point3::new(0.0, 6.0, 0.0), &tri.v2, &tri.v0);
        assert_relative_eq!(hit.distance_squared, expected, epsilon = 1e-12);
    }

    #[test]
    fn query_on_corner_is_vertex_at_zero() {
        let tri = simple_triangle();
        let hit = closest_point_on_triangle(&tri.v1, &tri);
        assert_eq!(hit.feature, TriangleFeature::Vertex(1));
        assert_eq!(hit.distance_squared, 0.0);
    }

    #[test]
    fn collinear_triangle_uses_edges() {
        let tri = Triangle::from_arrays([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]);
        let hit = closest_point_on_triangle(&Point3::new(1.5, 1.0, 0.0), &tri);
        assert!(hit.distance_squared.is_finite());
        assert_relative_eq!(hit.distance_squared, 1.0, epsilon = 1e-12);
        assert_relative_eq!(hit.point, Point3::new(1.5, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn repeated_corner_uses_remaining_edge() {
        let segment = Triangle::from_arrays([0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let query = Point3::new(0.5, 1.0, 0.0);
        let hit = closest_point_on_triangle(&query, &segment);
        assert_relative_eq!(hit.distance_squared, 1.0, epsilon = 1e-12);
        assert_relative_eq!(hit.point, Point3::new(0.5, 0.0, 0.0), epsilon = 1e-12);
        assert!(matches!(hit.feature, TriangleFeature::Edge(_)));

        // every placement of the repeated corner
        let (p, q) = (Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0));
        for tri in [Triangle::new(p, q, p), Triangle::new(q, p, p), Triangle::new(p, p, q)] {
            let hit = closest_point_on_triangle(&query, &tri);
            assert_relative_eq!(hit.distance_squared, 1.0, epsilon = 1e-12);
            assert_relative_eq!(
                hit.distance_squared,
                point_segment_distance_squared(&query, &p, &q),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn sliver_triangle_stays_exact() {
        let tri = Triangle::from_arrays([0.0, 0.0, 0.0], [1.0, 1e-12, 0.0], [2.0, 0.0, 0.0]);
        let hit = closest_point_on_triangle(&Point3::new(1.0, 3.0, 0.0), &tri);
        assert_relative_eq!(hit.distance_squared, (3.0_f64 - 1e-12).powi(2), epsilon = 1e-9);
    }

    #[test]
    fn collapsed_triangle_is_a_point() {
        let p = Point3::new(1.0, 2.0, 3.0);
        let tri = Triangle::new(p, p, p);
        let hit = closest_point_on_triangle(&Point3::new(1.0, 2.0, 5.0), &tri);
        assert_eq!(hit.point, p);
        assert_relative_eq!(hit.distance_squared, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn matches_brute_force_sampling() {
        let tri = Triangle::from_arrays([0.3, -0.2, 0.1], [1.4, 0.5, -0.3], [-0.2, 1.1, 0.8]);
        let queries = [
            Point3::new(0.5, 0.5, 2.0),
            Point3::new(-1.0, -1.0, -1.0),
            Point3::new(2.0, 0.2, 0.0),
            Point3::new(0.4, 1.5, 0.5),
        ];
        for q in queries {
            let hit = closest_point_on_triangle(&q, &tri);
            let steps: u32 = 200;
            let mut best = f64::INFINITY;
            for i in 0..=steps {
                for j in 0..=(steps - i) {
                    let u = f64::from(i) / f64::from(steps);
                    let v = f64::from(j) / f64::from(steps);
                    let s = tri.v0 + (tri.v1 - tri.v0) * u + (tri.v2 - tri.v0) * v;
                    best = best.min((q - s).norm_squared());
                }
            }
            assert!(hit.distance_squared <= best + 1e-12);
            assert!(best - hit.distance_squared < 1e-3);
        }
    }

    #[test]
    fn segment_distance() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(10.0, 0.0, 0.0);
        assert_relative_eq!(
            point_segment_distance_squared(&Point3::new(5.0, 3.0, 0.0), &a, &b),
            9.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            point_segment_distance_squared(&Point3::new(-3.0, 4.0, 0.0), &a, &b),
            25.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            point_segment_distance_squared(&Point3::new(0.0, 2.0, 0.0), &a, &a),
            4.0,
            epsilon = 1e-12
        );
    }
}
