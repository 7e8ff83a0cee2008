//! Traits for mesh types.

use crate::{Aabb, Triangle};
use nalgebra::Point3;

/// Read access to an indexed triangle surface.
///
/// Distance engines only need positions and face indices; anything that can
/// hand those out can be indexed.
pub trait MeshTopology {
    /// Number of vertices.
    fn vertex_count(&self) -> usize;

    /// Number of triangular faces.
    fn face_count(&self) -> usize;

    /// Check if the mesh has no faces.
    fn is_empty(&self) -> bool {
        self.face_count() == 0
    }

    /// Position of a vertex, `None` when out of range.
    fn position(&self, index: usize) -> Option<Point3<f64>>;

    /// Vertex indices of a face, `None` when out of range.
    fn face(&self, index: usize) -> Option<[u32; 3]>;

    /// Resolved triangle of a face.
    ///
    /// `None` when the face or any of its vertex indices is out of range.
    fn triangle(&self, face_index: usize) -> Option<Triangle> {
        let [a, b, c] = self.face(face_index)?;
        Some(Triangle::new(
            self.position(a as usize)?,
            self.position(b as usize)?,
            self.position(c as usize)?,
        ))
    }

    /// First face referencing a vertex that does not exist, as
    /// `(face, offending index)`.
    fn first_invalid_face(&self) -> Option<(usize, u32)> {
        let count = self.vertex_count();
        (0..self.face_count()).find_map(|f| {
            self.face(f)?
                .into_iter()
                .find(|&i| i as usize >= count)
                .map(|i| (f, i))
        })
    }
}

/// Types that can report their bounding box.
pub trait MeshBounds {
    /// Bounding box of all vertices; [`Aabb::empty`] when there are none.
    fn bounds(&self) -> Aabb;

    /// Bounding box, or `None` if empty.
    fn bounds_opt(&self) -> Option<Aabb> {
        let b = self.bounds();
        if b.is_empty() { None } else { Some(b) }
    }
}
