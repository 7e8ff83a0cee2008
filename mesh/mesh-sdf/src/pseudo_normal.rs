//! Angle-weighted pseudo-normals for inside/outside classification.
//!
//! For a closed, consistently oriented surface, the sign of
//! `(query - closest) · n` is correct for every query when `n` is the
//! pseudo-normal of the feature holding the closest point (Bærentzen and
//! Aanæs, 2005):
//!
//! - face interior: the face normal,
//! - edge: the normalized sum of the two adjacent face normals,
//! - vertex: the normalized sum of incident face normals, each weighted by
//!   the face's interior angle at that vertex.

use std::fmt;

use hashbrown::HashMap;
use mesh_types::{IndexedMesh, Point3, Triangle, Vector3, Vertex};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bvh::NearestHit;
use crate::query::TriangleFeature;

/// Which side of the surface a query lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Sign {
    /// Behind the surface (against the outward normal).
    Inside,
    /// In front of the surface.
    Outside,
    /// On the surface, within the boundary tolerance.
    Boundary,
}

impl Sign {
    /// Apply the sign to an unsigned distance: negative inside, else positive.
    #[must_use]
    pub fn apply(self, distance: f64) -> f64 {
        match self {
            Self::Inside => -distance,
            Self::Outside | Self::Boundary => distance,
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inside => "inside",
            Self::Outside => "outside",
            Self::Boundary => "boundary",
        })
    }
}

/// Pseudo-normals of every face, edge and vertex of a mesh.
///
/// Degenerate faces get a zero normal and contribute nothing to their edges
/// and vertices.
#[derive(Debug, Clone, Default)]
pub struct PseudoNormalTable {
    faces: Vec<[u32; 3]>,
    face_normals: Vec<Vector3<f64>>,
    face_edges: Vec<[u32; 3]>,
    edge_normals: Vec<Vector3<f64>>,
    vertex_normals: Vec<Vector3<f64>>,
    boundary_edges: usize,
    non_manifold_edges: usize,
}

fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

impl PseudoNormalTable {
    /// Build the table for a mesh whose face indices are all in range.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn build(mesh: &IndexedMesh) -> Self {
        let positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();
        let triangle = |face: &[u32; 3]| {
            Triangle::new(
                positions[face[0] as usize],
                positions[face[1] as usize],
                positions[face[2] as usize],
            )
        };

        let face_normals: Vec<Vector3<f64>> = mesh
            .faces
            .iter()
            .map(|f| triangle(f).normal().unwrap_or_else(Vector3::zeros))
            .collect();

        let mut edge_ids: HashMap<(u32, u32), u32> = HashMap::with_capacity(mesh.faces.len() * 3 / 2);
        let mut edge_normals: Vec<Vector3<f64>> = Vec::new();
        let mut edge_uses: Vec<u32> = Vec::new();
        let mut face_edges = Vec::with_capacity(mesh.faces.len());
        let mut vertex_normals = vec![Vector3::zeros(); positions.len()];

        for (f, face) in mesh.faces.iter().enumerate() {
            let normal = face_normals[f];
            let tri = triangle(face);
            let mut ids = [0u32; 3];
            for i in 0..3 {
                let key = edge_key(face[i], face[(i + 1) % 3]);
                let id = *edge_ids.entry(key).or_insert_with(|| {
                    edge_normals.push(Vector3::zeros());
                    edge_uses.push(0);
                    (edge_normals.len() - 1) as u32
                });
                edge_normals[id as usize] += normal;
                edge_uses[id as usize] += 1;
                ids[i] = id;

                vertex_normals[face[i] as usize] += normal * tri.angle_at(i);
            }
            face_edges.push(ids);
        }

        for n in edge_normals.iter_mut().chain(vertex_normals.iter_mut()) {
            *n = n.try_normalize(0.0).unwrap_or_else(Vector3::zeros);
        }

        let boundary_edges = edge_uses.iter().filter(|&&u| u == 1).count();
        let non_manifold_edges = edge_uses.iter().filter(|&&u| u > 2).count();

        debug!(
            faces = mesh.faces.len(),
            edges = edge_normals.len(),
            vertices = vertex_normals.len(),
            boundary_edges,
            non_manifold_edges,
            "Built pseudo-normal table"
        );

        Self {
            faces: mesh.faces.clone(),
            face_normals,
            face_edges,
            edge_normals,
            vertex_normals,
            boundary_edges,
            non_manifold_edges,
        }
    }

    /// Pseudo-normal of `feature` on face `face`.
    ///
    /// # Panics
    ///
    /// Panics if `face` is out of range.
    #[must_use]
    pub fn normal(&self, face: u32, feature: TriangleFeature) -> Vector3<f64> {
        let face = face as usize;
        match feature {
            TriangleFeature::Face => self.face_normals[face],
            TriangleFeature::Edge(i) => {
                self.edge_normals[self.face_edges[face][usize::from(i % 3)] as usize]
            }
            TriangleFeature::Vertex(i) => {
                self.vertex_normals[self.faces[face][usize::from(i % 3)] as usize]
            }
        }
    }

    /// Classify `query` against the surface using its nearest hit.
    ///
    /// Offsets along the pseudo-normal of magnitude at most `tolerance` are
    /// [`Sign::Boundary`].
    #[must_use]
    pub fn classify(&self, query: &Point3<f64>, hit: &NearestHit, tolerance: f64) -> Sign {
        let n = self.normal(hit.primitive, hit.feature);
        let offset = (query - hit.point).dot(&n);
        if offset.abs() <= tolerance {
            Sign::Boundary
        } else if offset > 0.0 {
            Sign::Outside
        } else if offset < 0.0 {
            Sign::Inside
        } else {
            Sign::Boundary
        }
    }

    /// Unit normal of a face (zero for degenerate faces).
    #[must_use]
    pub fn face_normal(&self, face: usize) -> Option<Vector3<f64>> {
        self.face_normals.get(face).copied()
    }

    /// Angle-weighted normal of a vertex (zero when isolated).
    #[must_use]
    pub fn vertex_normal(&self, vertex: usize) -> Option<Vector3<f64>> {
        self.vertex_normals.get(vertex).copied()
    }

    /// Number of distinct edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_normals.len()
    }

    /// Edges used by exactly one face.
    #[must_use]
    pub const fn boundary_edge_count(&self) -> usize {
        self.boundary_edges
    }

    /// Edges shared by more than two faces.
    #[must_use]
    pub const fn non_manifold_edge_count(&self) -> usize {
        self.non_manifold_edges
    }

    /// Check whether every edge has exactly two faces.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.boundary_edges == 0 && self.non_manifold_edges == 0
    }

    /// Upper bound of [`PseudoNormalTable::memory_bytes`] for a mesh with
    /// `vertices` vertices and `faces` faces.
    pub(crate) const fn max_memory_bytes(vertices: usize, faces: usize) -> usize {
        let normal = std::mem::size_of::<Vector3<f64>>();
        let triple = std::mem::size_of::<[u32; 3]>();
        // at most three distinct edges per face
        faces * (2 * triple + normal) + 3 * faces * normal + vertices * normal
    }

    /// Heap bytes held by the table.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of_val(self.faces.as_slice())
            + std::mem::size_of_val(self.face_normals.as_slice())
            + std::mem::size_of_val(self.face_edges.as_slice())
            + std::mem::size_of_val(self.edge_normals.as_slice())
            + std::mem::size_of_val(self.vertex_normals.as_slice())
    }
}

/// Rebuild connectivity for a triangle soup by merging bit-identical corners.
///
/// `-0.0` and `0.0` are treated as the same coordinate. Face `i` of the
/// result is triangle `i`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn weld(triangles: &[Triangle]) -> IndexedMesh {
    let mut ids: HashMap<[u64; 3], u32> = HashMap::with_capacity(triangles.len());
    let mut mesh = IndexedMesh::with_capacity(triangles.len() / 2 + 3, triangles.len());

    for tri in triangles {
        let mut face = [0u32; 3];
        for (slot, p) in face.iter_mut().zip(tri.vertices()) {
            let key = [(p.x + 0.0).to_bits(), (p.y + 0.0).to_bits(), (p.z + 0.0).to_bits()];
            *slot = *ids.entry(key).or_insert_with(|| {
                mesh.vertices.push(Vertex::new(p));
                (mesh.vertices.len() - 1) as u32
            });
        }
        mesh.faces.push(face);
    }

    debug!(
        triangles = triangles.len(),
        vertices = mesh.vertices.len(),
        "Welded triangle soup"
    );
    mesh
}
