//! Closed reference surfaces for tests and benchmarks.

use std::f64::consts::PI;

use nalgebra::Point3;

use crate::{IndexedMesh, Vertex};

/// Unit cube from (0,0,0) to (1,1,1), 8 vertices and 12 outward-facing triangles.
///
/// # Example
///
/// ```
/// use mesh_types::{unit_cube, MeshTopology};
///
/// let cube = unit_cube();
/// assert_eq!(cube.vertex_count(), 8);
/// assert_eq!(cube.face_count(), 12);
/// ```
#[must_use]
pub fn unit_cube() -> IndexedMesh {
    let corners = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
        [0.0, 1.0, 1.0],
    ];
    let faces = vec![
        // z = 0
        [0, 2, 1],
        [0, 3, 2],
        // z = 1
        [4, 5, 6],
        [4, 6, 7],
        // y = 0
        [0, 1, 5],
        [0, 5, 4],
        // y = 1
        [3, 7, 6],
        [3, 6, 2],
        // x = 0
        [0, 4, 7],
        [0, 7, 3],
        // x = 1
        [1, 2, 6],
        [1, 6, 5],
    ];
    IndexedMesh::from_parts(corners.into_iter().map(Vertex::from).collect(), faces)
}

/// Latitude/longitude sphere with outward winding.
///
/// `theta_resolution` is the number of meridians, `phi_resolution` the number
/// of latitude stations from pole to pole including both poles (both clamped
/// to at least 3). Vertex 0 is the north pole (`+z`), vertex 1 the south pole;
/// ring vertices follow meridian by meridian.
///
/// The result is closed and 2-manifold with
/// `2 + theta * (phi - 2)` vertices and `2 * theta * (phi - 2)` triangles.
///
/// # Example
///
/// ```
/// use mesh_types::{uv_sphere, MeshTopology, Point3};
///
/// let sphere = uv_sphere(Point3::origin(), 0.5, 25, 25);
/// assert_eq!(sphere.vertex_count(), 577);
/// assert_eq!(sphere.face_count(), 1150);
/// assert!(sphere.signed_volume() > 0.0);
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn uv_sphere(
    center: Point3<f64>,
    radius: f64,
    theta_resolution: usize,
    phi_resolution: usize,
) -> IndexedMesh {
    let theta_res = theta_resolution.max(3);
    let phi_res = phi_resolution.max(3);
    // latitude rings between the poles
    let rings = phi_res - 2;
    let ring_vertices = rings * theta_res;

    let mut mesh = IndexedMesh::with_capacity(2 + ring_vertices, 2 * ring_vertices);
    mesh.vertices
        .push(Vertex::from_coords(center.x, center.y, center.z + radius));
    mesh.vertices
        .push(Vertex::from_coords(center.x, center.y, center.z - radius));

    let d_theta = 2.0 * PI / theta_res as f64;
    let d_phi = PI / (phi_res - 1) as f64;
    for i in 0..theta_res {
        let theta = i as f64 * d_theta;
        for j in 1..phi_res - 1 {
            let phi = j as f64 * d_phi;
            let r = radius * phi.sin();
            mesh.vertices.push(Vertex::from_coords(
                r.mul_add(theta.cos(), center.x),
                r.mul_add(theta.sin(), center.y),
                radius.mul_add(phi.cos(), center.z),
            ));
        }
    }

    // Index of ring vertex `j` on meridian `i`, wrapping around in theta.
    let ring = |i: usize, j: usize| ((rings * i) % ring_vertices + j + 2) as u32;

    for i in 0..theta_res {
        mesh.faces.push([ring(i, 0), ring(i + 1, 0), 0]);
        mesh.faces
            .push([ring(i, rings - 1), 1, ring(i + 1, rings - 1)]);
        for j in 0..rings - 1 {
            let (a, b) = (ring(i, j), ring(i, j + 1));
            let (c, d) = (ring(i + 1, j), ring(i + 1, j + 1));
            mesh.faces.push([a, b, d]);
            mesh.faces.push([a, d, c]);
        }
    }

    mesh
}
