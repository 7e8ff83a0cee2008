//! The signed distance engine.
//!
//! [`SignedDistanceField`] owns a copy of the mesh's triangles, a BVH over
//! them and (for watertight meshes) a pseudo-normal table. Every array is
//! reserved from an allocator of the engine's registry for its lifetime:
//! host-resident arrays from the configured allocator when the host can read
//! it (the host heap otherwise), device buffers from the configured one.

use std::time::Instant;

use mesh_types::{Aabb, IndexedMesh, MeshTopology, Point3, Triangle};
use tracing::{info, warn};

use crate::alloc::{AllocatorId, AllocatorRegistry, Reservation};
use crate::bvh::{Bvh, NearestHit};
use crate::config::SdfConfig;
use crate::error::{SdfError, SdfResult};
use crate::exec::{ExecutionPolicy, Executor};
use crate::pseudo_normal::{PseudoNormalTable, Sign, weld};
use crate::query::closest_point_on_triangle;

#[cfg(feature = "gpu")]
use crate::gpu::{self, Accelerator, GpuScene};

/// Outcome of one distance query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceResult {
    /// Unsigned distance to the surface.
    ///
    /// `+inf` for an engine without triangles, NaN for a query with
    /// non-finite coordinates.
    pub distance: f64,
    /// Side of the surface; `None` when signs are disabled or the query is
    /// not finite.
    pub sign: Option<Sign>,
    /// Nearest triangle (index into the engine's triangle array).
    pub primitive: Option<u32>,
    /// Closest point on the surface.
    pub closest_point: Option<Point3<f64>>,
}

impl DistanceResult {
    /// Distance with the sign applied: negative inside, positive otherwise.
    #[must_use]
    pub fn signed_distance(&self) -> f64 {
        self.sign.map_or(self.distance, |s| s.apply(self.distance))
    }

    fn no_surface(signed: bool) -> Self {
        Self {
            distance: f64::INFINITY,
            sign: signed.then_some(Sign::Outside),
            primitive: None,
            closest_point: None,
        }
    }

    const fn not_finite() -> Self {
        Self {
            distance: f64::NAN,
            sign: None,
            primitive: None,
            closest_point: None,
        }
    }
}

/// Everything derived from one mesh; swapped as a unit on rebuild.
#[derive(Debug)]
struct Index {
    triangles: Vec<Triangle>,
    bvh: Bvh,
    normals: Option<PseudoNormalTable>,
    #[cfg(feature = "gpu")]
    scene: Option<GpuScene>,
    reservations: Vec<Reservation>,
}

/// BVH-accelerated signed distance to a triangle mesh.
///
/// Queries take `&self` and can run concurrently; [`rebuild`] takes
/// `&mut self`, so it can never overlap a query.
///
/// Signs are only meaningful for closed, consistently outward-oriented
/// meshes; set [`SdfConfig::watertight`] to `false` for anything else, or
/// [`SdfConfig::compute_signs`] to `false` when only magnitudes are needed.
///
/// [`rebuild`]: SignedDistanceField::rebuild
///
/// # Example
///
/// ```
/// use mesh_sdf::{SdfConfig, SignedDistanceField};
/// use mesh_types::{unit_cube, Point3};
///
/// let sdf = SignedDistanceField::new(&unit_cube(), SdfConfig::default()).unwrap();
///
/// assert!((sdf.distance(Point3::new(0.5, 0.5, 0.5)) + 0.5).abs() < 1e-12);
/// assert!((sdf.distance(Point3::new(0.5, 0.5, 3.0)) - 2.0).abs() < 1e-12);
/// assert!(sdf.is_inside(Point3::new(0.2, 0.7, 0.4)));
/// ```
#[derive(Debug)]
pub struct SignedDistanceField {
    config: SdfConfig,
    registry: AllocatorRegistry,
    executor: Executor,
    index: Index,
    #[cfg(feature = "gpu")]
    accelerator: Option<Accelerator>,
}

impl SignedDistanceField {
    /// Build an engine with a fresh [`AllocatorRegistry`].
    ///
    /// An empty mesh is accepted; every query then reports an infinite
    /// distance.
    ///
    /// # Errors
    ///
    /// See [`SignedDistanceField::with_registry`].
    pub fn new(mesh: &IndexedMesh, config: SdfConfig) -> SdfResult<Self> {
        Self::with_registry(mesh, config, &AllocatorRegistry::new())
    }

    /// Build an engine whose arrays are reserved from `registry`.
    ///
    /// The engine keeps a shared handle to the registry, so its reservations
    /// show up in the caller's usage figures until it is dropped.
    ///
    /// # Errors
    ///
    /// - [`SdfError::UnknownAllocator`] if `config.allocator` is not registered
    /// - [`SdfError::IncompatibleAllocator`] if its memory space cannot serve
    ///   `config.policy`
    /// - [`SdfError::AcceleratorUnavailable`] for accelerated execution without
    ///   the `gpu` feature or a usable adapter
    /// - [`SdfError::InvalidFaceIndex`] if a face references a missing vertex
    /// - [`SdfError::PoolExhausted`] if the allocator cannot hold the arrays
    /// - [`SdfError::ThreadPool`] if a dedicated worker pool cannot be started
    pub fn with_registry(
        mesh: &IndexedMesh,
        config: SdfConfig,
        registry: &AllocatorRegistry,
    ) -> SdfResult<Self> {
        let start = Instant::now();
        let space = registry.space(config.allocator)?;
        if !space.supports(config.policy) {
            return Err(SdfError::IncompatibleAllocator {
                policy: config.policy,
                space,
            });
        }

        #[cfg(not(feature = "gpu"))]
        if config.policy == ExecutionPolicy::Accelerated {
            return Err(SdfError::AcceleratorUnavailable(
                "mesh-sdf was built without the `gpu` feature".to_string(),
            ));
        }

        #[cfg(feature = "gpu")]
        let accelerator = if config.policy == ExecutionPolicy::Accelerated {
            Some(Accelerator::new()?)
        } else {
            None
        };

        let executor = Executor::new(config.policy, config.threads)?;

        let mut sdf = Self {
            config,
            registry: registry.clone(),
            executor,
            index: Index {
                triangles: Vec::new(),
                bvh: Bvh::default(),
                normals: None,
                #[cfg(feature = "gpu")]
                scene: None,
                reservations: Vec::new(),
            },
            #[cfg(feature = "gpu")]
            accelerator,
        };
        sdf.index = sdf.build_index(mesh)?;

        let stats = sdf.index.bvh.stats();
        info!(
            triangles = sdf.index.triangles.len(),
            nodes = sdf.index.bvh.nodes().len(),
            depth = stats.max_depth,
            policy = %sdf.config.policy,
            allocator = registry.name(sdf.config.allocator).unwrap_or("?"),
            signed = sdf.config.signs_enabled(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Built signed distance field"
        );
        Ok(sdf)
    }

    /// Build an engine from a triangle soup.
    ///
    /// Corners with bit-identical coordinates are merged to recover the
    /// connectivity the pseudo-normals need. Triangle `i` keeps id `i`.
    ///
    /// # Errors
    ///
    /// See [`SignedDistanceField::with_registry`].
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_sdf::{SdfConfig, SignedDistanceField};
    /// use mesh_types::{unit_cube, Point3, Triangle};
    ///
    /// let soup: Vec<Triangle> = unit_cube().triangles().collect();
    /// let sdf = SignedDistanceField::from_triangles(&soup, SdfConfig::default()).unwrap();
    /// assert!(sdf.distance(Point3::new(0.5, 0.5, 0.25)) < 0.0);
    /// ```
    pub fn from_triangles(triangles: &[Triangle], config: SdfConfig) -> SdfResult<Self> {
        Self::new(&weld(triangles), config)
    }

    /// Replace the indexed surface, keeping configuration, registry and
    /// worker pool.
    ///
    /// On error the engine keeps its previous surface. While the new arrays
    /// are reserved the old ones are still held, so a bounded pool needs room
    /// for both.
    ///
    /// # Errors
    ///
    /// [`SdfError::InvalidFaceIndex`], [`SdfError::PoolExhausted`], or a GPU
    /// error when re-uploading the accelerated index.
    pub fn rebuild(&mut self, mesh: &IndexedMesh) -> SdfResult<()> {
        let start = Instant::now();
        self.index = self.build_index(mesh)?;
        info!(
            triangles = self.index.triangles.len(),
            nodes = self.index.bvh.nodes().len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Rebuilt signed distance field"
        );
        Ok(())
    }

    fn build_index(&self, mesh: &IndexedMesh) -> SdfResult<Index> {
        if let Some((face, index)) = mesh.first_invalid_face() {
            return Err(SdfError::InvalidFaceIndex {
                face,
                index,
                vertex_count: mesh.vertex_count(),
            });
        }

        // Worst-case sizes are held before anything is built, then trimmed.
        let faces = mesh.face_count();
        let host = self.host_allocator();
        let mut triangles_held = self
            .registry
            .reserve(host, faces * std::mem::size_of::<Triangle>())?;
        let mut bvh_held = self.registry.reserve(host, Bvh::max_memory_bytes(faces))?;
        let mut normals_held = self.registry.reserve(
            host,
            if self.config.signs_enabled() {
                PseudoNormalTable::max_memory_bytes(mesh.vertex_count(), faces)
            } else {
                0
            },
        )?;
        #[cfg(feature = "gpu")]
        let mut scene_held = self.registry.reserve(
            self.config.allocator,
            if self.accelerator.is_some() {
                gpu::max_scene_bytes(faces)
            } else {
                0
            },
        )?;

        let triangles: Vec<Triangle> = mesh.triangles().collect();
        let bvh = if self.executor.is_parallel() {
            self.executor.install(|| {
                Bvh::build_parallel(
                    &triangles,
                    self.config.max_leaf_size,
                    self.config.parallel_build_threshold,
                )
            })
        } else {
            Bvh::build(&triangles, self.config.max_leaf_size)
        };

        let normals = self.config.signs_enabled().then(|| PseudoNormalTable::build(mesh));
        if let Some(table) = &normals {
            if !table.is_closed() {
                warn!(
                    boundary_edges = table.boundary_edge_count(),
                    non_manifold_edges = table.non_manifold_edge_count(),
                    "Mesh is not closed; signs near open or non-manifold edges are unreliable"
                );
            }
        }

        #[cfg(feature = "gpu")]
        let scene = match &self.accelerator {
            Some(accelerator) => Some(accelerator.prepare(&bvh, &triangles)?),
            None => None,
        };

        triangles_held.shrink_to(std::mem::size_of_val(triangles.as_slice()));
        bvh_held.shrink_to(bvh.memory_bytes());
        normals_held.shrink_to(normals.as_ref().map_or(0, PseudoNormalTable::memory_bytes));
        let mut reservations = vec![triangles_held, bvh_held, normals_held];
        #[cfg(feature = "gpu")]
        {
            scene_held.shrink_to(scene.as_ref().map_or(0, GpuScene::memory_bytes));
            reservations.push(scene_held);
        }
        reservations.retain(|r| r.bytes() > 0);

        Ok(Index {
            triangles,
            bvh,
            normals,
            #[cfg(feature = "gpu")]
            scene,
            reservations,
        })
    }

    /// Allocator for the arrays host code reads: the configured one when the
    /// host can address it, the registry's host heap otherwise. Device
    /// buffers always come from the configured allocator.
    fn host_allocator(&self) -> AllocatorId {
        match self.registry.space(self.config.allocator) {
            Ok(space) if space.host_visible() => self.config.allocator,
            _ => AllocatorId::HOST,
        }
    }

    /// Full query: distance, sign, nearest triangle and closest point.
    ///
    /// Single queries always run on the calling thread.
    #[must_use]
    pub fn query(&self, point: Point3<f64>) -> DistanceResult {
        self.query_seeded(point, None)
    }

    /// [`Self::query`] with the search bounded by a candidate triangle from
    /// the start. The result does not depend on the candidate.
    fn query_seeded(&self, point: Point3<f64>, seed: Option<u32>) -> DistanceResult {
        if !point.coords.iter().all(|c| c.is_finite()) {
            return DistanceResult::not_finite();
        }
        if self.index.triangles.is_empty() {
            return DistanceResult::no_surface(self.config.signs_enabled());
        }
        self.index
            .bvh
            .nearest_seeded(&self.index.triangles, &point, seed)
            .map_or_else(DistanceResult::not_finite, |hit| self.resolve(&point, &hit))
    }

    /// Turn a nearest hit into a result, adding the sign when enabled.
    fn resolve(&self, point: &Point3<f64>, hit: &NearestHit) -> DistanceResult {
        DistanceResult {
            distance: hit.distance(),
            sign: self
                .index
                .normals
                .as_ref()
                .map(|table| table.classify(point, hit, self.config.boundary_tolerance)),
            primitive: Some(hit.primitive),
            closest_point: Some(hit.point),
        }
    }

    /// Distance to the surface, signed when signs are enabled.
    ///
    /// Negative inside, positive outside, zero (or near it) on the surface.
    #[must_use]
    pub fn distance(&self, point: Point3<f64>) -> f64 {
        self.query(point).signed_distance()
    }

    /// Unsigned distance to the surface.
    #[must_use]
    pub fn unsigned_distance(&self, point: Point3<f64>) -> f64 {
        self.query(point).distance
    }

    /// Closest point on the surface, `None` when there is no surface or the
    /// query is not finite.
    #[must_use]
    pub fn closest_point(&self, point: Point3<f64>) -> Option<Point3<f64>> {
        self.query(point).closest_point
    }

    /// Check whether `point` is strictly inside.
    ///
    /// Always `false` when signs are disabled.
    #[must_use]
    pub fn is_inside(&self, point: Point3<f64>) -> bool {
        self.query(point).sign == Some(Sign::Inside)
    }

    /// Full results for a batch, using the configured execution policy.
    ///
    /// `result[i]` belongs to `points[i]`.
    #[must_use]
    pub fn query_batch(&self, points: &[Point3<f64>]) -> Vec<DistanceResult> {
        #[cfg(feature = "gpu")]
        if let (Some(accelerator), Some(scene)) = (&self.accelerator, &self.index.scene) {
            match accelerator.nearest(scene, points) {
                Ok(primitives) => {
                    info!(queries = points.len(), "Accelerated distance batch");
                    // f32 candidates only bound the exact host search
                    return self.executor.map_indexed(points.len(), |i| {
                        self.query_seeded(points[i], primitives[i])
                    });
                }
                Err(e) => warn!("Accelerated batch failed, using host traversal: {}", e),
            }
        }
        self.executor.map(points, |p| self.query(*p))
    }

    /// Signed (or unsigned) distances for a batch; `result[i]` belongs to
    /// `points[i]`.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_sdf::{SdfConfig, SignedDistanceField};
    /// use mesh_types::{unit_cube, Point3};
    ///
    /// let sdf = SignedDistanceField::new(&unit_cube(), SdfConfig::threaded()).unwrap();
    /// let d = sdf.distances(&[Point3::new(0.5, 0.5, 2.0), Point3::new(0.5, 0.5, 0.5)]);
    /// assert!((d[0] - 1.0).abs() < 1e-12);
    /// assert!((d[1] + 0.5).abs() < 1e-12);
    /// ```
    #[must_use]
    pub fn distances(&self, points: &[Point3<f64>]) -> Vec<f64> {
        #[cfg(feature = "gpu")]
        if self.accelerator.is_some() {
            return self
                .query_batch(points)
                .iter()
                .map(DistanceResult::signed_distance)
                .collect();
        }
        self.executor.map(points, |p| self.distance(*p))
    }

    /// The spatial index.
    #[must_use]
    pub const fn bvh(&self) -> &Bvh {
        &self.index.bvh
    }

    /// Pseudo-normal table, `None` when signs are disabled.
    #[must_use]
    pub const fn pseudo_normals(&self) -> Option<&PseudoNormalTable> {
        self.index.normals.as_ref()
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &SdfConfig {
        &self.config
    }

    /// Execution policy for batch queries.
    #[must_use]
    pub const fn policy(&self) -> ExecutionPolicy {
        self.config.policy
    }

    /// Indexed triangles; primitive ids index this slice.
    #[must_use]
    pub fn triangles(&self) -> &[Triangle] {
        &self.index.triangles
    }

    /// Number of indexed triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.index.triangles.len()
    }

    /// Bounding box of the surface (empty when there are no triangles).
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        self.index.bvh.bounds()
    }

    /// Name of the GPU adapter serving accelerated batches.
    #[cfg(feature = "gpu")]
    #[must_use]
    pub fn accelerator_name(&self) -> Option<&str> {
        self.accelerator.as_ref().map(Accelerator::adapter_name)
    }

    /// Bytes currently reserved for this engine's arrays, across allocators.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.index.reservations.iter().map(Reservation::bytes).sum()
    }
}

/// Nearest triangle by exhaustive search; ties go to the lowest id.
fn nearest_brute_force(triangles: &[Triangle], point: &Point3<f64>) -> Option<NearestHit> {
    let mut best: Option<NearestHit> = None;
    for (id, tri) in (0u32..).zip(triangles) {
        let hit = closest_point_on_triangle(point, tri);
        if best.is_none_or(|b| {
            hit.distance_squared < b.distance_squared || b.distance_squared.is_nan()
        }) {
            best = Some(NearestHit {
                primitive: id,
                point: hit.point,
                distance_squared: hit.distance_squared,
                feature: hit.feature,
            });
        }
    }
    best.filter(|b| !b.distance_squared.is_nan())
}

/// Signed distance from `point` to `mesh` without building an index.
///
/// O(n) per call. The sign comes from pseudo-normals, so it is correct for
/// closed, outward-oriented meshes. For repeated queries build a
/// [`SignedDistanceField`] once instead.
///
/// Returns `+inf` for a mesh without faces and NaN for a non-finite query.
/// Faces with out-of-range indices are ignored.
///
/// # Example
///
/// ```
/// use mesh_sdf::signed_distance;
/// use mesh_types::{unit_cube, Point3};
///
/// let d = signed_distance(Point3::new(0.5, 0.5, 0.9), &unit_cube());
/// assert!((d + 0.1).abs() < 1e-12);
/// ```
#[must_use]
pub fn signed_distance(point: Point3<f64>, mesh: &IndexedMesh) -> f64 {
    if !point.coords.iter().all(|c| c.is_finite()) {
        return f64::NAN;
    }
    let triangles: Vec<Triangle> = mesh.triangles().collect();
    let Some(hit) = nearest_brute_force(&triangles, &point) else {
        return if triangles.is_empty() { f64::INFINITY } else { f64::NAN };
    };
    let table = PseudoNormalTable::build(&weld(&triangles));
    table.classify(&point, &hit, 0.0).apply(hit.distance())
}

/// Unsigned distance from `point` to `mesh` without building an index.
///
/// O(n) per call. Returns `+inf` for a mesh without faces and NaN for a
/// non-finite query.
#[must_use]
pub fn unsigned_distance(point: Point3<f64>, mesh: &IndexedMesh) -> f64 {
    if !point.coords.iter().all(|c| c.is_finite()) {
        return f64::NAN;
    }
    mesh.triangles()
        .map(|tri| closest_point_on_triangle(&point, &tri).distance_squared)
        .fold(f64::INFINITY, f64::min)
        .sqrt()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesh_types::{Vertex, unit_cube};

    fn single_triangle() -> IndexedMesh {
        IndexedMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(10.0, 0.0, 0.0),
                Vertex::from_coords(5.0, 10.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    fn unit_tetrahedron() -> IndexedMesh {
        IndexedMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
                Vertex::from_coords(0.0, 1.0, 0.0),
                Vertex::from_coords(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    #[test]
    fn empty_mesh_gives_infinite_distance() {
        let sdf = SignedDistanceField::new(&IndexedMesh::new(), SdfConfig::default()).unwrap();
        let r = sdf.query(Point3::new(1.0, 2.0, 3.0));
        assert_eq!(r.distance, f64::INFINITY);
        assert_eq!(r.sign, Some(Sign::Outside));
        assert!(r.primitive.is_none());
        assert_eq!(sdf.reserved_bytes(), 0);
        assert!(sdf.bounds().is_empty());
    }

    #[test]
    fn open_triangle_unsigned() {
        let sdf = SignedDistanceField::new(&single_triangle(), SdfConfig::unsigned()).unwrap();
        assert!(sdf.pseudo_normals().is_none());
        let r = sdf.query(Point3::new(5.0, 5.0, -3.0));
        assert_relative_eq!(r.distance, 3.0, epsilon = 1e-12);
        assert_eq!(r.sign, None);
        assert_relative_eq!(sdf.distance(Point3::new(5.0, 5.0, -3.0)), 3.0, epsilon = 1e-12);
        assert!(!sdf.is_inside(Point3::new(5.0, 5.0, -3.0)));
    }

    #[test]
    fn tetrahedron_signs() {
        let sdf = SignedDistanceField::new(&unit_tetrahedron(), SdfConfig::default()).unwrap();
        assert!(sdf.pseudo_normals().unwrap().is_closed());
        assert!(sdf.distance(Point3::new(0.1, 0.1, 0.1)) < 0.0);
        assert!(sdf.distance(Point3::new(1.0, 1.0, 1.0)) > 0.0);
        assert!(sdf.distance(Point3::new(-0.5, -0.5, -0.5)) > 0.0);
        assert_relative_eq!(
            sdf.distance(Point3::new(0.1, 0.1, 0.1)),
            -0.1,
            epsilon = 1e-12
        );
    }

    #[test]
    fn closest_point_on_cube() {
        let sdf = SignedDistanceField::new(&unit_cube(), SdfConfig::default()).unwrap();
        let p = sdf.closest_point(Point3::new(0.5, 0.5, 5.0)).unwrap();
        assert_relative_eq!(p, Point3::new(0.5, 0.5, 1.0), epsilon = 1e-12);
        assert!(sdf.closest_point(Point3::new(f64::NAN, 0.0, 0.0)).is_none());
    }

    #[test]
    fn non_finite_query_is_nan() {
        let sdf = SignedDistanceField::new(&unit_cube(), SdfConfig::default()).unwrap();
        let r = sdf.query(Point3::new(0.0, f64::NEG_INFINITY, 0.0));
        assert!(r.distance.is_nan());
        assert!(r.primitive.is_none());
        assert!(sdf.distance(Point3::new(f64::NAN, 0.0, 0.0)).is_nan());
    }

    #[test]
    fn invalid_face_rejected() {
        let mut mesh = single_triangle();
        mesh.faces.push([0, 1, 9]);
        let err = SignedDistanceField::new(&mesh, SdfConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SdfError::InvalidFaceIndex { face: 1, index: 9, vertex_count: 3 }
        ));
    }

    #[test]
    fn device_allocator_rejected_for_cpu() {
        let err = SignedDistanceField::new(
            &unit_cube(),
            SdfConfig::default().with_allocator(AllocatorId::DEVICE),
        )
        .unwrap_err();
        assert!(matches!(err, SdfError::IncompatibleAllocator { .. }));
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn accelerated_without_feature_fails() {
        let err = SignedDistanceField::new(
            &unit_cube(),
            SdfConfig::default()
                .with_policy(ExecutionPolicy::Accelerated)
                .with_allocator(AllocatorId::PINNED),
        )
        .unwrap_err();
        assert!(matches!(err, SdfError::AcceleratorUnavailable(_)));
    }

    #[test]
    fn brute_force_functions() {
        let cube = unit_cube();
        assert_relative_eq!(
            signed_distance(Point3::new(0.5, 0.5, 0.5), &cube),
            -0.5,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            signed_distance(Point3::new(2.0, 0.5, 0.5), &cube),
            1.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            unsigned_distance(Point3::new(0.5, 0.5, 0.5), &cube),
            0.5,
            epsilon = 1e-12
        );
        assert_eq!(signed_distance(Point3::origin(), &IndexedMesh::new()), f64::INFINITY);
        assert_eq!(unsigned_distance(Point3::origin(), &IndexedMesh::new()), f64::INFINITY);
        assert!(unsigned_distance(Point3::new(f64::NAN, 0.0, 0.0), &cube).is_nan());
    }

    #[test]
    fn engine_matches_brute_force_on_cube_corners() {
        let cube = unit_cube();
        let sdf = SignedDistanceField::new(&cube, SdfConfig::default()).unwrap();
        let queries = [
            Point3::new(1.3, 1.2, 1.1),
            Point3::new(-0.2, 0.5, 1.4),
            Point3::new(0.9, 0.95, 0.99),
            Point3::new(0.5, -1.0, 0.5),
        ];
        for q in queries {
            assert_relative_eq!(sdf.distance(q), signed_distance(q, &cube), epsilon = 1e-12);
        }
    }

    #[test]
    fn reservations_follow_rebuild() {
        let registry = AllocatorRegistry::new();
        let mut sdf =
            SignedDistanceField::with_registry(&unit_cube(), SdfConfig::default(), &registry)
                .unwrap();
        let cube_bytes = registry.used_bytes(AllocatorId::HOST).unwrap();
        assert_eq!(cube_bytes, sdf.reserved_bytes());
        assert!(cube_bytes > 0);

        sdf.rebuild(&unit_tetrahedron()).unwrap();
        assert_eq!(sdf.triangle_count(), 4);
        assert_eq!(registry.used_bytes(AllocatorId::HOST).unwrap(), sdf.reserved_bytes());

        drop(sdf);
        assert_eq!(registry.used_bytes(AllocatorId::HOST).unwrap(), 0);
    }

    #[test]
    fn failed_rebuild_keeps_surface() {
        let mut sdf = SignedDistanceField::new(&unit_cube(), SdfConfig::default()).unwrap();
        let mut bad = unit_tetrahedron();
        bad.faces.push([0, 1, 40]);
        assert!(sdf.rebuild(&bad).is_err());
        assert_eq!(sdf.triangle_count(), 12);
        assert_relative_eq!(sdf.distance(Point3::new(0.5, 0.5, 2.0)), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SignedDistanceField>();
    }

    #[test]
    fn candidate_seed_never_changes_the_answer() {
        let sdf = SignedDistanceField::new(&unit_tetrahedron(), SdfConfig::default()).unwrap();
        let points = [
            Point3::new(0.1, 0.1, 0.1),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.5, -0.5, 0.25),
        ];
        for p in points {
            let expected = sdf.query(p);
            for seed in [Some(0), Some(1), Some(2), Some(3), Some(99), None] {
                assert_eq!(sdf.query_seeded(p, seed), expected, "{p:?} seeded with {seed:?}");
            }
        }
    }
}
