//! Benchmarks for mesh-sdf index construction and queries.
//!
//! Run with: cargo bench -p mesh-sdf
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p mesh-sdf -- --save-baseline main
//! 2. After changes: cargo bench -p mesh-sdf -- --baseline main

#![allow(
    missing_docs,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::unwrap_used
)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mesh_sdf::{Bvh, SdfConfig, SignedDistanceField, signed_distance};
use mesh_types::{IndexedMesh, MeshBounds, Point3, Triangle, uv_sphere};

// =============================================================================
// Test Data Generation
// =============================================================================

fn sphere(resolution: usize) -> IndexedMesh {
    uv_sphere(Point3::origin(), 0.5, resolution, resolution)
}

/// Uniform `n`^3 lattice over the mesh bounds padded by 2.0.
fn grid(mesh: &IndexedMesh, n: usize) -> Vec<Point3<f64>> {
    let bounds = mesh.bounds().expanded(2.0);
    let step = bounds.size() / (n - 1) as f64;
    let mut points = Vec::with_capacity(n * n * n);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                points.push(Point3::new(
                    step.x.mul_add(i as f64, bounds.min.x),
                    step.y.mul_add(j as f64, bounds.min.y),
                    step.z.mul_add(k as f64, bounds.min.z),
                ));
            }
        }
    }
    points
}

// =============================================================================
// Build Benchmarks
// =============================================================================

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("Build");

    for resolution in [25, 100, 300] {
        let mesh = sphere(resolution);
        let triangles: Vec<Triangle> = mesh.triangles().collect();
        group.throughput(Throughput::Elements(triangles.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("bvh_sequential", triangles.len()),
            &triangles,
            |b, tris| b.iter(|| Bvh::build(black_box(tris), 4)),
        );
        group.bench_with_input(
            BenchmarkId::new("bvh_parallel", triangles.len()),
            &triangles,
            |b, tris| b.iter(|| Bvh::build_parallel(black_box(tris), 4, 1024)),
        );
        group.bench_with_input(BenchmarkId::new("engine", triangles.len()), &mesh, |b, m| {
            b.iter(|| SignedDistanceField::new(black_box(m), SdfConfig::default()).unwrap());
        });
    }

    group.finish();
}

// =============================================================================
// Query Benchmarks
// =============================================================================

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("Queries");

    let mesh = sphere(100);
    let points = grid(&mesh, 32);
    group.throughput(Throughput::Elements(points.len() as u64));

    let sequential = SignedDistanceField::new(&mesh, SdfConfig::default()).unwrap();
    let threaded = SignedDistanceField::new(&mesh, SdfConfig::threaded()).unwrap();
    let unsigned = SignedDistanceField::new(&mesh, SdfConfig::unsigned()).unwrap();

    group.bench_function("sequential_32k", |b| {
        b.iter(|| sequential.distances(black_box(&points)));
    });
    group.bench_function("threaded_32k", |b| {
        b.iter(|| threaded.distances(black_box(&points)));
    });
    group.bench_function("unsigned_32k", |b| {
        b.iter(|| unsigned.distances(black_box(&points)));
    });

    group.finish();

    // Brute force reference on a small mesh
    let mut group = c.benchmark_group("BruteForce");
    group.sample_size(10);

    let small = sphere(25);
    let points = grid(&small, 8);
    group.throughput(Throughput::Elements(points.len() as u64));

    group.bench_function("signed_distance_512", |b| {
        b.iter(|| {
            points
                .iter()
                .map(|p| signed_distance(*p, black_box(&small)))
                .sum::<f64>()
        });
    });

    let sdf = SignedDistanceField::new(&small, SdfConfig::default()).unwrap();
    group.bench_function("engine_512", |b| {
        b.iter(|| sdf.distances(black_box(&points)));
    });

    group.finish();
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(benches, bench_build, bench_queries);
criterion_main!(benches);
