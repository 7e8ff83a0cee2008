//! Signed distance queries against triangle meshes.
//!
//! A [`SignedDistanceField`] indexes a mesh once (a BVH over its triangles
//! plus an angle-weighted pseudo-normal table) and then answers distance
//! queries in logarithmic time. The sign is negative inside a closed,
//! outward-oriented surface and positive outside.
//!
//! # Layer 0
//!
//! This is a Layer 0 crate with zero Bevy dependencies.
//!
//! # Execution
//!
//! Batch queries run under an [`ExecutionPolicy`]:
//!
//! - **Sequential** on the calling thread
//! - **Threaded** on a rayon pool, bit-identical to sequential
//! - **Accelerated** on a GPU via WGPU (the `gpu` feature), matching the CPU
//!   policies within floating-point tolerance
//!
//! Engine arrays are reserved from an allocator in an [`AllocatorRegistry`],
//! which lets callers cap memory with bounded pools.
//!
//! # Example
//!
//! ```
//! use mesh_sdf::{SdfConfig, SignedDistanceField, signed_distance};
//! use mesh_types::{unit_cube, Point3};
//!
//! let cube = unit_cube();
//!
//! // For multiple queries, build an engine once
//! let sdf = SignedDistanceField::new(&cube, SdfConfig::default()).unwrap();
//! assert!(sdf.distance(Point3::new(0.5, 0.5, 0.5)) < 0.0);
//! assert!(sdf.distance(Point3::new(2.0, 0.5, 0.5)) > 0.0);
//!
//! // For one-off queries, use the standalone function
//! let d = signed_distance(Point3::new(0.5, 0.5, 2.0), &cube);
//! assert!((d - 1.0).abs() < 1e-12);
//! ```
//!
//! # Features
//!
//! - `gpu`: accelerated execution through WGPU compute shaders
//! - `serde`: serialization of configuration and result types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions)]

mod alloc;
mod bvh;
mod config;
mod error;
mod exec;
#[cfg(feature = "gpu")]
mod gpu;
mod pseudo_normal;
mod query;
mod sdf;

pub use alloc::{AllocatorId, AllocatorRegistry, MemorySpace, Reservation};
pub use bvh::{Bvh, BvhNode, BvhStats, NearestHit};
pub use config::SdfConfig;
pub use error::{SdfError, SdfResult};
pub use exec::ExecutionPolicy;
pub use pseudo_normal::{PseudoNormalTable, Sign};
pub use query::{
    ClosestPoint, TriangleFeature, closest_point_on_triangle, point_segment_distance_squared,
    point_triangle_distance_squared,
};
pub use sdf::{DistanceResult, SignedDistanceField, signed_distance, unsigned_distance};
