//! Configuration and presets for distance engines.
//!
//! # Presets
//!
//! - [`SdfConfig::default()`] - signed distances, sequential, host memory
//! - [`SdfConfig::unsigned()`] - skip the pseudo-normal table, for open surfaces
//! - [`SdfConfig::threaded()`] - batch queries and build on the rayon pool
//!
//! # Example
//!
//! ```
//! use mesh_sdf::{AllocatorId, ExecutionPolicy, SdfConfig};
//!
//! let config = SdfConfig::threaded()
//!     .with_threads(4)
//!     .with_max_leaf_size(8)
//!     .with_allocator(AllocatorId::PINNED);
//!
//! assert_eq!(config.policy, ExecutionPolicy::Threaded);
//! assert_eq!(config.threads, Some(4));
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::alloc::AllocatorId;
use crate::exec::ExecutionPolicy;

/// Configuration for [`SignedDistanceField`](crate::SignedDistanceField).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SdfConfig {
    /// Maximum number of triangles per BVH leaf (at least 1).
    /// Smaller leaves mean deeper trees and fewer exact triangle tests.
    pub max_leaf_size: usize,

    /// Whether the surface is closed and outward-oriented.
    /// When `false`, no sign is computed and distances are unsigned.
    pub watertight: bool,

    /// Whether signs are wanted at all. A watertight surface with this off
    /// still skips the pseudo-normal table; see [`SdfConfig::signs_enabled`].
    pub compute_signs: bool,

    /// How batch queries are executed.
    pub policy: ExecutionPolicy,

    /// Allocator the engine's arrays are reserved from.
    pub allocator: AllocatorId,

    /// Queries whose offset along the pseudo-normal is within this
    /// magnitude are classified as on the boundary.
    pub boundary_tolerance: f64,

    /// Size of a dedicated worker pool for threaded execution.
    /// `None` uses the global rayon pool.
    pub threads: Option<usize>,

    /// Subtrees with at least this many triangles are built in parallel
    /// under threaded execution.
    pub parallel_build_threshold: usize,
}

impl Default for SdfConfig {
    fn default() -> Self {
        Self {
            max_leaf_size: 4,
            watertight: true,
            compute_signs: true,
            policy: ExecutionPolicy::Sequential,
            allocator: AllocatorId::HOST,
            boundary_tolerance: 1e-9,
            threads: None,
            parallel_build_threshold: 1024,
        }
    }
}

impl SdfConfig {
    /// Unsigned distances only.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_sdf::SdfConfig;
    ///
    /// assert!(!SdfConfig::unsigned().watertight);
    /// ```
    #[must_use]
    pub fn unsigned() -> Self {
        Self {
            watertight: false,
            ..Self::default()
        }
    }

    /// Threaded execution on the global rayon pool.
    #[must_use]
    pub fn threaded() -> Self {
        Self {
            policy: ExecutionPolicy::Threaded,
            ..Self::default()
        }
    }

    /// Set the maximum leaf size (clamped to at least 1).
    #[must_use]
    pub fn with_max_leaf_size(mut self, size: usize) -> Self {
        self.max_leaf_size = size.max(1);
        self
    }

    /// Set whether signs are computed.
    #[must_use]
    pub const fn with_watertight(mut self, watertight: bool) -> Self {
        self.watertight = watertight;
        self
    }

    /// Set whether signs are requested.
    #[must_use]
    pub const fn with_compute_signs(mut self, compute_signs: bool) -> Self {
        self.compute_signs = compute_signs;
        self
    }

    /// Check whether engines built from this configuration report signs:
    /// the surface must be watertight and signs must be requested.
    #[must_use]
    pub const fn signs_enabled(&self) -> bool {
        self.watertight && self.compute_signs
    }

    /// Set the execution policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the allocator.
    #[must_use]
    pub const fn with_allocator(mut self, allocator: AllocatorId) -> Self {
        self.allocator = allocator;
        self
    }

    /// Set the boundary tolerance (absolute value is used).
    #[must_use]
    pub fn with_boundary_tolerance(mut self, tolerance: f64) -> Self {
        self.boundary_tolerance = tolerance.abs();
        self
    }

    /// Use a dedicated pool of `threads` workers (clamped to at least 1).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    /// Set the subtree size above which the build forks.
    #[must_use]
    pub fn with_parallel_build_threshold(mut self, threshold: usize) -> Self {
        self.parallel_build_threshold = threshold.max(1);
        self
    }
}
