//! Error types for signed distance engines.
//!
//! Every failure is reported at construction (or rebuild) time. Queries never
//! fail: numerical trouble such as non-finite query points shows up in the
//! returned values instead.

use thiserror::Error;

use crate::alloc::{AllocatorId, MemorySpace};
use crate::exec::ExecutionPolicy;

/// Result type for SDF operations.
pub type SdfResult<T> = Result<T, SdfError>;

/// Errors that can occur while building a distance engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SdfError {
    /// The configured allocator id is not registered.
    #[error("unknown allocator id {id}")]
    UnknownAllocator {
        /// The id that was looked up.
        id: AllocatorId,
    },

    /// The allocator's memory space cannot serve the execution policy.
    #[error("allocator in {space} memory cannot serve {policy} execution")]
    IncompatibleAllocator {
        /// Requested execution policy.
        policy: ExecutionPolicy,
        /// Memory space of the configured allocator.
        space: MemorySpace,
    },

    /// Accelerated execution was requested but is not available.
    #[error("accelerator unavailable: {0}")]
    AcceleratorUnavailable(String),

    /// A bounded pool cannot hold the engine's arrays.
    #[error("allocator pool '{pool}' exhausted: requested {requested} bytes, {available} available")]
    PoolExhausted {
        /// Name of the pool that ran out.
        pool: String,
        /// Bytes requested.
        requested: usize,
        /// Bytes still available in the pool.
        available: usize,
    },

    /// A face references a vertex that does not exist.
    #[error("face {face} references vertex {index}, but the mesh has {vertex_count} vertices")]
    InvalidFaceIndex {
        /// Offending face.
        face: usize,
        /// Offending vertex index.
        index: u32,
        /// Number of vertices in the mesh.
        vertex_count: usize,
    },

    /// The dedicated worker pool could not be created.
    #[error("failed to build thread pool: {details}")]
    ThreadPool {
        /// Description from the thread pool builder.
        details: String,
    },

    /// GPU setup or dispatch failed.
    #[cfg(feature = "gpu")]
    #[error("GPU error: {details}")]
    Gpu {
        /// Description of the GPU error.
        details: String,
    },
}
