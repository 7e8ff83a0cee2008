//! Execution policies.
//!
//! A policy is a plain value chosen at construction and matched once per
//! batch. The per-query kernel is an ordinary generic closure, so the hot
//! loop itself has no dynamic dispatch.

use std::fmt;
use std::sync::Arc;

use nalgebra::Point3;
use rayon::ThreadPool;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{SdfError, SdfResult};

/// How batch queries (and the index build) are executed.
///
/// CPU policies produce bit-identical results. The accelerated policy matches
/// them within floating-point tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionPolicy {
    /// One query after another on the calling thread.
    #[default]
    Sequential,
    /// Data-parallel over a rayon thread pool.
    Threaded,
    /// Traversal on a compute device (requires the `gpu` feature).
    Accelerated,
}

impl ExecutionPolicy {
    /// Check whether this policy runs on the host CPU.
    #[must_use]
    pub const fn is_cpu(self) -> bool {
        matches!(self, Self::Sequential | Self::Threaded)
    }
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequential => "sequential",
            Self::Threaded => "threaded",
            Self::Accelerated => "accelerated",
        })
    }
}

/// Host-side executor for the CPU part of every policy.
///
/// Accelerated engines still refine device results on the host, so they get
/// a sequential or threaded executor too.
#[derive(Clone, Default)]
pub(crate) enum Executor {
    #[default]
    Sequential,
    /// `None` uses the global rayon pool.
    Threaded(Option<Arc<ThreadPool>>),
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("Sequential"),
            Self::Threaded(None) => f.write_str("Threaded(global)"),
            Self::Threaded(Some(pool)) => write!(f, "Threaded({} threads)", pool.current_num_threads()),
        }
    }
}

impl Executor {
    /// Executor for `policy`, with a dedicated pool when `threads` is set.
    pub(crate) fn new(policy: ExecutionPolicy, threads: Option<usize>) -> SdfResult<Self> {
        if policy == ExecutionPolicy::Sequential {
            return Ok(Self::Sequential);
        }
        let Some(threads) = threads else {
            return Ok(Self::Threaded(None));
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("mesh-sdf-{i}"))
            .build()
            .map_err(|e| SdfError::ThreadPool {
                details: e.to_string(),
            })?;
        Ok(Self::Threaded(Some(Arc::new(pool))))
    }

    pub(crate) const fn is_parallel(&self) -> bool {
        matches!(self, Self::Threaded(_))
    }

    /// Run `op` inside this executor's pool.
    pub(crate) fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match self {
            Self::Threaded(Some(pool)) => pool.install(op),
            _ => op(),
        }
    }

    /// Evaluate `kernel` for every query; output slot `i` belongs to query `i`.
    pub(crate) fn map<T, F>(&self, queries: &[Point3<f64>], kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&Point3<f64>) -> T + Sync + Send,
    {
        match self {
            Self::Sequential => queries.iter().map(kernel).collect(),
            Self::Threaded(_) => self.install(|| queries.par_iter().map(kernel).collect()),
        }
    }

    /// Same as [`Executor::map`] but over indices, for kernels that need more
    /// than the query point.
    pub(crate) fn map_indexed<T, F>(&self, len: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self {
            Self::Sequential => (0..len).map(kernel).collect(),
            Self::Threaded(_) => self.install(|| (0..len).into_par_iter().map(kernel).collect()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use super::*;

    fn points(n: usize) -> Vec<Point3<f64>> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                Point3::new(t, t * 0.5, -t)
            })
            .collect()
    }

    #[test]
    fn sequential_and_threaded_agree() {
        let queries = points(1000);
        let kernel = |p: &Point3<f64>| p.coords.norm();

        let seq = Executor::new(ExecutionPolicy::Sequential, None).unwrap();
        let global = Executor::new(ExecutionPolicy::Threaded, None).unwrap();
        let pinned = Executor::new(ExecutionPolicy::Threaded, Some(3)).unwrap();

        let a = seq.map(&queries, kernel);
        assert_eq!(a, global.map(&queries, kernel));
        assert_eq!(a, pinned.map(&queries, kernel));
    }

    #[test]
    fn dedicated_pool_is_used() {
        let exec = Executor::new(ExecutionPolicy::Threaded, Some(2)).unwrap();
        assert!(exec.is_parallel());
        assert_eq!(exec.install(rayon::current_num_threads), 2);
    }

    #[test]
    fn map_indexed_preserves_order() {
        let exec = Executor::new(ExecutionPolicy::Threaded, None).unwrap();
        let out = exec.map_indexed(257, |i| i * 2);
        assert!(out.iter().enumerate().all(|(i, &v)| v == i * 2));
    }

    #[test]
    fn policy_display() {
        assert_eq!(ExecutionPolicy::Threaded.to_string(), "threaded");
        assert!(!ExecutionPolicy::Accelerated.is_cpu());
        assert_eq!(ExecutionPolicy::default(), ExecutionPolicy::Sequential);
    }
}
