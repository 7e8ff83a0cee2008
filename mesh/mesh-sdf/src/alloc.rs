//! Memory accounting for engine arrays.
//!
//! An [`AllocatorRegistry`] names the memory resources an engine may draw
//! from. Three base resources always exist ([`AllocatorId::HOST`],
//! [`AllocatorId::PINNED`], [`AllocatorId::DEVICE`]); callers can stack
//! bounded pools on top of them with [`AllocatorRegistry::register_pool`].
//!
//! Engines reserve the worst-case size of every array before building it,
//! shrink each [`Reservation`] to the real size once the array exists, and
//! hold it for as long as the array lives. A pool that is too small therefore
//! fails the build before any work is done, and its usage always reflects
//! the engines built from it.
//!
//! # Example
//!
//! ```
//! use mesh_sdf::{AllocatorId, AllocatorRegistry, MemorySpace};
//!
//! let mut registry = AllocatorRegistry::new();
//! let pool = registry
//!     .register_pool("scratch", AllocatorId::HOST, 1024)
//!     .unwrap();
//!
//! assert_eq!(registry.space(pool).unwrap(), MemorySpace::Host);
//!
//! let held = registry.reserve(pool, 1000).unwrap();
//! assert!(registry.reserve(pool, 100).is_err());
//! drop(held);
//! assert_eq!(registry.used_bytes(pool).unwrap(), 0);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SdfError, SdfResult};
use crate::exec::ExecutionPolicy;

/// Where an allocator's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemorySpace {
    /// Ordinary heap memory, visible to the host only.
    Host,
    /// Host memory that the device can read directly.
    Pinned,
    /// Device memory, not addressable by host code.
    Device,
}

impl MemorySpace {
    /// Check whether host code can read this memory.
    #[must_use]
    pub const fn host_visible(self) -> bool {
        matches!(self, Self::Host | Self::Pinned)
    }

    /// Check whether an accelerator can read this memory.
    #[must_use]
    pub const fn device_visible(self) -> bool {
        matches!(self, Self::Device | Self::Pinned)
    }

    /// Check whether this space can back an engine running `policy`.
    #[must_use]
    pub const fn supports(self, policy: ExecutionPolicy) -> bool {
        match policy {
            ExecutionPolicy::Sequential | ExecutionPolicy::Threaded => self.host_visible(),
            ExecutionPolicy::Accelerated => self.device_visible(),
        }
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Pinned => "pinned",
            Self::Device => "device",
        })
    }
}

/// Handle naming an entry of an [`AllocatorRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AllocatorId(u32);

impl AllocatorId {
    /// Unbounded host heap.
    pub const HOST: Self = Self(0);
    /// Unbounded pinned host memory.
    pub const PINNED: Self = Self(1);
    /// Unbounded device memory.
    pub const DEVICE: Self = Self(2);

    /// Raw registry index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Resource {
    name: String,
    space: MemorySpace,
    capacity: Option<usize>,
    used: AtomicUsize,
    parent: Option<Arc<Resource>>,
}

impl Resource {
    fn base(name: &str, space: MemorySpace) -> Self {
        Self {
            name: name.to_string(),
            space,
            capacity: None,
            used: AtomicUsize::new(0),
            parent: None,
        }
    }

    fn available(&self) -> usize {
        self.capacity.map_or(usize::MAX, |cap| {
            cap.saturating_sub(self.used.load(Ordering::Acquire))
        })
    }

    /// Take `bytes` from this resource alone.
    fn take(&self, bytes: usize) -> SdfResult<()> {
        let Some(capacity) = self.capacity else {
            self.used.fetch_add(bytes, Ordering::AcqRel);
            return Ok(());
        };
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= capacity)
            })
            .map(|_| ())
            .map_err(|used| SdfError::PoolExhausted {
                pool: self.name.clone(),
                requested: bytes,
                available: capacity.saturating_sub(used),
            })
    }

    fn give_back(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Bytes held from an allocator and its ancestors, returned on drop.
#[derive(Debug)]
pub struct Reservation {
    resource: Arc<Resource>,
    bytes: usize,
}

impl Reservation {
    /// Reserved size in bytes.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Name of the allocator the bytes came from.
    #[must_use]
    pub fn allocator_name(&self) -> &str {
        &self.resource.name
    }

    /// Return everything above `bytes` to the allocator and its ancestors.
    ///
    /// A reservation never grows; a larger `bytes` leaves it unchanged.
    pub fn shrink_to(&mut self, bytes: usize) {
        if bytes >= self.bytes {
            return;
        }
        let excess = self.bytes - bytes;
        let mut node = Some(&self.resource);
        while let Some(resource) = node {
            resource.give_back(excess);
            node = resource.parent.as_ref();
        }
        self.bytes = bytes;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut node = Some(&self.resource);
        while let Some(resource) = node {
            resource.give_back(self.bytes);
            node = resource.parent.as_ref();
        }
    }
}

/// Caller-owned table of memory resources.
///
/// Cloning a registry shares the entries that exist at that moment: usage
/// recorded through one clone is visible through every other. Pools
/// registered afterwards belong only to the registry they were added to.
#[derive(Debug, Clone)]
pub struct AllocatorRegistry {
    entries: Vec<Arc<Resource>>,
}

impl Default for AllocatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocatorRegistry {
    /// Registry with only the three base resources.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![
                Arc::new(Resource::base("host", MemorySpace::Host)),
                Arc::new(Resource::base("pinned", MemorySpace::Pinned)),
                Arc::new(Resource::base("device", MemorySpace::Device)),
            ],
        }
    }

    fn entry(&self, id: AllocatorId) -> SdfResult<&Arc<Resource>> {
        self.entries
            .get(id.0 as usize)
            .ok_or(SdfError::UnknownAllocator { id })
    }

    /// Add a bounded pool drawing from `parent`.
    ///
    /// The pool inherits the parent's memory space. Reservations count
    /// against the pool and every ancestor.
    ///
    /// # Errors
    ///
    /// Returns [`SdfError::UnknownAllocator`] if `parent` is not registered.
    pub fn register_pool(
        &mut self,
        name: impl Into<String>,
        parent: AllocatorId,
        capacity_bytes: usize,
    ) -> SdfResult<AllocatorId> {
        let parent = Arc::clone(self.entry(parent)?);
        let id = AllocatorId(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        let name = name.into();
        debug!(
            pool = %name,
            id = id.0,
            parent = %parent.name,
            capacity_bytes,
            "Registered allocator pool"
        );
        self.entries.push(Arc::new(Resource {
            name,
            space: parent.space,
            capacity: Some(capacity_bytes),
            used: AtomicUsize::new(0),
            parent: Some(parent),
        }));
        Ok(id)
    }

    /// Check whether `id` names an entry.
    #[must_use]
    pub fn contains(&self, id: AllocatorId) -> bool {
        (id.0 as usize) < self.entries.len()
    }

    /// Memory space of an allocator.
    ///
    /// # Errors
    ///
    /// Returns [`SdfError::UnknownAllocator`] for an unregistered id.
    pub fn space(&self, id: AllocatorId) -> SdfResult<MemorySpace> {
        Ok(self.entry(id)?.space)
    }

    /// Name of an allocator.
    ///
    /// # Errors
    ///
    /// Returns [`SdfError::UnknownAllocator`] for an unregistered id.
    pub fn name(&self, id: AllocatorId) -> SdfResult<&str> {
        Ok(&self.entry(id)?.name)
    }

    /// Bytes currently reserved from an allocator (including its child pools).
    ///
    /// # Errors
    ///
    /// Returns [`SdfError::UnknownAllocator`] for an unregistered id.
    pub fn used_bytes(&self, id: AllocatorId) -> SdfResult<usize> {
        Ok(self.entry(id)?.used.load(Ordering::Acquire))
    }

    /// Capacity of a pool; `None` for unbounded resources.
    ///
    /// # Errors
    ///
    /// Returns [`SdfError::UnknownAllocator`] for an unregistered id.
    pub fn capacity_bytes(&self, id: AllocatorId) -> SdfResult<Option<usize>> {
        Ok(self.entry(id)?.capacity)
    }

    /// Reserve `bytes` from an allocator and all of its ancestors.
    ///
    /// Either every level is charged or none is.
    ///
    /// # Errors
    ///
    /// Returns [`SdfError::UnknownAllocator`] for an unregistered id and
    /// [`SdfError::PoolExhausted`] when any level lacks room.
    pub fn reserve(&self, id: AllocatorId, bytes: usize) -> SdfResult<Reservation> {
        let resource = self.entry(id)?;

        let mut charged: Vec<&Resource> = Vec::new();
        let mut node = Some(resource);
        while let Some(level) = node {
            if let Err(err) = level.take(bytes) {
                for done in charged {
                    done.give_back(bytes);
                }
                return Err(err);
            }
            charged.push(level);
            node = level.parent.as_ref();
        }

        debug!(
            allocator = %resource.name,
            bytes,
            available = resource.available(),
            "Reserved engine memory"
        );
        Ok(Reservation {
            resource: Arc::clone(resource),
            bytes,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn base_resources_exist() {
        let registry = AllocatorRegistry::new();
        assert_eq!(registry.space(AllocatorId::HOST).unwrap(), MemorySpace::Host);
        assert_eq!(registry.space(AllocatorId::PINNED).unwrap(), MemorySpace::Pinned);
        assert_eq!(registry.space(AllocatorId::DEVICE).unwrap(), MemorySpace::Device);
        assert_eq!(registry.capacity_bytes(AllocatorId::HOST).unwrap(), None);
    }

    #[test]
    fn unknown_id_is_rejected() {
        let mut registry = AllocatorRegistry::new();
        let bogus = AllocatorId(42);
        assert!(!registry.contains(bogus));
        assert!(matches!(
            registry.reserve(bogus, 8),
            Err(SdfError::UnknownAllocator { id }) if id == bogus
        ));
        assert!(registry.register_pool("p", bogus, 8).is_err());
    }

    #[test]
    fn space_compatibility() {
        assert!(MemorySpace::Host.supports(ExecutionPolicy::Threaded));
        assert!(!MemorySpace::Host.supports(ExecutionPolicy::Accelerated));
        assert!(MemorySpace::Pinned.supports(ExecutionPolicy::Sequential));
        assert!(MemorySpace::Pinned.supports(ExecutionPolicy::Accelerated));
        assert!(!MemorySpace::Device.supports(ExecutionPolicy::Sequential));
        assert!(MemorySpace::Device.supports(ExecutionPolicy::Accelerated));
    }

    #[test]
    fn reservations_charge_ancestors_and_release_on_drop() {
        let mut registry = AllocatorRegistry::new();
        let outer = registry
            .register_pool("outer", AllocatorId::DEVICE, 1000)
            .unwrap();
        let inner = registry.register_pool("inner", outer, 600).unwrap();
        assert_eq!(registry.space(inner).unwrap(), MemorySpace::Device);

        let a = registry.reserve(inner, 500).unwrap();
        assert_eq!(registry.used_bytes(inner).unwrap(), 500);
        assert_eq!(registry.used_bytes(outer).unwrap(), 500);
        assert_eq!(registry.used_bytes(AllocatorId::DEVICE).unwrap(), 500);

        // inner has room, outer does not: nothing may stay charged
        let b = registry.reserve(outer, 450).unwrap();
        let err = registry.reserve(inner, 100).unwrap_err();
        assert!(matches!(
            err,
            SdfError::PoolExhausted { ref pool, requested: 100, available: 50 } if pool == "outer"
        ));
        assert_eq!(registry.used_bytes(inner).unwrap(), 500);

        drop(a);
        drop(b);
        assert_eq!(registry.used_bytes(inner).unwrap(), 0);
        assert_eq!(registry.used_bytes(outer).unwrap(), 0);
        assert_eq!(registry.used_bytes(AllocatorId::DEVICE).unwrap(), 0);
    }

    #[test]
    fn clones_share_usage() {
        let mut registry = AllocatorRegistry::new();
        let pool = registry.register_pool("shared", AllocatorId::HOST, 64).unwrap();
        let clone = registry.clone();
        let held = clone.reserve(pool, 64).unwrap();
        assert_eq!(registry.used_bytes(pool).unwrap(), 64);
        assert_eq!(held.bytes(), 64);
        assert_eq!(held.allocator_name(), "shared");
    }

    #[test]
    fn shrink_returns_excess_to_every_level() {
        let mut registry = AllocatorRegistry::new();
        let pool = registry.register_pool("trim", AllocatorId::HOST, 100).unwrap();
        let mut held = registry.reserve(pool, 90).unwrap();
        assert!(registry.reserve(pool, 20).is_err());

        held.shrink_to(30);
        assert_eq!(held.bytes(), 30);
        assert_eq!(registry.used_bytes(pool).unwrap(), 30);
        assert_eq!(registry.used_bytes(AllocatorId::HOST).unwrap(), 30);

        held.shrink_to(50);
        assert_eq!(held.bytes(), 30);
        let more = registry.reserve(pool, 70).unwrap();

        drop(held);
        drop(more);
        assert_eq!(registry.used_bytes(AllocatorId::HOST).unwrap(), 0);
    }

    #[test]
    fn pools_registered_after_cloning_stay_local() {
        let mut registry = AllocatorRegistry::new();
        let clone = registry.clone();
        let pool = registry.register_pool("late", AllocatorId::HOST, 8).unwrap();
        assert!(registry.contains(pool));
        assert!(!clone.contains(pool));
    }
}
