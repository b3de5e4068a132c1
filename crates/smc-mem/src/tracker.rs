//! # Device Memory Tracker
//!
//! Accounts device memory held by live regions against the device's global
//! memory size. Every accepted request returns an [`Allocation`] that gives
//! its bytes back when dropped.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use smc_core::{AllocationId, ByteSize, Error, Result};

// =============================================================================
// STATISTICS
// =============================================================================

/// Tracker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Total allocations granted
    pub total_allocated: u64,
    /// Total allocations released
    pub total_released: u64,
    /// Requests refused for lack of capacity
    pub total_refused: u64,
    /// Currently live allocations
    pub active_allocations: u64,
    /// Bytes currently in use
    pub memory_in_use: u64,
    /// Highest `memory_in_use` observed
    pub peak_memory: u64,
}

// =============================================================================
// TRACKER
// =============================================================================

#[derive(Debug)]
struct TrackerState {
    live: HashMap<AllocationId, ByteSize>,
    next_id: u64,
    stats: TrackerStats,
}

#[derive(Debug)]
struct TrackerInner {
    capacity: ByteSize,
    state: Mutex<TrackerState>,
}

/// Device memory accounting
///
/// Cloning shares the same accounting.
#[derive(Debug, Clone)]
pub struct MemoryTracker {
    inner: Arc<TrackerInner>,
}

impl MemoryTracker {
    /// Create a tracker for a device with `capacity` bytes of memory
    pub fn new(capacity: ByteSize) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                capacity,
                state: Mutex::new(TrackerState {
                    live: HashMap::new(),
                    next_id: 1,
                    stats: TrackerStats::default(),
                }),
            }),
        }
    }

    /// Reserve `size` bytes
    pub fn allocate(&self, size: ByteSize) -> Result<Allocation> {
        let mut state = self.inner.state.lock();

        let in_use = ByteSize::from_bytes(state.stats.memory_in_use);
        match in_use.checked_add(size) {
            Some(total) if total <= self.inner.capacity => {}
            _ => {
                state.stats.total_refused += 1;
                log::debug!(
                    "device memory refused: {} requested, {} of {} in use",
                    size,
                    in_use,
                    self.inner.capacity
                );
                return Err(Error::OutOfDeviceMemory);
            }
        }

        let id = AllocationId::new(state.next_id);
        state.next_id += 1;
        state.live.insert(id, size);

        let stats = &mut state.stats;
        stats.total_allocated += 1;
        stats.active_allocations += 1;
        stats.memory_in_use += size.as_bytes();
        stats.peak_memory = stats.peak_memory.max(stats.memory_in_use);

        Ok(Allocation {
            id,
            size,
            tracker: Arc::clone(&self.inner),
        })
    }

    /// Total capacity
    pub fn capacity(&self) -> ByteSize {
        self.inner.capacity
    }

    /// Bytes currently in use
    pub fn in_use(&self) -> ByteSize {
        ByteSize::from_bytes(self.inner.state.lock().stats.memory_in_use)
    }

    /// Bytes still available
    pub fn available(&self) -> ByteSize {
        self.inner.capacity.saturating_sub(self.in_use())
    }

    /// Number of live allocations
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().live.len()
    }

    /// Get statistics
    pub fn stats(&self) -> TrackerStats {
        self.inner.state.lock().stats.clone()
    }
}

impl TrackerInner {
    fn release(&self, id: AllocationId) {
        let mut state = self.state.lock();
        if let Some(size) = state.live.remove(&id) {
            let stats = &mut state.stats;
            stats.total_released += 1;
            stats.active_allocations -= 1;
            stats.memory_in_use -= size.as_bytes();
        }
    }
}

// =============================================================================
// ALLOCATION
// =============================================================================

/// Live device memory reservation, released on drop
#[derive(Debug)]
pub struct Allocation {
    id: AllocationId,
    size: ByteSize,
    tracker: Arc<TrackerInner>,
}

impl Allocation {
    /// Get allocation ID
    pub fn id(&self) -> AllocationId {
        self.id
    }

    /// Get size
    pub fn size(&self) -> ByteSize {
        self.size
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.tracker.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let tracker = MemoryTracker::new(ByteSize::from_kib(4));
        let a = tracker.allocate(ByteSize::from_kib(1)).unwrap();
        let b = tracker.allocate(ByteSize::from_kib(2)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(tracker.in_use(), ByteSize::from_kib(3));
        assert_eq!(tracker.available(), ByteSize::from_kib(1));

        drop(a);
        assert_eq!(tracker.in_use(), ByteSize::from_kib(2));
        assert_eq!(tracker.active_count(), 1);

        drop(b);
        let stats = tracker.stats();
        assert_eq!(stats.memory_in_use, 0);
        assert_eq!(stats.total_released, 2);
        assert_eq!(stats.peak_memory, 3 * 1024);
    }

    #[test]
    fn test_capacity_exhausted() {
        let tracker = MemoryTracker::new(ByteSize::from_bytes(100));
        let _held = tracker.allocate(ByteSize::from_bytes(80)).unwrap();
        assert_eq!(
            tracker.allocate(ByteSize::from_bytes(21)).unwrap_err(),
            Error::OutOfDeviceMemory
        );
        assert!(tracker.allocate(ByteSize::from_bytes(20)).is_ok());
        assert_eq!(tracker.stats().total_refused, 1);
    }

    #[test]
    fn test_clones_share_accounting() {
        let tracker = MemoryTracker::new(ByteSize::from_mib(1));
        let other = tracker.clone();
        let _a = other.allocate(ByteSize::from_kib(512)).unwrap();
        assert_eq!(tracker.in_use(), ByteSize::from_kib(512));
    }
}
