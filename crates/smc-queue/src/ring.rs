//! # Command Ring
//!
//! Bookkeeping of in-flight queue operations: capacity reservation,
//! event id assignment, and retirement.

use hashbrown::HashMap;
use smc_core::{CommandKind, Error, EventId, ExecStatus, Result};

/// Ring statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Total operations enqueued
    pub total_submissions: u64,
    /// Operations that completed successfully
    pub total_completions: u64,
    /// Operations that completed with an error
    pub total_failures: u64,
    /// Reservations refused (ring full)
    pub stalls: u64,
    /// Highest number of operations in flight
    pub peak_pending: u64,
}

/// In-flight operation table with bounded capacity
#[derive(Debug)]
pub struct CommandRing {
    max_pending: usize,
    pending: HashMap<EventId, CommandKind>,
    /// Slots promised to a batch but not yet pushed
    reserved: usize,
    next_event: u64,
    stats: RingStats,
}

impl CommandRing {
    /// Create a ring holding at most `max_pending` operations
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending: max_pending.max(1),
            pending: HashMap::new(),
            reserved: 0,
            next_event: 1,
            stats: RingStats::default(),
        }
    }

    /// Capacity in operations
    pub fn capacity(&self) -> usize {
        self.max_pending
    }

    /// Operations in flight
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// No operation in flight and none reserved
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.reserved == 0
    }

    /// Check if `slots` more operations fit
    pub fn has_space(&self, slots: usize) -> bool {
        self.pending.len() + self.reserved + slots <= self.max_pending
    }

    /// Reserve `slots` operations up front
    pub fn reserve(&mut self, slots: usize) -> Result<()> {
        if !self.has_space(slots) {
            self.stats.stalls += 1;
            log::debug!(
                "command ring full: {} pending, {} reserved, {} requested",
                self.pending.len(),
                self.reserved,
                slots
            );
            return Err(Error::CapacityExceeded);
        }
        self.reserved += slots;
        Ok(())
    }

    /// Return unused reserved slots
    pub fn unreserve(&mut self, slots: usize) {
        self.reserved = self.reserved.saturating_sub(slots);
    }

    /// Record a new operation in a reserved slot
    pub fn push(&mut self, kind: CommandKind) -> EventId {
        self.reserved = self.reserved.saturating_sub(1);

        let id = EventId::new(self.next_event);
        self.next_event += 1;
        self.pending.insert(id, kind);

        self.stats.total_submissions += 1;
        self.stats.peak_pending = self.stats.peak_pending.max(self.pending.len() as u64);
        id
    }

    /// Remove a finished operation
    pub fn retire(&mut self, id: EventId, status: ExecStatus) {
        if self.pending.remove(&id).is_none() {
            log::warn!("retiring unknown event {}", id);
            return;
        }
        if status.is_success() {
            self.stats.total_completions += 1;
        } else {
            self.stats.total_failures += 1;
        }
    }

    /// Get ring statistics
    pub fn stats(&self) -> &RingStats {
        &self.stats
    }
}
