//! # SMC Memory
//!
//! Host allocations, the device-visible regions bound to work units, and the
//! accounting of device memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       SMC Memory System                         │
//! │                                                                 │
//! │  ┌──────────────────┐   bind (copy in)   ┌──────────────────┐   │
//! │  │   HostBuffer<T>  │ ─────────────────► │   DeviceRegion   │   │
//! │  │ (caller-owned,   │                    │ (per submission, │   │
//! │  │  shared, locked) │ ◄───────────────── │  dirty span)     │   │
//! │  └──────────────────┘ transfer-out (span)└────────┬─────────┘   │
//! │                                                   │ RAII        │
//! │                                          ┌────────┴─────────┐   │
//! │                                          │  MemoryTracker   │   │
//! │                                          │ (device capacity)│   │
//! │                                          └──────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A region is initialised from its host buffer when it is created and only
//! the span a work unit wrote is copied back on transfer-out, so several
//! regions may share one host buffer as long as they write disjoint spans.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod host;
pub mod region;
pub mod tracker;

// Re-exports
pub use host::{Element, HostBuffer, HostMemory};
pub use region::{DeviceRegion, MemFlags, RegionView, RegionViewMut};
pub use tracker::{Allocation, MemoryTracker, TrackerStats};

static_assertions::assert_impl_all!(HostBuffer<f64>: Send, Sync, Clone);
static_assertions::assert_impl_all!(DeviceRegion: Send, Sync, Clone);
static_assertions::assert_impl_all!(MemoryTracker: Send, Sync, Clone);
