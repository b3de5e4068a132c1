//! # SMC Queue
//!
//! Host emulation of the accelerator runtime: platforms and devices,
//! contexts, program images, kernels, and an out-of-order command queue
//! whose operations complete through events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         SMC Runtime                             │
//! │                                                                 │
//! │  Platform ──► Device ──► Context ──► Program ──► Kernel/Launch  │
//! │                 │                                     │         │
//! │                 │ compute units                       │ tasks   │
//! │                 ▼                                     ▼         │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                      CommandQueue                         │  │
//! │  │  ┌────────────┐   ┌────────────┐   ┌──────────────────┐   │  │
//! │  │  │ CommandRing│   │ Ready list │──►│ Workers (1 / CU) │   │  │
//! │  │  │ (in-flight)│   │            │   │                  │   │  │
//! │  │  └────────────┘   └─────▲──────┘   └────────┬─────────┘   │  │
//! │  │                         │ dependency        │ Event       │  │
//! │  │                         └── callbacks ◄─────┘ completion  │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Program images are opaque; a device executes the work units registered
//! on it by name.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod device;
pub mod kernel;
pub mod program;
pub mod queue;
pub mod ring;

// Re-exports
pub use context::Context;
pub use device::{Device, DeviceConfig, Platform};
pub use kernel::{ArgKind, ArgValue, Invocation, Kernel, KernelArgs, Launch, WorkUnit};
pub use program::{select_device, Program, ProgramImage, SelectedDevice};
pub use queue::{CommandQueue, MigrationTarget, QueueConfig, QueueProperties, SubmitBatch};
pub use ring::{CommandRing, RingStats};

static_assertions::assert_impl_all!(CommandQueue: Send, Sync);
static_assertions::assert_impl_all!(Device: Send, Sync, Clone);
static_assertions::assert_impl_all!(Kernel: Send, Sync, Clone);
