//! # SMC Core
//!
//! Foundational types shared by every layer of the accelerator dispatch
//! stack: the unified error type, strongly typed identifiers, and the
//! completion events that tie host code to queued accelerator operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        smc-core                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Types     │  │    Sync     │  │     Error           │  │
//! │  │ (Handle,    │  │  (Event,    │  │   Handling          │  │
//! │  │  ByteSize)  │  │ ExecStatus) │  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod sync;
pub mod types;

// Re-exports for convenience
pub use error::{Error, ProgramFault, Result, SubmissionFault};
pub use sync::{status, wait_for_events, CommandKind, Event, ExecStatus, ProfilingInfo};
pub use types::*;

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(Error: Send, Sync, Copy);
static_assertions::assert_impl_all!(Event: Send, Sync, Clone);
static_assertions::assert_impl_all!(SubmissionId: Send, Sync, Copy);
static_assertions::assert_impl_all!(ByteSize: Send, Sync, Copy);
