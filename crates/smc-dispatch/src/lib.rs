//! # SMC Dispatch
//!
//! Asynchronous submission of the Monte-Carlo work unit to an accelerator
//! queue, with a completion handle per submission.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Dispatcher                            │
//! │                                                                 │
//! │  submit(n, slot, a, b, out)                                     │
//! │     │ validate ─► bind regions ─► id = counter + 1              │
//! │     ▼                                                           │
//! │  ┌──────────────┐  wait list  ┌──────────────────┐              │
//! │  │  execute     │ ──────────► │  transfer-out    │              │
//! │  │  (Task)      │             │  (MigrateToHost) │              │
//! │  └──────┬───────┘             └────────┬─────────┘              │
//! │         │ on_complete                  │                        │
//! │         ▼                              ▼                        │
//! │  NotificationSink             CompletionHandle::wait()          │
//! │  (advisory)                   (authoritative)                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Submissions share one out-of-order queue and never wait on each other;
//! each handle resolves when its own transfer-out step has finished.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatcher;
pub mod handle;
pub mod kernel;
pub mod sink;

// Re-exports
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use handle::{Completion, CompletionHandle};
pub use kernel::{count_hits, MonteCarloKernel, DEFAULT_SEED, KERNEL_NAME};
pub use sink::{LogSink, NotificationSink, NullSink};

static_assertions::assert_impl_all!(Dispatcher: Send, Sync);
static_assertions::assert_impl_all!(CompletionHandle: Send, Sync);
static_assertions::assert_not_impl_any!(CompletionHandle: Clone);
