//! # Synchronization Primitives
//!
//! Completion events for queued accelerator operations.
//!
//! Every enqueued operation owns an [`Event`]. The runtime drives the event
//! through `Queued → Submitted → Running` and finally to a terminal status;
//! host threads block on it with [`Event::wait`] and observers attach
//! one-shot callbacks with [`Event::on_complete`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::types::EventId;

// =============================================================================
// STATUS CODES
// =============================================================================

/// Runtime status codes
///
/// Non-negative values are execution states, negative values are failures.
pub mod status {
    /// Operation finished
    pub const COMPLETE: i32 = 0;
    /// Operation executing
    pub const RUNNING: i32 = 1;
    /// Operation handed to the device
    pub const SUBMITTED: i32 = 2;
    /// Operation waiting in the queue
    pub const QUEUED: i32 = 3;

    /// Device memory allocation failed
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    /// Runtime ran out of resources
    pub const OUT_OF_RESOURCES: i32 = -5;
    /// A dependency in the wait list failed
    pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
    /// Memory object is invalid
    pub const INVALID_MEM_OBJECT: i32 = -38;
    /// Kernel name not found
    pub const INVALID_KERNEL_NAME: i32 = -46;
    /// Argument index out of range
    pub const INVALID_ARG_INDEX: i32 = -49;
    /// Argument value invalid
    pub const INVALID_ARG_VALUE: i32 = -50;
    /// Kernel arguments incomplete
    pub const INVALID_KERNEL_ARGS: i32 = -52;
}

// =============================================================================
// EXECUTION STATUS
// =============================================================================

/// Execution status of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStatus {
    /// Enqueued, dependencies not yet resolved
    Queued,
    /// Dependencies resolved, waiting for a compute unit
    Submitted,
    /// Executing
    Running,
    /// Finished successfully
    Complete,
    /// Finished with a failure status code
    Error(i32),
}

impl ExecStatus {
    /// Is terminal state
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }

    /// Is success
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Numeric status code
    pub const fn code(&self) -> i32 {
        match self {
            Self::Queued => status::QUEUED,
            Self::Submitted => status::SUBMITTED,
            Self::Running => status::RUNNING,
            Self::Complete => status::COMPLETE,
            Self::Error(code) => *code,
        }
    }
}

impl core::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Submitted => write!(f, "submitted"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Error(code) => write!(f, "error({})", code),
        }
    }
}

/// Kind of operation an event tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Work-unit execution
    Task,
    /// Device to host transfer
    MigrateToHost,
    /// Host to device transfer
    MigrateToDevice,
}

// =============================================================================
// PROFILING
// =============================================================================

/// Timestamps of one operation's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilingInfo {
    /// Enqueued by the host
    pub queued: Instant,
    /// Dependencies resolved
    pub submitted: Instant,
    /// Execution started
    pub started: Instant,
    /// Execution ended
    pub ended: Instant,
}

impl ProfilingInfo {
    /// Time spent executing
    pub fn execution_time(&self) -> Duration {
        self.ended.duration_since(self.started)
    }

    /// Time from enqueue to completion
    pub fn total_time(&self) -> Duration {
        self.ended.duration_since(self.queued)
    }
}

#[derive(Debug, Default)]
struct Timestamps {
    queued: Option<Instant>,
    submitted: Option<Instant>,
    started: Option<Instant>,
    ended: Option<Instant>,
}

// =============================================================================
// EVENT
// =============================================================================

type Callback = Box<dyn FnOnce(EventId, ExecStatus) + Send + 'static>;

struct EventState {
    status: ExecStatus,
    callbacks: Vec<Callback>,
    times: Timestamps,
}

struct EventInner {
    id: EventId,
    kind: CommandKind,
    profiling: bool,
    state: Mutex<EventState>,
    done: Condvar,
}

/// Completion event of a queued operation
///
/// Cloning shares the same underlying event.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Create a new event in `Queued` state
    pub fn new(id: EventId, kind: CommandKind, profiling: bool) -> Self {
        let times = Timestamps {
            queued: profiling.then(Instant::now),
            ..Timestamps::default()
        };

        Self {
            inner: Arc::new(EventInner {
                id,
                kind,
                profiling,
                state: Mutex::new(EventState {
                    status: ExecStatus::Queued,
                    callbacks: Vec::new(),
                    times,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Get event ID
    pub fn id(&self) -> EventId {
        self.inner.id
    }

    /// Get operation kind
    pub fn kind(&self) -> CommandKind {
        self.inner.kind
    }

    /// Current status
    pub fn status(&self) -> ExecStatus {
        self.inner.state.lock().status
    }

    /// Whether the operation reached a terminal status
    pub fn is_complete(&self) -> bool {
        self.status().is_terminal()
    }

    /// Mark dependencies resolved
    pub fn mark_submitted(&self) {
        let mut state = self.inner.state.lock();
        if state.status == ExecStatus::Queued {
            state.status = ExecStatus::Submitted;
            if self.inner.profiling {
                state.times.submitted = Some(Instant::now());
            }
        }
    }

    /// Mark execution started
    pub fn mark_running(&self) {
        let mut state = self.inner.state.lock();
        if !state.status.is_terminal() {
            state.status = ExecStatus::Running;
            if self.inner.profiling {
                state.times.started = Some(Instant::now());
            }
        }
    }

    /// Complete successfully
    pub fn complete(&self) -> bool {
        self.finish(ExecStatus::Complete)
    }

    /// Complete with a failure code
    pub fn fail(&self, code: i32) -> bool {
        self.finish(ExecStatus::Error(code))
    }

    /// Move to a terminal status, wake waiters and run callbacks
    ///
    /// Returns `false` when the event had already finished. Callbacks run on
    /// the calling thread after the state lock is released, in registration
    /// order. A panicking callback is logged and does not stop the rest.
    fn finish(&self, status: ExecStatus) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            if self.inner.profiling {
                let now = Instant::now();
                state.times.submitted.get_or_insert(now);
                state.times.started.get_or_insert(now);
                state.times.ended = Some(now);
            }
            core::mem::take(&mut state.callbacks)
        };
        self.inner.done.notify_all();

        log::trace!("event {} finished: {}", self.inner.id, status);

        for callback in callbacks {
            self.run_callback(callback, status);
        }
        true
    }

    fn run_callback(&self, callback: impl FnOnce(EventId, ExecStatus), status: ExecStatus) {
        let id = self.inner.id;
        if catch_unwind(AssertUnwindSafe(|| callback(id, status))).is_err() {
            log::error!("completion callback of event {} panicked", id);
        }
    }

    /// Register a one-shot completion callback
    ///
    /// The callback runs once the event reaches a terminal status. If the
    /// event already finished it runs immediately on the calling thread.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(EventId, ExecStatus) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            let status = state.status;
            drop(state);
            self.run_callback(callback, status);
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Block until the event finishes
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            self.inner.done.wait(&mut state);
        }
        match state.status {
            ExecStatus::Error(code) => Err(Error::OperationFailed(code)),
            _ => Ok(()),
        }
    }

    /// Lifecycle timestamps, available once the event finished on a
    /// profiling-enabled queue
    pub fn profiling_info(&self) -> Result<ProfilingInfo> {
        if !self.inner.profiling {
            return Err(Error::ProfilingUnavailable);
        }
        let state = self.inner.state.lock();
        let t = &state.times;
        match (t.queued, t.submitted, t.started, t.ended) {
            (Some(queued), Some(submitted), Some(started), Some(ended)) => Ok(ProfilingInfo {
                queued,
                submitted,
                started,
                ended,
            }),
            _ => Err(Error::ProfilingUnavailable),
        }
    }
}

impl core::fmt::Debug for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("status", &self.status())
            .finish()
    }
}

/// Block until every event finished
///
/// All events are waited for; the first failure in list order is returned.
pub fn wait_for_events(events: &[Event]) -> Result<()> {
    let mut first_error = None;
    for event in events {
        if let Err(e) = event.wait() {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn event(id: u64) -> Event {
        Event::new(EventId::new(id), CommandKind::Task, true)
    }

    #[test]
    fn test_lifecycle() {
        let e = event(1);
        assert_eq!(e.status(), ExecStatus::Queued);
        e.mark_submitted();
        assert_eq!(e.status(), ExecStatus::Submitted);
        e.mark_running();
        assert_eq!(e.status(), ExecStatus::Running);
        assert!(e.complete());
        assert!(e.is_complete());
        assert!(!e.fail(-5), "terminal status is final");
        assert_eq!(e.status(), ExecStatus::Complete);
    }

    #[test]
    fn test_callback_runs_once() {
        let e = event(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        e.on_complete(move |id, status| {
            assert_eq!(id.id(), 2);
            assert_eq!(status, ExecStatus::Complete);
            h.fetch_add(1, Ordering::SeqCst);
        });
        e.complete();
        e.complete();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_after_completion_runs_immediately() {
        let e = event(3);
        e.fail(-14);
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        e.on_complete(move |_, status| *s.lock() = Some(status));
        assert_eq!(*seen.lock(), Some(ExecStatus::Error(-14)));
    }

    #[test]
    fn test_wait_blocks_until_finished() {
        let e = event(4);
        let waiter = {
            let e = e.clone();
            thread::spawn(move || e.wait())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        e.complete();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let e = event(10);
        let hits = Arc::new(AtomicUsize::new(0));
        e.on_complete(|_, _| panic!("observer fault"));
        let h = Arc::clone(&hits);
        e.on_complete(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(e.complete());
        assert_eq!(e.wait(), Ok(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1, "later callbacks still run");

        e.on_complete(|_, _| panic!("late observer fault"));
        assert!(e.is_complete());
    }

    #[test]
    fn test_wait_reports_failure_code() {
        let e = event(5);
        e.fail(status::OUT_OF_RESOURCES);
        assert_eq!(e.wait(), Err(Error::OperationFailed(status::OUT_OF_RESOURCES)));
    }

    #[test]
    fn test_profiling_info() {
        let e = event(6);
        assert_eq!(e.profiling_info(), Err(Error::ProfilingUnavailable));
        e.mark_submitted();
        e.mark_running();
        e.complete();
        let info = e.profiling_info().unwrap();
        assert!(info.ended >= info.started);
        assert!(info.started >= info.submitted);
        assert!(info.total_time() >= info.execution_time());

        let plain = Event::new(EventId::new(7), CommandKind::Task, false);
        plain.complete();
        assert_eq!(plain.profiling_info(), Err(Error::ProfilingUnavailable));
    }

    #[test]
    fn test_wait_for_events_returns_first_error() {
        let a = event(8);
        let b = event(9);
        a.complete();
        b.fail(-38);
        assert_eq!(wait_for_events(&[a, b]), Err(Error::OperationFailed(-38)));
    }
}
