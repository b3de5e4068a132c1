//! # Notification Sinks
//!
//! Observers told when a submission's execution step finishes.
//!
//! Sinks are advisory: they run on a queue worker thread once the execution
//! step has finished, possibly concurrently with its transfer-out step. Use
//! [`CompletionHandle::wait`](crate::CompletionHandle::wait) to synchronise.

use smc_core::{ExecStatus, SubmissionId};

/// Receiver of execution-step completions
///
/// Called exactly once per submission. Implementations must not block for
/// long: they hold up the worker that finished the step.
pub trait NotificationSink: Send + Sync {
    /// Execution step of submission `id` finished with `status`
    fn notify(&self, id: SubmissionId, status: ExecStatus);
}

impl<F> NotificationSink for F
where
    F: Fn(SubmissionId, ExecStatus) + Send + Sync,
{
    fn notify(&self, id: SubmissionId, status: ExecStatus) {
        self(id, status)
    }
}

/// Logs every completion through the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, id: SubmissionId, status: ExecStatus) {
        match status {
            ExecStatus::Complete => log::info!("kernel finished processing request {}", id),
            other => log::warn!("kernel failed processing request {}: {}", id, other),
        }
    }
}

/// Discards completions
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _id: SubmissionId, _status: ExecStatus) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_closure_is_sink() {
        let last = AtomicU64::new(0);
        let sink = |id: SubmissionId, _status: ExecStatus| last.store(id.id(), Ordering::SeqCst);
        sink.notify(SubmissionId::new(5), ExecStatus::Complete);
        assert_eq!(last.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_builtin_sinks_accept_any_status() {
        let sinks: [&dyn NotificationSink; 2] = [&LogSink, &NullSink];
        for sink in sinks {
            sink.notify(SubmissionId::new(1), ExecStatus::Complete);
            sink.notify(SubmissionId::new(2), ExecStatus::Error(-14));
        }
    }
}
