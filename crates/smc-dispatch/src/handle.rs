//! # Completion Handles

use smc_core::{Error, Event, ExecStatus, ProfilingInfo, Result, SubmissionId};

/// Outcome of a resolved submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Submission id
    pub id: SubmissionId,
    /// Execution step timestamps, when the queue records them
    pub execution: Option<ProfilingInfo>,
    /// Transfer-out step timestamps, when the queue records them
    pub transfer: Option<ProfilingInfo>,
}

/// Token for one in-flight submission
///
/// [`wait`](Self::wait) consumes the handle, so a submission is waited for at
/// most once:
///
/// ```compile_fail
/// fn wait_twice(handle: smc_dispatch::CompletionHandle) {
///     let _ = handle.wait();
///     let _ = handle.wait();
/// }
/// ```
///
/// Dropping a handle does not cancel the submission.
#[must_use = "a submission's results are only safe to read after `wait`"]
#[derive(Debug)]
pub struct CompletionHandle {
    id: SubmissionId,
    execution: Event,
    transfer: Event,
}

impl CompletionHandle {
    pub(crate) fn new(id: SubmissionId, execution: Event, transfer: Event) -> Self {
        Self {
            id,
            execution,
            transfer,
        }
    }

    /// Submission id
    pub fn id(&self) -> SubmissionId {
        self.id
    }

    /// Whether the transfer-out step has finished, without blocking
    pub fn is_complete(&self) -> bool {
        self.transfer.is_complete()
    }

    /// Current status of the execution step
    pub fn status(&self) -> ExecStatus {
        self.execution.status()
    }

    /// Block until this submission's transfer-out step has finished
    ///
    /// Afterwards the output buffer holds the result and the inputs may be
    /// reused. A failed execution step is reported with its own status
    /// code rather than the chained transfer-out failure.
    pub fn wait(self) -> Result<Completion> {
        if let Err(e) = self.transfer.wait() {
            log::debug!("request {} failed: {}", self.id, e);
            return Err(match self.execution.status() {
                ExecStatus::Error(code) => Error::OperationFailed(code),
                _ => e,
            });
        }
        Ok(Completion {
            id: self.id,
            execution: self.execution.profiling_info().ok(),
            transfer: self.transfer.profiling_info().ok(),
        })
    }
}
