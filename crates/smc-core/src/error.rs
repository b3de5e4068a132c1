//! # SMC Error Handling
//!
//! Error types for the dispatch stack.
//!
//! Error handling in SMC follows these principles:
//! - Errors are typed and categorized by the layer that reports them
//! - Submit-time errors are synchronous and leave no operation queued
//! - Completion-time errors carry the underlying runtime status code
//! - No panics in production code paths

use core::fmt;

use crate::sync::status;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// SMC Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// SMC unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Submission Errors
    // =========================================================================
    /// The queue or device cannot accept more work right now
    CapacityExceeded,
    /// Parameters or buffers of a submission are invalid
    InvalidSubmission(SubmissionFault),
    /// A queued operation failed; carries the runtime status code
    OperationFailed(i32),

    // =========================================================================
    // Program / Device Errors
    // =========================================================================
    /// A program image could not be loaded
    InvalidProgram(ProgramFault),
    /// No device accepted the program image
    NoUsableDevice,
    /// The program has no kernel with the requested name
    KernelNotFound,

    // =========================================================================
    // Kernel Binding Errors
    // =========================================================================
    /// Argument index outside the kernel signature
    InvalidArgIndex(u32),
    /// Argument value does not match the kernel signature
    InvalidArgValue(u32),
    /// Argument was never bound before launch
    UnboundArg(u32),

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Device memory exhausted
    OutOfDeviceMemory,
    /// Region range, flags, or element type are invalid
    InvalidRegion,

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// Queue is shutting down
    QueueShutdown,
    /// Profiling data not recorded for this operation
    ProfilingUnavailable,
    /// Worker thread could not be started
    WorkerSpawnFailed,
}

impl Error {
    /// Whether the caller may retry the same request later
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityExceeded | Self::OutOfDeviceMemory)
    }

    /// Runtime status code reported when this error terminates an operation
    pub const fn status_code(&self) -> i32 {
        match self {
            Self::OperationFailed(code) => *code,
            Self::OutOfDeviceMemory => status::MEM_OBJECT_ALLOCATION_FAILURE,
            Self::InvalidRegion => status::INVALID_MEM_OBJECT,
            Self::InvalidArgIndex(_) => status::INVALID_ARG_INDEX,
            Self::InvalidArgValue(_) => status::INVALID_ARG_VALUE,
            Self::UnboundArg(_) => status::INVALID_KERNEL_ARGS,
            Self::KernelNotFound => status::INVALID_KERNEL_NAME,
            _ => status::OUT_OF_RESOURCES,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Submission
            Self::CapacityExceeded => write!(f, "queue capacity exceeded"),
            Self::InvalidSubmission(fault) => write!(f, "invalid submission: {}", fault),
            Self::OperationFailed(code) => write!(f, "operation failed with status {}", code),

            // Program / device
            Self::InvalidProgram(fault) => write!(f, "invalid program: {}", fault),
            Self::NoUsableDevice => write!(f, "no device accepted the program"),
            Self::KernelNotFound => write!(f, "kernel not found in program"),

            // Binding
            Self::InvalidArgIndex(i) => write!(f, "invalid kernel argument index {}", i),
            Self::InvalidArgValue(i) => write!(f, "invalid value for kernel argument {}", i),
            Self::UnboundArg(i) => write!(f, "kernel argument {} not set", i),

            // Memory
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::InvalidRegion => write!(f, "invalid memory region"),

            // Queue
            Self::QueueShutdown => write!(f, "queue is shutting down"),
            Self::ProfilingUnavailable => write!(f, "profiling information not available"),
            Self::WorkerSpawnFailed => write!(f, "failed to start queue worker"),
        }
    }
}

impl core::error::Error for Error {}

// =============================================================================
// SUB-ERROR TYPES
// =============================================================================

/// Reasons a submission is rejected before anything is enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionFault {
    /// Element count is zero
    ZeroElements,
    /// An input buffer holds fewer elements than requested
    InputTooShort,
    /// Output slot is outside the output buffer
    SlotOutOfRange,
    /// Both inputs refer to the same buffer
    AliasedInputs,
    /// A scalar does not fit the work unit's parameter type
    ScalarOutOfRange,
    /// The work unit rejected a bound parameter
    Binding,
}

impl fmt::Display for SubmissionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroElements => write!(f, "element count is zero"),
            Self::InputTooShort => write!(f, "input buffer shorter than element count"),
            Self::SlotOutOfRange => write!(f, "output slot out of range"),
            Self::AliasedInputs => write!(f, "input buffers alias each other"),
            Self::ScalarOutOfRange => write!(f, "scalar parameter out of range"),
            Self::Binding => write!(f, "parameter binding failed"),
        }
    }
}

/// Reasons a program image cannot be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramFault {
    /// Image contains no bytes
    EmptyImage,
    /// Image could not be read from storage
    Unreadable,
    /// Device refused the image
    Rejected,
    /// Kernel signature differs from the one the caller binds
    SignatureMismatch,
    /// Program was built for a different device than the queue runs on
    WrongDevice,
}

impl fmt::Display for ProgramFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyImage => write!(f, "program image is empty"),
            Self::Unreadable => write!(f, "program image could not be read"),
            Self::Rejected => write!(f, "device rejected the program image"),
            Self::SignatureMismatch => write!(f, "kernel signature mismatch"),
            Self::WrongDevice => write!(f, "program built for another device"),
        }
    }
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<SubmissionFault> for Error {
    fn from(e: SubmissionFault) -> Self {
        Error::InvalidSubmission(e)
    }
}

impl From<ProgramFault> for Error {
    fn from(e: ProgramFault) -> Self {
        Error::InvalidProgram(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let s = format!("{}", Error::OperationFailed(-14));
        assert!(s.contains("-14"));

        let s = format!("{}", Error::from(SubmissionFault::ZeroElements));
        assert!(s.contains("element count is zero"));
    }

    #[test]
    fn test_error_conversion() {
        let error: Error = ProgramFault::EmptyImage.into();
        assert!(matches!(error, Error::InvalidProgram(ProgramFault::EmptyImage)));
    }

    #[test]
    fn test_retryable() {
        assert!(Error::CapacityExceeded.is_retryable());
        assert!(!Error::InvalidSubmission(SubmissionFault::Binding).is_retryable());
        assert!(!Error::OperationFailed(-5).is_retryable());
    }

    #[test]
    fn test_status_code_passthrough() {
        assert_eq!(Error::OperationFailed(-42).status_code(), -42);
        assert_eq!(Error::InvalidRegion.status_code(), status::INVALID_MEM_OBJECT);
    }
}
