//! Error types for scheduler operations and task failures.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by schedulers, workers and executors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The scheduler, worker or executor refused the task.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The backing executor cannot perform the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// A blocking wait was attempted on a thread classified as non-blocking.
    #[error("{operation} is blocking, which is not supported in thread {thread}")]
    BlockingNotSupported {
        /// The blocking operation that was attempted.
        operation: String,
        /// Name of the offending thread.
        thread: String,
    },
    /// The task panicked with a recoverable failure.
    #[error("task failed: {0}")]
    TaskFailed(String),
    /// A blocking wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// An OS thread could not be spawned.
    #[error("thread spawn failed: {0}")]
    Spawn(String),
}

impl SchedulerError {
    /// Whether this error is a rejection.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub(crate) fn disposed() -> Self {
        Self::Rejected("scheduler or worker has been disposed".into())
    }

    pub(crate) fn not_time_capable() -> Self {
        Self::Rejected("scheduler is not time-capable".into())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Panic payload marking a failure as fatal.
///
/// A task escalates by panicking with this payload:
///
/// ```rust,ignore
/// std::panic::panic_any(FatalError::new("stack exhausted"));
/// ```
///
/// Fatal failures go to the error hook and the uncaught handler and never
/// complete a pending [`CallHandle`](crate::schedulers::CallHandle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError(pub String);

impl FatalError {
    /// Create a fatal error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A failure raised by user task code while running on a scheduler thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    message: String,
    fatal: bool,
}

impl TaskFailure {
    /// Recoverable failure with a message.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// Fatal failure with a message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    /// Classify a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<FatalError>() {
            Ok(fatal) => return Self::fatal(fatal.0),
            Err(other) => other,
        };
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Self::recoverable(*message),
            Err(other) => other,
        };
        match payload.downcast::<&'static str>() {
            Ok(message) => Self::recoverable(*message),
            Err(_) => Self::recoverable("task panicked with a non-string payload"),
        }
    }

    /// Failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure is fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.fatal
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fatal {
            write!(f, "fatal: {}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for TaskFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display() {
        let err = SchedulerError::Rejected("pool".to_string());
        assert_eq!(format!("{}", err), "rejected: pool");
        assert!(err.is_rejected());
        assert!(!SchedulerError::Timeout(Duration::from_millis(5)).is_rejected());
    }

    #[test]
    fn test_blocking_not_supported_display() {
        let err = SchedulerError::BlockingNotSupported {
            operation: "wait()".into(),
            thread: "single-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "wait() is blocking, which is not supported in thread single-1"
        );
    }

    #[test]
    fn test_failure_from_str_panic() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let failure = TaskFailure::from_panic(payload);
        assert_eq!(failure.message(), "boom");
        assert!(!failure.is_fatal());
    }

    #[test]
    fn test_failure_from_formatted_panic() {
        let code = 7;
        let payload = std::panic::catch_unwind(|| panic!("code {code}")).unwrap_err();
        assert_eq!(TaskFailure::from_panic(payload).message(), "code 7");
    }

    #[test]
    fn test_failure_from_fatal_payload() {
        let payload =
            std::panic::catch_unwind(|| std::panic::panic_any(FatalError::new("overflow")))
                .unwrap_err();
        let failure = TaskFailure::from_panic(payload);
        assert!(failure.is_fatal());
        assert_eq!(failure.to_string(), "fatal: overflow");
    }

    #[test]
    fn test_failure_from_opaque_payload() {
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42_u8)).unwrap_err();
        assert!(!TaskFailure::from_panic(payload).is_fatal());
    }
}
