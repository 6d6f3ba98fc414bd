//! Best-effort introspection of executors.
//!
//! Wrappers are unwrapped through [`ExecutorShape::Delegating`] until an
//! introspectable executor is found; anything else reports `None` rather than
//! failing.

use serde::Serialize;

use super::executor::{Executor, ExecutorShape};

/// Attribute that can be queried from an executor or scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attr {
    /// Configured thread or pool size.
    Capacity,
    /// Tasks accepted and not yet finished, queued or running.
    Buffered,
    /// Whether every thread has exited.
    Terminated,
    /// Whether the executor refuses new work.
    Cancelled,
}

/// Result of an introspection query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanValue {
    /// A count.
    Count(usize),
    /// No fixed bound.
    Unbounded,
    /// A boolean attribute.
    Flag(bool),
}

impl ScanValue {
    /// The count, if this is one.
    #[must_use]
    pub const fn as_count(self) -> Option<usize> {
        match self {
            Self::Count(n) => Some(n),
            _ => None,
        }
    }

    /// The flag, if this is one.
    #[must_use]
    pub const fn as_flag(self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(b),
            _ => None,
        }
    }
}

/// Query `attr` from `executor`, unwrapping delegating wrappers first.
pub fn scan_executor(executor: &dyn Executor, attr: Attr) -> Option<ScanValue> {
    let mut current = executor;
    loop {
        match current.shape() {
            ExecutorShape::Delegating(inner) => current = inner,
            ExecutorShape::Pool(pool) => {
                return Some(match attr {
                    Attr::Capacity => ScanValue::Count(pool.thread_count()),
                    Attr::Buffered => ScanValue::Count(pool.pending()),
                    Attr::Terminated => ScanValue::Flag(pool.is_terminated()),
                    Attr::Cancelled => ScanValue::Flag(pool.is_shutdown()),
                });
            }
            ExecutorShape::Scheduled(pool) => {
                return Some(match attr {
                    Attr::Capacity => ScanValue::Unbounded,
                    Attr::Buffered => ScanValue::Count(pool.pending()),
                    Attr::Terminated => ScanValue::Flag(pool.is_terminated()),
                    Attr::Cancelled => ScanValue::Flag(pool.is_shutdown()),
                });
            }
            ExecutorShape::Opaque => {
                return match attr {
                    Attr::Capacity | Attr::Buffered => None,
                    Attr::Terminated => Some(ScanValue::Flag(current.is_terminated())),
                    Attr::Cancelled => Some(ScanValue::Flag(current.is_shutdown())),
                };
            }
        }
    }
}
