//! Executor abstractions schedulers are built on.
//!
//! An [`Executor`] runs [`Runnable`]s on some pool of threads; a
//! [`ScheduledExecutor`] can additionally defer them. Every submission
//! returns a [`TaskHandle`] that tracks the task through
//! pending → running → done, or into cancelled.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::disposable::Disposable;
use super::error::SchedulerError;
use super::thread_pool::{FixedThreadPool, ScheduledThreadPool};

/// Unit of work accepted by executors.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Future-like handle of a task submitted to an executor.
#[derive(Debug)]
pub struct TaskHandle {
    state: AtomicU8,
}

impl TaskHandle {
    /// Create a handle in the pending state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
        }
    }

    /// Move pending → running. Returns `false` if the task was cancelled.
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move running → done. A cancellation that raced the run wins.
    pub fn complete(&self) {
        let _ = self
            .state
            .compare_exchange(RUNNING, DONE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Cancel a pending or running task. A running task is not interrupted,
    /// it only loses its completion. Returns whether this call cancelled it.
    pub fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == DONE || current == CANCELLED {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Whether the task finished, either by completing or by cancellation.
    pub fn is_done(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), DONE | CANCELLED)
    }

    /// Whether the task is still waiting to run.
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for TaskHandle {
    fn dispose(&self) {
        self.cancel();
    }

    fn is_disposed(&self) -> bool {
        self.is_done()
    }
}

/// What executor introspection is allowed to look at.
pub enum ExecutorShape<'a> {
    /// Nothing can be reported.
    Opaque,
    /// A fixed-size pool draining a shared queue.
    Pool(&'a FixedThreadPool),
    /// A pool executing deadline-ordered futures.
    Scheduled(&'a ScheduledThreadPool),
    /// A wrapper around another executor.
    Delegating(&'a dyn Executor),
}

/// Runs submitted tasks asynchronously.
pub trait Executor: Send + Sync {
    /// Submit a task for execution as soon as a thread is available.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Rejected` if the executor refuses the task.
    fn execute(&self, task: Runnable) -> Result<Arc<TaskHandle>, SchedulerError>;

    /// Stop accepting tasks and cancel the ones not yet started.
    fn shutdown(&self);

    /// Whether `shutdown` has been called.
    fn is_shutdown(&self) -> bool;

    /// Whether every thread of the executor has exited.
    fn is_terminated(&self) -> bool {
        self.is_shutdown()
    }

    /// Structure exposed to introspection.
    fn shape(&self) -> ExecutorShape<'_> {
        ExecutorShape::Opaque
    }
}

/// An executor that can also defer tasks.
pub trait ScheduledExecutor: Executor {
    /// Submit a task to run once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Rejected` if the executor refuses the task,
    /// or `SchedulerError::Unsupported` if it cannot defer work.
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<Arc<TaskHandle>, SchedulerError>;
}

/// Submit immediately when `delay` is zero, deferred otherwise.
pub(crate) fn submit(
    executor: &dyn ScheduledExecutor,
    task: Runnable,
    delay: Duration,
) -> Result<Arc<TaskHandle>, SchedulerError> {
    if delay.is_zero() {
        executor.execute(task)
    } else {
        executor.schedule(task, delay)
    }
}

/// Presents a plain [`Executor`] as a [`ScheduledExecutor`].
///
/// Immediate submissions are forwarded; deferred ones are refused.
/// Introspection sees through to the delegate.
pub struct UnsupportedScheduledExecutor {
    delegate: Arc<dyn Executor>,
}

impl UnsupportedScheduledExecutor {
    /// Wrap an executor.
    pub fn new(delegate: Arc<dyn Executor>) -> Self {
        Self { delegate }
    }

    /// The wrapped executor.
    #[must_use]
    pub fn get(&self) -> &Arc<dyn Executor> {
        &self.delegate
    }
}

impl Executor for UnsupportedScheduledExecutor {
    fn execute(&self, task: Runnable) -> Result<Arc<TaskHandle>, SchedulerError> {
        self.delegate.execute(task)
    }

    fn shutdown(&self) {
        self.delegate.shutdown();
    }

    fn is_shutdown(&self) -> bool {
        self.delegate.is_shutdown()
    }

    fn is_terminated(&self) -> bool {
        self.delegate.is_terminated()
    }

    fn shape(&self) -> ExecutorShape<'_> {
        ExecutorShape::Delegating(&*self.delegate)
    }
}

impl ScheduledExecutor for UnsupportedScheduledExecutor {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<Arc<TaskHandle>, SchedulerError> {
        if delay.is_zero() {
            return self.delegate.execute(task);
        }
        Err(SchedulerError::Unsupported(
            "delayed scheduling on an executor without a timer".into(),
        ))
    }
}
