//! The execution-context abstraction.
//!
//! A [`Scheduler`] accepts tasks and runs them on its backing threads; a
//! [`Worker`] is a sequential sub-context carved out of one. Every scheduling
//! call returns a [`DisposableRef`] that cancels the task (or the whole
//! periodic series) when disposed, and fails synchronously with
//! [`SchedulerError::Rejected`] once the scheduler or worker is disposed.
//!
//! Task panics never reach the caller of `schedule*`; they are routed to the
//! [`ErrorHooks`](crate::core::ErrorHooks) of the scheduler's environment.

use std::sync::Arc;
use std::time::Duration;

use super::disposable::{Disposable, DisposableRef};
use super::error::SchedulerError;
use super::executor::Runnable;
use super::introspect::{Attr, ScanValue};
use crate::util::clock;

/// A one-shot task.
pub type Task = Runnable;

/// A task fired repeatedly by periodic scheduling.
pub type PeriodicTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// An execution context over which asynchronous work is dispatched.
pub trait Scheduler: Disposable {
    /// Run `task` as soon as a thread is available, at most once.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Rejected` if the scheduler is disposed or its
    /// executor refuses the task.
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError>;

    /// Run `task` once `delay` has elapsed. A zero delay runs immediately.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::schedule`]; schedulers without a timer reject.
    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let _ = (task, delay);
        Err(SchedulerError::not_time_capable())
    }

    /// Fire `task` after `initial_delay`, then every `period`.
    ///
    /// A zero `period` resubmits the next run as soon as the previous one
    /// completed. The returned handle covers the whole series.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::schedule_delayed`].
    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let _ = (task, initial_delay, period);
        Err(SchedulerError::not_time_capable())
    }

    /// Create a sequential sub-context. A disposed scheduler hands out a
    /// worker that rejects everything.
    fn create_worker(&self) -> Arc<dyn Worker>;

    /// Build the backing executor if not done yet. Idempotent.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Rejected` after dispose; disposal is terminal.
    fn start(&self) -> Result<(), SchedulerError> {
        if self.is_disposed() {
            return Err(SchedulerError::disposed());
        }
        Ok(())
    }

    /// Dispose and wait up to `timeout` for the backing threads to exit.
    /// Returns whether they did.
    fn dispose_gracefully(&self, timeout: Duration) -> bool {
        let _ = timeout;
        self.dispose();
        true
    }

    /// Current time in milliseconds since the Unix epoch, as seen by this
    /// scheduler.
    fn now_ms(&self) -> u64 {
        clock::now_ms()
    }

    /// Introspect the scheduler. `None` when the attribute is unknown.
    fn scan(&self, attr: Attr) -> Option<ScanValue> {
        match attr {
            Attr::Terminated | Attr::Cancelled => Some(ScanValue::Flag(self.is_disposed())),
            Attr::Capacity | Attr::Buffered => None,
        }
    }
}

/// A sequential sub-context of a [`Scheduler`].
///
/// Tasks submitted to one worker run one at a time in submission order.
/// Disposing the worker cancels every outstanding task.
pub trait Worker: Disposable {
    /// Run `task` after the previously submitted ones.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Rejected` once the worker is disposed.
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError>;

    /// Run `task` once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// Same as [`Worker::schedule`].
    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let _ = (task, delay);
        Err(SchedulerError::not_time_capable())
    }

    /// Fire `task` after `initial_delay`, then every `period`.
    ///
    /// # Errors
    ///
    /// Same as [`Worker::schedule`].
    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let _ = (task, initial_delay, period);
        Err(SchedulerError::not_time_capable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::disposable::SimpleDisposable;

    struct InlineScheduler {
        disposed: SimpleDisposable,
    }

    struct NoopWorker;

    impl Disposable for NoopWorker {
        fn dispose(&self) {}
    }

    impl Worker for NoopWorker {
        fn schedule(&self, _task: Task) -> Result<DisposableRef, SchedulerError> {
            Err(SchedulerError::disposed())
        }
    }

    impl Disposable for InlineScheduler {
        fn dispose(&self) {
            self.disposed.dispose();
        }

        fn is_disposed(&self) -> bool {
            self.disposed.is_disposed()
        }
    }

    impl Scheduler for InlineScheduler {
        fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
            task();
            Ok(Arc::new(SimpleDisposable::new()))
        }

        fn create_worker(&self) -> Arc<dyn Worker> {
            Arc::new(NoopWorker)
        }
    }

    #[test]
    fn test_defaults_are_not_time_capable() {
        let s = InlineScheduler {
            disposed: SimpleDisposable::new(),
        };
        let err = s
            .schedule_delayed(Box::new(|| {}), Duration::from_millis(1))
            .err()
            .unwrap();
        assert!(err.is_rejected());
        assert!(s
            .schedule_periodically(Arc::new(|| {}), Duration::ZERO, Duration::ZERO)
            .is_err());
    }

    #[test]
    fn test_default_start_fails_after_dispose() {
        let s = InlineScheduler {
            disposed: SimpleDisposable::new(),
        };
        assert!(s.start().is_ok());
        assert!(s.dispose_gracefully(Duration::from_millis(10)));
        assert!(s.start().unwrap_err().is_rejected());
        assert_eq!(s.scan(Attr::Terminated), Some(ScanValue::Flag(true)));
        assert_eq!(s.scan(Attr::Capacity), None);
    }
}
