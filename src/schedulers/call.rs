//! Run a closure on a scheduler and wait for its result.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::{
    DisposableRef, ErrorHooks, NonBlockingClassifier, Scheduler, SchedulerError,
    TaskFailure, ThreadContext,
};

enum CallState<T> {
    Pending,
    Ready(Result<T, SchedulerError>),
    Taken,
}

struct CallSlot<T> {
    state: Mutex<CallState<T>>,
    ready: Condvar,
}

impl<T> CallSlot<T> {
    fn store(&self, result: Result<T, SchedulerError>) {
        let mut state = self.state.lock();
        if matches!(*state, CallState::Pending) {
            *state = CallState::Ready(result);
            self.ready.notify_all();
        }
    }
}

/// Pending result of a closure submitted with [`CallHandle::spawn`].
///
/// A recoverable panic completes the handle with
/// [`SchedulerError::TaskFailed`]. A fatal panic is reported to the error
/// hooks and never completes it, so [`wait`](Self::wait) times out.
pub struct CallHandle<T> {
    slot: Arc<CallSlot<T>>,
    task: DisposableRef,
    classifier: Arc<NonBlockingClassifier>,
}

impl<T: Send + 'static> CallHandle<T> {
    /// Schedule `f` on `scheduler`.
    ///
    /// # Errors
    ///
    /// Whatever the scheduler returns when it refuses the task.
    pub fn spawn<F>(
        scheduler: &dyn Scheduler,
        classifier: &Arc<NonBlockingClassifier>,
        hooks: &Arc<ErrorHooks>,
        f: F,
    ) -> Result<Self, SchedulerError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let slot = Arc::new(CallSlot {
            state: Mutex::new(CallState::Pending),
            ready: Condvar::new(),
        });
        let sink = Arc::clone(&slot);
        let hooks = Arc::clone(hooks);
        let task = scheduler.schedule(Box::new(move || match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => sink.store(Ok(value)),
            Err(payload) => {
                let failure = TaskFailure::from_panic(payload);
                if failure.is_fatal() {
                    hooks.handle_error(&failure);
                } else {
                    sink.store(Err(SchedulerError::TaskFailed(failure.message().to_string())));
                }
            }
        }))?;
        Ok(Self {
            slot,
            task,
            classifier: Arc::clone(classifier),
        })
    }
}

impl<T> CallHandle<T> {
    /// Block until the result is available or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::BlockingNotSupported`] on a non-blocking thread.
    /// * [`SchedulerError::Timeout`] if no result arrived in time.
    /// * [`SchedulerError::TaskFailed`] if the closure panicked.
    /// * [`SchedulerError::Rejected`] if the result was already taken.
    pub fn wait(&self, timeout: Duration) -> Result<T, SchedulerError> {
        if self.classifier.is_current_thread_non_blocking() {
            return Err(SchedulerError::BlockingNotSupported {
                operation: "wait()".into(),
                thread: ThreadContext::current().name().to_string(),
            });
        }

        let mut state = self.slot.state.lock();
        self.slot.ready.wait_while_for(
            &mut state,
            |state| matches!(state, CallState::Pending),
            timeout,
        );
        match std::mem::replace(&mut *state, CallState::Taken) {
            CallState::Ready(result) => result,
            CallState::Pending => {
                *state = CallState::Pending;
                Err(SchedulerError::Timeout(timeout))
            }
            CallState::Taken => Err(SchedulerError::Rejected("result already taken".into())),
        }
    }

    /// Whether a result (or failure) has been stored.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(*self.slot.state.lock(), CallState::Pending)
    }

    /// Cancel the closure if it has not started.
    pub fn cancel(&self) {
        self.task.dispose();
    }
}

impl<T> std::fmt::Debug for CallHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}
