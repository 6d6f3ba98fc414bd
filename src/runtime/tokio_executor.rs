//! Tokio runtime executor implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::core::{Executor, Runnable, ScheduledExecutor, SchedulerError, TaskHandle};

struct Inner {
    shutdown: AtomicBool,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, (Arc<TaskHandle>, AbortHandle)>>,
}

/// Removes a spawned task from the live set however its future ends.
struct Untrack {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for Untrack {
    fn drop(&mut self) {
        self.inner.live.lock().remove(&self.id);
    }
}

/// Executor that spawns tasks on a tokio runtime.
///
/// Delays use `tokio::time::sleep`, so the runtime needs its time driver
/// enabled. Tasks run on the runtime's worker threads and should not block.
/// Pass it to [`Schedulers::from_executor_service`](crate::schedulers::Schedulers::from_executor_service)
/// to get a scheduler.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
    inner: Arc<Inner>,
}

impl TokioExecutor {
    /// Create a TokioExecutor from a tokio runtime handle.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            inner: Arc::new(Inner {
                shutdown: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a TokioExecutor on the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Unsupported`] outside a tokio runtime.
    pub fn current() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SchedulerError::Unsupported(format!("no tokio runtime: {e}")))
    }

    /// Number of spawned tasks that have not finished.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.inner.live.lock().len()
    }

    fn spawn(&self, task: Runnable, delay: Duration) -> Result<Arc<TaskHandle>, SchedulerError> {
        let handle = Arc::new(TaskHandle::new());
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut live = self.inner.live.lock();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::Rejected("tokio executor has been shut down".into()));
        }
        let inner = Arc::clone(&self.inner);
        let future_handle = Arc::clone(&handle);
        let join = self.handle.spawn(async move {
            let _untrack = Untrack { inner, id };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if future_handle.begin() {
                task();
                future_handle.complete();
            }
        });
        live.insert(id, (Arc::clone(&handle), join.abort_handle()));
        Ok(handle)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Runnable) -> Result<Arc<TaskHandle>, SchedulerError> {
        self.spawn(task, Duration::ZERO)
    }

    fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = self.inner.live.lock().drain().map(|(_, entry)| entry).collect();
        debug!(cancelled = drained.len(), "Tokio executor shut down");
        for (handle, abort) in drained {
            handle.cancel();
            abort.abort();
        }
    }

    fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.inner.live.lock().is_empty()
    }
}

impl ScheduledExecutor for TokioExecutor {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<Arc<TaskHandle>, SchedulerError> {
        self.spawn(task, delay)
    }
}

impl std::fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioExecutor")
            .field("shutdown", &self.is_shutdown())
            .field("live_tasks", &self.live_tasks())
            .finish()
    }
}
