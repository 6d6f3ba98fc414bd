//! Process-wide schedulers that survive stray `dispose()` calls.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::{
    Attr, Disposable, DisposableRef, PeriodicTask, ScanValue, Scheduler, SchedulerError, Task,
    Worker,
};

/// Canonical scheduler handed out by [`Schedulers`](super::Schedulers).
///
/// Every operation goes to the wrapped scheduler unchanged, errors included,
/// except disposal: library code that calls `dispose()` on a scheduler it
/// does not own leaves the shared instance running. Only the owning context
/// can shut it down.
pub struct CachedScheduler {
    key: &'static str,
    inner: Arc<dyn Scheduler>,
}

impl CachedScheduler {
    pub(crate) fn new(key: &'static str, inner: Arc<dyn Scheduler>) -> Self {
        Self { key, inner }
    }

    /// Which canonical slot this scheduler occupies.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// The wrapped scheduler.
    #[must_use]
    pub fn get(&self) -> &Arc<dyn Scheduler> {
        &self.inner
    }

    pub(crate) fn force_dispose(&self) {
        debug!(key = self.key, "Force-disposing cached scheduler");
        self.inner.dispose();
    }
}

impl Disposable for CachedScheduler {
    fn dispose(&self) {}

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl Scheduler for CachedScheduler {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        self.inner.schedule(task)
    }

    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        self.inner.schedule_delayed(task, delay)
    }

    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        self.inner.schedule_periodically(task, initial_delay, period)
    }

    fn create_worker(&self) -> Arc<dyn Worker> {
        self.inner.create_worker()
    }

    fn start(&self) -> Result<(), SchedulerError> {
        self.inner.start()
    }

    fn dispose_gracefully(&self, _timeout: Duration) -> bool {
        true
    }

    fn now_ms(&self) -> u64 {
        self.inner.now_ms()
    }

    fn scan(&self, attr: Attr) -> Option<ScanValue> {
        self.inner.scan(attr)
    }
}

impl std::fmt::Debug for CachedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedScheduler")
            .field("key", &self.key)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
