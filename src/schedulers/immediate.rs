//! Runs tasks inline on the calling thread.

use std::sync::Arc;

use crate::core::hooks::run_guarded;
use crate::core::{
    Disposable, DisposableRef, ErrorHooks, Scheduler, SchedulerError, SimpleDisposable, Task,
    Worker,
};

fn finished() -> DisposableRef {
    let done = SimpleDisposable::new();
    done.dispose();
    Arc::new(done)
}

/// Scheduler executing every task immediately on the caller.
///
/// It has no timer, so delayed and periodic requests are rejected. Disposing
/// it is a no-op; its workers reject once disposed.
pub struct ImmediateScheduler {
    hooks: Arc<ErrorHooks>,
}

impl ImmediateScheduler {
    /// Scheduler routing task panics to `hooks`.
    #[must_use]
    pub const fn new(hooks: Arc<ErrorHooks>) -> Self {
        Self { hooks }
    }
}

impl Disposable for ImmediateScheduler {
    fn dispose(&self) {}
}

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        run_guarded(task, &self.hooks);
        Ok(finished())
    }

    fn create_worker(&self) -> Arc<dyn Worker> {
        Arc::new(ImmediateWorker {
            hooks: Arc::clone(&self.hooks),
            disposed: SimpleDisposable::new(),
        })
    }
}

struct ImmediateWorker {
    hooks: Arc<ErrorHooks>,
    disposed: SimpleDisposable,
}

impl Disposable for ImmediateWorker {
    fn dispose(&self) {
        self.disposed.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.disposed.is_disposed()
    }
}

impl Worker for ImmediateWorker {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        if self.is_disposed() {
            return Err(SchedulerError::disposed());
        }
        run_guarded(task, &self.hooks);
        Ok(finished())
    }
}
