//! One thread, shared by every task and worker.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::env::SchedulerEnv;
use super::lifecycle::{shutdown_all, Backing, LifecycleCell};
use super::worker::{register, ExecutorWorker, RejectedWorker};
use crate::core::{
    direct_schedule, direct_schedule_periodically, Attr, Disposable, DisposableRef, PeriodicTask,
    ScanValue, Scheduler, SchedulerError, Task, ThreadFactory, Worker,
};

/// Scheduler backed by a single-thread scheduled pool.
pub struct SingleScheduler {
    env: SchedulerEnv,
    factory: ThreadFactory,
    cell: LifecycleCell<Backing>,
}

impl SingleScheduler {
    /// Create an unstarted scheduler spawning its thread through `factory`.
    #[must_use]
    pub fn new(env: SchedulerEnv, factory: ThreadFactory) -> Self {
        Self {
            env,
            factory,
            cell: LifecycleCell::new(),
        }
    }

    fn backing(&self) -> Result<Backing, SchedulerError> {
        self.cell.get_or_start(
            || {
                let backing = Backing::build(self, &self.env, &self.factory, None)?;
                info!(prefix = self.factory.prefix(), "Single scheduler started");
                Ok(backing)
            },
            Backing::shutdown,
        )
    }
}

impl Disposable for SingleScheduler {
    fn dispose(&self) {
        if let Some(backing) = self.cell.dispose() {
            backing.shutdown();
            debug!(prefix = self.factory.prefix(), "Single scheduler disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }
}

impl Scheduler for SingleScheduler {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        let backing = self.backing()?;
        direct_schedule(&backing.executor, task, Duration::ZERO, &self.env.hooks)
    }

    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let backing = self.backing()?;
        direct_schedule(&backing.executor, task, delay, &self.env.hooks)
    }

    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let backing = self.backing()?;
        direct_schedule_periodically(
            &backing.executor,
            task,
            initial_delay,
            period,
            &self.env.hooks,
        )
    }

    fn create_worker(&self) -> Arc<dyn Worker> {
        match self.backing() {
            Ok(backing) => register(
                self.cell.workers(),
                ExecutorWorker::new(&backing.executor, self.cell.workers(), &self.env.hooks),
            ),
            Err(_) => Arc::new(RejectedWorker::new()),
        }
    }

    fn start(&self) -> Result<(), SchedulerError> {
        self.backing().map(|_| ())
    }

    fn dispose_gracefully(&self, timeout: Duration) -> bool {
        match self.cell.dispose() {
            Some(backing) => shutdown_all(&[backing], timeout),
            None => true,
        }
    }

    fn scan(&self, attr: Attr) -> Option<ScanValue> {
        match attr {
            Attr::Capacity => Some(ScanValue::Count(1)),
            Attr::Buffered => Some(ScanValue::Count(
                self.cell.current().map_or(0, |b| b.pending()),
            )),
            Attr::Terminated | Attr::Cancelled => Some(ScanValue::Flag(self.is_disposed())),
        }
    }
}

impl std::fmt::Debug for SingleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleScheduler")
            .field("prefix", &self.factory.prefix())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScheduledExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn single() -> SingleScheduler {
        SingleScheduler::new(
            SchedulerEnv::new(),
            ThreadFactory::new("single-test").with_non_blocking(true),
        )
    }

    #[test]
    fn test_runs_on_named_thread() {
        let scheduler = single();
        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler
            .schedule(Box::new(move || {
                tx.send(std::thread::current().name().map(str::to_string))
                    .unwrap();
            }))
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("single-test-1"));
        scheduler.dispose();
    }

    #[test]
    fn test_lazy_start_builds_once() {
        let env = SchedulerEnv::new();
        let built = Arc::new(AtomicUsize::new(0));
        let b = Arc::clone(&built);
        env.decorators.add(
            "count",
            Arc::new(move |_: &dyn Scheduler, exec: Arc<dyn ScheduledExecutor>| {
                b.fetch_add(1, Ordering::SeqCst);
                exec
            }),
        );
        let scheduler = SingleScheduler::new(env, ThreadFactory::new("lazy"));
        assert_eq!(built.load(Ordering::SeqCst), 0);
        scheduler.start().unwrap();
        scheduler.start().unwrap();
        scheduler.schedule(Box::new(|| {})).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        scheduler.dispose();
    }

    #[test]
    fn test_rejects_after_dispose() {
        let scheduler = single();
        scheduler.start().unwrap();
        let worker = scheduler.create_worker();
        scheduler.dispose();
        scheduler.dispose();

        assert!(scheduler.is_disposed());
        assert!(worker.is_disposed());
        assert!(scheduler.schedule(Box::new(|| {})).err().unwrap().is_rejected());
        assert!(scheduler.start().unwrap_err().is_rejected());
        assert!(scheduler.create_worker().is_disposed());
    }

    #[test]
    fn test_dispose_gracefully_waits_for_thread() {
        let scheduler = single();
        scheduler.start().unwrap();
        assert!(scheduler.dispose_gracefully(Duration::from_secs(2)));
        assert_eq!(scheduler.scan(Attr::Terminated), Some(ScanValue::Flag(true)));
    }
}
