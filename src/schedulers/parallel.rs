//! N single-thread pools picked round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};
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

/// Fixed set of single-thread pools for CPU-bound, non-blocking work.
///
/// Direct tasks and workers are spread round-robin; a worker stays on the
/// pool it was created on.
pub struct ParallelScheduler {
    env: SchedulerEnv,
    parallelism: usize,
    factory: ThreadFactory,
    next: AtomicUsize,
    cell: LifecycleCell<Arc<[Backing]>>,
}

impl ParallelScheduler {
    /// Create an unstarted scheduler with `parallelism` threads (at least 1).
    #[must_use]
    pub fn new(env: SchedulerEnv, parallelism: usize, factory: ThreadFactory) -> Self {
        Self {
            env,
            parallelism: parallelism.max(1),
            factory,
            next: AtomicUsize::new(0),
            cell: LifecycleCell::new(),
        }
    }

    /// Configured number of threads.
    #[must_use]
    pub const fn parallelism(&self) -> usize {
        self.parallelism
    }

    fn backings(&self) -> Result<Arc<[Backing]>, SchedulerError> {
        self.cell.get_or_start(
            || {
                let mut backings = Vec::with_capacity(self.parallelism);
                for _ in 0..self.parallelism {
                    match Backing::build(self, &self.env, &self.factory, None) {
                        Ok(backing) => backings.push(backing),
                        Err(e) => {
                            backings.iter().for_each(Backing::shutdown);
                            return Err(e);
                        }
                    }
                }
                info!(
                    prefix = self.factory.prefix(),
                    parallelism = self.parallelism,
                    "Parallel scheduler started"
                );
                Ok(backings.into())
            },
            |backings| backings.iter().for_each(Backing::shutdown),
        )
    }

    fn pick(&self) -> Result<Backing, SchedulerError> {
        let backings = self.backings()?;
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % backings.len();
        Ok(backings[idx].clone())
    }
}

impl Disposable for ParallelScheduler {
    fn dispose(&self) {
        if let Some(backings) = self.cell.dispose() {
            backings.iter().for_each(Backing::shutdown);
            debug!(prefix = self.factory.prefix(), "Parallel scheduler disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }
}

impl Scheduler for ParallelScheduler {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        let backing = self.pick()?;
        direct_schedule(&backing.executor, task, Duration::ZERO, &self.env.hooks)
    }

    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let backing = self.pick()?;
        direct_schedule(&backing.executor, task, delay, &self.env.hooks)
    }

    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let backing = self.pick()?;
        direct_schedule_periodically(
            &backing.executor,
            task,
            initial_delay,
            period,
            &self.env.hooks,
        )
    }

    fn create_worker(&self) -> Arc<dyn Worker> {
        match self.pick() {
            Ok(backing) => register(
                self.cell.workers(),
                ExecutorWorker::new(&backing.executor, self.cell.workers(), &self.env.hooks),
            ),
            Err(_) => Arc::new(RejectedWorker::new()),
        }
    }

    fn start(&self) -> Result<(), SchedulerError> {
        self.backings().map(|_| ())
    }

    fn dispose_gracefully(&self, timeout: Duration) -> bool {
        match self.cell.dispose() {
            Some(backings) => shutdown_all(&backings, timeout),
            None => true,
        }
    }

    fn scan(&self, attr: Attr) -> Option<ScanValue> {
        match attr {
            Attr::Capacity => Some(ScanValue::Count(self.parallelism)),
            Attr::Buffered => Some(ScanValue::Count(
                self.cell
                    .current()
                    .map_or(0, |backings| backings.iter().map(Backing::pending).sum()),
            )),
            Attr::Terminated | Attr::Cancelled => Some(ScanValue::Flag(self.is_disposed())),
        }
    }
}

impl std::fmt::Debug for ParallelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelScheduler")
            .field("prefix", &self.factory.prefix())
            .field("parallelism", &self.parallelism)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
