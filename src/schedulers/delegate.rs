//! Schedulers over caller-supplied executors.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::env::SchedulerEnv;
use super::lifecycle::LifecycleCell;
use super::worker::{register, RejectedWorker, SerialWorker};
use crate::core::{
    direct_schedule, direct_schedule_periodically, scan_executor, Attr, Disposable,
    DisposableRef, Executor, PeriodicTask, ScanValue, ScheduledExecutor, Scheduler,
    SchedulerError, Task, UnsupportedScheduledExecutor, Worker,
};

/// Scheduler over a caller-supplied [`ScheduledExecutor`].
///
/// The executor is decorated when the scheduler starts and shut down when it
/// is disposed. Workers are trampolining, so they stay sequential whatever
/// the executor's thread count.
pub struct DelegateServiceScheduler {
    env: SchedulerEnv,
    raw: Arc<dyn ScheduledExecutor>,
    cell: LifecycleCell<Arc<dyn ScheduledExecutor>>,
}

impl DelegateServiceScheduler {
    /// Wrap `executor`.
    pub fn new(env: SchedulerEnv, executor: Arc<dyn ScheduledExecutor>) -> Self {
        Self {
            env,
            raw: executor,
            cell: LifecycleCell::new(),
        }
    }

    fn executor(&self) -> Result<Arc<dyn ScheduledExecutor>, SchedulerError> {
        self.cell.get_or_start(
            || Ok(self.env.decorators.decorate(self, Arc::clone(&self.raw))),
            |_| {},
        )
    }
}

impl Disposable for DelegateServiceScheduler {
    fn dispose(&self) {
        let decorated = self.cell.dispose();
        if let Some(decorated) = decorated {
            decorated.shutdown();
        }
        self.raw.shutdown();
        debug!("Delegate service scheduler disposed");
    }

    fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }
}

impl Scheduler for DelegateServiceScheduler {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        direct_schedule(&self.executor()?, task, Duration::ZERO, &self.env.hooks)
    }

    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        direct_schedule(&self.executor()?, task, delay, &self.env.hooks)
    }

    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        direct_schedule_periodically(
            &self.executor()?,
            task,
            initial_delay,
            period,
            &self.env.hooks,
        )
    }

    fn create_worker(&self) -> Arc<dyn Worker> {
        match self.executor() {
            Ok(executor) => register(
                self.cell.workers(),
                SerialWorker::new(&executor, true, self.cell.workers(), &self.env.hooks),
            ),
            Err(_) => Arc::new(RejectedWorker::new()),
        }
    }

    fn start(&self) -> Result<(), SchedulerError> {
        self.executor().map(|_| ())
    }

    fn scan(&self, attr: Attr) -> Option<ScanValue> {
        match attr {
            Attr::Terminated => Some(ScanValue::Flag(self.raw.is_terminated())),
            Attr::Cancelled => Some(ScanValue::Flag(self.is_disposed())),
            Attr::Capacity | Attr::Buffered => scan_executor(&*self.raw, attr),
        }
    }
}

/// Scheduler over a plain [`Executor`] without a timer.
///
/// Delayed and periodic requests are rejected. Disposing the scheduler never
/// shuts the executor down; the caller owns it.
pub struct ExecutorScheduler {
    env: SchedulerEnv,
    executor: Arc<dyn ScheduledExecutor>,
    cell: LifecycleCell<()>,
}

impl ExecutorScheduler {
    /// Wrap `executor`.
    pub fn new(env: SchedulerEnv, executor: Arc<dyn Executor>) -> Self {
        Self {
            env,
            executor: Arc::new(UnsupportedScheduledExecutor::new(executor)),
            cell: LifecycleCell::new(),
        }
    }

    fn check(&self) -> Result<(), SchedulerError> {
        self.cell.get_or_start(|| Ok(()), |_| {})
    }
}

impl Disposable for ExecutorScheduler {
    fn dispose(&self) {
        self.cell.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }
}

impl Scheduler for ExecutorScheduler {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        self.check()?;
        direct_schedule(&self.executor, task, Duration::ZERO, &self.env.hooks)
    }

    fn create_worker(&self) -> Arc<dyn Worker> {
        if self.check().is_err() {
            return Arc::new(RejectedWorker::new());
        }
        register(
            self.cell.workers(),
            SerialWorker::new(&self.executor, false, self.cell.workers(), &self.env.hooks),
        )
    }

    fn start(&self) -> Result<(), SchedulerError> {
        self.check()
    }

    fn scan(&self, attr: Attr) -> Option<ScanValue> {
        match attr {
            Attr::Terminated | Attr::Cancelled => Some(ScanValue::Flag(self.is_disposed())),
            Attr::Capacity | Attr::Buffered => scan_executor(&*self.executor, attr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FixedThreadPool, ScheduledThreadPool, ThreadFactory};

    #[test]
    fn test_delegate_shuts_executor_down() {
        let pool = Arc::new(ScheduledThreadPool::new(2, &ThreadFactory::new("svc")).unwrap());
        let scheduler = DelegateServiceScheduler::new(
            SchedulerEnv::new(),
            Arc::clone(&pool) as Arc<dyn ScheduledExecutor>,
        );
        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler
            .schedule_delayed(Box::new(move || tx.send(()).unwrap()), Duration::from_millis(10))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        scheduler.dispose();
        assert!(pool.is_shutdown());
        assert!(scheduler.schedule(Box::new(|| {})).err().unwrap().is_rejected());
    }

    #[test]
    fn test_executor_scheduler_leaves_executor_running() {
        let pool = Arc::new(FixedThreadPool::new(2, &ThreadFactory::new("plain")).unwrap());
        let scheduler =
            ExecutorScheduler::new(SchedulerEnv::new(), Arc::clone(&pool) as Arc<dyn Executor>);
        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler
            .schedule(Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(scheduler
            .schedule_delayed(Box::new(|| {}), Duration::from_millis(5))
            .err()
            .unwrap()
            .is_rejected());
        assert_eq!(scheduler.scan(Attr::Capacity), Some(ScanValue::Count(2)));

        scheduler.dispose();
        assert!(!pool.is_shutdown());
        assert!(scheduler.schedule(Box::new(|| {})).is_err());
    }
}
