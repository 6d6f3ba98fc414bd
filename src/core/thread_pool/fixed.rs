//! Fixed-size pool over a crossbeam channel.
//!
//! Workers block on `recv`; dropping the sender on shutdown unblocks them
//! naturally. Jobs still queued at shutdown are cancelled.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{PoolCounters, PoolStats, Termination};
use crate::core::error::SchedulerError;
use crate::core::executor::{Executor, ExecutorShape, Runnable, TaskHandle};
use crate::core::thread_factory::ThreadFactory;

struct Job {
    handle: Arc<TaskHandle>,
    task: Runnable,
}

/// A pool of `thread_count` threads sharing one FIFO queue.
pub struct FixedThreadPool {
    thread_count: usize,
    task_tx: Mutex<Option<Sender<Job>>>,
    task_rx: Receiver<Job>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    termination: Arc<Termination>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FixedThreadPool {
    /// Create a pool with an unbounded queue.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for zero threads, or
    /// `SchedulerError::Spawn` if a thread cannot be created.
    pub fn new(thread_count: usize, factory: &ThreadFactory) -> Result<Self, SchedulerError> {
        Self::build(thread_count, None, factory)
    }

    /// Create a pool whose queue holds at most `queue_capacity` jobs.
    ///
    /// # Errors
    ///
    /// Same as [`FixedThreadPool::new`].
    pub fn bounded(
        thread_count: usize,
        queue_capacity: usize,
        factory: &ThreadFactory,
    ) -> Result<Self, SchedulerError> {
        Self::build(thread_count, Some(queue_capacity), factory)
    }

    fn build(
        thread_count: usize,
        queue_capacity: Option<usize>,
        factory: &ThreadFactory,
    ) -> Result<Self, SchedulerError> {
        if thread_count == 0 {
            return Err(SchedulerError::InvalidConfig(
                "thread_count must be greater than 0".into(),
            ));
        }
        let (task_tx, task_rx) = match queue_capacity {
            Some(cap) => bounded::<Job>(cap),
            None => unbounded::<Job>(),
        };
        let pool = Self {
            thread_count,
            task_tx: Mutex::new(Some(task_tx)),
            task_rx,
            counters: Arc::new(PoolCounters::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            termination: Arc::new(Termination::default()),
            workers: Mutex::new(Vec::with_capacity(thread_count)),
        };

        for worker_id in 0..thread_count {
            match pool.spawn_worker(worker_id, factory) {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }

        info!(
            thread_count,
            queue_capacity = ?queue_capacity,
            prefix = factory.prefix(),
            "FixedThreadPool initialized"
        );
        Ok(pool)
    }

    fn spawn_worker(
        &self,
        worker_id: usize,
        factory: &ThreadFactory,
    ) -> Result<JoinHandle<()>, SchedulerError> {
        let task_rx = self.task_rx.clone();
        let counters = Arc::clone(&self.counters);
        let shutdown = Arc::clone(&self.shutdown);
        let termination = Arc::clone(&self.termination);
        termination.enter();

        let spawned = factory.spawn(move || {
            debug!(worker_id, "Pool thread started");
            // recv fails once the sender is dropped
            while let Ok(job) = task_rx.recv() {
                if shutdown.load(Ordering::Acquire) {
                    job.handle.cancel();
                } else if job.handle.begin() {
                    counters.active_tasks.fetch_add(1, Ordering::Relaxed);
                    if catch_unwind(AssertUnwindSafe(job.task)).is_err() {
                        warn!(worker_id, "Task panicked on pool thread");
                    }
                    job.handle.complete();
                    counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
                }
                // counted once the job is off the thread, so pending() includes running jobs
                counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
            }
            debug!(worker_id, "Pool thread exiting");
            termination.exit();
        });
        if spawned.is_err() {
            self.termination.exit();
        }
        spawned
    }

    /// Number of threads.
    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Jobs accepted and not finished (queued plus running).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.counters.outstanding()
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.thread_count)
    }

    /// Block until every pool thread has exited.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.termination.wait(timeout)
    }
}

impl Executor for FixedThreadPool {
    fn execute(&self, task: Runnable) -> Result<Arc<TaskHandle>, SchedulerError> {
        let guard = self.task_tx.lock();
        let Some(task_tx) = guard.as_ref() else {
            self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
            return Err(SchedulerError::Rejected("pool has been shut down".into()));
        };
        let handle = Arc::new(TaskHandle::new());
        let job = Job {
            handle: Arc::clone(&handle),
            task,
        };
        // counted before sending so a fast worker never completes ahead of it
        self.counters.submitted_tasks.fetch_add(1, Ordering::AcqRel);
        match task_tx.try_send(job) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Full(_)) => {
                self.counters.submitted_tasks.fetch_sub(1, Ordering::AcqRel);
                self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                warn!("FixedThreadPool queue is full");
                Err(SchedulerError::Rejected("pool queue is full".into()))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.submitted_tasks.fetch_sub(1, Ordering::AcqRel);
                self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                Err(SchedulerError::Rejected("pool has been shut down".into()))
            }
        }
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Drop the sender to unblock all workers waiting on recv()
        self.task_tx.lock().take();
        while let Ok(job) = self.task_rx.try_recv() {
            self.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
            job.handle.cancel();
        }
        self.workers.lock().clear();
        debug!(thread_count = self.thread_count, "FixedThreadPool shut down");
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.termination.is_terminated()
    }

    fn shape(&self) -> ExecutorShape<'_> {
        ExecutorShape::Pool(self)
    }
}

impl Drop for FixedThreadPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join; threads exit once the queue closes
        self.shutdown();
    }
}
