//! Deadline-ordered pool.
//!
//! Entries sit in a min-heap keyed by `(deadline, seq)`; the sequence number
//! keeps submissions with equal deadlines in FIFO order. Workers sleep on a
//! condvar until the head entry is due or a new head arrives.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::{PoolCounters, PoolStats, Termination};
use crate::core::error::SchedulerError;
use crate::core::executor::{Executor, ExecutorShape, Runnable, ScheduledExecutor, TaskHandle};
use crate::core::thread_factory::ThreadFactory;

struct Entry {
    deadline: Instant,
    seq: u64,
    handle: Arc<TaskHandle>,
    task: Runnable,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // reversed: BinaryHeap is a max-heap, the earliest deadline must surface
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct DelayQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

struct Shared {
    queue: Mutex<DelayQueue>,
    available: Condvar,
    shutdown: AtomicBool,
    counters: PoolCounters,
    queue_cap: Option<usize>,
    termination: Termination,
}

impl Shared {
    /// Block until an entry is due. `None` once shut down.
    fn next_due(&self) -> Option<Entry> {
        let mut stale = Vec::new();
        let mut queue = self.queue.lock();
        let due = loop {
            if self.shutdown.load(Ordering::Acquire) {
                break None;
            }
            let Some(head) = queue.heap.peek() else {
                self.available.wait(&mut queue);
                continue;
            };
            if head.handle.is_done() {
                stale.extend(queue.heap.pop());
                continue;
            }
            let deadline = head.deadline;
            if deadline <= Instant::now() {
                break queue.heap.pop();
            }
            self.available.wait_until(&mut queue, deadline);
        };
        drop(queue);
        // cancelled tasks are dropped outside the lock, their destructors may block
        if !stale.is_empty() {
            self.counters
                .completed_tasks
                .fetch_add(stale.len() as u64, Ordering::Relaxed);
        }
        drop(stale);
        due
    }

    fn run_worker(&self, worker_id: usize) {
        debug!(worker_id, "Scheduled pool thread started");
        while let Some(entry) = self.next_due() {
            if entry.handle.begin() {
                self.counters.active_tasks.fetch_add(1, Ordering::Relaxed);
                if catch_unwind(AssertUnwindSafe(entry.task)).is_err() {
                    warn!(worker_id, "Task panicked on scheduled pool thread");
                }
                entry.handle.complete();
                self.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
            }
            self.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
        }
        debug!(worker_id, "Scheduled pool thread exiting");
        self.termination.exit();
    }
}

/// A pool of threads executing tasks at their deadline.
pub struct ScheduledThreadPool {
    shared: Arc<Shared>,
    thread_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ScheduledThreadPool {
    /// Create a pool with an unbounded queue.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` for zero threads, or
    /// `SchedulerError::Spawn` if a thread cannot be created.
    pub fn new(thread_count: usize, factory: &ThreadFactory) -> Result<Self, SchedulerError> {
        Self::build(thread_count, None, factory)
    }

    /// Create a pool that refuses submissions once `queue_cap` tasks are
    /// pending.
    ///
    /// # Errors
    ///
    /// Same as [`ScheduledThreadPool::new`].
    pub fn with_queue_cap(
        thread_count: usize,
        queue_cap: usize,
        factory: &ThreadFactory,
    ) -> Result<Self, SchedulerError> {
        Self::build(thread_count, Some(queue_cap), factory)
    }

    fn build(
        thread_count: usize,
        queue_cap: Option<usize>,
        factory: &ThreadFactory,
    ) -> Result<Self, SchedulerError> {
        if thread_count == 0 {
            return Err(SchedulerError::InvalidConfig(
                "thread_count must be greater than 0".into(),
            ));
        }
        let pool = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(DelayQueue::default()),
                available: Condvar::new(),
                shutdown: AtomicBool::new(false),
                counters: PoolCounters::default(),
                queue_cap,
                termination: Termination::default(),
            }),
            thread_count,
            workers: Mutex::new(Vec::with_capacity(thread_count)),
        };

        for worker_id in 0..thread_count {
            let shared = Arc::clone(&pool.shared);
            shared.termination.enter();
            match factory.spawn(move || shared.run_worker(worker_id)) {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shared.termination.exit();
                    pool.shutdown();
                    return Err(e);
                }
            }
        }

        debug!(
            thread_count,
            queue_cap = ?queue_cap,
            prefix = factory.prefix(),
            "ScheduledThreadPool initialized"
        );
        Ok(pool)
    }

    fn enqueue(&self, task: Runnable, delay: Duration) -> Result<Arc<TaskHandle>, SchedulerError> {
        let shared = &*self.shared;
        let handle = Arc::new(TaskHandle::new());
        let mut queue = shared.queue.lock();
        if shared.shutdown.load(Ordering::Acquire) {
            drop(queue);
            shared.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
            return Err(SchedulerError::Rejected("pool has been shut down".into()));
        }
        if let Some(cap) = shared.queue_cap {
            if queue.heap.len() >= cap {
                queue.heap.retain(|e| !e.handle.is_done());
            }
            if queue.heap.len() >= cap {
                drop(queue);
                shared.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                warn!(queue_cap = cap, "ScheduledThreadPool queue capacity reached");
                return Err(SchedulerError::Rejected(format!(
                    "task capacity of {cap} reached"
                )));
            }
        }
        let deadline = Instant::now().checked_add(delay).unwrap_or_else(far_future);
        let seq = queue.next_seq;
        queue.next_seq += 1;
        let becomes_head = queue.heap.peek().is_none_or(|head| deadline < head.deadline);
        queue.heap.push(Entry {
            deadline,
            seq,
            handle: Arc::clone(&handle),
            task,
        });
        shared.counters.submitted_tasks.fetch_add(1, Ordering::AcqRel);
        drop(queue);
        if becomes_head {
            shared.available.notify_all();
        } else {
            shared.available.notify_one();
        }
        Ok(handle)
    }

    /// Number of threads.
    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Submitted futures neither done nor cancelled, running ones included.
    #[must_use]
    pub fn pending(&self) -> usize {
        let queued = self
            .shared
            .queue
            .lock()
            .heap
            .iter()
            .filter(|e| !e.handle.is_done())
            .count();
        let active = self.shared.counters.active_tasks.load(Ordering::Acquire);
        queued + usize::try_from(active).unwrap_or(usize::MAX)
    }

    /// Configured queue capacity, if bounded.
    #[must_use]
    pub fn queue_cap(&self) -> Option<usize> {
        self.shared.queue_cap
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(self.thread_count)
    }

    /// Block until every pool thread has exited.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.termination.wait(timeout)
    }
}

fn far_future() -> Instant {
    // roughly 30 years, well past any reasonable test or process lifetime
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 30)
}

impl Executor for ScheduledThreadPool {
    fn execute(&self, task: Runnable) -> Result<Arc<TaskHandle>, SchedulerError> {
        self.enqueue(task, Duration::ZERO)
    }

    fn shutdown(&self) {
        let drained: Vec<Entry> = {
            let mut queue = self.shared.queue.lock();
            if self.shared.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            queue.heap.drain().collect()
        };
        self.shared.available.notify_all();
        for entry in &drained {
            entry.handle.cancel();
        }
        self.shared
            .counters
            .completed_tasks
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drop(drained);
        self.workers.lock().clear();
        info!(
            thread_count = self.thread_count,
            "ScheduledThreadPool shut down"
        );
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.termination.is_terminated()
    }

    fn shape(&self) -> ExecutorShape<'_> {
        ExecutorShape::Scheduled(self)
    }
}

impl ScheduledExecutor for ScheduledThreadPool {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<Arc<TaskHandle>, SchedulerError> {
        self.enqueue(task, delay)
    }
}

impl Drop for ScheduledThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
