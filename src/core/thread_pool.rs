//! Thread pools backing the schedulers.
//!
//! - [`FixedThreadPool`]: N threads draining a shared FIFO queue.
//! - [`ScheduledThreadPool`]: N threads executing deadline-ordered futures,
//!   the primitive every standard scheduler and all delayed and periodic
//!   scheduling is built on.
//!
//! Both pools spawn their threads through a
//! [`ThreadFactory`](crate::core::ThreadFactory), never join in `Drop`, and
//! cancel queued work on `shutdown`.

mod fixed;
mod scheduled;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub use fixed::FixedThreadPool;
pub use scheduled::ScheduledThreadPool;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub thread_count: usize,
    /// Currently executing tasks.
    pub active_tasks: u64,
    /// Total tasks accepted.
    pub submitted_tasks: u64,
    /// Tasks finished, whether they ran or were cancelled.
    pub completed_tasks: u64,
    /// Tasks refused at submission.
    pub rejected_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub rejected_tasks: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, thread_count: usize) -> PoolStats {
        PoolStats {
            thread_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
        }
    }

    /// Accepted but not yet finished: queued plus running.
    pub fn outstanding(&self) -> usize {
        let submitted = self.submitted_tasks.load(Ordering::Acquire);
        let completed = self.completed_tasks.load(Ordering::Acquire);
        usize::try_from(submitted.saturating_sub(completed)).unwrap_or(usize::MAX)
    }
}

/// Tracks live worker threads so shutdown can be awaited.
#[derive(Debug, Default)]
pub(crate) struct Termination {
    live: Mutex<usize>,
    exited: Condvar,
}

impl Termination {
    pub fn enter(&self) {
        *self.live.lock() += 1;
    }

    pub fn exit(&self) {
        let mut live = self.live.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.exited.notify_all();
        }
    }

    pub fn is_terminated(&self) -> bool {
        *self.live.lock() == 0
    }

    /// Wait until every thread exited. Returns `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.live.lock();
        while *live > 0 {
            if self.exited.wait_until(&mut live, deadline).timed_out() {
                return *live == 0;
            }
        }
        true
    }
}
