//! Elastic set of single-thread pools, capped in threads and queued tasks.
//!
//! Pools are created on demand up to `thread_cap`. An idle pool is always
//! reused first; past the cap, new work shares the least-busy pool, whose
//! queue refuses more than `task_cap` pending tasks. Every use of a pool
//! (a direct task, a periodic series, a worker) holds a lease on it; once the
//! last lease is released the pool becomes idle, and an evictor shuts down
//! pools that stayed idle longer than `ttl`. Threads may block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::env::SchedulerEnv;
use super::lifecycle::{shutdown_all, Backing, LifecycleCell};
use super::worker::{register, ExecutorWorker, RejectedWorker};
use crate::core::{
    direct_schedule, direct_schedule_periodically, direct_schedule_periodically_then, Attr,
    Disposable, DisposableRef, Executor, PeriodicTask, ScanValue, ScheduledExecutor,
    ScheduledThreadPool, Scheduler, SchedulerError, Task, ThreadFactory, Worker,
};

struct PoolSlot {
    backing: Backing,
    leases: usize,
    idle_since: Instant,
}

#[derive(Default)]
struct ElasticState {
    busy: Vec<PoolSlot>,
    idle: Vec<PoolSlot>,
    creating: usize,
    shutdown: bool,
}

/// The pools of a started scheduler.
struct ElasticServices {
    state: Mutex<ElasticState>,
    evictor: Arc<ScheduledThreadPool>,
    eviction: Mutex<Option<DisposableRef>>,
}

impl ElasticServices {
    fn live(&self) -> usize {
        let state = self.state.lock();
        state.busy.len() + state.idle.len()
    }

    fn release(&self, pool: &Arc<ScheduledThreadPool>) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        let Some(idx) = state
            .busy
            .iter()
            .position(|slot| Arc::ptr_eq(&slot.backing.pool, pool))
        else {
            return;
        };
        let slot = &mut state.busy[idx];
        slot.leases = slot.leases.saturating_sub(1);
        if slot.leases == 0 {
            let mut slot = state.busy.swap_remove(idx);
            slot.idle_since = Instant::now();
            state.idle.push(slot);
        }
    }

    fn evict(&self, ttl: Duration) {
        let expired: Vec<PoolSlot> = {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }
            let now = Instant::now();
            let (expired, kept) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|slot| now.duration_since(slot.idle_since) >= ttl);
            state.idle = kept;
            expired
        };
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Evicting idle bounded elastic threads");
        }
        for slot in expired {
            slot.backing.shutdown();
        }
    }

    fn shutdown(&self) -> Vec<Backing> {
        let slots = {
            let mut state = self.state.lock();
            state.shutdown = true;
            let mut slots = std::mem::take(&mut state.busy);
            slots.append(&mut state.idle);
            slots
        };
        let eviction = self.eviction.lock().take();
        if let Some(eviction) = eviction {
            eviction.dispose();
        }
        self.evictor.shutdown();
        let backings: Vec<Backing> = slots.into_iter().map(|slot| slot.backing).collect();
        for backing in &backings {
            backing.shutdown();
        }
        backings
    }

    fn pending(&self) -> usize {
        let state = self.state.lock();
        state
            .busy
            .iter()
            .chain(state.idle.iter())
            .map(|slot| slot.backing.pending())
            .sum()
    }
}

/// A lease on one pool, released exactly once on drop or on `release`.
struct Lease {
    services: Weak<ElasticServices>,
    pool: Arc<ScheduledThreadPool>,
    released: AtomicBool,
}

impl Lease {
    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(services) = self.services.upgrade() {
            services.release(&self.pool);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Scheduler growing and shrinking a set of single-thread pools.
pub struct BoundedElasticScheduler {
    env: SchedulerEnv,
    thread_cap: usize,
    task_cap: usize,
    ttl: Duration,
    factory: ThreadFactory,
    cell: LifecycleCell<Arc<ElasticServices>>,
}

impl BoundedElasticScheduler {
    /// Create an unstarted scheduler. Caps are clamped to at least 1; a zero
    /// `ttl` disables eviction.
    #[must_use]
    pub fn new(
        env: SchedulerEnv,
        thread_cap: usize,
        task_cap: usize,
        factory: ThreadFactory,
        ttl: Duration,
    ) -> Self {
        Self {
            env,
            thread_cap: thread_cap.max(1),
            task_cap: task_cap.max(1),
            ttl,
            factory,
            cell: LifecycleCell::new(),
        }
    }

    /// Maximum number of threads.
    #[must_use]
    pub const fn thread_cap(&self) -> usize {
        self.thread_cap
    }

    /// Maximum number of pending tasks per thread.
    #[must_use]
    pub const fn task_cap(&self) -> usize {
        self.task_cap
    }

    /// Idle time after which a thread is evicted.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of live threads, busy or idle.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.cell.current().map_or(0, |services| services.live())
    }

    /// Number of idle threads awaiting reuse or eviction.
    #[must_use]
    pub fn idle_threads(&self) -> usize {
        self.cell
            .current()
            .map_or(0, |services| services.state.lock().idle.len())
    }

    fn services(&self) -> Result<Arc<ElasticServices>, SchedulerError> {
        self.cell.get_or_start(
            || self.build_services(),
            |services| {
                services.shutdown();
            },
        )
    }

    fn build_services(&self) -> Result<Arc<ElasticServices>, SchedulerError> {
        let evictor_factory = ThreadFactory::new(format!("{}-evictor", self.factory.prefix()));
        let services = Arc::new(ElasticServices {
            state: Mutex::new(ElasticState::default()),
            evictor: Arc::new(ScheduledThreadPool::new(1, &evictor_factory)?),
            eviction: Mutex::new(None),
        });
        if !self.ttl.is_zero() {
            let weak = Arc::downgrade(&services);
            let ttl = self.ttl;
            let evictor: Arc<dyn ScheduledExecutor> =
                Arc::clone(&services.evictor) as Arc<dyn ScheduledExecutor>;
            let eviction = direct_schedule_periodically(
                &evictor,
                Arc::new(move || {
                    if let Some(services) = weak.upgrade() {
                        services.evict(ttl);
                    }
                }),
                ttl,
                ttl,
                &self.env.hooks,
            )?;
            *services.eviction.lock() = Some(eviction);
        }
        info!(
            prefix = self.factory.prefix(),
            thread_cap = self.thread_cap,
            task_cap = self.task_cap,
            ttl_ms = self.ttl.as_millis(),
            "Bounded elastic scheduler started"
        );
        Ok(services)
    }

    /// Lease a pool: idle first, then a new one below the cap, then the
    /// least busy.
    fn lease(&self) -> Result<(Backing, Lease), SchedulerError> {
        let services = self.services()?;
        let lease_of = |backing: &Backing| Lease {
            services: Arc::downgrade(&services),
            pool: Arc::clone(&backing.pool),
            released: AtomicBool::new(false),
        };

        {
            let mut state = services.state.lock();
            if state.shutdown {
                return Err(SchedulerError::disposed());
            }
            if let Some(mut slot) = state.idle.pop() {
                slot.leases = 1;
                let backing = slot.backing.clone();
                state.busy.push(slot);
                return Ok((backing.clone(), lease_of(&backing)));
            }
            if state.busy.len() + state.creating >= self.thread_cap {
                if let Some(slot) = state.busy.iter_mut().min_by_key(|slot| slot.leases) {
                    slot.leases += 1;
                    let backing = slot.backing.clone();
                    return Ok((backing.clone(), lease_of(&backing)));
                }
            }
            state.creating += 1;
        }

        let built = Backing::build(self, &self.env, &self.factory, Some(self.task_cap));
        let mut state = services.state.lock();
        state.creating -= 1;
        let backing = built?;
        if state.shutdown {
            drop(state);
            backing.shutdown();
            return Err(SchedulerError::disposed());
        }
        state.busy.push(PoolSlot {
            backing: backing.clone(),
            leases: 1,
            idle_since: Instant::now(),
        });
        drop(state);
        debug!(prefix = self.factory.prefix(), "Bounded elastic thread created");
        Ok((backing.clone(), lease_of(&backing)))
    }
}

impl Disposable for BoundedElasticScheduler {
    fn dispose(&self) {
        if let Some(services) = self.cell.dispose() {
            services.shutdown();
            debug!(prefix = self.factory.prefix(), "Bounded elastic scheduler disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }
}

impl Scheduler for BoundedElasticScheduler {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        self.schedule_delayed(task, Duration::ZERO)
    }

    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let (backing, lease) = self.lease()?;
        // the lease goes with the task: released when it ran or was dropped
        let leased: Task = Box::new(move || {
            let _lease = lease;
            task();
        });
        direct_schedule(&backing.executor, leased, delay, &self.env.hooks)
    }

    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let (backing, lease) = self.lease()?;
        // the series owns the lease, so it is released however the series ends
        direct_schedule_periodically_then(
            &backing.executor,
            task,
            initial_delay,
            period,
            &self.env.hooks,
            Box::new(move || lease.release()),
        )
    }

    fn create_worker(&self) -> Arc<dyn Worker> {
        match self.lease() {
            Ok((backing, lease)) => register(
                self.cell.workers(),
                ExecutorWorker::new(&backing.executor, self.cell.workers(), &self.env.hooks)
                    .with_release(move || lease.release()),
            ),
            Err(e) => {
                if !e.is_rejected() {
                    warn!(error = %e, "Bounded elastic worker could not be created");
                }
                Arc::new(RejectedWorker::new())
            }
        }
    }

    fn start(&self) -> Result<(), SchedulerError> {
        self.services().map(|_| ())
    }

    fn dispose_gracefully(&self, timeout: Duration) -> bool {
        match self.cell.dispose() {
            Some(services) => {
                let backings = services.shutdown();
                let deadline = Instant::now() + timeout;
                shutdown_all(&backings, timeout)
                    && services
                        .evictor
                        .await_termination(deadline.saturating_duration_since(Instant::now()))
            }
            None => true,
        }
    }

    fn scan(&self, attr: Attr) -> Option<ScanValue> {
        match attr {
            Attr::Capacity => Some(ScanValue::Count(self.thread_cap)),
            Attr::Buffered => Some(ScanValue::Count(
                self.cell.current().map_or(0, |services| services.pending()),
            )),
            Attr::Terminated | Attr::Cancelled => Some(ScanValue::Flag(self.is_disposed())),
        }
    }
}

impl std::fmt::Debug for BoundedElasticScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedElasticScheduler")
            .field("prefix", &self.factory.prefix())
            .field("thread_cap", &self.thread_cap)
            .field("task_cap", &self.task_cap)
            .field("ttl", &self.ttl)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
