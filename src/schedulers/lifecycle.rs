//! Uninitialized → running → disposed state shared by the schedulers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::env::SchedulerEnv;
use crate::core::{
    CompositeDisposable, Disposable, DisposableRef, Executor, ScheduledExecutor,
    ScheduledThreadPool, Scheduler, SchedulerError, ThreadFactory,
};

enum State<T> {
    Uninitialized,
    Running(T),
    Disposed,
}

/// Lazily started resources plus the workers handed out so far.
///
/// Disposal is terminal: a disposed cell never starts again.
pub(crate) struct LifecycleCell<T> {
    state: RwLock<State<T>>,
    workers: Arc<CompositeDisposable>,
}

impl<T: Clone> LifecycleCell<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::Uninitialized),
            workers: Arc::new(CompositeDisposable::new()),
        }
    }

    /// The running resources, building them on first use.
    ///
    /// `build` runs outside the lock; if another thread won the race the
    /// freshly built resources are passed to `discard`.
    pub fn get_or_start<B, D>(&self, build: B, discard: D) -> Result<T, SchedulerError>
    where
        B: FnOnce() -> Result<T, SchedulerError>,
        D: FnOnce(&T),
    {
        match &*self.state.read() {
            State::Running(resources) => return Ok(resources.clone()),
            State::Disposed => return Err(SchedulerError::disposed()),
            State::Uninitialized => {}
        }

        let built = build()?;
        let mut state = self.state.write();
        match &*state {
            State::Uninitialized => {
                *state = State::Running(built.clone());
                Ok(built)
            }
            State::Running(existing) => {
                let existing = existing.clone();
                drop(state);
                discard(&built);
                Ok(existing)
            }
            State::Disposed => {
                drop(state);
                discard(&built);
                Err(SchedulerError::disposed())
            }
        }
    }

    /// Running resources without starting.
    pub fn current(&self) -> Option<T> {
        match &*self.state.read() {
            State::Running(resources) => Some(resources.clone()),
            _ => None,
        }
    }

    /// Move to disposed, returning the resources to tear down if they were
    /// running. Workers are disposed as well.
    pub fn dispose(&self) -> Option<T> {
        let previous = std::mem::replace(&mut *self.state.write(), State::Disposed);
        self.workers.dispose();
        match previous {
            State::Running(resources) => Some(resources),
            _ => None,
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(*self.state.read(), State::Disposed)
    }

    /// Composite tracking the workers handed out.
    pub const fn workers(&self) -> &Arc<CompositeDisposable> {
        &self.workers
    }

    /// Track `worker`. `false` once disposed.
    #[allow(dead_code)]
    pub fn register_worker(&self, worker: DisposableRef) -> bool {
        self.workers.add(worker)
    }
}

/// A single-thread scheduled pool and the decorated executor in front of it.
#[derive(Clone)]
pub(crate) struct Backing {
    pub pool: Arc<ScheduledThreadPool>,
    pub executor: Arc<dyn ScheduledExecutor>,
}

impl Backing {
    pub fn build(
        scheduler: &dyn Scheduler,
        env: &SchedulerEnv,
        factory: &ThreadFactory,
        queue_cap: Option<usize>,
    ) -> Result<Self, SchedulerError> {
        let pool = Arc::new(match queue_cap {
            Some(cap) => ScheduledThreadPool::with_queue_cap(1, cap, factory)?,
            None => ScheduledThreadPool::new(1, factory)?,
        });
        let executor = env
            .decorators
            .decorate(scheduler, Arc::clone(&pool) as Arc<dyn ScheduledExecutor>);
        Ok(Self { pool, executor })
    }

    pub fn shutdown(&self) {
        self.executor.shutdown();
        self.pool.shutdown();
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.pool.await_termination(timeout)
    }

    pub fn pending(&self) -> usize {
        self.pool.pending()
    }
}

/// Shut every backing down and wait for their threads within one deadline.
pub(crate) fn shutdown_all(backings: &[Backing], timeout: Duration) -> bool {
    for backing in backings {
        backing.shutdown();
    }
    let deadline = std::time::Instant::now() + timeout;
    backings.iter().all(|b| {
        b.await_termination(deadline.saturating_duration_since(std::time::Instant::now()))
    })
}
