//! Delayed and periodic dispatch over a deadline-capable executor.
//!
//! A periodic request never relies on a native fixed-rate timer. It is a
//! chain of single submissions in which each run re-arms the next one once it
//! completed, all covered by one umbrella handle:
//!
//! - `period == 0`: the next run is submitted with no delay right after the
//!   previous one returned, so runs are back-to-back and never overlap.
//! - `period > 0`: fixed rate. The next deadline advances by `period` from
//!   the previous deadline; an overrunning task makes the next run start
//!   immediately.
//!
//! The umbrella keeps two slots, one for the first submission and one for the
//! latest re-arm, so disposing it cancels whichever is pending. Worker-scoped
//! variants register the umbrella in the worker's composite *before*
//! submitting anything: a disposed worker therefore rejects without ever
//! reaching the executor.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::disposable::{CompositeDisposable, Disposable, DisposableRef, FutureSlot};
use super::error::SchedulerError;
use super::executor::{self, Runnable, ScheduledExecutor};
use super::hooks::{run_guarded, ErrorHooks};
use super::scheduler::{PeriodicTask, Task};

/// Submits a runnable after a delay and returns its cancellation handle.
pub(crate) type Arm =
    Arc<dyn Fn(Runnable, Duration) -> Result<DisposableRef, SchedulerError> + Send + Sync>;

/// Arm submitting straight to `executor`. The executor is held weakly so a
/// pending chain never keeps its scheduler's threads alive.
pub(crate) fn executor_arm(executor: &Arc<dyn ScheduledExecutor>) -> Arm {
    let executor = Arc::downgrade(executor);
    Arc::new(move |runnable: Runnable, delay: Duration| {
        let executor = executor.upgrade().ok_or_else(SchedulerError::disposed)?;
        executor::submit(&*executor, runnable, delay).map(|handle| handle as DisposableRef)
    })
}

/// Run `task` on `executor` after `delay`.
///
/// # Errors
///
/// `SchedulerError::Rejected` if the executor refuses the task.
pub fn direct_schedule(
    executor: &Arc<dyn ScheduledExecutor>,
    task: Task,
    delay: Duration,
    hooks: &Arc<ErrorHooks>,
) -> Result<DisposableRef, SchedulerError> {
    OneShot::submit(&executor_arm(executor), task, delay, None, hooks)
}

/// Fire `task` on `executor` after `initial_delay`, then every `period`.
///
/// # Errors
///
/// `SchedulerError::Rejected` if the executor refuses the first submission.
pub fn direct_schedule_periodically(
    executor: &Arc<dyn ScheduledExecutor>,
    task: PeriodicTask,
    initial_delay: Duration,
    period: Duration,
    hooks: &Arc<ErrorHooks>,
) -> Result<DisposableRef, SchedulerError> {
    PeriodicChain::submit(
        executor_arm(executor),
        task,
        initial_delay,
        period,
        None,
        hooks,
    )
}

/// Like [`direct_schedule_periodically`], running `on_dispose` once when the
/// series ends, whether disposed by its holder or stopped by a refused re-arm.
pub(crate) fn direct_schedule_periodically_then(
    executor: &Arc<dyn ScheduledExecutor>,
    task: PeriodicTask,
    initial_delay: Duration,
    period: Duration,
    hooks: &Arc<ErrorHooks>,
    on_dispose: OnDispose,
) -> Result<DisposableRef, SchedulerError> {
    PeriodicChain::start(
        executor_arm(executor),
        task,
        initial_delay,
        period,
        None,
        hooks,
        Some(on_dispose),
    )
}

/// Run `task` on `executor` after `delay`, tracked by `parent`.
///
/// The task removes itself from `parent` once it completed.
///
/// # Errors
///
/// `SchedulerError::Rejected` if `parent` is disposed (nothing is submitted)
/// or the executor refuses the task.
pub fn worker_schedule(
    executor: &Arc<dyn ScheduledExecutor>,
    parent: &Arc<CompositeDisposable>,
    task: Task,
    delay: Duration,
    hooks: &Arc<ErrorHooks>,
) -> Result<DisposableRef, SchedulerError> {
    OneShot::submit(&executor_arm(executor), task, delay, Some(parent), hooks)
}

/// Periodic variant of [`worker_schedule`].
///
/// # Errors
///
/// Same as [`worker_schedule`].
pub fn worker_schedule_periodically(
    executor: &Arc<dyn ScheduledExecutor>,
    parent: &Arc<CompositeDisposable>,
    task: PeriodicTask,
    initial_delay: Duration,
    period: Duration,
    hooks: &Arc<ErrorHooks>,
) -> Result<DisposableRef, SchedulerError> {
    PeriodicChain::submit(
        executor_arm(executor),
        task,
        initial_delay,
        period,
        Some(parent),
        hooks,
    )
}

const ACTIVE: u8 = 0;
const FINISHED: u8 = 1;
const DISPOSED: u8 = 2;

/// A single delayed submission.
pub(crate) struct OneShot {
    task: Mutex<Option<Task>>,
    future: FutureSlot,
    state: AtomicU8,
    parent: Option<Weak<CompositeDisposable>>,
    hooks: Arc<ErrorHooks>,
}

impl OneShot {
    pub(crate) fn submit(
        arm: &Arm,
        task: Task,
        delay: Duration,
        parent: Option<&Arc<CompositeDisposable>>,
        hooks: &Arc<ErrorHooks>,
    ) -> Result<DisposableRef, SchedulerError> {
        let this = Arc::new(Self {
            task: Mutex::new(Some(task)),
            future: FutureSlot::new(),
            state: AtomicU8::new(ACTIVE),
            parent: parent.map(Arc::downgrade),
            hooks: Arc::clone(hooks),
        });
        if let Some(parent) = parent {
            if !parent.add(Arc::clone(&this) as DisposableRef) {
                return Err(SchedulerError::disposed());
            }
        }

        let runner = Arc::clone(&this);
        match arm(Box::new(move || runner.run()), delay) {
            Ok(future) => {
                this.future.set(future);
                Ok(this as DisposableRef)
            }
            Err(e) => {
                this.dispose();
                Err(e)
            }
        }
    }

    fn run(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        if self.state.load(Ordering::Acquire) != ACTIVE {
            return;
        }
        run_guarded(task, &self.hooks);
        if self
            .state
            .compare_exchange(ACTIVE, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.detach();
        }
    }

    fn detach(&self) {
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.remove_addr(std::ptr::from_ref(self).cast::<()>());
        }
    }
}

impl Disposable for OneShot {
    fn dispose(&self) {
        if self
            .state
            .compare_exchange(ACTIVE, DISPOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.future.dispose();
        let dropped = self.task.lock().take();
        drop(dropped);
        self.detach();
    }

    fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) != ACTIVE
    }
}

/// Callback run when a periodic series ends.
pub(crate) type OnDispose = Box<dyn FnOnce() + Send>;

/// The self re-arming chain behind one periodic request.
pub(crate) struct PeriodicChain {
    task: PeriodicTask,
    period: Duration,
    next_run: Mutex<Instant>,
    first: FutureSlot,
    rest: FutureSlot,
    disposed: AtomicBool,
    arm: Arm,
    parent: Option<Weak<CompositeDisposable>>,
    hooks: Arc<ErrorHooks>,
    on_dispose: Mutex<Option<OnDispose>>,
}

impl PeriodicChain {
    pub(crate) fn submit(
        arm: Arm,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
        parent: Option<&Arc<CompositeDisposable>>,
        hooks: &Arc<ErrorHooks>,
    ) -> Result<DisposableRef, SchedulerError> {
        Self::start(arm, task, initial_delay, period, parent, hooks, None)
    }

    fn start(
        arm: Arm,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
        parent: Option<&Arc<CompositeDisposable>>,
        hooks: &Arc<ErrorHooks>,
        on_dispose: Option<OnDispose>,
    ) -> Result<DisposableRef, SchedulerError> {
        let now = Instant::now();
        let this = Arc::new(Self {
            task,
            period,
            next_run: Mutex::new(now.checked_add(initial_delay).unwrap_or(now)),
            first: FutureSlot::new(),
            rest: FutureSlot::new(),
            disposed: AtomicBool::new(false),
            arm,
            parent: parent.map(Arc::downgrade),
            hooks: Arc::clone(hooks),
            on_dispose: Mutex::new(on_dispose),
        });
        if let Some(parent) = parent {
            if !parent.add(Arc::clone(&this) as DisposableRef) {
                this.dispose();
                return Err(SchedulerError::disposed());
            }
        }

        match (this.arm)(Self::runner(&this), initial_delay) {
            Ok(future) => {
                this.first.set(future);
                Ok(this as DisposableRef)
            }
            Err(e) => {
                this.dispose();
                Err(e)
            }
        }
    }

    fn runner(this: &Arc<Self>) -> Runnable {
        let chain = Arc::clone(this);
        Box::new(move || chain.fire())
    }

    fn fire(self: Arc<Self>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        run_guarded(|| (self.task)(), &self.hooks);
        if self.disposed.load(Ordering::Acquire) {
            return;
        }

        let delay = if self.period.is_zero() {
            Duration::ZERO
        } else {
            let mut next_run = self.next_run.lock();
            *next_run += self.period;
            next_run.saturating_duration_since(Instant::now())
        };
        match (self.arm)(Self::runner(&self), delay) {
            Ok(future) => self.rest.set(future),
            Err(e) => {
                if !self.disposed.load(Ordering::Acquire) {
                    warn!(error = %e, "Periodic task could not be re-armed, stopping the series");
                }
                self.dispose();
            }
        }
    }
}

impl Disposable for PeriodicChain {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.first.dispose();
        self.rest.dispose();
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.remove_addr(std::ptr::from_ref(self).cast::<()>());
        }
        let on_dispose = self.on_dispose.lock().take();
        if let Some(on_dispose) = on_dispose {
            on_dispose();
        }
        debug!(period_ms = self.period.as_millis(), "Periodic series disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
