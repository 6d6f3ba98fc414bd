//! Worker implementations.
//!
//! - [`ExecutorWorker`]: bound to one single-thread executor, which already
//!   runs tasks one at a time in submission order.
//! - [`SerialWorker`]: a trampoline over any executor; tasks are queued and
//!   drained by at most one executor thread at a time.
//! - [`RejectedWorker`]: handed out by disposed schedulers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::periodic::{executor_arm, Arm, OneShot, PeriodicChain};
use crate::core::{
    CompositeDisposable, Disposable, DisposableRef, ErrorHooks, PeriodicTask, Runnable,
    ScheduledExecutor, SchedulerError, SimpleDisposable, Task, TaskHandle, Worker,
};

type Release = Box<dyn FnOnce() + Send>;

/// Removes a worker from its scheduler's composite and runs its release
/// callback, once.
struct Membership {
    parent: Weak<CompositeDisposable>,
    release: Mutex<Option<Release>>,
}

impl Membership {
    fn new(parent: &Arc<CompositeDisposable>) -> Self {
        Self {
            parent: Arc::downgrade(parent),
            release: Mutex::new(None),
        }
    }

    fn leave(&self, addr: *const ()) {
        if let Some(parent) = self.parent.upgrade() {
            parent.remove_addr(addr);
        }
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }
}

/// Worker over a single-thread executor.
pub struct ExecutorWorker {
    arm: Arm,
    tasks: Arc<CompositeDisposable>,
    hooks: Arc<ErrorHooks>,
    membership: Membership,
}

impl ExecutorWorker {
    /// Worker submitting to `executor`, tracked by the scheduler's `parent`
    /// composite.
    pub fn new(
        executor: &Arc<dyn ScheduledExecutor>,
        parent: &Arc<CompositeDisposable>,
        hooks: &Arc<ErrorHooks>,
    ) -> Self {
        Self {
            arm: executor_arm(executor),
            tasks: Arc::new(CompositeDisposable::new()),
            hooks: Arc::clone(hooks),
            membership: Membership::new(parent),
        }
    }

    /// Run `release` once, when the worker is disposed.
    #[must_use]
    pub fn with_release(self, release: impl FnOnce() + Send + 'static) -> Self {
        *self.membership.release.lock() = Some(Box::new(release));
        self
    }

    /// Outstanding tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.size()
    }
}

impl Disposable for ExecutorWorker {
    fn dispose(&self) {
        if self.tasks.is_disposed() {
            return;
        }
        self.tasks.dispose();
        self.membership.leave(std::ptr::from_ref(self).cast::<()>());
    }

    fn is_disposed(&self) -> bool {
        self.tasks.is_disposed()
    }
}

impl Worker for ExecutorWorker {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        OneShot::submit(&self.arm, task, Duration::ZERO, Some(&self.tasks), &self.hooks)
    }

    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        OneShot::submit(&self.arm, task, delay, Some(&self.tasks), &self.hooks)
    }

    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        PeriodicChain::submit(
            Arc::clone(&self.arm),
            task,
            initial_delay,
            period,
            Some(&self.tasks),
            &self.hooks,
        )
    }
}

struct Trampoline {
    executor: Arc<dyn ScheduledExecutor>,
    queue: Mutex<VecDeque<(Arc<TaskHandle>, Runnable)>>,
    wip: AtomicUsize,
}

impl Trampoline {
    fn enqueue(
        self: &Arc<Self>,
        handle: Arc<TaskHandle>,
        runnable: Runnable,
    ) -> Result<(), SchedulerError> {
        self.queue.lock().push_back((handle, runnable));
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return Ok(());
        }
        let this = Arc::clone(self);
        if let Err(e) = self.executor.execute(Box::new(move || this.drain())) {
            let dropped: Vec<_> = self.queue.lock().drain(..).collect();
            for (handle, _) in &dropped {
                handle.cancel();
            }
            self.wip.store(0, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    fn submit(
        self: &Arc<Self>,
        runnable: Runnable,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        let entry = Arc::new(TaskHandle::new());
        if delay.is_zero() {
            self.enqueue(Arc::clone(&entry), runnable)?;
            return Ok(entry);
        }

        let queued = Arc::clone(&entry);
        let weak = Arc::downgrade(self);
        let timer = self.executor.schedule(
            Box::new(move || {
                if let Some(trampoline) = weak.upgrade() {
                    // a refused drain already cancelled the entry
                    let _ = trampoline.enqueue(queued, runnable);
                }
            }),
            delay,
        )?;
        let both = CompositeDisposable::new();
        both.add(timer);
        both.add(entry);
        Ok(Arc::new(both))
    }

    fn drain(&self) {
        let mut missed = 1;
        loop {
            loop {
                let next = self.queue.lock().pop_front();
                let Some((handle, runnable)) = next else {
                    break;
                };
                if handle.begin() {
                    runnable();
                    handle.complete();
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

/// Trampolining worker over an arbitrary executor.
///
/// Tasks run strictly one at a time in submission order even when the
/// executor has many threads. Delayed tasks use the executor's timer and
/// join the queue when due; on an executor without a timer they are rejected.
pub struct SerialWorker {
    // the arm only holds it weakly
    _trampoline: Arc<Trampoline>,
    arm: Arm,
    tasks: Arc<CompositeDisposable>,
    hooks: Arc<ErrorHooks>,
    timed: bool,
    membership: Membership,
}

impl SerialWorker {
    /// Worker over `executor`. `timed` tells whether the executor can defer
    /// work.
    pub fn new(
        executor: &Arc<dyn ScheduledExecutor>,
        timed: bool,
        parent: &Arc<CompositeDisposable>,
        hooks: &Arc<ErrorHooks>,
    ) -> Self {
        let trampoline = Arc::new(Trampoline {
            executor: Arc::clone(executor),
            queue: Mutex::new(VecDeque::new()),
            wip: AtomicUsize::new(0),
        });
        Self {
            arm: Self::trampoline_arm(&trampoline),
            _trampoline: trampoline,
            tasks: Arc::new(CompositeDisposable::new()),
            hooks: Arc::clone(hooks),
            timed,
            membership: Membership::new(parent),
        }
    }

    fn trampoline_arm(trampoline: &Arc<Trampoline>) -> Arm {
        let weak = Arc::downgrade(trampoline);
        Arc::new(move |runnable: Runnable, delay: Duration| {
            let trampoline = weak.upgrade().ok_or_else(SchedulerError::disposed)?;
            trampoline.submit(runnable, delay)
        })
    }

    fn check_timed(&self, delay: Duration) -> Result<(), SchedulerError> {
        if delay.is_zero() || self.timed {
            Ok(())
        } else {
            Err(SchedulerError::not_time_capable())
        }
    }
}

impl Disposable for SerialWorker {
    fn dispose(&self) {
        if self.tasks.is_disposed() {
            return;
        }
        self.tasks.dispose();
        self.membership.leave(std::ptr::from_ref(self).cast::<()>());
        debug!("Serial worker disposed");
    }

    fn is_disposed(&self) -> bool {
        self.tasks.is_disposed()
    }
}

impl Worker for SerialWorker {
    fn schedule(&self, task: Task) -> Result<DisposableRef, SchedulerError> {
        OneShot::submit(&self.arm, task, Duration::ZERO, Some(&self.tasks), &self.hooks)
    }

    fn schedule_delayed(
        &self,
        task: Task,
        delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        if self.is_disposed() {
            return Err(SchedulerError::disposed());
        }
        self.check_timed(delay)?;
        OneShot::submit(&self.arm, task, delay, Some(&self.tasks), &self.hooks)
    }

    fn schedule_periodically(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        if self.is_disposed() {
            return Err(SchedulerError::disposed());
        }
        self.check_timed(initial_delay)?;
        self.check_timed(period)?;
        PeriodicChain::submit(
            Arc::clone(&self.arm),
            task,
            initial_delay,
            period,
            Some(&self.tasks),
            &self.hooks,
        )
    }
}

/// Worker that rejects everything; what a disposed scheduler hands out.
#[derive(Debug)]
pub struct RejectedWorker {
    disposed: SimpleDisposable,
}

impl RejectedWorker {
    /// An already disposed worker.
    #[must_use]
    pub fn new() -> Self {
        let disposed = SimpleDisposable::new();
        disposed.dispose();
        Self { disposed }
    }
}

impl Default for RejectedWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for RejectedWorker {
    fn dispose(&self) {}

    fn is_disposed(&self) -> bool {
        self.disposed.is_disposed()
    }
}

impl Worker for RejectedWorker {
    fn schedule(&self, _task: Task) -> Result<DisposableRef, SchedulerError> {
        Err(SchedulerError::disposed())
    }

    fn schedule_delayed(
        &self,
        _task: Task,
        _delay: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        Err(SchedulerError::disposed())
    }

    fn schedule_periodically(
        &self,
        _task: PeriodicTask,
        _initial_delay: Duration,
        _period: Duration,
    ) -> Result<DisposableRef, SchedulerError> {
        Err(SchedulerError::disposed())
    }
}

/// Register `worker` with the scheduler's composite, or hand out a
/// [`RejectedWorker`] if the scheduler is already disposed.
pub(crate) fn register<W: Worker + 'static>(
    parent: &Arc<CompositeDisposable>,
    worker: W,
) -> Arc<dyn Worker> {
    let worker = Arc::new(worker);
    if parent.add(Arc::clone(&worker) as DisposableRef) {
        worker
    } else {
        Arc::new(RejectedWorker::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ScheduledThreadPool, ThreadFactory};
    use std::time::Instant;

    fn multi_thread_executor() -> Arc<dyn ScheduledExecutor> {
        Arc::new(ScheduledThreadPool::new(4, &ThreadFactory::new("serial-test")).unwrap())
    }

    #[test]
    fn test_serial_worker_preserves_order_on_many_threads() {
        let exec = multi_thread_executor();
        let parent = Arc::new(CompositeDisposable::new());
        let hooks = Arc::new(ErrorHooks::new());
        let worker = SerialWorker::new(&exec, true, &parent, &hooks);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = crossbeam_channel::bounded(1);
        for i in 0..200 {
            let seen = Arc::clone(&seen);
            worker
                .schedule(Box::new(move || seen.lock().push(i)))
                .unwrap();
        }
        worker.schedule(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(*seen.lock(), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_serial_worker_recursive_schedule() {
        let exec = multi_thread_executor();
        let parent = Arc::new(CompositeDisposable::new());
        let hooks = Arc::new(ErrorHooks::new());
        let worker: Arc<dyn Worker> = Arc::new(SerialWorker::new(&exec, true, &parent, &hooks));

        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&worker);
        worker
            .schedule(Box::new(move || {
                inner
                    .schedule(Box::new(move || tx.send(()).unwrap()))
                    .unwrap();
            }))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_serial_worker_delayed() {
        let exec = multi_thread_executor();
        let parent = Arc::new(CompositeDisposable::new());
        let hooks = Arc::new(ErrorHooks::new());
        let worker = SerialWorker::new(&exec, true, &parent, &hooks);

        let start = Instant::now();
        let (tx, rx) = crossbeam_channel::bounded(1);
        worker
            .schedule_delayed(Box::new(move || tx.send(()).unwrap()), Duration::from_millis(50))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_untimed_serial_worker_rejects_delay() {
        let exec = multi_thread_executor();
        let parent = Arc::new(CompositeDisposable::new());
        let hooks = Arc::new(ErrorHooks::new());
        let worker = SerialWorker::new(&exec, false, &parent, &hooks);

        let err = worker
            .schedule_delayed(Box::new(|| {}), Duration::from_millis(5))
            .err()
            .unwrap();
        assert!(err.is_rejected());
        assert!(worker.schedule_delayed(Box::new(|| {}), Duration::ZERO).is_ok());
    }

    #[test]
    fn test_dispose_leaves_parent_and_releases() {
        let exec = multi_thread_executor();
        let parent = Arc::new(CompositeDisposable::new());
        let hooks = Arc::new(ErrorHooks::new());
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let worker = register(
            &parent,
            ExecutorWorker::new(&exec, &parent, &hooks).with_release(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(parent.size(), 1);

        worker.dispose();
        worker.dispose();
        assert_eq!(parent.size(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(worker.schedule(Box::new(|| {})).err().unwrap().is_rejected());
    }

    #[test]
    fn test_register_on_disposed_parent_gives_rejected_worker() {
        let exec = multi_thread_executor();
        let parent = Arc::new(CompositeDisposable::new());
        let hooks = Arc::new(ErrorHooks::new());
        parent.dispose();
        let worker = register(&parent, ExecutorWorker::new(&exec, &parent, &hooks));
        assert!(worker.is_disposed());
        assert!(worker.schedule(Box::new(|| {})).is_err());
    }
}
