//! Integration tests for delayed and periodic dispatch.
//!
//! Most tests drive a manual executor that records every submission and runs
//! nothing until told to, so re-arm delays can be asserted exactly.

use parking_lot::Mutex;
use prometheus_schedulers::config::SchedulersConfig;
use prometheus_schedulers::core::{
    direct_schedule, direct_schedule_periodically, Disposable, DisposableRef, ErrorHooks, Executor,
    Runnable, ScheduledExecutor, Scheduler, SchedulerError, TaskHandle,
};
use prometheus_schedulers::schedulers::Schedulers;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

// ============================================================================
// MANUAL EXECUTOR
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submission {
    Immediate,
    Delayed(Duration),
}

#[derive(Default)]
struct ManualExecutor {
    queue: Mutex<VecDeque<(Runnable, Arc<TaskHandle>)>>,
    log: Mutex<Vec<Submission>>,
    shutdown: AtomicBool,
}

impl ManualExecutor {
    fn push(&self, task: Runnable, kind: Submission) -> Result<Arc<TaskHandle>, SchedulerError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SchedulerError::Rejected("manual executor shut down".into()));
        }
        let handle = Arc::new(TaskHandle::new());
        self.queue.lock().push_back((task, Arc::clone(&handle)));
        self.log.lock().push(kind);
        Ok(handle)
    }

    /// Run the oldest submission; returns whether it actually ran.
    fn run_next(&self) -> bool {
        let Some((task, handle)) = self.queue.lock().pop_front() else {
            return false;
        };
        if !handle.begin() {
            return false;
        }
        task();
        handle.complete();
        true
    }

    fn log(&self) -> Vec<Submission> {
        self.log.lock().clone()
    }

    fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, task: Runnable) -> Result<Arc<TaskHandle>, SchedulerError> {
        self.push(task, Submission::Immediate)
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl ScheduledExecutor for ManualExecutor {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<Arc<TaskHandle>, SchedulerError> {
        self.push(task, Submission::Delayed(delay))
    }
}

fn setup() -> (Arc<ManualExecutor>, Arc<dyn ScheduledExecutor>, Arc<ErrorHooks>) {
    let manual = Arc::new(ManualExecutor::default());
    let exec = Arc::clone(&manual) as Arc<dyn ScheduledExecutor>;
    (manual, exec, Arc::new(ErrorHooks::new()))
}

fn counter() -> (Arc<AtomicUsize>, Arc<dyn Fn() + Send + Sync>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&runs);
    (runs, Arc::new(move || {
        r.fetch_add(1, Ordering::SeqCst);
    }))
}

// ============================================================================
// ONE-SHOT
// ============================================================================

#[test]
fn test_zero_delay_submits_immediately() {
    let (manual, exec, hooks) = setup();
    direct_schedule(&exec, Box::new(|| {}), Duration::ZERO, &hooks).unwrap();
    direct_schedule(&exec, Box::new(|| {}), Duration::from_millis(30), &hooks).unwrap();
    assert_eq!(
        manual.log(),
        vec![
            Submission::Immediate,
            Submission::Delayed(Duration::from_millis(30))
        ]
    );
}

#[test]
fn test_disposed_one_shot_never_runs() {
    let (manual, exec, hooks) = setup();
    let ran = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&ran);
    let handle = direct_schedule(
        &exec,
        Box::new(move || r.store(true, Ordering::SeqCst)),
        Duration::ZERO,
        &hooks,
    )
    .unwrap();
    handle.dispose();
    handle.dispose();
    assert!(handle.is_disposed());
    assert!(!manual.run_next());
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_rejection_is_synchronous() {
    let (manual, exec, hooks) = setup();
    manual.shutdown();
    let err = direct_schedule(&exec, Box::new(|| {}), Duration::ZERO, &hooks)
        .err()
        .unwrap();
    assert!(err.is_rejected());
}

// ============================================================================
// PERIODIC
// ============================================================================

#[test]
fn test_zero_period_resubmits_after_each_run() {
    let (manual, exec, hooks) = setup();
    let (runs, task) = counter();
    let handle =
        direct_schedule_periodically(&exec, task, Duration::ZERO, Duration::ZERO, &hooks).unwrap();

    assert_eq!(manual.log(), vec![Submission::Immediate]);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    for expected in 1..=3 {
        assert!(manual.run_next());
        assert_eq!(runs.load(Ordering::SeqCst), expected);
        // Exactly one pending submission at a time: runs never overlap.
        assert_eq!(manual.queued(), 1);
    }
    assert!(manual.log().iter().all(|s| *s == Submission::Immediate));

    handle.dispose();
    assert!(!manual.run_next());
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn test_initial_delay_is_honored_with_zero_period() {
    let (manual, exec, hooks) = setup();
    let (runs, task) = counter();
    let _handle = direct_schedule_periodically(
        &exec,
        task,
        Duration::from_millis(50),
        Duration::ZERO,
        &hooks,
    )
    .unwrap();

    assert_eq!(manual.log(), vec![Submission::Delayed(Duration::from_millis(50))]);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert!(manual.run_next());
    assert_eq!(
        manual.log(),
        vec![
            Submission::Delayed(Duration::from_millis(50)),
            Submission::Immediate
        ]
    );
}

#[test]
fn test_fixed_rate_rearms_against_schedule() {
    let (manual, exec, hooks) = setup();
    let (_runs, task) = counter();
    let period = Duration::from_millis(200);
    let _handle =
        direct_schedule_periodically(&exec, task, Duration::ZERO, period, &hooks).unwrap();

    assert!(manual.run_next());
    match manual.log()[1] {
        Submission::Delayed(delay) => {
            assert!(delay <= period);
            assert!(delay > period / 2);
        }
        other => panic!("expected a delayed re-arm, got {other:?}"),
    }
}

#[test]
fn test_overrunning_task_rearms_immediately() {
    let (manual, exec, hooks) = setup();
    let task: Arc<dyn Fn() + Send + Sync> =
        Arc::new(|| std::thread::sleep(Duration::from_millis(30)));
    let _handle = direct_schedule_periodically(
        &exec,
        task,
        Duration::ZERO,
        Duration::from_millis(5),
        &hooks,
    )
    .unwrap();

    assert!(manual.run_next());
    assert_eq!(manual.log()[1], Submission::Immediate);
}

#[test]
fn test_dispose_from_inside_the_task_stops_the_series() {
    let (manual, exec, hooks) = setup();
    let slot: Arc<OnceLock<DisposableRef>> = Arc::new(OnceLock::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let (s, r) = (Arc::clone(&slot), Arc::clone(&runs));
    let handle = direct_schedule_periodically(
        &exec,
        Arc::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = s.get() {
                handle.dispose();
            }
        }),
        Duration::ZERO,
        Duration::ZERO,
        &hooks,
    )
    .unwrap();
    assert!(slot.set(Arc::clone(&handle)).is_ok());

    assert!(manual.run_next());
    assert_eq!(manual.queued(), 0);
    assert!(handle.is_disposed());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_series_stops_when_executor_rejects_rearm() {
    let (manual, exec, hooks) = setup();
    let (runs, task) = counter();
    let handle =
        direct_schedule_periodically(&exec, task, Duration::ZERO, Duration::ZERO, &hooks).unwrap();
    manual.shutdown();
    assert!(manual.run_next());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(handle.is_disposed());
}

// ============================================================================
// REAL SCHEDULERS
// ============================================================================

#[test]
fn test_no_run_before_initial_delay_on_real_scheduler() {
    let schedulers = Schedulers::new(SchedulersConfig::default());
    let single = schedulers.new_single("periodic-delay").unwrap();
    let (runs, task) = counter();
    let started = Instant::now();
    let handle = single
        .schedule_periodically(task, Duration::from_millis(200), Duration::from_millis(20))
        .unwrap();

    std::thread::sleep(Duration::from_millis(50));
    if started.elapsed() < Duration::from_millis(200) {
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while runs.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    handle.dispose();
    let after_dispose = runs.load(Ordering::SeqCst);
    assert!(after_dispose >= 3);

    std::thread::sleep(Duration::from_millis(80));
    // At most the in-flight run completes after dispose.
    assert!(runs.load(Ordering::SeqCst) <= after_dispose + 1);
    single.dispose();
}

#[test]
fn test_worker_periodic_is_cancelled_with_worker() {
    let schedulers = Schedulers::new(SchedulersConfig::default());
    let parallel = schedulers.new_parallel("periodic-worker", 2).unwrap();
    let worker = parallel.create_worker();
    let (runs, task) = counter();
    let handle = worker
        .schedule_periodically(task, Duration::ZERO, Duration::from_millis(5))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while runs.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    worker.dispose();
    assert!(handle.is_disposed());
    assert!(worker
        .schedule_periodically(Arc::new(|| {}), Duration::ZERO, Duration::ZERO)
        .err()
        .unwrap()
        .is_rejected());
    parallel.dispose();
}

#[test]
fn test_disposed_workers_reject_every_combination_without_submitting() {
    use prometheus_schedulers::core::{CompositeDisposable, ScheduledThreadPool, ThreadFactory, Worker};
    use prometheus_schedulers::schedulers::{ExecutorWorker, SerialWorker};

    let pool =
        Arc::new(ScheduledThreadPool::new(1, &ThreadFactory::new("disposed-worker")).unwrap());
    let exec: Arc<dyn ScheduledExecutor> = Arc::clone(&pool) as Arc<dyn ScheduledExecutor>;
    let parent = Arc::new(CompositeDisposable::new());
    let hooks = Arc::new(ErrorHooks::new());
    let workers: Vec<Box<dyn Worker>> = vec![
        Box::new(ExecutorWorker::new(&exec, &parent, &hooks)),
        Box::new(SerialWorker::new(&exec, true, &parent, &hooks)),
    ];
    let delay = Duration::from_millis(5);

    for worker in &workers {
        worker.dispose();
        let before = pool.stats().submitted_tasks;

        assert!(worker.schedule(Box::new(|| {})).err().unwrap().is_rejected());
        assert!(worker
            .schedule_delayed(Box::new(|| {}), delay)
            .err()
            .unwrap()
            .is_rejected());
        assert!(worker
            .schedule_periodically(Arc::new(|| {}), Duration::ZERO, delay)
            .err()
            .unwrap()
            .is_rejected());
        assert!(worker
            .schedule_periodically(Arc::new(|| {}), delay, delay)
            .err()
            .unwrap()
            .is_rejected());

        assert_eq!(pool.stats().submitted_tasks, before);
    }
    pool.shutdown();
}
