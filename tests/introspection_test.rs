//! Integration tests for executor and scheduler introspection.

use prometheus_schedulers::config::SchedulersConfig;
use prometheus_schedulers::core::{
    scan_executor, Attr, Executor, FixedThreadPool, Runnable, ScanValue, ScheduledThreadPool,
    Scheduler, SchedulerError, TaskHandle, ThreadFactory, UnsupportedScheduledExecutor,
};
use prometheus_schedulers::schedulers::Schedulers;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executor that exposes nothing about its internals.
struct BlackBox;

impl Executor for BlackBox {
    fn execute(&self, task: Runnable) -> Result<Arc<TaskHandle>, SchedulerError> {
        std::thread::spawn(task);
        Ok(Arc::new(TaskHandle::new()))
    }

    fn shutdown(&self) {}

    fn is_shutdown(&self) -> bool {
        false
    }
}

fn wait_for_buffered(executor: &dyn Executor, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if scan_executor(executor, Attr::Buffered) == Some(ScanValue::Count(expected)) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_fixed_pool_reports_size_and_backlog() {
    let pool = FixedThreadPool::new(2, &ThreadFactory::new("scan-fixed")).unwrap();
    assert_eq!(scan_executor(&pool, Attr::Capacity), Some(ScanValue::Count(2)));

    let (started_tx, started_rx) = crossbeam_channel::unbounded::<()>();
    let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
    for _ in 0..5 {
        let started = started_tx.clone();
        let release = release_rx.clone();
        pool.execute(Box::new(move || {
            let _ = started.send(());
            let _ = release.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();
    }
    // both threads busy, three jobs still queued: running jobs count too
    for _ in 0..2 {
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(scan_executor(&pool, Attr::Buffered), Some(ScanValue::Count(5)));
    assert_eq!(pool.pending(), 5);

    release_tx.send(()).unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(wait_for_buffered(&pool, 4));

    for _ in 0..4 {
        release_tx.send(()).unwrap();
    }
    assert!(wait_for_buffered(&pool, 0));
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(scan_executor(&pool, Attr::Cancelled), Some(ScanValue::Flag(true)));
    assert_eq!(scan_executor(&pool, Attr::Terminated), Some(ScanValue::Flag(true)));
}

#[test]
fn test_scheduled_pool_is_unbounded_and_counts_pending() {
    let pool = ScheduledThreadPool::new(1, &ThreadFactory::new("scan-sched")).unwrap();
    assert_eq!(scan_executor(&pool, Attr::Capacity), Some(ScanValue::Unbounded));

    use prometheus_schedulers::core::ScheduledExecutor;
    let far = pool.schedule(Box::new(|| {}), Duration::from_secs(60)).unwrap();
    pool.schedule(Box::new(|| {}), Duration::from_secs(60)).unwrap();
    assert_eq!(scan_executor(&pool, Attr::Buffered), Some(ScanValue::Count(2)));

    far.cancel();
    assert_eq!(scan_executor(&pool, Attr::Buffered), Some(ScanValue::Count(1)));
    pool.shutdown();
}

#[test]
fn test_scheduled_pool_buffered_drops_as_tasks_complete() {
    use prometheus_schedulers::core::ScheduledExecutor;
    let pool = ScheduledThreadPool::new(1, &ThreadFactory::new("scan-drain")).unwrap();
    let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<()>();
    for delay in [20, 40] {
        let gate = gate_rx.clone();
        let done = done_tx.clone();
        pool.schedule(
            Box::new(move || {
                let _ = gate.recv_timeout(Duration::from_secs(5));
                let _ = done.send(());
            }),
            Duration::from_millis(delay),
        )
        .unwrap();
    }
    assert_eq!(scan_executor(&pool, Attr::Buffered), Some(ScanValue::Count(2)));

    gate_tx.send(()).unwrap();
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(wait_for_buffered(&pool, 1));

    gate_tx.send(()).unwrap();
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(wait_for_buffered(&pool, 0));
    pool.shutdown();
}

#[test]
fn test_wrappers_are_seen_through_and_opaque_is_unknown() {
    let fixed: Arc<dyn Executor> =
        Arc::new(FixedThreadPool::new(3, &ThreadFactory::new("scan-wrap")).unwrap());
    let wrapped = UnsupportedScheduledExecutor::new(Arc::clone(&fixed));
    assert_eq!(scan_executor(&wrapped, Attr::Capacity), Some(ScanValue::Count(3)));

    let opaque = UnsupportedScheduledExecutor::new(Arc::new(BlackBox));
    assert_eq!(scan_executor(&opaque, Attr::Capacity), None);
    assert_eq!(scan_executor(&opaque, Attr::Buffered), None);
    assert_eq!(scan_executor(&opaque, Attr::Cancelled), Some(ScanValue::Flag(false)));
    fixed.shutdown();
}

#[test]
fn test_scheduler_scan_reports_configuration() {
    let schedulers = Schedulers::new(SchedulersConfig {
        default_pool_size: 3,
        bounded_elastic_size: 7,
        ..SchedulersConfig::default()
    });

    assert_eq!(schedulers.single().scan(Attr::Capacity), Some(ScanValue::Count(1)));
    assert_eq!(schedulers.parallel().scan(Attr::Capacity), Some(ScanValue::Count(3)));
    assert_eq!(
        schedulers.bounded_elastic().scan(Attr::Capacity),
        Some(ScanValue::Count(7))
    );
    assert_eq!(
        schedulers.parallel().scan(Attr::Terminated),
        Some(ScanValue::Flag(false))
    );

    let parallel = schedulers.parallel();
    schedulers.shutdown_all();
    assert_eq!(parallel.scan(Attr::Cancelled), Some(ScanValue::Flag(true)));
}

#[test]
fn test_scan_values_serialize_for_reporting() {
    let report: Vec<(Attr, Option<ScanValue>)> = vec![
        (Attr::Capacity, Some(ScanValue::Count(4))),
        (Attr::Buffered, Some(ScanValue::Unbounded)),
        (Attr::Terminated, Some(ScanValue::Flag(false))),
        (Attr::Cancelled, None),
    ];
    let json = serde_json::to_string(&report).unwrap();
    assert_eq!(
        json,
        r#"[["capacity",{"count":4}],["buffered","unbounded"],["terminated",{"flag":false}],["cancelled",null]]"#
    );
}
