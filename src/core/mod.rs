//! Core scheduling abstractions: disposables, executors, thread pools, the
//! scheduler and worker traits, periodic dispatch and the shared services
//! (decorators, thread classification, error hooks) schedulers consult.

pub mod decorator;
pub mod disposable;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod introspect;
pub mod non_blocking;
pub mod periodic;
pub mod scheduler;
pub mod thread_factory;
pub mod thread_pool;

pub use decorator::{DecoratorRef, DecoratorRegistry, ExecutorDecorator};
pub use disposable::{CompositeDisposable, Disposable, DisposableRef, SimpleDisposable};
pub use error::{AppResult, FatalError, SchedulerError, TaskFailure};
pub use executor::{
    Executor, ExecutorShape, Runnable, ScheduledExecutor, TaskHandle, UnsupportedScheduledExecutor,
};
pub use hooks::{ErrorHook, ErrorHooks};
pub use introspect::{scan_executor, Attr, ScanValue};
pub use non_blocking::{
    current_thread_marker, mark_current_thread, NonBlockingClassifier, ThreadContext,
    ThreadMarker, ThreadPredicate,
};
pub use periodic::{
    direct_schedule, direct_schedule_periodically, worker_schedule, worker_schedule_periodically,
};
pub(crate) use periodic::direct_schedule_periodically_then;
pub use scheduler::{PeriodicTask, Scheduler, Task, Worker};
pub use thread_factory::ThreadFactory;
pub use thread_pool::{FixedThreadPool, PoolStats, ScheduledThreadPool};
