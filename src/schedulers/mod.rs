//! Scheduler implementations, the canonical-scheduler context and the
//! factory strategy behind it.

pub mod bounded_elastic;
pub mod cached;
pub mod call;
pub mod context;
pub mod delegate;
pub mod env;
pub mod factory;
pub mod immediate;
mod lifecycle;
pub mod parallel;
pub mod single;
pub mod worker;

pub use bounded_elastic::BoundedElasticScheduler;
pub use cached::CachedScheduler;
pub use call::CallHandle;
pub use context::Schedulers;
pub use delegate::{DelegateServiceScheduler, ExecutorScheduler};
pub use env::SchedulerEnv;
pub use factory::{DefaultSchedulerFactory, SchedulerFactory};
pub use immediate::ImmediateScheduler;
pub use parallel::ParallelScheduler;
pub use single::SingleScheduler;
pub use worker::{ExecutorWorker, RejectedWorker, SerialWorker};
