//! # Prometheus Schedulers
//!
//! Execution contexts for reactive pipelines: schedulers, sequential workers,
//! executor decorators and the process-wide scheduler context.
//!
//! A [`Scheduler`](core::Scheduler) accepts immediate, delayed and periodic
//! tasks and returns a [`Disposable`](core::Disposable) token that cancels
//! them. A [`Worker`](core::Worker) is a sequential lane on a scheduler; tasks
//! on one worker never overlap and run in submission order. Disposing a
//! scheduler is terminal and cascades to its workers and their tasks.
//!
//! ## Core Problem Solved
//!
//! Reactive operators hop between threads constantly. They need:
//!
//! - **Named execution contexts**: one thread, a fixed CPU-sized set, or an
//!   elastic set of threads that may block
//! - **Exact cancellation**: a disposed periodic task never runs again, even
//!   if its next run was already queued
//! - **Blocking detection**: waiting for a result on a thread that must stay
//!   responsive fails fast instead of stalling the pipeline
//! - **Pluggable construction**: tests and hosts swap the factory or wrap
//!   every executor without touching call sites
//!
//! ## Schedulers
//!
//! ```rust
//! use std::time::Duration;
//! use prometheus_schedulers::config::SchedulersConfig;
//! use prometheus_schedulers::core::Scheduler;
//! use prometheus_schedulers::schedulers::Schedulers;
//!
//! let schedulers = Schedulers::new(SchedulersConfig::default());
//!
//! // Canonical schedulers survive stray `dispose()` calls.
//! let parallel = schedulers.parallel();
//! let worker = parallel.create_worker();
//! worker.schedule(Box::new(|| println!("first"))).unwrap();
//! worker.schedule(Box::new(|| println!("second"))).unwrap();
//!
//! // Blocking work belongs on the bounded-elastic scheduler.
//! let io = schedulers.bounded_elastic();
//! let answer = schedulers.call(&*io, || 6 * 7).unwrap();
//! assert_eq!(answer.wait(Duration::from_secs(5)).unwrap(), 42);
//!
//! schedulers.shutdown_all();
//! ```
//!
//! ## Decorators
//!
//! Every executor a scheduler builds passes through the decorator registry in
//! insertion order, so a host can add instrumentation once:
//!
//! ```rust
//! use std::sync::Arc;
//! use prometheus_schedulers::core::{ScheduledExecutor, Scheduler};
//! use prometheus_schedulers::schedulers::Schedulers;
//!
//! let schedulers = Schedulers::default();
//! schedulers.add_executor_decorator(
//!     "audit",
//!     Arc::new(|_: &dyn Scheduler, exec: Arc<dyn ScheduledExecutor>| exec),
//! );
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Scheduling abstractions, executors and shared services.
pub mod core;
/// Configuration models for scheduler sizing.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Runtime adapters exposing async runtimes as executors.
pub mod runtime;
/// Scheduler implementations and the scheduler context.
pub mod schedulers;
/// Shared utilities.
pub mod util;
