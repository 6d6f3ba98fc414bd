//! Configuration models for scheduler sizing and named schedulers.

pub mod schedulers;

pub use schedulers::{SchedulerSpec, SchedulersConfig};
