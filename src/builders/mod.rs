//! Builders constructing schedulers from configuration.

pub mod scheduler_builder;

pub use scheduler_builder::build_schedulers;
