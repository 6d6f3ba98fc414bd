//! Keyed, insertion-ordered registry of executor decorators.
//!
//! When a scheduler builds its backing executor it runs it through every
//! registered decorator in insertion order. The chain is snapshotted at that
//! moment: decorators registered later never touch executors already built.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::executor::ScheduledExecutor;
use super::scheduler::Scheduler;

/// Wraps or replaces the executor a scheduler is about to use.
pub trait ExecutorDecorator: Send + Sync {
    /// Return the executor the scheduler should use instead of `executor`.
    fn decorate(
        &self,
        scheduler: &dyn Scheduler,
        executor: Arc<dyn ScheduledExecutor>,
    ) -> Arc<dyn ScheduledExecutor>;

    /// Called once when the decorator is replaced or removed.
    fn release(&self) {}
}

impl<F> ExecutorDecorator for F
where
    F: Fn(&dyn Scheduler, Arc<dyn ScheduledExecutor>) -> Arc<dyn ScheduledExecutor> + Send + Sync,
{
    fn decorate(
        &self,
        scheduler: &dyn Scheduler,
        executor: Arc<dyn ScheduledExecutor>,
    ) -> Arc<dyn ScheduledExecutor> {
        self(scheduler, executor)
    }
}

/// Shared decorator handle.
pub type DecoratorRef = Arc<dyn ExecutorDecorator>;

/// The registry.
#[derive(Default)]
pub struct DecoratorRegistry {
    entries: RwLock<Vec<(String, DecoratorRef)>>,
}

impl DecoratorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `decorator` under `key`. A no-op returning `false` if the key
    /// is already registered.
    pub fn add(&self, key: impl Into<String>, decorator: DecoratorRef) -> bool {
        let key = key.into();
        let mut entries = self.entries.write();
        if entries.iter().any(|(k, _)| *k == key) {
            return false;
        }
        debug!(key = %key, "Executor decorator added");
        entries.push((key, decorator));
        true
    }

    /// Install `decorator` under `key`, replacing (and releasing) any previous
    /// one. A replaced decorator keeps its position in the chain.
    pub fn set(&self, key: impl Into<String>, decorator: DecoratorRef) {
        let key = key.into();
        let previous = {
            let mut entries = self.entries.write();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => Some(std::mem::replace(slot, decorator)),
                None => {
                    entries.push((key.clone(), decorator));
                    None
                }
            }
        };
        debug!(key = %key, replaced = previous.is_some(), "Executor decorator set");
        if let Some(previous) = previous {
            previous.release();
        }
    }

    /// Remove and release the decorator under `key`.
    pub fn remove(&self, key: &str) -> Option<DecoratorRef> {
        let removed = {
            let mut entries = self.entries.write();
            let idx = entries.iter().position(|(k, _)| k == key)?;
            entries.remove(idx).1
        };
        debug!(key, "Executor decorator removed");
        removed.release();
        Some(removed)
    }

    /// Remove and release every decorator.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.entries.write());
        for (_, decorator) in drained {
            decorator.release();
        }
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().iter().any(|(k, _)| k == key)
    }

    /// Number of registered decorators.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no decorator is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered keys in application order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Apply the current chain to `executor`.
    pub fn decorate(
        &self,
        scheduler: &dyn Scheduler,
        executor: Arc<dyn ScheduledExecutor>,
    ) -> Arc<dyn ScheduledExecutor> {
        let chain: Vec<DecoratorRef> = self
            .entries
            .read()
            .iter()
            .map(|(_, d)| Arc::clone(d))
            .collect();
        chain
            .iter()
            .fold(executor, |current, decorator| decorator.decorate(scheduler, current))
    }
}

impl fmt::Debug for DecoratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
