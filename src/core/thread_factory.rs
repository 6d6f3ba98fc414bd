//! Named thread creation for scheduler pools.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::error::SchedulerError;
use super::non_blocking::{mark_current_thread, ThreadMarker};

/// Spawns threads named `{prefix}-{n}` and tags them with a [`ThreadMarker`].
///
/// Clones share the counter, so every thread of a scheduler gets a distinct
/// suffix.
#[derive(Clone)]
pub struct ThreadFactory {
    prefix: String,
    counter: Arc<AtomicU64>,
    non_blocking: bool,
    stack_size: Option<usize>,
}

impl ThreadFactory {
    /// Factory for blocking-capable threads.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(0)),
            non_blocking: false,
            stack_size: None,
        }
    }

    /// Mark spawned threads as non-blocking.
    #[must_use]
    pub const fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    /// Set the stack size of spawned threads.
    #[must_use]
    pub const fn with_stack_size(mut self, stack_size: Option<usize>) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Thread name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether spawned threads are non-blocking.
    #[must_use]
    pub const fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    /// Spawn a thread running `body`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Spawn` if the OS refuses the thread.
    pub fn spawn<F>(&self, body: F) -> Result<JoinHandle<()>, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut builder = thread::Builder::new().name(format!("{}-{n}", self.prefix));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let marker = if self.non_blocking {
            ThreadMarker::NonBlocking
        } else {
            ThreadMarker::Unmarked
        };
        builder
            .spawn(move || {
                mark_current_thread(marker);
                body();
            })
            .map_err(|e| SchedulerError::Spawn(e.to_string()))
    }
}

impl fmt::Debug for ThreadFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadFactory")
            .field("prefix", &self.prefix)
            .field("non_blocking", &self.non_blocking)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::non_blocking::current_thread_marker;

    #[test]
    fn test_thread_names_are_sequential() {
        let factory = ThreadFactory::new("work");
        let first = factory
            .spawn(|| {})
            .unwrap()
            .thread()
            .name()
            .map(str::to_string);
        let second = factory
            .clone()
            .spawn(|| {})
            .unwrap()
            .thread()
            .name()
            .map(str::to_string);
        assert_eq!(first.as_deref(), Some("work-1"));
        assert_eq!(second.as_deref(), Some("work-2"));
    }

    #[test]
    fn test_marker_applied() {
        let (tx, rx) = crossbeam_channel::bounded(2);
        let tx2 = tx.clone();
        ThreadFactory::new("nb")
            .with_non_blocking(true)
            .spawn(move || tx.send(current_thread_marker()).unwrap())
            .unwrap();
        ThreadFactory::new("b")
            .spawn(move || tx2.send(current_thread_marker()).unwrap())
            .unwrap();

        let mut markers = vec![rx.recv().unwrap(), rx.recv().unwrap()];
        markers.sort_by_key(|m| *m == ThreadMarker::NonBlocking);
        assert_eq!(markers, vec![ThreadMarker::Unmarked, ThreadMarker::NonBlocking]);
    }
}
