//! Classification of threads on which blocking calls are disallowed.
//!
//! Threads spawned for non-blocking schedulers carry a [`ThreadMarker`] set at
//! creation time. The [`NonBlockingClassifier`] evaluates a replaceable
//! predicate over the calling thread; the default predicate reads the marker,
//! and a custom predicate can recognise threads created elsewhere (for
//! instance by an externally supplied thread factory).

use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, Thread};

use parking_lot::RwLock;
use tracing::debug;

/// Classification attached to a thread when it is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadMarker {
    /// No classification.
    #[default]
    Unmarked,
    /// Blocking calls must fail fast on this thread.
    NonBlocking,
}

thread_local! {
    static MARKER: Cell<ThreadMarker> = const { Cell::new(ThreadMarker::Unmarked) };
}

/// Tag the calling thread.
pub fn mark_current_thread(marker: ThreadMarker) {
    MARKER.with(|m| m.set(marker));
}

/// Marker of the calling thread.
#[must_use]
pub fn current_thread_marker() -> ThreadMarker {
    MARKER.with(Cell::get)
}

/// A thread together with its marker, as seen by a predicate.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    /// The thread being classified.
    pub thread: Thread,
    /// Its creation-time marker.
    pub marker: ThreadMarker,
}

impl ThreadContext {
    /// Context of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        Self {
            thread: thread::current(),
            marker: current_thread_marker(),
        }
    }

    /// Name of the thread, or `"unnamed"`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.thread.name().unwrap_or("unnamed")
    }
}

/// Predicate deciding whether a thread is non-blocking.
pub type ThreadPredicate = Arc<dyn Fn(&ThreadContext) -> bool + Send + Sync>;

/// Holds the active non-blocking predicate.
pub struct NonBlockingClassifier {
    default: ThreadPredicate,
    active: RwLock<ThreadPredicate>,
}

impl NonBlockingClassifier {
    /// Classifier using the default, marker-based predicate.
    #[must_use]
    pub fn new() -> Self {
        let default: ThreadPredicate =
            Arc::new(|ctx: &ThreadContext| ctx.marker == ThreadMarker::NonBlocking);
        Self {
            active: RwLock::new(Arc::clone(&default)),
            default,
        }
    }

    /// Replace the active predicate. Replacement is wholesale: the previous
    /// predicate, including the default, no longer applies.
    pub fn register_predicate<F>(&self, predicate: F)
    where
        F: Fn(&ThreadContext) -> bool + Send + Sync + 'static,
    {
        *self.active.write() = Arc::new(predicate);
        debug!("non-blocking thread predicate replaced");
    }

    /// Restore the default predicate.
    pub fn reset_predicate(&self) {
        *self.active.write() = Arc::clone(&self.default);
    }

    /// The active predicate.
    pub fn active_predicate(&self) -> ThreadPredicate {
        Arc::clone(&self.active.read())
    }

    /// The default predicate.
    pub fn default_predicate(&self) -> ThreadPredicate {
        Arc::clone(&self.default)
    }

    /// Whether the default predicate is active.
    pub fn is_default(&self) -> bool {
        Arc::ptr_eq(&self.active.read(), &self.default)
    }

    /// Evaluate the active predicate against `ctx`.
    pub fn is_non_blocking(&self, ctx: &ThreadContext) -> bool {
        let predicate = self.active_predicate();
        predicate(ctx)
    }

    /// Evaluate the active predicate against the calling thread.
    pub fn is_current_thread_non_blocking(&self) -> bool {
        self.is_non_blocking(&ThreadContext::current())
    }
}

impl Default for NonBlockingClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_in_thread(classifier: &Arc<NonBlockingClassifier>, name: &str) -> bool {
        let classifier = Arc::clone(classifier);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || classifier.is_current_thread_non_blocking())
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_unmarked_thread_is_blocking() {
        let classifier = NonBlockingClassifier::new();
        assert!(!classifier.is_current_thread_non_blocking());
    }

    #[test]
    fn test_marked_thread_is_non_blocking() {
        let classifier = Arc::new(NonBlockingClassifier::new());
        let c = Arc::clone(&classifier);
        let result = thread::spawn(move || {
            mark_current_thread(ThreadMarker::NonBlocking);
            c.is_current_thread_non_blocking()
        })
        .join()
        .unwrap();
        assert!(result);
    }

    #[test]
    fn test_custom_predicate_register_and_reset() {
        let classifier = Arc::new(NonBlockingClassifier::new());
        assert!(classifier.is_default());
        assert!(!classify_in_thread(&classifier, "custom-nb-1"));

        classifier.register_predicate(|ctx| ctx.name().starts_with("custom-nb"));
        assert!(!classifier.is_default());
        assert!(classify_in_thread(&classifier, "custom-nb-2"));
        assert!(!classify_in_thread(&classifier, "other-1"));

        classifier.reset_predicate();
        assert!(!classify_in_thread(&classifier, "custom-nb-3"));
        assert!(Arc::ptr_eq(
            &classifier.active_predicate(),
            &classifier.default_predicate()
        ));
    }

    #[test]
    fn test_registration_replaces_default() {
        let classifier = NonBlockingClassifier::new();
        classifier.register_predicate(|_| false);
        let ctx = ThreadContext {
            thread: thread::current(),
            marker: ThreadMarker::NonBlocking,
        };
        assert!(!classifier.is_non_blocking(&ctx));
    }
}
