//! Routing of task failures raised on scheduler threads.
//!
//! Failures never reach the caller of `schedule`; they go to the uncaught
//! handler when one is installed (otherwise to the log), and then to the
//! optional `on_handle_error` hook.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, Thread};

use parking_lot::RwLock;
use tracing::error;

use super::error::TaskFailure;

/// Callback receiving the failing thread and the failure.
pub type ErrorHook = Arc<dyn Fn(&Thread, &TaskFailure) + Send + Sync>;

/// Error-handling hooks shared by the schedulers of a context.
#[derive(Default)]
pub struct ErrorHooks {
    on_handle_error: RwLock<Option<ErrorHook>>,
    uncaught: RwLock<Option<ErrorHook>>,
}

impl ErrorHooks {
    /// Hooks with nothing installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a hook invoked for every handled failure, in addition to the
    /// default handling.
    pub fn on_handle_error<F>(&self, hook: F)
    where
        F: Fn(&Thread, &TaskFailure) + Send + Sync + 'static,
    {
        *self.on_handle_error.write() = Some(Arc::new(hook));
    }

    /// Remove the `on_handle_error` hook.
    pub fn reset_on_handle_error(&self) {
        *self.on_handle_error.write() = None;
    }

    /// Install the uncaught-failure handler that replaces default logging.
    pub fn set_uncaught_handler<F>(&self, handler: F)
    where
        F: Fn(&Thread, &TaskFailure) + Send + Sync + 'static,
    {
        *self.uncaught.write() = Some(Arc::new(handler));
    }

    /// Remove the uncaught-failure handler.
    pub fn reset_uncaught_handler(&self) {
        *self.uncaught.write() = None;
    }

    /// Route a failure raised on the calling thread.
    pub fn handle_error(&self, failure: &TaskFailure) {
        let thread = thread::current();
        let uncaught = self.uncaught.read().clone();
        match uncaught {
            Some(handler) => handler(&thread, failure),
            None => error!(
                thread = thread.name().unwrap_or("unnamed"),
                fatal = failure.is_fatal(),
                error = %failure,
                "Scheduler worker failed with an uncaught error"
            ),
        }
        let hook = self.on_handle_error.read().clone();
        if let Some(hook) = hook {
            hook(&thread, failure);
        }
    }
}

/// Run `task`, routing a panic to `hooks` instead of unwinding further.
pub(crate) fn run_guarded<F: FnOnce()>(task: F, hooks: &ErrorHooks) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        hooks.handle_error(&TaskFailure::from_panic(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_hook_called_for_common_failure() {
        let hooks = ErrorHooks::new();
        let handled = Arc::new(AtomicBool::new(false));
        let h = Arc::clone(&handled);
        hooks.on_handle_error(move |_, _| h.store(true, Ordering::SeqCst));

        hooks.handle_error(&TaskFailure::recoverable("illegal argument"));
        assert!(handled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fatal_reaches_hook_and_uncaught_handler() {
        let hooks = ErrorHooks::new();
        let seen_by_hook = Arc::new(Mutex::new(None));
        let seen_by_uncaught = Arc::new(Mutex::new(None));
        let a = Arc::clone(&seen_by_hook);
        let b = Arc::clone(&seen_by_uncaught);
        hooks.on_handle_error(move |_, f| *a.lock() = Some(f.clone()));
        hooks.set_uncaught_handler(move |_, f| *b.lock() = Some(f.clone()));

        let fatal = TaskFailure::fatal("thread death");
        hooks.handle_error(&fatal);

        assert_eq!(seen_by_hook.lock().as_ref(), Some(&fatal));
        assert_eq!(seen_by_uncaught.lock().as_ref(), Some(&fatal));
    }

    #[test]
    fn test_reset_removes_hook() {
        let hooks = ErrorHooks::new();
        let handled = Arc::new(AtomicBool::new(false));
        let h = Arc::clone(&handled);
        hooks.on_handle_error(move |_, _| h.store(true, Ordering::SeqCst));
        hooks.reset_on_handle_error();

        hooks.handle_error(&TaskFailure::recoverable("ignored"));
        assert!(!handled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_guarded_routes_panic() {
        let hooks = ErrorHooks::new();
        let message = Arc::new(Mutex::new(String::new()));
        let m = Arc::clone(&message);
        hooks.on_handle_error(move |_, f| *m.lock() = f.message().to_string());

        run_guarded(|| panic!("task exploded"), &hooks);
        assert_eq!(*message.lock(), "task exploded");
    }
}
