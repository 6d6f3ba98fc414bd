//! Services shared by every scheduler of a [`Schedulers`](super::Schedulers)
//! context.

use std::sync::Arc;

use crate::core::{DecoratorRegistry, ErrorHooks, NonBlockingClassifier};

/// Decorator registry, error hooks and thread classifier consulted by
/// schedulers. Cloning shares the services.
#[derive(Clone, Default)]
pub struct SchedulerEnv {
    /// Applied to every executor a scheduler builds.
    pub decorators: Arc<DecoratorRegistry>,
    /// Receive task failures raised on scheduler threads.
    pub hooks: Arc<ErrorHooks>,
    /// Decides which threads must not block.
    pub classifier: Arc<NonBlockingClassifier>,
}

impl SchedulerEnv {
    /// Fresh, isolated services.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for SchedulerEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerEnv")
            .field("decorators", &self.decorators)
            .finish_non_exhaustive()
    }
}
