//! The scheduler context: active factory, canonical schedulers and the
//! shared services behind them.
//!
//! A [`Schedulers`] value owns everything that would otherwise be global
//! mutable state. [`Schedulers::global`] is the one process-wide instance;
//! tests and embedders create isolated ones with [`Schedulers::new`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::cached::CachedScheduler;
use super::call::CallHandle;
use super::delegate::{DelegateServiceScheduler, ExecutorScheduler};
use super::env::SchedulerEnv;
use super::factory::{DefaultSchedulerFactory, SchedulerFactory};
use super::immediate::ImmediateScheduler;
use crate::config::SchedulersConfig;
use crate::core::{
    DecoratorRef, ErrorHooks, Executor, ScheduledExecutor, Scheduler, SchedulerError,
    TaskFailure, ThreadContext, ThreadFactory,
};

const SINGLE: &str = "single";
const PARALLEL: &str = "parallel";
const BOUNDED_ELASTIC: &str = "bounded-elastic";

type Slot = Option<Arc<CachedScheduler>>;

#[derive(Default)]
struct Canonical {
    single: Slot,
    parallel: Slot,
    bounded_elastic: Slot,
}

impl Canonical {
    fn take_all(&mut self) -> Vec<Arc<CachedScheduler>> {
        [
            self.single.take(),
            self.parallel.take(),
            self.bounded_elastic.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Factory, canonical schedulers, decorators, hooks and thread classifier.
pub struct Schedulers {
    env: SchedulerEnv,
    config: SchedulersConfig,
    factory: RwLock<Arc<dyn SchedulerFactory>>,
    canonical: Mutex<Canonical>,
    immediate: Arc<ImmediateScheduler>,
}

impl Schedulers {
    /// An isolated context with its own services.
    #[must_use]
    pub fn new(config: SchedulersConfig) -> Self {
        let env = SchedulerEnv::new();
        let immediate = Arc::new(ImmediateScheduler::new(Arc::clone(&env.hooks)));
        Self {
            env,
            config,
            factory: RwLock::new(Arc::new(DefaultSchedulerFactory)),
            canonical: Mutex::new(Canonical::default()),
            immediate,
        }
    }

    /// The process-wide context, configured from the environment on first
    /// use.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<Schedulers> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = SchedulersConfig::from_env().unwrap_or_else(|e| {
                warn!(error = %e, "Invalid scheduler environment, using defaults");
                SchedulersConfig::default()
            });
            Self::new(config)
        })
    }

    /// Services shared by the schedulers of this context.
    #[must_use]
    pub const fn env(&self) -> &SchedulerEnv {
        &self.env
    }

    /// Sizing used for the canonical schedulers.
    #[must_use]
    pub const fn config(&self) -> &SchedulersConfig {
        &self.config
    }

    fn thread_factory(&self, prefix: &str, non_blocking: bool) -> ThreadFactory {
        ThreadFactory::new(prefix)
            .with_non_blocking(non_blocking)
            .with_stack_size(self.config.thread_stack_size)
    }

    fn started(scheduler: Arc<dyn Scheduler>) -> Result<Arc<dyn Scheduler>, SchedulerError> {
        scheduler.start()?;
        Ok(scheduler)
    }

    // ---------------------------------------------------------------------
    // New instances
    // ---------------------------------------------------------------------

    /// A started single-thread scheduler whose thread is named after `name`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Spawn`] if the thread cannot be created.
    pub fn new_single(&self, name: &str) -> Result<Arc<dyn Scheduler>, SchedulerError> {
        self.new_single_with(self.thread_factory(name, true))
    }

    /// A started single-thread scheduler using a caller-supplied factory.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Spawn`] if the thread cannot be created.
    pub fn new_single_with(
        &self,
        factory: ThreadFactory,
    ) -> Result<Arc<dyn Scheduler>, SchedulerError> {
        let scheduler = self.factory.read().new_single(&self.env, factory);
        Self::started(scheduler)
    }

    /// A started scheduler with `parallelism` threads.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Spawn`] if a thread cannot be created.
    pub fn new_parallel(
        &self,
        name: &str,
        parallelism: usize,
    ) -> Result<Arc<dyn Scheduler>, SchedulerError> {
        let factory = self.thread_factory(name, true);
        let scheduler = self
            .factory
            .read()
            .new_parallel(&self.env, parallelism, factory);
        Self::started(scheduler)
    }

    /// A started bounded-elastic scheduler. A zero `ttl` disables eviction.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Spawn`] if the evictor thread cannot be created.
    pub fn new_bounded_elastic(
        &self,
        name: &str,
        thread_cap: usize,
        task_cap: usize,
        ttl: Duration,
    ) -> Result<Arc<dyn Scheduler>, SchedulerError> {
        let factory = self.thread_factory(name, false);
        let scheduler = self.factory.read().new_bounded_elastic(
            &self.env,
            thread_cap,
            task_cap,
            factory,
            ttl,
        );
        Self::started(scheduler)
    }

    /// Scheduler over a plain executor the caller keeps ownership of.
    #[must_use]
    pub fn from_executor(&self, executor: Arc<dyn Executor>) -> Arc<dyn Scheduler> {
        Arc::new(ExecutorScheduler::new(self.env.clone(), executor))
    }

    /// Scheduler taking ownership of a timed executor; disposing the
    /// scheduler shuts the executor down.
    #[must_use]
    pub fn from_executor_service(
        &self,
        executor: Arc<dyn ScheduledExecutor>,
    ) -> Arc<dyn Scheduler> {
        Arc::new(DelegateServiceScheduler::new(self.env.clone(), executor))
    }

    // ---------------------------------------------------------------------
    // Canonical instances
    // ---------------------------------------------------------------------

    /// The shared single-thread scheduler.
    #[must_use]
    pub fn single(&self) -> Arc<CachedScheduler> {
        self.canonical(SINGLE, |c| &mut c.single, |factory| {
            factory.new_single(&self.env, self.thread_factory(SINGLE, true))
        })
    }

    /// The shared parallel scheduler, sized by `default_pool_size`.
    #[must_use]
    pub fn parallel(&self) -> Arc<CachedScheduler> {
        self.canonical(PARALLEL, |c| &mut c.parallel, |factory| {
            factory.new_parallel(
                &self.env,
                self.config.default_pool_size,
                self.thread_factory(PARALLEL, true),
            )
        })
    }

    /// The shared bounded-elastic scheduler for blocking work.
    #[must_use]
    pub fn bounded_elastic(&self) -> Arc<CachedScheduler> {
        self.canonical(BOUNDED_ELASTIC, |c| &mut c.bounded_elastic, |factory| {
            factory.new_bounded_elastic(
                &self.env,
                self.config.bounded_elastic_size,
                self.config.bounded_elastic_queue_size,
                self.thread_factory(BOUNDED_ELASTIC, false),
                self.config.bounded_elastic_ttl(),
            )
        })
    }

    /// Scheduler running tasks inline on the caller.
    #[must_use]
    pub fn immediate(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.immediate) as Arc<dyn Scheduler>
    }

    fn canonical<P, B>(&self, key: &'static str, slot: P, build: B) -> Arc<CachedScheduler>
    where
        P: Fn(&mut Canonical) -> &mut Slot,
        B: FnOnce(&dyn SchedulerFactory) -> Arc<dyn Scheduler>,
    {
        if let Some(existing) = slot(&mut *self.canonical.lock()).clone() {
            return existing;
        }

        // The factory lock is held until the candidate is stored so a
        // concurrent swap cannot leave an instance of the old generation
        // cached.
        let factory = self.factory.read_recursive();
        let candidate = Arc::new(CachedScheduler::new(key, build(&**factory)));
        let existing = {
            let mut canonical = self.canonical.lock();
            let cached = slot(&mut *canonical);
            match cached {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    *cached = Some(Arc::clone(&candidate));
                    None
                }
            }
        };
        drop(factory);

        match existing {
            Some(existing) => {
                debug!(key, "Lost canonical scheduler race, disposing candidate");
                candidate.force_dispose();
                existing
            }
            None => {
                info!(key, "Canonical scheduler created");
                candidate
            }
        }
    }

    // ---------------------------------------------------------------------
    // Factory control
    // ---------------------------------------------------------------------

    /// Install `factory` and force-dispose the canonical schedulers built by
    /// the previous one. Returns the previous factory.
    pub fn set_factory(&self, factory: Arc<dyn SchedulerFactory>) -> Arc<dyn SchedulerFactory> {
        let (previous, retired) = {
            let mut active = self.factory.write();
            let previous = std::mem::replace(&mut *active, factory);
            let retired = self.canonical.lock().take_all();
            (previous, retired)
        };
        info!(retired = retired.len(), "Scheduler factory replaced");
        retired.iter().for_each(|s| s.force_dispose());
        previous
    }

    /// Reinstall the default factory, with the same disposal as
    /// [`set_factory`](Self::set_factory).
    pub fn reset_factory(&self) {
        self.set_factory(Arc::new(DefaultSchedulerFactory));
    }

    /// Force-dispose the canonical schedulers, keeping the active factory.
    /// The next accessor call builds fresh ones.
    pub fn shutdown_all(&self) {
        let retired = {
            let _active = self.factory.write();
            self.canonical.lock().take_all()
        };
        debug!(retired = retired.len(), "Canonical schedulers shut down");
        retired.iter().for_each(|s| s.force_dispose());
    }

    // ---------------------------------------------------------------------
    // Decorators
    // ---------------------------------------------------------------------

    /// Register a decorator under `key` unless one is already present.
    pub fn add_executor_decorator(&self, key: impl Into<String>, decorator: DecoratorRef) -> bool {
        self.env.decorators.add(key, decorator)
    }

    /// Register or replace the decorator under `key`.
    pub fn set_executor_decorator(&self, key: impl Into<String>, decorator: DecoratorRef) {
        self.env.decorators.set(key, decorator);
    }

    /// Remove and release the decorator under `key`.
    pub fn remove_executor_decorator(&self, key: &str) -> Option<DecoratorRef> {
        self.env.decorators.remove(key)
    }

    /// Remove and release every decorator.
    pub fn reset_executor_decorators(&self) {
        self.env.decorators.clear();
    }

    // ---------------------------------------------------------------------
    // Thread classification
    // ---------------------------------------------------------------------

    /// Replace the predicate deciding which threads must not block.
    pub fn register_non_blocking_predicate<F>(&self, predicate: F)
    where
        F: Fn(&ThreadContext) -> bool + Send + Sync + 'static,
    {
        self.env.classifier.register_predicate(predicate);
    }

    /// Restore the marker-based predicate.
    pub fn reset_non_blocking_predicate(&self) {
        self.env.classifier.reset_predicate();
    }

    /// Whether `thread` is classified non-blocking.
    #[must_use]
    pub fn is_non_blocking_thread(&self, thread: &ThreadContext) -> bool {
        self.env.classifier.is_non_blocking(thread)
    }

    /// Whether the calling thread is classified non-blocking.
    #[must_use]
    pub fn is_in_non_blocking_thread(&self) -> bool {
        self.env.classifier.is_current_thread_non_blocking()
    }

    // ---------------------------------------------------------------------
    // Error hooks
    // ---------------------------------------------------------------------

    /// Error hooks shared by this context's schedulers.
    #[must_use]
    pub const fn hooks(&self) -> &Arc<ErrorHooks> {
        &self.env.hooks
    }

    /// Install a hook invoked for every task failure.
    pub fn on_handle_error<F>(&self, hook: F)
    where
        F: Fn(&std::thread::Thread, &TaskFailure) + Send + Sync + 'static,
    {
        self.env.hooks.on_handle_error(hook);
    }

    /// Remove the failure hook.
    pub fn reset_on_handle_error(&self) {
        self.env.hooks.reset_on_handle_error();
    }

    /// Run `f` on `scheduler`, returning a handle to wait on.
    ///
    /// # Errors
    ///
    /// Whatever the scheduler returns when it refuses the task.
    pub fn call<T, F>(&self, scheduler: &dyn Scheduler, f: F) -> Result<CallHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        CallHandle::spawn(scheduler, &self.env.classifier, &self.env.hooks, f)
    }
}

impl Default for Schedulers {
    fn default() -> Self {
        Self::new(SchedulersConfig::default())
    }
}

impl Drop for Schedulers {
    fn drop(&mut self) {
        for scheduler in self.canonical.get_mut().take_all() {
            scheduler.force_dispose();
        }
    }
}

impl std::fmt::Debug for Schedulers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schedulers")
            .field("config", &self.config)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}
