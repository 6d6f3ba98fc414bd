//! Strategy building the canonical scheduler kinds.

use std::sync::Arc;
use std::time::Duration;

use super::bounded_elastic::BoundedElasticScheduler;
use super::env::SchedulerEnv;
use super::parallel::ParallelScheduler;
use super::single::SingleScheduler;
use crate::core::{Scheduler, ThreadFactory};

/// Builds schedulers for a [`Schedulers`](super::Schedulers) context.
///
/// Every method has a default producing the standard implementation, so a
/// custom factory overrides only the kinds it cares about.
pub trait SchedulerFactory: Send + Sync {
    /// A single-thread scheduler.
    fn new_single(&self, env: &SchedulerEnv, factory: ThreadFactory) -> Arc<dyn Scheduler> {
        Arc::new(SingleScheduler::new(env.clone(), factory))
    }

    /// A scheduler over `parallelism` single-thread pools.
    fn new_parallel(
        &self,
        env: &SchedulerEnv,
        parallelism: usize,
        factory: ThreadFactory,
    ) -> Arc<dyn Scheduler> {
        Arc::new(ParallelScheduler::new(env.clone(), parallelism, factory))
    }

    /// An elastic scheduler for blocking work.
    fn new_bounded_elastic(
        &self,
        env: &SchedulerEnv,
        thread_cap: usize,
        task_cap: usize,
        factory: ThreadFactory,
        ttl: Duration,
    ) -> Arc<dyn Scheduler> {
        Arc::new(BoundedElasticScheduler::new(
            env.clone(),
            thread_cap,
            task_cap,
            factory,
            ttl,
        ))
    }
}

/// Factory installed until `set_factory` replaces it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSchedulerFactory;

impl SchedulerFactory for DefaultSchedulerFactory {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Attr, ScanValue};

    #[test]
    fn test_default_builds_standard_kinds() {
        let env = SchedulerEnv::new();
        let factory = DefaultSchedulerFactory;

        let parallel = factory.new_parallel(&env, 3, ThreadFactory::new("f-par"));
        assert_eq!(parallel.scan(Attr::Capacity), Some(ScanValue::Count(3)));

        let elastic = factory.new_bounded_elastic(
            &env,
            5,
            10,
            ThreadFactory::new("f-elastic"),
            Duration::from_secs(1),
        );
        assert_eq!(elastic.scan(Attr::Capacity), Some(ScanValue::Count(5)));

        let single = factory.new_single(&env, ThreadFactory::new("f-single"));
        assert_eq!(single.scan(Attr::Capacity), Some(ScanValue::Count(1)));
        for scheduler in [single, parallel, elastic] {
            scheduler.dispose();
        }
    }
}
