//! Build the named schedulers of a [`SchedulersConfig`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{SchedulerSpec, SchedulersConfig};
use crate::core::{Scheduler, SchedulerError};
use crate::schedulers::Schedulers;

/// Build every named scheduler through the active factory of `schedulers`.
///
/// If one fails to start, the ones already built are disposed.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] when validation fails, or the first
/// error a scheduler returns while starting.
pub fn build_schedulers(
    cfg: &SchedulersConfig,
    schedulers: &Schedulers,
) -> Result<HashMap<String, Arc<dyn Scheduler>>, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut built: HashMap<String, Arc<dyn Scheduler>> = HashMap::new();
    for (name, spec) in &cfg.schedulers {
        let scheduler = match spec {
            SchedulerSpec::Single => schedulers.new_single(name),
            SchedulerSpec::Parallel { parallelism } => schedulers.new_parallel(name, *parallelism),
            SchedulerSpec::BoundedElastic {
                thread_cap,
                task_cap,
                ttl_secs,
            } => schedulers.new_bounded_elastic(
                name,
                *thread_cap,
                *task_cap,
                Duration::from_secs(*ttl_secs),
            ),
        };
        match scheduler {
            Ok(scheduler) => {
                built.insert(name.clone(), scheduler);
            }
            Err(e) => {
                built.values().for_each(|s| s.dispose());
                return Err(e);
            }
        }
    }

    info!(count = built.len(), "Named schedulers built");
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Attr, ScanValue};

    #[test]
    fn test_builds_each_kind() {
        let cfg = SchedulersConfig::from_json_str(
            r#"{"schedulers": {
                "events": {"kind": "single"},
                "cpu": {"kind": "parallel", "parallelism": 3},
                "io": {"kind": "bounded_elastic", "thread_cap": 2, "task_cap": 16, "ttl_secs": 0}
            }}"#,
        )
        .unwrap();
        let schedulers = Schedulers::default();
        let built = build_schedulers(&cfg, &schedulers).unwrap();

        assert_eq!(built.len(), 3);
        assert_eq!(built["cpu"].scan(Attr::Capacity), Some(ScanValue::Count(3)));
        assert_eq!(built["io"].scan(Attr::Capacity), Some(ScanValue::Count(2)));
        assert_eq!(built["events"].scan(Attr::Capacity), Some(ScanValue::Count(1)));
        built.values().for_each(|s| s.dispose());
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let mut cfg = SchedulersConfig::default();
        cfg.schedulers
            .insert("cpu".into(), SchedulerSpec::Parallel { parallelism: 0 });
        let err = build_schedulers(&cfg, &Schedulers::default())
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }
}
