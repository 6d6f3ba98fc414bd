//! Scheduler sizing and named scheduler definitions.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Environment variable overriding [`SchedulersConfig::default_pool_size`].
pub const ENV_DEFAULT_POOL_SIZE: &str = "SCHEDULERS_DEFAULT_POOL_SIZE";
/// Environment variable overriding [`SchedulersConfig::bounded_elastic_size`].
pub const ENV_BOUNDED_ELASTIC_SIZE: &str = "SCHEDULERS_BOUNDED_ELASTIC_SIZE";
/// Environment variable overriding [`SchedulersConfig::bounded_elastic_queue_size`].
pub const ENV_BOUNDED_ELASTIC_QUEUE_SIZE: &str = "SCHEDULERS_BOUNDED_ELASTIC_QUEUE_SIZE";
/// Environment variable overriding [`SchedulersConfig::bounded_elastic_ttl_secs`].
pub const ENV_BOUNDED_ELASTIC_TTL_SECS: &str = "SCHEDULERS_BOUNDED_ELASTIC_TTL_SECS";

const DEFAULT_QUEUE_SIZE: usize = 100_000;
const DEFAULT_TTL_SECS: u64 = 60;

/// A named scheduler to build at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerSpec {
    /// One thread.
    Single,
    /// A fixed number of threads.
    Parallel {
        /// Number of threads.
        parallelism: usize,
    },
    /// Threads created on demand for blocking work.
    BoundedElastic {
        /// Maximum number of threads.
        thread_cap: usize,
        /// Maximum queued tasks per thread.
        task_cap: usize,
        /// Idle seconds before a thread is evicted; 0 keeps threads forever.
        #[serde(default = "default_ttl_secs")]
        ttl_secs: u64,
    },
}

const fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

impl SchedulerSpec {
    /// Validate kind-specific parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Single => Ok(()),
            Self::Parallel { parallelism } => {
                if *parallelism == 0 {
                    return Err("parallelism must be greater than 0".into());
                }
                Ok(())
            }
            Self::BoundedElastic {
                thread_cap,
                task_cap,
                ..
            } => {
                if *thread_cap == 0 {
                    return Err("thread_cap must be greater than 0".into());
                }
                if *task_cap == 0 {
                    return Err("task_cap must be greater than 0".into());
                }
                Ok(())
            }
        }
    }
}

/// Sizing of the canonical schedulers plus optional named schedulers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulersConfig {
    /// Threads of the canonical parallel scheduler.
    pub default_pool_size: usize,
    /// Thread cap of the canonical bounded-elastic scheduler.
    pub bounded_elastic_size: usize,
    /// Queued-task cap per bounded-elastic thread.
    pub bounded_elastic_queue_size: usize,
    /// Idle seconds before a bounded-elastic thread is evicted.
    pub bounded_elastic_ttl_secs: u64,
    /// Stack size for spawned threads; platform default when unset.
    pub thread_stack_size: Option<usize>,
    /// Named schedulers built by [`build_schedulers`](crate::builders::build_schedulers).
    pub schedulers: HashMap<String, SchedulerSpec>,
}

impl Default for SchedulersConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            default_pool_size: cpus,
            bounded_elastic_size: 10 * cpus,
            bounded_elastic_queue_size: DEFAULT_QUEUE_SIZE,
            bounded_elastic_ttl_secs: DEFAULT_TTL_SECS,
            thread_stack_size: None,
            schedulers: HashMap::new(),
        }
    }
}

impl SchedulersConfig {
    /// Validate sizes and every named scheduler.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_pool_size == 0 {
            return Err("default_pool_size must be greater than 0".into());
        }
        if self.bounded_elastic_size == 0 {
            return Err("bounded_elastic_size must be greater than 0".into());
        }
        if self.bounded_elastic_queue_size == 0 {
            return Err("bounded_elastic_queue_size must be greater than 0".into());
        }
        if self.thread_stack_size == Some(0) {
            return Err("thread_stack_size must be greater than 0".into());
        }
        for (name, spec) in &self.schedulers {
            if name.is_empty() {
                return Err("scheduler names must not be empty".into());
            }
            spec.validate()
                .map_err(|e| format!("scheduler `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `SCHEDULERS_*` variables, after loading `.env`.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `SCHEDULERS_*`
    /// keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String> {
            raw.trim()
                .parse()
                .map_err(|_| format!("{key}: cannot parse `{raw}`"))
        }

        let mut cfg = Self::default();
        if let Some(raw) = lookup(ENV_DEFAULT_POOL_SIZE) {
            cfg.default_pool_size = parse(ENV_DEFAULT_POOL_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BOUNDED_ELASTIC_SIZE) {
            cfg.bounded_elastic_size = parse(ENV_BOUNDED_ELASTIC_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BOUNDED_ELASTIC_QUEUE_SIZE) {
            cfg.bounded_elastic_queue_size = parse(ENV_BOUNDED_ELASTIC_QUEUE_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BOUNDED_ELASTIC_TTL_SECS) {
            cfg.bounded_elastic_ttl_secs = parse(ENV_BOUNDED_ELASTIC_TTL_SECS, &raw)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a JSON file when `path` is given, otherwise from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Unreadable files, malformed JSON and failed validation.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading scheduler config {}", path.display()))?;
                Self::from_json_str(&text)
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("loading scheduler config {}", path.display()))
            }
            None => Self::from_env()
                .map_err(anyhow::Error::msg)
                .context("loading scheduler config from environment"),
        }
    }

    /// Idle TTL of the canonical bounded-elastic scheduler.
    #[must_use]
    pub const fn bounded_elastic_ttl(&self) -> Duration {
        Duration::from_secs(self.bounded_elastic_ttl_secs)
    }
}
