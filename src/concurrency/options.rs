//! `ConcurrencyOptions` and the env/config binding that resolves it.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConcurrencyError;

const ENABLED_VAR: &str = "FUNCTIONS_WORKER_DYNAMIC_CONCURRENCY_ENABLED";
const WORKER_PROCESS_COUNT_VAR: &str = "FUNCTIONS_WORKER_PROCESS_COUNT";
const RUNTIME_VAR: &str = "FUNCTIONS_WORKER_RUNTIME";
const PYTHON_THREADPOOL_VAR: &str = "PYTHON_THREADPOOL_THREAD_COUNT";
const PS_CONCURRENCY_VAR: &str = "PSWorkerInProcConcurrencyUpperBound";

/// Immutable configuration, read-only after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyOptions {
    pub enabled: bool,
    pub check_interval: Duration,
    pub adjustment_period: Duration,
    pub history_size: usize,
    pub history_threshold: f64,
    pub latency_threshold: Duration,
    pub max_worker_count: usize,
}

impl Default for ConcurrencyOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: Duration::from_secs(1),
            adjustment_period: Duration::from_secs(10),
            history_size: 10,
            history_threshold: 1.0,
            latency_threshold: Duration::from_secs(1),
            max_worker_count: 0,
        }
    }
}

impl ConcurrencyOptions {
    fn validate(&self) -> Result<(), ConcurrencyError> {
        if self.history_size == 0 {
            return Err(ConcurrencyError::ConfigInvalid(
                "historySize must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.history_threshold) || self.history_threshold <= 0.0 {
            return Err(ConcurrencyError::ConfigInvalid(
                "historyThreshold must be in (0, 1]".into(),
            ));
        }
        if self.max_worker_count == 0 {
            return Err(ConcurrencyError::ConfigInvalid(
                "maxWorkerCount must have been resolved to a positive bound by this point".into(),
            ));
        }
        Ok(())
    }
}

/// Serde-facing mirror of [`ConcurrencyOptions`] bound from the
/// `WorkerConcurrencyOptions` configuration section. Unspecified fields
/// keep `ConcurrencyOptions::default()`'s values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConcurrencyOptionsConfig {
    #[serde(with = "duration_secs_opt")]
    pub check_interval: Option<Duration>,
    #[serde(with = "duration_secs_opt")]
    pub adjustment_period: Option<Duration>,
    pub history_size: Option<usize>,
    pub history_threshold: Option<f64>,
    #[serde(with = "duration_secs_opt")]
    pub latency_threshold: Option<Duration>,
    pub max_worker_count: Option<usize>,
}

/// Duration (de)serialization helper, mirroring the `duration_secs` pattern
/// used for other duration-valued config fields in this codebase.
mod duration_secs_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

/// Indirection over environment lookups so the binding rules can be
/// exercised against a literal map in tests as well as the real process
/// environment.
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;
}

/// Looks up variables in the real process environment.
pub struct SystemEnv;

impl EnvLookup for SystemEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn is_set_non_empty(env: &impl EnvLookup, key: &str) -> bool {
    env.get(key).is_some_and(|v| !v.trim().is_empty())
}

/// Number of CPU cores used to derive `maxWorkerCount` when it is left at
/// its `0` sentinel. Indirection exists purely so tests can pin a value
/// instead of depending on the test runner's core count.
pub trait CoreCount {
    fn cores(&self) -> usize;
}

pub struct SystemCoreCount;

impl CoreCount for SystemCoreCount {
    fn cores(&self) -> usize {
        num_cpus::get()
    }
}

/// Resolve [`ConcurrencyOptions`] from the environment and a bound config
/// section.
pub fn resolve_options(
    env: &impl EnvLookup,
    config: &ConcurrencyOptionsConfig,
    cores: &impl CoreCount,
) -> Result<ConcurrencyOptions, ConcurrencyError> {
    // Rule 1: master enable flag.
    let master_enabled = env.get(ENABLED_VAR).is_some_and(|v| is_truthy(&v));
    if !master_enabled {
        log::debug!("dynamic worker concurrency disabled: {ENABLED_VAR} not truthy");
        return Ok(ConcurrencyOptions::default());
    }

    // Rule 2: explicit user overrides win and disable the feature.
    for kill_switch in [
        WORKER_PROCESS_COUNT_VAR,
        PYTHON_THREADPOOL_VAR,
        PS_CONCURRENCY_VAR,
    ] {
        if is_set_non_empty(env, kill_switch) {
            log::info!("dynamic worker concurrency disabled: {kill_switch} is set");
            return Ok(ConcurrencyOptions::default());
        }
    }

    // Rule 3: bind the rest from config, defaults for anything unset.
    let defaults = ConcurrencyOptions::default();
    let mut options = ConcurrencyOptions {
        enabled: true,
        check_interval: config.check_interval.unwrap_or(defaults.check_interval),
        adjustment_period: config
            .adjustment_period
            .unwrap_or(defaults.adjustment_period),
        history_size: config.history_size.unwrap_or(defaults.history_size),
        history_threshold: config
            .history_threshold
            .unwrap_or(defaults.history_threshold),
        latency_threshold: config
            .latency_threshold
            .unwrap_or(defaults.latency_threshold),
        max_worker_count: config.max_worker_count.unwrap_or(defaults.max_worker_count),
    };

    // Rule 4: 0 means "derive from CPU count".
    if options.max_worker_count == 0 {
        options.max_worker_count = 2 * cores.cores() + 2;
    }

    options.validate()?;
    log::info!(
        "dynamic worker concurrency enabled: check_interval={:?} adjustment_period={:?} \
         history_size={} history_threshold={} latency_threshold={:?} max_worker_count={}",
        options.check_interval,
        options.adjustment_period,
        options.history_size,
        options.history_threshold,
        options.latency_threshold,
        options.max_worker_count,
    );
    Ok(options)
}

/// Language runtimes whose in-process concurrency must be pinned to 1 once
/// dynamic scaling is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRuntime {
    Node,
    Java,
    Python,
    PowerShell,
    Other,
}

impl WorkerRuntime {
    pub fn from_env(env: &impl EnvLookup) -> Self {
        match env.get(RUNTIME_VAR).as_deref() {
            Some(s) if s.eq_ignore_ascii_case("node") => Self::Node,
            Some(s) if s.eq_ignore_ascii_case("java") => Self::Java,
            Some(s) if s.eq_ignore_ascii_case("python") => Self::Python,
            Some(s) if s.eq_ignore_ascii_case("powershell") => Self::PowerShell,
            _ => Self::Other,
        }
    }
}

/// Environment overrides the worker launcher must apply for the named
/// runtime once dynamic scaling is enabled. Each worker is assumed to be
/// single-concurrency; the host provides horizontal scaling instead.
pub fn launcher_env_overrides(runtime: WorkerRuntime) -> Vec<(&'static str, &'static str)> {
    match runtime {
        WorkerRuntime::Python => vec![(PYTHON_THREADPOOL_VAR, "1")],
        WorkerRuntime::PowerShell => vec![(PS_CONCURRENCY_VAR, "1")],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedCores(usize);
    impl CoreCount for FixedCores {
        fn cores(&self) -> usize {
            self.0
        }
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_disabled_with_sane_fallbacks() {
        let d = ConcurrencyOptions::default();
        assert!(!d.enabled);
        assert_eq!(d.check_interval, Duration::from_secs(1));
        assert_eq!(d.adjustment_period, Duration::from_secs(10));
        assert_eq!(d.history_size, 10);
        assert_eq!(d.history_threshold, 1.0);
        assert_eq!(d.latency_threshold, Duration::from_secs(1));
        assert_eq!(d.max_worker_count, 0);
    }

    /// Enabled with node runtime and empty config derives maxWorkerCount
    /// from core count.
    #[test]
    fn scenario_h_enabled_derives_max_worker_count() {
        let env = env(&[
            (ENABLED_VAR, "true"),
            (RUNTIME_VAR, "node"),
        ]);
        let cores = FixedCores(4);
        let opts = resolve_options(&env, &ConcurrencyOptionsConfig::default(), &cores).unwrap();
        assert!(opts.enabled, "should be enabled");
        assert_eq!(opts.max_worker_count, 2 * 4 + 2);
    }

    /// Adding WORKER_PROCESS_COUNT on top of the master flag disables it.
    #[test]
    fn scenario_h_process_count_override_disables() {
        let env = env(&[
            (ENABLED_VAR, "true"),
            (RUNTIME_VAR, "node"),
            (WORKER_PROCESS_COUNT_VAR, "1"),
        ]);
        let cores = FixedCores(4);
        let opts = resolve_options(&env, &ConcurrencyOptionsConfig::default(), &cores).unwrap();
        assert!(!opts.enabled, "process count override must win");
        assert_eq!(opts.max_worker_count, 0);
    }

    #[test]
    fn not_truthy_leaves_disabled() {
        let env = env(&[(ENABLED_VAR, "nope")]);
        let opts =
            resolve_options(&env, &ConcurrencyOptionsConfig::default(), &FixedCores(2)).unwrap();
        assert!(!opts.enabled);
    }

    #[test]
    fn python_threadpool_override_disables_even_when_enabled() {
        let env = env(&[
            (ENABLED_VAR, "1"),
            (PYTHON_THREADPOOL_VAR, "4"),
        ]);
        let opts =
            resolve_options(&env, &ConcurrencyOptionsConfig::default(), &FixedCores(2)).unwrap();
        assert!(!opts.enabled);
    }

    #[test]
    fn empty_override_value_does_not_disable() {
        let env = env(&[(ENABLED_VAR, "true"), (WORKER_PROCESS_COUNT_VAR, "")]);
        let opts =
            resolve_options(&env, &ConcurrencyOptionsConfig::default(), &FixedCores(2)).unwrap();
        assert!(opts.enabled, "empty override value must not disable");
    }

    #[test]
    fn explicit_max_worker_count_is_not_overridden() {
        let env = env(&[(ENABLED_VAR, "true")]);
        let config = ConcurrencyOptionsConfig {
            max_worker_count: Some(7),
            ..Default::default()
        };
        let opts = resolve_options(&env, &config, &FixedCores(4)).unwrap();
        assert_eq!(opts.max_worker_count, 7);
    }

    #[test]
    fn launcher_overrides_python_and_powershell_only() {
        assert_eq!(
            launcher_env_overrides(WorkerRuntime::Python),
            vec![(PYTHON_THREADPOOL_VAR, "1")]
        );
        assert_eq!(
            launcher_env_overrides(WorkerRuntime::PowerShell),
            vec![(PS_CONCURRENCY_VAR, "1")]
        );
        assert!(launcher_env_overrides(WorkerRuntime::Node).is_empty());
    }
}
