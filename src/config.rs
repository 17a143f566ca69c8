//! Settings with environment overrides
//!
//! Environment access goes through [`EnvSource`] so tests can inject values
//! without touching process-global state.

use std::time::Duration;

use tracing::warn;

use crate::retry::{PollPolicy, DEFAULT_POLL_INTERVAL};
use crate::{CHAOS_GROUP, CHAOS_VERSION, DEFAULT_CHAOS_NAMESPACE};

/// Environment variable overriding the API group
pub const ENV_GROUP: &str = "CHAOS_GROUP";
/// Environment variable overriding the API version
pub const ENV_VERSION: &str = "CHAOS_VERSION";
/// Environment variable overriding the chaos namespace
pub const ENV_NAMESPACE: &str = "CHAOS_NAMESPACE";
/// Environment variable overriding the force-delete timeout (seconds)
pub const ENV_FORCE_DELETE_TIMEOUT: &str = "CHAOS_FORCE_DELETE_TIMEOUT_SECS";
/// Environment variable overriding the poll interval (seconds)
pub const ENV_POLL_INTERVAL: &str = "CHAOS_POLL_INTERVAL_SECS";

/// Source of environment variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `key`, `None` when unset
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Runtime settings for every chaos operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChaosSettings {
    /// API group of the fault resources
    pub group: String,
    /// API version of the fault resources
    pub version: String,
    /// Namespace fault resources live in
    pub namespace: String,
    /// Interval between status checks
    pub poll_interval: Duration,
    /// Budget for deleting a single experiment's resource
    pub force_delete_timeout: Duration,
    /// Per-resource budget during release teardown
    pub bulk_force_delete_timeout: Duration,
    /// Budget for targeted pods to become ready after an experiment
    pub pod_ready_timeout: Duration,
}

impl Default for ChaosSettings {
    fn default() -> Self {
        Self {
            group: CHAOS_GROUP.to_string(),
            version: CHAOS_VERSION.to_string(),
            namespace: DEFAULT_CHAOS_NAMESPACE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            force_delete_timeout: Duration::from_secs(60),
            bulk_force_delete_timeout: Duration::from_secs(30),
            pod_ready_timeout: Duration::from_secs(360),
        }
    }
}

impl ChaosSettings {
    /// Defaults overridden by whatever `env` provides.
    ///
    /// Unparseable or zero durations are ignored with a warning.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let mut settings = Self::default();
        if let Some(group) = non_empty(env.var(ENV_GROUP)) {
            settings.group = group;
        }
        if let Some(version) = non_empty(env.var(ENV_VERSION)) {
            settings.version = version;
        }
        if let Some(namespace) = non_empty(env.var(ENV_NAMESPACE)) {
            settings.namespace = namespace;
        }
        if let Some(timeout) = seconds(env, ENV_FORCE_DELETE_TIMEOUT) {
            settings.force_delete_timeout = timeout;
        }
        if let Some(interval) = seconds(env, ENV_POLL_INTERVAL) {
            settings.poll_interval = interval;
        }
        settings
    }

    /// Poll policy for a wait bounded by `timeout`
    pub fn poll_policy(&self, timeout: Duration) -> PollPolicy {
        PollPolicy::new(self.poll_interval, timeout)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn seconds(env: &dyn EnvSource, key: &str) -> Option<Duration> {
    let raw = non_empty(env.var(key))?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!(key, value = %raw, "ignoring invalid duration override");
            None
        }
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> MockEnvSource {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut mock = MockEnvSource::new();
        mock.expect_var().returning(move |key| values.get(key).cloned());
        mock
    }

    #[test]
    fn test_defaults_without_env() {
        let settings = ChaosSettings::from_env(&env(&[]));
        assert_eq!(settings, ChaosSettings::default());
        assert_eq!(settings.group, "chaos-mesh.org");
        assert_eq!(settings.version, "v1alpha1");
        assert_eq!(settings.namespace, "chaos-testing");
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_env_overrides() {
        let settings = ChaosSettings::from_env(&env(&[
            (ENV_NAMESPACE, "chaos"),
            (ENV_FORCE_DELETE_TIMEOUT, "120"),
            (ENV_POLL_INTERVAL, "5"),
        ]));
        assert_eq!(settings.namespace, "chaos");
        assert_eq!(settings.force_delete_timeout, Duration::from_secs(120));
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.group, "chaos-mesh.org");
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let settings = ChaosSettings::from_env(&env(&[
            (ENV_GROUP, "  "),
            (ENV_FORCE_DELETE_TIMEOUT, "soon"),
            (ENV_POLL_INTERVAL, "0"),
        ]));
        assert_eq!(settings, ChaosSettings::default());
    }

    #[test]
    fn test_poll_policy_uses_interval() {
        let settings = ChaosSettings {
            poll_interval: Duration::from_secs(1),
            ..Default::default()
        };
        let policy = settings.poll_policy(Duration::from_secs(30));
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }
}
