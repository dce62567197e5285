//! Recognised configuration options (spec §6.3), layered under a `loader:`
//! namespace in the YAML merged by [`crate::load_layered_yaml`].
//!
//! Every field has the spec's documented default, so a deployment that
//! supplies no `loader:` block at all still boots with sane behavior.

use serde::Deserialize;
use serde_json::Value;

fn default_dispatch_period() -> u64 {
    10
}
fn default_recovery_period() -> u64 {
    60
}
fn default_stalelock_period() -> u64 {
    60
}
fn default_worker_pool_size() -> usize {
    16
}
fn default_query_timeout() -> u64 {
    60
}
fn default_hung_threshold() -> u64 {
    1800
}
fn default_lookback_hours() -> i64 {
    24
}
fn default_lock_max_age() -> u64 {
    1800
}
fn default_failed_threshold() -> u64 {
    1200
}
fn default_replica_name_env() -> String {
    "LDR_REPLICA_NAME".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_dispatch_period")]
    pub dispatch_period_seconds: u64,
    #[serde(default = "default_recovery_period")]
    pub recovery_period_seconds: u64,
    #[serde(default = "default_stalelock_period")]
    pub stalelock_period_seconds: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            dispatch_period_seconds: default_dispatch_period(),
            recovery_period_seconds: default_recovery_period(),
            stalelock_period_seconds: default_stalelock_period(),
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
    #[serde(default = "default_hung_threshold")]
    pub hung_threshold_seconds: u64,
    #[serde(default = "default_lookback_hours")]
    pub default_lookback_hours: i64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            query_timeout_seconds: default_query_timeout(),
            hung_threshold_seconds: default_hung_threshold(),
            default_lookback_hours: default_lookback_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_max_age")]
    pub max_age_seconds: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            max_age_seconds: default_lock_max_age(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySettings {
    #[serde(default = "default_failed_threshold")]
    pub failed_threshold_seconds: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            failed_threshold_seconds: default_failed_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaSettings {
    #[serde(default = "default_replica_name_env")]
    pub name_env: String,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            name_env: default_replica_name_env(),
        }
    }
}

/// All recognised `loader:` options, merged from layered YAML by
/// [`crate::load_layered_yaml`]. `encryption.key` is deliberately absent
/// here — it is a secret, resolved separately by [`crate::secrets`] so it
/// never ends up in a config-hash log line or a `Debug` dump of this struct.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoaderSettings {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub replica: ReplicaSettings,
}

impl LoaderSettings {
    /// Parse the `loader:` namespace out of a merged config JSON value
    /// (the `config_json` field of [`crate::LoadedConfig`]). Absent
    /// namespace yields all-default settings.
    pub fn from_config_json(config_json: &Value) -> anyhow::Result<Self> {
        match config_json.get("loader") {
            Some(v) => Ok(serde_json::from_value(v.clone())?),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_section_6_3() {
        let settings = LoaderSettings::default();
        assert_eq!(settings.scheduler.dispatch_period_seconds, 10);
        assert_eq!(settings.scheduler.recovery_period_seconds, 60);
        assert_eq!(settings.scheduler.stalelock_period_seconds, 60);
        assert_eq!(settings.scheduler.worker_pool_size, 16);
        assert_eq!(settings.executor.query_timeout_seconds, 60);
        assert_eq!(settings.executor.hung_threshold_seconds, 1800);
        assert_eq!(settings.executor.default_lookback_hours, 24);
        assert_eq!(settings.lock.max_age_seconds, 1800);
        assert_eq!(settings.recovery.failed_threshold_seconds, 1200);
        assert_eq!(settings.replica.name_env, "LDR_REPLICA_NAME");
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        // Layered YAML files are authored in snake_case, matching the rest
        // of the workspace's serde conventions.
        let json = serde_json::json!({
            "loader": {
                "scheduler": { "dispatch_period_seconds": 5 }
            }
        });
        let settings = LoaderSettings::from_config_json(&json).unwrap();
        assert_eq!(settings.scheduler.dispatch_period_seconds, 5);
        assert_eq!(settings.scheduler.recovery_period_seconds, 60);
    }

    #[test]
    fn missing_namespace_yields_defaults() {
        let json = serde_json::json!({});
        let settings = LoaderSettings::from_config_json(&json).unwrap();
        assert_eq!(settings.scheduler.worker_pool_size, 16);
    }
}
