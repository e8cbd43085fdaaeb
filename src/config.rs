//! Configuration for the coordinator, loaded from a TOML file and
//! overridable by CLI flags (teacher: `bin/prover-client/src/config.rs`).

use serde::{Deserialize, Serialize};

/// Retry budget for asynchronous coordination-store operations (§6
/// `zk.retries`).
const DEFAULT_ZK_RETRIES: i64 = 3;

/// CHECK-resubmission ceiling per task (§6 `max.resubmit`).
const DEFAULT_MAX_RESUBMIT: u32 = 3;

/// Idle milliseconds before a CHECK-resubmit is allowed (§6
/// `manager.timeout`).
const DEFAULT_MANAGER_TIMEOUT_MS: u64 = 25_000;

/// Milliseconds with zero assignments before a global rescan (§6
/// `manager.unassigned.timeout`).
const DEFAULT_UNASSIGNED_TIMEOUT_MS: u64 = 180_000;

/// Timeout monitor tick period (§6 `manager.timeoutmonitor.period`).
const DEFAULT_TIMEOUT_MONITOR_PERIOD_MS: u64 = 1_000;

/// Namespace prefix task keys are minted under (§6 namespace layout).
const DEFAULT_NAMESPACE: &str = "/coordinator/splitlog";

/// Coordinator configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub namespace: NamespaceConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub resubmit: ResubmitConfig,

    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    #[serde(default = "default_values::namespace")]
    pub path: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            path: default_values::namespace(),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryConfig {
    /// Retry budget for async store ops.
    #[serde(default = "default_values::zk_retries")]
    pub zk_retries: i64,
}

/// Resubmission ceiling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResubmitConfig {
    /// CHECK-resubmission ceiling per task.
    #[serde(default = "default_values::max_resubmit")]
    pub max_resubmit: u32,
}

/// Timing configuration for the timeout monitor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimingConfig {
    /// Idle milliseconds before a CHECK-resubmit is allowed.
    #[serde(default = "default_values::manager_timeout_ms")]
    pub manager_timeout_ms: u64,

    /// Milliseconds with zero assignments before a global rescan.
    #[serde(default = "default_values::unassigned_timeout_ms")]
    pub manager_unassigned_timeout_ms: u64,

    /// Timeout monitor tick period in milliseconds.
    #[serde(default = "default_values::timeout_monitor_period_ms")]
    pub timeout_monitor_period_ms: u64,
}

mod default_values {
    use super::*;

    pub(super) fn namespace() -> String {
        DEFAULT_NAMESPACE.to_string()
    }

    pub(super) fn zk_retries() -> i64 {
        DEFAULT_ZK_RETRIES
    }

    pub(super) fn max_resubmit() -> u32 {
        DEFAULT_MAX_RESUBMIT
    }

    pub(super) fn manager_timeout_ms() -> u64 {
        DEFAULT_MANAGER_TIMEOUT_MS
    }

    pub(super) fn unassigned_timeout_ms() -> u64 {
        DEFAULT_UNASSIGNED_TIMEOUT_MS
    }

    pub(super) fn timeout_monitor_period_ms() -> u64 {
        DEFAULT_TIMEOUT_MONITOR_PERIOD_MS
    }
}

impl CoordinatorConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_round_trips() {
        let sample = r#"
[namespace]
path = "/coordinator/splitlog"

[retry]
zk_retries = 3

[resubmit]
max_resubmit = 3

[timing]
manager_timeout_ms = 25000
manager_unassigned_timeout_ms = 180000
timeout_monitor_period_ms = 1000
"#;
        let parsed: CoordinatorConfig = toml::from_str(sample).unwrap();
        assert_eq!(parsed.retry.zk_retries, DEFAULT_ZK_RETRIES);
        assert_eq!(parsed.resubmit.max_resubmit, DEFAULT_MAX_RESUBMIT);
        assert_eq!(
            parsed.timing.manager_timeout_ms,
            DEFAULT_MANAGER_TIMEOUT_MS
        );

        let reserialized = toml::to_string(&parsed).unwrap();
        let round_tripped: CoordinatorConfig = toml::from_str(&reserialized).unwrap();
        assert_eq!(
            round_tripped.timing.timeout_monitor_period_ms,
            parsed.timing.timeout_monitor_period_ms
        );
    }

    #[test]
    fn empty_file_uses_defaults() {
        let parsed: CoordinatorConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.retry.zk_retries, DEFAULT_ZK_RETRIES);
        assert_eq!(parsed.namespace.path, DEFAULT_NAMESPACE);
    }
}
