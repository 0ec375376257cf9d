use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::Policy;
use crate::diff::CompareOptions;
use crate::error::ConfigError;
use crate::normalize::{FieldPath, KindRules};
use crate::resource::DEFAULT_TRACKING_LABEL;
use crate::sync::{ExecutorSettings, RetryPolicy};

/// Top-level controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    /// Directory holding declarative Application files.
    #[serde(default = "default_applications_dir")]
    pub applications_dir: PathBuf,
    /// Directory holding local repository checkouts.
    #[serde(default = "default_repositories_root")]
    pub repositories_root: PathBuf,
    #[serde(default)]
    pub rbac: RbacConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconciliation: ReconciliationConfig::default(),
            sync: SyncConfig::default(),
            diff: DiffConfig::default(),
            applications_dir: default_applications_dir(),
            repositories_root: default_repositories_root(),
            rbac: RbacConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Executor timing derived from the sync section.
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            timeout: Duration::from_secs(self.sync.timeout_secs),
            hook_timeout: Duration::from_secs(self.sync.hook_timeout_secs),
            poll_interval: Duration::from_millis(self.sync.poll_interval_ms),
        }
    }

    pub fn compare_options(&self) -> CompareOptions {
        CompareOptions {
            prune_extra_is_drift: self.diff.prune_extra_is_drift,
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation.interval_secs)
    }

    /// Rejects values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.reconciliation.interval_secs == 0 {
            errors.push("reconciliation.intervalSecs must be greater than 0".to_string());
        }
        if self.reconciliation.workers == 0 {
            errors.push("reconciliation.workers must be greater than 0".to_string());
        }
        if self.reconciliation.tracking_label.trim().is_empty() {
            errors.push("reconciliation.trackingLabel must not be empty".to_string());
        }
        if self.sync.timeout_secs == 0 {
            errors.push("sync.timeoutSecs must be greater than 0".to_string());
        }
        if self.sync.history_limit == 0 {
            errors.push("sync.historyLimit must be greater than 0".to_string());
        }
        if self.sync.hook_timeout_secs == 0 {
            errors.push("sync.hookTimeoutSecs must be greater than 0".to_string());
        }
        if self.sync.poll_interval_ms == 0 {
            errors.push("sync.pollIntervalMs must be greater than 0".to_string());
        }
        if self.sync.retry.backoff.factor == 0 {
            errors.push("sync.retry.backoff.factor must be at least 1".to_string());
        }
        if !errors.is_empty() {
            return Err(ConfigError::Validation {
                message: errors.join("; "),
            });
        }

        for o in &self.diff.resource_overrides {
            if o.kind.is_empty() {
                return Err(ConfigError::Validation {
                    message: "diff.resourceOverrides entries require a kind".to_string(),
                });
            }
            o.to_rules()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationConfig {
    /// Periodic refresh interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Reconciliation worker pool size.
    #[serde(default = "num_cpus::get")]
    pub workers: usize,
    /// Label linking live resources to their application.
    #[serde(default = "default_tracking_label")]
    pub tracking_label: String,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            workers: num_cpus::get(),
            tracking_label: default_tracking_label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sync results retained per application.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_hook_timeout_secs")]
    pub hook_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Retry policy used when an application sets none.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            history_limit: default_history_limit(),
            hook_timeout_secs: default_hook_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffConfig {
    /// Count Extra resources as drift.
    #[serde(default)]
    pub prune_extra_is_drift: bool,
    #[serde(default)]
    pub resource_overrides: Vec<ResourceOverride>,
}

/// Per-kind normalization rules merged on top of the built-in table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOverride {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    #[serde(default)]
    pub ignored_paths: Vec<String>,
    #[serde(default)]
    pub server_defaulted_paths: Vec<String>,
    #[serde(default)]
    pub ordered_paths: Vec<String>,
}

impl ResourceOverride {
    pub fn to_rules(&self) -> Result<KindRules, ConfigError> {
        Ok(KindRules {
            ignored_paths: self.parse_paths(&self.ignored_paths)?,
            server_defaulted_paths: self.parse_paths(&self.server_defaulted_paths)?,
            ordered_paths: self.parse_paths(&self.ordered_paths)?,
        })
    }

    fn parse_paths(&self, raw: &[String]) -> Result<Vec<FieldPath>, ConfigError> {
        raw.iter()
            .map(|p| {
                FieldPath::parse(p).map_err(|reason| ConfigError::InvalidPath {
                    kind: self.kind.clone(),
                    path: p.clone(),
                    reason,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacConfig {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

fn default_interval_secs() -> u64 {
    180
}

fn default_tracking_label() -> String {
    DEFAULT_TRACKING_LABEL.to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_history_limit() -> usize {
    10
}

fn default_hook_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_applications_dir() -> PathBuf {
    PathBuf::from("./applications")
}

fn default_repositories_root() -> PathBuf {
    PathBuf::from("./repos")
}
