//! Sync operations, their lifecycle and results.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hook::HookPhase;
use super::plan::ActionKind;
use crate::resource::{AppKey, ResourceKey};

/// Exponential backoff between retries of one resource action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    #[serde(default = "default_backoff_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: u32,
    #[serde(default = "default_backoff_max_duration_ms")]
    pub max_duration_ms: u64,
}

fn default_backoff_duration_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_backoff_max_duration_ms() -> u64 {
    30_000
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            duration_ms: default_backoff_duration_ms(),
            factor: default_backoff_factor(),
            max_duration_ms: default_backoff_max_duration_ms(),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = (self.factor.max(1) as u64).saturating_pow(exponent);
        let ms = self
            .duration_ms
            .saturating_mul(multiplier)
            .min(self.max_duration_ms.max(self.duration_ms));
        Duration::from_millis(ms)
    }
}

/// How often a failed resource action is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_retry_limit")]
    pub limit: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_retry_limit() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: default_retry_limit(),
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            limit: 0,
            backoff: Backoff::default(),
        }
    }
}

/// Options of one sync operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// Validate against the cluster without persisting anything.
    #[serde(default)]
    pub dry_run: bool,
    /// Delete `Extra` resources.
    #[serde(default)]
    pub prune: bool,
    /// Restrict the operation to these resources. Hooks are skipped when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceKey>>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Who started an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "subject")]
pub enum Initiator {
    User(String),
    Automated,
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initiator::User(subject) => write!(f, "user '{}'", subject),
            Initiator::Automated => write!(f, "automated sync"),
        }
    }
}

/// Lifecycle phase of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationPhase {
    Pending,
    Running,
    Succeeded,
    /// A resource or hook failed.
    Failed,
    /// Infrastructure failure or deadline exceeded.
    Error,
    /// Cancelled while running.
    Terminated,
}

impl OperationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationPhase::Succeeded
                | OperationPhase::Failed
                | OperationPhase::Error
                | OperationPhase::Terminated
        )
    }

    /// Valid transitions: `Pending -> Running -> terminal`.
    pub fn can_transition_to(&self, next: OperationPhase) -> bool {
        match self {
            OperationPhase::Pending => next == OperationPhase::Running,
            OperationPhase::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationPhase::Pending => "Pending",
            OperationPhase::Running => "Running",
            OperationPhase::Succeeded => "Succeeded",
            OperationPhase::Failed => "Failed",
            OperationPhase::Error => "Error",
            OperationPhase::Terminated => "Terminated",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid operation transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: OperationPhase,
    pub to: OperationPhase,
}

/// A request to reconcile live state to desired state at one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: String,
    pub app: AppKey,
    pub revision: String,
    pub options: SyncOptions,
    pub initiator: Initiator,
    pub phase: OperationPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    pub fn new(
        app: AppKey,
        revision: impl Into<String>,
        options: SyncOptions,
        initiator: Initiator,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app,
            revision: revision.into(),
            options,
            initiator,
            phase: OperationPhase::Pending,
            message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Moves the operation to `next`, stamping start and finish times.
    pub fn transition(
        &mut self,
        next: OperationPhase,
        message: Option<String>,
    ) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        if message.is_some() {
            self.message = message;
        }
        match next {
            OperationPhase::Running => self.started_at = Some(Utc::now()),
            p if p.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }
}

/// Outcome of one resource action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceResultStatus {
    Synced,
    Pruned,
    SyncFailed,
    Skipped,
}

impl fmt::Display for ResourceResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceResultStatus::Synced => "Synced",
            ResourceResultStatus::Pruned => "Pruned",
            ResourceResultStatus::SyncFailed => "SyncFailed",
            ResourceResultStatus::Skipped => "Skipped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResult {
    pub key: ResourceKey,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_phase: Option<HookPhase>,
    /// Index of the wave the action belongs to; `None` for actions the plan skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<usize>,
    pub status: ResourceResultStatus,
    #[serde(default)]
    pub message: String,
    /// Attempts made, including the first.
    #[serde(default)]
    pub attempts: u32,
}

/// Terminal record of one sync operation, retained as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub operation_id: String,
    pub app: AppKey,
    pub revision: String,
    pub initiator: Initiator,
    pub dry_run: bool,
    pub phase: OperationPhase,
    #[serde(default)]
    pub message: String,
    pub resources: Vec<ResourceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    /// Snapshot of a terminal operation and its per-resource outcomes.
    pub fn from_operation(operation: &SyncOperation, resources: Vec<ResourceResult>) -> Self {
        Self {
            operation_id: operation.id.clone(),
            app: operation.app.clone(),
            revision: operation.revision.clone(),
            initiator: operation.initiator.clone(),
            dry_run: operation.options.dry_run,
            phase: operation.phase,
            message: operation.message.clone().unwrap_or_default(),
            resources,
            started_at: operation.started_at,
            finished_at: operation.finished_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn resource(&self, key: &ResourceKey) -> Option<&ResourceResult> {
        self.resources.iter().find(|r| &r.key == key)
    }

    pub fn count(&self, status: ResourceResultStatus) -> usize {
        self.resources.iter().filter(|r| r.status == status).count()
    }
}
