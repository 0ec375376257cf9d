//! Application status reported by the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::{Comparison, DiffClassification, SyncStatusCode};
use crate::health::{HealthStatus, ResourceHealth};
use crate::resource::ResourceKey;
use crate::sync::SyncOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The desired set was invalid.
    ComparisonError,
    /// Rendering the desired set failed.
    SourceError,
    /// The cluster or its cache was unavailable.
    InfrastructureError,
    /// The last sync operation did not succeed.
    SyncError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl ApplicationCondition {
    pub fn new(condition_type: ConditionType, message: impl Into<String>) -> Self {
        Self {
            condition_type,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Status of one resource of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub key: ResourceKey,
    pub status: DiffClassification,
    #[serde(default)]
    pub hook: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status: SyncStatusCode,
    /// Revision the comparison was made against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceStatus>,
}

impl SyncStatus {
    /// Builds the sync status of a comparison, attaching per-resource health.
    pub fn from_comparison(comparison: &Comparison, health: &[ResourceHealth]) -> Self {
        let resources = comparison
            .resources
            .iter()
            .map(|r| ResourceStatus {
                key: r.key.clone(),
                status: r.classification,
                hook: r.hook,
                health: health
                    .iter()
                    .find(|h| h.key == r.key)
                    .map(|h| h.health.clone()),
                warning: r.warning.clone(),
            })
            .collect();
        Self {
            status: comparison.status,
            revision: Some(comparison.revision.clone()),
            resources,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    pub sync: SyncStatus,
    pub health: HealthStatus,
    #[serde(default)]
    pub conditions: Vec<ApplicationCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciled_at: Option<DateTime<Utc>>,
    /// Current or most recent operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_state: Option<SyncOperation>,
}

impl ApplicationStatus {
    /// Replaces any condition of the same type.
    pub fn set_condition(&mut self, condition: ApplicationCondition) {
        self.conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
    }

    pub fn clear_condition(&mut self, condition_type: ConditionType) {
        self.conditions.retain(|c| c.condition_type != condition_type);
    }

    pub fn has_condition(&self, condition_type: ConditionType) -> bool {
        self.conditions
            .iter()
            .any(|c| c.condition_type == condition_type)
    }

    /// Resources currently reported `Missing`.
    pub fn missing(&self) -> impl Iterator<Item = &ResourceStatus> {
        self.sync
            .resources
            .iter()
            .filter(|r| r.status == DiffClassification::Missing)
    }
}
