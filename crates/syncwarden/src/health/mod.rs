//! Health assessment of live resources.

pub mod rules;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{Comparison, DiffClassification};
use crate::resource::{KindKey, Manifest, ResourceKey};

/// Health of a resource or application.
///
/// Variants are declared in ascending severity, so the derived `Ord` is the
/// aggregation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum HealthStatusCode {
    #[default]
    Healthy,
    Unknown,
    Progressing,
    Missing,
    Suspended,
    Degraded,
}

impl fmt::Display for HealthStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatusCode::Healthy => "Healthy",
            HealthStatusCode::Unknown => "Unknown",
            HealthStatusCode::Progressing => "Progressing",
            HealthStatusCode::Missing => "Missing",
            HealthStatusCode::Suspended => "Suspended",
            HealthStatusCode::Degraded => "Degraded",
        };
        write!(f, "{}", s)
    }
}

/// A health verdict with an optional explanation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthStatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn new(status: HealthStatusCode) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(status: HealthStatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatusCode::Healthy)
    }
}

/// Kind-specific health rule.
pub trait HealthRule: Send + Sync {
    fn assess(&self, live: &Value) -> HealthStatus;
}

/// Health of one resource, keyed for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHealth {
    pub key: ResourceKey,
    pub health: HealthStatus,
}

/// Maps resource kinds to health rules. Kinds without a rule are healthy.
pub struct HealthAssessor {
    rules: HashMap<KindKey, Arc<dyn HealthRule>>,
}

impl HealthAssessor {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut assessor = Self::empty();
        rules::register_builtin(&mut assessor);
        assessor
    }

    pub fn register(&mut self, kind: KindKey, rule: Arc<dyn HealthRule>) {
        self.rules.insert(kind, rule);
    }

    /// Assesses one live resource.
    pub fn assess(&self, live: &Manifest) -> HealthStatus {
        let kind = KindKey::new(live.group(), live.kind());
        match self.rules.get(&kind) {
            Some(rule) => rule.assess(live.object()),
            None => HealthStatus::healthy(),
        }
    }

    /// Assesses every non-hook resource of a comparison. `Missing` diffs are
    /// reported `Missing`; `Extra` resources are not part of the application.
    pub fn assess_comparison(&self, comparison: &Comparison) -> Vec<ResourceHealth> {
        comparison
            .managed()
            .filter(|r| r.classification != DiffClassification::Extra)
            .map(|r| {
                let health = match (&r.classification, &r.live) {
                    (DiffClassification::Missing, _) | (_, None) => {
                        HealthStatus::new(HealthStatusCode::Missing)
                    }
                    (_, Some(live)) => self.assess(live),
                };
                ResourceHealth {
                    key: r.key.clone(),
                    health,
                }
            })
            .collect()
    }
}

impl Default for HealthAssessor {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Worst status under the severity order. Empty input is `Healthy`.
pub fn aggregate<'a, I>(statuses: I) -> HealthStatus
where
    I: IntoIterator<Item = &'a HealthStatus>,
{
    statuses
        .into_iter()
        .fold(None::<&HealthStatus>, |worst, s| match worst {
            Some(w) if w.status >= s.status => Some(w),
            _ => Some(s),
        })
        .cloned()
        .unwrap_or_default()
}
