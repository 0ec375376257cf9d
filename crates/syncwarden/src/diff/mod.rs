//! Diff engine.
//!
//! Matches desired and live documents by resource identity, normalizes both
//! sides and classifies every resource. The comparison is pure: the same
//! inputs always yield the same [`Comparison`].

pub mod delta;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use delta::{structural_delta, ChangeKind, FieldChange};

use crate::error::{ResourceError, ValidationError};
use crate::normalize::{NormalizerRegistry, Role};
use crate::resource::{Manifest, ResourceKey, COMPARE_IGNORE_EXTRANEOUS};

/// Per-resource comparison outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffClassification {
    /// Desired, not live.
    Missing,
    /// Live and tracked, not desired.
    Extra,
    Synced,
    OutOfSync,
    /// The resource could not be normalized.
    Unknown,
}

impl fmt::Display for DiffClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiffClassification::Missing => "Missing",
            DiffClassification::Extra => "Extra",
            DiffClassification::Synced => "Synced",
            DiffClassification::OutOfSync => "OutOfSync",
            DiffClassification::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Application-level sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStatusCode {
    Synced,
    OutOfSync,
    /// Not yet compared, or the last comparison could not be made.
    #[default]
    Unknown,
}

impl fmt::Display for SyncStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatusCode::Synced => "Synced",
            SyncStatusCode::OutOfSync => "OutOfSync",
            SyncStatusCode::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Comparison of one resource identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDiff {
    pub key: ResourceKey,
    pub classification: DiffClassification,
    /// Hooks are planned for execution but never aggregated.
    pub hook: bool,
    /// Raw desired document.
    pub target: Option<Manifest>,
    /// Raw live document.
    pub live: Option<Manifest>,
    pub normalized_target: Option<Value>,
    pub normalized_live: Option<Value>,
    pub delta: Vec<FieldChange>,
    pub warning: Option<String>,
}

impl ResourceDiff {
    /// True when applying the desired document would change the cluster.
    pub fn requires_apply(&self) -> bool {
        self.target.is_some()
            && matches!(
                self.classification,
                DiffClassification::Missing
                    | DiffClassification::OutOfSync
                    | DiffClassification::Unknown
            )
    }

    /// Whether the resource counts as drift for the application status.
    fn is_drift(&self, options: &CompareOptions) -> bool {
        match self.classification {
            DiffClassification::Missing | DiffClassification::OutOfSync => true,
            DiffClassification::Extra => {
                options.prune_extra_is_drift
                    && !self
                        .live
                        .as_ref()
                        .is_some_and(|m| m.has_compare_option(COMPARE_IGNORE_EXTRANEOUS))
            }
            DiffClassification::Synced | DiffClassification::Unknown => false,
        }
    }
}

/// Knobs that change how diffs aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
    /// Count `Extra` resources as drift.
    pub prune_extra_is_drift: bool,
}

/// Result of comparing a desired set with the live set at one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub revision: String,
    pub status: SyncStatusCode,
    /// One entry per identity, ordered by key.
    pub resources: Vec<ResourceDiff>,
    #[serde(skip)]
    pub warnings: Vec<ResourceError>,
}

impl Comparison {
    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceDiff> {
        self.resources.iter().find(|r| &r.key == key)
    }

    /// Non-hook resources.
    pub fn managed(&self) -> impl Iterator<Item = &ResourceDiff> {
        self.resources.iter().filter(|r| !r.hook)
    }
}

/// Compares desired and live resource sets.
#[derive(Clone)]
pub struct DiffEngine {
    registry: Arc<NormalizerRegistry>,
}

impl DiffEngine {
    pub fn new(registry: Arc<NormalizerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &NormalizerRegistry {
        &self.registry
    }

    /// Compares `desired` against `live`.
    ///
    /// Fails only on a duplicate desired identity. Per-resource normalization
    /// failures degrade that resource to `Unknown` and are reported as warnings.
    pub fn compare(
        &self,
        revision: &str,
        desired: &[Manifest],
        live: &[Manifest],
        options: CompareOptions,
    ) -> Result<Comparison, ValidationError> {
        let mut targets: BTreeMap<ResourceKey, &Manifest> = BTreeMap::new();
        for manifest in desired {
            let key = manifest.key();
            if targets.insert(key.clone(), manifest).is_some() {
                return Err(ValidationError::DuplicateResource { key });
            }
        }
        let lives: BTreeMap<ResourceKey, &Manifest> =
            live.iter().map(|m| (m.key(), m)).collect();

        let keys: BTreeSet<&ResourceKey> = targets.keys().chain(lives.keys()).collect();
        let mut resources = Vec::with_capacity(keys.len());
        let mut warnings = Vec::new();

        for key in keys {
            let target = targets.get(key).copied();
            let live = lives.get(key).copied();
            if target.is_none() && live.is_some_and(Manifest::is_hook) {
                continue;
            }
            let diff = self.diff_resource(key, target, live);
            if let Some(reason) = &diff.warning {
                log::warn!("Diff of {} degraded to Unknown: {}", key, reason);
                warnings.push(ResourceError::Normalize {
                    key: key.clone(),
                    reason: reason.clone(),
                });
            }
            resources.push(diff);
        }

        let status = aggregate_status(&resources, &options);
        Ok(Comparison {
            revision: revision.to_string(),
            status,
            resources,
            warnings,
        })
    }

    fn diff_resource(
        &self,
        key: &ResourceKey,
        target: Option<&Manifest>,
        live: Option<&Manifest>,
    ) -> ResourceDiff {
        let mut diff = ResourceDiff {
            key: key.clone(),
            classification: DiffClassification::Unknown,
            hook: target.is_some_and(Manifest::is_hook),
            target: target.cloned(),
            live: live.cloned(),
            normalized_target: None,
            normalized_live: None,
            delta: Vec::new(),
            warning: None,
        };
        let kind = key.kind_key();

        let normalized_target = match target {
            Some(t) => match self.registry.normalize(&kind, t.object(), Role::Desired, None) {
                Ok(v) => Some(v),
                Err(e) => {
                    diff.warning = Some(format!("desired document: {}", e));
                    return diff;
                }
            },
            None => None,
        };
        let normalized_live = match live {
            Some(l) => match self.registry.normalize(
                &kind,
                l.object(),
                Role::Live,
                target.map(Manifest::object),
            ) {
                Ok(v) => Some(v),
                Err(e) => {
                    diff.warning = Some(format!("live document: {}", e));
                    diff.normalized_target = normalized_target;
                    return diff;
                }
            },
            None => None,
        };

        match (&normalized_target, &normalized_live) {
            (Some(_), None) => diff.classification = DiffClassification::Missing,
            (None, Some(_)) => diff.classification = DiffClassification::Extra,
            (Some(t), Some(l)) => {
                diff.delta = structural_delta(t, l, self.registry.ordered_paths(&kind));
                diff.classification = if diff.delta.is_empty() {
                    DiffClassification::Synced
                } else {
                    DiffClassification::OutOfSync
                };
            }
            (None, None) => {}
        }
        diff.normalized_target = normalized_target;
        diff.normalized_live = normalized_live;
        diff
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(Arc::new(NormalizerRegistry::default()))
    }
}

/// `Synced` iff no non-hook resource counts as drift.
pub fn aggregate_status(resources: &[ResourceDiff], options: &CompareOptions) -> SyncStatusCode {
    if resources.iter().filter(|r| !r.hook).any(|r| r.is_drift(options)) {
        SyncStatusCode::OutOfSync
    } else {
        SyncStatusCode::Synced
    }
}
