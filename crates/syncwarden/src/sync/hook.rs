//! Lifecycle hooks declared through annotations.

use serde::{Deserialize, Serialize};

use crate::resource::{Manifest, ANNOTATION_HOOK, ANNOTATION_HOOK_DELETE_POLICY};

/// The sync phase a hook is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookPhase {
    PreSync,
    Sync,
    PostSync,
    SyncFail,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::PreSync => write!(f, "PreSync"),
            HookPhase::Sync => write!(f, "Sync"),
            HookPhase::PostSync => write!(f, "PostSync"),
            HookPhase::SyncFail => write!(f, "SyncFail"),
        }
    }
}

impl std::str::FromStr for HookPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PreSync" => Ok(HookPhase::PreSync),
            "Sync" => Ok(HookPhase::Sync),
            "PostSync" => Ok(HookPhase::PostSync),
            "SyncFail" => Ok(HookPhase::SyncFail),
            other => Err(format!("Unknown hook phase: {}", other)),
        }
    }
}

/// When a hook resource is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookDeletePolicy {
    /// Delete any previous instance before creating the hook.
    BeforeHookCreation,
    /// Delete once the hook succeeded.
    HookSucceeded,
    /// Delete once the hook failed.
    HookFailed,
}

impl std::str::FromStr for HookDeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BeforeHookCreation" => Ok(HookDeletePolicy::BeforeHookCreation),
            "HookSucceeded" => Ok(HookDeletePolicy::HookSucceeded),
            "HookFailed" => Ok(HookDeletePolicy::HookFailed),
            other => Err(format!("Unknown hook delete policy: {}", other)),
        }
    }
}

/// Parsed hook annotations of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub phases: Vec<HookPhase>,
    /// Empty means the hook is never deleted.
    pub delete_policies: Vec<HookDeletePolicy>,
}

impl Hook {
    /// Reads the hook annotations of a manifest.
    ///
    /// Unknown phases are ignored with a warning; a manifest whose annotation names
    /// no valid phase is not a hook.
    pub fn from_manifest(manifest: &Manifest) -> Option<Self> {
        let raw = manifest.annotation(ANNOTATION_HOOK)?;
        let mut phases: Vec<HookPhase> = Vec::new();
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            match part.parse() {
                Ok(phase) if !phases.contains(&phase) => phases.push(phase),
                Ok(_) => {}
                Err(e) => log::warn!("{}: {}", manifest.key(), e),
            }
        }
        if phases.is_empty() {
            return None;
        }
        phases.sort();

        let delete_policies = match manifest.annotation(ANNOTATION_HOOK_DELETE_POLICY) {
            None => vec![HookDeletePolicy::BeforeHookCreation],
            Some(raw) if raw.trim() == "None" => Vec::new(),
            Some(raw) => raw
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .filter_map(|p| match p.parse() {
                    Ok(policy) => Some(policy),
                    Err(e) => {
                        log::warn!("{}: {}", manifest.key(), e);
                        None
                    }
                })
                .collect(),
        };

        Some(Self {
            phases,
            delete_policies,
        })
    }

    pub fn has_policy(&self, policy: HookDeletePolicy) -> bool {
        self.delete_policies.contains(&policy)
    }
}
