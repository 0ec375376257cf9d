//! Sync planning: turns a comparison into ordered waves of actions.
//!
//! Waves are ordered by phase (PreSync, Sync, PostSync, Prune, SyncFail),
//! then by the `sync-wave` annotation, then by kind tier. Pruning runs in
//! reverse creation order.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::hook::{Hook, HookPhase};
use super::operation::SyncOptions;
use crate::diff::{DiffClassification, ResourceDiff};
use crate::resource::{Manifest, ResourceKey, SYNC_OPTION_NO_PRUNE};

/// Kinds in creation order. Unlisted kinds sort after all of them.
const KIND_ORDER: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "IngressClass",
    "Ingress",
    "APIService",
];

/// Dependency tier of a kind: 0 cluster foundations, 1 supporting
/// configuration, 2 services, 3 workloads, 4 everything else.
pub fn kind_tier(kind: &str) -> usize {
    match kind {
        "Namespace" | "CustomResourceDefinition" => 0,
        "NetworkPolicy" | "ResourceQuota" | "LimitRange" | "PodDisruptionBudget"
        | "ServiceAccount" | "Secret" | "ConfigMap" | "StorageClass" | "PersistentVolume"
        | "PersistentVolumeClaim" | "ClusterRole" | "ClusterRoleBinding" | "Role"
        | "RoleBinding" => 1,
        "Service" => 2,
        "DaemonSet" | "Pod" | "ReplicationController" | "ReplicaSet" | "Deployment"
        | "HorizontalPodAutoscaler" | "StatefulSet" | "Job" | "CronJob" => 3,
        _ => 4,
    }
}

fn kind_rank(kind: &str) -> usize {
    KIND_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(KIND_ORDER.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Apply,
    Prune,
    RunHook,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Apply => "Apply",
            ActionKind::Prune => "Prune",
            ActionKind::RunHook => "RunHook",
        };
        write!(f, "{}", s)
    }
}

/// One resource action of a wave.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncAction {
    pub key: ResourceKey,
    pub kind: ActionKind,
    /// Document to apply, or the live document for a prune.
    pub manifest: Manifest,
    pub hook: Option<Hook>,
    pub hook_phase: Option<HookPhase>,
    /// A failure of a blocking action stops the operation.
    pub blocking: bool,
}

/// Phase a wave belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WavePhase {
    PreSync,
    Sync,
    PostSync,
    Prune,
    SyncFail,
}

impl fmt::Display for WavePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WavePhase::PreSync => "PreSync",
            WavePhase::Sync => "Sync",
            WavePhase::PostSync => "PostSync",
            WavePhase::Prune => "Prune",
            WavePhase::SyncFail => "SyncFail",
        };
        write!(f, "{}", s)
    }
}

impl From<HookPhase> for WavePhase {
    fn from(phase: HookPhase) -> Self {
        match phase {
            HookPhase::PreSync => WavePhase::PreSync,
            HookPhase::Sync => WavePhase::Sync,
            HookPhase::PostSync => WavePhase::PostSync,
            HookPhase::SyncFail => WavePhase::SyncFail,
        }
    }
}

/// A group of actions executed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Wave {
    /// Position in the plan.
    pub index: usize,
    pub phase: WavePhase,
    /// Value of the `sync-wave` annotation shared by the actions.
    pub sync_wave: i32,
    pub tier: usize,
    pub actions: Vec<SyncAction>,
}

/// A resource the plan deliberately leaves alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAction {
    pub key: ResourceKey,
    pub kind: ActionKind,
    pub reason: String,
}

/// Ordered waves of one sync operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    pub dry_run: bool,
    pub waves: Vec<Wave>,
    pub skipped: Vec<SkippedAction>,
}

impl ExecutionPlan {
    /// Waves run on every operation, in order.
    pub fn main_waves(&self) -> impl Iterator<Item = &Wave> {
        self.waves.iter().filter(|w| w.phase != WavePhase::SyncFail)
    }

    /// Waves run only when the operation fails.
    pub fn sync_fail_waves(&self) -> impl Iterator<Item = &Wave> {
        self.waves.iter().filter(|w| w.phase == WavePhase::SyncFail)
    }

    pub fn action_count(&self) -> usize {
        self.waves.iter().map(|w| w.actions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

/// Ordering key of a wave: phase, then sync wave, then tier.
type WaveKey = (WavePhase, i32, usize);

/// Builds the execution plan for `diffs`.
pub fn plan(diffs: &[ResourceDiff], options: &SyncOptions) -> ExecutionPlan {
    let subset: Option<HashSet<&ResourceKey>> =
        options.resources.as_ref().map(|keys| keys.iter().collect());
    let mut groups: BTreeMap<WaveKey, Vec<SyncAction>> = BTreeMap::new();
    let mut skipped = Vec::new();

    for diff in diffs {
        if let Some(subset) = &subset {
            if diff.hook || !subset.contains(&diff.key) {
                continue;
            }
        }

        if diff.hook {
            let Some(target) = &diff.target else {
                continue;
            };
            let Some(hook) = target.hook() else {
                continue;
            };
            let tier = kind_tier(target.kind());
            for phase in &hook.phases {
                groups
                    .entry((WavePhase::from(*phase), target.sync_wave(), tier))
                    .or_default()
                    .push(SyncAction {
                        key: diff.key.clone(),
                        kind: ActionKind::RunHook,
                        manifest: target.clone(),
                        hook: Some(hook.clone()),
                        hook_phase: Some(*phase),
                        blocking: true,
                    });
            }
            continue;
        }

        match (&diff.target, &diff.live) {
            (Some(target), _) if diff.requires_apply() => {
                let tier = kind_tier(target.kind());
                groups
                    .entry((WavePhase::Sync, target.sync_wave(), tier))
                    .or_default()
                    .push(SyncAction {
                        key: diff.key.clone(),
                        kind: ActionKind::Apply,
                        manifest: target.clone(),
                        hook: None,
                        hook_phase: None,
                        blocking: tier == 0,
                    });
            }
            (None, Some(live)) if diff.classification == DiffClassification::Extra => {
                if !options.prune {
                    skipped.push(SkippedAction {
                        key: diff.key.clone(),
                        kind: ActionKind::Prune,
                        reason: "pruning disabled".to_string(),
                    });
                } else if live.has_sync_option(SYNC_OPTION_NO_PRUNE) {
                    skipped.push(SkippedAction {
                        key: diff.key.clone(),
                        kind: ActionKind::Prune,
                        reason: format!("{} annotation set", SYNC_OPTION_NO_PRUNE),
                    });
                } else {
                    // reversed creation order: later waves and tiers go first
                    let tier = kind_tier(live.kind());
                    groups
                        .entry((WavePhase::Prune, live.sync_wave().saturating_neg(), 4 - tier))
                        .or_default()
                        .push(SyncAction {
                            key: diff.key.clone(),
                            kind: ActionKind::Prune,
                            manifest: live.clone(),
                            hook: None,
                            hook_phase: None,
                            blocking: false,
                        });
                }
            }
            _ => {}
        }
    }

    let waves = groups
        .into_iter()
        .enumerate()
        .map(|(index, ((phase, sync_wave, tier), mut actions))| {
            actions.sort_by(|a, b| {
                (kind_rank(&a.key.kind), &a.key).cmp(&(kind_rank(&b.key.kind), &b.key))
            });
            let (sync_wave, tier) = if phase == WavePhase::Prune {
                (sync_wave.saturating_neg(), 4 - tier)
            } else {
                (sync_wave, tier)
            };
            Wave {
                index,
                phase,
                sync_wave,
                tier,
                actions,
            }
        })
        .collect();

    ExecutionPlan {
        dry_run: options.dry_run,
        waves,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{CompareOptions, DiffEngine};
    use serde_json::{json, Value};

    fn manifest(value: Value) -> Manifest {
        Manifest::from_value(value).unwrap()
    }

    fn namespace() -> Manifest {
        manifest(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "ns1"}}))
    }

    fn deployment() -> Manifest {
        manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "ns1"},
            "spec": {"replicas": 2}
        }))
    }

    fn config_map(name: &str, annotations: Value) -> Manifest {
        manifest(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "ns1", "annotations": annotations},
            "data": {"k": "v"}
        }))
    }

    fn hook(name: &str, phase: &str) -> Manifest {
        manifest(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "namespace": "ns1",
                "annotations": {"syncwarden.io/hook": phase}
            },
            "spec": {}
        }))
    }

    fn diffs(desired: &[Manifest], live: &[Manifest]) -> Vec<ResourceDiff> {
        DiffEngine::default()
            .compare("abc", desired, live, CompareOptions::default())
            .unwrap()
            .resources
    }

    fn kinds(wave: &Wave) -> Vec<&str> {
        wave.actions.iter().map(|a| a.key.kind.as_str()).collect()
    }

    #[test]
    fn test_namespace_before_deployment() {
        let plan = plan(&diffs(&[deployment(), namespace()], &[]), &SyncOptions::default());
        assert_eq!(plan.waves.len(), 2);
        assert_eq!(kinds(&plan.waves[0]), vec!["Namespace"]);
        assert!(plan.waves[0].actions[0].blocking);
        assert_eq!(kinds(&plan.waves[1]), vec!["Deployment"]);
        assert_eq!(plan.waves[1].actions[0].kind, ActionKind::Apply);
    }

    #[test]
    fn test_synced_resources_are_not_planned() {
        let plan = plan(
            &diffs(&[namespace()], &[namespace()]),
            &SyncOptions::default(),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_sync_wave_annotation_orders_before_tier() {
        let early = config_map("early", json!({"syncwarden.io/sync-wave": "-1"}));
        let late = config_map("late", json!({"syncwarden.io/sync-wave": "5"}));
        let plan = plan(
            &diffs(&[late, deployment(), early], &[]),
            &SyncOptions::default(),
        );
        let names: Vec<&str> = plan
            .waves
            .iter()
            .map(|w| w.actions[0].key.name.as_str())
            .collect();
        assert_eq!(names, vec!["early", "web", "late"]);
    }

    #[test]
    fn test_hook_phases() {
        let desired = vec![
            hook("post", "PostSync"),
            deployment(),
            hook("pre", "PreSync"),
            hook("during", "Sync"),
            hook("cleanup", "SyncFail"),
        ];
        let plan = plan(&diffs(&desired, &[]), &SyncOptions::default());
        let phases: Vec<WavePhase> = plan.waves.iter().map(|w| w.phase).collect();
        assert_eq!(
            phases,
            vec![
                WavePhase::PreSync,
                WavePhase::Sync,
                WavePhase::PostSync,
                WavePhase::SyncFail
            ]
        );
        // Sync hook shares the workload tier with the deployment
        assert_eq!(kinds(&plan.waves[1]), vec!["Deployment", "Job"]);
        assert_eq!(plan.sync_fail_waves().count(), 1);
        assert_eq!(plan.main_waves().count(), 3);
    }

    #[test]
    fn test_prune_disabled_skips_extra() {
        let plan = plan(
            &diffs(&[], &[config_map("stale", json!({}))]),
            &SyncOptions::default(),
        );
        assert!(plan.is_empty());
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].reason, "pruning disabled");
    }

    #[test]
    fn test_prune_reverse_order_and_no_prune_annotation() {
        let live = vec![
            namespace(),
            deployment(),
            config_map("stale", json!({})),
            config_map("keep", json!({"syncwarden.io/sync-options": "Prune=false"})),
        ];
        let options = SyncOptions {
            prune: true,
            ..Default::default()
        };
        let plan = plan(&diffs(&[], &live), &options);
        let order: Vec<Vec<&str>> = plan.waves.iter().map(kinds).collect();
        assert_eq!(
            order,
            vec![vec!["Deployment"], vec!["ConfigMap"], vec!["Namespace"]]
        );
        assert!(plan.waves.iter().all(|w| w.phase == WavePhase::Prune));
        assert_eq!(plan.waves[2].tier, 0);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].key.name, "keep");
    }

    #[test]
    fn test_resource_subset_excludes_hooks() {
        let desired = vec![namespace(), deployment(), hook("pre", "PreSync")];
        let options = SyncOptions {
            resources: Some(vec![deployment().key()]),
            ..Default::default()
        };
        let plan = plan(&diffs(&desired, &[]), &options);
        assert_eq!(plan.waves.len(), 1);
        assert_eq!(kinds(&plan.waves[0]), vec!["Deployment"]);
    }

    #[test]
    fn test_dry_run_plan_matches() {
        let d = diffs(&[namespace(), deployment()], &[]);
        let real = plan(&d, &SyncOptions::default());
        let dry = plan(
            &d,
            &SyncOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        assert!(dry.dry_run);
        assert_eq!(real.waves, dry.waves);
    }
}
