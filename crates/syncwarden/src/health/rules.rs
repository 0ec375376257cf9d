//! Built-in health rules for core workload and networking kinds.

use std::sync::Arc;

use serde_json::Value;

use super::{HealthAssessor, HealthRule, HealthStatus, HealthStatusCode};
use crate::resource::KindKey;

/// Pod waiting reasons that never resolve on their own.
const FATAL_WAITING_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
];

pub(super) fn register_builtin(assessor: &mut HealthAssessor) {
    assessor.register(KindKey::new("apps", "Deployment"), Arc::new(DeploymentHealth));
    assessor.register(KindKey::new("apps", "StatefulSet"), Arc::new(StatefulSetHealth));
    assessor.register(KindKey::new("apps", "DaemonSet"), Arc::new(DaemonSetHealth));
    assessor.register(KindKey::new("apps", "ReplicaSet"), Arc::new(ReplicaSetHealth));
    assessor.register(KindKey::new("", "Pod"), Arc::new(PodHealth));
    assessor.register(KindKey::new("batch", "Job"), Arc::new(JobHealth));
    assessor.register(KindKey::new("batch", "CronJob"), Arc::new(CronJobHealth));
    assessor.register(KindKey::new("", "Service"), Arc::new(ServiceHealth));
    assessor.register(
        KindKey::new("", "PersistentVolumeClaim"),
        Arc::new(PersistentVolumeClaimHealth),
    );
    assessor.register(
        KindKey::new("networking.k8s.io", "Ingress"),
        Arc::new(IngressHealth),
    );
}

fn int_at(doc: &Value, pointer: &str) -> Option<i64> {
    match doc.pointer(pointer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn bool_at(doc: &Value, pointer: &str) -> bool {
    doc.pointer(pointer).and_then(Value::as_bool).unwrap_or(false)
}

fn str_at<'a>(doc: &'a Value, pointer: &str) -> Option<&'a str> {
    doc.pointer(pointer).and_then(Value::as_str)
}

/// A `status.conditions` entry.
struct Condition<'a> {
    status: &'a str,
    reason: &'a str,
    message: &'a str,
}

fn condition<'a>(doc: &'a Value, kind: &str) -> Option<Condition<'a>> {
    doc.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(kind))
        .map(|c| Condition {
            status: c.get("status").and_then(Value::as_str).unwrap_or_default(),
            reason: c.get("reason").and_then(Value::as_str).unwrap_or_default(),
            message: c.get("message").and_then(Value::as_str).unwrap_or_default(),
        })
}

/// `Progressing` while the controller has not observed the latest spec.
fn generation_lag(doc: &Value, kind: &str) -> Option<HealthStatus> {
    let generation = int_at(doc, "/metadata/generation").unwrap_or(0);
    let observed = int_at(doc, "/status/observedGeneration").unwrap_or(0);
    (generation > 0 && observed < generation).then(|| {
        HealthStatus::with_message(
            HealthStatusCode::Progressing,
            format!(
                "Waiting for rollout to finish: observed {} generation less than desired generation",
                kind
            ),
        )
    })
}

fn has_lb_ingress(doc: &Value) -> bool {
    doc.pointer("/status/loadBalancer/ingress")
        .and_then(Value::as_array)
        .is_some_and(|i| !i.is_empty())
}

pub struct DeploymentHealth;

impl HealthRule for DeploymentHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        if bool_at(live, "/spec/paused") {
            return HealthStatus::with_message(HealthStatusCode::Suspended, "Deployment is paused");
        }
        if let Some(c) = condition(live, "Progressing") {
            if c.reason == "ProgressDeadlineExceeded" {
                return HealthStatus::with_message(
                    HealthStatusCode::Degraded,
                    format!("Deployment exceeded its progress deadline: {}", c.message),
                );
            }
        }
        if let Some(c) = condition(live, "ReplicaFailure") {
            if c.status == "True" {
                return HealthStatus::with_message(HealthStatusCode::Degraded, c.message);
            }
        }
        if let Some(lag) = generation_lag(live, "deployment") {
            return lag;
        }

        let replicas = int_at(live, "/spec/replicas").unwrap_or(1);
        let updated = int_at(live, "/status/updatedReplicas").unwrap_or(0);
        let total = int_at(live, "/status/replicas").unwrap_or(0);
        let available = int_at(live, "/status/availableReplicas").unwrap_or(0);

        if updated < replicas {
            HealthStatus::with_message(
                HealthStatusCode::Progressing,
                format!(
                    "Waiting for rollout to finish: {} out of {} new replicas have been updated",
                    updated, replicas
                ),
            )
        } else if total > updated {
            HealthStatus::with_message(
                HealthStatusCode::Progressing,
                format!(
                    "Waiting for rollout to finish: {} old replicas are pending termination",
                    total - updated
                ),
            )
        } else if available < updated {
            HealthStatus::with_message(
                HealthStatusCode::Progressing,
                format!(
                    "Waiting for rollout to finish: {} of {} updated replicas are available",
                    available, updated
                ),
            )
        } else {
            HealthStatus::healthy()
        }
    }
}

pub struct StatefulSetHealth;

impl HealthRule for StatefulSetHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        if let Some(lag) = generation_lag(live, "statefulset") {
            return lag;
        }
        let replicas = int_at(live, "/spec/replicas").unwrap_or(1);
        let ready = int_at(live, "/status/readyReplicas").unwrap_or(0);
        if ready < replicas {
            return HealthStatus::with_message(
                HealthStatusCode::Progressing,
                format!("Waiting for {} pods to be ready, {} ready", replicas, ready),
            );
        }
        let current = str_at(live, "/status/currentRevision");
        let update = str_at(live, "/status/updateRevision");
        if update.is_some() && current != update {
            return HealthStatus::with_message(
                HealthStatusCode::Progressing,
                "Waiting for partitioned roll out to finish",
            );
        }
        HealthStatus::healthy()
    }
}

pub struct DaemonSetHealth;

impl HealthRule for DaemonSetHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        if let Some(lag) = generation_lag(live, "daemonset") {
            return lag;
        }
        let desired = int_at(live, "/status/desiredNumberScheduled").unwrap_or(0);
        let updated = int_at(live, "/status/updatedNumberScheduled").unwrap_or(0);
        let available = int_at(live, "/status/numberAvailable").unwrap_or(0);
        if updated < desired {
            HealthStatus::with_message(
                HealthStatusCode::Progressing,
                format!(
                    "Waiting for daemon set rollout: {} out of {} new pods have been updated",
                    updated, desired
                ),
            )
        } else if available < desired {
            HealthStatus::with_message(
                HealthStatusCode::Progressing,
                format!(
                    "Waiting for daemon set rollout: {} of {} updated pods are available",
                    available, desired
                ),
            )
        } else {
            HealthStatus::healthy()
        }
    }
}

pub struct ReplicaSetHealth;

impl HealthRule for ReplicaSetHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        if let Some(c) = condition(live, "ReplicaFailure") {
            if c.status == "True" {
                return HealthStatus::with_message(HealthStatusCode::Degraded, c.message);
            }
        }
        if let Some(lag) = generation_lag(live, "replicaset") {
            return lag;
        }
        let replicas = int_at(live, "/spec/replicas").unwrap_or(1);
        let available = int_at(live, "/status/availableReplicas").unwrap_or(0);
        if available < replicas {
            HealthStatus::with_message(
                HealthStatusCode::Progressing,
                format!("Waiting for rollout to finish: {} of {} replicas are available", available, replicas),
            )
        } else {
            HealthStatus::healthy()
        }
    }
}

pub struct PodHealth;

impl HealthRule for PodHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        let statuses = live
            .pointer("/status/containerStatuses")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for status in statuses {
            let reason = status
                .pointer("/state/waiting/reason")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if FATAL_WAITING_REASONS.contains(&reason) {
                let message = status
                    .pointer("/state/waiting/message")
                    .and_then(Value::as_str)
                    .unwrap_or(reason);
                return HealthStatus::with_message(HealthStatusCode::Degraded, message);
            }
        }

        match str_at(live, "/status/phase") {
            None | Some("Pending") => HealthStatus::new(HealthStatusCode::Progressing),
            Some("Succeeded") => HealthStatus::healthy(),
            Some("Failed") => HealthStatus::with_message(
                HealthStatusCode::Degraded,
                str_at(live, "/status/message").unwrap_or("Pod failed"),
            ),
            Some("Running") => {
                let all_ready = statuses
                    .iter()
                    .all(|s| s.get("ready").and_then(Value::as_bool).unwrap_or(false));
                if all_ready {
                    HealthStatus::healthy()
                } else {
                    HealthStatus::with_message(
                        HealthStatusCode::Progressing,
                        "Waiting for containers to become ready",
                    )
                }
            }
            Some(other) => HealthStatus::with_message(
                HealthStatusCode::Unknown,
                format!("Unrecognized pod phase '{}'", other),
            ),
        }
    }
}

pub struct JobHealth;

impl HealthRule for JobHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        if let Some(c) = condition(live, "Failed") {
            if c.status == "True" {
                let message = if c.message.is_empty() { c.reason } else { c.message };
                return HealthStatus::with_message(HealthStatusCode::Degraded, message);
            }
        }
        if let Some(c) = condition(live, "Complete") {
            if c.status == "True" {
                return HealthStatus::healthy();
            }
        }
        if bool_at(live, "/spec/suspend") {
            return HealthStatus::with_message(HealthStatusCode::Suspended, "Job is suspended");
        }
        HealthStatus::with_message(HealthStatusCode::Progressing, "Job is running")
    }
}

pub struct CronJobHealth;

impl HealthRule for CronJobHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        if bool_at(live, "/spec/suspend") {
            HealthStatus::with_message(HealthStatusCode::Suspended, "CronJob is suspended")
        } else {
            HealthStatus::healthy()
        }
    }
}

pub struct ServiceHealth;

impl HealthRule for ServiceHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        if str_at(live, "/spec/type") == Some("LoadBalancer") && !has_lb_ingress(live) {
            return HealthStatus::with_message(
                HealthStatusCode::Progressing,
                "Waiting for load balancer address",
            );
        }
        HealthStatus::healthy()
    }
}

pub struct PersistentVolumeClaimHealth;

impl HealthRule for PersistentVolumeClaimHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        match str_at(live, "/status/phase") {
            Some("Bound") => HealthStatus::healthy(),
            Some("Lost") => {
                HealthStatus::with_message(HealthStatusCode::Degraded, "Claim lost its volume")
            }
            _ => HealthStatus::with_message(HealthStatusCode::Progressing, "Waiting for volume binding"),
        }
    }
}

pub struct IngressHealth;

impl HealthRule for IngressHealth {
    fn assess(&self, live: &Value) -> HealthStatus {
        if has_lb_ingress(live) {
            HealthStatus::healthy()
        } else {
            HealthStatus::with_message(HealthStatusCode::Progressing, "Waiting for ingress address")
        }
    }
}
