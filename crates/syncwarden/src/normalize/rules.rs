//! Built-in per-kind normalization rules.

use std::collections::BTreeMap;

use super::path::FieldPath;
use crate::resource::KindKey;

/// Paths a kind's normalizer removes or treats specially.
#[derive(Debug, Clone, Default)]
pub struct KindRules {
    /// Removed from both desired and live documents.
    pub ignored_paths: Vec<FieldPath>,
    /// Removed from live documents when the desired document does not set them.
    pub server_defaulted_paths: Vec<FieldPath>,
    /// Arrays whose element order is significant.
    pub ordered_paths: Vec<FieldPath>,
}

impl KindRules {
    pub fn merge(&mut self, other: KindRules) {
        self.ignored_paths.extend(other.ignored_paths);
        self.server_defaulted_paths
            .extend(other.server_defaulted_paths);
        self.ordered_paths.extend(other.ordered_paths);
    }
}

/// Defaulted fields of a pod template, relative to the template root.
const POD_SPEC_DEFAULTS: &[&str] = &[
    "/spec/dnsPolicy",
    "/spec/restartPolicy",
    "/spec/schedulerName",
    "/spec/securityContext",
    "/spec/terminationGracePeriodSeconds",
    "/spec/serviceAccount",
    "/spec/enableServiceLinks",
    "/spec/preemptionPolicy",
    "/spec/priority",
    "/spec/containers/*/imagePullPolicy",
    "/spec/containers/*/terminationMessagePath",
    "/spec/containers/*/terminationMessagePolicy",
    "/spec/containers/*/resources",
    "/spec/containers/*/ports/*/protocol",
    "/spec/initContainers/*/imagePullPolicy",
    "/spec/initContainers/*/terminationMessagePath",
    "/spec/initContainers/*/terminationMessagePolicy",
];

/// Container fields whose order matters, relative to the pod spec root.
const POD_SPEC_ORDERED: &[&str] = &[
    "/spec/containers/*/command",
    "/spec/containers/*/args",
    "/spec/initContainers",
    "/spec/initContainers/*/command",
    "/spec/initContainers/*/args",
];

const WORKLOAD_DEFAULTS: &[&str] = &["/spec/revisionHistoryLimit", "/spec/minReadySeconds"];

fn paths(list: &[&str]) -> Vec<FieldPath> {
    list.iter().filter_map(|p| FieldPath::parse(p).ok()).collect()
}

fn template_paths(prefix: &str, list: &[&str]) -> Vec<FieldPath> {
    list.iter()
        .filter_map(|p| FieldPath::parse(&format!("{}{}", prefix, p)).ok())
        .collect()
}

fn workload_rules(template_prefix: &str, extra_defaults: &[&str]) -> KindRules {
    let mut server_defaulted_paths = paths(WORKLOAD_DEFAULTS);
    server_defaulted_paths.extend(paths(extra_defaults));
    server_defaulted_paths.extend(template_paths(template_prefix, POD_SPEC_DEFAULTS));
    KindRules {
        ignored_paths: Vec::new(),
        server_defaulted_paths,
        ordered_paths: template_paths(template_prefix, POD_SPEC_ORDERED),
    }
}

/// Returns the built-in rule table.
pub fn builtin_rules() -> BTreeMap<KindKey, KindRules> {
    let mut rules = BTreeMap::new();

    rules.insert(
        KindKey::new("apps", "Deployment"),
        workload_rules(
            "/spec/template",
            &["/spec/progressDeadlineSeconds", "/spec/strategy"],
        ),
    );
    rules.insert(
        KindKey::new("apps", "StatefulSet"),
        workload_rules(
            "/spec/template",
            &[
                "/spec/podManagementPolicy",
                "/spec/updateStrategy",
                "/spec/persistentVolumeClaimRetentionPolicy",
            ],
        ),
    );
    rules.insert(
        KindKey::new("apps", "DaemonSet"),
        workload_rules("/spec/template", &["/spec/updateStrategy"]),
    );
    rules.insert(
        KindKey::new("apps", "ReplicaSet"),
        workload_rules("/spec/template", &[]),
    );
    rules.insert(
        KindKey::new("batch", "Job"),
        workload_rules(
            "/spec/template",
            &[
                "/spec/backoffLimit",
                "/spec/completionMode",
                "/spec/completions",
                "/spec/parallelism",
                "/spec/suspend",
                "/spec/selector",
                "/spec/podReplacementPolicy",
                "/spec/template/metadata/labels",
            ],
        ),
    );
    rules.insert(
        KindKey::new("batch", "CronJob"),
        workload_rules(
            "/spec/jobTemplate/spec/template",
            &[
                "/spec/concurrencyPolicy",
                "/spec/failedJobsHistoryLimit",
                "/spec/successfulJobsHistoryLimit",
                "/spec/suspend",
            ],
        ),
    );
    rules.insert(
        KindKey::new("", "Pod"),
        KindRules {
            ignored_paths: Vec::new(),
            server_defaulted_paths: {
                let mut p = template_paths("", POD_SPEC_DEFAULTS);
                p.extend(paths(&["/spec/nodeName", "/spec/tolerations"]));
                p
            },
            ordered_paths: template_paths("", POD_SPEC_ORDERED),
        },
    );
    rules.insert(
        KindKey::new("", "Service"),
        KindRules {
            ignored_paths: Vec::new(),
            server_defaulted_paths: paths(&[
                "/spec/clusterIP",
                "/spec/clusterIPs",
                "/spec/sessionAffinity",
                "/spec/type",
                "/spec/ipFamilies",
                "/spec/ipFamilyPolicy",
                "/spec/internalTrafficPolicy",
                "/spec/externalTrafficPolicy",
                "/spec/ports/*/protocol",
                "/spec/ports/*/targetPort",
                "/spec/ports/*/nodePort",
            ]),
            ordered_paths: Vec::new(),
        },
    );
    rules.insert(
        KindKey::new("", "PersistentVolumeClaim"),
        KindRules {
            ignored_paths: Vec::new(),
            server_defaulted_paths: paths(&[
                "/spec/volumeName",
                "/spec/volumeMode",
                "/spec/storageClassName",
            ]),
            ordered_paths: Vec::new(),
        },
    );
    rules.insert(
        KindKey::new("", "ServiceAccount"),
        KindRules {
            ignored_paths: Vec::new(),
            server_defaulted_paths: paths(&["/secrets"]),
            ordered_paths: Vec::new(),
        },
    );
    rules.insert(
        KindKey::new("", "Namespace"),
        KindRules {
            ignored_paths: Vec::new(),
            server_defaulted_paths: paths(&[
                "/spec/finalizers",
                "/metadata/labels/kubernetes.io~1metadata.name",
            ]),
            ordered_paths: Vec::new(),
        },
    );
    rules.insert(KindKey::new("", "Secret"), KindRules::default());

    rules
}
