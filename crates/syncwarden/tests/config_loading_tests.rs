//! Table-driven tests for controller configuration loading and validation.

mod common;

use serde_json::json;

use common::*;
use syncwarden::config::load_config_from_str;
use syncwarden::{ControllerSettings, SyncStatusCode};

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config YAML content to test.
    config_yaml: &'static str,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "empty_uses_defaults",
        config_yaml: "",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_yaml: r#"
reconciliation:
  intervalSecs: 60
  workers: 4
  trackingLabel: example.com/owner
sync:
  timeoutSecs: 120
  historyLimit: 5
  hookTimeoutSecs: 60
  pollIntervalMs: 250
  retry:
    limit: 2
    backoff:
      durationMs: 500
      factor: 2
      maxDurationMs: 4000
diff:
  pruneExtraIsDrift: true
  resourceOverrides:
    - group: apps
      kind: Deployment
      serverDefaultedPaths: ["/spec/progressDeadlineSeconds"]
      orderedPaths: ["/spec/template/spec/containers"]
applicationsDir: /etc/syncwarden/apps
repositoriesRoot: /var/lib/syncwarden/repos
rbac:
  policies:
    - subject: "*"
      resource: applications
      action: get
      object: "*"
"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "zero_workers",
        config_yaml: "reconciliation:\n  workers: 0\n",
        should_succeed: false,
        expected_error: Some("reconciliation.workers"),
    },
    ConfigTestCase {
        name: "zero_history_limit",
        config_yaml: "sync:\n  historyLimit: 0\n",
        should_succeed: false,
        expected_error: Some("sync.historyLimit"),
    },
    ConfigTestCase {
        name: "empty_tracking_label",
        config_yaml: "reconciliation:\n  trackingLabel: \"  \"\n",
        should_succeed: false,
        expected_error: Some("trackingLabel"),
    },
    ConfigTestCase {
        name: "override_without_kind",
        config_yaml: "diff:\n  resourceOverrides:\n    - kind: \"\"\n      ignoredPaths: [\"/data\"]\n",
        should_succeed: false,
        expected_error: Some("require a kind"),
    },
    ConfigTestCase {
        name: "override_relative_path",
        config_yaml: "diff:\n  resourceOverrides:\n    - kind: ConfigMap\n      ignoredPaths: [\"data/key\"]\n",
        should_succeed: false,
        expected_error: Some("must start with '/'"),
    },
    ConfigTestCase {
        name: "malformed_yaml",
        config_yaml: "reconciliation: [unclosed",
        should_succeed: false,
        expected_error: Some("parse"),
    },
];

#[test]
fn test_config_loading_table() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_yaml);
        match (case.should_succeed, result) {
            (true, Ok(_)) => {}
            (true, Err(e)) => panic!("{}: expected success, got error: {}", case.name, e),
            (false, Ok(_)) => panic!("{}: expected an error", case.name),
            (false, Err(e)) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "{}: error '{}' does not mention '{}'",
                        case.name,
                        e,
                        expected
                    );
                }
            }
        }
    }
}

#[test]
fn test_full_config_maps_to_settings() {
    let config = load_config_from_str(CONFIG_TESTS[1].config_yaml).unwrap();
    let settings = ControllerSettings::from(&config);
    assert_eq!(settings.tracking_label, "example.com/owner");
    assert!(settings.compare_options.prune_extra_is_drift);
    assert_eq!(settings.default_retry.limit, 2);
    assert_eq!(settings.executor.poll_interval.as_millis(), 250);
    assert_eq!(settings.resource_overrides.len(), 1);
    assert_eq!(config.reconcile_interval().as_secs(), 60);
    assert_eq!(config.rbac.policies.len(), 1);
}

#[tokio::test]
async fn test_ignored_path_override_suppresses_drift() {
    let config = load_config_from_str(
        r#"
diff:
  resourceOverrides:
    - kind: ConfigMap
      ignoredPaths: ["/metadata/annotations/owner"]
"#,
    )
    .unwrap();
    let mut settings = ControllerSettings::from(&config);
    settings.executor = common::harness::fast_settings().executor;
    settings.default_retry = common::harness::fast_settings().default_retry;
    let harness = TestHarness::with_settings(settings);

    let key = harness.add_app(
        ApplicationBuilder::new("cfg").build(),
        vec![config_map("ns1", "settings", &[("mode", "fast")])],
    );
    harness.sync(&key, false).await;
    harness.mutate_live(&config_map_key("ns1", "settings"), |object| {
        object["metadata"]["annotations"] = json!({"owner": "platform-team"});
    });

    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.sync, SyncStatusCode::Synced);
}
