//! Reconciliation pass tests: comparison status, health and aborted passes.

mod common;

use serde_json::{json, Value};

use common::*;
use syncwarden::diff::DiffClassification;
use syncwarden::store::ConditionType;
use syncwarden::sync::OperationPhase;
use syncwarden::{ControllerError, HealthStatusCode, SourceError, SyncStatusCode};

fn web_documents() -> Vec<Value> {
    vec![namespace("ns1"), deployment("ns1", "web", 2)]
}

#[tokio::test]
async fn test_new_application_is_out_of_sync_and_missing() {
    let harness = TestHarness::new();
    let key = harness.add_app(ApplicationBuilder::new("web").build(), web_documents());

    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.sync, SyncStatusCode::OutOfSync);
    assert_eq!(outcome.health, HealthStatusCode::Missing);
    assert_eq!(outcome.revision, common::harness::HEAD_REVISION);
    assert!(outcome.dispatched.is_none());

    let status = harness.status(&key);
    assert_eq!(status.sync.resources.len(), 2);
    assert_eq!(status.missing().count(), 2);
    assert!(status.conditions.is_empty());
}

#[tokio::test]
async fn test_sync_then_rollout_reaches_healthy() {
    let harness = TestHarness::new();
    let key = harness.add_app(ApplicationBuilder::new("web").build(), web_documents());
    harness.controller.reconcile(&key).await.unwrap();

    let result = harness.sync(&key, false).await;
    assert_eq!(result.phase, OperationPhase::Succeeded, "{}", result.message);

    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.sync, SyncStatusCode::Synced);
    assert_eq!(outcome.health, HealthStatusCode::Progressing);

    harness
        .cluster
        .set_status(&deployment_key("ns1", "web"), rolled_out(2))
        .unwrap();
    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.sync, SyncStatusCode::Synced);
    assert_eq!(outcome.health, HealthStatusCode::Healthy);

    let live = harness.cluster.get_now(&deployment_key("ns1", "web")).unwrap();
    assert_eq!(live.label("app.kubernetes.io/instance"), Some("web"));
}

#[tokio::test]
async fn test_repeated_reconcile_is_stable() {
    let harness = TestHarness::new();
    let key = harness.add_app(
        ApplicationBuilder::new("cfg").build(),
        vec![config_map("ns1", "settings", &[("mode", "fast")])],
    );
    harness.sync(&key, false).await;

    let first = harness.controller.reconcile(&key).await.unwrap();
    let first_status = harness.status(&key);
    let second = harness.controller.reconcile(&key).await.unwrap();
    let second_status = harness.status(&key);

    assert_eq!(first, second);
    assert_eq!(first_status.sync, second_status.sync);
    assert_eq!(first_status.health, second_status.health);
    assert_eq!(first.sync, SyncStatusCode::Synced);
}

#[tokio::test]
async fn test_desired_change_flips_to_out_of_sync_and_back() {
    let harness = TestHarness::new();
    let app = ApplicationBuilder::new("cfg").build();
    let key = harness.add_app(app, vec![config_map("ns1", "settings", &[("mode", "fast")])]);
    harness.sync(&key, false).await;
    assert_eq!(
        harness.controller.reconcile(&key).await.unwrap().sync,
        SyncStatusCode::Synced
    );

    harness
        .renderer
        .set("cfg", vec![config_map("ns1", "settings", &[("mode", "safe")])]);
    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.sync, SyncStatusCode::OutOfSync);
    let status = harness.status(&key);
    assert_eq!(status.sync.resources[0].status, DiffClassification::OutOfSync);

    let result = harness.sync(&key, false).await;
    assert_eq!(result.phase, OperationPhase::Succeeded);
    assert_eq!(
        harness.controller.reconcile(&key).await.unwrap().sync,
        SyncStatusCode::Synced
    );
}

#[tokio::test]
async fn test_extra_live_label_is_drift() {
    let harness = TestHarness::new();
    let key = harness.add_app(
        ApplicationBuilder::new("cfg").build(),
        vec![config_map("ns1", "settings", &[("mode", "fast")])],
    );
    harness.sync(&key, false).await;

    let cm = config_map_key("ns1", "settings");
    harness.mutate_live(&cm, |object| {
        object["metadata"]["labels"]["team"] = json!("payments");
    });

    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.sync, SyncStatusCode::OutOfSync);
    let status = harness.status(&key);
    let resource = status.sync.resources.iter().find(|r| r.key == cm).unwrap();
    assert_eq!(resource.status, DiffClassification::OutOfSync);
}

#[tokio::test]
async fn test_server_fields_do_not_cause_drift() {
    let harness = TestHarness::new();
    let key = harness.add_app(
        ApplicationBuilder::new("cfg").build(),
        vec![config_map("ns1", "settings", &[("mode", "fast")])],
    );
    harness.sync(&key, false).await;

    harness.mutate_live(&config_map_key("ns1", "settings"), |object| {
        object["metadata"]["resourceVersion"] = json!("9999");
        object["metadata"]["managedFields"] = json!([{"manager": "kubectl"}]);
    });

    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.sync, SyncStatusCode::Synced);
}

#[tokio::test]
async fn test_tracked_resource_not_desired_is_extra() {
    let harness = TestHarness::new();
    let key = harness.add_app(
        ApplicationBuilder::new("cfg").build(),
        vec![
            config_map("ns1", "settings", &[("mode", "fast")]),
            config_map("ns1", "legacy", &[("old", "true")]),
        ],
    );
    harness.sync(&key, false).await;
    harness
        .renderer
        .set("cfg", vec![config_map("ns1", "settings", &[("mode", "fast")])]);

    let outcome = harness.controller.reconcile(&key).await.unwrap();
    // extra resources are not drift by default
    assert_eq!(outcome.sync, SyncStatusCode::Synced);
    let status = harness.status(&key);
    let legacy = status
        .sync
        .resources
        .iter()
        .find(|r| r.key == config_map_key("ns1", "legacy"))
        .unwrap();
    assert_eq!(legacy.status, DiffClassification::Extra);
    assert!(legacy.health.is_none());
}

#[tokio::test]
async fn test_extra_resource_is_drift_when_configured() {
    let mut settings = common::harness::fast_settings();
    settings.compare_options.prune_extra_is_drift = true;
    let harness = TestHarness::with_settings(settings);
    let key = harness.add_app(
        ApplicationBuilder::new("cfg").build(),
        vec![
            config_map("ns1", "settings", &[("mode", "fast")]),
            config_map("ns1", "legacy", &[("old", "true")]),
        ],
    );
    harness.sync(&key, false).await;
    harness
        .renderer
        .set("cfg", vec![config_map("ns1", "settings", &[("mode", "fast")])]);

    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.sync, SyncStatusCode::OutOfSync);
}

#[tokio::test]
async fn test_health_is_worst_of_resources() {
    let harness = TestHarness::new();
    let key = harness.add_app(
        ApplicationBuilder::new("web").build(),
        vec![
            config_map("ns1", "settings", &[("mode", "fast")]),
            deployment("ns1", "web", 1),
        ],
    );
    harness.sync(&key, false).await;

    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.health, HealthStatusCode::Progressing);

    harness
        .cluster
        .set_status(
            &deployment_key("ns1", "web"),
            json!({
                "observedGeneration": 1,
                "conditions": [{
                    "type": "Progressing",
                    "status": "False",
                    "reason": "ProgressDeadlineExceeded",
                    "message": "image pull failed"
                }]
            }),
        )
        .unwrap();
    let outcome = harness.controller.reconcile(&key).await.unwrap();
    assert_eq!(outcome.health, HealthStatusCode::Degraded);
    let status = harness.status(&key);
    assert!(status
        .health
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("progress deadline"));
}

#[tokio::test]
async fn test_source_error_marks_unknown() {
    let harness = TestHarness::new();
    let key = harness.add_app(ApplicationBuilder::new("web").build(), web_documents());
    harness.controller.reconcile(&key).await.unwrap();

    harness.renderer.fail_with(Some(SourceError::Unavailable {
        repo: REPO_URL.to_string(),
        message: "connection reset".to_string(),
    }));
    let err = harness.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ControllerError::Source(_)));
    assert!(err.aborts_pass());

    let status = harness.status(&key);
    assert_eq!(status.sync.status, SyncStatusCode::Unknown);
    assert!(status.sync.resources.is_empty());
    assert_eq!(status.health.status, HealthStatusCode::Unknown);
    assert!(status.has_condition(ConditionType::SourceError));

    harness.renderer.fail_with(None);
    harness.controller.reconcile(&key).await.unwrap();
    assert!(!harness.status(&key).has_condition(ConditionType::SourceError));
}

#[tokio::test]
async fn test_duplicate_desired_resource_aborts_pass() {
    let harness = TestHarness::new();
    let key = harness.add_app(
        ApplicationBuilder::new("dup").build(),
        vec![
            config_map("ns1", "settings", &[("a", "1")]),
            config_map("ns1", "settings", &[("a", "2")]),
        ],
    );

    let err = harness.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ControllerError::Validation(_)));
    let status = harness.status(&key);
    assert_eq!(status.sync.status, SyncStatusCode::Unknown);
    assert!(status.has_condition(ConditionType::ComparisonError));
}

#[tokio::test]
async fn test_unsynced_cache_aborts_pass() {
    let harness = TestHarness::unsynced();
    let key = harness.add_app(ApplicationBuilder::new("web").build(), web_documents());

    let err = harness.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ControllerError::Infrastructure(_)));
    let status = harness.status(&key);
    assert_eq!(status.sync.status, SyncStatusCode::Unknown);
    assert!(status.has_condition(ConditionType::InfrastructureError));
}

#[tokio::test]
async fn test_unknown_application() {
    let harness = TestHarness::new();
    let key = syncwarden::AppKey::new("syncwarden", "ghost");
    let err = harness.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ControllerError::ApplicationNotFound(_)));
}

#[tokio::test]
async fn test_cluster_event_queues_owning_application() {
    let harness = TestHarness::new();
    let key = harness.add_app(
        ApplicationBuilder::new("cfg").build(),
        vec![config_map("ns1", "settings", &[("mode", "fast")])],
    );
    harness.sync(&key, false).await;
    let queue = harness.controller.queue();
    while let Some(k) = queue.get(std::time::Duration::from_millis(10)) {
        queue.done(&k);
    }

    let mut events = harness.cache.subscribe();
    harness.mutate_live(&config_map_key("ns1", "settings"), |object| {
        object["data"]["mode"] = json!("slow");
    });
    let event = events.recv().await.unwrap();
    assert_eq!(harness.controller.notify_cluster_event(&event), 1);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_source_change_queues_matching_applications() {
    let harness = TestHarness::new();
    harness.add_app(ApplicationBuilder::new("a").build(), vec![]);
    harness.add_app(
        ApplicationBuilder::new("b")
            .repo_url("https://git.example.com/other/repo")
            .build(),
        vec![],
    );
    let count = harness
        .controller
        .notify_source_changed("HTTPS://git.example.com/team/apps.git");
    assert_eq!(count, 1);
}
