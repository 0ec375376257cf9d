//! One reconciliation pass: render, diff, assess, persist, maybe auto-sync.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::Instrument;

use super::ApplicationController;
use crate::diff::{Comparison, SyncStatusCode};
use crate::error::{ControllerError, Result, ValidationError};
use crate::health::{self, HealthStatus, HealthStatusCode};
use crate::resource::{AppKey, Application, Manifest, ResourceKey};
use crate::source::RenderRequest;
use crate::store::{ApplicationCondition, ConditionType, SyncStatus};
use crate::sync::{Initiator, SyncOptions, SyncResult};

/// What a reconciliation pass observed and did.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub revision: String,
    pub sync: SyncStatusCode,
    pub health: HealthStatusCode,
    /// Id of the automated operation started by this pass.
    pub dispatched: Option<String>,
}

impl ApplicationController {
    /// Refreshes the status of `key` and starts an automated sync when the
    /// application's policy asks for one.
    ///
    /// Validation, source and infrastructure failures abort the pass; the
    /// status is then reported `Unknown` with a condition carrying the cause.
    pub async fn reconcile(self: &Arc<Self>, key: &AppKey) -> Result<ReconcileOutcome> {
        let span = tracing::info_span!("reconcile", app = %key);
        self.reconcile_inner(key).instrument(span).await
    }

    async fn reconcile_inner(self: &Arc<Self>, key: &AppKey) -> Result<ReconcileOutcome> {
        let Some(application) = self.application(key) else {
            return Err(ControllerError::ApplicationNotFound(key.to_string()));
        };

        if !self.cache.is_synced() {
            let err = ControllerError::Infrastructure("cluster cache is not synced".to_string());
            self.mark_unknown(key, ConditionType::InfrastructureError, &err);
            return Err(err);
        }

        let rendered = match self
            .renderer
            .render(&RenderRequest::from(&application.spec.source))
            .await
        {
            Ok(rendered) => rendered,
            Err(e) => {
                let err = ControllerError::from(e);
                self.mark_unknown(key, ConditionType::SourceError, &err);
                return Err(err);
            }
        };

        let comparison = match self.compare(&application, &rendered.revision, rendered.documents) {
            Ok(comparison) => comparison,
            Err(e) => {
                let err = ControllerError::from(e);
                self.mark_unknown(key, ConditionType::ComparisonError, &err);
                return Err(err);
            }
        };

        let resource_health = self.health.assess_comparison(&comparison);
        let app_health = health::aggregate(resource_health.iter().map(|h| &h.health));
        let sync = SyncStatus::from_comparison(&comparison, &resource_health);
        let warnings: Vec<String> = comparison.warnings.iter().map(|w| w.to_string()).collect();

        self.store.update_status(key, &mut |status| {
            status.sync = sync.clone();
            status.health = app_health.clone();
            status.reconciled_at = Some(Utc::now());
            status.clear_condition(ConditionType::SourceError);
            status.clear_condition(ConditionType::InfrastructureError);
            if warnings.is_empty() {
                status.clear_condition(ConditionType::ComparisonError);
            } else {
                status.set_condition(ApplicationCondition::new(
                    ConditionType::ComparisonError,
                    warnings.join("; "),
                ));
            }
        });

        log::debug!(
            "Reconciled {} at {}: {} / {}",
            key,
            comparison.revision,
            comparison.status,
            app_health.status
        );

        let dispatched = match self.auto_sync_options(&application, &comparison) {
            Some(options) => {
                match self.dispatch(
                    &application,
                    comparison.revision.clone(),
                    options,
                    Initiator::Automated,
                ) {
                    Ok(operation) => Some(operation.id),
                    Err(e) => {
                        log::warn!("Automated sync of {} not started: {}", key, e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(ReconcileOutcome {
            revision: comparison.revision,
            sync: comparison.status,
            health: app_health.status,
            dispatched,
        })
    }

    /// Parses rendered documents into the desired set of `application`.
    pub(crate) fn desired_manifests(
        &self,
        application: &Application,
        documents: Vec<Value>,
    ) -> std::result::Result<Vec<Manifest>, ValidationError> {
        documents
            .into_iter()
            .enumerate()
            .map(|(index, document)| {
                let mut manifest = Manifest::parse(index, document)?;
                manifest.default_namespace(&application.spec.destination.namespace);
                manifest.set_label(&self.settings.tracking_label, application.name());
                Ok(manifest)
            })
            .collect()
    }

    /// Live documents of every tracked resource and every desired identity,
    /// read from one snapshot.
    pub(crate) fn live_manifests(&self, application: &Application, desired: &[Manifest]) -> Vec<Manifest> {
        let snapshot = self.cache.snapshot();
        let mut seen: BTreeSet<ResourceKey> = BTreeSet::new();
        let mut live = Vec::new();
        for manifest in snapshot.list_tracked(&self.settings.tracking_label, application.name()) {
            if seen.insert(manifest.key()) {
                live.push(manifest.as_ref().clone());
            }
        }
        for target in desired {
            let key = target.key();
            if seen.contains(&key) {
                continue;
            }
            if let Some(manifest) = snapshot.get(&key) {
                seen.insert(key);
                live.push(manifest.as_ref().clone());
            }
        }
        live
    }

    pub(crate) fn compare(
        &self,
        application: &Application,
        revision: &str,
        documents: Vec<Value>,
    ) -> std::result::Result<Comparison, ValidationError> {
        let desired = self.desired_manifests(application, documents)?;
        let live = self.live_manifests(application, &desired);
        self.diff
            .compare(revision, &desired, &live, self.settings.compare_options)
    }

    /// Options for an automated sync, or `None` when none should start.
    ///
    /// Only `OutOfSync` applications are synced. When the most recent
    /// operation was an automated sync of the same revision, another one is
    /// started only with self-heal enabled.
    fn auto_sync_options(&self, application: &Application, comparison: &Comparison) -> Option<SyncOptions> {
        let automated = application
            .spec
            .sync_policy
            .automated
            .as_ref()
            .filter(|a| a.enabled)?;
        if comparison.status != SyncStatusCode::OutOfSync {
            return None;
        }
        let key = application.key();
        if self.operations.is_running(&key) {
            log::debug!("Skipping automated sync of {}: operation running", key);
            return None;
        }
        let history = self.store.history(&key);
        if already_attempted(history.last(), &comparison.revision) && !automated.self_heal {
            log::debug!(
                "Skipping automated sync of {}: revision {} already synced and self-heal is disabled",
                key,
                comparison.revision
            );
            return None;
        }
        Some(SyncOptions {
            dry_run: false,
            prune: automated.prune,
            resources: None,
            retry: self.retry_policy(application),
        })
    }

    fn mark_unknown(&self, key: &AppKey, condition: ConditionType, err: &ControllerError) {
        log::warn!("Reconciliation of {} aborted: {}", key, err);
        let message = err.to_string();
        self.store.update_status(key, &mut |status| {
            status.sync.status = SyncStatusCode::Unknown;
            status.sync.resources.clear();
            status.health = HealthStatus::with_message(HealthStatusCode::Unknown, message.clone());
            status.reconciled_at = Some(Utc::now());
            status.set_condition(ApplicationCondition::new(condition, message.clone()));
        });
    }
}

fn already_attempted(last: Option<&SyncResult>, revision: &str) -> bool {
    last.is_some_and(|r| r.initiator == Initiator::Automated && !r.dry_run && r.revision == revision)
}
