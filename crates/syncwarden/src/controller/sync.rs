//! Sync operation dispatch, cancellation and completion.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::ApplicationController;
use crate::auth::{authorize, ACTION_SYNC, RESOURCE_APPLICATIONS};
use crate::broadcast::{BroadcastProgress, ProgressEvent, ProgressReporter};
use crate::error::{ControllerError, Result};
use crate::resource::{AppKey, Application, ResourceKey};
use crate::source::RenderRequest;
use crate::store::{ApplicationCondition, ConditionType, StatusStore};
use crate::sync::{
    plan, CancellationToken, ExecutionPlan, Initiator, OperationPhase, RetryPolicy,
    SyncOperation, SyncOptions, SyncResult,
};

/// A manual sync request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Revision to sync to; the application's target revision when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub prune: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceKey>>,
    /// Overrides the application and controller retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl ApplicationController {
    /// Starts a sync of `key` on behalf of `subject`.
    ///
    /// Rejected with `OperationInProgress` when an operation is already
    /// running for the application; requests are never queued.
    pub fn request_sync(
        self: &Arc<Self>,
        subject: &str,
        key: &AppKey,
        request: SyncRequest,
    ) -> Result<SyncOperation> {
        authorize(
            self.authorizer.as_ref(),
            subject,
            RESOURCE_APPLICATIONS,
            ACTION_SYNC,
            &key.to_string(),
        )?;
        let application = self
            .application(key)
            .ok_or_else(|| ControllerError::ApplicationNotFound(key.to_string()))?;

        let revision = request
            .revision
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| application.spec.source.target_revision.clone());
        let options = SyncOptions {
            dry_run: request.dry_run,
            prune: request.prune,
            resources: request.resources,
            retry: request
                .retry
                .unwrap_or_else(|| self.retry_policy(&application)),
        };
        self.dispatch(
            &application,
            revision,
            options,
            Initiator::User(subject.to_string()),
        )
    }

    /// Requests cooperative cancellation of the running operation of `key`.
    pub fn cancel_operation(&self, subject: &str, key: &AppKey) -> Result<String> {
        authorize(
            self.authorizer.as_ref(),
            subject,
            RESOURCE_APPLICATIONS,
            ACTION_SYNC,
            &key.to_string(),
        )?;
        let id = self.operations.cancel(key)?;
        log::info!("Cancellation of operation {} for {} requested by '{}'", id, key, subject);
        Ok(id)
    }

    /// Waits for the running operation of `key` and returns its result, or
    /// the most recent retained result when nothing is running.
    pub async fn wait_for_operation(&self, key: &AppKey) -> Option<SyncResult> {
        if let Some(mut rx) = self.operations.subscribe(key) {
            if let Ok(result) = rx.wait_for(|r| r.is_some()).await {
                return (*result).clone();
            }
        }
        self.store.history(key).pop()
    }

    pub(crate) fn retry_policy(&self, application: &Application) -> RetryPolicy {
        application
            .spec
            .sync_policy
            .retry
            .clone()
            .unwrap_or_else(|| self.settings.default_retry.clone())
    }

    /// Admits a new operation and runs it on its own task.
    pub(crate) fn dispatch(
        self: &Arc<Self>,
        application: &Application,
        revision: String,
        options: SyncOptions,
        initiator: Initiator,
    ) -> Result<SyncOperation> {
        let key = application.key();
        let operation = SyncOperation::new(key.clone(), revision, options, initiator);
        let cancel = self.operations.try_begin(&key, &operation.id)?;

        let pending = operation.clone();
        self.store.update_status(&key, &mut |status| {
            status.operation_state = Some(pending.clone());
        });
        log::info!(
            "Dispatched operation {} for {} ({}) at revision {}",
            operation.id,
            key,
            operation.initiator,
            operation.revision
        );

        let controller = Arc::clone(self);
        let application = application.clone();
        let task_operation = operation.clone();
        tokio::spawn(async move {
            controller
                .run_operation(application, task_operation, cancel)
                .await;
        });
        Ok(operation)
    }

    async fn run_operation(
        self: Arc<Self>,
        application: Application,
        mut operation: SyncOperation,
        cancel: CancellationToken,
    ) {
        let key = application.key();
        let progress = StatusProgress {
            inner: BroadcastProgress::new(&operation.id, &key.to_string(), self.broadcaster.clone()),
            store: Arc::clone(&self.store),
            app: key.clone(),
            operation_id: operation.id.clone(),
        };

        let result = match self.prepare_plan(&application, &mut operation).await {
            Ok(plan) => {
                self.executor
                    .execute(&mut operation, &plan, &cancel, &progress)
                    .await
            }
            Err(e) => {
                log::error!("Operation {} for {} could not start: {}", operation.id, key, e);
                let message = e.to_string();
                let _ = operation.transition(OperationPhase::Running, None);
                let _ = operation.transition(OperationPhase::Error, Some(message.clone()));
                progress.report(ProgressEvent::Phase {
                    phase: OperationPhase::Error,
                    message,
                });
                SyncResult::from_operation(&operation, Vec::new())
            }
        };

        log::info!(
            "Operation {} for {} finished: {} {}",
            operation.id,
            key,
            result.phase,
            result.message
        );

        self.store.record_result(&key, result.clone());
        let finished = operation.clone();
        self.store.update_status(&key, &mut |status| {
            status.operation_state = Some(finished.clone());
            if finished.phase == OperationPhase::Succeeded {
                status.clear_condition(ConditionType::SyncError);
            } else {
                status.set_condition(ApplicationCondition::new(
                    ConditionType::SyncError,
                    format!(
                        "Operation {} {}: {}",
                        finished.id,
                        finished.phase,
                        finished.message.clone().unwrap_or_default()
                    ),
                ));
            }
        });
        self.operations.finish(&key, &operation.id, &result);
        self.queue.add(key);
    }

    /// Renders the operation's revision, compares it with live state and plans.
    async fn prepare_plan(
        &self,
        application: &Application,
        operation: &mut SyncOperation,
    ) -> Result<ExecutionPlan> {
        let mut request = RenderRequest::from(&application.spec.source);
        request.revision = operation.revision.clone();
        let rendered = self.renderer.render(&request).await?;
        operation.revision = rendered.revision.clone();

        if !self.cache.is_synced() {
            return Err(ControllerError::Infrastructure(
                "cluster cache is not synced".to_string(),
            ));
        }
        let comparison = self.compare(application, &rendered.revision, rendered.documents)?;
        Ok(plan(&comparison.resources, &operation.options))
    }
}

/// Broadcasts executor progress and mirrors phase changes into the stored operation state.
struct StatusProgress {
    inner: BroadcastProgress,
    store: Arc<dyn StatusStore>,
    app: AppKey,
    operation_id: String,
}

impl ProgressReporter for StatusProgress {
    fn report(&self, event: ProgressEvent) {
        if let ProgressEvent::Phase { phase, message } = &event {
            self.store.update_status(&self.app, &mut |status| {
                if let Some(op) = status
                    .operation_state
                    .as_mut()
                    .filter(|op| op.id == self.operation_id)
                {
                    op.phase = *phase;
                    op.message = Some(message.clone());
                    if *phase == OperationPhase::Running && op.started_at.is_none() {
                        op.started_at = Some(Utc::now());
                    }
                }
            });
        }
        self.inner.report(event);
    }
}
