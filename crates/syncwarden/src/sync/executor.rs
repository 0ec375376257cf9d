//! Sync execution.
//!
//! Runs an [`ExecutionPlan`] wave by wave. Actions within a wave run
//! concurrently; the next wave starts only when every action of the current
//! one has reached a terminal state. Cancellation is checked between waves.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::Instrument;

use super::hook::HookDeletePolicy;
use super::operation::{
    OperationPhase, ResourceResult, ResourceResultStatus, RetryPolicy, SyncOperation, SyncResult,
};
use super::plan::{ActionKind, ExecutionPlan, SyncAction, Wave, WavePhase};
use crate::broadcast::{ProgressEvent, ProgressReporter};
use crate::cluster::{ClusterClient, ClusterError, DeleteOutcome};
use crate::health::{HealthAssessor, HealthStatusCode};
use crate::resource::ResourceKey;

/// Cooperative cancellation flag shared between the controller and a running operation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Timing knobs of the executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Overall operation deadline.
    pub timeout: Duration,
    /// How long a hook may take to become healthy.
    pub hook_timeout: Duration,
    /// Interval between hook readiness checks.
    pub poll_interval: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            hook_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Result of one action plus whether the cluster itself failed.
struct ActionOutcome {
    result: ResourceResult,
    blocking: bool,
    infrastructure: Option<String>,
    /// The operation deadline passed before the action finished.
    timed_out: bool,
}

impl ActionOutcome {
    fn failed(&self) -> bool {
        self.result.status == ResourceResultStatus::SyncFailed
    }
}

/// How the main waves ended.
enum Stop {
    Cancelled,
    Blocked(String),
    Infrastructure(String),
    Deadline,
}

pub struct SyncExecutor {
    cluster: Arc<dyn ClusterClient>,
    health: Arc<HealthAssessor>,
    settings: ExecutorSettings,
}

impl SyncExecutor {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        health: Arc<HealthAssessor>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            cluster,
            health,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Runs `plan` for a `Pending` operation and returns its terminal result.
    /// The operation is left in the terminal phase.
    pub async fn execute(
        &self,
        operation: &mut SyncOperation,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> SyncResult {
        let span = tracing::info_span!(
            "sync_operation",
            app = %operation.app,
            operation_id = %operation.id
        );
        self.run(operation, plan, cancel, progress)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        operation: &mut SyncOperation,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> SyncResult {
        if let Err(e) = operation.transition(OperationPhase::Running, None) {
            log::error!("Refusing to execute operation {}: {}", operation.id, e);
            return self.finish(operation, Vec::new());
        }
        log::info!(
            "Sync operation {} started for {} at revision {} ({} waves, {} actions{})",
            operation.id,
            operation.app,
            operation.revision,
            plan.waves.len(),
            plan.action_count(),
            if plan.dry_run { ", dry run" } else { "" }
        );
        progress.report(ProgressEvent::Phase {
            phase: OperationPhase::Running,
            message: format!("Syncing to revision {}", operation.revision),
        });

        let deadline = Instant::now() + self.settings.timeout;
        let retry = operation.options.retry.clone();
        let mut results: Vec<ResourceResult> = plan
            .skipped
            .iter()
            .map(|s| ResourceResult {
                key: s.key.clone(),
                action: s.kind,
                hook_phase: None,
                wave: None,
                status: ResourceResultStatus::Skipped,
                message: s.reason.clone(),
                attempts: 0,
            })
            .collect();

        let mut any_failed = false;
        let mut stop: Option<Stop> = None;

        for wave in plan.main_waves() {
            if let Some(reason) = &stop {
                results.extend(skip_wave(wave, &not_started(reason)));
                continue;
            }
            if cancel.is_cancelled() {
                log::info!("Operation {} cancelled before wave {}", operation.id, wave.index);
                stop = Some(Stop::Cancelled);
                results.extend(skip_wave(wave, &not_started(&Stop::Cancelled)));
                continue;
            }
            if wave.phase == WavePhase::PostSync && any_failed {
                results.extend(skip_wave(wave, "not run: sync did not succeed"));
                continue;
            }

            let wave_span = tracing::info_span!(
                "sync_wave",
                index = wave.index,
                phase = %wave.phase,
                sync_wave = wave.sync_wave
            );
            let outcomes = self
                .run_wave(wave, plan.dry_run, &retry, Some(deadline), progress)
                .instrument(wave_span)
                .await;
            for outcome in outcomes {
                if outcome.failed() {
                    any_failed = true;
                    if let Some(message) = &outcome.infrastructure {
                        stop = Some(Stop::Infrastructure(message.clone()));
                    } else if outcome.timed_out {
                        if !matches!(stop, Some(Stop::Infrastructure(_) | Stop::Deadline)) {
                            log::warn!(
                                "Operation {} exceeded its deadline of {:?} in wave {}",
                                operation.id,
                                self.settings.timeout,
                                wave.index
                            );
                            stop = Some(Stop::Deadline);
                        }
                    } else if outcome.blocking && stop.is_none() {
                        stop = Some(Stop::Blocked(format!(
                            "{} failed: {}",
                            outcome.result.key, outcome.result.message
                        )));
                    }
                }
                results.push(outcome.result);
            }
        }

        let (phase, message) = match &stop {
            Some(Stop::Cancelled) => (
                OperationPhase::Terminated,
                "Operation cancelled".to_string(),
            ),
            Some(Stop::Infrastructure(message)) => (
                OperationPhase::Error,
                format!("Cluster unavailable: {}", message),
            ),
            Some(Stop::Deadline) => (
                OperationPhase::Error,
                format!(
                    "Operation exceeded its deadline of {}s",
                    self.settings.timeout.as_secs()
                ),
            ),
            Some(Stop::Blocked(message)) => (OperationPhase::Failed, message.clone()),
            None if any_failed => (
                OperationPhase::Failed,
                "One or more resources failed to sync".to_string(),
            ),
            None => (
                OperationPhase::Succeeded,
                format!(
                    "Successfully synced {} resources",
                    results
                        .iter()
                        .filter(|r| matches!(
                            r.status,
                            ResourceResultStatus::Synced | ResourceResultStatus::Pruned
                        ))
                        .count()
                ),
            ),
        };

        if phase == OperationPhase::Failed {
            for wave in plan.sync_fail_waves() {
                let outcomes = self
                    .run_wave(wave, plan.dry_run, &retry, None, progress)
                    .instrument(tracing::info_span!("sync_wave", index = wave.index, phase = %wave.phase))
                    .await;
                results.extend(outcomes.into_iter().map(|o| o.result));
            }
        }

        if let Err(e) = operation.transition(phase, Some(message.clone())) {
            log::error!("Operation {}: {}", operation.id, e);
        }
        progress.report(ProgressEvent::Phase { phase, message });
        match phase {
            OperationPhase::Succeeded => log::info!(
                "Sync operation {} for {} succeeded",
                operation.id,
                operation.app
            ),
            _ => log::warn!(
                "Sync operation {} for {} ended {}: {}",
                operation.id,
                operation.app,
                phase,
                operation.message.as_deref().unwrap_or_default()
            ),
        }
        self.finish(operation, results)
    }

    fn finish(&self, operation: &SyncOperation, resources: Vec<ResourceResult>) -> SyncResult {
        SyncResult::from_operation(operation, resources)
    }

    /// Runs every action of `wave`. Actions still in flight at `deadline`
    /// are abandoned and reported failed; finished ones keep their result.
    async fn run_wave(
        &self,
        wave: &Wave,
        dry_run: bool,
        retry: &RetryPolicy,
        deadline: Option<Instant>,
        progress: &dyn ProgressReporter,
    ) -> Vec<ActionOutcome> {
        progress.report(ProgressEvent::WaveStarted {
            wave: wave.index,
            phase: wave.phase,
            actions: wave.actions.len(),
        });
        log::debug!(
            "Wave {} ({}, sync-wave {}, tier {}): {} actions",
            wave.index,
            wave.phase,
            wave.sync_wave,
            wave.tier,
            wave.actions.len()
        );
        let outcomes = join_all(wave.actions.iter().map(|action| async move {
            let run = self.run_action(wave.index, action, dry_run, retry);
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, run)
                    .await
                    .unwrap_or_else(|_| timed_out(wave.index, action)),
                None => run.await,
            }
        }))
        .await;
        for outcome in &outcomes {
            progress.report(ProgressEvent::Resource {
                wave: wave.index,
                key: outcome.result.key.clone(),
                status: outcome.result.status,
                message: outcome.result.message.clone(),
            });
        }
        outcomes
    }

    async fn run_action(
        &self,
        wave: usize,
        action: &SyncAction,
        dry_run: bool,
        retry: &RetryPolicy,
    ) -> ActionOutcome {
        let mut outcome = ActionOutcome {
            result: ResourceResult {
                key: action.key.clone(),
                action: action.kind,
                hook_phase: action.hook_phase,
                wave: Some(wave),
                status: ResourceResultStatus::SyncFailed,
                message: String::new(),
                attempts: 0,
            },
            blocking: action.blocking,
            infrastructure: None,
            timed_out: false,
        };

        let result = match action.kind {
            ActionKind::Apply => {
                let (result, attempts) = self
                    .with_retry(&action.key, retry, || {
                        self.cluster.apply(&action.manifest, dry_run)
                    })
                    .await;
                outcome.result.attempts = attempts;
                result
                    .map(|_| {
                        if dry_run {
                            (ResourceResultStatus::Synced, "validated (dry run)".to_string())
                        } else {
                            (ResourceResultStatus::Synced, "applied".to_string())
                        }
                    })
                    .map_err(ActionError::Cluster)
            }
            ActionKind::Prune => {
                let (result, attempts) = self
                    .with_retry(&action.key, retry, || {
                        self.cluster.delete(&action.key, dry_run)
                    })
                    .await;
                outcome.result.attempts = attempts;
                result.map(|deleted| {
                    let message = match (dry_run, deleted) {
                        (true, _) => "would be pruned (dry run)",
                        (false, DeleteOutcome::Deleted) => "pruned",
                        (false, DeleteOutcome::NotFound) => "already absent",
                    };
                    (ResourceResultStatus::Pruned, message.to_string())
                })
                .map_err(ActionError::Cluster)
            }
            ActionKind::RunHook => {
                let (result, attempts) = self.run_hook(action, dry_run, retry).await;
                outcome.result.attempts = attempts;
                result
            }
        };

        match result {
            Ok((status, message)) => {
                outcome.result.status = status;
                outcome.result.message = message;
            }
            Err(ActionError::Cluster(e)) => {
                if e.is_infrastructure() {
                    outcome.infrastructure = Some(e.to_string());
                }
                log::warn!("{} {} failed: {}", action.kind, action.key, e);
                outcome.result.message = e.to_string();
            }
            Err(ActionError::Hook(message)) => {
                log::warn!("Hook {} failed: {}", action.key, message);
                outcome.result.message = message;
            }
        }
        outcome
    }

    /// Runs `op`, retrying retryable cluster errors per `retry`.
    /// Returns the final result and the number of attempts made.
    async fn with_retry<T, F, Fut>(
        &self,
        key: &ResourceKey,
        retry: &RetryPolicy,
        mut op: F,
    ) -> (Result<T, ClusterError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return (Ok(value), attempts),
                Err(e) if e.is_retryable() && attempts <= retry.limit => {
                    let delay = retry.backoff.delay(attempts);
                    log::info!(
                        "Retrying {} (attempt {}/{}) after {:?}: {}",
                        key,
                        attempts + 1,
                        retry.limit + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempts),
            }
        }
    }

    async fn run_hook(
        &self,
        action: &SyncAction,
        dry_run: bool,
        retry: &RetryPolicy,
    ) -> (Result<(ResourceResultStatus, String), ActionError>, u32) {
        let key = &action.key;
        if dry_run {
            let (result, attempts) = self
                .with_retry(key, retry, || self.cluster.apply(&action.manifest, true))
                .await;
            return (
                result
                    .map(|_| (ResourceResultStatus::Synced, "hook validated (dry run)".to_string()))
                    .map_err(ActionError::Cluster),
                attempts,
            );
        }

        let policies = action
            .hook
            .as_ref()
            .map(|h| h.delete_policies.clone())
            .unwrap_or_default();

        if policies.contains(&HookDeletePolicy::BeforeHookCreation) {
            if let Err(e) = self.cluster.delete(key, false).await {
                return (Err(ActionError::Cluster(e)), 0);
            }
        }

        let (applied, attempts) = self
            .with_retry(key, retry, || self.cluster.apply(&action.manifest, false))
            .await;
        if let Err(e) = applied {
            return (Err(ActionError::Cluster(e)), attempts);
        }

        let verdict = self.wait_for_hook(key).await;
        let succeeded = verdict.is_ok();
        let cleanup = (succeeded && policies.contains(&HookDeletePolicy::HookSucceeded))
            || (!succeeded && policies.contains(&HookDeletePolicy::HookFailed));
        if cleanup {
            if let Err(e) = self.cluster.delete(key, false).await {
                log::warn!("Failed to delete hook {}: {}", key, e);
            }
        }
        (
            verdict.map(|message| (ResourceResultStatus::Synced, message)),
            attempts,
        )
    }

    /// Polls the hook until it is healthy or degraded, or the hook timeout passes.
    async fn wait_for_hook(&self, key: &ResourceKey) -> Result<String, ActionError> {
        let deadline = Instant::now() + self.settings.hook_timeout;
        loop {
            match self.cluster.get(key).await {
                Ok(Some(live)) => {
                    let health = self.health.assess(&live);
                    match health.status {
                        HealthStatusCode::Healthy => return Ok("hook succeeded".to_string()),
                        HealthStatusCode::Degraded => {
                            return Err(ActionError::Hook(
                                health
                                    .message
                                    .unwrap_or_else(|| "hook degraded".to_string()),
                            ))
                        }
                        _ => {}
                    }
                }
                Ok(None) => {
                    return Err(ActionError::Hook(
                        "hook resource disappeared before completing".to_string(),
                    ))
                }
                Err(e) if e.is_infrastructure() => return Err(ActionError::Cluster(e)),
                Err(e) => log::debug!("Hook {} status check failed: {}", key, e),
            }
            if Instant::now() >= deadline {
                return Err(ActionError::Hook(format!(
                    "hook did not complete within {}s",
                    self.settings.hook_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

enum ActionError {
    Cluster(ClusterError),
    Hook(String),
}

fn timed_out(wave: usize, action: &SyncAction) -> ActionOutcome {
    ActionOutcome {
        result: ResourceResult {
            key: action.key.clone(),
            action: action.kind,
            hook_phase: action.hook_phase,
            wave: Some(wave),
            status: ResourceResultStatus::SyncFailed,
            message: "deadline exceeded".to_string(),
            attempts: 0,
        },
        blocking: action.blocking,
        infrastructure: None,
        timed_out: true,
    }
}

fn not_started(reason: &Stop) -> String {
    match reason {
        Stop::Cancelled => "not started: operation cancelled".to_string(),
        Stop::Blocked(_) => "not started: a blocking action failed".to_string(),
        Stop::Infrastructure(_) => "not started: cluster unavailable".to_string(),
        Stop::Deadline => "not started: deadline exceeded".to_string(),
    }
}

fn skip_wave(wave: &Wave, message: &str) -> Vec<ResourceResult> {
    wave.actions
        .iter()
        .map(|a| ResourceResult {
            key: a.key.clone(),
            action: a.kind,
            hook_phase: a.hook_phase,
            wave: Some(wave.index),
            status: ResourceResultStatus::Skipped,
            message: message.to_string(),
            attempts: 0,
        })
        .collect()
}
