use std::sync::Mutex;

use super::operation_progress::{OperationBroadcaster, OperationEvent};
use crate::resource::ResourceKey;
use crate::sync::{OperationPhase, ResourceResultStatus, WavePhase};

/// Events emitted by the sync executor while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase {
        phase: OperationPhase,
        message: String,
    },
    WaveStarted {
        wave: usize,
        phase: WavePhase,
        actions: usize,
    },
    Resource {
        wave: usize,
        key: ResourceKey,
        status: ResourceResultStatus,
        message: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges executor events of one operation to an [`OperationBroadcaster`].
pub struct BroadcastProgress {
    operation_id: String,
    app: String,
    phase: Mutex<OperationPhase>,
    broadcaster: OperationBroadcaster,
}

impl BroadcastProgress {
    pub fn new(operation_id: &str, app: &str, broadcaster: OperationBroadcaster) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            app: app.to_string(),
            phase: Mutex::new(OperationPhase::Pending),
            broadcaster,
        }
    }

    fn current_phase(&self) -> OperationPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        let event = match event {
            ProgressEvent::Phase { phase, message } => {
                *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
                OperationEvent::new(&self.operation_id, &self.app, phase, &message)
            }
            ProgressEvent::WaveStarted {
                wave,
                phase,
                actions,
            } => OperationEvent::new(
                &self.operation_id,
                &self.app,
                self.current_phase(),
                &format!("{} wave started ({} actions)", phase, actions),
            )
            .with_wave(wave),
            ProgressEvent::Resource {
                wave,
                key,
                status,
                message,
            } => OperationEvent::new(
                &self.operation_id,
                &self.app,
                self.current_phase(),
                &format!("{}: {}", status, message),
            )
            .with_wave(wave)
            .with_resource(key.to_string()),
        };
        self.broadcaster.send(event);
    }
}
