//! Operation progress broadcaster for real-time sync status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::sync::OperationPhase;

/// Progress event of one sync operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEvent {
    pub operation_id: String,
    /// Application key, `namespace/name`.
    pub app: String,
    pub phase: OperationPhase,
    /// Index of the wave the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave: Option<usize>,
    /// Resource the event is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl OperationEvent {
    pub fn new(operation_id: &str, app: &str, phase: OperationPhase, message: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            app: app.to_string(),
            phase,
            wave: None,
            resource: None,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_wave(mut self, wave: usize) -> Self {
        self.wave = Some(wave);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// Broadcasts operation progress events for streaming.
#[derive(Clone)]
pub struct OperationBroadcaster {
    sender: Arc<broadcast::Sender<OperationEvent>>,
}

impl OperationBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: OperationEvent) {
        // no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for OperationBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_receivers() {
        let broadcaster = OperationBroadcaster::new(4);
        broadcaster.send(OperationEvent::new(
            "op-1",
            "syncwarden/guestbook",
            OperationPhase::Running,
            "started",
        ));
        assert_eq!(broadcaster.receiver_count(), 0);
    }

    #[test]
    fn test_subscribe_receives_events() {
        let broadcaster = OperationBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        broadcaster.send(
            OperationEvent::new("op-1", "syncwarden/guestbook", OperationPhase::Running, "wave")
                .with_wave(2)
                .with_resource("apps/Deployment/ns1/web"),
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.wave, Some(2));
        assert_eq!(event.resource.as_deref(), Some("apps/Deployment/ns1/web"));
    }
}
