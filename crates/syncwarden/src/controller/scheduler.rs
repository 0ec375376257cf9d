//! Periodic and event-driven refresh triggers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::ApplicationController;

/// Feeds the work queue from a timer, from cluster watch events and from manual triggers.
pub struct RefreshScheduler {
    controller: Arc<ApplicationController>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    trigger: broadcast::Sender<()>,
}

impl RefreshScheduler {
    pub fn new(controller: Arc<ApplicationController>, interval: Duration) -> Self {
        let (trigger, _) = broadcast::channel(16);
        Self {
            controller,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            trigger,
        }
    }

    /// Starts the trigger loop on `handle`. Every application is queued once immediately.
    pub fn start(&self, handle: &Handle) -> JoinHandle<()> {
        let controller = Arc::clone(&self.controller);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;
        let mut trigger_rx = self.trigger.subscribe();
        let mut events = controller.cache().subscribe();

        handle.spawn(async move {
            let mut timer = tokio::time::interval(interval);

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = timer.tick() => {
                        log::debug!("Periodic refresh");
                        controller.refresh_all();
                    },
                    event = events.recv() => match event {
                        Ok(event) => {
                            controller.notify_cluster_event(&event);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("Missed {} cluster events, refreshing everything", skipped);
                            controller.refresh_all();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            log::debug!("Cluster event stream closed");
                            break;
                        }
                    },
                    trigger = trigger_rx.recv() => {
                        if trigger.is_ok() && !shutdown.load(Ordering::Acquire) {
                            log::info!("Manual refresh triggered");
                            controller.refresh_all();
                        }
                    },
                }
            }
            log::debug!("Refresh scheduler stopped");
        })
    }

    /// Queues every application now.
    pub fn trigger(&self) {
        let _ = self.trigger.send(());
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        // wake the select loop
        let _ = self.trigger.send(());
    }
}
