//! Deduplicating work queue of application keys.
//!
//! A key is delivered to at most one worker at a time. Keys added while they
//! are being processed are redelivered once the worker calls [`WorkQueue::done`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::resource::AppKey;

#[derive(Default)]
struct QueueState {
    queued: HashSet<AppKey>,
    processing: HashSet<AppKey>,
    dirty: HashSet<AppKey>,
}

pub struct WorkQueue {
    sender: Sender<AppKey>,
    receiver: Receiver<AppKey>,
    state: Mutex<QueueState>,
    shutdown: AtomicBool,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            state: Mutex::new(QueueState::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Enqueues `key` unless it is already waiting.
    pub fn add(&self, key: AppKey) {
        if self.shutdown.load(Ordering::Relaxed) {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            let _ = self.sender.send(key);
        }
    }

    /// Takes the next key, marking it as processing. `None` on timeout or shutdown.
    pub fn get(&self, timeout: Duration) -> Option<AppKey> {
        if self.shutdown.load(Ordering::Relaxed) {
            return None;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(key) => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.queued.remove(&key);
                state.processing.insert(key.clone());
                Some(key)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Marks `key` as processed, requeueing it if it was added meanwhile.
    pub fn done(&self, key: &AppKey) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processing.remove(key);
        if state.dirty.remove(key)
            && !self.shutdown.load(Ordering::Relaxed)
            && state.queued.insert(key.clone())
        {
            let _ = self.sender.send(key.clone());
        }
    }

    /// Keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queued
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self, key: &AppKey) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .processing
            .contains(key)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
