//! Watches the applications directory and broadcasts definition changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::error::{GitOpsError, Result};
use super::loader::{is_application_file, parse_application, LoadedApplication};
use crate::resource::{AppKey, Application};

const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// A definition was created or modified.
    Applied,
    /// A definition was removed.
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationChangeEvent {
    pub change_type: ChangeType,
    /// Path relative to the applications directory.
    pub path: String,
    pub app: AppKey,
    /// The new definition, for `Applied` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<Application>,
}

pub struct ApplicationWatcher {
    dir: PathBuf,
    sender: broadcast::Sender<ApplicationChangeEvent>,
    shutdown: Arc<AtomicBool>,
    /// Which application each known file defines.
    known: Mutex<HashMap<PathBuf, AppKey>>,
}

impl ApplicationWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            dir: dir.into(),
            sender,
            shutdown: Arc::new(AtomicBool::new(false)),
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApplicationChangeEvent> {
        self.sender.subscribe()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records the files of an initial load so later deletions can be attributed.
    pub fn track(&self, loaded: &[LoadedApplication]) {
        let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
        for entry in loaded {
            known.insert(self.dir.join(&entry.path), entry.application.key());
        }
    }

    /// Watches the directory until [`stop`](Self::stop) is called. Blocks.
    pub fn watch(&self) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer: Debouncer<RecommendedWatcher> =
            new_debouncer(DEBOUNCE, tx).map_err(|e| GitOpsError::WatchError(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.dir, RecursiveMode::Recursive)
            .map_err(|e| GitOpsError::WatchError(e.to_string()))?;

        log::info!("Watching applications directory: {}", self.dir.display());

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        for change in self.process_event(&event) {
                            let _ = self.sender.send(change);
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::error!("Watch error: {}", e);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }

        log::info!("Stopped watching applications directory");
        Ok(())
    }

    /// Runs [`watch`](Self::watch) on a dedicated thread.
    pub fn start(self: &Arc<Self>) -> std::thread::JoinHandle<Result<()>> {
        let watcher = Arc::clone(self);
        std::thread::spawn(move || watcher.watch())
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn process_event(&self, event: &DebouncedEvent) -> Vec<ApplicationChangeEvent> {
        self.process_path(&event.path)
    }

    /// Turns a changed path into zero or more change events.
    pub(crate) fn process_path(&self, path: &Path) -> Vec<ApplicationChangeEvent> {
        if !is_application_file(&self.dir, path) {
            return Vec::new();
        }
        let relative = path
            .strip_prefix(&self.dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
        let previous = known.get(path).cloned();
        let mut changes = Vec::new();

        if !path.exists() {
            if let Some(app) = previous {
                known.remove(path);
                changes.push(ApplicationChangeEvent {
                    change_type: ChangeType::Deleted,
                    path: relative,
                    app,
                    application: None,
                });
            }
            return changes;
        }

        let application = match std::fs::read_to_string(path)
            .map_err(|e| GitOpsError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })
            .and_then(|content| parse_application(&content, path))
        {
            Ok(app) => app,
            Err(e) => {
                log::warn!("Ignoring invalid application file {}: {}", relative, e);
                return changes;
            }
        };

        let key = application.key();
        if let Some(old) = previous.filter(|old| *old != key) {
            changes.push(ApplicationChangeEvent {
                change_type: ChangeType::Deleted,
                path: relative.clone(),
                app: old,
                application: None,
            });
        }
        known.insert(path.to_path_buf(), key.clone());
        changes.push(ApplicationChangeEvent {
            change_type: ChangeType::Applied,
            path: relative,
            app: key,
            application: Some(application),
        });
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::ApplicationLoader;
    use std::fs;
    use tempfile::TempDir;

    fn app_yaml(name: &str) -> String {
        format!(
            "apiVersion: syncwarden.io/v1alpha1\nkind: Application\nmetadata:\n  name: {}\nspec:\n  source:\n    repoUrl: https://git.example.com/team/apps\n  destination:\n    namespace: default\n",
            name
        )
    }

    #[test]
    fn test_change_type_serialization() {
        assert_eq!(
            serde_json::to_string(&ChangeType::Applied).unwrap(),
            "\"applied\""
        );
        assert_eq!(
            serde_json::to_string(&ChangeType::Deleted).unwrap(),
            "\"deleted\""
        );
    }

    #[test]
    fn test_new_file_is_applied() {
        let dir = TempDir::new().unwrap();
        let watcher = ApplicationWatcher::new(dir.path());
        let path = dir.path().join("web.yaml");
        fs::write(&path, app_yaml("web")).unwrap();

        let changes = watcher.process_path(&path);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Applied);
        assert_eq!(changes[0].app.name, "web");
        assert_eq!(changes[0].path, "web.yaml");
        assert!(changes[0].application.is_some());
    }

    #[test]
    fn test_deleted_tracked_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("web.yaml"), app_yaml("web")).unwrap();
        let watcher = ApplicationWatcher::new(dir.path());
        watcher.track(&ApplicationLoader::new(dir.path()).load().unwrap());

        let path = dir.path().join("web.yaml");
        fs::remove_file(&path).unwrap();
        let changes = watcher.process_path(&path);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Deleted);
        assert_eq!(changes[0].app.name, "web");

        // Second notification for the same path has nothing left to report.
        assert!(watcher.process_path(&path).is_empty());
    }

    #[test]
    fn test_renamed_application_deletes_old_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.yaml");
        fs::write(&path, app_yaml("web")).unwrap();
        let watcher = ApplicationWatcher::new(dir.path());
        watcher.process_path(&path);

        fs::write(&path, app_yaml("frontend")).unwrap();
        let changes = watcher.process_path(&path);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::Deleted);
        assert_eq!(changes[0].app.name, "web");
        assert_eq!(changes[1].change_type, ChangeType::Applied);
        assert_eq!(changes[1].app.name, "frontend");
    }

    #[test]
    fn test_invalid_and_foreign_files_ignored() {
        let dir = TempDir::new().unwrap();
        let watcher = ApplicationWatcher::new(dir.path());
        let bad = dir.path().join("bad.yaml");
        fs::write(&bad, "kind: [").unwrap();
        assert!(watcher.process_path(&bad).is_empty());

        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "hello").unwrap();
        assert!(watcher.process_path(&notes).is_empty());
    }

    #[test]
    fn test_watcher_stop() {
        let dir = TempDir::new().unwrap();
        let watcher = ApplicationWatcher::new(dir.path());
        assert!(!watcher.is_stopped());
        watcher.stop();
        assert!(watcher.is_stopped());
    }
}
