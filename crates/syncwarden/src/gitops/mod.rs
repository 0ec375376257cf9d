//! Declarative application definitions on disk.

pub mod error;
pub mod loader;
pub mod watcher;

pub use error::GitOpsError;
pub use loader::{parse_application, ApplicationLoader, LoadedApplication};
pub use watcher::{ApplicationChangeEvent, ApplicationWatcher, ChangeType};
