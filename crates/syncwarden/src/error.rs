use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::resource::ResourceKey;
use crate::source::SourceError;

/// A malformed desired manifest set.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate resource identity in desired set: {key}")]
    DuplicateResource { key: ResourceKey },

    #[error("Invalid manifest at index {index}: {reason}")]
    InvalidManifest { index: usize, reason: String },
}

/// A failure confined to a single resource. Never aborts a comparison.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Failed to normalize {key}: {reason}")]
    Normalize { key: ResourceKey, reason: String },
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Permission denied: '{subject}' may not {action} {resource} '{object}'")]
    PermissionDenied {
        subject: String,
        resource: String,
        action: String,
        object: String,
    },

    #[error("Another operation is already running for application '{app}'")]
    OperationInProgress { app: String },

    #[error("No operation is running for application '{app}'")]
    NoOperationRunning { app: String },

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Application already exists: {0}")]
    ApplicationExists(String),

    #[error("Invalid application: {0}")]
    InvalidApplication(String),
}

impl ControllerError {
    /// Returns true for errors that abort an entire reconciliation pass.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            ControllerError::Validation(_)
                | ControllerError::Source(_)
                | ControllerError::Infrastructure(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid path pattern '{path}' for {kind}: {reason}")]
    InvalidPath {
        kind: String,
        path: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ControllerError>;
