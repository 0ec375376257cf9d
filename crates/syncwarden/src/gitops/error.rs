//! Errors raised while loading or watching application definitions.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Applications directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Invalid API version '{version}' in '{path}', expected '{expected}'")]
    InvalidApiVersion {
        path: PathBuf,
        version: String,
        expected: String,
    },

    #[error("Unsupported kind '{kind}' in '{path}'")]
    UnknownKind { path: PathBuf, kind: String },

    #[error("Invalid application in '{path}': {message}")]
    InvalidApplication { path: PathBuf, message: String },

    #[error("Duplicate application '{name}' in '{path}'")]
    DuplicateName { name: String, path: PathBuf },

    #[error("Watch error: {0}")]
    WatchError(String),
}

pub type Result<T> = std::result::Result<T, GitOpsError>;
