//! Registered source repositories and the service that manages them.

pub mod service;
pub mod url;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use service::{
    HelmAppSpec, KsonnetAppSpec, KustomizeAppSpec, RepositoryApps, RepositoryService,
};
pub use url::normalize_repo_url;

use crate::source::{RepositoryCredentials, SourceError};

/// Revision browsed when a caller names none.
pub const DEFAULT_REVISION: &str = "HEAD";

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("Repository {0} already exists with a different spec; use upsert to update it")]
    AlreadyExistsWithDifferentSpec(String),

    #[error("Failed to connect to repository {repo}: {source}")]
    ConnectionFailed {
        repo: String,
        #[source]
        source: SourceError,
    },

    #[error("Permission denied: '{subject}' may not {action} {resource} '{object}'")]
    PermissionDenied {
        subject: String,
        resource: String,
        action: String,
        object: String,
    },

    #[error("Failed to read repository: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Successful,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn successful() -> Self {
        Self {
            status: ConnectionStatus::Successful,
            message: None,
            attempted_at: Some(Utc::now()),
        }
    }
}

/// A source repository with optional credentials.
///
/// Credentials never leave the service; callers only ever see a [`RepositoryView`].
#[derive(Debug)]
pub struct Repository {
    pub repo: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub ssh_private_key: Option<SecretString>,
    pub connection_state: ConnectionState,
}

impl Repository {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            username: None,
            password: None,
            ssh_private_key: None,
            connection_state: ConnectionState::default(),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(SecretString::from(password.to_string()));
        self
    }

    pub fn with_ssh_private_key(mut self, key: &str) -> Self {
        self.ssh_private_key = Some(SecretString::from(key.to_string()));
        self
    }

    pub fn credentials(&self) -> RepositoryCredentials<'_> {
        RepositoryCredentials {
            username: self.username.as_deref(),
            password: self.password.as_ref(),
            ssh_private_key: self.ssh_private_key.as_ref(),
        }
    }

    /// Compares everything except the connection state.
    pub fn same_spec(&self, other: &Repository) -> bool {
        self.repo == other.repo
            && self.username == other.username
            && secret_eq(&self.password, &other.password)
            && secret_eq(&self.ssh_private_key, &other.ssh_private_key)
    }

    /// The redacted view handed to callers.
    pub fn view(&self) -> RepositoryView {
        RepositoryView {
            repo: self.repo.clone(),
            username: self.username.clone(),
            has_password: self.password.is_some(),
            has_ssh_private_key: self.ssh_private_key.is_some(),
            connection_state: self.connection_state.clone(),
        }
    }
}

impl Clone for Repository {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            username: self.username.clone(),
            password: self.password.as_ref().map(clone_secret),
            ssh_private_key: self.ssh_private_key.as_ref().map(clone_secret),
            connection_state: self.connection_state.clone(),
        }
    }
}

fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn secret_eq(a: &Option<SecretString>, b: &Option<SecretString>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
        (None, None) => true,
        _ => false,
    }
}

/// A repository with its secrets removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryView {
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub has_password: bool,
    pub has_ssh_private_key: bool,
    pub connection_state: ConnectionState,
}
