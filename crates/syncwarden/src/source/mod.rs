//! Manifest rendering boundary.
//!
//! The controller asks a [`ManifestRenderer`] for the desired documents of an
//! application at a revision. Repository browsing and connectivity checks used
//! by the repository service sit behind the same boundary.

pub mod cache;
pub mod directory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use thiserror::Error;

pub use cache::CachingRenderer;
pub use directory::DirectoryRenderer;

use crate::resource::ApplicationSource;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Failed to render '{path}' from {repo}: {message}")]
    Render {
        repo: String,
        path: String,
        message: String,
    },

    #[error("Path '{path}' not found in {repo}")]
    NotFound { repo: String, path: String },

    #[error("Repository {repo} unavailable: {message}")]
    Unavailable { repo: String, message: String },

    #[error("Authentication to {repo} failed: {message}")]
    AuthenticationFailed { repo: String, message: String },
}

/// What to render.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderRequest {
    pub repo_url: String,
    pub revision: String,
    pub path: String,
    pub parameters: BTreeMap<String, String>,
}

impl From<&ApplicationSource> for RenderRequest {
    fn from(source: &ApplicationSource) -> Self {
        Self {
            repo_url: source.repo_url.clone(),
            revision: source.target_revision.clone(),
            path: source.path.clone(),
            parameters: source.parameters.clone(),
        }
    }
}

/// Rendered desired documents at a resolved revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedManifests {
    /// Revision the documents were rendered from, resolved when the request was floating.
    pub revision: String,
    pub documents: Vec<Value>,
}

#[async_trait]
pub trait ManifestRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedManifests, SourceError>;
}

/// Read access to repository contents.
#[async_trait]
pub trait RepositoryBrowser: Send + Sync {
    /// Repository-relative paths of files matching a glob `pattern`.
    async fn list_files(
        &self,
        repo_url: &str,
        revision: &str,
        pattern: &str,
    ) -> Result<Vec<String>, SourceError>;

    async fn read_file(
        &self,
        repo_url: &str,
        revision: &str,
        path: &str,
    ) -> Result<String, SourceError>;
}

/// Credentials presented when connecting to a repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepositoryCredentials<'a> {
    pub username: Option<&'a str>,
    pub password: Option<&'a SecretString>,
    pub ssh_private_key: Option<&'a SecretString>,
}

impl RepositoryCredentials<'_> {
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.ssh_private_key.is_none()
    }
}

/// Connectivity check performed before a repository is registered.
#[async_trait]
pub trait RepositoryProbe: Send + Sync {
    async fn probe(
        &self,
        repo_url: &str,
        credentials: RepositoryCredentials<'_>,
    ) -> Result<(), SourceError>;
}
