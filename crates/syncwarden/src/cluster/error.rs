//! Errors of the cluster mutation interface.

use thiserror::Error;

use crate::resource::ResourceKey;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Cluster API unreachable: {0}")]
    Unreachable(String),

    #[error("Conflict on {key}: {message}")]
    Conflict { key: ResourceKey, message: String },

    #[error("Transient failure on {key}: {message}")]
    Transient { key: ResourceKey, message: String },

    #[error("Invalid resource {key}: {message}")]
    Invalid { key: ResourceKey, message: String },

    #[error("Forbidden on {key}: {message}")]
    Forbidden { key: ResourceKey, message: String },

    #[error("Resource not found: {key}")]
    NotFound { key: ResourceKey },
}

impl ClusterError {
    /// Returns true if the failure is likely transient and the action can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::Conflict { .. } | ClusterError::Transient { .. }
        )
    }

    /// Returns true if the cluster itself is unavailable, as opposed to one resource failing.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ClusterError::Unreachable(_))
    }
}
