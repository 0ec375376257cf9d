//! Authorization boundary.
//!
//! Every externally triggered action is checked as
//! `(subject, resource, action, object)` before any state changes.

use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Subject used by the controller itself; always allowed.
pub const SYSTEM_SUBJECT: &str = "system";

pub const RESOURCE_APPLICATIONS: &str = "applications";
pub const RESOURCE_REPOSITORIES: &str = "repositories";
pub const RESOURCE_REPOSITORY_APPS: &str = "repositories/apps";

pub const ACTION_GET: &str = "get";
pub const ACTION_CREATE: &str = "create";
pub const ACTION_UPDATE: &str = "update";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_SYNC: &str = "sync";

pub trait Authorizer: Send + Sync {
    fn enforce(&self, subject: &str, resource: &str, action: &str, object: &str) -> bool;
}

/// Returns `PermissionDenied` unless `authorizer` allows the request.
pub fn authorize(
    authorizer: &dyn Authorizer,
    subject: &str,
    resource: &str,
    action: &str,
    object: &str,
) -> Result<(), ControllerError> {
    if subject == SYSTEM_SUBJECT || authorizer.enforce(subject, resource, action, object) {
        Ok(())
    } else {
        log::info!(
            "Denied '{}' {} on {} '{}'",
            subject,
            action,
            resource,
            object
        );
        Err(ControllerError::PermissionDenied {
            subject: subject.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            object: object.to_string(),
        })
    }
}

/// Allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn enforce(&self, _subject: &str, _resource: &str, _action: &str, _object: &str) -> bool {
        true
    }
}

/// One allow rule. Every field is a glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub subject: String,
    pub resource: String,
    pub action: String,
    pub object: String,
}

impl Policy {
    pub fn new(subject: &str, resource: &str, action: &str, object: &str) -> Self {
        Self {
            subject: subject.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            object: object.to_string(),
        }
    }
}

struct CompiledPolicy {
    subject: glob::Pattern,
    resource: glob::Pattern,
    action: glob::Pattern,
    object: glob::Pattern,
}

/// Allows a request when any policy matches it.
pub struct PolicyAuthorizer {
    policies: Vec<CompiledPolicy>,
}

impl PolicyAuthorizer {
    pub fn new(policies: &[Policy]) -> Result<Self, glob::PatternError> {
        let policies = policies
            .iter()
            .map(|p| {
                Ok(CompiledPolicy {
                    subject: glob::Pattern::new(&p.subject)?,
                    resource: glob::Pattern::new(&p.resource)?,
                    action: glob::Pattern::new(&p.action)?,
                    object: glob::Pattern::new(&p.object)?,
                })
            })
            .collect::<Result<Vec<_>, glob::PatternError>>()?;
        Ok(Self { policies })
    }
}

impl Authorizer for PolicyAuthorizer {
    fn enforce(&self, subject: &str, resource: &str, action: &str, object: &str) -> bool {
        self.policies.iter().any(|p| {
            p.subject.matches(subject)
                && p.resource.matches(resource)
                && p.action.matches(action)
                && p.object.matches(object)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorizer() -> PolicyAuthorizer {
        PolicyAuthorizer::new(&[
            Policy::new("*", "applications", "get", "*"),
            Policy::new("dev", "applications", "sync", "team-a/*"),
            Policy::new("admin", "*", "*", "*"),
        ])
        .unwrap()
    }

    #[test]
    fn test_policy_matching() {
        let auth = authorizer();
        assert!(auth.enforce("anyone", "applications", "get", "team-b/web"));
        assert!(auth.enforce("dev", "applications", "sync", "team-a/web"));
        assert!(!auth.enforce("dev", "applications", "sync", "team-b/web"));
        assert!(!auth.enforce("dev", "applications", "delete", "team-a/web"));
        assert!(auth.enforce("admin", "repositories", "create", "https://x"));
    }

    #[test]
    fn test_authorize_returns_permission_denied() {
        let auth = authorizer();
        let err = authorize(&auth, "dev", "applications", "delete", "team-a/web").unwrap_err();
        assert!(matches!(err, ControllerError::PermissionDenied { .. }));
        assert!(authorize(&auth, SYSTEM_SUBJECT, "applications", "delete", "x").is_ok());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(PolicyAuthorizer::new(&[Policy::new("[", "*", "*", "*")]).is_err());
    }
}
