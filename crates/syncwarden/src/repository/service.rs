use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::{
    normalize_repo_url, ConnectionState, Repository, RepositoryError, RepositoryView,
    DEFAULT_REVISION,
};
use crate::auth::{
    authorize, Authorizer, ACTION_CREATE, ACTION_DELETE, ACTION_GET, ACTION_UPDATE,
    RESOURCE_REPOSITORIES, RESOURCE_REPOSITORY_APPS, SYSTEM_SUBJECT,
};
use crate::source::{RepositoryBrowser, RepositoryProbe};

const HELM_CHART_PATTERN: &str = "*Chart.yaml";
const KSONNET_APP_PATTERN: &str = "*app.yaml";
const KUSTOMIZATION_PATTERN: &str = "*kustomization.yaml";

/// A Helm chart found in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmAppSpec {
    pub name: String,
    /// Directory containing `Chart.yaml`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A Ksonnet application found in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KsonnetAppSpec {
    pub name: String,
    /// Directory containing `app.yaml`.
    pub path: String,
    /// Environment names, sorted.
    pub environments: Vec<String>,
}

/// A Kustomize base found in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeAppSpec {
    /// Directory containing `kustomization.yaml`.
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryApps {
    pub helm_apps: Vec<HelmAppSpec>,
    pub ksonnet_apps: Vec<KsonnetAppSpec>,
    pub kustomize_apps: Vec<KustomizeAppSpec>,
}

#[derive(Deserialize)]
struct ChartFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct KsonnetAppFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    environments: BTreeMap<String, serde_yaml::Value>,
}

/// Registers repositories and discovers deployable apps inside them.
pub struct RepositoryService {
    repositories: RwLock<BTreeMap<String, Repository>>,
    authorizer: Arc<dyn Authorizer>,
    browser: Arc<dyn RepositoryBrowser>,
    probe: Arc<dyn RepositoryProbe>,
}

impl RepositoryService {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        browser: Arc<dyn RepositoryBrowser>,
        probe: Arc<dyn RepositoryProbe>,
    ) -> Self {
        Self {
            repositories: RwLock::new(BTreeMap::new()),
            authorizer,
            browser,
            probe,
        }
    }

    /// Repositories the subject may read. Others are silently filtered out.
    pub fn list(&self, subject: &str) -> Vec<RepositoryView> {
        self.repositories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| {
                subject == SYSTEM_SUBJECT
                    || self
                        .authorizer
                        .enforce(subject, RESOURCE_REPOSITORIES, ACTION_GET, &r.repo)
            })
            .map(Repository::view)
            .collect()
    }

    pub fn get(&self, subject: &str, url: &str) -> Result<RepositoryView, RepositoryError> {
        let url = normalize_repo_url(url);
        self.check(subject, RESOURCE_REPOSITORIES, ACTION_GET, &url)?;
        self.lookup(&url).map(|r| r.view())
    }

    /// Tests connectivity and registers the repository.
    ///
    /// Re-creating an identical repository succeeds without change. A differing
    /// spec is rejected unless `upsert` is set, in which case it is updated.
    pub async fn create(
        &self,
        subject: &str,
        mut repo: Repository,
        upsert: bool,
    ) -> Result<RepositoryView, RepositoryError> {
        repo.repo = normalize_repo_url(&repo.repo);
        self.check(subject, RESOURCE_REPOSITORIES, ACTION_CREATE, &repo.repo)?;

        self.probe
            .probe(&repo.repo, repo.credentials())
            .await
            .map_err(|source| RepositoryError::ConnectionFailed {
                repo: repo.repo.clone(),
                source,
            })?;
        repo.connection_state = ConnectionState::successful();

        {
            let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
            match repositories.get(&repo.repo) {
                None => {
                    log::info!("Registered repository {}", repo.repo);
                    let view = repo.view();
                    repositories.insert(repo.repo.clone(), repo);
                    return Ok(view);
                }
                Some(existing) if existing.same_spec(&repo) => {
                    log::debug!("Repository {} already registered with the same spec", repo.repo);
                    return Ok(existing.view());
                }
                Some(_) if !upsert => {
                    return Err(RepositoryError::AlreadyExistsWithDifferentSpec(repo.repo));
                }
                Some(_) => {}
            }
        }

        self.update(subject, repo)
    }

    /// Replaces the spec of a registered repository.
    pub fn update(
        &self,
        subject: &str,
        mut repo: Repository,
    ) -> Result<RepositoryView, RepositoryError> {
        repo.repo = normalize_repo_url(&repo.repo);
        self.check(subject, RESOURCE_REPOSITORIES, ACTION_UPDATE, &repo.repo)?;

        let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
        let Some(existing) = repositories.get_mut(&repo.repo) else {
            return Err(RepositoryError::NotFound(repo.repo));
        };
        log::info!("Updated repository {}", repo.repo);
        *existing = repo;
        Ok(existing.view())
    }

    pub fn delete(&self, subject: &str, url: &str) -> Result<(), RepositoryError> {
        let url = normalize_repo_url(url);
        self.check(subject, RESOURCE_REPOSITORIES, ACTION_DELETE, &url)?;

        let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
        if repositories.remove(&url).is_none() {
            return Err(RepositoryError::NotFound(url));
        }
        log::info!("Deleted repository {}", url);
        Ok(())
    }

    /// Helm charts, Ksonnet apps and Kustomize bases at `revision` (default `HEAD`).
    pub async fn list_apps(
        &self,
        subject: &str,
        url: &str,
        revision: Option<&str>,
    ) -> Result<RepositoryApps, RepositoryError> {
        let url = normalize_repo_url(url);
        self.check(subject, RESOURCE_REPOSITORY_APPS, ACTION_GET, &url)?;
        self.lookup(&url)?;

        let revision = revision
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REVISION);

        let mut apps = RepositoryApps::default();

        for path in self.browser.list_files(&url, revision, HELM_CHART_PATTERN).await? {
            let content = self.browser.read_file(&url, revision, &path).await?;
            match serde_yaml::from_str::<ChartFile>(&content) {
                Ok(chart) if !chart.name.is_empty() => apps.helm_apps.push(HelmAppSpec {
                    name: chart.name,
                    path: parent_dir(&path),
                    description: chart.description,
                }),
                Ok(_) => log::debug!("Skipping chart without a name: {}", path),
                Err(e) => log::debug!("Skipping unparseable chart {}: {}", path, e),
            }
        }

        for path in self.browser.list_files(&url, revision, KSONNET_APP_PATTERN).await? {
            let content = self.browser.read_file(&url, revision, &path).await?;
            match serde_yaml::from_str::<KsonnetAppFile>(&content) {
                Ok(app) if !app.name.is_empty() && !app.environments.is_empty() => {
                    apps.ksonnet_apps.push(KsonnetAppSpec {
                        name: app.name,
                        path: parent_dir(&path),
                        environments: app.environments.into_keys().collect(),
                    })
                }
                Ok(_) => log::debug!("Skipping app.yaml without a name or environments: {}", path),
                Err(e) => log::debug!("Skipping unparseable app.yaml {}: {}", path, e),
            }
        }

        for path in self.browser.list_files(&url, revision, KUSTOMIZATION_PATTERN).await? {
            apps.kustomize_apps.push(KustomizeAppSpec {
                path: parent_dir(&path),
            });
        }

        Ok(apps)
    }

    fn lookup(&self, url: &str) -> Result<Repository, RepositoryError> {
        self.repositories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(url.to_string()))
    }

    fn check(
        &self,
        subject: &str,
        resource: &str,
        action: &str,
        object: &str,
    ) -> Result<(), RepositoryError> {
        authorize(self.authorizer.as_ref(), subject, resource, action, object).map_err(|_| {
            RepositoryError::PermissionDenied {
                subject: subject.to_string(),
                resource: resource.to_string(),
                action: action.to_string(),
                object: object.to_string(),
            }
        })
    }
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, Policy, PolicyAuthorizer};
    use crate::repository::ConnectionStatus;
    use crate::source::{DirectoryRenderer, RepositoryCredentials, SourceError};
    use async_trait::async_trait;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::TempDir;

    /// Accepts only one password, like a server checking basic auth.
    struct PasswordCheck(&'static str);

    #[async_trait]
    impl RepositoryProbe for PasswordCheck {
        async fn probe(
            &self,
            repo_url: &str,
            credentials: RepositoryCredentials<'_>,
        ) -> Result<(), SourceError> {
            match credentials.password {
                Some(password) if password.expose_secret() == self.0 => Ok(()),
                _ => Err(SourceError::AuthenticationFailed {
                    repo: repo_url.to_string(),
                    message: "invalid username or password".to_string(),
                }),
            }
        }
    }

    fn setup(authorizer: Arc<dyn Authorizer>) -> (TempDir, RepositoryService) {
        let root = TempDir::new().unwrap();
        let checkout = root.path().join("apps");
        fs::create_dir_all(checkout.join("charts/web")).unwrap();
        fs::create_dir_all(checkout.join("charts/broken")).unwrap();
        fs::create_dir_all(checkout.join("overlays/prod")).unwrap();
        fs::create_dir_all(checkout.join("ksonnet/guestbook")).unwrap();
        fs::create_dir_all(checkout.join("ksonnet/draft")).unwrap();
        fs::write(
            checkout.join("ksonnet/guestbook/app.yaml"),
            "apiVersion: 0.1.0\nname: guestbook\nenvironments:\n  prod:\n    path: prod\n  dev:\n    path: dev\n",
        )
        .unwrap();
        fs::write(checkout.join("ksonnet/draft/app.yaml"), "name: draft\n").unwrap();
        fs::write(
            checkout.join("charts/web/Chart.yaml"),
            "name: web\ndescription: frontend\nversion: 1.0.0\n",
        )
        .unwrap();
        fs::write(checkout.join("charts/broken/Chart.yaml"), "version: 1.0.0\n").unwrap();
        fs::write(
            checkout.join("overlays/prod/kustomization.yaml"),
            "resources: [../../base]\n",
        )
        .unwrap();
        let renderer = Arc::new(DirectoryRenderer::new(root.path()));
        let service = RepositoryService::new(authorizer, renderer.clone(), renderer);
        (root, service)
    }

    const URL: &str = "https://git.example.com/team/apps";

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (_root, service) = setup(Arc::new(AllowAll));
        let first = service
            .create("alice", Repository::new(URL).with_credentials("u", "p"), false)
            .await
            .unwrap();
        assert_eq!(first.connection_state.status, ConnectionStatus::Successful);

        let second = service
            .create("alice", Repository::new(format!("{}.git", URL)).with_credentials("u", "p"), false)
            .await
            .unwrap();
        assert_eq!(second.repo, first.repo);
        assert_eq!(service.list("alice").len(), 1);
    }

    #[tokio::test]
    async fn test_create_different_spec_requires_upsert() {
        let (_root, service) = setup(Arc::new(AllowAll));
        service
            .create("alice", Repository::new(URL).with_credentials("u", "p"), false)
            .await
            .unwrap();

        let err = service
            .create("alice", Repository::new(URL).with_credentials("u", "changed"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExistsWithDifferentSpec(_)));

        let view = service
            .create("alice", Repository::new(URL).with_credentials("other", "changed"), true)
            .await
            .unwrap();
        assert_eq!(view.username.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn test_create_fails_when_unreachable() {
        let (_root, service) = setup(Arc::new(AllowAll));
        let err = service
            .create("alice", Repository::new("https://git.example.com/team/missing"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ConnectionFailed { .. }));
        assert!(service.list("alice").is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_credentials() {
        let (root, _) = setup(Arc::new(AllowAll));
        let browser = Arc::new(DirectoryRenderer::new(root.path()));
        let service = RepositoryService::new(
            Arc::new(AllowAll),
            browser,
            Arc::new(PasswordCheck("s3cret")),
        );

        let err = service
            .create("alice", Repository::new(URL).with_credentials("deploy", "wrong"), false)
            .await
            .unwrap_err();
        match err {
            RepositoryError::ConnectionFailed { repo, source } => {
                assert_eq!(repo, URL);
                assert!(matches!(source, SourceError::AuthenticationFailed { .. }));
            }
            other => panic!("expected ConnectionFailed, got {:?}", other),
        }
        assert!(service.list("alice").is_empty());

        let view = service
            .create("alice", Repository::new(URL).with_credentials("deploy", "s3cret"), false)
            .await
            .unwrap();
        assert_eq!(view.connection_state.status, ConnectionStatus::Successful);
    }

    #[tokio::test]
    async fn test_list_filters_by_permission() {
        let authorizer = PolicyAuthorizer::new(&[
            Policy::new("admin", "*", "*", "*"),
            Policy::new("viewer", "repositories", "get", "https://git.example.com/other*"),
        ])
        .unwrap();
        let (_root, service) = setup(Arc::new(authorizer));
        service
            .create("admin", Repository::new(URL), false)
            .await
            .unwrap();

        assert_eq!(service.list("admin").len(), 1);
        assert!(service.list("viewer").is_empty());
        assert!(matches!(
            service.get("viewer", URL),
            Err(RepositoryError::PermissionDenied { .. })
        ));
        assert!(matches!(
            service.delete("viewer", URL),
            Err(RepositoryError::PermissionDenied { .. })
        ));
        assert!(matches!(
            service.create("viewer", Repository::new(URL), false).await,
            Err(RepositoryError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (_root, service) = setup(Arc::new(AllowAll));
        assert!(matches!(
            service.update("alice", Repository::new(URL)),
            Err(RepositoryError::NotFound(_))
        ));
        service.create("alice", Repository::new(URL), false).await.unwrap();
        let view = service
            .update("alice", Repository::new(URL).with_ssh_private_key("key"))
            .unwrap();
        assert!(view.has_ssh_private_key);

        service.delete("alice", URL).unwrap();
        assert!(matches!(service.get("alice", URL), Err(RepositoryError::NotFound(_))));
        assert!(matches!(service.delete("alice", URL), Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_apps() {
        let (_root, service) = setup(Arc::new(AllowAll));
        service.create("alice", Repository::new(URL), false).await.unwrap();

        let apps = service.list_apps("alice", URL, None).await.unwrap();
        assert_eq!(
            apps.helm_apps,
            vec![HelmAppSpec {
                name: "web".to_string(),
                path: "charts/web".to_string(),
                description: Some("frontend".to_string()),
            }]
        );
        assert_eq!(
            apps.ksonnet_apps,
            vec![KsonnetAppSpec {
                name: "guestbook".to_string(),
                path: "ksonnet/guestbook".to_string(),
                environments: vec!["dev".to_string(), "prod".to_string()],
            }]
        );
        assert_eq!(
            apps.kustomize_apps,
            vec![KustomizeAppSpec {
                path: "overlays/prod".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_list_apps_unknown_repository() {
        let (_root, service) = setup(Arc::new(AllowAll));
        let err = service.list_apps("alice", URL, Some("main")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
