//! Renders manifests from local repository checkouts.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use super::{
    ManifestRenderer, RenderRequest, RenderedManifests, RepositoryBrowser, RepositoryCredentials,
    RepositoryProbe, SourceError,
};

static RE_PARAMETER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_.\-]*)\}").unwrap());

/// File holding the commit a checkout is at.
const REVISION_FILE: &str = "REVISION";

/// Files that describe packaging rather than resources.
const SKIPPED_FILES: &[&str] = &["kustomization.yaml", "kustomization.yml", "Chart.yaml", "values.yaml"];

/// Serves repositories checked out under a root directory.
///
/// `https://git.example.com/team/apps.git` maps to `<root>/apps`; `file://`
/// URLs point at a checkout directly. Plain YAML and JSON manifests below the
/// requested path are rendered in file-name order; `${name}` placeholders are
/// replaced with rendering parameters.
#[derive(Debug, Clone)]
pub struct DirectoryRenderer {
    root: PathBuf,
}

impl DirectoryRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Checkout directory of a repository.
    pub fn checkout_dir(&self, repo_url: &str) -> Result<PathBuf, SourceError> {
        if let Some(path) = repo_url.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        let name = repo_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|n| n.trim_end_matches(".git"))
            .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            .ok_or_else(|| SourceError::Unavailable {
                repo: repo_url.to_string(),
                message: "cannot derive checkout name from URL".to_string(),
            })?;
        Ok(self.root.join(name))
    }

    fn resolve(&self, repo_url: &str, path: &str) -> Result<(PathBuf, PathBuf), SourceError> {
        let checkout = self.checkout_dir(repo_url)?;
        if !checkout.is_dir() {
            return Err(SourceError::Unavailable {
                repo: repo_url.to_string(),
                message: format!("no checkout at {}", checkout.display()),
            });
        }
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(SourceError::Render {
                repo: repo_url.to_string(),
                path: path.to_string(),
                message: "path escapes the repository".to_string(),
            });
        }
        let target = checkout.join(relative);
        Ok((checkout, target))
    }

    fn resolve_revision(checkout: &Path, requested: &str) -> String {
        match std::fs::read_to_string(checkout.join(REVISION_FILE)) {
            Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
            _ => requested.to_string(),
        }
    }

    fn render_file(
        file: &Path,
        request: &RenderRequest,
        documents: &mut Vec<Value>,
    ) -> Result<(), SourceError> {
        let render_error = |message: String| SourceError::Render {
            repo: request.repo_url.clone(),
            path: request.path.clone(),
            message: format!("{}: {}", file.display(), message),
        };
        let raw = std::fs::read_to_string(file).map_err(|e| render_error(e.to_string()))?;
        let content = substitute(&raw, request).map_err(render_error)?;

        let is_json = file.extension().and_then(|e| e.to_str()) == Some("json");
        let parsed: Vec<Value> = if is_json {
            vec![serde_json::from_str(&content).map_err(|e| render_error(e.to_string()))?]
        } else {
            let mut docs = Vec::new();
            for document in serde_yaml::Deserializer::from_str(&content) {
                let value = Value::deserialize(document).map_err(|e| render_error(e.to_string()))?;
                docs.push(value);
            }
            docs
        };

        for value in parsed {
            match value {
                Value::Null => {}
                Value::Object(ref map)
                    if map.get("kind").and_then(Value::as_str) == Some("List") =>
                {
                    if let Some(Value::Array(items)) = map.get("items") {
                        documents.extend(items.iter().cloned());
                    }
                }
                other => documents.push(other),
            }
        }
        Ok(())
    }

    fn render_sync(&self, request: &RenderRequest) -> Result<RenderedManifests, SourceError> {
        let (checkout, target) = self.resolve(&request.repo_url, &request.path)?;
        if !target.exists() {
            return Err(SourceError::NotFound {
                repo: request.repo_url.clone(),
                path: request.path.clone(),
            });
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(&target).sort_by_file_name() {
            let entry = entry.map_err(|e| SourceError::Render {
                repo: request.repo_url.clone(),
                path: request.path.clone(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() || !is_manifest_file(entry.path()) {
                continue;
            }
            Self::render_file(entry.path(), request, &mut documents)?;
        }

        let revision = Self::resolve_revision(&checkout, &request.revision);
        log::debug!(
            "Rendered {} documents from {} path '{}' at {}",
            documents.len(),
            request.repo_url,
            request.path,
            revision
        );
        Ok(RenderedManifests {
            revision,
            documents,
        })
    }
}

fn is_manifest_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if name.starts_with('.') || SKIPPED_FILES.contains(&name) {
        return false;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

/// Replaces `${name}` placeholders; an unknown name is an error.
fn substitute(content: &str, request: &RenderRequest) -> Result<String, String> {
    let mut missing = Vec::new();
    let rendered = RE_PARAMETER.replace_all(content, |caps: &regex::Captures| {
        let name = &caps[1];
        match request.parameters.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.push(name.to_string());
                caps[0].to_string()
            }
        }
    });
    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(format!("undefined parameters: {}", missing.join(", ")))
    }
}

/// Files below `checkout` whose relative path matches `pattern`, skipping hidden entries.
fn matching_files(checkout: &Path, pattern: &glob::Pattern) -> Vec<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(checkout)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(checkout) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if pattern.matches(&relative) {
            files.push(relative);
        }
    }
    files
}

#[async_trait]
impl ManifestRenderer for DirectoryRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedManifests, SourceError> {
        let renderer = self.clone();
        let owned = request.clone();
        tokio::task::spawn_blocking(move || renderer.render_sync(&owned))
            .await
            .map_err(|e| SourceError::Unavailable {
                repo: request.repo_url.clone(),
                message: format!("render task failed: {}", e),
            })?
    }
}

#[async_trait]
impl RepositoryBrowser for DirectoryRenderer {
    async fn list_files(
        &self,
        repo_url: &str,
        _revision: &str,
        pattern: &str,
    ) -> Result<Vec<String>, SourceError> {
        let (checkout, _) = self.resolve(repo_url, ".")?;
        let pattern = glob::Pattern::new(pattern).map_err(|e| SourceError::Render {
            repo: repo_url.to_string(),
            path: pattern.to_string(),
            message: e.to_string(),
        })?;
        tokio::task::spawn_blocking(move || matching_files(&checkout, &pattern))
            .await
            .map_err(|e| SourceError::Unavailable {
                repo: repo_url.to_string(),
                message: format!("listing task failed: {}", e),
            })
    }

    async fn read_file(
        &self,
        repo_url: &str,
        _revision: &str,
        path: &str,
    ) -> Result<String, SourceError> {
        let (_, target) = self.resolve(repo_url, path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|_| SourceError::NotFound {
                repo: repo_url.to_string(),
                path: path.to_string(),
            })
    }
}

#[async_trait]
impl RepositoryProbe for DirectoryRenderer {
    /// Checkouts carry no access control; only the shape of the credentials is checked.
    async fn probe(
        &self,
        repo_url: &str,
        credentials: RepositoryCredentials<'_>,
    ) -> Result<(), SourceError> {
        if credentials.username.is_some() != credentials.password.is_some() {
            return Err(SourceError::AuthenticationFailed {
                repo: repo_url.to_string(),
                message: "username and password must be given together".to_string(),
            });
        }
        self.resolve(repo_url, ".").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn request(path: &str) -> RenderRequest {
        RenderRequest {
            repo_url: "https://git.example.com/team/apps.git".to_string(),
            revision: "HEAD".to_string(),
            path: path.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    fn setup() -> (TempDir, DirectoryRenderer) {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("apps/guestbook");
        fs::create_dir_all(&app).unwrap();
        fs::write(
            app.join("01-namespace.yaml"),
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: guestbook\n",
        )
        .unwrap();
        fs::write(
            app.join("02-app.yaml"),
            r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  color: ${color}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 2
"#,
        )
        .unwrap();
        fs::write(app.join("kustomization.yaml"), "resources: []\n").unwrap();
        let renderer = DirectoryRenderer::new(dir.path());
        (dir, renderer)
    }

    #[tokio::test]
    async fn test_render_multi_document_yaml() {
        let (_dir, renderer) = setup();
        let mut req = request("guestbook");
        req.parameters.insert("color".to_string(), "blue".to_string());
        let rendered = renderer.render(&req).await.unwrap();
        assert_eq!(rendered.revision, "HEAD");
        let kinds: Vec<&str> = rendered
            .documents
            .iter()
            .map(|d| d["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["Namespace", "ConfigMap", "Deployment"]);
        assert_eq!(rendered.documents[1]["data"]["color"], "blue");
    }

    #[tokio::test]
    async fn test_undefined_parameter_is_render_error() {
        let (_dir, renderer) = setup();
        let err = renderer.render(&request("guestbook")).await.unwrap_err();
        match err {
            SourceError::Render { message, .. } => assert!(message.contains("color")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_revision_file_and_missing_path() {
        let (dir, renderer) = setup();
        fs::write(dir.path().join("apps/REVISION"), "0123456789abcdef0123456789abcdef01234567\n")
            .unwrap();
        let mut req = request("guestbook");
        req.parameters.insert("color".to_string(), "red".to_string());
        let rendered = renderer.render(&req).await.unwrap();
        assert_eq!(rendered.revision, "0123456789abcdef0123456789abcdef01234567");

        let err = renderer.render(&request("missing")).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));

        let err = renderer.render(&request("../etc")).await.unwrap_err();
        assert!(matches!(err, SourceError::Render { .. }));
    }

    #[tokio::test]
    async fn test_list_files_and_connectivity_check() {
        let (_dir, renderer) = setup();
        let url = "https://git.example.com/team/apps";
        let files = renderer
            .list_files(url, "HEAD", "**/kustomization.yaml")
            .await
            .unwrap();
        assert_eq!(files, vec!["guestbook/kustomization.yaml"]);
        assert!(renderer.probe(url, RepositoryCredentials::default()).await.is_ok());
        assert!(renderer
            .probe("https://git.example.com/team/unknown", RepositoryCredentials::default())
            .await
            .is_err());

        let half = RepositoryCredentials {
            username: Some("deploy"),
            ..Default::default()
        };
        assert!(matches!(
            renderer.probe(url, half).await,
            Err(SourceError::AuthenticationFailed { .. })
        ));
    }
}
