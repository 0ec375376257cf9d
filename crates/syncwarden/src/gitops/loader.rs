//! Loads declarative Application definitions from a directory tree.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use super::error::{GitOpsError, Result};
use crate::resource::{AppKey, Application, API_VERSION, APPLICATION_KIND};

/// An application together with the file it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedApplication {
    pub application: Application,
    /// Path relative to the applications directory.
    pub path: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceHeader {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
}

pub struct ApplicationLoader {
    dir: PathBuf,
}

impl ApplicationLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads every `*.yaml`/`*.yml` file below the directory, sorted by application key.
    pub fn load(&self) -> Result<Vec<LoadedApplication>> {
        if !self.dir.is_dir() {
            return Err(GitOpsError::DirectoryNotFound(self.dir.clone()));
        }

        let mut seen: HashMap<AppKey, PathBuf> = HashMap::new();
        let mut loaded = Vec::new();

        for entry in WalkDir::new(&self.dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_application_file(&self.dir, path) {
                continue;
            }

            let application = match self.load_file(path) {
                Ok(app) => app,
                Err(e) => {
                    log::warn!("Failed to load {}: {}", path.display(), e);
                    return Err(e);
                }
            };
            let relative = path.strip_prefix(&self.dir).unwrap_or(path).to_path_buf();

            if seen.insert(application.key(), relative.clone()).is_some() {
                return Err(GitOpsError::DuplicateName {
                    name: application.key().to_string(),
                    path: relative,
                });
            }
            loaded.push(LoadedApplication {
                application,
                path: relative,
            });
        }

        loaded.sort_by(|a, b| a.application.key().cmp(&b.application.key()));
        log::info!(
            "Loaded {} application(s) from {}",
            loaded.len(),
            self.dir.display()
        );
        Ok(loaded)
    }

    pub fn load_file(&self, path: &Path) -> Result<Application> {
        let content = fs::read_to_string(path).map_err(|e| GitOpsError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        parse_application(&content, path)
    }
}

/// Parses and validates a single Application document.
pub fn parse_application(content: &str, path: &Path) -> Result<Application> {
    let header: ResourceHeader =
        serde_yaml::from_str(content).map_err(|e| GitOpsError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if header.api_version != API_VERSION {
        return Err(GitOpsError::InvalidApiVersion {
            path: path.to_path_buf(),
            version: header.api_version,
            expected: API_VERSION.to_string(),
        });
    }
    if header.kind != APPLICATION_KIND {
        return Err(GitOpsError::UnknownKind {
            path: path.to_path_buf(),
            kind: header.kind,
        });
    }

    let application: Application =
        serde_yaml::from_str(content).map_err(|e| GitOpsError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    application
        .validate()
        .map_err(|message| GitOpsError::InvalidApplication {
            path: path.to_path_buf(),
            message,
        })?;
    Ok(application)
}

/// YAML files outside hidden directories.
pub(crate) fn is_application_file(root: &Path, path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext != "yaml" && ext != "yml" {
        return false;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    !relative.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn app_yaml(name: &str) -> String {
        format!(
            r#"
apiVersion: syncwarden.io/v1alpha1
kind: Application
metadata:
  name: {}
spec:
  source:
    repoUrl: https://git.example.com/team/apps
    targetRevision: main
    path: {}
  destination:
    namespace: default
  syncPolicy:
    automated:
      prune: true
"#,
            name, name
        )
    }

    #[test]
    fn test_load_applications() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("team-a")).unwrap();
        fs::write(dir.path().join("web.yaml"), app_yaml("web")).unwrap();
        fs::write(dir.path().join("team-a/api.yml"), app_yaml("api")).unwrap();
        fs::write(dir.path().join("README.md"), "# apps").unwrap();

        let loaded = ApplicationLoader::new(dir.path()).load().unwrap();
        let names: Vec<&str> = loaded.iter().map(|l| l.application.name()).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert_eq!(loaded[0].path, PathBuf::from("team-a/api.yml"));
        assert!(loaded[1].application.auto_sync_enabled());
        assert_eq!(loaded[1].application.spec.source.target_revision, "main");
    }

    #[test]
    fn test_hidden_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config.yaml"), "not: an app").unwrap();
        fs::write(dir.path().join(".draft.yaml"), "not: an app").unwrap();
        fs::write(dir.path().join("web.yaml"), app_yaml("web")).unwrap();

        let loaded = ApplicationLoader::new(dir.path()).load().unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), app_yaml("web")).unwrap();
        fs::write(dir.path().join("b.yaml"), app_yaml("web")).unwrap();

        let err = ApplicationLoader::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, GitOpsError::DuplicateName { .. }));
    }

    #[test]
    fn test_invalid_api_version() {
        let content = app_yaml("web").replace("syncwarden.io/v1alpha1", "example.io/v1");
        let err = parse_application(&content, Path::new("web.yaml")).unwrap_err();
        assert!(matches!(err, GitOpsError::InvalidApiVersion { .. }));
    }

    #[test]
    fn test_wrong_kind() {
        let content = app_yaml("web").replace("kind: Application", "kind: Deployment");
        let err = parse_application(&content, Path::new("web.yaml")).unwrap_err();
        assert!(matches!(err, GitOpsError::UnknownKind { ref kind, .. } if kind == "Deployment"));
    }

    #[test]
    fn test_missing_destination_namespace() {
        let content = app_yaml("web").replace("namespace: default", "namespace: \"\"");
        let err = parse_application(&content, Path::new("web.yaml")).unwrap_err();
        assert!(matches!(err, GitOpsError::InvalidApplication { .. }));
    }

    #[test]
    fn test_nonexistent_directory() {
        let err = ApplicationLoader::new("/nonexistent/apps").load().unwrap_err();
        assert!(matches!(err, GitOpsError::DirectoryNotFound(_)));
    }
}
