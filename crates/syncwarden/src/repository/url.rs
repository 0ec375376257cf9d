/// Canonical form of a repository URL used as its identity.
///
/// Lowercases the scheme and host, drops trailing `/` and a `.git` suffix.
/// Handles both `scheme://host/path` and scp-style `user@host:path` forms.
pub fn normalize_repo_url(url: &str) -> String {
    let mut trimmed = url.trim().trim_end_matches('/');
    if let Some(stripped) = trimmed.strip_suffix(".git") {
        trimmed = stripped.trim_end_matches('/');
    }

    if let Some((scheme, rest)) = trimmed.split_once("://") {
        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        return format!(
            "{}://{}{}",
            scheme.to_ascii_lowercase(),
            lowercase_host(authority),
            path
        );
    }

    if let Some((authority, path)) = trimmed.split_once(':') {
        if authority.contains('@') && !authority.contains('/') {
            return format!("{}:{}", lowercase_host(authority), path);
        }
    }

    trimmed.to_string()
}

// Userinfo keeps its case.
fn lowercase_host(authority: &str) -> String {
    match authority.rsplit_once('@') {
        Some((user, host)) => format!("{}@{}", user, host.to_ascii_lowercase()),
        None => authority.to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_https() {
        assert_eq!(
            normalize_repo_url("HTTPS://GitHub.com/Org/Repo.git"),
            "https://github.com/Org/Repo"
        );
        assert_eq!(
            normalize_repo_url("https://github.com/org/repo/"),
            "https://github.com/org/repo"
        );
        assert_eq!(
            normalize_repo_url("https://github.com/org/repo.git/"),
            "https://github.com/org/repo"
        );
    }

    #[test]
    fn test_normalize_keeps_userinfo_case() {
        assert_eq!(
            normalize_repo_url("https://Deploy@Git.Example.com/x"),
            "https://Deploy@git.example.com/x"
        );
    }

    #[test]
    fn test_normalize_scp_style() {
        assert_eq!(
            normalize_repo_url("git@GitHub.com:Org/Repo.git"),
            "git@github.com:Org/Repo"
        );
    }

    #[test]
    fn test_normalize_file_url() {
        assert_eq!(normalize_repo_url("file:///srv/repos/apps/"), "file:///srv/repos/apps");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_repo_url("HTTPS://Example.COM/a/b.git");
        assert_eq!(normalize_repo_url(&once), once);
    }
}
