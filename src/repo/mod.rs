use async_trait::async_trait;
use std::{fmt::Debug, path::Path, process::Stdio};
use tokio::process::Command;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("git clone failed; {0}")]
    CloneFailed(String),

    #[error("io error; {0}")]
    Io(#[from] std::io::Error),
}

/// Materializes a remote repository onto local disk. The Dockerfile gate is
/// deliberately not part of this interface; fetching and judging the fetched
/// tree are separate concerns owned by the orchestrator.
#[async_trait]
pub trait RepoFetcher: Debug + Send + Sync + 'static {
    /// Full clone of `url` into `dest`, creating `dest` if absent.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Production fetcher; shells out to the git binary.
#[derive(Debug, Default)]
pub struct GitFetcher {}

#[async_trait]
impl RepoFetcher for GitFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        tokio::fs::create_dir_all(dest).await?;

        let mut cmd = Command::new("git");
        cmd.arg("clone")
            .arg(url)
            .arg(dest)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = ?cmd, "running git clone");

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::CloneFailed(stderr.to_string()));
        }

        Ok(())
    }
}

/// The final path segment of a repository url with any version control
/// suffix stripped; used as the image name within the registry repository.
pub fn repo_base_name(url: &str) -> String {
    let last_segment = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    last_segment
        .strip_suffix(".git")
        .unwrap_or(last_segment)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn base_name_strips_git_suffix() {
        assert_eq!(repo_base_name("https://example.com/org/app.git"), "app");
        assert_eq!(repo_base_name("https://github.com/org/my-service"), "my-service");
    }

    #[test]
    fn base_name_ignores_trailing_slash() {
        assert_eq!(repo_base_name("https://example.com/org/app.git/"), "app");
        assert_eq!(repo_base_name("https://example.com/org/app/"), "app");
    }

    #[test]
    fn clone_error_display() {
        let err = FetchError::CloneFailed("repository not found".into());
        assert!(err.to_string().contains("git clone failed"));
        assert!(err.to_string().contains("repository not found"));
    }
}
