use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::FetchOptions;
use git2::build::RepoBuilder;
use tempfile::TempDir;

use crate::errors::PipelineError;

/// A cloned repository in an ephemeral directory, removed on drop.
pub struct Checkout {
    dir: TempDir,
    repo_path: PathBuf,
    pub commit_hash: String,
    pub branch_name: String,
}

impl Checkout {
    pub fn path(&self) -> &Path {
        &self.repo_path
    }

    pub fn workspace(&self) -> &Path {
        self.dir.path()
    }
}

/// Materializes a run's repository on local disk.
#[async_trait]
pub trait Cloner: Send + Sync {
    async fn checkout(&self, run_id: i64, url: &str) -> Result<Checkout, PipelineError>;
}

/// Clones with libgit2, optionally shallow.
#[derive(Debug, Clone, Default)]
pub struct GitCloner {
    depth: Option<u32>,
}

impl GitCloner {
    /// `depth` of `None` or `Some(0)` clones the full history.
    pub fn new(depth: Option<u32>) -> Self {
        Self {
            depth: depth.filter(|d| *d > 0),
        }
    }
}

#[async_trait]
impl Cloner for GitCloner {
    async fn checkout(&self, run_id: i64, url: &str) -> Result<Checkout, PipelineError> {
        let failure = |reason: String| PipelineError::CloneFailure {
            url: url.to_string(),
            reason,
        };

        let dir = tempfile::Builder::new()
            .prefix(&format!("repograde_run_{}_", run_id))
            .tempdir()
            .map_err(|e| failure(format!("could not create workspace: {}", e)))?;
        let repo_path = dir.path().join("repo");

        tracing::info!(run_id, url, depth = ?self.depth, "Cloning repository");
        let depth = self.depth;
        let target = repo_path.clone();
        let source = url.to_string();
        let (commit_hash, branch_name) =
            tokio::task::spawn_blocking(move || clone_blocking(&source, &target, depth))
                .await
                .map_err(|e| failure(format!("clone task panicked: {}", e)))?
                .map_err(|e| failure(e.message().to_string()))?;

        tracing::info!(run_id, commit = %commit_hash, branch = %branch_name, "Clone complete");
        Ok(Checkout {
            dir,
            repo_path,
            commit_hash,
            branch_name,
        })
    }
}

fn clone_blocking(url: &str, target: &Path, depth: Option<u32>) -> Result<(String, String), git2::Error> {
    let mut fetch = FetchOptions::new();
    if let Some(depth) = depth {
        fetch.depth(i32::try_from(depth).unwrap_or(i32::MAX));
    }
    let repo = RepoBuilder::new().fetch_options(fetch).clone(url, target)?;

    let head = repo.head()?;
    let commit = head.peel_to_commit()?.id().to_string();
    let branch = if head.is_branch() {
        head.shorthand().unwrap_or("HEAD").to_string()
    } else {
        "HEAD".to_string()
    };
    Ok((commit, branch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::repo::test_support::init_repo_with_commits;

    #[tokio::test]
    async fn clones_local_repository_and_captures_head() {
        let origin = tempfile::tempdir().unwrap();
        let repo = init_repo_with_commits(origin.path(), 2);
        let expected = repo.head().unwrap().peel_to_commit().unwrap().id().to_string();

        let cloner = GitCloner::new(None);
        let checkout = cloner
            .checkout(7, origin.path().to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(checkout.commit_hash, expected);
        assert!(!checkout.branch_name.is_empty());
        assert!(checkout.path().join("history.txt").exists());

        let workspace = checkout.workspace().to_path_buf();
        drop(checkout);
        assert!(!workspace.exists(), "workspace is removed on drop");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_clone_failure() {
        let cloner = GitCloner::new(Some(50));
        let err = cloner
            .checkout(1, "http://127.0.0.1:9/missing.git")
            .await
            .err()
            .unwrap();
        match err {
            PipelineError::CloneFailure { url, .. } => {
                assert_eq!(url, "http://127.0.0.1:9/missing.git")
            }
            other => panic!("expected CloneFailure, got {:?}", other),
        }
    }

    #[test]
    fn zero_depth_means_full_clone() {
        assert_eq!(GitCloner::new(Some(0)).depth, None);
        assert_eq!(GitCloner::new(Some(50)).depth, Some(50));
    }
}
