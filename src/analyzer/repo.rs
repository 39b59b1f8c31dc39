//! Read-only repository inspection used by the deterministic checks and by
//! AI context gathering. Everything here is blocking.

use std::path::{Path, PathBuf};

use git2::{Repository, Sort};
use walkdir::WalkDir;

use crate::errors::AnalyzerError;

/// Commits included in an AI `git_log` context.
pub const LOG_CONTEXT_COMMITS: usize = 25;

/// Upper bound on concatenated file context, in characters.
pub const MAX_FILE_CONTEXT_CHARS: usize = 30_000;

pub fn ensure_readable(path: &Path) -> Result<(), AnalyzerError> {
    let meta = std::fs::metadata(path).map_err(|e| AnalyzerError::RepositoryUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_dir() {
        return Err(AnalyzerError::RepositoryUnreadable {
            path: path.to_path_buf(),
            reason: "not a directory".into(),
        });
    }
    Ok(())
}

/// First candidate (relative to `root`) that exists.
pub fn first_existing<'a>(root: &Path, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .find(|c| root.join(c.as_str()).exists())
        .map(String::as_str)
}

/// Number of commits reachable from HEAD.
pub fn commit_count(root: &Path) -> Result<usize, git2::Error> {
    let repo = Repository::open(root)?;
    let mut walk = repo.revwalk()?;
    walk.push_head()?;
    let mut count = 0;
    for oid in walk {
        oid?;
        count += 1;
    }
    Ok(count)
}

/// True when the clone was fetched with a depth limit, so older history is missing.
pub fn is_shallow(root: &Path) -> Result<bool, git2::Error> {
    Ok(Repository::open(root)?.is_shallow())
}

/// `<short-id> <summary>` for the newest `limit` commits, one per line.
pub fn recent_log(root: &Path, limit: usize) -> Result<String, git2::Error> {
    let repo = Repository::open(root)?;
    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    walk.push_head()?;

    let mut lines = Vec::new();
    for oid in walk.take(limit) {
        let commit = repo.find_commit(oid?)?;
        let id = commit.as_object().short_id()?;
        lines.push(format!(
            "{} {}",
            id.as_str().unwrap_or_default(),
            commit.summary().unwrap_or_default()
        ));
    }
    Ok(lines.join("\n"))
}

/// First file named `filename` anywhere under `root`, in sorted walk order.
pub fn find_file(root: &Path, filename: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == filename)
        .map(|e| e.into_path())
}

/// Concatenated contents of the requested files.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContext {
    pub text: String,
    pub missing: Vec<String>,
    pub truncated: bool,
}

/// Gather the first match of each filename. `None` when nothing was found.
pub fn gather_files(root: &Path, filenames: &[String], limit: usize) -> Option<FileContext> {
    let mut text = String::new();
    let mut missing = Vec::new();

    for name in filenames {
        let Some(path) = find_file(root, name) else {
            missing.push(name.clone());
            continue;
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                missing.push(name.clone());
                continue;
            }
        };
        let relative = path.strip_prefix(root).unwrap_or(&path);
        text.push_str(&format!(
            "\n\n--- CONTENT FROM {} ---\n\n{}",
            relative.display(),
            String::from_utf8_lossy(&bytes)
        ));
    }

    if text.is_empty() {
        return None;
    }

    let truncated = text.chars().count() > limit;
    if truncated {
        text = text.chars().take(limit).collect();
        text.push_str("\n... (context truncated due to length)");
    }
    Some(FileContext {
        text,
        missing,
        truncated,
    })
}
