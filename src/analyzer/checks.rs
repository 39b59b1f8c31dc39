use std::path::{Path, PathBuf};

use super::repo::{self, LOG_CONTEXT_COMMITS, MAX_FILE_CONTEXT_CHARS};
use super::rubric::{CheckKind, CheckSpec, ContextSource};
use super::{CheckResult, CheckStatus};
use crate::errors::PipelineError;
use crate::gateway::AiGateway;
use crate::gateway::cache::AiCache;

/// Evaluate one check. Never fails: internal problems become an `error` result.
pub async fn run_check(
    spec: &CheckSpec,
    root: &Path,
    gateway: &AiGateway,
    cache: &mut AiCache,
) -> CheckResult {
    let kind = match spec.kind() {
        Ok(kind) => kind,
        Err(reason) => return CheckResult::new(&spec.name, CheckStatus::Error, reason),
    };

    let outcome = match kind {
        CheckKind::FileExists { candidates } => Ok(file_exists(root, &candidates)),
        CheckKind::GitCommitCount { min_commits } => git_commit_count(root, min_commits).await,
        CheckKind::AiCheck { prompt, context } => {
            ai_check(root, &prompt, &context, gateway, cache).await
        }
    };

    match outcome {
        Ok((status, detail)) => CheckResult::new(&spec.name, status, detail),
        Err(reason) => {
            let err = PipelineError::CheckExecutionFailure {
                check: spec.name.clone(),
                reason,
            };
            tracing::warn!(error = %err, "Check degraded to error");
            CheckResult::new(&spec.name, CheckStatus::Error, err.to_string())
        }
    }
}

fn file_exists(root: &Path, candidates: &[String]) -> (CheckStatus, String) {
    match repo::first_existing(root, candidates) {
        Some(found) => (CheckStatus::Pass, format!("'{}' found.", found)),
        None => (
            CheckStatus::Fail,
            format!("Could not find '{}'.", candidates.join("' or '")),
        ),
    }
}

async fn git_commit_count(root: &Path, min_commits: u64) -> Result<(CheckStatus, String), String> {
    let count = blocking(root, repo::commit_count)
        .await?
        .map_err(|e| format!("Could not read git history: {}", e))? as u64;

    if count >= min_commits {
        Ok((
            CheckStatus::Pass,
            format!("Found {} commits (minimum was {}).", count, min_commits),
        ))
    } else {
        let mut detail = format!("Found only {} commits (minimum is {}).", count, min_commits);
        if blocking(root, repo::is_shallow).await?.unwrap_or(false) {
            detail.push_str(" History is shallow; older commits were not fetched.");
        }
        Ok((CheckStatus::Fail, detail))
    }
}

async fn ai_check(
    root: &Path,
    template: &str,
    source: &ContextSource,
    gateway: &AiGateway,
    cache: &mut AiCache,
) -> Result<(CheckStatus, String), String> {
    let (context, file_path) = match source {
        ContextSource::GitLog => {
            let log = blocking(root, |p| repo::recent_log(p, LOG_CONTEXT_COMMITS)).await?;
            match log {
                Ok(log) if !log.trim().is_empty() => (log, String::new()),
                Ok(_) => {
                    return Ok((
                        CheckStatus::Fail,
                        "Git log is empty or this is not a git repository.".into(),
                    ));
                }
                Err(e) => {
                    return Ok((
                        CheckStatus::Fail,
                        format!("Could not retrieve git history: {}", e),
                    ));
                }
            }
        }
        ContextSource::Files(names) => {
            let names = names.clone();
            let gathered =
                blocking(root, move |p| repo::gather_files(p, &names, MAX_FILE_CONTEXT_CHARS))
                    .await?;
            match gathered {
                Some(ctx) => {
                    if !ctx.missing.is_empty() {
                        tracing::debug!(missing = ?ctx.missing, "Some files to analyze were not found");
                    }
                    (ctx.text, "multiple files".to_string())
                }
                None => {
                    return Ok((
                        CheckStatus::Fail,
                        "None of the target files for analysis were found.".into(),
                    ));
                }
            }
        }
    };

    let prompt = render_prompt(template, &context, &file_path);
    let reply = gateway
        .call(&prompt, cache)
        .await
        .map_err(|e| e.to_string())?;

    let (status, rationale) = parse_verdict(&reply.text)
        .ok_or_else(|| format!("Unparseable AI verdict: {}", preview(&reply.text)))?;
    cache.record_decision(&reply.fingerprint, status.as_str());

    let detail = if rationale.is_empty() {
        reply.text.clone()
    } else {
        rationale
    };
    Ok((status, detail))
}

/// Substitute `{context}` and `{file_path}` into a rubric prompt.
pub fn render_prompt(template: &str, context: &str, file_path: &str) -> String {
    template
        .replace("{file_path}", file_path)
        .replace("{context}", context)
}

/// Parse a leading `PASS`/`PARTIAL`/`FAIL` verdict, optionally prefixed by
/// `VERDICT:`. Returns the verdict and the remaining rationale.
pub fn parse_verdict(text: &str) -> Option<(CheckStatus, String)> {
    let mut rest = text.trim_start().trim_start_matches(['*', '#', ' ']);
    if let Some(prefix) = rest.get(..8)
        && prefix.eq_ignore_ascii_case("verdict:")
    {
        rest = rest[8..].trim_start().trim_start_matches(['*', ' ']);
    }

    let token_end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    let status = match rest[..token_end].to_ascii_uppercase().as_str() {
        "PASS" | "PASSED" => CheckStatus::Pass,
        "PARTIAL" | "PARTIALLY" => CheckStatus::Partial,
        "FAIL" | "FAILED" => CheckStatus::Fail,
        _ => return None,
    };

    let rationale = rest[token_end..]
        .trim_start_matches(|c: char| c == '*' || c == ':' || c == '-' || c == '.' || c.is_whitespace())
        .trim_end()
        .to_string();
    Some((status, rationale))
}

async fn blocking<F, R>(root: &Path, f: F) -> Result<R, String>
where
    F: FnOnce(&Path) -> R + Send + 'static,
    R: Send + 'static,
{
    let root: PathBuf = root.to_path_buf();
    tokio::task::spawn_blocking(move || f(&root))
        .await
        .map_err(|e| format!("Check task panicked: {}", e))
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(120).collect();
    if head.len() < text.len() {
        format!("{}...", head)
    } else {
        head
    }
}
