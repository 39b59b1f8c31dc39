//! Analyzer engine: evaluates an ordered rubric of checks against a cloned
//! repository.
//!
//! Three kinds of check are supported:
//! - `file_exists`: one of the listed paths exists (deterministic)
//! - `git_commit_count`: HEAD has at least `min_commits` ancestors (deterministic)
//! - `ai_check`: repository context is rendered into a prompt and sent through
//!   the [`AiGateway`]; the answer's leading verdict decides the status
//!
//! A failing check never aborts the run. Only an unreadable repository path does.

pub mod checks;
pub mod report;
pub mod repo;
pub mod rubric;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::AnalyzerError;
use crate::gateway::{AiGateway, GatewayStats};
use crate::gateway::cache::AiCache;
use rubric::AnalyzerRubric;

pub const ANALYZER_TOOL_VERSION: &str = concat!("repograde-analyzer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Partial,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }

    /// Contribution of this status to a computed criterion score.
    pub fn credit(&self) -> f64 {
        match self {
            Self::Pass => 1.0,
            Self::Partial => 0.5,
            Self::Fail | Self::Error => 0.0,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "partial" => Ok(Self::Partial),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid check status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub check_name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    pub fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            check_name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

/// Structured analyzer result. Source of truth for the markdown report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzerResult {
    pub checks: Vec<CheckResult>,
    pub generated_at: String,
    pub tool_version: String,
}

impl AnalyzerResult {
    pub fn passed(&self) -> usize {
        self.count(CheckStatus::Pass)
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn get(&self, check_name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check_name == check_name)
    }

    /// One `check_name::status` line per check, in rubric order.
    pub fn compact(&self) -> String {
        self.checks
            .iter()
            .map(|c| format!("{}::{}", c.check_name, c.status))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the analyzer phase persists on the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzerOutput {
    pub markdown: String,
    pub result: AnalyzerResult,
}

impl AnalyzerOutput {
    pub fn from_result(result: AnalyzerResult) -> Self {
        Self {
            markdown: report::render_markdown(&result),
            result,
        }
    }
}

pub struct Analyzer {
    rubric: AnalyzerRubric,
    gateway: Arc<AiGateway>,
}

impl Analyzer {
    pub fn new(rubric: AnalyzerRubric, gateway: Arc<AiGateway>) -> Self {
        Self { rubric, gateway }
    }

    pub fn rubric(&self) -> &AnalyzerRubric {
        &self.rubric
    }

    pub fn ai_stats(&self) -> GatewayStats {
        self.gateway.stats()
    }

    /// Run every check in rubric order against the repository at `root`.
    ///
    /// AI answers are read from and appended to `cache`.
    pub async fn analyze(
        &self,
        root: &Path,
        cache: &mut AiCache,
    ) -> Result<AnalyzerOutput, AnalyzerError> {
        repo::ensure_readable(root)?;

        let mut results = Vec::with_capacity(self.rubric.checks.len());
        for spec in &self.rubric.checks {
            tracing::info!(check = %spec.name, kind = %spec.check_type, "Running check");
            let result = checks::run_check(spec, root, &self.gateway, cache).await;
            tracing::debug!(check = %result.check_name, status = %result.status, "Check finished");
            results.push(result);
        }

        let result = AnalyzerResult {
            checks: results,
            generated_at: chrono::Utc::now().to_rfc3339(),
            tool_version: ANALYZER_TOOL_VERSION.to_string(),
        };
        tracing::info!(
            passed = result.passed(),
            total = result.checks.len(),
            "Analysis complete"
        );
        Ok(AnalyzerOutput::from_result(result))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::repo::test_support::init_repo_with_commits;
    use super::*;
    use crate::gateway::mock::ScriptedProvider;
    use crate::gateway::rate_limit::RateLimiter;
    use crate::gateway::retry::RetryPolicy;

    fn gateway(provider: Arc<ScriptedProvider>) -> Arc<AiGateway> {
        Arc::new(AiGateway::new(
            provider,
            Arc::new(RateLimiter::per_minute(60)),
            RetryPolicy::new(2, Duration::from_millis(10)),
        ))
    }

    const THREE_CHECKS: &str = r#"
checks:
  - name: Readme
    type: file_exists
    path: README.md
  - name: History
    type: git_commit_count
    min_commits: 5
  - name: Docs quality
    type: ai_check
    files_to_analyze: [README.md]
    prompt: "Review {file_path}: {context}"
"#;

    #[tokio::test]
    async fn three_check_rubric_reports_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Demo\nInstall with make.").unwrap();
        init_repo_with_commits(dir.path(), 2);

        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok("PASS clear install steps");
        let analyzer = Analyzer::new(
            AnalyzerRubric::from_yaml(THREE_CHECKS).unwrap(),
            gateway(Arc::clone(&provider)),
        );

        let mut cache = AiCache::new();
        let output = analyzer.analyze(dir.path(), &mut cache).await.unwrap();

        let statuses: Vec<(&str, CheckStatus)> = output
            .result
            .checks
            .iter()
            .map(|c| (c.check_name.as_str(), c.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("Readme", CheckStatus::Pass),
                ("History", CheckStatus::Fail),
                ("Docs quality", CheckStatus::Pass),
            ]
        );
        assert!(output.markdown.contains("[PASS] Readme"));
        assert!(output.markdown.contains("[FAIL] History"));
        assert!(output.markdown.contains("[PASS] Docs quality"));
        assert_eq!(output.markdown, report::render_markdown(&output.result));

        assert_eq!(provider.calls(), 1);
        assert!(provider.prompts()[0].starts_with("Review multiple files:"));
        assert_eq!(cache.len(), 1);
        let fingerprint = crate::gateway::fingerprint("scripted-model", &provider.prompts()[0]);
        assert_eq!(
            cache.get(&fingerprint).unwrap().decision.as_deref(),
            Some("pass")
        );
    }

    #[tokio::test]
    async fn rerun_with_cache_makes_no_ai_calls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();
        init_repo_with_commits(dir.path(), 6);

        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok("PARTIAL thin");
        let analyzer = Analyzer::new(
            AnalyzerRubric::from_yaml(THREE_CHECKS).unwrap(),
            gateway(Arc::clone(&provider)),
        );

        let mut cache = AiCache::new();
        let first = analyzer.analyze(dir.path(), &mut cache).await.unwrap();
        let second = analyzer.analyze(dir.path(), &mut cache).await.unwrap();

        assert_eq!(provider.calls(), 1);
        let stats = analyzer.ai_stats();
        assert_eq!(stats.outbound_calls, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(first.result.checks, second.result.checks);
        assert_eq!(first.result.compact(), "Readme::pass\nHistory::pass\nDocs quality::partial");
    }

    #[tokio::test]
    async fn failing_checks_degrade_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();

        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok("I think it's fine");
        let analyzer = Analyzer::new(
            AnalyzerRubric::from_yaml(
                r#"
checks:
  - name: History
    type: git_commit_count
    min_commits: 1
  - name: Docs quality
    type: ai_check
    files_to_analyze: [README.md]
    prompt: "{context}"
  - name: Bogus
    type: coverage
  - name: Log review
    type: ai_check
    context_source: git_log
    prompt: "{context}"
"#,
            )
            .unwrap(),
            gateway(Arc::clone(&provider)),
        );

        let output = analyzer
            .analyze(dir.path(), &mut AiCache::new())
            .await
            .unwrap();
        let statuses: Vec<CheckStatus> = output.result.checks.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                CheckStatus::Error,
                CheckStatus::Error,
                CheckStatus::Error,
                CheckStatus::Fail,
            ]
        );
        assert!(output.result.checks[1].detail.contains("Unparseable"));
        assert!(output.result.checks[2].detail.contains("coverage"));
    }

    #[tokio::test]
    async fn missing_repository_is_fatal() {
        let provider = Arc::new(ScriptedProvider::new());
        let analyzer = Analyzer::new(
            AnalyzerRubric::from_yaml(THREE_CHECKS).unwrap(),
            gateway(provider),
        );
        let err = analyzer
            .analyze(Path::new("/nonexistent/repo/path"), &mut AiCache::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::RepositoryUnreadable { .. }));
    }

    #[test]
    fn check_status_round_trips_through_strings() {
        for status in [
            CheckStatus::Pass,
            CheckStatus::Fail,
            CheckStatus::Partial,
            CheckStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<CheckStatus>().unwrap(), status);
        }
    }
}
