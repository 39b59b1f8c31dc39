//! Runtime configuration for repograde.
//!
//! Settings are layered: built-in defaults, then `repograde.toml` (if
//! present), then environment variables. A `.env` file is loaded into the
//! environment by `main` before any of this runs.
//!
//! ```toml
//! [server]
//! port = 5000
//! db_path = "data/repograde.db"
//!
//! [worker]
//! count = 2
//! queue_capacity = 64
//! clone_depth = 0   # full history; a limit caps git_commit_count
//!
//! [ai]
//! model = "gemini-2.5-pro"
//! max_calls_per_minute = 15
//! request_timeout_secs = 120
//!
//! [analyzer]
//! rubric = "rubrics/analyzer.yaml"
//!
//! [scorer]
//! rubric = "rubrics/scorer.yaml"
//! overrides = "overrides.json"
//! min_interval_secs = 4.0
//! retries = 4
//! base_delay_secs = 2.0
//! max_analyzer_chars = 35000
//! max_failed_fraction = 0.5
//! default_score = 0.5
//! summary_enabled = true
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analyzer::Analyzer;
use crate::analyzer::rubric::{AnalyzerRubric, CheckKind};
use crate::gateway::AiGateway;
use crate::gateway::gemini::{GeminiProvider, KeyRing};
use crate::gateway::provider::{AiProvider, UnconfiguredProvider};
use crate::gateway::rate_limit::RateLimiter;
use crate::gateway::retry::RetryPolicy;
use crate::scorer::rubric::{ScoringRubric, load_overrides};
use crate::scorer::score::Score;
use crate::scorer::{Scorer, ScorerSettings};

pub const DEFAULT_CONFIG_FILE: &str = "repograde.toml";

// ── Sections ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 5000,
            db_path: PathBuf::from("data/repograde.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub count: usize,
    pub queue_capacity: usize,
    /// Shallow clone depth. 0 clones the full history.
    pub clone_depth: u32,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            count: 2,
            queue_capacity: 64,
            clone_depth: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSection {
    pub model: String,
    pub max_calls_per_minute: u32,
    pub request_timeout_secs: u64,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-pro".to_string(),
            max_calls_per_minute: 15,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSection {
    /// Custom rubric YAML. The built-in rubric is used when unset.
    pub rubric: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerSection {
    pub rubric: Option<PathBuf>,
    pub overrides: Option<PathBuf>,
    /// Minimum spacing between scorer AI calls, on top of the shared limiter.
    pub min_interval_secs: f64,
    pub retries: u32,
    pub base_delay_secs: f64,
    pub max_analyzer_chars: usize,
    pub max_failed_fraction: f64,
    pub default_score: f64,
    pub summary_enabled: bool,
}

impl Default for ScorerSection {
    fn default() -> Self {
        Self {
            rubric: None,
            overrides: None,
            min_interval_secs: 4.0,
            retries: 4,
            base_delay_secs: 2.0,
            max_analyzer_chars: 35_000,
            max_failed_fraction: 0.5,
            default_score: 0.5,
            summary_enabled: true,
        }
    }
}

/// The full `repograde.toml` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    pub server: ServerSection,
    pub worker: WorkerSection,
    pub ai: AiSection,
    pub analyzer: AnalyzerSection,
    pub scorer: ScorerSection,
}

// ── Loading ───────────────────────────────────────────────────────────

impl GraderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse repograde.toml")
    }

    /// Load `path` if given (it must exist), else `repograde.toml` in the
    /// working directory if present, else defaults. Environment overrides
    /// are applied last.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(Path::new("."))?,
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load `repograde.toml` from `dir`. Returns defaults if it doesn't exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides read through `lookup`. Blank values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        override_parsed(&get, "API_PORT", &mut self.server.port)?;
        if let Some(v) = get("DATABASE_PATH") {
            self.server.db_path = PathBuf::from(v);
        }

        override_parsed(&get, "WORKER_COUNT", &mut self.worker.count)?;
        override_parsed(&get, "QUEUE_CAPACITY", &mut self.worker.queue_capacity)?;
        override_parsed(&get, "CLONE_DEPTH", &mut self.worker.clone_depth)?;

        if let Some(v) = get("GEMINI_MODEL") {
            self.ai.model = v;
        }
        override_parsed(&get, "AI_MAX_CALLS_PER_MINUTE", &mut self.ai.max_calls_per_minute)?;

        if let Some(v) = get("ANALYZER_RUBRIC") {
            self.analyzer.rubric = Some(PathBuf::from(v));
        }

        if let Some(v) = get("SCORER_RUBRIC") {
            self.scorer.rubric = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SCORER_OVERRIDES") {
            self.scorer.overrides = Some(PathBuf::from(v));
        }
        override_parsed(&get, "SCORER_MIN_INTERVAL", &mut self.scorer.min_interval_secs)?;
        override_parsed(&get, "SCORER_RETRIES", &mut self.scorer.retries)?;
        override_parsed(&get, "SCORER_BASE_DELAY", &mut self.scorer.base_delay_secs)?;
        override_parsed(&get, "SCORER_MAX_ANALYZER_CHARS", &mut self.scorer.max_analyzer_chars)?;
        override_parsed(&get, "SCORER_MAX_FAILED_FRACTION", &mut self.scorer.max_failed_fraction)?;
        override_parsed(&get, "SCORER_DEFAULT_SCORE", &mut self.scorer.default_score)?;
        if let Some(v) = get("SUMMARY_ENABLED") {
            self.scorer.summary_enabled = parse_flag(&v);
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.ai.max_calls_per_minute == 0 {
            warnings.push("ai.max_calls_per_minute is 0; treating it as 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.scorer.max_failed_fraction) {
            warnings.push(format!(
                "scorer.max_failed_fraction {} is outside [0, 1]",
                self.scorer.max_failed_fraction
            ));
        }
        if Score::exact(self.scorer.default_score).is_none() {
            warnings.push(format!(
                "scorer.default_score {} is not a multiple of 0.1; rounding",
                self.scorer.default_score
            ));
        }
        if self.scorer.min_interval_secs < 0.0 || self.scorer.base_delay_secs < 0.0 {
            warnings.push("negative scorer delays are treated as 0".to_string());
        }
        warnings
    }

    /// Warnings for commit-count checks a depth-limited clone can never pass.
    pub fn history_warnings(&self, rubric: &AnalyzerRubric) -> Vec<String> {
        let depth = u64::from(self.worker.clone_depth);
        if depth == 0 {
            return Vec::new();
        }
        rubric
            .checks
            .iter()
            .filter_map(|check| match check.kind() {
                Ok(CheckKind::GitCommitCount { min_commits }) if min_commits > depth => {
                    Some(format!(
                        "worker.clone_depth {} is below min_commits {} of check '{}'; it will always fail",
                        depth, min_commits, check.name
                    ))
                }
                _ => None,
            })
            .collect()
    }

    pub fn scorer_settings(&self) -> ScorerSettings {
        ScorerSettings {
            max_analyzer_chars: self.scorer.max_analyzer_chars,
            max_failed_fraction: self.scorer.max_failed_fraction,
            default_score: Score::nearest(self.scorer.default_score),
            summary_enabled: self.scorer.summary_enabled,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.scorer.retries, secs(self.scorer.base_delay_secs))
    }

    // ── Component wiring ──────────────────────────────────────────────

    /// The one limiter shared by every gateway in the process.
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::per_minute(self.ai.max_calls_per_minute.max(1)))
    }

    /// Gemini when keys are available, otherwise a provider that rejects
    /// every call so non-AI checks still work.
    pub fn provider(&self) -> Result<Arc<dyn AiProvider>> {
        match KeyRing::from_env() {
            Ok(keys) => {
                tracing::info!(model = %self.ai.model, keys = keys.len(), "Using Gemini provider");
                let provider = GeminiProvider::new(
                    self.ai.model.clone(),
                    keys,
                    Duration::from_secs(self.ai.request_timeout_secs),
                )?;
                Ok(Arc::new(provider))
            }
            Err(e) => {
                tracing::warn!(error = %e, "AI checks and criteria will fail");
                Ok(Arc::new(UnconfiguredProvider::new(
                    self.ai.model.clone(),
                    e.to_string(),
                )))
            }
        }
    }

    pub fn analyzer(
        &self,
        provider: Arc<dyn AiProvider>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Analyzer> {
        let rubric = AnalyzerRubric::load(self.analyzer.rubric.as_deref())?;
        let gateway = AiGateway::new(provider, limiter, self.retry_policy());
        Ok(Analyzer::new(rubric, Arc::new(gateway)))
    }

    pub fn scorer(&self, provider: Arc<dyn AiProvider>, limiter: Arc<RateLimiter>) -> Result<Scorer> {
        let rubric = ScoringRubric::load(self.scorer.rubric.as_deref())?;
        let overrides = load_overrides(self.scorer.overrides.as_deref())?;
        let gateway = AiGateway::new(provider, limiter, self.retry_policy())
            .with_min_interval(secs(self.scorer.min_interval_secs));
        Ok(Scorer::new(
            rubric,
            overrides,
            self.scorer_settings(),
            Arc::new(gateway),
        ))
    }
}

fn override_parsed<T, G>(get: &G, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", raw, key, e))?;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GraderConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.worker.count, 2);
        assert_eq!(config.ai.max_calls_per_minute, 15);
        assert_eq!(config.scorer.retries, 4);
        assert!(config.scorer.summary_enabled);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = GraderConfig::parse(
            r#"
[worker]
count = 4

[scorer]
summary_enabled = false
"#,
        )
        .unwrap();
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.worker.queue_capacity, 64);
        assert!(!config.scorer.summary_enabled);
        assert_eq!(config.scorer.max_failed_fraction, 0.5);
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(GraderConfig::parse("[worker\ncount = ").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = GraderConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, GraderConfig::default());
    }

    #[test]
    fn test_load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "[ai]\nmodel = \"gemini-test\"\n",
        )
        .unwrap();
        let config = GraderConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.ai.model, "gemini-test");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = GraderConfig::parse("[worker]\ncount = 4\n").unwrap();
        config
            .apply_env_from(env(&[
                ("WORKER_COUNT", "8"),
                ("AI_MAX_CALLS_PER_MINUTE", "30"),
                ("SCORER_MIN_INTERVAL", "1.5"),
                ("SUMMARY_ENABLED", "false"),
                ("SCORER_RUBRIC", "custom.yaml"),
                ("DATABASE_PATH", "/tmp/runs.db"),
                ("CLONE_DEPTH", ""),
            ]))
            .unwrap();
        assert_eq!(config.worker.count, 8);
        assert_eq!(config.ai.max_calls_per_minute, 30);
        assert_eq!(config.scorer.min_interval_secs, 1.5);
        assert!(!config.scorer.summary_enabled);
        assert_eq!(config.scorer.rubric, Some(PathBuf::from("custom.yaml")));
        assert_eq!(config.server.db_path, PathBuf::from("/tmp/runs.db"));
        assert_eq!(config.worker.clone_depth, 0, "blank values are ignored");
    }

    #[test]
    fn test_env_invalid_number_is_error() {
        let mut config = GraderConfig::default();
        let err = config
            .apply_env_from(env(&[("SCORER_RETRIES", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("SCORER_RETRIES"));
    }

    #[test]
    fn test_flag_parsing() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
        assert!(!parse_flag("false"));
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = GraderConfig::default();
        config.scorer.default_score = 0.55;
        config.scorer.max_failed_fraction = 1.5;
        config.ai.max_calls_per_minute = 0;
        assert_eq!(config.validate().len(), 3);
    }

    #[test]
    fn test_history_warnings_for_shallow_clone_depth() {
        let rubric = AnalyzerRubric::from_yaml(
            r#"
checks:
  - name: History
    type: git_commit_count
    min_commits: 10
  - name: Recent activity
    type: git_commit_count
    min_commits: 3
"#,
        )
        .unwrap();

        let mut config = GraderConfig::default();
        assert!(config.history_warnings(&rubric).is_empty(), "full clones never warn");

        config.worker.clone_depth = 5;
        let warnings = config.history_warnings(&rubric);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("min_commits 10"));
        assert!(warnings[0].contains("'History'"));

        config.worker.clone_depth = 10;
        assert!(config.history_warnings(&rubric).is_empty());
    }

    #[test]
    fn test_scorer_settings_round_default_score() {
        let mut config = GraderConfig::default();
        config.scorer.default_score = 0.74;
        assert_eq!(config.scorer_settings().default_score, Score::nearest(0.7));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let mut config = GraderConfig::default();
        config.scorer.retries = 0;
        config.scorer.base_delay_secs = 0.5;
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }
}
