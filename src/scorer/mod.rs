//! Scorer engine: turns an analyzer result into per-criterion discrete scores
//! and a weighted overall score.
//!
//! Criterion resolution order: override → AI prompt → computed from mapped
//! analyzer checks. An AI criterion that cannot be scored falls back to the
//! configured default score, unless too many criteria failed in which case
//! the whole pass fails.

pub mod report;
pub mod rubric;
pub mod score;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analyzer::AnalyzerResult;
use crate::errors::ScorerError;
use crate::gateway::{AiGateway, GatewayStats};
use crate::gateway::cache::AiCache;
use rubric::{Criterion, Overrides, ScoringRubric};
use score::Score;

pub const SCORER_TOOL_VERSION: &str = concat!("repograde-scorer/", env!("CARGO_PKG_VERSION"));

/// Longest justification kept per criterion, in characters.
pub const MAX_JUSTIFICATION_CHARS: usize = 350;

static SCORE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)SCORE:\s*\**\s*([0-9]+(?:\.[0-9]+)?)").expect("valid regex"));
static JUSTIFICATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)JUSTIFICATION:\s*\**\s*(.+)").expect("valid regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    Override,
    Ai,
    Computed,
    Default,
}

impl ScoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Ai => "ai",
            Self::Computed => "computed",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for ScoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub id: String,
    pub name: String,
    pub score: Score,
    pub weight: f64,
    pub justification: String,
    pub source: ScoreSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorerResult {
    pub criteria: Vec<CriterionScore>,
    /// Normalized weighted mean of the criterion scores, before discretization.
    pub weighted_average: f64,
    pub overall_score: Score,
    pub overall_comment: Option<String>,
    pub failed_criteria: usize,
    pub generated_at: String,
    pub tool_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorerOutput {
    pub markdown: String,
    pub result: ScorerResult,
}

impl ScorerOutput {
    pub fn from_result(result: ScorerResult) -> Self {
        Self {
            markdown: report::render_markdown(&result),
            result,
        }
    }

    pub fn overall_score(&self) -> f64 {
        self.result.overall_score.value()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScorerSettings {
    pub max_analyzer_chars: usize,
    pub max_failed_fraction: f64,
    pub default_score: Score,
    pub summary_enabled: bool,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            max_analyzer_chars: 35_000,
            max_failed_fraction: 0.5,
            default_score: Score::nearest(0.5),
            summary_enabled: true,
        }
    }
}

pub struct Scorer {
    rubric: ScoringRubric,
    overrides: Overrides,
    settings: ScorerSettings,
    gateway: Arc<AiGateway>,
}

impl Scorer {
    pub fn new(
        rubric: ScoringRubric,
        overrides: Overrides,
        settings: ScorerSettings,
        gateway: Arc<AiGateway>,
    ) -> Self {
        for id in overrides.keys() {
            if !rubric.criteria.iter().any(|c| &c.id == id) {
                tracing::warn!(criterion = %id, "Override for unknown criterion ignored");
            }
        }
        Self {
            rubric,
            overrides,
            settings,
            gateway,
        }
    }

    pub fn ai_stats(&self) -> GatewayStats {
        self.gateway.stats()
    }

    /// Score `analyzer`, reading and appending AI answers in `cache`.
    pub async fn score(
        &self,
        analyzer: &AnalyzerResult,
        cache: &mut AiCache,
    ) -> Result<ScorerOutput, ScorerError> {
        let compact = analyzer.compact();
        if compact.trim().is_empty() {
            return Err(ScorerError::EmptyInput);
        }
        let input = truncate_input(&compact, self.settings.max_analyzer_chars);

        let mut criteria = Vec::with_capacity(self.rubric.criteria.len());
        let mut failed = 0;
        for criterion in &self.rubric.criteria {
            let scored = match self.score_criterion(criterion, analyzer, &input, cache).await {
                Ok(scored) => scored,
                Err(reason) => {
                    failed += 1;
                    tracing::warn!(criterion = %criterion.id, reason = %reason, "Criterion fell back to default score");
                    CriterionScore {
                        id: criterion.id.clone(),
                        name: criterion.display_name().to_string(),
                        score: self.settings.default_score,
                        weight: criterion.weight,
                        justification: truncate_justification(&format!(
                            "Scoring failed, default applied: {}",
                            reason
                        )),
                        source: ScoreSource::Default,
                        raw: None,
                    }
                }
            };
            tracing::info!(criterion = %scored.id, score = %scored.score, source = %scored.source, "Criterion scored");
            criteria.push(scored);
        }

        let total = criteria.len();
        if failed > 0 && failed as f64 / total as f64 > self.settings.max_failed_fraction {
            return Err(ScorerError::TooManyFailures {
                failed,
                total,
                max_fraction: self.settings.max_failed_fraction,
            });
        }

        let weighted_average = weighted_average(&criteria, &self.rubric.normalized_weights());
        let overall_score = Score::nearest(weighted_average);

        let overall_comment = if self.settings.summary_enabled {
            self.summarize(&criteria, weighted_average, cache).await
        } else {
            None
        };

        tracing::info!(overall = %overall_score, weighted_average, failed, "Scoring complete");
        Ok(ScorerOutput::from_result(ScorerResult {
            criteria,
            weighted_average,
            overall_score,
            overall_comment,
            failed_criteria: failed,
            generated_at: chrono::Utc::now().to_rfc3339(),
            tool_version: SCORER_TOOL_VERSION.to_string(),
        }))
    }

    async fn score_criterion(
        &self,
        criterion: &Criterion,
        analyzer: &AnalyzerResult,
        input: &str,
        cache: &mut AiCache,
    ) -> Result<CriterionScore, String> {
        let name = criterion.display_name().to_string();

        if let Some(&value) = self.overrides.get(&criterion.id) {
            let score = Score::nearest(value);
            if Score::exact(value).is_none() {
                tracing::warn!(criterion = %criterion.id, value, rounded = %score, "Off-step override rounded");
            }
            return Ok(CriterionScore {
                id: criterion.id.clone(),
                name,
                score,
                weight: criterion.weight,
                justification: "(override applied)".into(),
                source: ScoreSource::Override,
                raw: None,
            });
        }

        if let Some(instructions) = &criterion.prompt {
            let prompt = criterion_prompt(&name, instructions, input);
            let reply = self
                .gateway
                .call(&prompt, cache)
                .await
                .map_err(|e| e.to_string())?;
            let (score, justification) = parse_score_response(&reply.text)?;
            cache.record_decision(&reply.fingerprint, score.to_string());
            return Ok(CriterionScore {
                id: criterion.id.clone(),
                name,
                score,
                weight: criterion.weight,
                justification,
                source: ScoreSource::Ai,
                raw: Some(reply.text),
            });
        }

        let (score, justification) = computed_score(&criterion.checks, analyzer);
        Ok(CriterionScore {
            id: criterion.id.clone(),
            name,
            score,
            weight: criterion.weight,
            justification,
            source: ScoreSource::Computed,
            raw: None,
        })
    }

    async fn summarize(
        &self,
        criteria: &[CriterionScore],
        weighted_average: f64,
        cache: &mut AiCache,
    ) -> Option<String> {
        let prompt = summary_prompt(criteria, weighted_average);
        match self.gateway.call(&prompt, cache).await {
            Ok(reply) => Some(reply.text.trim().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "Summary generation failed");
                None
            }
        }
    }
}

/// Mean credit of the mapped checks. Unknown checks count as failed.
fn computed_score(checks: &[String], analyzer: &AnalyzerResult) -> (Score, String) {
    let mut credit = 0.0;
    let mut parts = Vec::with_capacity(checks.len());
    for name in checks {
        match analyzer.get(name) {
            Some(result) => {
                credit += result.status.credit();
                parts.push(format!("{}={}", name, result.status));
            }
            None => parts.push(format!("{}=missing", name)),
        }
    }
    let mean = if checks.is_empty() {
        0.0
    } else {
        credit / checks.len() as f64
    };
    (
        Score::nearest(mean),
        truncate_justification(&format!("Computed from checks: {}", parts.join(", "))),
    )
}

fn weighted_average(criteria: &[CriterionScore], weights: &[f64]) -> f64 {
    criteria
        .iter()
        .zip(weights)
        .map(|(c, w)| c.score.value() * w)
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

fn truncate_input(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    tracing::debug!(max_chars, "Truncating analyzer output for scoring");
    let mut truncated: String = input.chars().take(max_chars).collect();
    truncated.push_str("\n... (truncated)");
    truncated
}

fn truncate_justification(text: &str) -> String {
    if text.chars().count() <= MAX_JUSTIFICATION_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_JUSTIFICATION_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Parse `SCORE: <x>` and `JUSTIFICATION: <text>` from an AI response.
pub fn parse_score_response(raw: &str) -> Result<(Score, String), String> {
    let caps = SCORE_PATTERN.captures(raw).ok_or_else(|| {
        let head: String = raw.chars().take(120).collect();
        format!("Could not parse SCORE from: {}", head)
    })?;
    let value: f64 = caps[1]
        .parse()
        .map_err(|e| format!("Invalid score '{}': {}", &caps[1], e))?;
    let justification = JUSTIFICATION_PATTERN
        .captures(raw)
        .map(|c| c[1].trim().to_string())
        .filter(|j| !j.is_empty())
        .unwrap_or_else(|| "(no justification)".to_string());
    Ok((Score::nearest(value), truncate_justification(&justification)))
}

fn criterion_prompt(name: &str, instructions: &str, analyzer_output: &str) -> String {
    format!(
        "You are a reviewer assigning a numeric score. Follow instructions precisely.\n\
         Criterion Name: {name}\n\
         Instructions:\n{instructions}\n\n\
         Analyzer Output (possibly truncated):\n\
         ----------------\n{analyzer_output}\n----------------\n\
         Rules:\n\
         - Choose ONLY one allowed score: 0.0 0.1 0.2 0.3 0.4 0.5 0.6 0.7 0.8 0.9 1.0\n\
         - Output EXACTLY two lines:\n\
         SCORE: <value>\n\
         JUSTIFICATION: <concise>\n\
         If evidence is weak, choose a conservative score.\n"
    )
}

fn summary_prompt(criteria: &[CriterionScore], weighted_average: f64) -> String {
    let score_lines = criteria
        .iter()
        .map(|c| format!("- {}: {} => {}", c.id, c.name, c.score))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are an experienced software project reviewer. Produce ONE cohesive overall review comment.\n\
         Per-criterion scores (0.0-1.0):\n{score_lines}\n\
         Overall weighted score: {weighted_average:.2}\n\
         Instructions:\n\
         - Start with a single concise summary sentence capturing overall health.\n\
         - Then provide a short bullet list: Strengths, Risks, Next Steps (each 1-3 bullets).\n\
         - Prioritize actionable technical improvements over cosmetic ones.\n\
         - Word limit: 160 words total.\n\
         Return only the comment.\n"
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::analyzer::{CheckResult, CheckStatus};
    use crate::gateway::mock::ScriptedProvider;
    use crate::gateway::provider::ProviderError;
    use crate::gateway::rate_limit::RateLimiter;
    use crate::gateway::retry::RetryPolicy;

    fn analyzer_result() -> AnalyzerResult {
        AnalyzerResult {
            checks: vec![
                CheckResult::new("Readme", CheckStatus::Pass, ""),
                CheckResult::new("License", CheckStatus::Fail, ""),
                CheckResult::new("Docs", CheckStatus::Partial, ""),
            ],
            generated_at: "2026-01-01T00:00:00+00:00".into(),
            tool_version: "test".into(),
        }
    }

    fn gateway(provider: Arc<ScriptedProvider>) -> Arc<AiGateway> {
        Arc::new(AiGateway::new(
            provider,
            Arc::new(RateLimiter::per_minute(600)),
            RetryPolicy::new(1, Duration::from_millis(1)),
        ))
    }

    fn no_summary() -> ScorerSettings {
        ScorerSettings {
            summary_enabled: false,
            ..Default::default()
        }
    }

    fn rubric(yaml: &str) -> ScoringRubric {
        ScoringRubric::from_yaml(yaml).unwrap()
    }

    #[test]
    fn parses_score_and_justification() {
        let (score, just) = parse_score_response("SCORE: 0.7\nJUSTIFICATION: solid docs").unwrap();
        assert_eq!(score.tenths(), 7);
        assert_eq!(just, "solid docs");

        let (score, just) = parse_score_response("score: 0.74").unwrap();
        assert_eq!(score.tenths(), 7);
        assert_eq!(just, "(no justification)");

        let (score, _) = parse_score_response("SCORE: 3").unwrap();
        assert_eq!(score, Score::MAX);

        assert!(parse_score_response("looks great").is_err());
    }

    #[test]
    fn long_justifications_are_truncated() {
        let raw = format!("SCORE: 0.5\nJUSTIFICATION: {}", "x".repeat(1000));
        let (_, just) = parse_score_response(&raw).unwrap();
        assert_eq!(just.chars().count(), MAX_JUSTIFICATION_CHARS);
        assert!(just.ends_with("..."));
    }

    #[test]
    fn computed_score_averages_check_credit() {
        let checks = vec!["Readme".to_string(), "License".to_string(), "Docs".to_string()];
        let (score, just) = computed_score(&checks, &analyzer_result());
        // (1 + 0 + 0.5) / 3 = 0.5
        assert_eq!(score.tenths(), 5);
        assert!(just.contains("License=fail"));

        let (score, just) = computed_score(&["Missing".to_string()], &analyzer_result());
        assert_eq!(score, Score::MIN);
        assert!(just.contains("Missing=missing"));
    }

    #[tokio::test]
    async fn resolves_override_ai_and_computed_criteria() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok("SCORE: 0.8\nJUSTIFICATION: good");
        let mut overrides = Overrides::new();
        overrides.insert("fixed".into(), 0.36);

        let scorer = Scorer::new(
            rubric(
                r#"
criteria:
  - { id: fixed, prompt: "unused", weight: 1 }
  - { id: quality, prompt: "judge quality", weight: 2 }
  - { id: hygiene, checks: [Readme, License], weight: 1 }
"#,
            ),
            overrides,
            no_summary(),
            gateway(Arc::clone(&provider)),
        );

        let mut cache = AiCache::new();
        let output = scorer.score(&analyzer_result(), &mut cache).await.unwrap();
        let r = &output.result;

        let sources: Vec<ScoreSource> = r.criteria.iter().map(|c| c.source).collect();
        assert_eq!(
            sources,
            vec![ScoreSource::Override, ScoreSource::Ai, ScoreSource::Computed]
        );
        assert_eq!(r.criteria[0].score.tenths(), 4);
        assert_eq!(r.criteria[1].score.tenths(), 8);
        assert_eq!(r.criteria[2].score.tenths(), 5);

        // (0.4 * 1 + 0.8 * 2 + 0.5 * 1) / 4 = 0.625
        assert!((r.weighted_average - 0.625).abs() < 1e-9);
        assert_eq!(r.overall_score.tenths(), 6);
        assert!((r.overall_score.value() - r.weighted_average).abs() <= 0.05 + 1e-9);
        assert_eq!(provider.calls(), 1);
        assert!(provider.prompts()[0].contains("Readme::pass\nLicense::fail\nDocs::partial"));
        assert_eq!(r.overall_comment, None);
        assert_eq!(output.markdown, report::render_markdown(r));
    }

    #[tokio::test]
    async fn failed_criterion_gets_default_score() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok("SCORE: 1.0\nJUSTIFICATION: great");
        provider.push_ok("no score here");
        provider.push_ok("SCORE: 0.6");

        let scorer = Scorer::new(
            rubric(
                r#"
criteria:
  - { id: a, prompt: "a" }
  - { id: b, prompt: "b" }
  - { id: c, prompt: "c" }
"#,
            ),
            Overrides::new(),
            no_summary(),
            gateway(Arc::clone(&provider)),
        );

        let output = scorer.score(&analyzer_result(), &mut AiCache::new()).await.unwrap();
        let b = &output.result.criteria[1];
        assert_eq!(b.source, ScoreSource::Default);
        assert_eq!(b.score.tenths(), 5);
        assert_eq!(output.result.failed_criteria, 1);
    }

    #[tokio::test]
    async fn too_many_failures_abort_scoring() {
        let provider = Arc::new(ScriptedProvider::with_responder(|_| {
            Err(ProviderError::Permanent("invalid key".into()))
        }));
        let scorer = Scorer::new(
            rubric(
                r#"
criteria:
  - { id: a, prompt: "a" }
  - { id: b, prompt: "b" }
  - { id: c, checks: [Readme] }
"#,
            ),
            Overrides::new(),
            no_summary(),
            gateway(provider),
        );

        let err = scorer
            .score(&analyzer_result(), &mut AiCache::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScorerError::TooManyFailures {
                failed: 2,
                total: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn summary_failure_leaves_comment_empty() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok("SCORE: 0.9\nJUSTIFICATION: fine");
        provider.push_err(ProviderError::Permanent("blocked".into()));

        let scorer = Scorer::new(
            rubric("criteria:\n  - { id: a, prompt: \"a\" }\n"),
            Overrides::new(),
            ScorerSettings::default(),
            gateway(Arc::clone(&provider)),
        );

        let output = scorer.score(&analyzer_result(), &mut AiCache::new()).await.unwrap();
        assert_eq!(output.result.overall_comment, None);
        assert_eq!(output.result.overall_score.tenths(), 9);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn summary_is_attached_and_cached() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok("SCORE: 0.9\nJUSTIFICATION: fine");
        provider.push_ok("Healthy project.\n\nStrengths:\n- docs");

        let scorer = Scorer::new(
            rubric("criteria:\n  - { id: a, prompt: \"a\" }\n"),
            Overrides::new(),
            ScorerSettings::default(),
            gateway(Arc::clone(&provider)),
        );

        let mut cache = AiCache::new();
        let first = scorer.score(&analyzer_result(), &mut cache).await.unwrap();
        let second = scorer.score(&analyzer_result(), &mut cache).await.unwrap();
        assert!(first.result.overall_comment.as_deref().unwrap().starts_with("Healthy project."));
        assert_eq!(first.result.overall_comment, second.result.overall_comment);
        assert_eq!(provider.calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn empty_analyzer_result_is_rejected() {
        let scorer = Scorer::new(
            rubric("criteria:\n  - { id: a, prompt: \"a\" }\n"),
            Overrides::new(),
            no_summary(),
            gateway(Arc::new(ScriptedProvider::new())),
        );
        let empty = AnalyzerResult {
            checks: vec![],
            generated_at: String::new(),
            tool_version: String::new(),
        };
        let err = scorer.score(&empty, &mut AiCache::new()).await.unwrap_err();
        assert!(matches!(err, ScorerError::EmptyInput));
    }

    #[test]
    fn long_input_is_truncated() {
        let out = truncate_input(&"a".repeat(50), 10);
        assert_eq!(out, format!("{}\n... (truncated)", "a".repeat(10)));
        assert_eq!(truncate_input("short", 10), "short");
    }
}
