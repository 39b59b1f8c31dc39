//! Offline scoring: `repograde score <analyzer-json|->`.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use repograde::analyzer::{AnalyzerOutput, AnalyzerResult};
use repograde::config::GraderConfig;
use repograde::gateway::cache::AiCache;

/// Accepts either a bare analyzer result or a full analyzer output
/// (`{markdown, result}`) as written by `analyze --json` or the API.
pub async fn cmd_score(config: &GraderConfig, input: &Path, json: bool) -> Result<()> {
    let raw = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read analyzer JSON from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?
    };
    let analyzer = parse_analyzer_json(&raw)?;

    let scorer = config.scorer(config.provider()?, config.rate_limiter())?;
    let mut cache = AiCache::new();
    let output = scorer.score(&analyzer, &mut cache).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&output.result)
            .context("Failed to serialize scorer result")?;
        println!("{}", rendered);
    } else {
        print!("{}", output.markdown);
    }
    Ok(())
}

fn parse_analyzer_json(raw: &str) -> Result<AnalyzerResult> {
    if let Ok(output) = serde_json::from_str::<AnalyzerOutput>(raw) {
        return Ok(output.result);
    }
    serde_json::from_str(raw).context("Input is not an analyzer result JSON document")
}
