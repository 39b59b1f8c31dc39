//! Local analysis: `repograde analyze <repo-path>`.

use std::path::Path;

use anyhow::{Context, Result};
use repograde::config::GraderConfig;
use repograde::gateway::cache::AiCache;

pub async fn cmd_analyze(config: &GraderConfig, repo_path: &Path, json: bool) -> Result<()> {
    let analyzer = config.analyzer(config.provider()?, config.rate_limiter())?;
    let mut cache = AiCache::new();
    let output = analyzer.analyze(repo_path, &mut cache).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&output.result)
            .context("Failed to serialize analyzer result")?;
        println!("{}", rendered);
    } else {
        print!("{}", output.markdown);
    }
    Ok(())
}
