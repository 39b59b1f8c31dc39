use std::fmt::Write;

use super::ScorerResult;

fn cell(text: &str) -> String {
    text.replace('|', "/").replace('\n', " ")
}

/// Render the scoring report. Pure function of the structured result.
pub fn render_markdown(result: &ScorerResult) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Final Scoring Report\n");
    let _ = writeln!(md, "Generated: {}  ", result.generated_at);
    let _ = writeln!(md, "Tool version: {}\n", result.tool_version);

    if let Some(comment) = &result.overall_comment {
        let _ = writeln!(md, "### Overall Review Comment\n");
        let _ = writeln!(md, "{}\n", comment.trim());
    }

    let _ = writeln!(
        md,
        "Overall Score: {} (weighted average {:.2})\n",
        result.overall_score, result.weighted_average
    );
    md.push_str("| ID | Criterion | Score | Weight | Justification | Source |\n");
    md.push_str("|----|-----------|-------|--------|---------------|--------|\n");
    for c in &result.criteria {
        let _ = writeln!(
            md,
            "| {} | {} | {} | {:.2} | {} | {} |",
            cell(&c.id),
            cell(&c.name),
            c.score,
            c.weight,
            cell(&c.justification),
            c.source
        );
    }
    md
}
