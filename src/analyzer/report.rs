use std::fmt::Write;

use super::{AnalyzerResult, CheckStatus};

fn label(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Partial => "PARTIAL",
        CheckStatus::Error => "ERROR",
    }
}

/// Render the analyzer report. Pure function of the structured result.
pub fn render_markdown(result: &AnalyzerResult) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Repository Analysis Report\n");
    let _ = writeln!(md, "Generated: {}  ", result.generated_at);
    let _ = writeln!(md, "Tool version: {}\n", result.tool_version);

    for check in &result.checks {
        let _ = writeln!(md, "## [{}] {}\n", label(check.status), check.check_name);
        if !check.detail.is_empty() {
            for line in check.detail.lines() {
                let _ = writeln!(md, "> {}", line);
            }
            md.push('\n');
        }
    }

    let _ = writeln!(md, "## Summary\n");
    let _ = writeln!(
        md,
        "{} out of {} checks passed.",
        result.passed(),
        result.checks.len()
    );
    let partial = result.count(CheckStatus::Partial);
    let errored = result.count(CheckStatus::Error);
    if partial > 0 || errored > 0 {
        let _ = writeln!(md, "\n{} partial, {} errored.", partial, errored);
    }
    md
}
