use super::ValidationReport;
use chrono::Local;
use std::fmt::Write;

fn status(passed: bool) -> &'static str {
    if passed {
        "PASSED"
    } else {
        "FAILED"
    }
}

/// Renders a validation report as markdown.
///
/// Informational lines are only included when `verbose` is set.
pub fn render_markdown(report: &ValidationReport, bundle_name: &str, verbose: bool) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "# Patient Bundle Validation Report\n");
    let _ = writeln!(out, "- **Bundle:** `{bundle_name}`");
    let _ = writeln!(out, "- **Date:** {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "- **Total resources:** {}\n", report.total_resources);

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(out, "| Checks | {} |", report.results.len());
    let _ = writeln!(out, "| Passed | {} |", report.passed_count());
    let _ = writeln!(out, "| Failed | {} |", report.failed_count());
    let _ = writeln!(out, "| Issues | {} |", report.issue_count());
    let _ = writeln!(out, "| Warnings | {} |", report.warning_count());
    let _ = writeln!(out, "| Status | **{}** |\n", status(report.passed()));

    let _ = writeln!(out, "## Results\n");
    let _ = writeln!(out, "| Check | Critical | Status | Valid / Checked |");
    let _ = writeln!(out, "|---|---|---|---|");
    for result in &report.results {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} / {} |",
            result.name,
            if result.critical { "yes" } else { "no" },
            status(result.passed),
            result.valid,
            result.checked
        );
    }
    out.push('\n');

    let _ = writeln!(out, "## Detailed Results\n");
    for result in &report.results {
        let _ = writeln!(out, "### {} ({})\n", result.name, status(result.passed));
        let _ = writeln!(out, "{}\n", result.rule);
        let _ = writeln!(out, "Resources validated: {} / {}\n", result.valid, result.checked);

        let mut sections = vec![
            (
                if result.critical { "Critical Issues" } else { "Issues" },
                &result.issues,
            ),
            ("Warnings", &result.warnings),
        ];
        if verbose {
            sections.push(("Details", &result.info));
        }
        for (heading, lines) in sections {
            if lines.is_empty() {
                continue;
            }
            let _ = writeln!(out, "**{heading}:**\n");
            for line in lines {
                let _ = writeln!(out, "- {line}");
            }
            out.push('\n');
        }
    }

    let _ = writeln!(out, "## Resource Inventory\n");
    let _ = writeln!(out, "| Resource type | Count |");
    let _ = writeln!(out, "|---|---|");
    for (resource_type, count) in &report.resource_counts {
        let _ = writeln!(out, "| {resource_type} | {count} |");
    }
    out
}
