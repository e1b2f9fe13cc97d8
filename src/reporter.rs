use crate::{
    analyzer::RunOutcome,
    config::{OutputFormat, RunOptions},
    models::{AggregateReport, DiagnosticRecord},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt::Write as _, fs, io::Write, path::Path};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub metadata: ReportMetadata,
    pub status: RunStatus,
    #[serde(flatten)]
    pub aggregate: AggregateReport,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub run_id: String,
    pub generated_at: String,
    pub version: String,
    pub workspace_root: String,
    pub duration_ms: u128,
    pub remediation_level: String,
    pub dry_run: bool,
    pub units_discovered: usize,
    pub units_scanned: usize,
    pub units_from_cache: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Success,
    DiagnosticsRemaining,
}

impl RunStatus {
    fn headline(&self, remaining: usize) -> String {
        match self {
            RunStatus::Success => "Success: no diagnostics remain.".to_string(),
            RunStatus::DiagnosticsRemaining => format!("{} diagnostic(s) remain.", remaining),
        }
    }
}

pub struct Reporter;

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_report(&self, outcome: &RunOutcome, options: &RunOptions) -> Report {
        let aggregate = outcome.report.clone();
        let status = if aggregate.is_clean() {
            RunStatus::Success
        } else {
            RunStatus::DiagnosticsRemaining
        };

        Report {
            metadata: ReportMetadata {
                run_id: uuid::Uuid::new_v4().to_string(),
                generated_at: chrono::Utc::now().to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                workspace_root: outcome.root.display().to_string(),
                duration_ms: outcome.duration.as_millis(),
                remediation_level: options.remediation.as_str().to_string(),
                dry_run: options.dry_run,
                units_discovered: outcome.units.len(),
                units_scanned: outcome.processed_units,
                units_from_cache: aggregate.units.iter().filter(|u| u.from_cache).count(),
                cancelled: outcome.cancelled,
            },
            status,
            aggregate,
        }
    }

    pub fn render(&self, report: &Report, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Text => Ok(self.generate_text_report(report)),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
            OutputFormat::Markdown => Ok(self.generate_markdown_report(report)),
            OutputFormat::Html => Ok(self.generate_html_report(report)),
        }
    }

    /// Write the rendered report to `output`, or stdout when `None`.
    pub fn export_report(&self, report: &Report, format: OutputFormat, output: Option<&Path>) -> Result<()> {
        let rendered = self.render(report, format)?;
        match output {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, rendered)
                    .with_context(|| format!("writing report to {}", path.display()))?;
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(rendered.as_bytes())?;
                if !rendered.ends_with('\n') {
                    stdout.write_all(b"\n")?;
                }
            }
        }
        Ok(())
    }

    fn generate_text_report(&self, report: &Report) -> String {
        let agg = &report.aggregate;
        let mut out = String::new();

        let _ = writeln!(out, "Diagnostics report for {}", report.metadata.workspace_root);
        let _ = writeln!(
            out,
            "Units: {} scanned ({} from cache)  Total: {}  Fixed: {}  Remaining: {}",
            report.metadata.units_scanned,
            report.metadata.units_from_cache,
            agg.total_errors,
            agg.fixed_errors,
            agg.remaining_errors
        );
        if report.metadata.dry_run {
            let _ = writeln!(out, "Dry run: no fixes were applied");
        }
        out.push('\n');

        for (file, records) in &agg.errors_by_file {
            if records.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{}", file);
            for record in records {
                let _ = writeln!(out, "  {}:{}  {}  {}", record.line, record.column, record.code, record.message);
                if let Some(snippet) = &record.code_snippet {
                    for line in snippet.lines() {
                        let _ = writeln!(out, "      {}", line);
                    }
                }
                for suggestion in record.suggestions.iter().flatten() {
                    let _ = writeln!(out, "      - {}", suggestion);
                }
            }
            out.push('\n');
        }

        if !agg.notes.is_empty() {
            let _ = writeln!(out, "Notes:");
            for note in &agg.notes {
                let _ = writeln!(out, "  - {}", note);
            }
            out.push('\n');
        }

        let _ = writeln!(out, "{}", report.status.headline(agg.remaining_errors));
        out
    }

    fn generate_markdown_report(&self, report: &Report) -> String {
        let agg = &report.aggregate;
        let mut md = format!(
            "# Diagnostics Report\n\n**Workspace:** `{}`\n**Generated:** {}\n**Duration:** {}ms\n**Remediation:** {}{}\n\n",
            report.metadata.workspace_root,
            report.metadata.generated_at,
            report.metadata.duration_ms,
            report.metadata.remediation_level,
            if report.metadata.dry_run { " (dry run)" } else { "" }
        );

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Total:** {}\n", agg.total_errors));
        md.push_str(&format!("- **Fixed:** {}\n", agg.fixed_errors));
        md.push_str(&format!("- **Remaining:** {}\n", agg.remaining_errors));
        md.push_str(&format!(
            "- **Units:** {} scanned, {} from cache\n\n",
            report.metadata.units_scanned, report.metadata.units_from_cache
        ));
        md.push_str(&format!("**{}**\n\n", report.status.headline(agg.remaining_errors)));

        if !agg.units.is_empty() {
            md.push_str("## Units\n\n| Unit | Total | Fixed | Remaining | Cached |\n|---|---:|---:|---:|:---:|\n");
            for unit in &agg.units {
                md.push_str(&format!(
                    "| `{}` | {} | {} | {} | {} |\n",
                    unit.unit,
                    unit.total_errors,
                    unit.fixed_errors,
                    unit.remaining_errors,
                    if unit.from_cache { "yes" } else { "" }
                ));
            }
            md.push('\n');
        }

        if agg.errors_by_file.values().any(|records| !records.is_empty()) {
            md.push_str("## Findings\n\n");
            for (file, records) in &agg.errors_by_file {
                if records.is_empty() {
                    continue;
                }
                md.push_str(&format!("### `{}`\n\n", file));
                for record in records {
                    md.push_str(&self.markdown_record(record));
                }
            }
        }

        if !agg.notes.is_empty() {
            md.push_str("## Notes\n\n");
            for note in &agg.notes {
                md.push_str(&format!("- {}\n", note));
            }
        }

        md
    }

    fn markdown_record(&self, record: &DiagnosticRecord) -> String {
        let mut md = format!(
            "- **{}** ({}:{}): {}\n",
            record.code, record.line, record.column, record.message
        );
        if let Some(snippet) = &record.code_snippet {
            md.push_str("\n  ```ts\n");
            for line in snippet.lines() {
                md.push_str(&format!("  {}\n", line));
            }
            md.push_str("  ```\n\n");
        }
        for suggestion in record.suggestions.iter().flatten() {
            md.push_str(&format!("  - {}\n", suggestion));
        }
        md
    }

    fn generate_html_report(&self, report: &Report) -> String {
        let agg = &report.aggregate;
        let status_class = match report.status {
            RunStatus::Success => "status-success",
            RunStatus::DiagnosticsRemaining => "status-failure",
        };

        let mut html = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Diagnostics Report - {root}</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 40px; line-height: 1.6; }}
        .header {{ border-bottom: 2px solid #333; padding-bottom: 20px; }}
        .section {{ margin: 30px 0; }}
        .metric {{ display: inline-block; margin: 10px 20px 10px 0; padding: 10px; background: #f5f5f5; border-radius: 5px; }}
        .status-success {{ color: #2e7d32; font-weight: bold; }}
        .status-failure {{ color: #d32f2f; font-weight: bold; }}
        .diagnostic {{ margin: 15px 0; padding: 15px; border-left: 4px solid #007acc; background: #f9f9f9; }}
        .code {{ font-weight: bold; color: #2c3e50; }}
        pre {{ background: #272822; color: #f8f8f2; padding: 10px; border-radius: 5px; overflow-x: auto; }}
        table {{ border-collapse: collapse; width: 100%; margin: 10px 0; }}
        th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}
        th {{ background-color: #f2f2f2; }}
    </style>
</head>
<body>
    <div class="header">
        <h1>Diagnostics Report</h1>
        <p>Workspace: <code>{root}</code> &middot; Generated {generated} &middot; Remediation: {level}{dry}</p>
    </div>
    <div class="section">
        <div class="metric">Total: {total}</div>
        <div class="metric">Fixed: {fixed}</div>
        <div class="metric">Remaining: {remaining}</div>
        <div class="metric">Units: {scanned} ({cached} cached)</div>
        <p class="{status_class}">{headline}</p>
    </div>
"#,
            root = escape_html(&report.metadata.workspace_root),
            generated = escape_html(&report.metadata.generated_at),
            level = escape_html(&report.metadata.remediation_level),
            dry = if report.metadata.dry_run { " (dry run)" } else { "" },
            total = agg.total_errors,
            fixed = agg.fixed_errors,
            remaining = agg.remaining_errors,
            scanned = report.metadata.units_scanned,
            cached = report.metadata.units_from_cache,
            status_class = status_class,
            headline = escape_html(&report.status.headline(agg.remaining_errors)),
        );

        if !agg.units.is_empty() {
            html.push_str("    <div class=\"section\">\n        <h2>Units</h2>\n        <table>\n            <tr><th>Unit</th><th>Total</th><th>Fixed</th><th>Remaining</th><th>Cached</th></tr>\n");
            for unit in &agg.units {
                html.push_str(&format!(
                    "            <tr><td><code>{}</code></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                    escape_html(&unit.unit),
                    unit.total_errors,
                    unit.fixed_errors,
                    unit.remaining_errors,
                    if unit.from_cache { "yes" } else { "" }
                ));
            }
            html.push_str("        </table>\n    </div>\n");
        }

        for (file, records) in &agg.errors_by_file {
            if records.is_empty() {
                continue;
            }
            html.push_str(&format!(
                "    <div class=\"section\">\n        <h2><code>{}</code></h2>\n",
                escape_html(file)
            ));
            for record in records {
                html.push_str(&format!(
                    "        <div class=\"diagnostic\">\n            <span class=\"code\">{}</span> ({}:{}) {}\n",
                    escape_html(&record.code),
                    record.line,
                    record.column,
                    escape_html(&record.message)
                ));
                if let Some(snippet) = &record.code_snippet {
                    html.push_str(&format!("            <pre>{}</pre>\n", escape_html(snippet)));
                }
                if let Some(suggestions) = record.suggestions.as_ref().filter(|s| !s.is_empty()) {
                    html.push_str("            <ul>\n");
                    for suggestion in suggestions {
                        html.push_str(&format!("                <li>{}</li>\n", escape_html(suggestion)));
                    }
                    html.push_str("            </ul>\n");
                }
                html.push_str("        </div>\n");
            }
            html.push_str("    </div>\n");
        }

        if !agg.notes.is_empty() {
            html.push_str("    <div class=\"section\">\n        <h2>Notes</h2>\n        <ul>\n");
            for note in &agg.notes {
                html.push_str(&format!("            <li>{}</li>\n", escape_html(note)));
            }
            html.push_str("        </ul>\n    </div>\n");
        }

        html.push_str("</body>\n</html>\n");
        html
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
