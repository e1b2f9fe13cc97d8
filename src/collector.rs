use crate::config::{CheckerConfig, Config};
use crate::discovery::{relative_to, BuildUnit};
use crate::models::DiagnosticRecord;
use crate::process::{CommandRunner, CommandSpec, Invocation};
use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// One checker line of the form `<file>(<line>,<column>): error <code>: <message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDiagnostic {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub code: String,
    pub message: String,
}

pub struct DiagnosticParser {
    line_pattern: Regex,
}

impl DiagnosticParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            line_pattern: Regex::new(
                r"^(?P<file>.+?)\((?P<line>\d+),(?P<column>\d+)\): error (?P<code>[A-Za-z0-9_-]+): (?P<message>.*)$",
            )?,
        })
    }

    /// `None` for anything that is not a well-formed diagnostic line,
    /// including zero line or column numbers.
    pub fn parse_line(&self, line: &str) -> Option<ParsedDiagnostic> {
        let caps = self.line_pattern.captures(line.trim_end_matches('\r'))?;
        let line_no: usize = caps["line"].parse().ok()?;
        let column: usize = caps["column"].parse().ok()?;
        if line_no == 0 || column == 0 {
            return None;
        }
        Some(ParsedDiagnostic {
            file: caps["file"].to_string(),
            line: line_no,
            column,
            code: caps["code"].to_string(),
            message: caps["message"].trim().to_string(),
        })
    }

    /// Every well-formed line of `output`, in order.
    pub fn parse_output(&self, output: &str) -> Vec<ParsedDiagnostic> {
        output.lines().filter_map(|line| self.parse_line(line)).collect()
    }
}

/// Restricts which diagnostics count. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticFilter {
    pub codes: Vec<String>,
    pub files: Vec<String>,
}

impl DiagnosticFilter {
    pub fn new(codes: Vec<String>, files: Vec<String>) -> Self {
        Self { codes, files }
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.files.is_empty()
    }

    pub fn matches(&self, record: &DiagnosticRecord) -> bool {
        let code_ok = self.codes.is_empty()
            || self
                .codes
                .iter()
                .any(|code| code.eq_ignore_ascii_case(&record.code));
        let file_ok = self.files.is_empty()
            || self.files.iter().any(|pattern| {
                record.source_file.contains(pattern.as_str())
                    || glob::Pattern::new(pattern)
                        .map(|p| p.matches(&record.source_file))
                        .unwrap_or(false)
            });
        code_ok && file_ok
    }

    pub fn apply(&self, records: Vec<DiagnosticRecord>) -> Vec<DiagnosticRecord> {
        if self.is_empty() {
            return records;
        }
        records.into_iter().filter(|r| self.matches(r)).collect()
    }

    /// Stable text form, used to tell cached reports made under other filters apart.
    pub fn fingerprint(&self) -> String {
        let mut codes: Vec<String> = self.codes.iter().map(|c| c.to_ascii_uppercase()).collect();
        codes.sort();
        let mut files = self.files.clone();
        files.sort();
        format!("codes={};files={}", codes.join(","), files.join(","))
    }
}

/// Generic remediation hints for common TypeScript diagnostic codes.
pub fn suggestions_for(code: &str) -> Vec<String> {
    let hints: &[&str] = match code {
        "TS2304" => &[
            "Import the missing name or declare it",
            "Install the type definitions that provide it (@types/...)",
        ],
        "TS2305" | "TS2614" => &[
            "Check the exported names of the module",
            "Switch between default and named import as the module requires",
        ],
        "TS2307" => &[
            "Install the missing package or fix the import path",
            "Add type declarations for the module (@types/... or a .d.ts file)",
        ],
        "TS2322" => &[
            "Make the assigned value match the declared type",
            "Widen the declared type if the value is legitimately different",
        ],
        "TS2339" => &[
            "Add the property to the type or interface",
            "Narrow the type before accessing the property",
            "Use optional chaining if the property may be absent",
        ],
        "TS2345" => &[
            "Convert the argument to the parameter type",
            "Update the function signature to accept this argument type",
        ],
        "TS2531" | "TS2532" | "TS18047" | "TS18048" => &[
            "Guard against null or undefined before use",
            "Use optional chaining (?.) or a default value (??)",
        ],
        "TS2554" => &[
            "Pass the number of arguments the function expects",
            "Make extra parameters optional in the signature",
        ],
        "TS2741" => &["Provide the missing required property", "Mark the property optional in the type"],
        "TS2769" => &["Check which overload the call is meant to hit and match its parameter types"],
        "TS6133" => &["Remove the unused declaration", "Prefix intentionally unused parameters with _"],
        "TS7006" => &["Add an explicit type annotation to the parameter"],
        "TS7016" => &[
            "Install the package's type definitions (@types/...)",
            "Add a declare module stub in a .d.ts file",
        ],
        _ => &["Review the diagnostic message and consult the checker documentation for this code"],
    };
    hints.iter().map(|h| h.to_string()).collect()
}

/// Lines `line - context ..= line + context` of `content`, numbered, with the
/// reported line marked by `>`. `None` when `line` is past the end.
pub fn snippet(content: &str, line: usize, context: usize) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    if line == 0 || line > lines.len() {
        return None;
    }
    let start = line.saturating_sub(context).max(1);
    let end = (line + context).min(lines.len());
    let width = end.to_string().len();

    let rendered: Vec<String> = (start..=end)
        .map(|n| {
            let marker = if n == line { '>' } else { ' ' };
            format!("{} {:>width$} | {}", marker, n, lines[n - 1], width = width)
        })
        .collect();
    Some(rendered.join("\n"))
}

/// Diagnostics for one unit, plus why the list may be incomplete.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub records: Vec<DiagnosticRecord>,
    pub degraded: Option<String>,
}

pub struct DiagnosticsCollector {
    root: PathBuf,
    checker: CheckerConfig,
    attach_snippets: bool,
    snippet_context_lines: usize,
    attach_suggestions: bool,
    filter: DiagnosticFilter,
    parser: DiagnosticParser,
    runner: Arc<dyn CommandRunner>,
}

impl DiagnosticsCollector {
    pub fn new(
        root: &Path,
        config: &Config,
        filter: DiagnosticFilter,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            checker: config.checker.clone(),
            attach_snippets: config.attach_snippets,
            snippet_context_lines: config.snippet_context_lines,
            attach_suggestions: config.attach_suggestions,
            filter,
            parser: DiagnosticParser::new()?,
            runner,
        })
    }

    pub fn filter(&self) -> &DiagnosticFilter {
        &self.filter
    }

    pub fn checker_command(&self, unit: &BuildUnit) -> CommandSpec {
        let config_path = unit.config_path.to_string_lossy();
        CommandSpec {
            program: self.checker.program.clone(),
            args: self
                .checker
                .args
                .iter()
                .map(|arg| arg.replace("{config}", &config_path))
                .collect(),
            working_dir: unit.path.clone(),
            timeout: self.checker.timeout(),
        }
    }

    /// Run the checker for `unit`. Never fails: anything that prevents a
    /// clean run yields whatever could be parsed plus a `degraded` reason.
    pub fn collect(&self, unit: &BuildUnit) -> Collection {
        if !unit.config_path.is_file() {
            let reason = format!("build configuration {} is missing", unit.config_path.display());
            warn!("{}: {}", unit.name(), reason);
            return Collection {
                records: Vec::new(),
                degraded: Some(reason),
            };
        }

        let spec = self.checker_command(unit);
        let invocation = self.runner.run(&spec);
        let (output, success) = match &invocation {
            Invocation::Completed { output, success, .. } => (output.as_str(), *success),
            _ => {
                let reason = format!("checker {}", invocation.describe());
                warn!("{}: {}", unit.name(), reason);
                return Collection {
                    records: Vec::new(),
                    degraded: Some(reason),
                };
            }
        };

        let parsed = self.parser.parse_output(output);
        let degraded = if parsed.is_empty() && !success {
            let reason = format!("checker {} without parseable diagnostics", invocation.describe());
            warn!("{}: {}", unit.name(), reason);
            Some(reason)
        } else {
            None
        };

        let records = self.filter.apply(self.to_records(unit, parsed));
        debug!("{}: {} diagnostic(s)", unit.name(), records.len());
        Collection { records, degraded }
    }

    fn to_records(&self, unit: &BuildUnit, parsed: Vec<ParsedDiagnostic>) -> Vec<DiagnosticRecord> {
        let mut contents: HashMap<PathBuf, Option<String>> = HashMap::new();

        parsed
            .into_iter()
            .map(|diag| {
                let absolute = unit.path.join(&diag.file);
                let code_snippet = if self.attach_snippets {
                    contents
                        .entry(absolute.clone())
                        .or_insert_with(|| fs::read_to_string(&absolute).ok())
                        .as_deref()
                        .and_then(|content| snippet(content, diag.line, self.snippet_context_lines))
                } else {
                    None
                };
                let suggestions = self.attach_suggestions.then(|| suggestions_for(&diag.code));

                DiagnosticRecord {
                    source_file: relative_to(&self.root, &absolute),
                    line: diag.line,
                    column: diag.column,
                    code: diag.code,
                    message: diag.message,
                    code_snippet,
                    suggestions,
                }
            })
            .collect()
    }
}
