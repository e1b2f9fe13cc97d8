//! Report data model shared by the collector, the coordinator and the reporter.
//!
//! Field names serialize in camelCase so the structured report mirrors the
//! data model one to one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single finding reported by the external checker for one unit.
///
/// Identity is structural (file, line, column, code). Records are never
/// deduplicated here; repeated runs are expected to produce the same records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRecord {
    /// Path relative to the workspace root, `/`-separated.
    pub source_file: String,
    /// 1-based.
    pub line: usize,
    /// 1-based.
    pub column: usize,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl DiagnosticRecord {
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.source_file, self.line, self.column)
    }
}

/// Result of scanning (and optionally fixing) one build unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    /// Unit path relative to the workspace root (`.` for the root itself).
    pub unit: String,
    pub total_errors: usize,
    pub fixed_errors: usize,
    pub remaining_errors: usize,
    pub errors_by_file: BTreeMap<String, Vec<DiagnosticRecord>>,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl UnitReport {
    /// Build a report from the diagnostics found before any fix ran.
    pub fn from_diagnostics(unit: impl Into<String>, records: Vec<DiagnosticRecord>) -> Self {
        let total = records.len();
        Self {
            unit: unit.into(),
            total_errors: total,
            fixed_errors: 0,
            remaining_errors: total,
            errors_by_file: group_by_file(records),
            from_cache: false,
            notes: Vec::new(),
        }
    }

    /// Record `fixed` diagnostics as resolved, keeping `remaining = total - fixed`.
    pub fn apply_fixed(&mut self, fixed: usize) {
        self.fixed_errors = fixed.min(self.total_errors);
        self.remaining_errors = self.total_errors - self.fixed_errors;
    }

    /// Adopt the records a post-fix rescan reported. Diagnostics the fix
    /// introduced count towards the total, so `remaining` always equals the
    /// listed records and `total - fixed`.
    pub fn apply_rescan(&mut self, records: Vec<DiagnosticRecord>) {
        let remaining = records.len();
        self.total_errors = self.total_errors.max(remaining);
        self.fixed_errors = self.total_errors - remaining;
        self.remaining_errors = remaining;
        self.errors_by_file = group_by_file(records);
    }

    pub fn records(&self) -> impl Iterator<Item = &DiagnosticRecord> {
        self.errors_by_file.values().flatten()
    }
}

/// Per-unit counters kept in the aggregate for the report's unit table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSummary {
    pub unit: String,
    pub total_errors: usize,
    pub fixed_errors: usize,
    pub remaining_errors: usize,
    pub from_cache: bool,
}

/// Sum of every processed unit's report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub total_errors: usize,
    pub fixed_errors: usize,
    pub remaining_errors: usize,
    pub errors_by_file: BTreeMap<String, Vec<DiagnosticRecord>>,
    pub units: Vec<UnitSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl AggregateReport {
    /// Fold one unit's report in. Counters add up; findings for a file that
    /// another unit already reported are appended, never replaced.
    pub fn merge(&mut self, report: UnitReport) {
        self.total_errors += report.total_errors;
        self.fixed_errors += report.fixed_errors;
        self.remaining_errors += report.remaining_errors;
        self.units.push(UnitSummary {
            unit: report.unit.clone(),
            total_errors: report.total_errors,
            fixed_errors: report.fixed_errors,
            remaining_errors: report.remaining_errors,
            from_cache: report.from_cache,
        });
        for note in report.notes {
            self.notes.push(format!("{}: {}", report.unit, note));
        }
        for (file, mut records) in report.errors_by_file {
            self.errors_by_file.entry(file).or_default().append(&mut records);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.remaining_errors == 0
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut DiagnosticRecord> {
        self.errors_by_file.values_mut().flatten()
    }
}

fn group_by_file(records: Vec<DiagnosticRecord>) -> BTreeMap<String, Vec<DiagnosticRecord>> {
    let mut by_file: BTreeMap<String, Vec<DiagnosticRecord>> = BTreeMap::new();
    for record in records {
        by_file.entry(record.source_file.clone()).or_default().push(record);
    }
    by_file
}
