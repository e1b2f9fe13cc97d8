use crate::collector::{Collection, DiagnosticsCollector};
use crate::config::{RemediationConfig, RemediationLevel};
use crate::discovery::BuildUnit;
use crate::models::DiagnosticRecord;
use crate::process::{CommandRunner, CommandSpec};
use std::sync::Arc;
use tracing::{info, warn};

/// What a remediation attempt did to one unit.
#[derive(Debug, Clone, Default)]
pub struct RemediationOutcome {
    pub fixed: usize,
    /// Diagnostics still reported after the fix, when a rescan ran.
    pub remaining_records: Option<Vec<DiagnosticRecord>>,
    pub notes: Vec<String>,
}

pub struct RemediationApplier {
    level: RemediationLevel,
    config: RemediationConfig,
    dry_run: bool,
    runner: Arc<dyn CommandRunner>,
}

impl RemediationApplier {
    pub fn new(
        level: RemediationLevel,
        config: RemediationConfig,
        dry_run: bool,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            level,
            config,
            dry_run,
            runner,
        }
    }

    pub fn level(&self) -> RemediationLevel {
        self.level
    }

    /// True when running this applier will actually change files.
    pub fn modifies_sources(&self) -> bool {
        self.level != RemediationLevel::None && !self.dry_run
    }

    pub fn fix_command(&self, unit: &BuildUnit) -> Option<CommandSpec> {
        self.config.command_for(self.level).map(|command| CommandSpec {
            program: command.program.clone(),
            args: command.args.clone(),
            working_dir: unit.path.clone(),
            timeout: self.config.timeout(),
        })
    }

    /// Run the fix engine for `unit` given its `pre_fix` diagnostics, then
    /// measure the effect with a second collector pass.
    pub fn apply(
        &self,
        unit: &BuildUnit,
        pre_fix: &[DiagnosticRecord],
        collector: &DiagnosticsCollector,
    ) -> RemediationOutcome {
        let Some(spec) = self.fix_command(unit) else {
            return RemediationOutcome::default();
        };

        if pre_fix.is_empty() {
            return RemediationOutcome::default();
        }

        if self.dry_run {
            let note = format!(
                "dry run: would run `{}` ({} remediation) in {}",
                spec.display(),
                self.level.as_str(),
                unit.name()
            );
            info!("{}", note);
            return RemediationOutcome {
                notes: vec![note],
                ..Default::default()
            };
        }

        info!("{}: applying {} remediation", unit.name(), self.level.as_str());
        let invocation = self.runner.run(&spec);
        if !invocation.succeeded() {
            let note = format!("remediation `{}` {}", spec.display(), invocation.describe());
            warn!("{}: {}", unit.name(), note);
            return RemediationOutcome {
                notes: vec![note],
                ..Default::default()
            };
        }

        if !self.config.rescan_after_fix {
            let fixed = estimate_fixed(self.level, pre_fix.len());
            warn!(
                "{}: rescans after fixes are disabled, estimating {} fixed diagnostic(s)",
                unit.name(),
                fixed
            );
            return RemediationOutcome {
                fixed,
                remaining_records: None,
                notes: vec![format!("fixed count estimated ({} of {})", fixed, pre_fix.len())],
            };
        }

        let Collection { records, degraded } = collector.collect(unit);
        let mut notes = Vec::new();
        if let Some(reason) = degraded {
            // A rescan that could not run says nothing about what was fixed.
            notes.push(format!("post-fix rescan failed: {}", reason));
            return RemediationOutcome {
                fixed: 0,
                remaining_records: None,
                notes,
            };
        }

        let fixed = pre_fix.len().saturating_sub(records.len());
        if records.len() > pre_fix.len() {
            let note = format!(
                "remediation introduced {} new diagnostic(s)",
                records.len() - pre_fix.len()
            );
            warn!("{}: {}", unit.name(), note);
            notes.push(note);
        }
        info!(
            "{}: {} of {} diagnostic(s) fixed",
            unit.name(),
            fixed,
            pre_fix.len()
        );
        RemediationOutcome {
            fixed,
            remaining_records: Some(records),
            notes,
        }
    }
}

/// Fallback used only when rescans are disabled: a fixed share of `pre_fix`.
pub fn estimate_fixed(level: RemediationLevel, pre_fix: usize) -> usize {
    (pre_fix as f64 * level.estimated_fix_ratio()).floor() as usize
}
