use crate::{
    cache::{CacheStore, DiagnosticCache, FsCacheStore},
    collector::{Collection, DiagnosticFilter, DiagnosticsCollector},
    config::{Config, RunOptions},
    coordinator::{Coordinator, ExecutionMode},
    dependency_graph::{Scheduler, SkippedEdge},
    discovery::{BuildUnit, UnitDiscovery},
    error::SweepError,
    llm::SuggestionClient,
    models::{AggregateReport, UnitReport},
    process::{CommandRunner, SystemRunner},
    remediation::RemediationApplier,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Everything one run produced, ready for the reporter.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub units: Vec<BuildUnit>,
    pub processed_units: usize,
    pub skipped_edges: Vec<SkippedEdge>,
    pub report: AggregateReport,
    pub cancelled: bool,
}

impl RunOutcome {
    /// 0 when nothing remains, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.report.is_clean() {
            0
        } else {
            1
        }
    }
}

/// Scans one unit: cache check, collection, optional remediation, cache write.
/// Each call owns its report until the coordinator merges it.
pub struct UnitScanner {
    collector: DiagnosticsCollector,
    applier: RemediationApplier,
    cache: Option<DiagnosticCache>,
    reuse_cache: bool,
    fingerprint: String,
}

impl UnitScanner {
    pub fn new(
        collector: DiagnosticsCollector,
        applier: RemediationApplier,
        cache: Option<DiagnosticCache>,
        reuse_cache: bool,
        dry_run: bool,
    ) -> Self {
        let fingerprint = format!(
            "{};fix={};dry_run={}",
            collector.filter().fingerprint(),
            applier.level().as_str(),
            dry_run
        );
        Self {
            collector,
            applier,
            cache,
            reuse_cache,
            fingerprint,
        }
    }

    pub fn scan(&self, unit: &BuildUnit) -> UnitReport {
        // A real fix has to run, so a cached report cannot stand in for it.
        if self.reuse_cache && !self.applier.modifies_sources() {
            if let Some(report) = self
                .cache
                .as_ref()
                .and_then(|cache| cache.lookup(unit, &self.fingerprint))
            {
                info!("{}: using cached report ({} diagnostic(s))", unit.name(), report.total_errors);
                return report;
            }
        }

        let Collection { records, degraded } = self.collector.collect(unit);
        let outcome = self.applier.apply(unit, &records, &self.collector);

        let mut report = UnitReport::from_diagnostics(unit.relative_path.clone(), records);
        match outcome.remaining_records {
            Some(remaining) => report.apply_rescan(remaining),
            None => report.apply_fixed(outcome.fixed),
        }
        report.notes.extend(degraded.iter().cloned());
        report.notes.extend(outcome.notes);

        info!(
            "{}: {} diagnostic(s), {} fixed, {} remaining",
            unit.name(),
            report.total_errors,
            report.fixed_errors,
            report.remaining_errors
        );

        if degraded.is_none() {
            if let Some(cache) = &self.cache {
                cache.record(unit, &self.fingerprint, &report);
            }
        }
        report
    }
}

/// Runs the whole pipeline: discovery, scheduling, coordinated scans.
#[derive(Clone)]
pub struct Analyzer {
    config: Config,
    options: RunOptions,
    runner: Arc<dyn CommandRunner>,
    cache_store: Option<Arc<dyn CacheStore>>,
    cancel: Arc<AtomicBool>,
}

impl Analyzer {
    pub fn new(config: Config, options: RunOptions) -> Self {
        Self {
            config,
            options,
            runner: Arc::new(SystemRunner),
            cache_store: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the process runner used for the checker and fix engines.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replace the cache backend (defaults to JSON files in the cache directory).
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn execution_mode(&self) -> ExecutionMode {
        if self.config.execution.parallel {
            ExecutionMode::Parallel {
                max_workers: self.config.execution.resolved_max_workers(),
            }
        } else {
            ExecutionMode::Sequential
        }
    }

    fn diagnostic_cache(&self, root: &Path) -> Option<DiagnosticCache> {
        if !self.config.cache.enabled {
            return None;
        }
        let store = self.cache_store.clone().unwrap_or_else(|| {
            Arc::new(FsCacheStore::for_workspace(
                &self.config.cache.resolved_directory(),
                root,
            ))
        });
        Some(DiagnosticCache::new(store, &self.config))
    }

    /// Blocking run of the scan pipeline.
    pub fn run(&self) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let start = Instant::now();

        let discovery = UnitDiscovery::new(&self.options.root, self.config.clone())?;
        let root = discovery.root().to_path_buf();
        let units = discovery.discover_units();
        if units.is_empty() {
            return Err(SweepError::NoUnitsFound {
                root,
                config_file: self.config.build_config_file.clone(),
            }
            .into());
        }

        let schedule = Scheduler::new(&units).schedule();

        let filter = DiagnosticFilter::new(
            self.options.error_codes.clone(),
            self.options.file_filters.clone(),
        );
        let collector = DiagnosticsCollector::new(&root, &self.config, filter, Arc::clone(&self.runner))?;
        let applier = RemediationApplier::new(
            self.options.remediation,
            self.config.remediation.clone(),
            self.options.dry_run,
            Arc::clone(&self.runner),
        );
        let scanner = UnitScanner::new(
            collector,
            applier,
            self.diagnostic_cache(&root),
            self.config.cache.reuse,
            self.options.dry_run,
        );

        let mode = self.execution_mode();
        info!("Scanning {} unit(s) ({:?})", schedule.order.len(), mode);
        let outcome = Coordinator::new(mode)
            .with_cancel_handle(Arc::clone(&self.cancel))
            .run(&schedule.order, |unit| scanner.scan(unit))?;

        if outcome.cancelled && outcome.processed_units == 0 {
            return Err(SweepError::Cancelled.into());
        }

        let mut report = outcome.report;
        for edge in &schedule.skipped_edges {
            report
                .notes
                .push(format!("dependency cycle: skipped edge {} -> {}", edge.from, edge.to));
        }
        if outcome.cancelled {
            report.notes.push(format!(
                "run cancelled after {} of {} unit(s)",
                outcome.processed_units,
                schedule.order.len()
            ));
        }

        Ok(RunOutcome {
            root,
            started_at,
            duration: start.elapsed(),
            units: schedule.order,
            processed_units: outcome.processed_units,
            skipped_edges: schedule.skipped_edges,
            report,
            cancelled: outcome.cancelled,
        })
    }

    /// Run the pipeline on the blocking pool, then enrich remaining
    /// diagnostics with AI suggestions when requested.
    pub async fn execute(&self) -> Result<RunOutcome> {
        let this = self.clone();
        let mut outcome = tokio::task::spawn_blocking(move || this.run())
            .await
            .context("scan task failed")??;

        if (self.options.suggest_ai || self.config.llm.enabled) && !outcome.report.is_clean() {
            match SuggestionClient::new(self.config.llm.clone()) {
                Ok(client) => {
                    client.enrich(&mut outcome.report).await;
                }
                Err(e) => warn!("AI suggestions unavailable: {:#}", e),
            }
        }

        Ok(outcome)
    }
}
