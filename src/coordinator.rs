//! Fans per-unit work out over a bounded worker pool.
//!
//! The ordered unit list is cut into chunks of `max_workers` units. A chunk runs
//! to completion before the next one starts, and only then are its reports
//! merged, so the aggregate is never touched while workers run.

use crate::discovery::BuildUnit;
use crate::models::{AggregateReport, UnitReport};
use anyhow::Context;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel { max_workers: usize },
}

impl ExecutionMode {
    pub fn chunk_size(&self) -> usize {
        match self {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel { max_workers } => (*max_workers).max(1),
        }
    }
}

/// Aggregate plus how far the run got.
#[derive(Debug, Clone)]
pub struct CoordinatorOutcome {
    pub report: AggregateReport,
    pub processed_units: usize,
    pub cancelled: bool,
}

pub struct Coordinator {
    mode: ExecutionMode,
    cancel: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between chunks. Setting it lets the current chunk finish.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn with_cancel_handle(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `scan` for every unit in `units` (already dependency ordered).
    pub fn run<F>(&self, units: &[BuildUnit], scan: F) -> crate::Result<CoordinatorOutcome>
    where
        F: Fn(&BuildUnit) -> UnitReport + Sync,
    {
        let chunk_size = self.mode.chunk_size();
        let pool = match self.mode {
            ExecutionMode::Sequential => None,
            ExecutionMode::Parallel { .. } => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(chunk_size)
                    .thread_name(|i| format!("diagsweep-worker-{}", i))
                    .build()
                    .context("building worker pool")?,
            ),
        };

        let mut report = AggregateReport::default();
        let mut processed_units = 0;
        let chunk_count = units.len().div_ceil(chunk_size);

        for (index, chunk) in units.chunks(chunk_size).enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(
                    "Run cancelled, {} of {} unit(s) processed",
                    processed_units,
                    units.len()
                );
                return Ok(CoordinatorOutcome {
                    report,
                    processed_units,
                    cancelled: true,
                });
            }

            let reports: Vec<UnitReport> = match &pool {
                Some(pool) => pool.install(|| chunk.par_iter().map(&scan).collect()),
                None => chunk.iter().map(&scan).collect(),
            };

            for unit_report in reports {
                report.merge(unit_report);
            }
            processed_units += chunk.len();

            if chunk_count > 1 {
                info!("Chunk {}/{} done ({} unit(s))", index + 1, chunk_count, chunk.len());
            }
        }

        Ok(CoordinatorOutcome {
            report,
            processed_units,
            cancelled: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiagnosticRecord;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    fn units(n: usize) -> Vec<BuildUnit> {
        let root = Path::new("/ws");
        (0..n)
            .map(|i| BuildUnit::new(root, PathBuf::from(format!("/ws/u{}", i)), "tsconfig.json"))
            .collect()
    }

    fn report_for(unit: &BuildUnit, errors: usize) -> UnitReport {
        let records = (0..errors)
            .map(|line| DiagnosticRecord {
                source_file: format!("{}/index.ts", unit.relative_path),
                line: line + 1,
                column: 1,
                code: "TS2322".into(),
                message: String::new(),
                code_snippet: None,
                suggestions: None,
            })
            .collect();
        UnitReport::from_diagnostics(unit.relative_path.clone(), records)
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let units = units(7);
        let scan = |u: &BuildUnit| {
            let n = u.relative_path.trim_start_matches('u').parse::<usize>().unwrap();
            report_for(u, n)
        };
        let parallel = Coordinator::new(ExecutionMode::Parallel { max_workers: 3 })
            .run(&units, scan)
            .unwrap();
        let sequential = Coordinator::new(ExecutionMode::Sequential).run(&units, scan).unwrap();

        assert_eq!(parallel.report, sequential.report);
        assert_eq!(parallel.report.total_errors, (0..7).sum::<usize>());
        assert_eq!(parallel.processed_units, 7);
        let order: Vec<&str> = parallel.report.units.iter().map(|u| u.unit.as_str()).collect();
        assert_eq!(order, vec!["u0", "u1", "u2", "u3", "u4", "u5", "u6"]);
    }

    #[test]
    fn chunks_never_overlap() {
        let units = units(6);
        let starts = Mutex::new(Vec::new());
        let finished = AtomicUsize::new(0);

        Coordinator::new(ExecutionMode::Parallel { max_workers: 2 })
            .run(&units, |u| {
                // Everything from earlier chunks must be finished when we start.
                let index = u.relative_path.trim_start_matches('u').parse::<usize>().unwrap();
                starts
                    .lock()
                    .unwrap()
                    .push((index / 2, finished.load(Ordering::SeqCst)));
                std::thread::sleep(Duration::from_millis(20));
                finished.fetch_add(1, Ordering::SeqCst);
                report_for(u, 1)
            })
            .unwrap();

        for (chunk, finished_before) in starts.lock().unwrap().iter() {
            assert!(*finished_before >= chunk * 2);
            assert!(*finished_before <= chunk * 2 + 1);
        }
    }

    #[test]
    fn cancellation_takes_effect_between_chunks() {
        let units = units(6);
        let coordinator = Coordinator::new(ExecutionMode::Parallel { max_workers: 2 });
        let cancel = coordinator.cancel_handle();
        let outcome = coordinator
            .run(&units, |u| {
                cancel.store(true, Ordering::SeqCst);
                report_for(u, 1)
            })
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.processed_units, 2);
        assert_eq!(outcome.report.total_errors, 2);
    }
}
