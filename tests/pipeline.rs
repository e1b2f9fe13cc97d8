use chrono::{Duration, Utc};
use diagsweep::cache::{unit_hash, CacheEntry, CacheStore};
use diagsweep::process::{CommandRunner, CommandSpec, Invocation};
use diagsweep::{Analyzer, Config, RemediationLevel, RunOptions, SweepError};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

/// Serves canned checker output per unit directory and counts invocations.
#[derive(Default)]
struct FakeChecker {
    outputs: HashMap<String, String>,
    checker_calls: AtomicUsize,
    other_calls: Mutex<Vec<String>>,
}

impl FakeChecker {
    fn new(outputs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            outputs: outputs
                .iter()
                .map(|(unit, output)| (unit.to_string(), output.to_string()))
                .collect(),
            ..Default::default()
        })
    }

    fn checker_calls(&self) -> usize {
        self.checker_calls.load(Ordering::SeqCst)
    }
}

impl CommandRunner for FakeChecker {
    fn run(&self, spec: &CommandSpec) -> Invocation {
        if spec.args.first().map(String::as_str) != Some("tsc") {
            self.other_calls.lock().unwrap().push(spec.display());
            return Invocation::Completed { success: true, code: Some(0), output: String::new() };
        }
        self.checker_calls.fetch_add(1, Ordering::SeqCst);
        let unit = spec.working_dir.file_name().unwrap().to_string_lossy().to_string();
        let output = self.outputs.get(&unit).cloned().unwrap_or_default();
        Invocation::Completed {
            success: output.is_empty(),
            code: Some(if output.is_empty() { 0 } else { 2 }),
            output,
        }
    }
}

/// Checker whose output for a unit changes once the fix engine ran there.
#[derive(Default)]
struct FixingChecker {
    before: HashMap<String, String>,
    after: HashMap<String, String>,
    fixed_units: Mutex<HashSet<String>>,
    checker_calls: AtomicUsize,
    fix_calls: AtomicUsize,
}

impl FixingChecker {
    fn new(units: &[(&str, &str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            before: units.iter().map(|(u, b, _)| (u.to_string(), b.to_string())).collect(),
            after: units.iter().map(|(u, _, a)| (u.to_string(), a.to_string())).collect(),
            ..Default::default()
        })
    }

    fn calls(&self) -> (usize, usize) {
        (self.checker_calls.load(Ordering::SeqCst), self.fix_calls.load(Ordering::SeqCst))
    }
}

impl CommandRunner for FixingChecker {
    fn run(&self, spec: &CommandSpec) -> Invocation {
        let unit = spec.working_dir.file_name().unwrap().to_string_lossy().to_string();
        if spec.args.first().map(String::as_str) != Some("tsc") {
            self.fix_calls.fetch_add(1, Ordering::SeqCst);
            self.fixed_units.lock().unwrap().insert(unit);
            return Invocation::Completed { success: true, code: Some(0), output: String::new() };
        }
        self.checker_calls.fetch_add(1, Ordering::SeqCst);
        let outputs = if self.fixed_units.lock().unwrap().contains(&unit) { &self.after } else { &self.before };
        let output = outputs.get(&unit).cloned().unwrap_or_default();
        Invocation::Completed {
            success: output.is_empty(),
            code: Some(if output.is_empty() { 0 } else { 2 }),
            output,
        }
    }
}

/// Cache backend kept in memory so tests can age entries.
#[derive(Default)]
struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    fn backdate(&self, by: Duration) {
        for entry in self.entries.lock().unwrap().values_mut() {
            entry.cached_at = entry.cached_at - by;
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, unit_hash: &str) -> Option<CacheEntry> {
        self.entries.lock().unwrap().get(unit_hash).cloned()
    }

    fn store(&self, entry: &CacheEntry) -> diagsweep::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.unit_hash.clone(), entry.clone());
        Ok(())
    }
}

const UNIT_A: &str = "src/index.ts(1,7): error TS2339: Property 'x' does not exist on type '{}'.\n";
const UNIT_B: &str = "\
src/index.ts(2,10): error TS2345: Argument of type 'string' is not assignable to parameter of type 'number'.
src/index.ts(3,1): error TS2339: Property 'y' does not exist on type '{}'.
Found 2 errors.
";

/// Two units where `b` references `a`. `b` is listed first in the manifest.
fn workspace() -> TempDir {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    write(root, "package.json", r#"{"private": true, "workspaces": ["packages/b", "packages/a"]}"#);
    write(root, "packages/a/tsconfig.json", r#"{"compilerOptions": {"composite": true}}"#);
    write(root, "packages/a/src/index.ts", "export const a = {};\nexport const z = a.x;\n");
    write(root, "packages/b/tsconfig.json", r#"{"references": [{"path": "../a"}]}"#);
    write(root, "packages/b/src/index.ts", "import { a } from 'a';\nsquare('two');\na.y;\n");
    tmp
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn config(cache_dir: &Path, reuse: bool) -> Config {
    let mut config = Config::default();
    config.cache.directory = Some(cache_dir.to_path_buf());
    config.cache.reuse = reuse;
    config.execution.max_workers = Some(2);
    config
}

#[test]
fn two_unit_workspace_end_to_end() {
    let ws = workspace();
    let cache_dir = tempdir().unwrap();

    let checker = FakeChecker::new(&[("a", UNIT_A), ("b", UNIT_B)]);
    let outcome = Analyzer::new(config(cache_dir.path(), false), RunOptions::new(ws.path()))
        .with_runner(checker.clone())
        .run()
        .unwrap();

    assert_eq!(outcome.report.total_errors, 3);
    assert_eq!(outcome.report.fixed_errors, 0);
    assert_eq!(outcome.report.remaining_errors, 3);
    assert_ne!(outcome.exit_code(), 0);
    assert_eq!(checker.checker_calls(), 2);

    let order: Vec<&str> = outcome.units.iter().map(|u| u.relative_path.as_str()).collect();
    assert_eq!(order, vec!["packages/a", "packages/b"]);
    assert_eq!(outcome.report.errors_by_file["packages/b/src/index.ts"].len(), 2);

    let rerun_checker = FakeChecker::new(&[("a", UNIT_A), ("b", UNIT_B)]);
    let rerun = Analyzer::new(config(cache_dir.path(), true), RunOptions::new(ws.path()))
        .with_runner(rerun_checker.clone())
        .run()
        .unwrap();

    assert_eq!(rerun_checker.checker_calls(), 0);
    assert!(rerun.report.units.iter().all(|u| u.from_cache));
    assert_eq!(rerun.report.total_errors, outcome.report.total_errors);
    assert_eq!(rerun.report.errors_by_file, outcome.report.errors_by_file);
    assert_ne!(rerun.exit_code(), 0);
}

#[test]
fn workspaces_sharing_a_cache_directory_stay_apart() {
    // Created first, so its sources are older than anything the other run caches.
    let clean = workspace();
    let dirty = workspace();
    let cache_dir = tempdir().unwrap();

    let first = Analyzer::new(config(cache_dir.path(), true), RunOptions::new(dirty.path()))
        .with_runner(FakeChecker::new(&[("a", UNIT_A), ("b", UNIT_B)]))
        .run()
        .unwrap();
    assert_eq!(first.report.total_errors, 3);

    let checker = FakeChecker::new(&[]);
    let second = Analyzer::new(config(cache_dir.path(), true), RunOptions::new(clean.path()))
        .with_runner(checker.clone())
        .run()
        .unwrap();

    assert_eq!(checker.checker_calls(), 2);
    assert_eq!(second.report.total_errors, 0);
    assert!(second.report.errors_by_file.is_empty());
    assert!(second.report.units.iter().all(|u| !u.from_cache));
}

const UNIT_B_AFTER_FIX: &str = "src/index.ts(3,1): error TS2339: Property 'y' does not exist on type '{}'.\n";

#[test]
fn real_remediation_rescans_and_refreshes_the_cache() {
    let ws = workspace();
    let store = Arc::new(MemoryStore::default());
    let checker = FixingChecker::new(&[("a", UNIT_A, ""), ("b", UNIT_B, UNIT_B_AFTER_FIX)]);
    let mut options = RunOptions::new(ws.path());
    options.remediation = RemediationLevel::Shallow;

    let analyzer = Analyzer::new(config(Path::new("/unused"), true), options)
        .with_runner(checker.clone())
        .with_cache_store(store.clone());

    let outcome = analyzer.run().unwrap();
    let report = &outcome.report;
    assert_eq!((report.total_errors, report.fixed_errors, report.remaining_errors), (3, 2, 1));
    assert_eq!(report.remaining_errors, report.total_errors - report.fixed_errors);
    assert_eq!(report.errors_by_file.values().flatten().count(), report.remaining_errors);
    // One scan before and one after the fix, per unit.
    assert_eq!(checker.calls(), (4, 2));

    // The post-fix report is what gets cached.
    assert_eq!(store.len(), 2);
    let cached_b = store.load(&unit_hash("packages/b")).unwrap().cached_report;
    assert_eq!((cached_b.total_errors, cached_b.fixed_errors, cached_b.remaining_errors), (2, 1, 1));

    // Valid entries exist, but a real fix never reads them.
    let rerun = analyzer.run().unwrap();
    assert!(rerun.report.units.iter().all(|u| !u.from_cache));
    // `a` is clean now (one scan, no fix); `b` still has one diagnostic.
    assert_eq!(checker.calls(), (7, 3));
    assert_eq!(rerun.report.remaining_errors, 1);
}

#[test]
fn fix_that_adds_diagnostics_keeps_counts_and_findings_aligned() {
    let ws = workspace();
    let cache_dir = tempdir().unwrap();
    let checker = FixingChecker::new(&[("a", UNIT_A, UNIT_B), ("b", "", "")]);
    let mut options = RunOptions::new(ws.path());
    options.remediation = RemediationLevel::Deep;

    let outcome = Analyzer::new(config(cache_dir.path(), true), options)
        .with_runner(checker)
        .run()
        .unwrap();

    let report = &outcome.report;
    assert_eq!(report.total_errors, 2);
    assert_eq!(report.fixed_errors, 0);
    assert_eq!(report.remaining_errors, 2);
    assert_eq!(report.errors_by_file.values().flatten().count(), 2);
    assert!(report.notes.iter().any(|n| n.contains("introduced 1 new diagnostic(s)")));
}

#[test]
fn stale_cache_entries_trigger_a_rescan() {
    let ws = workspace();
    let store = Arc::new(MemoryStore::default());
    let checker = FakeChecker::new(&[("a", UNIT_A), ("b", UNIT_B)]);

    let analyzer = Analyzer::new(config(Path::new("/unused"), true), RunOptions::new(ws.path()))
        .with_runner(checker.clone())
        .with_cache_store(store.clone());

    analyzer.run().unwrap();
    assert_eq!(checker.checker_calls(), 2);
    assert_eq!(store.len(), 2);

    analyzer.run().unwrap();
    assert_eq!(checker.checker_calls(), 2);

    // Every source file is now newer than the entries.
    store.backdate(Duration::hours(1));
    let outcome = analyzer.run().unwrap();
    assert_eq!(checker.checker_calls(), 4);
    assert!(outcome.report.units.iter().all(|u| !u.from_cache));
    assert!(store.entries.lock().unwrap().values().all(|e| e.cached_at > Utc::now() - Duration::minutes(1)));
}

#[test]
fn disabled_cache_writes_nothing() {
    let ws = workspace();
    let store = Arc::new(MemoryStore::default());
    let mut cfg = config(Path::new("/unused"), true);
    cfg.cache.enabled = false;

    let checker = FakeChecker::new(&[("a", UNIT_A)]);
    let analyzer = Analyzer::new(cfg, RunOptions::new(ws.path()))
        .with_runner(checker.clone())
        .with_cache_store(store.clone());
    analyzer.run().unwrap();
    analyzer.run().unwrap();

    assert_eq!(store.len(), 0);
    assert_eq!(checker.checker_calls(), 4);
}

#[test]
fn code_filter_limits_what_is_counted() {
    let ws = workspace();
    let cache_dir = tempdir().unwrap();
    let mut options = RunOptions::new(ws.path());
    options.error_codes = vec!["TS2339".to_string()];

    let outcome = Analyzer::new(config(cache_dir.path(), true), options)
        .with_runner(FakeChecker::new(&[("a", UNIT_A), ("b", UNIT_B)]))
        .run()
        .unwrap();

    assert_eq!(outcome.report.total_errors, 2);
    assert!(outcome
        .report
        .errors_by_file
        .values()
        .flatten()
        .all(|r| r.code == "TS2339"));
}

#[test]
fn sequential_mode_matches_parallel_totals() {
    let ws = workspace();
    let cache_dir = tempdir().unwrap();
    let mut cfg = config(cache_dir.path(), false);
    cfg.execution.parallel = false;

    let outcome = Analyzer::new(cfg, RunOptions::new(ws.path()))
        .with_runner(FakeChecker::new(&[("a", UNIT_A), ("b", UNIT_B)]))
        .run()
        .unwrap();

    assert_eq!(outcome.report.total_errors, 3);
    let summed: usize = outcome.report.units.iter().map(|u| u.total_errors).sum();
    assert_eq!(summed, outcome.report.total_errors);
}

#[test]
fn dry_run_remediation_runs_no_fix_engine() {
    let ws = workspace();
    let cache_dir = tempdir().unwrap();
    let mut options = RunOptions::new(ws.path());
    options.remediation = RemediationLevel::Shallow;
    options.dry_run = true;

    let checker = FakeChecker::new(&[("a", UNIT_A), ("b", UNIT_B)]);
    let outcome = Analyzer::new(config(cache_dir.path(), true), options)
        .with_runner(checker.clone())
        .run()
        .unwrap();

    assert!(checker.other_calls.lock().unwrap().is_empty());
    assert_eq!(outcome.report.fixed_errors, 0);
    assert_eq!(outcome.report.remaining_errors, 3);
    assert!(outcome.report.notes.iter().any(|n| n.contains("dry run") && n.contains("eslint")));
}

#[test]
fn clean_workspace_exits_zero() {
    let ws = workspace();
    let cache_dir = tempdir().unwrap();
    let outcome = Analyzer::new(config(cache_dir.path(), false), RunOptions::new(ws.path()))
        .with_runner(FakeChecker::new(&[]))
        .run()
        .unwrap();

    assert_eq!(outcome.report.total_errors, 0);
    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn cyclic_references_still_scan_every_unit() {
    let ws = workspace();
    write(ws.path(), "packages/a/tsconfig.json", r#"{"references": [{"path": "../b"}]}"#);
    let cache_dir = tempdir().unwrap();

    let outcome = Analyzer::new(config(cache_dir.path(), false), RunOptions::new(ws.path()))
        .with_runner(FakeChecker::new(&[("a", UNIT_A), ("b", UNIT_B)]))
        .run()
        .unwrap();

    assert_eq!(outcome.units.len(), 2);
    assert_eq!(outcome.skipped_edges.len(), 1);
    assert!(outcome.report.notes.iter().any(|n| n.contains("dependency cycle")));
    assert_eq!(outcome.report.total_errors, 3);
}

#[test]
fn missing_root_and_empty_workspace_are_fatal() {
    let tmp = tempdir().unwrap();

    let err = Analyzer::new(Config::default(), RunOptions::new(tmp.path().join("missing")))
        .run()
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<SweepError>(), Some(SweepError::RootNotFound(_))));

    let err = Analyzer::new(Config::default(), RunOptions::new(tmp.path()))
        .run()
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<SweepError>(), Some(SweepError::NoUnitsFound { .. })));
}
