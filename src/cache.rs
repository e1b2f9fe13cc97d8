//! Per-unit report cache.
//!
//! Entries are keyed by a hash of the unit's workspace-relative path and live
//! in a directory of their own per workspace root. An entry is reused only
//! while no checker-relevant file under the unit is newer than the entry. Any
//! failure to read or decode an entry counts as a miss.

use crate::config::Config;
use crate::discovery::BuildUnit;
use crate::models::UnitReport;
use anyhow::Context;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub unit_hash: String,
    pub unit: String,
    /// Filters and fix level the report was produced under.
    pub options_fingerprint: String,
    pub cached_report: UnitReport,
    pub cached_at: DateTime<Utc>,
}

/// Storage behind the cache. Implementations must treat a missing or corrupt
/// entry as `None`.
pub trait CacheStore: Send + Sync {
    fn load(&self, unit_hash: &str) -> Option<CacheEntry>;
    fn store(&self, entry: &CacheEntry) -> crate::Result<()>;
}

/// One JSON file per unit hash.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    directory: PathBuf,
}

impl FsCacheStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Store for one workspace under the shared `base` directory, so units
    /// with the same relative path in different repos never share entries.
    pub fn for_workspace(base: &Path, root: &Path) -> Self {
        Self::new(base.join(workspace_key(root)))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, unit_hash: &str) -> PathBuf {
        self.directory.join(format!("{}.json", unit_hash))
    }
}

impl CacheStore for FsCacheStore {
    fn load(&self, unit_hash: &str) -> Option<CacheEntry> {
        let path = self.entry_path(unit_hash);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if path.exists() {
                    warn!("Unreadable cache entry {}: {}", path.display(), e);
                }
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.unit_hash == unit_hash => Some(entry),
            Ok(_) => {
                warn!("Cache entry {} belongs to another unit, ignoring", path.display());
                None
            }
            Err(e) => {
                warn!("Corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    fn store(&self, entry: &CacheEntry) -> crate::Result<()> {
        fs::create_dir_all(&self.directory)
            .with_context(|| format!("creating cache directory {}", self.directory.display()))?;
        let path = self.entry_path(&entry.unit_hash);
        // Write then rename so a concurrent reader never sees half an entry.
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, serde_json::to_vec_pretty(entry)?)
            .with_context(|| format!("writing cache entry {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("replacing cache entry {}", path.display()))?;
        Ok(())
    }
}

/// Stable key for a unit: hex SHA-256 (first 16 bytes) of its relative path.
pub fn unit_hash(relative_path: &str) -> String {
    short_hex_digest(relative_path.as_bytes())
}

/// Directory name for a workspace: the same digest over its canonical root.
pub fn workspace_key(root: &Path) -> String {
    short_hex_digest(root.to_string_lossy().as_bytes())
}

fn short_hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct DiagnosticCache {
    store: Arc<dyn CacheStore>,
    ignore_dirs: Vec<String>,
    source_extensions: Vec<String>,
}

impl DiagnosticCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &Config) -> Self {
        Self {
            store,
            ignore_dirs: config.ignore_dirs.clone(),
            source_extensions: config.source_extensions.clone(),
        }
    }

    /// The cached report for `unit`, if it is still valid for `fingerprint`.
    pub fn lookup(&self, unit: &BuildUnit, fingerprint: &str) -> Option<UnitReport> {
        let entry = self.store.load(&unit_hash(&unit.relative_path))?;
        if entry.options_fingerprint != fingerprint {
            debug!("{}: cache entry made with different options", unit.name());
            return None;
        }

        match self.newest_source_mtime(&unit.path) {
            Some(newest) if newest > entry.cached_at => {
                debug!("{}: sources changed since {}", unit.name(), entry.cached_at);
                None
            }
            _ => {
                let mut report = entry.cached_report;
                report.from_cache = true;
                Some(report)
            }
        }
    }

    /// Persist a freshly scanned report. Failures are logged, not returned.
    pub fn record(&self, unit: &BuildUnit, fingerprint: &str, report: &UnitReport) {
        let mut cached_report = report.clone();
        cached_report.from_cache = false;
        let entry = CacheEntry {
            unit_hash: unit_hash(&unit.relative_path),
            unit: unit.relative_path.clone(),
            options_fingerprint: fingerprint.to_string(),
            cached_report,
            cached_at: Utc::now(),
        };
        if let Err(e) = self.store.store(&entry) {
            warn!("{}: could not write cache entry: {:#}", unit.name(), e);
        }
    }

    /// Newest modification time among checker-relevant files under `dir`,
    /// skipping dependency, build-output and VCS directories.
    pub fn newest_source_mtime(&self, dir: &Path) -> Option<DateTime<Utc>> {
        let ignore_dirs = self.ignore_dirs.clone();
        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .hidden(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                !(is_dir && ignore_dirs.iter().any(|d| entry.file_name() == d.as_str()))
            })
            .build();

        let mut newest: Option<SystemTime> = None;
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if !self.is_source(entry.path()) {
                continue;
            }
            if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
                newest = Some(newest.map_or(modified, |n| n.max(modified)));
            }
        }
        newest.map(DateTime::<Utc>::from)
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.source_extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}
