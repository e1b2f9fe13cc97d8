use crate::config::Config;
use crate::dependency_graph::read_references;
use crate::error::SweepError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Workspace manifest read from the root.
pub const MANIFEST_FILE: &str = "package.json";

/// An independently checkable sub-project: a directory with its own build config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildUnit {
    /// Absolute, normalized. This is the unit's identity.
    pub path: PathBuf,
    /// Relative to the workspace root, `/`-separated, `.` for the root itself.
    pub relative_path: String,
    pub config_path: PathBuf,
    /// Absolute directories named by the build config's project references,
    /// in declaration order.
    #[serde(default)]
    pub references: Vec<PathBuf>,
}

impl BuildUnit {
    pub fn new(root: &Path, path: PathBuf, config_file: &str) -> Self {
        let config_path = path.join(config_file);
        let relative_path = relative_to(root, &path);
        Self {
            path,
            relative_path,
            config_path,
            references: Vec::new(),
        }
    }

    /// Like [`BuildUnit::new`], with references read from the build config.
    pub fn load(root: &Path, path: PathBuf, config_file: &str) -> Self {
        let unit = Self::new(root, path, config_file);
        let references = read_references(&unit.config_path, &unit.path);
        unit.with_references(references)
    }

    pub fn with_references(mut self, references: Vec<PathBuf>) -> Self {
        self.references = references;
        self
    }

    pub fn name(&self) -> &str {
        &self.relative_path
    }
}

pub struct UnitDiscovery {
    root: PathBuf,
    config: Config,
}

impl UnitDiscovery {
    /// Fails only when the root is missing; everything past that is best effort.
    pub fn new(root: &Path, config: Config) -> Result<Self, SweepError> {
        if !root.is_dir() {
            return Err(SweepError::RootNotFound(root.to_path_buf()));
        }
        let root = fs::canonicalize(root).map_err(|_| SweepError::RootNotFound(root.to_path_buf()))?;
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deduplicated units in discovery order: manifest members, otherwise the
    /// fallback grouping directories, then the root itself.
    pub fn discover_units(&self) -> Vec<BuildUnit> {
        let mut candidates = self.manifest_members();
        if candidates.is_empty() {
            debug!("No workspace members declared, scanning fallback directories");
            candidates = self.fallback_members();
        }
        candidates.push(self.root.clone());

        let mut seen = HashSet::new();
        let mut units = Vec::new();
        for dir in candidates {
            let dir = normalize_path(&dir);
            if !self.has_build_config(&dir) || !seen.insert(dir.clone()) {
                continue;
            }
            units.push(BuildUnit::load(&self.root, dir, &self.config.build_config_file));
        }

        info!("Discovered {} build unit(s) under {}", units.len(), self.root.display());
        units
    }

    fn has_build_config(&self, dir: &Path) -> bool {
        dir.join(&self.config.build_config_file).is_file()
    }

    fn manifest_members(&self) -> Vec<PathBuf> {
        let manifest_path = self.root.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Vec::new();
        }
        let content = match fs::read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Could not read {}: {}", manifest_path.display(), e);
                return Vec::new();
            }
        };
        let manifest: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Could not parse {}: {}", manifest_path.display(), e);
                return Vec::new();
            }
        };

        let patterns = workspace_patterns(&manifest);
        let (excludes, includes): (Vec<&String>, Vec<&String>) =
            patterns.iter().partition(|p| p.starts_with('!'));

        let excluded: HashSet<PathBuf> = excludes
            .iter()
            .flat_map(|p| self.expand_pattern(&p[1..]))
            .collect();

        includes
            .iter()
            .flat_map(|p| self.expand_pattern(p))
            .filter(|dir| !excluded.contains(dir))
            .collect()
    }

    fn expand_pattern(&self, pattern: &str) -> Vec<PathBuf> {
        let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
        let full = self.root.join(pattern);
        let entries = match glob::glob(&full.to_string_lossy()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Invalid workspace pattern '{}': {}", pattern, e);
                return Vec::new();
            }
        };

        let mut dirs = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_dir() => dirs.push(normalize_path(&path)),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable path while expanding '{}': {}", pattern, e),
            }
        }
        dirs
    }

    fn fallback_members(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for group in &self.config.fallback_dirs {
            let group_dir = self.root.join(group);
            if !group_dir.is_dir() {
                continue;
            }
            let entries = match fs::read_dir(&group_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Could not read {}: {}", group_dir.display(), e);
                    continue;
                }
            };
            let mut children: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            children.sort();
            dirs.extend(children);
        }
        dirs
    }
}

/// Patterns from `"workspaces": [..]` or `"workspaces": { "packages": [..] }`.
fn workspace_patterns(manifest: &Value) -> Vec<String> {
    let workspaces = match manifest.get("workspaces") {
        Some(Value::Object(map)) => map.get("packages"),
        other => other,
    };
    workspaces
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// `path` relative to `root` with `/` separators; `.` when they are equal.
pub fn relative_to(root: &Path, path: &Path) -> String {
    let relative = pathdiff::diff_paths(normalize_path(path), root)
        .unwrap_or_else(|| path.to_path_buf());
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
