use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

/// Name of the configuration file looked up at the workspace root.
pub const CONFIG_FILE_NAME: &str = "diagsweep.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-unit build configuration file that marks a directory as a unit.
    pub build_config_file: String,
    /// Grouping directories scanned one level deep when no manifest members exist.
    pub fallback_dirs: Vec<String>,
    /// Directories never descended into when looking for changed sources.
    pub ignore_dirs: Vec<String>,
    /// File extensions the checker cares about (cache invalidation).
    pub source_extensions: Vec<String>,
    pub attach_snippets: bool,
    pub snippet_context_lines: usize,
    pub attach_suggestions: bool,
    pub checker: CheckerConfig,
    pub remediation: RemediationConfig,
    pub cache: CacheConfig,
    pub execution: ExecutionConfig,
    pub llm: LLMConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub program: String,
    /// `{config}` is replaced with the unit's build configuration path.
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    pub shallow: CommandConfig,
    pub deep: CommandConfig,
    pub timeout_seconds: u64,
    /// Re-run the checker after a fix to measure what was fixed.
    pub rescan_after_fix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch: when false nothing is read or written.
    pub enabled: bool,
    /// Reuse valid cached reports. When false every unit is rescanned but
    /// fresh reports are still recorded for later runs.
    pub reuse: bool,
    /// Defaults to `<system temp>/diagsweep-cache`.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub parallel: bool,
    /// Defaults to available parallelism minus one, at least 1.
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub enabled: bool,
    pub provider: LLMProvider,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Upper bound on records enriched per run.
    pub max_suggestions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LLMProvider {
    OpenAI,
    Ollama,
    Anthropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RemediationLevel {
    None,
    #[value(alias = "shallow-autofix")]
    Shallow,
    #[value(alias = "deep-migration")]
    Deep,
}

impl RemediationLevel {
    /// Share of the pre-fix diagnostics assumed fixed when no rescan runs.
    pub fn estimated_fix_ratio(&self) -> f64 {
        match self {
            RemediationLevel::None => 0.0,
            RemediationLevel::Shallow => 0.6,
            RemediationLevel::Deep => 0.8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationLevel::None => "none",
            RemediationLevel::Shallow => "shallow",
            RemediationLevel::Deep => "deep",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    #[value(alias = "structured")]
    Json,
    #[value(alias = "document")]
    Markdown,
    Html,
}

/// Settings that only live for one run; CLI flags land here on top of `Config`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub remediation: RemediationLevel,
    pub error_codes: Vec<String>,
    pub file_filters: Vec<String>,
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
    pub suggest_ai: bool,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remediation: RemediationLevel::None,
            error_codes: Vec::new(),
            file_filters: Vec::new(),
            format: OutputFormat::Text,
            output: None,
            dry_run: false,
            suggest_ai: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_config_file: "tsconfig.json".to_string(),
            fallback_dirs: vec![
                "packages".to_string(),
                "apps".to_string(),
                "libs".to_string(),
                "services".to_string(),
            ],
            ignore_dirs: vec![
                "node_modules".to_string(),
                ".git".to_string(),
                "dist".to_string(),
                "build".to_string(),
                "out".to_string(),
                "coverage".to_string(),
                ".next".to_string(),
                ".turbo".to_string(),
            ],
            source_extensions: vec![
                "ts".to_string(),
                "tsx".to_string(),
                "mts".to_string(),
                "cts".to_string(),
                "js".to_string(),
                "jsx".to_string(),
                "json".to_string(),
            ],
            attach_snippets: true,
            snippet_context_lines: 2,
            attach_suggestions: true,
            checker: CheckerConfig::default(),
            remediation: RemediationConfig::default(),
            cache: CacheConfig::default(),
            execution: ExecutionConfig::default(),
            llm: LLMConfig::default(),
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            args: vec![
                "tsc".to_string(),
                "--noEmit".to_string(),
                "--pretty".to_string(),
                "false".to_string(),
                "-p".to_string(),
                "{config}".to_string(),
            ],
            timeout_seconds: 300,
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            shallow: CommandConfig {
                program: "npx".to_string(),
                args: vec!["eslint".to_string(), ".".to_string(), "--fix".to_string()],
            },
            deep: CommandConfig {
                program: "npx".to_string(),
                args: vec!["ts-migrate".to_string(), "migrate".to_string(), ".".to_string()],
            },
            timeout_seconds: 600,
            rescan_after_fix: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reuse: true,
            directory: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_workers: None,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: LLMProvider::OpenAI,
            api_key: None,
            base_url: None,
            model: "gpt-4".to_string(),
            max_tokens: 400,
            temperature: 0.1,
            timeout_seconds: 60,
            max_suggestions: 20,
        }
    }
}

impl CheckerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl RemediationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn command_for(&self, level: RemediationLevel) -> Option<&CommandConfig> {
        match level {
            RemediationLevel::None => None,
            RemediationLevel::Shallow => Some(&self.shallow),
            RemediationLevel::Deep => Some(&self.deep),
        }
    }
}

impl CommandConfig {
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl CacheConfig {
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("diagsweep-cache"))
    }
}

impl ExecutionConfig {
    pub fn resolved_max_workers(&self) -> usize {
        match self.max_workers {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1),
        }
    }
}

impl Config {
    /// Load `<root>/diagsweep.toml` when present, otherwise defaults.
    pub fn load(root: &Path) -> crate::Result<Self> {
        let config_path = root.join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            tracing::info!("Loading configuration from {}", config_path.display());
            Self::from_file(&config_path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", config_path.display());
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific file path
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Save config to a file
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = match self.llm.provider {
                LLMProvider::OpenAI => env::var("OPENAI_API_KEY").ok(),
                LLMProvider::Anthropic => env::var("ANTHROPIC_API_KEY").ok(),
                LLMProvider::Ollama => None,
            };
        }
    }

    /// Create a config file with all available options documented
    pub fn create_documented_config() -> String {
        r#"# diagsweep configuration
# Place this file at the workspace root as diagsweep.toml or pass --config.

# File that marks a directory as a build unit
build_config_file = "tsconfig.json"

# Grouping directories scanned one level deep when package.json declares no workspaces
fallback_dirs = ["packages", "apps", "libs", "services"]

# Directories skipped when checking whether a unit changed since it was cached
ignore_dirs = ["node_modules", ".git", "dist", "build", "out", "coverage", ".next", ".turbo"]

# Extensions whose modification time invalidates a cached unit
source_extensions = ["ts", "tsx", "mts", "cts", "js", "jsx", "json"]

# Attach the surrounding source lines to each diagnostic
attach_snippets = true
snippet_context_lines = 2

# Attach generic remediation hints keyed on the diagnostic code
attach_suggestions = true

[checker]
# {config} is replaced with the unit's build configuration path
program = "npx"
args = ["tsc", "--noEmit", "--pretty", "false", "-p", "{config}"]
timeout_seconds = 300

[remediation]
timeout_seconds = 600
# Re-run the checker after a fix and report the exact number of fixed diagnostics.
# When false, a fixed share of the pre-fix count is assumed instead (deprecated).
rescan_after_fix = true

[remediation.shallow]
program = "npx"
args = ["eslint", ".", "--fix"]

[remediation.deep]
program = "npx"
args = ["ts-migrate", "migrate", "."]

[cache]
enabled = true
# Set to false to rescan every unit while still refreshing the cache (same as --no-cache)
reuse = true
# directory = "/tmp/diagsweep-cache"

[execution]
parallel = true
# max_workers = 4

[llm]
# Ask a language model for one extra fix suggestion per remaining diagnostic
enabled = false

# LLM Provider: "OpenAI", "Ollama", or "Anthropic"
provider = "OpenAI"

# API key for the provider (can also be set via environment variables)
# OpenAI: OPENAI_API_KEY
# Anthropic: ANTHROPIC_API_KEY
# api_key = "your-api-key-here"

# Base URL (mainly for Ollama local instances)
# base_url = "http://localhost:11434"

model = "gpt-4"
max_tokens = 400
temperature = 0.1
timeout_seconds = 60
max_suggestions = 20
"#
        .to_string()
    }
}
