pub mod config;
pub mod error;
pub mod models;
pub mod discovery;
pub mod dependency_graph;
pub mod process;
pub mod cache;
pub mod collector;
pub mod remediation;
pub mod coordinator;
pub mod llm;
pub mod analyzer;
pub mod reporter;

pub use config::{Config, OutputFormat, RemediationLevel, RunOptions};
pub use error::SweepError;
pub use models::{AggregateReport, DiagnosticRecord, UnitReport};
pub use discovery::{BuildUnit, UnitDiscovery};
pub use dependency_graph::Scheduler;
pub use cache::{CacheStore, DiagnosticCache, FsCacheStore};
pub use collector::{DiagnosticFilter, DiagnosticParser, DiagnosticsCollector};
pub use remediation::RemediationApplier;
pub use coordinator::{Coordinator, ExecutionMode};
pub use llm::SuggestionClient;
pub use analyzer::{Analyzer, RunOutcome};
pub use reporter::Reporter;

pub type Result<T> = anyhow::Result<T>;
