//! Run-level failures.
//!
//! Everything else the pipeline runs into (unreadable manifests, broken build
//! configs, checker crashes, corrupt cache entries) degrades to a warning and a
//! smaller or emptier report. Only the conditions below stop a run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("workspace root {0} does not exist or is not a directory")]
    RootNotFound(PathBuf),

    #[error("no build units found under {root} (looked for {config_file})")]
    NoUnitsFound { root: PathBuf, config_file: String },

    #[error("run cancelled before any unit was processed")]
    Cancelled,
}

impl SweepError {
    /// Process exit code for a fatal error. 1 is reserved for "diagnostics remain".
    pub fn exit_code(&self) -> u8 {
        match self {
            SweepError::RootNotFound(_) | SweepError::NoUnitsFound { .. } => 2,
            SweepError::Cancelled => 130,
        }
    }
}
