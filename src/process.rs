//! Subprocess invocation shared by the collector and the remediation applier.
//!
//! Every external command goes through [`CommandRunner`] and comes back as an
//! [`Invocation`], never as an error. Callers decide how to degrade.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of running a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// The process ran to completion. `output` is stdout followed by stderr.
    Completed {
        success: bool,
        code: Option<i32>,
        output: String,
    },
    /// Killed after exceeding its timeout.
    TimedOut { after: Duration },
    /// The process could not be spawned at all.
    FailedToStart { reason: String },
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        matches!(self, Invocation::Completed { success: true, .. })
    }

    /// Captured output, when the process completed.
    pub fn output(&self) -> Option<&str> {
        match self {
            Invocation::Completed { output, .. } => Some(output),
            _ => None,
        }
    }

    /// One-line description used in warnings and report notes.
    pub fn describe(&self) -> String {
        match self {
            Invocation::Completed { success: true, .. } => "exited successfully".to_string(),
            Invocation::Completed { code: Some(code), .. } => format!("exited with status {}", code),
            Invocation::Completed { code: None, .. } => "terminated by signal".to_string(),
            Invocation::TimedOut { after } => format!("timed out after {}s", after.as_secs()),
            Invocation::FailedToStart { reason } => format!("failed to start: {}", reason),
        }
    }
}

/// Seam between the pipeline and the operating system.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Invocation;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Invocation {
        let start = Instant::now();
        debug!("Running `{}` in {}", spec.display(), spec.working_dir.display());

        let mut child = match Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Invocation::FailedToStart {
                    reason: e.to_string(),
                }
            }
        };

        // Drain both pipes on their own threads so a chatty checker cannot fill
        // a pipe buffer and stall before the timeout fires.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match child.wait_timeout(spec.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                warn!("`{}` timed out after {:?}", spec.display(), start.elapsed());
                return Invocation::TimedOut { after: spec.timeout };
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Invocation::FailedToStart {
                    reason: format!("waiting for process: {}", e),
                };
            }
        };

        let mut output = join_output(stdout);
        output.push_str(&join_output(stderr));

        debug!(
            "`{}` finished in {:.2}s with {:?}",
            spec.display(),
            start.elapsed().as_secs_f64(),
            status.code()
        );

        Invocation::Completed {
            success: status.success(),
            code: status.code(),
            output,
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf).ok();
        buf
    })
}

fn join_output(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
