//! Process execution for the external mesh/solver/plot programs.
//!
//! [`ProcessRunner`] is the seam the stage executors depend on. The
//! production implementation is [`Runner`], which picks one strategy from
//! the configuration at startup:
//!
//! - [`ContainerRunner`]: one auto-removing container per stage with the
//!   job workspace bind-mounted.
//! - [`LocalRunner`]: a direct child process that inherits the host
//!   environment (MPI, shared libraries).

mod container;
mod local;
pub mod subprocess;

pub use container::ContainerRunner;
pub use local::LocalRunner;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{RunnerConfig, RunnerMode};
use crate::error::JobError;
use crate::stages::Stage;

/// One request to run a stage program against a job workspace.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub stage: Stage,
    pub job_id: Uuid,
    pub work_dir: PathBuf,
    pub timeout: Duration,
}

/// Captured result of a finished (or killed) process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// `None` when the process was killed on timeout; `-1` when it was
    /// terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stderr followed by stdout, the diagnostic shown to clients.
    pub fn diagnostic(&self) -> String {
        let mut text = String::new();
        if self.timed_out {
            text.push_str(&format!("Process killed after {}ms (timeout)\n", self.duration_ms));
        }
        text.push_str(&self.stderr);
        text.push('\n');
        text.push_str(&self.stdout);
        text
    }
}

/// Runs one external program invocation to completion or timeout.
///
/// Implementations never interpret the program's output. A non-zero exit
/// is reported through [`ProcessOutput::success`]; `Err` is reserved for
/// failures to launch or supervise the process.
pub trait ProcessRunner: Send + Sync + 'static {
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<ProcessOutput, JobError>> + Send;
}

/// Strategy chosen once from [`RunnerConfig::mode`].
#[derive(Debug, Clone)]
pub enum Runner {
    Container(ContainerRunner),
    Local(LocalRunner),
}

impl Runner {
    pub fn from_config(config: &RunnerConfig) -> Self {
        match config.mode {
            RunnerMode::Docker => Runner::Container(ContainerRunner::new(config.clone())),
            RunnerMode::Local => Runner::Local(LocalRunner::new(config.clone())),
        }
    }
}

impl ProcessRunner for Runner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, JobError> {
        match self {
            Runner::Container(runner) => runner.run(invocation).await,
            Runner::Local(runner) => runner.run(invocation).await,
        }
    }
}

/// `mpirun -np N` for the simulation stage when more than one worker
/// process is configured.
fn launcher_prefix(config: &RunnerConfig, stage: Stage) -> Vec<String> {
    if stage == Stage::Simulate && config.mpi_processes > 1 {
        vec![
            config.mpi_launcher.clone(),
            "-np".to_string(),
            config.mpi_processes.to_string(),
        ]
    } else {
        Vec::new()
    }
}
