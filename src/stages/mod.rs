//! Stage executors: mesh generation, simulation and plotting.
//!
//! Each executor persists its entry transition, runs one external program
//! through the [`ProcessRunner`], appends the captured output to `job.log`
//! and persists the outcome. A failed stage always leaves the job in
//! Failed with a truncated diagnostic before the error propagates.

pub mod mesh;
pub mod plot;
pub mod side_task;
pub mod simulate;

pub use side_task::SideTask;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StageTimeouts;
use crate::error::{JobError, truncate_message};
use crate::log;
use crate::runner::{Invocation, ProcessOutput, ProcessRunner};
use crate::state_machine::Job;
use crate::store::JobStore;
use crate::workspace::WorkspaceManager;

/// One external program invocation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Mesh,
    /// Mesh preview rendering, run best-effort after a successful mesh.
    MeshPlot,
    Simulate,
    /// Result plotting, run best-effort after a successful simulation.
    Plot,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Mesh, Stage::MeshPlot, Stage::Simulate, Stage::Plot];

    /// Segment used in container names.
    pub fn container_segment(self) -> &'static str {
        match self {
            Stage::Mesh => "mesh",
            Stage::MeshPlot => "meshplot",
            Stage::Simulate => "sim",
            Stage::Plot => "plot",
        }
    }

    /// Block tag in `job.log`.
    pub fn tag(self) -> &'static str {
        match self {
            Stage::Mesh => "MESH",
            Stage::MeshPlot => "MESH-PLOT",
            Stage::Simulate => "SIMULATION",
            Stage::Plot => "PLOT",
        }
    }

    fn failure_prefix(self) -> &'static str {
        match self {
            Stage::Mesh => "Mesh generation failed:",
            Stage::MeshPlot => "Mesh plot failed:",
            Stage::Simulate => "Simulation failed:",
            Stage::Plot => "Plot generation failed:",
        }
    }

    /// Client-facing failure message for a finished but unsuccessful process.
    pub fn failure_message(self, output: &ProcessOutput) -> String {
        format!("{}\n{}", self.failure_prefix(), output.diagnostic())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Mesh => "mesh",
            Stage::MeshPlot => "mesh-plot",
            Stage::Simulate => "simulate",
            Stage::Plot => "plot",
        };
        f.write_str(name)
    }
}

/// Everything a stage executor needs, shared by all jobs.
pub struct StageContext<R> {
    pub runner: Arc<R>,
    pub store: Arc<dyn JobStore>,
    pub workspace: WorkspaceManager,
    pub timeouts: StageTimeouts,
}

impl<R> Clone for StageContext<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            store: Arc::clone(&self.store),
            workspace: self.workspace.clone(),
            timeouts: self.timeouts.clone(),
        }
    }
}

impl<R: ProcessRunner> StageContext<R> {
    pub fn new(
        runner: Arc<R>,
        store: Arc<dyn JobStore>,
        workspace: WorkspaceManager,
        timeouts: StageTimeouts,
    ) -> Self {
        Self {
            runner,
            store,
            workspace,
            timeouts,
        }
    }

    pub fn invocation(&self, stage: Stage, job: &Job) -> Invocation {
        Invocation {
            stage,
            job_id: job.id,
            work_dir: job.work_dir.clone(),
            timeout: self.timeouts.for_stage(stage),
        }
    }

    /// Run `stage` for `job` and append its output to the job log.
    async fn execute(&self, stage: Stage, job: &Job) -> Result<ProcessOutput, JobError> {
        let invocation = self.invocation(stage, job);
        execute(self.runner.as_ref(), &invocation, &self.workspace.log_file(job.id)).await
    }

    /// Persist Failed with the truncated `message` and build the error the
    /// executor returns.
    fn fail(&self, job_id: Uuid, stage: Stage, message: &str) -> JobError {
        let message = truncate_message(message);
        if let Err(e) = self.store.update(job_id, &mut |job| job.fail_with(&message)) {
            tracing::error!(job_id = %job_id, stage = %stage, error = %e, "Failed to persist stage failure");
        }
        tracing::warn!(job_id = %job_id, stage = %stage, "Stage failed");
        JobError::ProcessFailed { stage, message }
    }

    /// Turn a runner result into the stage outcome, persisting Failed on
    /// any non-success.
    fn settle(
        &self,
        job_id: Uuid,
        stage: Stage,
        result: Result<ProcessOutput, JobError>,
    ) -> Result<ProcessOutput, JobError> {
        match result {
            Ok(output) if output.success() => Ok(output),
            Ok(output) => Err(self.fail(job_id, stage, &stage.failure_message(&output))),
            Err(e) => Err(self.fail(
                job_id,
                stage,
                &format!("{}\n{e}", stage.failure_prefix()),
            )),
        }
    }
}

/// Run one invocation and record it in `log_file`.
///
/// A failed append of the process output fails the invocation, even when
/// the process itself succeeded.
async fn execute<R: ProcessRunner>(
    runner: &R,
    invocation: &Invocation,
    log_file: &Path,
) -> Result<ProcessOutput, JobError> {
    let stage = invocation.stage;
    let job_id = invocation.job_id;

    match runner.run(invocation).await {
        Ok(output) => {
            if let Err(e) = log::append_output(log_file, stage.tag(), &output) {
                tracing::error!(job_id = %job_id, stage = %stage, error = %e, "Failed to append to job log");
                return Err(e);
            }
            tracing::info!(
                job_id = %job_id,
                stage = %stage,
                exit_code = ?output.exit_code,
                timed_out = output.timed_out,
                elapsed_ms = output.duration_ms,
                "Stage process finished",
            );
            Ok(output)
        }
        Err(e) => {
            if let Err(log_err) = log::append(log_file, &format!("[{}] error: {e}", stage.tag())) {
                tracing::warn!(job_id = %job_id, stage = %stage, error = %log_err, "Failed to append to job log");
            }
            tracing::error!(job_id = %job_id, stage = %stage, error = %e, "Stage process could not run");
            Err(e)
        }
    }
}
