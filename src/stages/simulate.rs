use uuid::Uuid;

use super::{SideTask, Stage, StageContext, plot};
use crate::error::JobError;
use crate::runner::ProcessRunner;
use crate::state_machine::{Action, Job, StateMachine};
use crate::workspace::WorkspaceManager;

/// Check that `job` may enter the simulation stage: it must be Meshed and
/// its workspace must hold the mesh geometry and borehole locations.
pub fn ensure_ready(workspace: &WorkspaceManager, job: &Job) -> Result<(), JobError> {
    StateMachine::check(job.status, Action::StartSimulate)?;
    if !workspace.has_mesh_artifacts(job.id) {
        return Err(JobError::PreconditionFailed(
            "Mesh not generated. Run mesh generation first.".into(),
        ));
    }
    Ok(())
}

/// Run the solver for `job_id`.
///
/// Meshed → Simulating → Completed, or → Failed. On success the plot
/// stage is spawned as a [`SideTask`] and handed back to the caller, who
/// may drop it.
pub async fn run<R: ProcessRunner>(
    ctx: &StageContext<R>,
    job_id: Uuid,
) -> Result<(Job, SideTask), JobError> {
    let workspace = &ctx.workspace;
    let job = ctx.store.update(job_id, &mut |job| {
        ensure_ready(workspace, job)?;
        job.begin_simulating()
    })?;
    tracing::info!(job_id = %job_id, "Simulation started");

    let result = ctx.execute(Stage::Simulate, &job).await;
    ctx.settle(job_id, Stage::Simulate, result)?;

    let job = ctx.store.update(job_id, &mut |job| job.complete_simulation())?;
    tracing::info!(
        job_id = %job_id,
        elapsed_ms = job.sim_duration_ms(),
        results = ctx.workspace.list_result_files(job_id).len(),
        "Simulation completed",
    );

    let plots = plot::spawn(ctx, &job);
    Ok((job, plots))
}
