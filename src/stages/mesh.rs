use uuid::Uuid;

use super::{Stage, StageContext};
use crate::error::JobError;
use crate::runner::ProcessRunner;
use crate::state_machine::Job;

/// Generate the mesh for `job_id`.
///
/// Pending or Failed → Meshing → Meshed, or → Failed on a non-zero exit,
/// timeout or launch error. After a successful mesh the preview renderer
/// runs best-effort; its outcome never touches the job.
pub async fn run<R: ProcessRunner>(ctx: &StageContext<R>, job_id: Uuid) -> Result<Job, JobError> {
    let job = ctx.store.update(job_id, &mut |job| job.begin_meshing())?;
    tracing::info!(job_id = %job_id, "Mesh generation started");

    let result = ctx.execute(Stage::Mesh, &job).await;
    ctx.settle(job_id, Stage::Mesh, result)?;

    let job = ctx.store.update(job_id, &mut |job| job.complete_mesh())?;
    tracing::info!(
        job_id = %job_id,
        artifacts = ctx.workspace.has_mesh_artifacts(job_id),
        "Mesh generation completed",
    );

    render_preview(ctx, &job).await;
    Ok(job)
}

async fn render_preview<R: ProcessRunner>(ctx: &StageContext<R>, job: &Job) {
    match ctx.execute(Stage::MeshPlot, job).await {
        Ok(output) if output.success() => {
            tracing::debug!(job_id = %job.id, "Mesh preview rendered");
        }
        Ok(output) => {
            tracing::warn!(
                job_id = %job.id,
                exit_code = ?output.exit_code,
                timed_out = output.timed_out,
                "Mesh preview failed, continuing",
            );
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "Mesh preview could not run, continuing");
        }
    }
}
