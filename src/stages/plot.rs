//! Result plotting. Best effort: a plot failure is reported to the caller
//! and logged, but this stage has no handle on the job store, so it can
//! never change a job's status.

use std::path::Path;
use std::sync::Arc;

use super::{SideTask, Stage, StageContext, execute};
use crate::error::JobError;
use crate::runner::{Invocation, ProcessRunner};
use crate::state_machine::Job;

/// Run the plotting program once.
pub async fn run<R: ProcessRunner>(
    runner: &R,
    invocation: &Invocation,
    log_file: &Path,
) -> Result<(), JobError> {
    let output = execute(runner, invocation, log_file).await?;
    if output.success() {
        tracing::info!(job_id = %invocation.job_id, "Plots generated");
        Ok(())
    } else {
        Err(JobError::ProcessFailed {
            stage: Stage::Plot,
            message: Stage::Plot.failure_message(&output),
        })
    }
}

/// Spawn the plot stage for `job` in the background.
pub fn spawn<R: ProcessRunner>(ctx: &StageContext<R>, job: &Job) -> SideTask {
    let runner = Arc::clone(&ctx.runner);
    let invocation = ctx.invocation(Stage::Plot, job);
    let log_file = ctx.workspace.log_file(job.id);

    SideTask::spawn("plot", job.id, async move {
        run(runner.as_ref(), &invocation, &log_file).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, Script, ScriptedRunner};

    #[tokio::test]
    async fn failure_is_reported_and_logged() {
        let fx = Fixture::new(ScriptedRunner::new().with(Stage::Plot, Script::exit(1, "bad data")));
        let job = fx.pending_job();
        let invocation = fx.ctx.invocation(Stage::Plot, &job);

        let err = run(fx.runner.as_ref(), &invocation, &fx.ctx.workspace.log_file(job.id))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("plot stage failed: Plot generation failed:"));
        assert!(fx.log(job.id).contains("[PLOT] stderr:\nbad data"));
    }

    #[tokio::test]
    async fn spawned_plot_writes_into_workspace() {
        let fx = Fixture::new(ScriptedRunner::new().with(
            Stage::Plot,
            Script::ok().writing("results/plots/b.png", "").writing("results/plots/a.png", ""),
        ));
        let job = fx.pending_job();

        spawn(&fx.ctx, &job).join().await;

        assert_eq!(fx.ctx.workspace.list_plot_files(job.id), ["a.png", "b.png"]);
        let invocation = &fx.runner.invocations()[0];
        assert_eq!(invocation.timeout, std::time::Duration::from_secs(600));
        assert_eq!(invocation.work_dir, job.work_dir);
    }
}
