use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SubterraConfig;
use crate::error::JobError;
use crate::progress::{self, ProgressSnapshot};
use crate::runner::{ProcessRunner, Runner};
use crate::stages::{self, SideTask, StageContext, mesh, simulate};
use crate::state_machine::{Action, Job, JobStatus, Parameters, StateMachine};
use crate::store::JobStore;
use crate::workspace::WorkspaceManager;

/// Number of jobs returned by [`JobOrchestrator::list`] when no limit is given.
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Detailed view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: Uuid,
    pub status: JobStatus,
    pub parameters: Value,
    pub has_mesh: bool,
    pub result_files: Vec<String>,
    pub plot_files: Vec<String>,
    pub mesh_plot: Option<String>,
    pub progress: Option<ProgressSnapshot>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub mesh_started_at: Option<DateTime<Utc>>,
    pub mesh_completed_at: Option<DateTime<Utc>>,
    pub sim_started_at: Option<DateTime<Utc>>,
    pub sim_completed_at: Option<DateTime<Utc>>,
    pub mesh_duration_ms: Option<i64>,
    pub sim_duration_ms: Option<i64>,
}

/// Row in a job listing. Progress is only read for running jobs.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub mesh_started_at: Option<DateTime<Utc>>,
    pub mesh_completed_at: Option<DateTime<Utc>>,
    pub sim_started_at: Option<DateTime<Utc>>,
    pub sim_completed_at: Option<DateTime<Utc>>,
    pub progress: Option<ProgressSnapshot>,
}

/// What a finished stage task hands back.
#[derive(Debug)]
pub struct StageOutcome {
    pub job: Job,
    /// Background plot task, present once a simulation completed.
    pub plot: Option<SideTask>,
}

/// Handle to a stage dispatched onto the worker pool.
#[derive(Debug)]
pub struct StageHandle {
    job_id: Uuid,
    action: Action,
    inner: JoinHandle<Result<StageOutcome, JobError>>,
}

impl StageHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the stage to finish and return its outcome.
    pub async fn wait(self) -> Result<StageOutcome, JobError> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) => Err(JobError::Io(io::Error::other(format!(
                "stage task for job {} aborted: {e}",
                self.job_id
            )))),
        }
    }
}

/// Drives jobs through mesh generation, simulation and plotting.
///
/// Cheap to clone; all clones share the store, the runner and the worker
/// pool.
pub struct JobOrchestrator<R: ProcessRunner = Runner> {
    ctx: StageContext<R>,
    permits: Arc<Semaphore>,
    log_tail_bytes: u64,
}

impl<R: ProcessRunner> Clone for JobOrchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            permits: Arc::clone(&self.permits),
            log_tail_bytes: self.log_tail_bytes,
        }
    }
}

impl JobOrchestrator<Runner> {
    /// Build an orchestrator with the runner strategy selected by `config`.
    pub fn from_config(config: &SubterraConfig, store: Arc<dyn JobStore>) -> Self {
        Self::new(config, Runner::from_config(&config.runner), store)
    }
}

impl<R: ProcessRunner> JobOrchestrator<R> {
    pub fn new(config: &SubterraConfig, runner: R, store: Arc<dyn JobStore>) -> Self {
        let ctx = StageContext::new(
            Arc::new(runner),
            store,
            WorkspaceManager::new(config.jobs_root.clone()),
            config.timeouts.clone(),
        );
        Self {
            ctx,
            permits: Arc::new(Semaphore::new(config.max_concurrent_stages.max(1))),
            log_tail_bytes: config.log_tail_bytes,
        }
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.ctx.workspace
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.ctx.store
    }

    /// Register a job for `parameters` in Pending with its workspace.
    ///
    /// The workspace is created first; if that fails nothing is stored.
    pub fn create_job(&self, parameters: Value) -> Result<Job, JobError> {
        let parameters = Parameters::new(parameters)?;
        let id = Uuid::new_v4();
        let work_dir = self.ctx.workspace.create(id, &parameters)?;

        let job = Job::new(id, parameters, work_dir);
        if let Err(e) = self.ctx.store.insert(&job) {
            if let Err(cleanup) = self.ctx.workspace.destroy(id) {
                tracing::warn!(job_id = %id, error = %cleanup, "Failed to remove orphaned workspace");
            }
            return Err(e);
        }

        tracing::info!(job_id = %id, "Job created");
        Ok(job)
    }

    /// Validate and dispatch mesh generation.
    pub fn start_mesh(&self, job_id: Uuid) -> Result<StageHandle, JobError> {
        let job = self.ctx.store.require(job_id)?;
        StateMachine::check(job.status, Action::StartMesh)?;

        let this = self.clone();
        Ok(self.dispatch(job_id, Action::StartMesh, async move {
            let job = this.run_mesh(job_id).await?;
            Ok(StageOutcome { job, plot: None })
        }))
    }

    /// Validate and dispatch the simulation.
    pub fn start_simulate(&self, job_id: Uuid) -> Result<StageHandle, JobError> {
        let job = self.ctx.store.require(job_id)?;
        simulate::ensure_ready(&self.ctx.workspace, &job)?;

        let this = self.clone();
        Ok(self.dispatch(job_id, Action::StartSimulate, async move {
            let (job, plot) = this.run_simulate(job_id).await?;
            Ok(StageOutcome {
                job,
                plot: Some(plot),
            })
        }))
    }

    /// Validate and dispatch mesh generation followed by the simulation.
    pub fn start_run(&self, job_id: Uuid) -> Result<StageHandle, JobError> {
        let job = self.ctx.store.require(job_id)?;
        StateMachine::check(job.status, Action::StartRun)?;

        let this = self.clone();
        Ok(self.dispatch(job_id, Action::StartRun, async move {
            let (job, plot) = this.run_chain(job_id).await?;
            Ok(StageOutcome {
                job,
                plot: Some(plot),
            })
        }))
    }

    pub async fn run_mesh(&self, job_id: Uuid) -> Result<Job, JobError> {
        mesh::run(&self.ctx, job_id).await
    }

    pub async fn run_simulate(&self, job_id: Uuid) -> Result<(Job, SideTask), JobError> {
        simulate::run(&self.ctx, job_id).await
    }

    /// Mesh then simulate in one task. The simulation is only attempted
    /// after a successful mesh.
    pub async fn run_chain(&self, job_id: Uuid) -> Result<(Job, SideTask), JobError> {
        let job = self.ctx.store.require(job_id)?;
        StateMachine::check(job.status, Action::StartRun)?;

        mesh::run(&self.ctx, job_id).await?;
        tracing::info!(job_id = %job_id, "Mesh done, continuing with simulation");
        simulate::run(&self.ctx, job_id).await
    }

    /// Re-render plots for a completed job. The job is never modified.
    pub async fn run_plot(&self, job_id: Uuid) -> Result<(), JobError> {
        let job = self.ctx.store.require(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(JobError::PreconditionFailed(format!(
                "Plots need a completed job. Current status: {}",
                job.status
            )));
        }

        let _permit = self.acquire().await?;
        let invocation = self.ctx.invocation(stages::Stage::Plot, &job);
        stages::plot::run(
            self.ctx.runner.as_ref(),
            &invocation,
            &self.ctx.workspace.log_file(job_id),
        )
        .await
    }

    /// Delete a job and its workspace. Refused while a stage is running.
    ///
    /// The status check and the record removal happen under the store lock,
    /// so no stage can start in between. If the workspace cannot be removed
    /// the record is put back.
    pub fn delete_job(&self, job_id: Uuid) -> Result<(), JobError> {
        let removed = self.ctx.store.remove(job_id, &mut |job| {
            StateMachine::check(job.status, Action::Delete).map(|_| ())
        })?;

        if let Err(e) = self.ctx.workspace.destroy(job_id) {
            tracing::error!(job_id = %job_id, error = %e, "Failed to remove workspace, restoring job");
            self.ctx.store.insert(&removed)?;
            return Err(e);
        }
        tracing::info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Fail a Meshing or Simulating job whose stage is no longer supervised.
    ///
    /// A stage is driven by the process that dispatched it. When that process
    /// dies the record stays running and every other action is refused; this
    /// moves it to Failed so it can be retried or deleted.
    pub fn abandon(&self, job_id: Uuid, reason: &str) -> Result<Job, JobError> {
        let message = format!("Abandoned: {reason}");
        let job = self
            .ctx
            .store
            .update(job_id, &mut |job| job.fail_with(&message))?;
        tracing::warn!(job_id = %job_id, reason, "Job abandoned");
        Ok(job)
    }

    pub fn get_job(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.ctx.store.require(job_id)
    }

    pub fn report(&self, job_id: Uuid) -> Result<JobReport, JobError> {
        let job = self.ctx.store.require(job_id)?;
        let ws = &self.ctx.workspace;
        Ok(JobReport {
            id: job.id,
            status: job.status,
            parameters: job.parameters.as_value().clone(),
            has_mesh: ws.has_mesh_artifacts(job.id),
            result_files: ws.list_result_files(job.id),
            plot_files: ws.list_plot_files(job.id),
            mesh_plot: ws.mesh_plot_file(job.id),
            progress: progress::read_progress(&ws.progress_file(job.id)),
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            mesh_started_at: job.mesh_started_at,
            mesh_completed_at: job.mesh_completed_at,
            sim_started_at: job.sim_started_at,
            sim_completed_at: job.sim_completed_at,
            mesh_duration_ms: job.mesh_duration_ms(),
            sim_duration_ms: job.sim_duration_ms(),
        })
    }

    /// Newest jobs first, at most `limit` of them.
    pub fn list(&self, limit: usize) -> Result<Vec<JobSummary>, JobError> {
        let jobs = self.ctx.store.list()?;
        Ok(jobs
            .into_iter()
            .take(limit)
            .map(|job| JobSummary {
                progress: if job.status.is_running() {
                    progress::read_progress(&self.ctx.workspace.progress_file(job.id))
                } else {
                    None
                },
                id: job.id,
                status: job.status,
                created_at: job.created_at,
                mesh_started_at: job.mesh_started_at,
                mesh_completed_at: job.mesh_completed_at,
                sim_started_at: job.sim_started_at,
                sim_completed_at: job.sim_completed_at,
            })
            .collect())
    }

    pub fn progress(&self, job_id: Uuid) -> Result<Option<ProgressSnapshot>, JobError> {
        self.ctx.store.require(job_id)?;
        Ok(progress::read_progress(
            &self.ctx.workspace.progress_file(job_id),
        ))
    }

    /// Tail of `job.log`, bounded by `max_bytes` or the configured default.
    pub fn logs(&self, job_id: Uuid, max_bytes: Option<u64>) -> Result<String, JobError> {
        self.ctx.store.require(job_id)?;
        Ok(progress::tail_log(
            &self.ctx.workspace.log_file(job_id),
            max_bytes.unwrap_or(self.log_tail_bytes),
        ))
    }

    /// Path of a downloadable result file. Only available once the job
    /// completed.
    pub fn result_file(&self, job_id: Uuid, name: &str) -> Result<PathBuf, JobError> {
        let job = self.ctx.store.require(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(JobError::PreconditionFailed(format!(
                "Results are not available. Current status: {}",
                job.status
            )));
        }
        self.ctx
            .workspace
            .resolve_result_file(job_id, name)
            .ok_or_else(|| {
                JobError::PreconditionFailed(format!("Result file not found: {name}"))
            })
    }

    fn dispatch<F>(&self, job_id: Uuid, action: Action, stage: F) -> StageHandle
    where
        F: Future<Output = Result<StageOutcome, JobError>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let inner = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| {
                JobError::Io(io::Error::other("worker pool is shut down"))
            })?;
            let result = stage.await;
            if let Err(e) = &result {
                tracing::warn!(job_id = %job_id, %action, error = %e, "Stage task ended with error");
            }
            result
        });
        tracing::debug!(job_id = %job_id, %action, "Stage dispatched");

        StageHandle {
            job_id,
            action,
            inner,
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, JobError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| JobError::Io(io::Error::other("worker pool is shut down")))
    }
}
