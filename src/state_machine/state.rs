use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Lifecycle status of a simulation job.
///
/// Each job flows through: PENDING → MESHING → MESHED → SIMULATING → COMPLETED,
/// dropping into FAILED from either running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Meshing,
    Meshed,
    Simulating,
    Completed,
    Failed,
}

impl JobStatus {
    /// A stage executor is currently driving the job.
    pub fn is_running(self) -> bool {
        matches!(self, JobStatus::Meshing | JobStatus::Simulating)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Meshing => write!(f, "meshing"),
            JobStatus::Meshed => write!(f, "meshed"),
            JobStatus::Simulating => write!(f, "simulating"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Actions applied to a job. The first four are requested by callers; the
/// rest are internal and only issued by the stage executor driving the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    StartMesh,
    StartSimulate,
    /// Mesh, then simulate automatically on mesh success.
    StartRun,
    Delete,
    CompleteMesh,
    CompleteSimulation,
    Fail,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::StartMesh => write!(f, "start mesh generation"),
            Action::StartSimulate => write!(f, "start simulation"),
            Action::StartRun => write!(f, "start chained run"),
            Action::Delete => write!(f, "delete a running job"),
            Action::CompleteMesh => write!(f, "complete mesh generation"),
            Action::CompleteSimulation => write!(f, "complete simulation"),
            Action::Fail => write!(f, "record a stage failure"),
        }
    }
}

/// Legal transition table for jobs.
pub struct StateMachine;

impl StateMachine {
    /// Compute the status an action leads to.
    ///
    /// - `StartMesh` and `StartRun` are accepted from `Pending` and `Failed`
    ///   and both enter `Meshing`; the chained run adds no state of its own.
    /// - `StartSimulate` is accepted from `Meshed` only.
    /// - Stage completions are accepted from their own running state, and
    ///   `Fail` from either running state.
    /// - `Delete` is accepted from everything except the running states. The
    ///   job keeps its status until the record disappears.
    ///
    /// Anything else is rejected with the current status, leaving it untouched.
    pub fn check(status: JobStatus, action: Action) -> Result<JobStatus, JobError> {
        let next = match (status, action) {
            (JobStatus::Pending | JobStatus::Failed, Action::StartMesh | Action::StartRun) => {
                Some(JobStatus::Meshing)
            }
            (JobStatus::Meshing, Action::CompleteMesh) => Some(JobStatus::Meshed),
            (JobStatus::Meshed, Action::StartSimulate) => Some(JobStatus::Simulating),
            (JobStatus::Simulating, Action::CompleteSimulation) => Some(JobStatus::Completed),
            (JobStatus::Meshing | JobStatus::Simulating, Action::Fail) => Some(JobStatus::Failed),
            (s, Action::Delete) if !s.is_running() => Some(s),
            _ => None,
        };

        next.ok_or(JobError::InvalidTransition { status, action })
    }
}
