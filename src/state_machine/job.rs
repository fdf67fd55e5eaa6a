use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::state::{Action, JobStatus, StateMachine};
use crate::error::{JobError, truncate_message};

/// Validated physical parameter document, stored verbatim.
///
/// The document is opaque to the orchestrator apart from its shape: it
/// must be a JSON object (value+unit pairs keyed by parameter name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Value);

impl Parameters {
    pub fn new(document: Value) -> Result<Self, JobError> {
        match &document {
            Value::Object(map) if !map.is_empty() => Ok(Self(document)),
            Value::Object(_) => Err(JobError::InvalidParameters(
                "parameter document is empty".into(),
            )),
            other => Err(JobError::InvalidParameters(format!(
                "expected a JSON object, got {}",
                json_type_name(other)
            ))),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A single simulation job: one parameter set driven through
/// mesh generation, simulation and plotting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub parameters: Parameters,
    pub work_dir: PathBuf,
    pub error_message: Option<String>,
    pub status_history: Vec<JobStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub mesh_started_at: Option<DateTime<Utc>>,
    pub mesh_completed_at: Option<DateTime<Utc>>,
    pub sim_started_at: Option<DateTime<Utc>>,
    pub sim_completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid, parameters: Parameters, work_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            parameters,
            work_dir,
            error_message: None,
            status_history: Vec::new(),
            created_at: now,
            updated_at: now,
            mesh_started_at: None,
            mesh_completed_at: None,
            sim_started_at: None,
            sim_completed_at: None,
        }
    }

    /// Pending or Failed → Meshing.
    ///
    /// A retry from Failed starts a fresh attempt: the previous error and
    /// all later-stage timestamps are cleared.
    pub fn begin_meshing(&mut self) -> Result<(), JobError> {
        let now = self.advance(Action::StartMesh)?;
        self.error_message = None;
        self.mesh_started_at = Some(now);
        self.mesh_completed_at = None;
        self.sim_started_at = None;
        self.sim_completed_at = None;
        Ok(())
    }

    /// Meshing → Meshed.
    pub fn complete_mesh(&mut self) -> Result<(), JobError> {
        let now = self.advance(Action::CompleteMesh)?;
        self.mesh_completed_at = Some(now);
        Ok(())
    }

    /// Meshed → Simulating.
    pub fn begin_simulating(&mut self) -> Result<(), JobError> {
        let now = self.advance(Action::StartSimulate)?;
        self.sim_started_at = Some(now);
        self.sim_completed_at = None;
        Ok(())
    }

    /// Simulating → Completed.
    pub fn complete_simulation(&mut self) -> Result<(), JobError> {
        let now = self.advance(Action::CompleteSimulation)?;
        self.sim_completed_at = Some(now);
        Ok(())
    }

    /// Meshing or Simulating → Failed, storing the truncated diagnostic.
    pub fn fail_with(&mut self, message: &str) -> Result<(), JobError> {
        self.advance(Action::Fail)?;
        self.error_message = Some(truncate_message(message));
        Ok(())
    }

    pub fn mesh_duration_ms(&self) -> Option<i64> {
        duration_ms(self.mesh_started_at, self.mesh_completed_at)
    }

    pub fn sim_duration_ms(&self) -> Option<i64> {
        duration_ms(self.sim_started_at, self.sim_completed_at)
    }

    // Timestamps never go backwards even if the wall clock does.
    fn advance(&mut self, action: Action) -> Result<DateTime<Utc>, JobError> {
        let next = StateMachine::check(self.status, action)?;
        let now = Utc::now().max(self.updated_at);
        self.status_history.push(self.status);
        self.status = next;
        self.updated_at = now;
        Ok(now)
    }
}

fn duration_ms(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<i64> {
    match (start, end) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_job() -> Job {
        let params = Parameters::new(json!({"mesh": {"xCenter": {"value": 0, "unit": "m"}}}))
            .unwrap();
        Job::new(Uuid::new_v4(), params, PathBuf::from("/tmp/jobs/x"))
    }

    #[test]
    fn job_creation_defaults() {
        let job = make_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.status_history.is_empty());
        assert!(job.error_message.is_none());
        assert!(job.mesh_started_at.is_none());
        assert!(job.sim_completed_at.is_none());
    }

    #[test]
    fn parameters_must_be_a_non_empty_object() {
        assert!(Parameters::new(json!({"a": 1})).is_ok());
        assert!(matches!(
            Parameters::new(json!([1, 2])),
            Err(JobError::InvalidParameters(msg)) if msg.contains("an array")
        ));
        assert!(Parameters::new(json!({})).is_err());
        assert!(Parameters::new(Value::Null).is_err());
    }

    #[test]
    fn happy_path_walks_all_statuses() {
        let mut job = make_job();
        job.begin_meshing().unwrap();
        job.complete_mesh().unwrap();
        job.begin_simulating().unwrap();
        job.complete_simulation().unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.status_history,
            vec![
                JobStatus::Pending,
                JobStatus::Meshing,
                JobStatus::Meshed,
                JobStatus::Simulating
            ]
        );

        let mesh_started = job.mesh_started_at.unwrap();
        let mesh_completed = job.mesh_completed_at.unwrap();
        let sim_started = job.sim_started_at.unwrap();
        let sim_completed = job.sim_completed_at.unwrap();
        assert!(mesh_started <= mesh_completed);
        assert!(mesh_completed <= sim_started);
        assert!(sim_started <= sim_completed);
        assert!(job.mesh_duration_ms().unwrap() >= 0);
        assert!(job.sim_duration_ms().unwrap() >= 0);
    }

    #[test]
    fn illegal_transition_leaves_job_untouched() {
        let mut job = make_job();
        let before_history = job.status_history.clone();

        let err = job.begin_simulating().unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.status_history, before_history);
        assert!(job.sim_started_at.is_none());

        assert!(job.complete_mesh().is_err());
        assert!(job.fail_with("nope").is_err());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn failure_records_truncated_message() {
        let mut job = make_job();
        job.begin_meshing().unwrap();
        job.fail_with(&"e".repeat(6000)).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_ref().unwrap().chars().count(), 5000);
        assert!(job.mesh_started_at.is_some());
        assert!(job.mesh_completed_at.is_none());
        assert!(job.mesh_duration_ms().is_none());
    }

    #[test]
    fn retry_after_failure_starts_fresh_attempt() {
        let mut job = make_job();
        job.begin_meshing().unwrap();
        job.complete_mesh().unwrap();
        job.begin_simulating().unwrap();
        job.fail_with("solver diverged").unwrap();
        assert!(job.sim_started_at.is_some());

        job.begin_meshing().unwrap();
        assert_eq!(job.status, JobStatus::Meshing);
        assert!(job.error_message.is_none());
        assert!(job.mesh_completed_at.is_none());
        assert!(job.sim_started_at.is_none());
        assert!(job.sim_completed_at.is_none());
    }

    #[test]
    fn completed_is_terminal() {
        let mut job = make_job();
        job.begin_meshing().unwrap();
        job.complete_mesh().unwrap();
        job.begin_simulating().unwrap();
        job.complete_simulation().unwrap();

        assert!(job.begin_meshing().is_err());
        assert!(job.begin_simulating().is_err());
        assert!(job.fail_with("late failure").is_err());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn job_serialization_roundtrip() {
        let mut job = make_job();
        job.begin_meshing().unwrap();
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"status\":\"meshing\""));

        let deserialized: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.id, job.id);
        assert_eq!(deserialized.status, JobStatus::Meshing);
        assert_eq!(deserialized.parameters, job.parameters);
        assert_eq!(deserialized.mesh_started_at, job.mesh_started_at);
    }
}
