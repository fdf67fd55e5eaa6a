use thiserror::Error;
use uuid::Uuid;

use crate::state_machine::{Action, JobStatus};
use crate::stages::Stage;

/// Maximum length (in characters) of an error message stored on a job.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 5000;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Cannot {action}. Current status: {status}")]
    InvalidTransition { status: JobStatus, action: Action },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("{stage} stage failed: {message}")]
    ProcessFailed { stage: Stage, message: String },

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JobError {
    /// Business failures are reported back to the caller synchronously and
    /// never change job state. Everything else is a system failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::InvalidTransition { .. }
            | JobError::PreconditionFailed(_)
            | JobError::NotFound(_)
            | JobError::InvalidParameters(_) => FailureKind::Business,
            JobError::ProcessFailed { .. } | JobError::Io(_) | JobError::Json(_) => {
                FailureKind::System
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            JobError::InvalidTransition { .. } | JobError::PreconditionFailed(_)
        )
    }
}

/// Classifies a job failure for caller-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Illegal action or unmet precondition; no state was changed.
    Business,
    /// External program failure or infrastructure error.
    System,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Business => write!(f, "Business"),
            FailureKind::System => write!(f, "System"),
        }
    }
}

/// Truncates `message` to [`MAX_ERROR_MESSAGE_CHARS`] characters.
pub fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_current_status() {
        let err = JobError::InvalidTransition {
            status: JobStatus::Simulating,
            action: Action::StartMesh,
        };
        assert_eq!(
            err.to_string(),
            "Cannot start mesh generation. Current status: simulating"
        );
        assert!(err.is_conflict());
        assert_eq!(err.kind(), FailureKind::Business);
    }

    #[test]
    fn process_failure_is_system_kind() {
        let err = JobError::ProcessFailed {
            stage: Stage::Mesh,
            message: "exit 1".into(),
        };
        assert_eq!(err.kind(), FailureKind::System);
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "mesh stage failed: exit 1");
    }

    #[test]
    fn truncate_message_bounds_length() {
        let long = "x".repeat(MAX_ERROR_MESSAGE_CHARS + 100);
        assert_eq!(truncate_message(&long).chars().count(), MAX_ERROR_MESSAGE_CHARS);
        assert_eq!(truncate_message("short"), "short");
    }

    #[test]
    fn truncate_message_respects_char_boundaries() {
        let long = "ü".repeat(MAX_ERROR_MESSAGE_CHARS + 1);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_CHARS);
        assert!(truncated.chars().all(|c| c == 'ü'));
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::Business.to_string(), "Business");
        assert_eq!(FailureKind::System.to_string(), "System");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JobError>();
    }
}
