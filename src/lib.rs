//! subterra: orchestration of subsurface simulation jobs.
//!
//! A job owns a workspace directory and moves through mesh generation,
//! simulation and plotting. Each stage runs an external program, either
//! in a container or as a local child process, and the job state machine
//! decides which stage may run next.

pub mod config;
pub mod error;
pub mod log;
pub mod orchestrator;
pub mod progress;
pub mod runner;
pub mod stages;
pub mod state_machine;
pub mod store;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::SubterraConfig;
pub use error::JobError;
pub use orchestrator::{JobOrchestrator, JobReport, JobSummary, StageHandle, StageOutcome};
pub use state_machine::{Job, JobStatus};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
