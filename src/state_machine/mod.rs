mod job;
mod state;

pub use job::{Job, Parameters};
pub use state::{Action, JobStatus, StateMachine};
