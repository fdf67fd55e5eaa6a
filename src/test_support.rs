//! Scripted [`ProcessRunner`] and fixtures shared by the executor and
//! orchestrator tests.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use crate::config::StageTimeouts;
use crate::error::JobError;
use crate::runner::{Invocation, ProcessOutput, ProcessRunner};
use crate::stages::{Stage, StageContext};
use crate::state_machine::{Job, Parameters};
use crate::store::{JobStore, MemoryJobStore};
use crate::workspace::WorkspaceManager;

/// What the fake program does for one stage.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub spawn_error: bool,
    /// Files written relative to the job workspace before "exiting".
    pub writes: Vec<(String, String)>,
    pub delay: Option<Duration>,
}

impl Script {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        Self {
            exit_code: code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn writing(mut self, path: &str, contents: &str) -> Self {
        self.writes.push((path.into(), contents.into()));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A mesh program that produces both required artifacts.
    pub fn mesh_ok() -> Self {
        Self::ok()
            .writing("temp/temp_mesh.msh", "$MeshFormat")
            .writing("temp/locations.json", "[]")
    }
}

/// Runner that replays a [`Script`] per stage and records every call.
/// Stages without a script succeed silently.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<Stage, Script>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, stage: Stage, script: Script) -> Self {
        self.set(stage, script);
        self
    }

    pub fn set(&self, stage: Stage, script: Script) {
        self.scripts.lock().unwrap().insert(stage, script);
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().iter().map(|i| i.stage).collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, JobError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&invocation.stage)
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if script.spawn_error {
            return Err(JobError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "program not found",
            )));
        }
        for (rel, contents) in &script.writes {
            let path = invocation.work_dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        Ok(ProcessOutput {
            exit_code: (!script.timed_out).then_some(script.exit_code),
            stdout: script.stdout,
            stderr: script.stderr,
            timed_out: script.timed_out,
            duration_ms: 5,
        })
    }
}

/// A context over a temporary workspace root and an in-memory store.
pub struct Fixture {
    pub tmp: TempDir,
    pub runner: Arc<ScriptedRunner>,
    pub store: Arc<MemoryJobStore>,
    pub ctx: StageContext<ScriptedRunner>,
}

impl Fixture {
    pub fn new(runner: ScriptedRunner) -> Self {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(runner);
        let store = Arc::new(MemoryJobStore::new());
        let ctx = StageContext::new(
            Arc::clone(&runner),
            store.clone() as Arc<dyn JobStore>,
            WorkspaceManager::new(tmp.path().join("jobs")),
            StageTimeouts::default(),
        );
        Self {
            tmp,
            runner,
            store,
            ctx,
        }
    }

    /// Insert a Pending job with a real workspace.
    pub fn pending_job(&self) -> Job {
        let id = Uuid::new_v4();
        let params = sample_parameters();
        let dir = self.ctx.workspace.create(id, &params).unwrap();
        let job = Job::new(id, params, dir);
        self.store.insert(&job).unwrap();
        job
    }

    pub fn job(&self, id: Uuid) -> Job {
        self.store.require(id).unwrap()
    }

    pub fn log(&self, id: Uuid) -> String {
        fs::read_to_string(self.ctx.workspace.log_file(id)).unwrap_or_default()
    }
}

pub fn sample_parameters() -> Parameters {
    Parameters::new(json!({
        "mesh": {"xCenter": {"value": 0.0, "unit": "m"}},
        "simulation": {"duration": {"value": 30, "unit": "year"}}
    }))
    .unwrap()
}
