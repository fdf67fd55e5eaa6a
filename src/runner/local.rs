use tokio::process::Command;

use super::subprocess::run_command;
use super::{Invocation, ProcessOutput, ProcessRunner, launcher_prefix};
use crate::config::RunnerConfig;
use crate::error::JobError;
use crate::workspace::PARAMETER_FILE;

/// Runs each stage as a direct child process.
///
/// The child inherits the whole environment of this process; the solver
/// needs the MPI runtime and native libraries it finds there. Only `PATH`
/// may be replaced through `path_override`.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    config: RunnerConfig,
}

impl LocalRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Full argv (program first) for `invocation`.
    pub fn argv(&self, invocation: &Invocation) -> Vec<String> {
        let params = std::path::absolute(invocation.work_dir.join(PARAMETER_FILE))
            .unwrap_or_else(|_| invocation.work_dir.join(PARAMETER_FILE));

        let mut argv = launcher_prefix(&self.config, invocation.stage);
        argv.extend(self.config.programs.for_stage(invocation.stage).iter().cloned());
        argv.push("--params".to_string());
        argv.push(params.display().to_string());
        argv
    }
}

impl ProcessRunner for LocalRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, JobError> {
        let argv = self.argv(invocation);
        let Some((program, args)) = argv.split_first() else {
            return Err(JobError::PreconditionFailed(format!(
                "no program configured for the {} stage",
                invocation.stage
            )));
        };

        tracing::info!(
            job_id = %invocation.job_id,
            stage = %invocation.stage,
            program = %program,
            "Launching local process",
        );

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.config.project_root)
            .env("JOB_ID", invocation.job_id.to_string());
        if let Some(path) = &self.config.path_override {
            cmd.env("PATH", path);
        }

        run_command(&mut cmd, invocation.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerMode;
    use crate::stages::Stage;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    fn local_config() -> RunnerConfig {
        RunnerConfig {
            mode: RunnerMode::Local,
            mpi_processes: 1,
            ..Default::default()
        }
    }

    fn invocation(stage: Stage, work_dir: PathBuf) -> Invocation {
        Invocation {
            stage,
            job_id: Uuid::new_v4(),
            work_dir,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn argv_passes_full_parameter_path() {
        let runner = LocalRunner::new(local_config());
        let argv = runner.argv(&invocation(Stage::Mesh, PathBuf::from("/srv/jobs/abc")));
        assert_eq!(
            argv,
            ["python3", "-m", "src.mesh_runner", "--params", "/srv/jobs/abc/parameter.json"]
        );
    }

    #[test]
    fn argv_wraps_parallel_simulation() {
        let mut config = local_config();
        config.mpi_processes = 2;
        let runner = LocalRunner::new(config);
        let argv = runner.argv(&invocation(Stage::Simulate, PathBuf::from("/srv/jobs/abc")));
        assert_eq!(&argv[..4], ["mpirun", "-np", "2", "python3"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_program_with_params_and_inherited_env() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = local_config();
        config.project_root = tmp.path().to_path_buf();
        config.programs.plot = vec![
            "sh".into(),
            "-c".into(),
            r#"echo "$1 $2"; echo "job=$JOB_ID"; test -n "$PATH"; pwd >&2"#.into(),
            "plot".into(),
        ];
        let runner = LocalRunner::new(config);
        let inv = invocation(Stage::Plot, tmp.path().join("job"));

        let output = runner.run(&inv).await.unwrap();
        assert!(output.success(), "stderr: {}", output.stderr);
        let expected_params = tmp.path().join("job/parameter.json");
        assert!(output
            .stdout
            .contains(&format!("--params {}", expected_params.display())));
        assert!(output.stdout.contains(&format!("job={}", inv.job_id)));
        let cwd = std::fs::canonicalize(tmp.path()).unwrap();
        assert_eq!(
            std::fs::canonicalize(output.stderr.trim()).unwrap(),
            cwd
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reported_in_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = local_config();
        config.project_root = tmp.path().to_path_buf();
        config.programs.mesh = vec![
            "sh".into(),
            "-c".into(),
            "echo 'gmsh: invalid geometry' >&2; exit 3".into(),
            "mesh".into(),
        ];
        let runner = LocalRunner::new(config);

        let output = runner
            .run(&invocation(Stage::Mesh, tmp.path().join("job")))
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "gmsh: invalid geometry\n");
    }
}
