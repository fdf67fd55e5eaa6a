use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use uuid::Uuid;

use super::subprocess::run_command;
use super::{Invocation, ProcessOutput, ProcessRunner, launcher_prefix};
use crate::config::RunnerConfig;
use crate::error::JobError;
use crate::stages::Stage;
use crate::workspace::PARAMETER_FILE;

/// Upper bound for `docker rm -f`; the removal is best effort.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs each stage in a fresh, auto-removing container named
/// `<prefix>-<stage>-<jobId>` with the job workspace bind-mounted.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    config: RunnerConfig,
}

impl ContainerRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn container_name(&self, stage: Stage, job_id: Uuid) -> String {
        format!(
            "{}-{}-{}",
            self.config.container_prefix,
            stage.container_segment(),
            job_id
        )
    }

    /// Arguments passed to the docker client for `invocation`.
    pub fn run_args(&self, invocation: &Invocation) -> Vec<String> {
        let mount = self.config.container_mount.trim_end_matches('/');
        let host_dir = absolute(&invocation.work_dir);

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.container_name(invocation.stage, invocation.job_id),
            "-v".to_string(),
            format!("{}:{}", host_dir.display(), mount),
            "-e".to_string(),
            format!("JOB_ID={}", invocation.job_id),
            self.config.image.clone(),
        ];
        args.extend(launcher_prefix(&self.config, invocation.stage));
        args.extend(self.config.programs.for_stage(invocation.stage).iter().cloned());
        args.push("--params".to_string());
        args.push(format!("{mount}/{PARAMETER_FILE}"));
        args
    }

    /// Force-remove a container by name, ignoring every failure (the
    /// container usually does not exist).
    async fn remove_container(&self, name: &str) {
        let mut cmd = Command::new(&self.config.docker_binary);
        cmd.args(["rm", "-f", name]);
        match run_command(&mut cmd, REMOVE_TIMEOUT).await {
            Ok(output) if output.success() => {
                tracing::debug!(container = %name, "Removed container");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(container = %name, error = %e, "Container removal failed");
            }
        }
    }
}

impl ProcessRunner for ContainerRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, JobError> {
        let name = self.container_name(invocation.stage, invocation.job_id);

        // A crashed earlier run may have left a container with this name.
        self.remove_container(&name).await;

        let args = self.run_args(invocation);
        tracing::info!(
            job_id = %invocation.job_id,
            stage = %invocation.stage,
            container = %name,
            image = %self.config.image,
            "Launching container",
        );

        let mut cmd = Command::new(&self.config.docker_binary);
        cmd.args(&args);
        let output = run_command(&mut cmd, invocation.timeout).await?;

        if output.timed_out {
            // Killing the client leaves the container running.
            tracing::warn!(
                job_id = %invocation.job_id,
                container = %name,
                timeout_secs = invocation.timeout.as_secs(),
                "Container timed out, removing",
            );
            self.remove_container(&name).await;
        }

        Ok(output)
    }
}

fn absolute(path: &std::path::Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(stage: Stage) -> Invocation {
        Invocation {
            stage,
            job_id: Uuid::nil(),
            work_dir: PathBuf::from("/srv/jobs/00000000-0000-0000-0000-000000000000"),
            timeout: Duration::from_secs(600),
        }
    }

    #[test]
    fn container_name_is_deterministic() {
        let runner = ContainerRunner::new(RunnerConfig::default());
        let id = Uuid::nil();
        assert_eq!(
            runner.container_name(Stage::Mesh, id),
            format!("subterra-mesh-{id}")
        );
        assert_eq!(
            runner.container_name(Stage::Simulate, id),
            format!("subterra-sim-{id}")
        );
        assert_eq!(
            runner.container_name(Stage::MeshPlot, id),
            format!("subterra-meshplot-{id}")
        );
    }

    #[test]
    fn mesh_args_mount_workspace_and_use_relative_params() {
        let runner = ContainerRunner::new(RunnerConfig::default());
        let args = runner.run_args(&invocation(Stage::Mesh));
        let id = Uuid::nil();

        assert_eq!(
            args,
            vec![
                "run".to_string(),
                "--rm".into(),
                "--name".into(),
                format!("subterra-mesh-{id}"),
                "-v".into(),
                format!("/srv/jobs/{id}:/subterra/job"),
                "-e".into(),
                format!("JOB_ID={id}"),
                "subterra-fenics".into(),
                "python3".into(),
                "-m".into(),
                "src.mesh_runner".into(),
                "--params".into(),
                "/subterra/job/parameter.json".into(),
            ]
        );
    }

    #[test]
    fn simulate_args_use_mpi_launcher() {
        let mut config = RunnerConfig::default();
        config.mpi_processes = 8;
        let runner = ContainerRunner::new(config);
        let args = runner.run_args(&invocation(Stage::Simulate));

        let image_pos = args.iter().position(|a| a == "subterra-fenics").unwrap();
        assert_eq!(
            &args[image_pos + 1..image_pos + 7],
            ["mpirun", "-np", "8", "python3", "-m", "src.sim_runner"]
        );
        assert_eq!(args.last().unwrap(), "/subterra/job/parameter.json");
    }

    #[test]
    fn trailing_slash_in_mount_is_ignored() {
        let mut config = RunnerConfig::default();
        config.container_mount = "/work/".into();
        let runner = ContainerRunner::new(config);
        let args = runner.run_args(&invocation(Stage::Plot));
        assert_eq!(args.last().unwrap(), "/work/parameter.json");
        assert!(args.iter().any(|a| a.ends_with(":/work")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_uses_configured_client_binary() {
        // `echo` stands in for the docker client and prints its arguments.
        let mut config = RunnerConfig::default();
        config.docker_binary = "echo".into();
        let runner = ContainerRunner::new(config);

        let output = runner.run(&invocation(Stage::Plot)).await.unwrap();
        assert!(output.success());
        assert!(output.stdout.starts_with("run --rm --name subterra-plot-"));
        assert!(output.stdout.contains("src.plot_runner --params /subterra/job/parameter.json"));
    }
}
