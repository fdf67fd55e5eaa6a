mod cli;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use cli::{Cli, Command};
use subterra::{FileJobStore, JobOrchestrator, StageHandle, SubterraConfig};

/// Records live next to the workspaces, under `<jobs_root>/.records`.
const RECORDS_DIR: &str = ".records";

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "subterra=debug"
    } else {
        "subterra=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = SubterraConfig::load(cli.config.as_deref())?;
    tracing::debug!(
        jobs_root = %config.jobs_root.display(),
        mode = ?config.runner.mode,
        "Configuration loaded",
    );

    let store = FileJobStore::open(config.jobs_root.join(RECORDS_DIR))
        .context("failed to open the job record store")?;
    let orch = JobOrchestrator::from_config(&config, Arc::new(store));

    match cli.command {
        Command::Create { params } => {
            let contents = std::fs::read_to_string(&params)
                .with_context(|| format!("failed to read {}", params.display()))?;
            let document: serde_json::Value = serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {}", params.display()))?;
            let job = orch.create_job(document)?;
            println!("{}", job.id);
        }
        Command::Mesh { id } => {
            let handle = orch.start_mesh(id)?;
            follow(&orch, handle, "mesh").await?;
        }
        Command::Simulate { id } => {
            let handle = orch.start_simulate(id)?;
            follow(&orch, handle, "simulate").await?;
        }
        Command::Run { id } => {
            let handle = orch.start_run(id)?;
            follow(&orch, handle, "run").await?;
        }
        Command::Plot { id } => {
            let progress = ui::StageProgress::start(format!("plot {}", short(id)));
            match orch.run_plot(id).await {
                Ok(()) => progress.finish(orch.get_job(id)?.status),
                Err(e) => {
                    progress.fail(&e);
                    return Err(e.into());
                }
            }
        }
        Command::Status { id } => ui::print_report(&orch.report(id)?),
        Command::List { limit } => ui::print_summaries(&orch.list(limit)?),
        Command::Logs { id, max_bytes } => print!("{}", orch.logs(id, max_bytes)?),
        Command::Delete { id } => {
            orch.delete_job(id)?;
            println!("Deleted {id}");
        }
        Command::Abandon { id, reason } => {
            let job = orch.abandon(id, &reason)?;
            println!("{id} → {}", job.status);
        }
    }

    Ok(())
}

/// Wait for a dispatched stage in the foreground, polling the job status
/// and `progress.json` for the spinner. A plot started by the stage is
/// awaited too, since the process exits right after.
///
/// Ctrl-C fails the job before exiting; nothing would supervise the stage
/// once this process is gone.
async fn follow(orch: &JobOrchestrator, handle: StageHandle, label: &str) -> Result<()> {
    let id = handle.job_id();
    let progress = ui::StageProgress::start(format!("{label} {}", short(id)));

    let wait = handle.wait();
    tokio::pin!(wait);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            _ = &mut interrupt => {
                let job = orch.abandon(id, "interrupted")?;
                progress.note("interrupted");
                anyhow::bail!("{label} interrupted, job {id} is now {}", job.status);
            }
            _ = ticker.tick() => {
                if let Ok(job) = orch.get_job(id) {
                    let snapshot = orch.progress(id).ok().flatten();
                    progress.update(job.status, snapshot.as_ref());
                }
            }
        }
    };

    match result {
        Ok(outcome) => {
            if let Some(plot) = outcome.plot {
                progress.note("rendering plots");
                plot.join().await;
            }
            progress.finish(outcome.job.status);
            Ok(())
        }
        Err(e) => {
            progress.fail(&e);
            Err(e.into())
        }
    }
}

fn short(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
