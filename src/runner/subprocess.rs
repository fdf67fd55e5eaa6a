//! Shared subprocess management for both runner strategies.
//!
//! Each strategy builds a [`tokio::process::Command`] and delegates spawn,
//! output capture and timeout handling to [`run_command`].

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::ProcessOutput;
use crate::error::JobError;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// How long to keep collecting output after a killed process. A grandchild
/// may still hold the pipes open.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Spawn `cmd`, capture stdout/stderr and enforce `timeout`.
///
/// A process that outlives the timeout is killed and reported with
/// `timed_out = true` and no exit code; that is an outcome, not an error.
/// Only a failure to spawn or wait on the process is an error.
pub async fn run_command(cmd: &mut Command, timeout: Duration) -> Result<ProcessOutput, JobError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout = collect(stdout_task, None).await;
            let stderr = collect(stderr_task, None).await;
            Ok(ProcessOutput {
                exit_code: Some(status.code().unwrap_or(-1)),
                stdout,
                stderr,
                timed_out: false,
                duration_ms: start.elapsed().as_millis() as u64,
            })
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_elapsed) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill timed out process");
            }
            let stdout = collect(stdout_task, Some(OUTPUT_GRACE)).await;
            let stderr = collect(stderr_task, Some(OUTPUT_GRACE)).await;
            Ok(ProcessOutput {
                exit_code: None,
                stdout,
                stderr,
                timed_out: true,
                duration_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

/// Read an entire output stream, keeping at most [`MAX_OUTPUT_BYTES`].
///
/// Output past the cap is drained and discarded; closing the pipe early
/// would kill a verbose but otherwise healthy child with SIGPIPE.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut reader) = handle else {
        return buf;
    };

    let captured = (&mut reader).take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
    let drained = match captured {
        Ok(_) => tokio::io::copy(&mut reader, &mut tokio::io::sink()).await,
        Err(e) => Err(e),
    };
    match drained {
        Ok(0) => {}
        Ok(skipped) => {
            tracing::warn!(kept = buf.len(), skipped, "Process output exceeded capture limit");
        }
        Err(e) => tracing::warn!(error = %e, "Failed to read process output"),
    }
    buf
}

async fn collect(task: JoinHandle<Vec<u8>>, grace: Option<Duration>) -> String {
    let bytes = match grace {
        None => task.await.unwrap_or_default(),
        Some(grace) => {
            let abort = task.abort_handle();
            match tokio::time::timeout(grace, task).await {
                Ok(joined) => joined.unwrap_or_default(),
                Err(_) => {
                    abort.abort();
                    Vec::new()
                }
            }
        }
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_verbatim() {
        let output = run_command(
            &mut sh("echo 'Mesh generation complete.'; echo 'warning: coarse' >&2"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(output.success());
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "Mesh generation complete.\n");
        assert_eq!(output.stderr, "warning: coarse\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let output = run_command(&mut sh("echo boom >&2; exit 42"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(42));
        assert!(!output.timed_out);
        assert_eq!(output.stderr, "boom\n");
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let start = Instant::now();
        let output = run_command(&mut sh("echo started; exec sleep 30"), Duration::from_millis(300))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert!(!output.success());
        assert_eq!(output.exit_code, None);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_past_capture_limit_is_drained() {
        let output = run_command(
            &mut sh("head -c 12582912 /dev/zero; echo done >&2"),
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        assert!(output.success(), "exit code: {:?}", output.exit_code);
        assert_eq!(output.stdout.len() as u64, MAX_OUTPUT_BYTES);
        assert_eq!(output.stderr, "done\n");
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let mut cmd = Command::new("/definitely/not/a/real/program-xyz");
        let err = run_command(&mut cmd, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, JobError::Io(_)));
    }
}
