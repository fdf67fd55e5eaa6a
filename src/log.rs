//! Append-only `job.log` shared by the stage executors of one job.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::JobError;
use crate::runner::ProcessOutput;

/// Append `text` and a trailing newline, creating the file and its parent
/// directory on first write.
pub fn append(path: &Path, text: &str) -> Result<(), JobError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Append the captured output of one process under `tag`.
///
/// stdout is always written (possibly empty); stderr only when non-empty.
/// A killed process gets an extra line so the log explains the missing
/// exit code.
pub fn append_output(path: &Path, tag: &str, output: &ProcessOutput) -> Result<(), JobError> {
    append(path, &format!("[{tag}] stdout:\n{}", output.stdout))?;
    if !output.stderr.is_empty() {
        append(path, &format!("[{tag}] stderr:\n{}", output.stderr))?;
    }
    if output.timed_out {
        append(
            path,
            &format!("[{tag}] killed after {}ms (timeout)", output.duration_ms),
        )?;
    }
    Ok(())
}
