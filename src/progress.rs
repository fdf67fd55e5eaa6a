//! Non-blocking readers for files the external program and the stage
//! executors write into a workspace.
//!
//! Both readers degrade instead of failing: a missing, unreadable or
//! half-written file simply yields no data.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

/// Prefix prepended to a log that was cut to fit the byte bound.
pub const TRUNCATION_MARKER: &str = "... (truncated) ...\n";

/// Progress snapshot the external program periodically overwrites.
///
/// Missing or `null` fields fall back to their defaults individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_step: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_steps: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub percent: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse `progress.json`, returning `None` when the file is missing or
/// does not hold a JSON object.
pub fn read_progress(path: &Path) -> Option<ProgressSnapshot> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<ProgressSnapshot>(&contents) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::trace!(path = %path.display(), error = %e, "Ignoring unreadable progress file");
            None
        }
    }
}

/// Return at most `max_bytes` from the end of the log at `path`.
///
/// When the log is larger than the bound, a leading partial line is
/// dropped (as long as another line follows it) and the result is
/// prefixed with [`TRUNCATION_MARKER`]. The last byte of the file is
/// always the last byte returned, so a bound below one byte counts as one.
pub fn tail_log(path: &Path, max_bytes: u64) -> String {
    let max_bytes = max_bytes.max(1);
    let Ok(mut file) = File::open(path) else {
        return String::new();
    };
    let Ok(size) = file.metadata().map(|m| m.len()) else {
        return String::new();
    };

    if size <= max_bytes {
        let mut buf = Vec::with_capacity(size as usize);
        if file.read_to_end(&mut buf).is_err() {
            return String::new();
        }
        return String::from_utf8_lossy(&buf).into_owned();
    }

    let mut buf = Vec::with_capacity(max_bytes as usize);
    let read = file
        .seek(SeekFrom::Start(size - max_bytes))
        .and_then(|_| file.take(max_bytes).read_to_end(&mut buf));
    if read.is_err() {
        return String::new();
    }

    let start = match buf.iter().position(|&b| b == b'\n') {
        Some(idx) if idx + 1 < buf.len() => idx + 1,
        _ => 0,
    };

    let mut out = String::from(TRUNCATION_MARKER);
    out.push_str(&String::from_utf8_lossy(&buf[start..]));
    out
}
