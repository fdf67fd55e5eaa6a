//! Persistence for job records.
//!
//! The record store is a plain keyed row store. All state changes go
//! through [`JobStore::update`], which applies a transition atomically:
//! either the closure succeeds and the new record is persisted, or nothing
//! changes. [`JobStore::remove`] gives deletion the same guarantee.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::error::JobError;
use crate::state_machine::Job;

pub trait JobStore: Send + Sync {
    fn insert(&self, job: &Job) -> Result<(), JobError>;

    fn get(&self, id: Uuid) -> Result<Option<Job>, JobError>;

    /// Read-modify-write of one record. Returns the persisted job.
    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Job) -> Result<(), JobError>,
    ) -> Result<Job, JobError>;

    /// Remove one record if `check` accepts it, atomically with respect to
    /// `update`. Returns the removed job.
    fn remove(
        &self,
        id: Uuid,
        check: &mut dyn FnMut(&Job) -> Result<(), JobError>,
    ) -> Result<Job, JobError>;

    /// All records, newest first.
    fn list(&self) -> Result<Vec<Job>, JobError>;

    fn require(&self, id: Uuid) -> Result<Job, JobError> {
        self.get(id)?.ok_or(JobError::NotFound(id))
    }
}

fn newest_first(mut jobs: Vec<Job>) -> Vec<Job> {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    jobs
}

/// Process-local store, used by tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> JobError {
    JobError::Io(io::Error::other("job store lock poisoned"))
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: &Job) -> Result<(), JobError> {
        self.jobs
            .write()
            .map_err(|_| poisoned())?
            .insert(job.id, job.clone());
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        Ok(self.jobs.read().map_err(|_| poisoned())?.get(&id).cloned())
    }

    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Job) -> Result<(), JobError>,
    ) -> Result<Job, JobError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let current = jobs.get(&id).ok_or(JobError::NotFound(id))?;
        let mut next = current.clone();
        apply(&mut next)?;
        jobs.insert(id, next.clone());
        Ok(next)
    }

    fn remove(
        &self,
        id: Uuid,
        check: &mut dyn FnMut(&Job) -> Result<(), JobError>,
    ) -> Result<Job, JobError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        check(jobs.get(&id).ok_or(JobError::NotFound(id))?)?;
        jobs.remove(&id).ok_or(JobError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<Job>, JobError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(newest_first(jobs.values().cloned().collect()))
    }
}

/// Name of the cross-process lock file inside the record directory.
const LOCK_FILE: &str = ".lock";
/// How long a writer waits for the lock before giving up.
const LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_RETRY: Duration = Duration::from_millis(5);
/// A lock file this old belongs to a writer that died while holding it.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);

/// Held while one writer owns the record directory. Dropping it removes
/// the lock file.
#[derive(Debug)]
struct DirLock {
    path: PathBuf,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self, JobError> {
        let path = dir.join(LOCK_FILE);
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let payload = format!(
                        "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                        std::process::id(),
                        Utc::now().to_rfc3339()
                    );
                    let _ = file.write_all(payload.as_bytes());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        tracing::warn!(path = %path.display(), "Removing stale job store lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() >= LOCK_WAIT {
                        return Err(JobError::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("job store is locked: {}", path.display()),
                        )));
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= STALE_LOCK_AFTER)
    }
}

/// One `<id>.json` file per record in a directory.
///
/// Writes go through a temporary file and a rename so a reader never sees
/// a half-written record. Writers are serialized by a process-local mutex
/// and, across processes sharing the directory, by a `.lock` file created
/// exclusively for the duration of each read-modify-write.
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, JobError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read_record(path: &Path) -> Result<Option<Job>, JobError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_record(&self, job: &Job) -> Result<(), JobError> {
        let path = self.record_path(job.id);
        let tmp = self
            .dir
            .join(format!(".{}.tmp.{}", job.id, std::process::id()));
        fs::write(&tmp, serde_json::to_vec_pretty(job)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Run `f` as the only writer of the directory, in this process and
    /// across processes.
    fn exclusive<T>(&self, f: impl FnOnce() -> Result<T, JobError>) -> Result<T, JobError> {
        let _local = self.write_lock.lock().map_err(|_| poisoned())?;
        let _dir = DirLock::acquire(&self.dir)?;
        f()
    }
}

impl JobStore for FileJobStore {
    fn insert(&self, job: &Job) -> Result<(), JobError> {
        self.exclusive(|| self.write_record(job))
    }

    fn get(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        Self::read_record(&self.record_path(id))
    }

    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Job) -> Result<(), JobError>,
    ) -> Result<Job, JobError> {
        self.exclusive(|| {
            let mut job =
                Self::read_record(&self.record_path(id))?.ok_or(JobError::NotFound(id))?;
            apply(&mut job)?;
            self.write_record(&job)?;
            Ok(job)
        })
    }

    fn remove(
        &self,
        id: Uuid,
        check: &mut dyn FnMut(&Job) -> Result<(), JobError>,
    ) -> Result<Job, JobError> {
        self.exclusive(|| {
            let path = self.record_path(id);
            let job = Self::read_record(&path)?.ok_or(JobError::NotFound(id))?;
            check(&job)?;
            fs::remove_file(&path)?;
            Ok(job)
        })
    }

    fn list(&self) -> Result<Vec<Job>, JobError> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                match Self::read_record(&path) {
                    Ok(Some(job)) => jobs.push(job),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
                    }
                }
            }
        }
        Ok(newest_first(jobs))
    }
}
