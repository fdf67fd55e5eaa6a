//! Per-job filesystem workspaces.
//!
//! Every job owns `<root>/<id>/` exclusively:
//!
//! ```text
//! parameter.json   input, written once at creation
//! temp/            mesh artifacts
//! results/         simulation output, plots under results/plots/
//! job.log          append-only stage output
//! progress.json    written by the external program
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::error::JobError;
use crate::state_machine::Parameters;

pub const PARAMETER_FILE: &str = "parameter.json";
pub const LOG_FILE: &str = "job.log";
pub const PROGRESS_FILE: &str = "progress.json";
pub const TEMP_DIR: &str = "temp";
pub const RESULTS_DIR: &str = "results";
pub const PLOTS_DIR: &str = "plots";

/// Either geometry format satisfies the mesh requirement.
const MESH_FILES: [&str; 2] = ["temp_mesh.msh", "temp_mesh.xml"];
const LOCATIONS_FILE: &str = "locations.json";
const MESH_PLOT_FILE: &str = "mesh_plot.png";
const RESULT_EXTENSION: &str = "h5";
const PLOT_EXTENSION: &str = "png";

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    pub fn parameter_file(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(PARAMETER_FILE)
    }

    pub fn temp_dir(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(TEMP_DIR)
    }

    pub fn results_dir(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(RESULTS_DIR)
    }

    pub fn plots_dir(&self, job_id: Uuid) -> PathBuf {
        self.results_dir(job_id).join(PLOTS_DIR)
    }

    pub fn log_file(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(LOG_FILE)
    }

    pub fn progress_file(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(PROGRESS_FILE)
    }

    /// Create the directory scaffolding and write `parameter.json`.
    ///
    /// Safe to call again on an existing workspace; the parameter file is
    /// rewritten with the same content.
    pub fn create(&self, job_id: Uuid, parameters: &Parameters) -> Result<PathBuf, JobError> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(dir.join(TEMP_DIR))?;
        fs::create_dir_all(dir.join(RESULTS_DIR))?;

        let pretty = serde_json::to_string_pretty(parameters.as_value())?;
        fs::write(dir.join(PARAMETER_FILE), pretty)?;

        tracing::debug!(job_id = %job_id, dir = %dir.display(), "Workspace created");
        Ok(dir)
    }

    /// Remove the workspace tree. No-op if it does not exist.
    pub fn destroy(&self, job_id: Uuid) -> Result<(), JobError> {
        let dir = self.job_dir(job_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, job_id: Uuid) -> bool {
        self.job_dir(job_id).is_dir()
    }

    /// Mesh geometry (either format) and the borehole locations are both present.
    pub fn has_mesh_artifacts(&self, job_id: Uuid) -> bool {
        let temp = self.temp_dir(job_id);
        let has_geometry = MESH_FILES.iter().any(|name| temp.join(name).is_file());
        has_geometry && temp.join(LOCATIONS_FILE).is_file()
    }

    /// `*.h5` files under `results/` and its immediate subdirectories,
    /// relative to `results/`, sorted and de-duplicated.
    pub fn list_result_files(&self, job_id: Uuid) -> Vec<String> {
        let dir = self.results_dir(job_id);
        let mut files = BTreeSet::new();

        for entry in read_dir_sorted(&dir) {
            if entry.is_dir() {
                for nested in read_dir_sorted(&entry) {
                    if has_extension(&nested, RESULT_EXTENSION) {
                        if let Some(rel) = relative_display(&dir, &nested) {
                            files.insert(rel);
                        }
                    }
                }
            } else if has_extension(&entry, RESULT_EXTENSION) {
                if let Some(rel) = relative_display(&dir, &entry) {
                    files.insert(rel);
                }
            }
        }

        files.into_iter().collect()
    }

    /// `*.png` file names directly under `results/plots/`, sorted.
    pub fn list_plot_files(&self, job_id: Uuid) -> Vec<String> {
        let mut files: Vec<String> = read_dir_sorted(&self.plots_dir(job_id))
            .into_iter()
            .filter(|p| p.is_file() && has_extension(p, PLOT_EXTENSION))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        files.sort();
        files
    }

    /// Name of the mesh preview image, if the mesh-plot stage produced one.
    pub fn mesh_plot_file(&self, job_id: Uuid) -> Option<String> {
        self.temp_dir(job_id)
            .join(MESH_PLOT_FILE)
            .is_file()
            .then(|| MESH_PLOT_FILE.to_string())
    }

    /// Locate a result file by name, preferring one-level subdirectories
    /// over the top of `results/`.
    ///
    /// Names that would escape `results/` are rejected.
    pub fn resolve_result_file(&self, job_id: Uuid, name: &str) -> Option<PathBuf> {
        if !is_safe_relative(name) {
            return None;
        }

        let dir = self.results_dir(job_id);
        let nested = read_dir_sorted(&dir)
            .into_iter()
            .filter(|p| p.is_dir())
            .map(|sub| sub.join(name))
            .find(|candidate| candidate.is_file());

        nested.or_else(|| {
            let direct = dir.join(name);
            direct.is_file().then_some(direct)
        })
    }
}

fn read_dir_sorted(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    };
    entries.sort();
    entries
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

fn relative_display(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn is_safe_relative(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
