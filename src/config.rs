//! Configuração do subterra carregada a partir de `subterra.toml`.
//!
//! A struct [`SubterraConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente `SUBTERRA_*` têm precedência sobre o arquivo.
//!
//! O valor carregado é imutável: é construído uma vez na inicialização e
//! passado aos construtores do runner e do orquestrador.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::stages::Stage;

/// Arquivo de configuração procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "subterra.toml";

/// Configuração de nível superior carregada de `subterra.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubterraConfig {
    /// Diretório raiz onde cada job recebe `<jobs_root>/<id>`.
    #[serde(default = "default_jobs_root")]
    pub jobs_root: PathBuf,

    /// Número máximo de estágios executando ao mesmo tempo.
    #[serde(default = "default_max_concurrent_stages")]
    pub max_concurrent_stages: usize,

    /// Limite padrão em bytes ao ler o final do `job.log`.
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: u64,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub timeouts: StageTimeouts,
}

/// Estratégia de execução dos programas externos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerMode {
    /// Um contêiner isolado por estágio (produção).
    Docker,
    /// Processo filho direto no host (desenvolvimento).
    Local,
}

impl FromStr for RunnerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "docker" | "container" => Ok(RunnerMode::Docker),
            "local" => Ok(RunnerMode::Local),
            other => bail!("unknown runner mode: {other}"),
        }
    }
}

/// Parâmetros do runner de processos.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub mode: RunnerMode,
    /// Imagem com o gerador de malha, o solver e o código de plotagem.
    pub image: String,
    /// Prefixo dos nomes de contêiner: `<prefix>-<estágio>-<jobId>`.
    pub container_prefix: String,
    /// Ponto de montagem do workspace do job dentro do contêiner.
    pub container_mount: String,
    /// Binário do cliente docker.
    pub docker_binary: String,
    /// Diretório de trabalho dos processos locais.
    pub project_root: PathBuf,
    /// Substitui o `PATH` herdado no modo local, se definido.
    pub path_override: Option<String>,
    /// Processos paralelos do solver; 1 desativa o lançador MPI.
    pub mpi_processes: u32,
    pub mpi_launcher: String,
    pub programs: StagePrograms,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: RunnerMode::Docker,
            image: "subterra-fenics".to_string(),
            container_prefix: "subterra".to_string(),
            container_mount: "/subterra/job".to_string(),
            docker_binary: "docker".to_string(),
            project_root: PathBuf::from("."),
            path_override: None,
            mpi_processes: 4,
            mpi_launcher: "mpirun".to_string(),
            programs: StagePrograms::default(),
        }
    }
}

/// Linha de comando (argv sem `--params`) de cada programa externo.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StagePrograms {
    pub mesh: Vec<String>,
    pub mesh_plot: Vec<String>,
    pub simulate: Vec<String>,
    pub plot: Vec<String>,
}

// Os programas padrão são módulos Python executados com `python3 -m`.
fn python_module(module: &str) -> Vec<String> {
    vec!["python3".to_string(), "-m".to_string(), module.to_string()]
}

impl Default for StagePrograms {
    fn default() -> Self {
        Self {
            mesh: python_module("src.mesh_runner"),
            mesh_plot: python_module("src.mesh_plot_runner"),
            simulate: python_module("src.sim_runner"),
            plot: python_module("src.plot_runner"),
        }
    }
}

impl StagePrograms {
    pub fn for_stage(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Mesh => &self.mesh,
            Stage::MeshPlot => &self.mesh_plot,
            Stage::Simulate => &self.simulate,
            Stage::Plot => &self.plot,
        }
    }
}

/// Tempo máximo, em segundos, de cada estágio antes do kill forçado.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub mesh: u64,
    pub mesh_plot: u64,
    pub simulate: u64,
    pub plot: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            mesh: 600,
            mesh_plot: 120,
            simulate: 7200,
            plot: 600,
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        let secs = match stage {
            Stage::Mesh => self.mesh,
            Stage::MeshPlot => self.mesh_plot,
            Stage::Simulate => self.simulate,
            Stage::Plot => self.plot,
        };
        Duration::from_secs(secs)
    }
}

// Valor padrão para a raiz dos jobs: "jobs".
fn default_jobs_root() -> PathBuf {
    PathBuf::from("jobs")
}

// Valor padrão para estágios concorrentes: 4.
fn default_max_concurrent_stages() -> usize {
    4
}

// Valor padrão para o final do log: 500 KiB.
fn default_log_tail_bytes() -> u64 {
    512_000
}

impl Default for SubterraConfig {
    fn default() -> Self {
        Self {
            jobs_root: default_jobs_root(),
            max_concurrent_stages: default_max_concurrent_stages(),
            log_tail_bytes: default_log_tail_bytes(),
            runner: RunnerConfig::default(),
            timeouts: StageTimeouts::default(),
        }
    }
}

impl SubterraConfig {
    /// Carrega a configuração de `path` (ou `subterra.toml` no diretório atual).
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<SubterraConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Aplica as variáveis `SUBTERRA_*` obtidas via `lookup`.
    ///
    /// Valores vazios são ignorados.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(mode) = get("SUBTERRA_RUNNER_MODE") {
            self.runner.mode = mode.parse()?;
        }
        if let Some(image) = get("SUBTERRA_FENICS_IMAGE") {
            self.runner.image = image;
        }
        if let Some(cores) = get("SUBTERRA_MPI_CORES") {
            self.runner.mpi_processes = cores
                .trim()
                .parse()
                .with_context(|| format!("invalid SUBTERRA_MPI_CORES: {cores}"))?;
        }
        if let Some(root) = get("SUBTERRA_PROJECT_ROOT") {
            self.runner.project_root = PathBuf::from(root);
        }
        if let Some(root) = get("SUBTERRA_JOBS_ROOT") {
            self.jobs_root = PathBuf::from(root);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_stages == 0 {
            bail!("max_concurrent_stages must be at least 1");
        }
        for stage in Stage::ALL {
            if self.runner.programs.for_stage(stage).is_empty() {
                bail!("no program configured for the {stage} stage");
            }
        }
        Ok(())
    }
}
