//! Interface de linha de comando do subterra baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (create, mesh,
//! simulate, run, plot, status, list, logs, delete, abandon) e flags
//! globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use subterra::orchestrator::DEFAULT_LIST_LIMIT;

/// subterra: orquestrador de jobs de malha, simulação e gráficos.
#[derive(Debug, Parser)]
#[command(name = "subterra", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `subterra.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cria um job a partir de um documento JSON de parâmetros.
    Create {
        /// Arquivo JSON com os pares valor+unidade.
        #[arg(long)]
        params: PathBuf,
    },

    /// Gera a malha do job e aguarda o término.
    Mesh { id: Uuid },

    /// Executa a simulação de um job com malha gerada.
    Simulate { id: Uuid },

    /// Gera a malha e, em caso de sucesso, simula em seguida.
    Run { id: Uuid },

    /// Regera os gráficos de um job concluído.
    Plot { id: Uuid },

    /// Mostra o relatório detalhado de um job.
    Status { id: Uuid },

    /// Lista os jobs mais recentes.
    List {
        /// Número máximo de jobs exibidos.
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },

    /// Mostra o final do `job.log`.
    Logs {
        id: Uuid,

        /// Limite em bytes (padrão: `log_tail_bytes` da configuração).
        #[arg(long)]
        max_bytes: Option<u64>,
    },

    /// Remove o job e seu diretório de trabalho.
    Delete { id: Uuid },

    /// Marca como falho um job preso em meshing/simulating cujo processo
    /// de origem já terminou.
    Abandon {
        id: Uuid,

        /// Motivo registrado na mensagem de erro do job.
        #[arg(long, default_value = "dispatching process exited")]
        reason: String,
    },
}
