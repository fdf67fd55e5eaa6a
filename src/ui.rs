//! Interface de terminal do subterra: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`StageProgress`] acompanha um estágio em
//! execução, exibindo o snapshot lido de `progress.json`.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use subterra::progress::ProgressSnapshot;
use subterra::{JobError, JobReport, JobStatus, JobSummary};

/// Indicador visual de um estágio em execução no terminal.
pub struct StageProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    // Rótulo fixo do estágio (ex.: "mesh 6f1c…").
    label: String,
    green: Style,
    red: Style,
}

impl StageProgress {
    /// Inicia o spinner com o rótulo do estágio.
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(label.clone());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            label,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Atualiza a mensagem com o status atual e o último snapshot.
    pub fn update(&self, status: JobStatus, snapshot: Option<&ProgressSnapshot>) {
        self.pb
            .set_message(format!("{} [{status}]{}", self.label, describe(snapshot)));
    }

    /// Troca a mensagem sem alterar o status exibido.
    pub fn note(&self, message: &str) {
        self.pb.set_message(format!("{}: {message}", self.label));
    }

    /// Finaliza o spinner com sucesso.
    pub fn finish(&self, status: JobStatus) {
        self.pb.finish_and_clear();
        println!("  {} {} → {status}", self.green.apply_to("✓"), self.label);
    }

    /// Finaliza o spinner exibindo o erro em vermelho.
    pub fn fail(&self, error: &JobError) {
        self.pb.finish_and_clear();
        println!("  {} {}: {error}", self.red.apply_to("✗"), self.label);
    }
}

// Texto curto do snapshot: " 25% refining (1/4)".
fn describe(snapshot: Option<&ProgressSnapshot>) -> String {
    let Some(s) = snapshot else {
        return String::new();
    };
    let mut text = format!(" {:.0}%", s.percent);
    if !s.message.is_empty() {
        text.push(' ');
        text.push_str(&s.message);
    }
    if s.total_steps > 0 {
        text.push_str(&format!(" ({}/{})", s.current_step, s.total_steps));
    }
    text
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        JobStatus::Meshing | JobStatus::Simulating => Style::new().cyan(),
        JobStatus::Pending | JobStatus::Meshed => Style::new().yellow(),
    }
}

/// Imprime o relatório de um job em JSON, com cabeçalho colorido.
pub fn print_report(report: &JobReport) {
    println!(
        "{}",
        status_style(report.status).apply_to(format!("─── Job {} ({}) ───", report.id, report.status))
    );
    println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
}

/// Imprime a listagem de jobs, um por linha.
pub fn print_summaries(summaries: &[JobSummary]) {
    if summaries.is_empty() {
        println!("No jobs.");
        return;
    }
    for s in summaries {
        println!(
            "{}  {:<11} {}{}",
            s.id,
            status_style(s.status).apply_to(s.status.to_string()),
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
            describe(s.progress.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_formats_snapshot() {
        let snapshot = ProgressSnapshot {
            phase: Some("meshing".into()),
            current_step: 1,
            total_steps: 4,
            percent: 25.0,
            message: "refining".into(),
        };
        assert_eq!(describe(Some(&snapshot)), " 25% refining (1/4)");
        assert_eq!(describe(None), "");
    }

    #[test]
    fn describe_skips_empty_parts() {
        let snapshot = ProgressSnapshot {
            phase: None,
            current_step: 0,
            total_steps: 0,
            percent: 99.6,
            message: String::new(),
        };
        assert_eq!(describe(Some(&snapshot)), " 100%");
    }
}
