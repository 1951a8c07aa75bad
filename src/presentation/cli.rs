// Command-line interface
use crate::application::analysis_request::AnalysisKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "instrument-faults",
    version,
    about = "Find software saturations and ADC overflows in archived telemetry"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Limiter outputs held at their software clip limit
    Saturations(RunArgs),
    /// Raw channels pinned at their representable extreme
    Overflows(RunArgs),
}

impl Commands {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            Commands::Saturations(_) => AnalysisKind::Saturations,
            Commands::Overflows(_) => AnalysisKind::Overflows,
        }
    }

    pub fn args(&self) -> &RunArgs {
        match self {
            Commands::Saturations(args) | Commands::Overflows(args) => args,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Configuration file (default: config/analysis.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Start time, RFC 3339 or seconds since the Unix epoch
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub end: Option<String>,
    #[arg(long)]
    pub nproc: Option<usize>,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Configuration keys set on the command line
    pub fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        if let Some(start) = &self.start {
            overrides.push(("analysis.start", start.clone()));
        }
        if let Some(end) = &self.end {
            overrides.push(("analysis.end", end.clone()));
        }
        if let Some(nproc) = self.nproc {
            overrides.push(("analysis.nproc", nproc.to_string()));
        }
        if let Some(dir) = &self.output_dir {
            overrides.push(("output.directory", dir.display().to_string()));
        }
        overrides
    }
}
