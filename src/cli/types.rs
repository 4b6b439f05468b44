//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::config::ConfigArgs;
use crate::cli::commands::history::HistoryArgs;
use crate::cli::commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "hubbard-scf")]
#[command(about = "Self-consistent Hubbard parameter orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file to use instead of .hubbard-scf/config.yaml
    #[arg(short, long, global = true, env = "HUBBARD_SCF_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start or resume a self-consistent run
    Run(RunArgs),

    /// Show recorded runs and their iterations
    History(HistoryArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),
}
