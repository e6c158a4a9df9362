//! CLI command implementations for spyke

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::CliResult;

pub mod generate;
pub mod init;
pub mod inspect;
pub mod run;

/// spyke - spike-triggered synaptic processing for one neuromorphic core
#[derive(Parser, Debug)]
#[command(
    name = "spyke",
    version,
    about = "Spike-triggered synaptic processing for one neuromorphic core",
    long_about = "spyke routes incoming spike keys through a prefix-mask table, fetches \
                  synaptic rows from row storage and accumulates their weights into a \
                  delay ring buffer, closing one timestep per timer tick."
)]
pub struct SpykeCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a random core image
    #[command(alias = "gen")]
    Generate(generate::GenerateCommand),

    /// Inspect a core image
    Inspect(inspect::InspectCommand),

    /// Run a core image over a spike schedule
    Run(run::RunCommand),

    /// Write a default configuration file
    Init(init::InitCommand),
}

impl SpykeCli {
    /// Execute the CLI command
    pub async fn execute(self) -> CliResult<()> {
        let config = self.config;

        match self.command {
            Commands::Generate(cmd) => cmd.execute().await,
            Commands::Inspect(cmd) => cmd.execute().await,
            Commands::Run(cmd) => cmd.execute(config).await,
            Commands::Init(cmd) => cmd.execute(config).await,
        }
    }
}
