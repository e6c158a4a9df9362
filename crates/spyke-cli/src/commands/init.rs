//! Configuration file initialization

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};

/// Write a default configuration file
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Destination (defaults to --config, then the user config directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(short, long)]
    pub force: bool,
}

impl InitCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> CliResult<()> {
        let path = match self.output.or(config) {
            Some(path) => path,
            None => CliConfig::default_config_path()?,
        };
        if path.exists() && !self.force {
            return Err(CliError::invalid_args(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }

        CliConfig::default().save_to_file(&path)?;
        info!("Wrote default configuration to {}", path.display());
        println!("{}", path.display());
        Ok(())
    }
}
