//! # spyke CLI
//!
//! Generate synthetic core images, inspect them, and drive the synaptic
//! core over a spike schedule.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spyke_cli::error::CliResult;
use spyke_cli::SpykeCli;

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = SpykeCli::parse();

    // Initialize logging with environment variable support
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = cli.execute().await {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
