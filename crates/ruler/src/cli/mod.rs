mod run;
mod simulate;

pub use run::RunCommand;
pub use simulate::SimulateCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ruler::ruler_core::config::LoggingConfig;

/// Ruler - ring membership for rule evaluation workers
#[derive(Parser)]
#[command(name = "ruler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run one ruler instance until interrupted.
    Run(RunCommand),

    /// Run several instances on a shared in-memory ring and report ownership.
    Simulate(SimulateCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Simulate(cmd) => cmd.execute().await,
        }
    }
}

/// Initialize tracing. `RUST_LOG` takes precedence over the configured level.
pub(crate) fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if logging.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("Tracing already initialized: {}", e);
    }
}
