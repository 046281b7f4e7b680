use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tracing::info;

use ruler::ruler_core::config::RulerConfig;
use ruler::Ruler;

/// Run one ruler instance.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "ruler.toml")]
    pub config: String,

    /// Instance ID (overrides config, defaults to the hostname).
    #[arg(long)]
    pub id: Option<String>,

    /// Advertised address (overrides config).
    #[arg(long)]
    pub addr: Option<String>,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        let config = self.load_config()?;
        super::init_tracing(&config.logging);

        let instance_id = config
            .instance
            .id
            .clone()
            .context("Instance ID could not be determined")?;

        println!();
        println!(
            "  {} v{}",
            style("RULER").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!();
        println!("  Instance   {}", style(&instance_id).bold());
        println!("  Address    {}", style(&config.instance.addr).cyan());
        println!(
            "  Ring       {} ({} tokens, heartbeat every {}ms)",
            style(&config.ring.key).cyan(),
            config.ring.num_tokens,
            config.ring.heartbeat_period_ms
        );
        println!(
            "  Forget     peers silent for more than {}s",
            config.ring.auto_forget_threshold().as_secs()
        );
        println!();

        info!(config = %self.config, "Configuration loaded");

        let ruler = Ruler::builder().config(config).build()?;

        // Blocks until Ctrl-C.
        ruler.run().await?;

        println!("\n  {} left the ring", style(&instance_id).bold());
        Ok(())
    }

    /// Load the configuration file and apply overrides.
    fn load_config(&self) -> Result<RulerConfig> {
        let path = Path::new(&self.config);
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", self.config);
        }

        let mut config = RulerConfig::from_file(path)?;

        if let Some(id) = &self.id {
            config.instance.id = Some(id.clone());
        }
        if let Some(addr) = &self.addr {
            config.instance.addr = addr.clone();
        }
        if config.instance.id.is_none() {
            config.instance.id = Some(default_instance_id());
        }

        Ok(config)
    }
}

fn default_instance_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
