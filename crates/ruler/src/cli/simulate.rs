use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use console::style;

use ruler::ruler_core::config::{LoggingConfig, RingConfig, RulerConfig};
use ruler::ruler_core::ring::{RingDesc, ShardingStrategy, TokenRangeStrategy};
use ruler::ruler_runtime::kv::InMemoryKv;
use ruler::Ruler;

/// Run several instances against one in-memory ring.
#[derive(Parser)]
pub struct SimulateCommand {
    /// Number of instances.
    #[arg(short = 'n', long, default_value_t = 3)]
    pub instances: usize,

    /// Tokens per instance.
    #[arg(short, long, default_value_t = 128)]
    pub tokens: usize,

    /// Seconds to keep the fleet running before stopping it.
    #[arg(short, long, default_value_t = 3)]
    pub seconds: u64,

    /// Log level.
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl SimulateCommand {
    /// Execute the simulate command.
    pub async fn execute(self) -> Result<()> {
        if self.instances == 0 {
            anyhow::bail!("At least one instance is required");
        }
        super::init_tracing(&LoggingConfig {
            level: self.log_level.clone(),
            json_format: false,
        });

        let store = Arc::new(InMemoryKv::new());
        let ring = RingConfig {
            num_tokens: self.tokens,
            heartbeat_period_ms: 200,
            ..Default::default()
        };

        let mut rulers = Vec::with_capacity(self.instances);
        for i in 0..self.instances {
            let mut config = RulerConfig {
                ring: ring.clone(),
                ..Default::default()
            };
            config.instance.id = Some(format!("ruler-{}", i));
            config.instance.addr = format!("127.0.0.1:{}", 9095 + i);

            let ruler = Ruler::builder().config(config).store(store.clone()).build()?;
            rulers.push(ruler);
        }

        let starts = futures::future::join_all(rulers.iter().map(|r| r.start())).await;
        for result in starts {
            result?;
        }
        println!(
            "\n  {} {} instances joined ring {}",
            style("✔").green(),
            rulers.len(),
            style(&ring.key).cyan()
        );

        tokio::time::sleep(Duration::from_secs(self.seconds)).await;

        let desc = rulers[0].ring().await?;
        let strategy = TokenRangeStrategy::new(ring.heartbeat_timeout());
        print_ring(&desc, &strategy, ring.heartbeat_timeout(), Utc::now());

        for ruler in &rulers {
            ruler.stop().await?;
        }

        let remaining = rulers[0].ring().await?.len();
        println!(
            "  {} all instances stopped, {} left in the ring\n",
            style("✔").green(),
            remaining
        );
        Ok(())
    }
}

fn print_ring(
    desc: &RingDesc,
    strategy: &dyn ShardingStrategy,
    heartbeat_timeout: Duration,
    now: DateTime<Utc>,
) {
    let stats = desc.stats(heartbeat_timeout, now);
    println!(
        "\n  {} instances, {} active, {} unhealthy, {} tokens\n",
        stats.total, stats.active, stats.unhealthy, stats.tokens
    );
    println!(
        "  {:<12} {:<10} {:>8} {:>10}",
        style("INSTANCE").bold(),
        style("STATE").bold(),
        style("TOKENS").bold(),
        style("OWNERSHIP").bold()
    );
    for (id, share) in ownership(desc, strategy, now) {
        let instance = &desc.instances[&id];
        println!(
            "  {:<12} {:<10} {:>8} {:>9.2}%",
            id,
            instance.state,
            instance.tokens.len(),
            share * 100.0
        );
    }
    println!();
}

/// Fraction of the hash space owned by each instance.
fn ownership(
    desc: &RingDesc,
    strategy: &dyn ShardingStrategy,
    now: DateTime<Utc>,
) -> Vec<(String, f64)> {
    let space = (u32::MAX as u64 + 1) as f64;
    desc.instances
        .keys()
        .map(|id| {
            let owned: u64 = strategy
                .owned_ranges(desc, id, now)
                .iter()
                .map(|r| r.size())
                .sum();
            (id.clone(), owned as f64 / space)
        })
        .collect()
}
