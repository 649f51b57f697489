//! ChainPulse CLI — run the real-time tip/fee/mempool hub.
//!
//! # Commands
//! ```text
//! chainpulse run        [--config chainpulse.yaml]   stream envelopes as JSON lines
//! chainpulse readiness  [--config chainpulse.yaml]   one-shot aggregated readiness
//! chainpulse ttl        --kind block --confirmations 10
//! chainpulse info
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chainpulse_bootstrap::{BootstrapService, HealthMonitor};
use chainpulse_core::{
    ttl_seconds, ChainSource, CircuitBreakerManager, EntityKind, NodeInfoSource, SharedCache, Topic,
};
use chainpulse_rpc::{ElectrumClient, NodeRpcClient};
use clap::{Parser, Subcommand};

mod cmd_run;
mod config;
mod logging;

use config::{ChainPulseConfig, Overrides};

#[derive(Parser)]
#[command(
    name = "chainpulse",
    about = "ChainPulse CLI: real-time chain tip, fee and mempool distribution",
    long_about = "
ChainPulse polls a full node (JSON-RPC) and an Electrum server, detects tip
changes and reorgs, and fans deduplicated events out to subscribers.

ENVIRONMENT VARIABLES:
  CHAINPULSE_CONFIG          Path to chainpulse.yaml
  CHAINPULSE_NODE_URL        Full-node RPC URL
  CHAINPULSE_NODE_USER       Full-node RPC user
  CHAINPULSE_NODE_PASSWORD   Full-node RPC password
  CHAINPULSE_ELECTRUM_ADDR   Electrum server host:port
  CHAINPULSE_LOG             Log level (RUST_LOG overrides)
",
    version
)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, global = true, env = "CHAINPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Full-node RPC URL
    #[arg(long, global = true, env = "CHAINPULSE_NODE_URL")]
    node_url: Option<String>,

    /// Full-node RPC user
    #[arg(long, global = true, env = "CHAINPULSE_NODE_USER")]
    node_user: Option<String>,

    /// Full-node RPC password
    #[arg(long, global = true, env = "CHAINPULSE_NODE_PASSWORD", hide_env_values = true)]
    node_password: Option<String>,

    /// Electrum server address (host:port)
    #[arg(long, global = true, env = "CHAINPULSE_ELECTRUM_ADDR")]
    electrum_addr: Option<String>,

    /// Log level
    #[arg(long, global = true, env = "CHAINPULSE_LOG")]
    log: Option<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start polling and print every event envelope as a JSON line
    Run {
        /// Only print these topics (e.g. tip.height,chain.reorg)
        #[arg(long, value_delimiter = ',')]
        topics: Vec<String>,
    },

    /// Aggregate readiness from both sources once and print it
    Readiness,

    /// Show the cache TTL for an entity kind
    Ttl {
        /// block | confirmedTransaction | unconfirmedTransaction | mempoolSummary | feeEstimates | addressSummary
        #[arg(long)]
        kind: String,
        /// Confirmation depth (blocks and confirmed transactions only)
        #[arg(long, default_value_t = 0)]
        confirmations: u64,
    },

    /// Print version, event topics and defaults
    Info,
}

/// Upstream adapters and the shared components wired from config.
pub(crate) struct Stack {
    pub config: ChainPulseConfig,
    pub node: Arc<NodeRpcClient>,
    pub cache: SharedCache,
    pub breakers: Arc<CircuitBreakerManager>,
    pub monitor: Arc<HealthMonitor>,
    pub bootstrap: BootstrapService,
}

impl Stack {
    fn build(config: ChainPulseConfig) -> Result<Self> {
        let node = Arc::new(
            NodeRpcClient::new(config.node.clone()).context("failed to build node RPC client")?,
        );
        let electrum = Arc::new(ElectrumClient::new(config.electrum.clone()));
        let cache = SharedCache::new();
        let breakers = Arc::new(CircuitBreakerManager::new(config.circuit_breaker.clone()));

        let sources: Vec<Arc<dyn ChainSource>> = vec![node.clone(), electrum.clone()];
        let monitor = Arc::new(HealthMonitor::new(config.health.clone(), sources));
        let bootstrap = BootstrapService::new(
            config.bootstrap.clone(),
            node.clone(),
            electrum.clone(),
            cache.clone(),
            breakers.clone(),
            monitor.table(),
        );

        Ok(Self {
            config,
            node,
            cache,
            breakers,
            monitor,
            bootstrap,
        })
    }

    pub fn node_info(&self) -> Arc<dyn NodeInfoSource> {
        self.node.clone()
    }
}

fn load_config(cli: &Cli) -> Result<ChainPulseConfig> {
    let mut config = match &cli.config {
        Some(path) => ChainPulseConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ChainPulseConfig::default(),
    };
    config.apply(Overrides {
        node_url: cli.node_url.clone(),
        node_user: cli.node_user.clone(),
        node_password: cli.node_password.clone(),
        electrum_addr: cli.electrum_addr.clone(),
        log_level: cli.log.clone(),
        json_logs: cli.json_logs,
    });
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ttl { ref kind, confirmations } => cmd_ttl(kind, confirmations),
        Commands::Info => cmd_info(),
        Commands::Readiness => {
            let config = load_config(&cli)?;
            logging::init_tracing(&config.log);
            cmd_readiness(Stack::build(config)?).await
        }
        Commands::Run { ref topics } => {
            let topics = topics
                .iter()
                .map(|t| t.parse::<Topic>())
                .collect::<Result<HashSet<Topic>, _>>()
                .context("invalid --topics")?;
            let config = load_config(&cli)?;
            logging::init_tracing(&config.log);
            cmd_run::run(Stack::build(config)?, topics).await
        }
    }
}

async fn cmd_readiness(stack: Stack) -> Result<()> {
    stack.monitor.probe_all().await;
    let response = stack.bootstrap.respond().await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.ok {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_ttl(kind: &str, confirmations: u64) -> Result<()> {
    let kind: EntityKind = kind.parse().map_err(anyhow::Error::msg)?;
    println!("{kind}: {}s", ttl_seconds(kind, confirmations));
    Ok(())
}

fn cmd_info() -> Result<()> {
    let defaults = ChainPulseConfig::default();
    println!("ChainPulse v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Sources:");
    println!("  node       JSON-RPC over HTTP  (default {})", defaults.node.url);
    println!("  electrum   Electrum over TCP   (default {})", defaults.electrum.addr);
    println!();
    println!("Event topics:");
    for topic in Topic::ALL {
        let note = if topic.is_replayable() { "" } else { "  (not replayed on join)" };
        println!("  {topic}{note}");
    }
    println!();
    println!("Poll intervals:");
    let p = &defaults.polling;
    println!("  tip {}ms, fees {}ms, mempool {}ms", p.tip_interval_ms, p.fees_interval_ms, p.mempool_interval_ms);
    println!("  price {}ms, fx {}ms", p.price_interval_ms, p.fx_interval_ms);
    println!(
        "  node info {}ms / {}ms / {}ms",
        p.blockchain_info_interval_ms, p.network_info_interval_ms, p.mining_info_interval_ms
    );
    println!();
    println!(
        "Circuit breaker: opens after {} failures, {}ms cooldown",
        defaults.circuit_breaker.failure_threshold, defaults.circuit_breaker.cooldown_ms
    );
    Ok(())
}
