use clap::Parser;
use sift_agent::config::AgentConfig;
use sift_agent::report::{HttpTransport, Sender};
use sift_agent::{logging, metrics};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "sift-agent", version, about = "Ships intercepted API call reports")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "SIFT_CONFIG")]
    config: Option<String>,
    /// Overrides logging.level from the configuration
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AgentConfig::from_file(path)?,
        None => AgentConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    logging::init(&config.logging);

    // Compiled up front so rejected filters are reported at startup.
    let rules = config.collection_rules();
    let filters: usize = rules.iter().map(|rule| rule.filters().len()).sum();

    let transport = HttpTransport::new(&config.report.endpoint, config.report.timeout())?;
    info!(
        endpoint = transport.endpoint(),
        environment = %config.report.environment,
        rules = rules.len(),
        filters,
        max_body_size = config.bodies.max_body_size,
        "Starting sift agent"
    );
    let sender = Sender::start(config.report.sender_config(), Arc::new(transport));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, draining in-flight reports");
    sender.shutdown().await;

    debug!("final metrics:\n{}", metrics::collect_metrics());
    info!("Stopped");
    Ok(())
}
