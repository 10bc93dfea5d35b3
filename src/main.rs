//! Command-line entry point (§6d).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shard_planner::client::HttpClusterClient;
use shard_planner::config::PlannerConfig;
use shard_planner::orchestrator;

#[derive(Debug, Parser)]
#[command(name = "shard-planner", about = "External shard-placement controller for a zone-aware search cluster")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "SHARD_PLANNER_CONFIG", default_value = "shard-planner.toml")]
    config: PathBuf,

    /// "pretty" for human-readable logs, "json" for structured logs.
    #[arg(long, env = "SHARD_PLANNER_LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    /// Address the Prometheus exporter listens on.
    #[arg(long, env = "SHARD_PLANNER_METRICS_ADDR", default_value = "0.0.0.0:9184")]
    metrics_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_format);

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(args.metrics_addr)
        .install()?;

    let config = PlannerConfig::load_from_file(&args.config)?;
    let client = HttpClusterClient::new(&config.elasticsearch.base_url())?;

    orchestrator::run(&client, &config).await?;
    Ok(())
}

fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
