use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use ladder_proxy::config::Config;
use ladder_proxy::proxy::{run_metrics_server, ProxyServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Parser, Debug)]
#[command(name = "ladder-proxy", version, about = "Programmable HTTP reverse proxy")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "LADDER_CONFIG")]
    config: Option<PathBuf>,

    /// Override listen.port from the configuration
    #[arg(short, long, env = "LADDER_PORT")]
    port: Option<u16>,

    /// Log every modification step of each exchange
    #[arg(short, long)]
    verbose: bool,

    #[arg(long, value_enum, default_value = "pretty", env = "LADDER_LOG_FORMAT")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

fn load_config(args: &Args) -> Result<Config, anyhow::Error> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            info!("No config file given, running with defaults and no rules");
            Config::default()
        }
    };

    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if args.verbose {
        config.verbose = true;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_tracing(args.log_format);

    // Process-wide rustls crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = load_config(&args)?;
    info!(
        "Starting ladder-proxy on {}:{} ({} rules)",
        config.listen.address,
        config.listen.port,
        config.rules.len()
    );

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = format!("{}:{}", config.listen.address, config.metrics.port)
            .parse()
            .context("Invalid metrics address")?;
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics_addr).await {
                error!("Metrics server failed: {:#}", e);
            }
        });
    }

    let server = ProxyServer::new(config)?;
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }
    Ok(())
}
