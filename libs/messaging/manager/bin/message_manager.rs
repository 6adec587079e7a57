//! Message manager service
//!
//! Usage:
//!   message_manager
//!   message_manager --config config/message_manager.toml
//!   message_manager --addr 127.0.0.1 --port 7112 --timecode --disable-timing

use anyhow::{Context, Result};
use clap::Parser;
use manager_core::{Broker, ManagerConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "message_manager")]
#[command(about = "Real-time pub/sub message manager")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address (overrides transport.address)
    #[arg(short, long)]
    addr: Option<String>,

    /// Listen port (overrides transport.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the 56-byte timecode header variant
    #[arg(long)]
    timecode: bool,

    /// Disable sending of TIMING_MESSAGE
    #[arg(long)]
    disable_timing: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn load_config(&self) -> Result<ManagerConfig> {
        let mut config = match &self.config {
            Some(path) => ManagerConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path))?,
            None => ManagerConfig::default(),
        };

        if let Some(addr) = &self.addr {
            config.transport.address = addr.clone();
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if self.timecode {
            config.transport.timecode = true;
        }
        if self.disable_timing {
            config.diagnostics.timing_enabled = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = args.load_config().map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;

    info!(
        "Loaded configuration for {} (host {}, dynamic ids {}..{})",
        config.manager.name,
        config.manager.host_id,
        config.identity.dynamic_start,
        config.identity.max_modules
    );
    if config.delivery.logger_write_timeout_ms.is_none() {
        info!("Logger writes are unbounded: a stalled logger stalls the broker");
    }

    let broker = Broker::new(config)?;
    broker.serve(shutdown_signal()).await?;
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
