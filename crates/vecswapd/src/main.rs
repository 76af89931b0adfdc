//! vecswapd — the vecswap daemon.
//!
//! # Usage
//!
//! ```text
//! vecswapd --config /etc/vecswap/vecswap.toml --port 8470 --data-dir /var/lib/vecswap
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;

use vecswap_core::ManagerConfig;

#[derive(Parser)]
#[command(name = "vecswapd", about = "vecswap index lifecycle daemon")]
struct Cli {
    /// Path to vecswap.toml. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Port to listen on; overrides `server.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for persistent state; overrides `server.data_dir`.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vecswapd=debug,vecswap=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = match &cli.config {
        Some(path) => {
            let config = ManagerConfig::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            config
        }
        None => ManagerConfig::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.server.data_dir = data_dir;
    }

    vecswapd::run(config).await
}
