use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatbridge::config::{Args, BridgeConfig};
use chatbridge::error::BridgeError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("chatbridge {}", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::try_from(args).map_err(BridgeError::Config)?;
    if let Err(e) = chatbridge::run(config).await {
        error!("fatal: {e}");
        return Err(e.into());
    }
    Ok(())
}
