use clap::Parser;
use eyre::Result;
use qmkeyd::config::AppConfig;
use qmkeyd::server::KeyServer;
use tracing_subscriber::{Layer, layer::SubscriberExt};

/// Hardware key broker
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Log every forwarded event and state transition
    #[arg(short, long)]
    debug: bool,
}

pub fn build_logger(debug: bool) -> Result<()> {
    // RUST_LOG wins; otherwise info, or debug with --debug
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if debug { "debug" } else { "info" })
    });

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(env_filter),
        ),
    )
    .map_err(|e| eyre::eyre!("Failed to initialize logger: {}", e))?;

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    build_logger(args.debug)?;
    tracing::info!("qmkeyd version: {}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Debug logging is enabled");

    let config = AppConfig::load_or_default();
    tracing::debug!("Active configuration: {:?}", config);

    let server = KeyServer::bind(&config).inspect_err(|e| tracing::error!("{}", e))?;
    server.run().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
