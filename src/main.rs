use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use axum::http::Method;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use sonic_bridge::{app, AppState, ServerConfig};

/// Telephony voice bridge to Amazon Nova Sonic
#[derive(Parser, Debug)]
#[command(name = "sonic-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let address = config.address();
    info!(
        model_id = %config.model_id,
        region = %config.region,
        voice_id = %config.voice_id,
        "starting server on {address}"
    );

    // Resolves credentials once; sessions and calls share nothing else.
    let app_state = AppState::new(config).await;

    // Health surface only; the audio WebSocket is not a browser client.
    let cors_layer = CorsLayer::new().allow_methods([Method::GET]);

    let router = app(app_state).layer(cors_layer);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let listener = TcpListener::bind(&socket_addr).await?;
    info!("server listening on http://{socket_addr}");
    axum::serve(listener, router).await?;

    Ok(())
}
