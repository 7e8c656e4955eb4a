//! Vault server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use lnvault_core::AppConfig;
use lnvault_server::verify::{AcceptAllVerifier, NodeVerifier, RestNodeVerifier};
use lnvault_server::{AppState, boot, create_router, metrics};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variables the vault reads, besides the config file.
const ENV_VARS: &[&str] = &[
    "ENV",
    "PORT",
    "TIMEOUT",
    "VERIFY",
    "READ_API_KEY_10M",
    "READ_API_KEY_1H",
    "READ_API_KEY_1D",
    "WRITE_API_KEY",
    "CLOUD_PROVIDER",
    "AWS_DEFAULT_REGION",
    "GCP_PROJECT_ID",
];

/// lnvault - a credential vault for Lightning node access tokens
#[derive(Parser, Debug)]
#[command(name = "lnvaultd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LNVAULT_CONFIG",
        default_value = "config/vault.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // .env first so the figment environment provider sees it
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut figment = Figment::new();
    let config_path = std::path::Path::new(&args.config);
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    }
    let config: AppConfig = figment
        .merge(Env::raw().only(ENV_VARS))
        .extract()
        .context("failed to load configuration")?;

    tracing::info!(
        env = %config.env,
        "Macaroon service v{} started",
        env!("CARGO_PKG_VERSION")
    );

    metrics::register_metrics();

    let storage = lnvault_storage::from_config(&config)
        .await
        .context("failed to initialize backing store")?;

    let verifier: Arc<dyn NodeVerifier> = if config.is_local() {
        Arc::new(AcceptAllVerifier)
    } else {
        Arc::new(RestNodeVerifier::new())
    };

    let local = config.is_local();
    let port = config.port;
    let state = AppState::new(config, storage, verifier)?;

    // rebuild the index before accepting any traffic
    if !local {
        boot::initial_load(&state).await;
    }

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
