//! Depot server binary.

use anyhow::{Context, Result};
use clap::Parser;
use depot_core::config::AppConfig;
use depot_server::admission::AllowAll;
use depot_server::{AppState, JanitorService, create_router};
use depot_metadata::SessionStore;
use depot_storage::{BlobStore, ChunkStaging};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depot - a chunked-upload file store
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DEPOT_CONFIG", default_value = "config/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Depot v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration; the file is optional since env vars can provide
    // or override everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}, using defaults and environment", args.config);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    // Initialize blob storage and verify connectivity before accepting
    // requests, so the server never reports healthy with unreachable
    // storage.
    let blobs = depot_storage::from_config(&config.storage)
        .await
        .context("failed to initialize blob storage")?;
    blobs
        .health_check()
        .await
        .context("blob storage health check failed")?;
    tracing::info!(backend = blobs.backend_name(), "Blob storage initialized");

    // Initialize chunk staging
    let staging = Arc::new(
        ChunkStaging::new(&config.staging.path)
            .await
            .context("failed to initialize chunk staging")?,
    );
    tracing::info!(path = %config.staging.path.display(), "Chunk staging initialized");

    // Initialize metadata store
    let metadata = depot_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store initialized");

    // Create application state
    let state = AppState::new(
        config.clone(),
        blobs.clone(),
        metadata.clone(),
        staging.clone(),
        Arc::new(AllowAll),
    );

    // Spawn the janitor sweeps. The orphan sweep runs once immediately,
    // since a prior crash may have left staging directories behind.
    let janitor = Arc::new(JanitorService::new(
        metadata,
        staging,
        blobs,
        config.janitor.clone(),
    ));
    let _janitor_handles = janitor.spawn();
    tracing::info!("Janitor sweeps spawned");

    // Create router
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // Start server with ConnectInfo for client address extraction
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
