//! # atelier-server
//!
//! Generation backend for Atelier.
//!
//! This binary provides:
//! - **REST API** (axum) for image generation, the gallery mirror, and
//!   health checks
//! - **Provider gateway** that forwards prompts to the configured
//!   generative-image model and decodes the returned bytes
//! - **Artifact hosting**: every generated image is written to disk and
//!   served back under `/images/<filename>`
//! - **Fallback generation quota** for clients that never present a user id
//! - **Background gallery sync** that backfills ledger entries for image
//!   files the ledger lost track of

mod api;
mod artifacts;
mod config;
mod error;
mod fallback_quota;
mod mirror;
mod sync;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use atelier_gateway::{ImageGenerator, ProviderClient};

use crate::api::AppState;
use crate::artifacts::ArtifactStore;
use crate::config::ServerConfig;
use crate::fallback_quota::FallbackQuota;
use crate::mirror::MirrorStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,atelier_server=debug")),
        )
        .init();

    info!("Starting Atelier server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        data_dir = %config.data_dir.display(),
        images_dir = %config.images_dir.display(),
        model = %config.provider_model,
        sync_interval_secs = config.sync_interval_secs,
        "Loaded configuration"
    );
    if config.provider_api_key.is_empty() {
        warn!("No provider API key configured; generation requests will fail");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Gallery mirror (creates the data dir and an empty ledger if missing)
    let mirror = Arc::new(MirrorStore::new(config.data_dir.join("gallery.json")).await?);

    // Artifact store (creates the images dir if missing)
    let artifacts = Arc::new(ArtifactStore::new(config.images_dir.clone()).await?);

    // Fallback quota: 3 generations per key, for the lifetime of the process
    let quota = FallbackQuota::default();

    // Provider gateway
    let generator: Arc<dyn ImageGenerator> = Arc::new(ProviderClient::new(
        &config.provider_base_url,
        &config.provider_model,
        &config.provider_api_key,
    )?);

    let app_state = AppState {
        mirror: mirror.clone(),
        artifacts: artifacts.clone(),
        quota,
        generator,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic gallery sync: repair ledger entries for orphaned image files
    if config.sync_interval_secs > 0 {
        let sync_mirror = mirror.clone();
        let sync_artifacts = artifacts.clone();
        let secs = config.sync_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
            // The first tick fires immediately; skip it so startup stays quiet.
            interval.tick().await;
            loop {
                interval.tick().await;
                match sync::sync_missing(&sync_mirror, &sync_artifacts).await {
                    Ok(added) if !added.is_empty() => {
                        info!(count = added.len(), "Background sync backfilled entries");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Background sync failed"),
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
