//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.  Only the provider API key has no
//! usable default; without it every generation request fails upstream.

use std::net::SocketAddr;
use std::path::PathBuf;

use atelier_shared::constants::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_PROVIDER_BASE_URL, DEFAULT_PROVIDER_MODEL,
    DEFAULT_SYNC_INTERVAL_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Directory holding the mirror ledger (`gallery.json`).
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Directory where generated image artifacts are stored and served
    /// from under `/images`.
    /// Env: `IMAGES_DIR`
    /// Default: `./public/images`
    pub images_dir: PathBuf,

    /// Base URL of the generative-image provider.
    /// Env: `PROVIDER_BASE_URL`
    pub provider_base_url: String,

    /// Model used for generation.
    /// Env: `PROVIDER_MODEL`
    pub provider_model: String,

    /// Provider API key.  Never sent to clients.
    /// Env: `PROVIDER_API_KEY` (alias: `GOOGLE_API_KEY`)
    /// Default: empty.
    pub provider_api_key: String,

    /// Seconds between background mirror sync passes.  `0` disables the
    /// background task.
    /// Env: `SYNC_INTERVAL_SECS`
    /// Default: `300`
    pub sync_interval_secs: u64,

    /// Maximum request body size in bytes (20 MiB), sized for inline
    /// base64-encoded source images.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            data_dir: PathBuf::from("./data"),
            images_dir: PathBuf::from("./public/images"),
            provider_base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            provider_model: DEFAULT_PROVIDER_MODEL.to_string(),
            provider_api_key: String::new(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("IMAGES_DIR") {
            config.images_dir = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("PROVIDER_BASE_URL") {
            config.provider_base_url = url;
        }

        if let Ok(model) = std::env::var("PROVIDER_MODEL") {
            config.provider_model = model;
        }

        if let Ok(key) = std::env::var("PROVIDER_API_KEY") {
            config.provider_api_key = key;
        } else if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            config.provider_api_key = key;
        }

        if let Ok(val) = std::env::var("SYNC_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.sync_interval_secs = secs;
            } else {
                tracing::warn!(value = %val, "Invalid SYNC_INTERVAL_SECS, using default");
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
