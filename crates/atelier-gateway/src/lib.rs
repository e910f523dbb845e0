//! # atelier-gateway
//!
//! Remote generation gateway: the typed HTTP client for the hosted
//! generative-image provider, plus the [`ImageGenerator`] trait the server
//! consumes so tests can substitute a local backend.

pub mod client;
pub mod types;

mod error;
mod wire;

pub use client::ProviderClient;
pub use error::GatewayError;
pub use types::{GenerateRequest, GeneratedImage, ImageGenerator};
