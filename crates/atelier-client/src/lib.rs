//! # atelier-client
//!
//! Client runtime for Atelier: the local session identity, offline quota
//! gate and gallery from `atelier-store`, plus a typed HTTP client for
//! the server API, wired together behind [`Studio`].

pub mod api;
pub mod studio;

mod error;

pub use api::{ApiClient, GenerateResponse};
pub use error::{ClientError, Result};
pub use studio::Studio;
