//! # atelier-shared
//!
//! Types and constants shared between the Atelier server, client and
//! storage crates.
//!
//! Everything that crosses a crate boundary lives here: the session and
//! gallery domain models, the quota wire shapes, and the helpers for image
//! data URLs and artifact file names.

pub mod constants;
pub mod images;
pub mod types;

mod error;

pub use error::ImageDataError;
pub use types::*;
