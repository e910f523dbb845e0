use thiserror::Error;

use atelier_shared::LimitInfo;
use atelier_store::StoreError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Prompt is required")]
    EmptyPrompt,

    #[error("You've reached your free generation limit.")]
    QuotaExhausted(LimitInfo),

    /// The server answered with an error body; `message` is shown to the
    /// user verbatim.
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Network error. Please try again.")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
