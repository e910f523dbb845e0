use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The prompt was empty after trimming.
    #[error("Prompt is required")]
    EmptyPrompt,

    /// The provider replied without any inline image payload.
    #[error("No image data returned.")]
    NoImage,

    /// The provider rejected the request.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Transport-level failure talking to the provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The returned image payload was not valid base64.
    #[error("Image decode error: {0}")]
    ImageDecode(#[from] base64::DecodeError),
}
