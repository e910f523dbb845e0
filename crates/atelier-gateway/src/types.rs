use async_trait::async_trait;

use crate::error::GatewayError;

/// A generation request, either text-to-image or an edit of an uploaded
/// source image.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// User prompt describing the desired image.
    pub prompt: String,
    /// Source image as a base64 data URL, consulted only when `editing`.
    pub source_image: Option<String>,
    /// Whether to edit the source image instead of generating from
    /// scratch.
    pub editing: bool,
}

impl GenerateRequest {
    /// Plain text-to-image request.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            source_image: None,
            editing: false,
        }
    }

    /// Edit request against an uploaded source image.
    pub fn edit(prompt: impl Into<String>, source_image: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            source_image: Some(source_image.into()),
            editing: true,
        }
    }
}

/// Raw image produced by a generation backend.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Backend that turns prompts into images.
///
/// The production implementation is [`crate::ProviderClient`]; tests
/// substitute their own.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage, GatewayError>;
}
