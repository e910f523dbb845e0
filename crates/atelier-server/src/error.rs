use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use atelier_gateway::GatewayError;
use atelier_shared::LimitInfo;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Prompt is required")]
    MissingPrompt,

    #[error("You've reached your free generation limit.")]
    QuotaExhausted { info: LimitInfo },

    #[error("Failed to generate image.")]
    Generation(#[source] GatewayError),

    #[error("Image not found: {0}")]
    ArtifactNotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{message}")]
    SyncFailed { message: String, detail: String },
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ServerError::MissingPrompt => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ServerError::QuotaExhausted { info } => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": self.to_string(), "limitInfo": info }),
            ),
            ServerError::Generation(source) => {
                tracing::error!(error = %source, "Image generation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": self.to_string() }),
                )
            }
            ServerError::ArtifactNotFound(_) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ServerError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ServerError::Storage(detail) => {
                tracing::error!(error = %detail, "Storage operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "Storage error" }),
                )
            }
            ServerError::SyncFailed { message, detail } => {
                tracing::error!(error = %detail, "Gallery sync failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({
                        "success": false,
                        "error": message,
                        "details": detail,
                    }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}
