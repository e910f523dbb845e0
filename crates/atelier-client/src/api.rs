//! Typed HTTP client for the Atelier server.
//!
//! Error responses carry a user-facing message in an `error` field; that
//! message is surfaced verbatim so the UI can show it unchanged.

use serde::{Deserialize, Serialize};

use atelier_shared::{AddedImage, LimitInfo, MirrorImage, SyncStats};

use crate::error::{ClientError, Result};

/// Message used when an error response has no parseable body.
const FALLBACK_ERROR: &str = "Something went wrong.";

/// Client for the server's JSON API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploaded_image: Option<&'a str>,
    is_editing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

/// Successful body of the generate endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Inline data URL, renderable without a second request.
    pub image: String,
    pub filename: String,
    pub id: String,
    pub timestamp: String,
    pub prompt: String,
    #[serde(default)]
    pub is_edited: bool,
    pub limit_info: LimitInfo,
}

#[derive(Deserialize)]
struct GalleryBody {
    images: Vec<MirrorImage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRunBody {
    added_images: Vec<AddedImage>,
}

#[derive(Deserialize)]
struct SyncStatusBody {
    stats: SyncStats,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

impl ApiClient {
    /// Build a client against the server at `base_url` (scheme and
    /// authority, no trailing slash).
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request a generation.  When a source image is attached the prompt
    /// is treated as an edit instruction.
    pub async fn generate(
        &self,
        prompt: &str,
        uploaded_image: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<GenerateResponse> {
        let body = GenerateBody {
            prompt,
            uploaded_image,
            is_editing: uploaded_image.is_some(),
            user_id,
        };
        let response = self
            .http
            .post(self.endpoint("/api/generate"))
            .json(&body)
            .send()
            .await?;
        parse_body(response).await
    }

    /// The server's mirror ledger, newest first.
    pub async fn fetch_gallery(&self) -> Result<Vec<MirrorImage>> {
        let response = self.http.get(self.endpoint("/api/gallery")).send().await?;
        let body: GalleryBody = parse_body(response).await?;
        Ok(body.images)
    }

    /// Clear the server's mirror ledger.
    pub async fn clear_gallery(&self) -> Result<()> {
        let response = self
            .http
            .delete(self.endpoint("/api/gallery"))
            .send()
            .await?;
        check_status(response).await
    }

    /// Run a sync pass on the server.  Returns the backfilled entries.
    pub async fn run_sync(&self) -> Result<Vec<AddedImage>> {
        let response = self.http.post(self.endpoint("/api/sync")).send().await?;
        let body: SyncRunBody = parse_body(response).await?;
        Ok(body.added_images)
    }

    /// Ledger-versus-files consistency stats from the server.
    pub async fn sync_stats(&self) -> Result<SyncStats> {
        let response = self.http.get(self.endpoint("/api/sync")).send().await?;
        let body: SyncStatusBody = parse_body(response).await?;
        Ok(body.stats)
    }

    /// `Ok` when the server answers the health probe.
    pub async fn health(&self) -> Result<()> {
        let response = self.http.get(self.endpoint("/health")).send().await?;
        check_status(response).await
    }
}

/// Deserialize a success body, or surface the server's error message.
async fn parse_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_response(status, response).await);
    }
    Ok(response.json().await?)
}

async fn check_status(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_response(status, response).await);
    }
    Ok(())
}

async fn error_response(
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> ClientError {
    let raw = response.text().await.unwrap_or_default();
    let message = error_message(&raw);
    tracing::warn!(status = %status, message = %message, "Server request failed");
    ClientError::Server {
        status: status.as_u16(),
        message,
    }
}

/// Pull the user-facing message out of an error body.
fn error_message(raw: &str) -> String {
    serde_json::from_str::<ErrorBody>(raw)
        .ok()
        .and_then(|body| body.error)
        .unwrap_or_else(|| FALLBACK_ERROR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_the_server_text() {
        assert_eq!(
            error_message(r#"{"error":"Prompt is required"}"#),
            "Prompt is required"
        );
        assert_eq!(
            error_message(r#"{"success":false,"error":"Failed to sync gallery","details":"io"}"#),
            "Failed to sync gallery"
        );
    }

    #[test]
    fn error_message_falls_back_on_junk() {
        assert_eq!(error_message("<html>502 Bad Gateway</html>"), FALLBACK_ERROR);
        assert_eq!(error_message(""), FALLBACK_ERROR);
        assert_eq!(error_message(r#"{"message":"nope"}"#), FALLBACK_ERROR);
    }

    #[test]
    fn generate_body_uses_wire_field_names() {
        let body = GenerateBody {
            prompt: "a fox",
            uploaded_image: None,
            is_editing: false,
            user_id: Some("user_ab12cd34_1"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["prompt"], "a fox");
        assert_eq!(json["isEditing"], false);
        assert_eq!(json["userId"], "user_ab12cd34_1");
        assert!(json.get("uploadedImage").is_none());

        let body = GenerateBody {
            prompt: "make it blue",
            uploaded_image: Some("data:image/png;base64,QUJD"),
            is_editing: true,
            user_id: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["uploadedImage"], "data:image/png;base64,QUJD");
        assert_eq!(json["isEditing"], true);
        assert!(json.get("userId").is_none());
    }

    #[test]
    fn trailing_slash_is_trimmed_from_the_base_url() {
        let client = ApiClient::new("http://127.0.0.1:8080/");
        assert_eq!(
            client.endpoint("/api/gallery"),
            "http://127.0.0.1:8080/api/gallery"
        );
    }
}
