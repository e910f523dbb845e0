//! HTTP client for the hosted image-generation provider.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use atelier_shared::constants::PROMPT_PREAMBLE;
use atelier_shared::images;

use crate::error::GatewayError;
use crate::types::{GenerateRequest, GeneratedImage, ImageGenerator};
use crate::wire;

/// MIME type assumed for uploaded source images.  Uploads arrive as data
/// URLs but the declared type is not trusted.
const SOURCE_IMAGE_MIME: &str = "image/jpeg";

/// MIME type assumed when the provider omits one.
const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Client for the provider's `generateContent` image API.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl ProviderClient {
    /// Build a client against the given endpoint.
    ///
    /// `base_url` is the API root without a trailing slash; the model path
    /// is appended per request.
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            // Image generation regularly takes tens of seconds.
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl ImageGenerator for ProviderClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage, GatewayError> {
        let body = build_request(request)?;

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<wire::ErrorResponse>(&raw)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("status {status}"));
            tracing::warn!(%status, message = %message, "Provider rejected generation request");
            return Err(GatewayError::Provider(message));
        }

        let parsed: wire::GenerateContentResponse = response.json().await?;
        extract_image(parsed)
    }
}

/// Assemble the provider request body.
fn build_request(
    request: &GenerateRequest,
) -> Result<wire::GenerateContentRequest, GatewayError> {
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(GatewayError::EmptyPrompt);
    }

    let mut parts = vec![wire::Part {
        text: Some(format!("{PROMPT_PREAMBLE}\n\n{prompt}")),
        ..Default::default()
    }];

    if request.editing {
        if let Some(source) = request.source_image.as_deref() {
            parts.push(wire::Part {
                inline_data: Some(wire::InlineData {
                    mime_type: SOURCE_IMAGE_MIME.to_string(),
                    data: images::base64_payload(source).to_string(),
                }),
                ..Default::default()
            });
        }
    }

    Ok(wire::GenerateContentRequest {
        contents: vec![wire::Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config: wire::GenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
        },
    })
}

/// Pull the generated image out of a provider response.  When several
/// inline payloads come back, the last one wins.
fn extract_image(
    response: wire::GenerateContentResponse,
) -> Result<GeneratedImage, GatewayError> {
    let mut found: Option<wire::InlineData> = None;
    if let Some(candidate) = response.candidates.into_iter().next() {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(inline) = part.inline_data {
                    found = Some(inline);
                }
            }
        }
    }

    let inline = found.ok_or(GatewayError::NoImage)?;
    let bytes = BASE64.decode(inline.data.as_bytes())?;
    let mime_type = if inline.mime_type.is_empty() {
        DEFAULT_IMAGE_MIME.to_string()
    } else {
        inline.mime_type
    };

    tracing::debug!(size = bytes.len(), mime = %mime_type, "Provider returned image");
    Ok(GeneratedImage { bytes, mime_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_prompts_are_rejected() {
        assert!(matches!(
            build_request(&GenerateRequest::text("")),
            Err(GatewayError::EmptyPrompt)
        ));
        assert!(matches!(
            build_request(&GenerateRequest::text("   \n")),
            Err(GatewayError::EmptyPrompt)
        ));
    }

    #[test]
    fn text_request_carries_the_preamble() {
        let body = build_request(&GenerateRequest::text("a red bicycle")).unwrap();

        assert_eq!(body.contents.len(), 1);
        let content = &body.contents[0];
        assert_eq!(content.role.as_deref(), Some("user"));
        assert_eq!(content.parts.len(), 1);

        let text = content.parts[0].text.as_deref().unwrap();
        assert!(text.starts_with(PROMPT_PREAMBLE));
        assert!(text.ends_with("a red bicycle"));

        assert_eq!(
            body.generation_config.response_modalities,
            vec!["TEXT".to_string(), "IMAGE".to_string()]
        );
    }

    #[test]
    fn edit_request_attaches_the_source_payload() {
        let body = build_request(&GenerateRequest::edit(
            "make it blue",
            "data:image/png;base64,QUJD",
        ))
        .unwrap();

        let parts = &body.contents[0].parts;
        assert_eq!(parts.len(), 2);

        let inline = parts[1].inline_data.as_ref().unwrap();
        // The data URL header is stripped; the MIME type is assumed.
        assert_eq!(inline.data, "QUJD");
        assert_eq!(inline.mime_type, SOURCE_IMAGE_MIME);
    }

    #[test]
    fn edit_without_source_sends_text_only() {
        let request = GenerateRequest {
            prompt: "make it blue".to_string(),
            source_image: None,
            editing: true,
        };
        let body = build_request(&request).unwrap();
        assert_eq!(body.contents[0].parts.len(), 1);
    }

    #[test]
    fn source_image_is_ignored_unless_editing() {
        let request = GenerateRequest {
            prompt: "a red bicycle".to_string(),
            source_image: Some("data:image/png;base64,QUJD".to_string()),
            editing: false,
        };
        let body = build_request(&request).unwrap();
        assert_eq!(body.contents[0].parts.len(), 1);
    }

    fn response_with_parts(parts: Vec<wire::Part>) -> wire::GenerateContentResponse {
        wire::GenerateContentResponse {
            candidates: vec![wire::Candidate {
                content: Some(wire::Content { role: None, parts }),
            }],
        }
    }

    #[test]
    fn the_last_inline_payload_wins() {
        let response = response_with_parts(vec![
            wire::Part {
                inline_data: Some(wire::InlineData {
                    mime_type: "image/png".to_string(),
                    data: BASE64.encode(b"first"),
                }),
                ..Default::default()
            },
            wire::Part {
                text: Some("and here is another".to_string()),
                ..Default::default()
            },
            wire::Part {
                inline_data: Some(wire::InlineData {
                    mime_type: "image/webp".to_string(),
                    data: BASE64.encode(b"second"),
                }),
                ..Default::default()
            },
        ]);

        let image = extract_image(response).unwrap();
        assert_eq!(image.bytes, b"second");
        assert_eq!(image.mime_type, "image/webp");
    }

    #[test]
    fn text_only_response_is_no_image() {
        let response = response_with_parts(vec![wire::Part {
            text: Some("I cannot draw that.".to_string()),
            ..Default::default()
        }]);
        assert!(matches!(extract_image(response), Err(GatewayError::NoImage)));

        let empty = wire::GenerateContentResponse { candidates: vec![] };
        assert!(matches!(extract_image(empty), Err(GatewayError::NoImage)));
    }

    #[test]
    fn missing_mime_type_defaults_to_png() {
        let response = response_with_parts(vec![wire::Part {
            inline_data: Some(wire::InlineData {
                mime_type: String::new(),
                data: BASE64.encode(b"pixels"),
            }),
            ..Default::default()
        }]);

        let image = extract_image(response).unwrap();
        assert_eq!(image.mime_type, DEFAULT_IMAGE_MIME);
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let response = response_with_parts(vec![wire::Part {
            inline_data: Some(wire::InlineData {
                mime_type: "image/png".to_string(),
                data: "!!not-base64!!".to_string(),
            }),
            ..Default::default()
        }]);
        assert!(matches!(
            extract_image(response),
            Err(GatewayError::ImageDecode(_))
        ));
    }
}
