//! Helpers for inline image payloads and artifact file names.
//!
//! Images travel through the API as `data:<mime>;base64,<payload>` URLs and
//! are persisted on the server as `ai-generated-<epoch millis>.<ext>` files.
//! Both conventions are parsed and produced here and nowhere else.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::constants::{ARTIFACT_PREFIX, IMAGE_EXTENSIONS};
use crate::error::ImageDataError;

/// Encode raw image bytes as a data URL.
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

/// Decode a `data:<mime>;base64,<payload>` URL into its MIME type and raw
/// bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), ImageDataError> {
    let rest = url.strip_prefix("data:").ok_or(ImageDataError::NotADataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(ImageDataError::NotADataUrl)?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or(ImageDataError::NotADataUrl)?;
    let bytes = BASE64.decode(payload.trim())?;
    Ok((mime_type.to_string(), bytes))
}

/// Return the base64 payload of a data URL, or the input unchanged when it
/// carries no `data:` header.
pub fn base64_payload(url: &str) -> &str {
    match url.split_once(',') {
        Some((_, payload)) => payload,
        None => url,
    }
}

/// Build the artifact file name for an image generated at `millis`.
pub fn artifact_filename(millis: i64, extension: &str) -> String {
    format!("{ARTIFACT_PREFIX}{millis}.{extension}")
}

/// Extract the epoch-millisecond timestamp embedded in an artifact file
/// name, if it follows the `ai-generated-<millis>.<ext>` pattern.
pub fn artifact_timestamp_millis(filename: &str) -> Option<i64> {
    let rest = filename.strip_prefix(ARTIFACT_PREFIX)?;
    let (digits, _) = rest.split_once('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Whether a file name carries one of the recognised image extensions.
pub fn is_image_filename(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// MIME type for an artifact file name, by extension.
pub fn mime_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// File extension for a provider MIME type.  Unknown types fall back to
/// `png`, which is what the provider returns in practice.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// Render a byte count the way the UI shows storage usage, e.g. `1.5 KB`.
/// Up to two decimals, trailing zeros dropped.
pub fn format_storage_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let exponent = (((bytes as f64).ln() / 1024f64.ln()).floor() as usize).min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let mut rendered = format!("{:.2}", value);
    while rendered.ends_with('0') {
        rendered.pop();
    }
    if rendered.ends_with('.') {
        rendered.pop();
    }
    format!("{} {}", rendered, UNITS[exponent])
}
