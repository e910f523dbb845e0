//! Domain model structs shared across the workspace.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names, because the same shapes are both persisted in the key-value store
//! and sent over the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_GENERATIONS_PER_USER;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A locally issued user identity.
///
/// The `user_id` embeds the fingerprint and the creation time in
/// epoch milliseconds (`user_<fingerprint>_<millis>`), so quota records
/// survive as long as the session record does and no longer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    /// Stable identifier, `user_<fingerprint>_<creation millis>`.
    pub user_id: String,
    /// Eight hex characters derived from random session material.
    pub fingerprint: String,
    /// When the session was first created.
    pub created_at: DateTime<Utc>,
    /// Updated on every read of the session.
    pub last_active: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

/// One user's lifetime generation count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    /// The user identity the count belongs to.
    pub user_id: String,
    /// Number of completed generations.
    pub count: u32,
    /// When the last generation was recorded.
    pub last_generated: DateTime<Utc>,
}

/// Snapshot of a user's quota standing, shown in the UI and returned by
/// the generate endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimitInfo {
    pub current: u32,
    pub max: u32,
    pub remaining: u32,
    pub can_generate: bool,
    /// Always `None`: the allowance is permanent and never resets.
    pub reset_date: Option<DateTime<Utc>>,
}

impl LimitInfo {
    /// Build the snapshot for a lifetime allowance of
    /// [`MAX_GENERATIONS_PER_USER`].
    pub fn permanent(current: u32) -> Self {
        Self {
            current,
            max: MAX_GENERATIONS_PER_USER,
            remaining: MAX_GENERATIONS_PER_USER.saturating_sub(current),
            can_generate: current < MAX_GENERATIONS_PER_USER,
            reset_date: None,
        }
    }
}

/// Export bundle produced by the quota ledger for support tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaExport {
    pub export_date: DateTime<Utc>,
    pub current_user_id: String,
    pub limits: Vec<QuotaRecord>,
    pub max_generations_per_user: u32,
    /// Always `"permanent"`.
    pub limit_type: String,
}

// ---------------------------------------------------------------------------
// Gallery
// ---------------------------------------------------------------------------

/// A gallery record owned by one user identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GalleryImage {
    /// Unique record identifier.
    pub id: String,
    /// The user identity the record belongs to.
    pub user_id: String,
    /// Image location, either a server path or an inline data URL.
    pub url: String,
    /// Artifact file name on the server.
    pub filename: String,
    /// The prompt the image was generated from.
    pub prompt: String,
    /// When the image was generated.
    pub timestamp: DateTime<Utc>,
    /// Whether the image came from an edit of an uploaded source image.
    #[serde(default)]
    pub is_edited: bool,
}

/// A record in the server-side mirror ledger.  Like [`GalleryImage`] minus
/// the owning user, which the mirror does not track.
///
/// The timestamp stays an opaque RFC 3339 string: the ledger only echoes
/// it, and keeping it unparsed means one odd entry cannot invalidate the
/// whole ledger file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MirrorImage {
    pub id: String,
    pub url: String,
    pub filename: String,
    pub prompt: String,
    pub timestamp: String,
    #[serde(default)]
    pub is_edited: bool,
}

/// Aggregate statistics over one user's gallery records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GalleryStats {
    pub total_images: usize,
    pub generated_images: usize,
    pub edited_images: usize,
    pub oldest_image: Option<DateTime<Utc>>,
    pub newest_image: Option<DateTime<Utc>>,
    /// Serialized size of the whole gallery collection in bytes, across
    /// all user identities sharing the store.
    pub storage_size: u64,
}

/// Export bundle produced by the local gallery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GalleryExport {
    pub export_date: DateTime<Utc>,
    pub user_id: String,
    pub images: Vec<GalleryImage>,
    pub stats: GalleryStats,
}

// ---------------------------------------------------------------------------
// Mirror sync
// ---------------------------------------------------------------------------

/// A placeholder record created by a sync pass for an artifact that had no
/// mirror entry.  Carries the same RFC 3339 timestamp string written to
/// the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddedImage {
    pub filename: String,
    pub url: String,
    pub id: String,
    pub timestamp: String,
}

/// Consistency report comparing the mirror ledger with the artifact
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub gallery_entries: usize,
    pub image_files: usize,
    /// Artifact files minus ledger entries.  Negative when the ledger has
    /// entries whose files were deleted out of band.
    pub missing: i64,
}
