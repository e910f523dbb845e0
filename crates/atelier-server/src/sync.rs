//! Reconciliation between the image files on disk and the gallery ledger.
//!
//! Generated files normally get a ledger entry at creation time, but a
//! failed mirror write, a wiped ledger, or images dropped into the
//! directory by hand leave orphaned files.  The sync pass walks the
//! directory and backfills a placeholder entry for every file the ledger
//! does not know about.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use atelier_shared::images::artifact_timestamp_millis;
use atelier_shared::{AddedImage, MirrorImage, SyncStats};

use crate::artifacts::ArtifactStore;
use crate::error::ServerError;
use crate::mirror::MirrorStore;

/// Backfill ledger entries for on-disk images the ledger is missing.
///
/// Filename comparison is case-insensitive so `Photo.PNG` and `photo.png`
/// count as the same artifact.  A file that cannot be stamped is logged
/// and skipped; it will be retried on the next pass.
pub async fn sync_missing(
    mirror: &MirrorStore,
    artifacts: &ArtifactStore,
) -> Result<Vec<AddedImage>, ServerError> {
    let ledger = mirror.load().await;
    let known: HashSet<String> = ledger
        .iter()
        .map(|image| image.filename.to_lowercase())
        .collect();

    let mut added = Vec::new();
    let mut entries = Vec::new();

    for filename in artifacts.list().await? {
        if known.contains(&filename.to_lowercase()) {
            continue;
        }

        let (id, timestamp) = match artifact_timestamp_millis(&filename) {
            Some(millis) => match Utc.timestamp_millis_opt(millis).single() {
                Some(stamp) => (millis.to_string(), stamp.to_rfc3339()),
                None => {
                    warn!(filename = %filename, millis, "Unrepresentable timestamp in filename, skipping");
                    continue;
                }
            },
            None => {
                let created: DateTime<Utc> = artifacts.created_at(&filename).await.into();
                (
                    Utc::now().timestamp_millis().to_string(),
                    created.to_rfc3339(),
                )
            }
        };

        let url = format!("/images/{}", filename);
        entries.push(MirrorImage {
            id: id.clone(),
            url: url.clone(),
            filename: filename.clone(),
            prompt: format!("AI Generated Image - {}", filename),
            timestamp: timestamp.clone(),
            is_edited: false,
        });
        added.push(AddedImage {
            filename,
            url,
            id,
            timestamp,
        });
    }

    if !entries.is_empty() {
        mirror.extend(entries).await?;
        info!(count = added.len(), "Backfilled missing gallery entries");
    }

    Ok(added)
}

/// Counts of ledger entries and image files, and the gap between them.
/// `missing` goes negative when the ledger has entries whose files are gone.
pub async fn stats(
    mirror: &MirrorStore,
    artifacts: &ArtifactStore,
) -> Result<SyncStats, ServerError> {
    let gallery_entries = mirror.count().await;
    let image_files = artifacts.list().await?.len();

    Ok(SyncStats {
        gallery_entries,
        image_files,
        missing: image_files as i64 - gallery_entries as i64,
    })
}
