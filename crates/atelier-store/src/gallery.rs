//! Per-user gallery records over the shared key-value store.
//!
//! All identities share one collection under [`GALLERY_STORAGE_KEY`].
//! Reads are scoped to a user; writes run the whole collection through two
//! caps before persisting:
//!
//! 1. at most [`MAX_IMAGES_PER_USER`] records per identity, newest kept;
//! 2. at most [`MAX_GALLERY_BYTES`] serialized bytes for the collection.
//!    When exceeded, the oldest records across all identities are dropped
//!    until only the newest [`GALLERY_KEEP_RATIO`] share remains.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;

use atelier_shared::constants::{
    GALLERY_KEEP_RATIO, GALLERY_STORAGE_KEY, MAX_GALLERY_BYTES, MAX_IMAGES_PER_USER,
};
use atelier_shared::{GalleryExport, GalleryImage, GalleryStats};

use crate::error::{Result, StoreError};
use crate::events::{GalleryAction, StoreEvent, StoreEvents};
use crate::kv::KvStore;

/// Key written and removed to probe whether the store accepts writes.
const STORAGE_PROBE_KEY: &str = "atelier-storage-probe";

/// Input for [`LocalGallery::add`].  The gallery stamps the owning user.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: String,
    pub url: String,
    pub filename: String,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    pub is_edited: bool,
}

/// Result of a storage probe: whether writes succeed, and how much of the
/// gallery byte cap is still unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageAvailability {
    pub available: bool,
    pub space_left: usize,
}

/// Shape accepted from import bundles.  Record identity and ownership are
/// reassigned on import, so those fields are ignored here.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportedImage {
    url: String,
    filename: String,
    prompt: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    is_edited: bool,
}

#[derive(serde::Deserialize)]
struct ImportBundle {
    images: Vec<ImportedImage>,
}

/// The client-side gallery collection.
#[derive(Clone)]
pub struct LocalGallery {
    kv: Arc<dyn KvStore>,
    events: StoreEvents,
}

impl LocalGallery {
    pub fn new(kv: Arc<dyn KvStore>, events: StoreEvents) -> Self {
        Self { kv, events }
    }

    /// Records owned by `user_id`, newest first.
    pub fn list(&self, user_id: &str) -> Vec<GalleryImage> {
        let mut images: Vec<GalleryImage> = self
            .load_all()
            .into_iter()
            .filter(|i| i.user_id == user_id)
            .collect();
        images.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        images
    }

    /// Store a new record for `user_id` and return it.
    pub fn add(&self, user_id: &str, image: NewImage) -> Result<GalleryImage> {
        let record = GalleryImage {
            id: image.id,
            user_id: user_id.to_string(),
            url: image.url,
            filename: image.filename,
            prompt: image.prompt,
            timestamp: image.timestamp,
            is_edited: image.is_edited,
        };

        let mut images = self.load_all();
        images.insert(0, record.clone());
        self.persist_capped(images)?;

        tracing::debug!(user_id = %user_id, image_id = %record.id, "Added gallery image");
        self.events.emit(StoreEvent::GalleryChanged {
            action: GalleryAction::Add,
            user_id: user_id.to_string(),
            image_id: Some(record.id.clone()),
        });
        Ok(record)
    }

    /// Remove one record.  Returns `false` when no record matches both the
    /// id and the owning user.
    pub fn remove(&self, user_id: &str, image_id: &str) -> Result<bool> {
        let mut images = self.load_all();
        let before = images.len();
        images.retain(|i| !(i.id == image_id && i.user_id == user_id));

        if images.len() == before {
            tracing::warn!(user_id = %user_id, image_id = %image_id, "No matching gallery image to remove");
            return Ok(false);
        }

        self.persist(&images)?;
        self.events.emit(StoreEvent::GalleryChanged {
            action: GalleryAction::Remove,
            user_id: user_id.to_string(),
            image_id: Some(image_id.to_string()),
        });
        Ok(true)
    }

    /// Remove every record owned by `user_id`.  Other identities sharing
    /// the store keep theirs.
    pub fn clear(&self, user_id: &str) -> Result<()> {
        let mut images = self.load_all();
        images.retain(|i| i.user_id != user_id);
        self.persist(&images)?;

        tracing::info!(user_id = %user_id, "Cleared gallery");
        self.events.emit(StoreEvent::GalleryChanged {
            action: GalleryAction::Clear,
            user_id: user_id.to_string(),
            image_id: None,
        });
        Ok(())
    }

    /// Aggregate statistics for `user_id`.
    ///
    /// `storage_size` is the serialized size of the whole collection, not
    /// just this user's share, since the byte cap applies to the whole
    /// store.
    pub fn stats(&self, user_id: &str) -> GalleryStats {
        let images = self.list(user_id);
        let generated = images.iter().filter(|i| !i.is_edited).count();
        let storage_size = match self.kv.get(GALLERY_STORAGE_KEY) {
            Ok(Some(raw)) => raw.len() as u64,
            _ => 0,
        };
        GalleryStats {
            total_images: images.len(),
            generated_images: generated,
            edited_images: images.len() - generated,
            oldest_image: images.last().map(|i| i.timestamp),
            newest_image: images.first().map(|i| i.timestamp),
            storage_size,
        }
    }

    /// Bundle `user_id`'s records for backup.
    pub fn export(&self, user_id: &str) -> GalleryExport {
        GalleryExport {
            export_date: Utc::now(),
            user_id: user_id.to_string(),
            images: self.list(user_id),
            stats: self.stats(user_id),
        }
    }

    /// Import records from a serialized export bundle.
    ///
    /// Every imported record gets a fresh id and is owned by `user_id`,
    /// regardless of who exported it.  Returns the number of records
    /// imported.
    pub fn import(&self, user_id: &str, payload: &str) -> Result<usize> {
        let bundle: ImportBundle = serde_json::from_str(payload)
            .map_err(|e| StoreError::InvalidImport(e.to_string()))?;

        let millis = Utc::now().timestamp_millis();
        let mut images: Vec<GalleryImage> = bundle
            .images
            .into_iter()
            .map(|image| GalleryImage {
                id: format!("imported_{millis}_{}", import_suffix()),
                user_id: user_id.to_string(),
                url: image.url,
                filename: image.filename,
                prompt: image.prompt,
                timestamp: image.timestamp,
                is_edited: image.is_edited,
            })
            .collect();
        let count = images.len();

        images.extend(self.load_all());
        self.persist_capped(images)?;

        tracing::info!(user_id = %user_id, count, "Imported gallery images");
        self.events.emit(StoreEvent::GalleryChanged {
            action: GalleryAction::Import,
            user_id: user_id.to_string(),
            image_id: None,
        });
        Ok(count)
    }

    /// Probe whether the backing store currently accepts writes, and how
    /// much headroom the gallery has under its byte cap.
    pub fn storage_availability(&self) -> StorageAvailability {
        let probe = self
            .kv
            .set(STORAGE_PROBE_KEY, "ok")
            .and_then(|_| self.kv.remove(STORAGE_PROBE_KEY));
        if let Err(e) = probe {
            tracing::warn!(error = %e, "Storage unavailable");
            return StorageAvailability {
                available: false,
                space_left: 0,
            };
        }

        let used = match self.kv.get(GALLERY_STORAGE_KEY) {
            Ok(Some(raw)) => raw.len(),
            _ => 0,
        };
        StorageAvailability {
            available: true,
            space_left: MAX_GALLERY_BYTES.saturating_sub(used),
        }
    }

    // ------------------------------------------------------------------
    // Capping and persistence
    // ------------------------------------------------------------------

    /// Apply both caps to the full collection, then persist it.
    fn persist_capped(&self, mut images: Vec<GalleryImage>) -> Result<()> {
        // Newest first, so both caps keep the head of the vec.
        images.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let images = cap_per_user(images);
        let images = self.cap_bytes(images)?;
        self.persist(&images)
    }

    /// Drop the oldest records across all identities until the serialized
    /// collection fits under the byte cap.
    fn cap_bytes(&self, mut images: Vec<GalleryImage>) -> Result<Vec<GalleryImage>> {
        let raw = serde_json::to_string(&images)?;
        if raw.len() > MAX_GALLERY_BYTES {
            let keep = (images.len() as f64 * GALLERY_KEEP_RATIO).floor() as usize;
            tracing::warn!(
                size = raw.len(),
                total = images.len(),
                keep,
                "Gallery exceeds byte cap, dropping oldest records"
            );
            images.truncate(keep);
        }
        Ok(images)
    }

    fn persist(&self, images: &[GalleryImage]) -> Result<()> {
        self.kv
            .set(GALLERY_STORAGE_KEY, &serde_json::to_string(images)?)
    }

    fn load_all(&self) -> Vec<GalleryImage> {
        match self.kv.get(GALLERY_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(images) => images,
                Err(e) => {
                    tracing::warn!(error = %e, "Corrupt gallery collection, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Gallery store unreadable, starting empty");
                Vec::new()
            }
        }
    }
}

/// Keep the newest [`MAX_IMAGES_PER_USER`] records per identity.  Expects
/// the collection sorted newest first.
fn cap_per_user(images: Vec<GalleryImage>) -> Vec<GalleryImage> {
    let mut per_user: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(images.len());
    let mut dropped = 0usize;

    for image in images {
        let seen = per_user.entry(image.user_id.clone()).or_insert(0);
        if *seen < MAX_IMAGES_PER_USER {
            *seen += 1;
            kept.push(image);
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        tracing::debug!(dropped, "Trimmed per-user gallery overflow");
    }
    kept
}

fn import_suffix() -> String {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..9)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use chrono::{Duration, TimeZone};

    fn gallery() -> LocalGallery {
        LocalGallery::new(Arc::new(MemoryKvStore::new()), StoreEvents::new())
    }

    fn image(n: i64) -> NewImage {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        NewImage {
            id: format!("img-{n}"),
            url: format!("/images/ai-generated-{n}.png"),
            filename: format!("ai-generated-{n}.png"),
            prompt: format!("prompt {n}"),
            timestamp: base + Duration::seconds(n),
            is_edited: false,
        }
    }

    #[test]
    fn records_are_scoped_to_their_user() {
        let gallery = gallery();

        gallery.add("user_a", image(1)).unwrap();
        gallery.add("user_a", image(2)).unwrap();
        gallery.add("user_b", image(3)).unwrap();

        let a = gallery.list("user_a");
        let b = gallery.list("user_b");

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        // Newest first.
        assert_eq!(a[0].id, "img-2");
        assert_eq!(a[1].id, "img-1");
        assert!(a.iter().all(|i| i.user_id == "user_a"));
    }

    #[test]
    fn remove_requires_matching_owner() {
        let gallery = gallery();
        gallery.add("user_a", image(1)).unwrap();

        assert!(!gallery.remove("user_b", "img-1").unwrap());
        assert_eq!(gallery.list("user_a").len(), 1);

        assert!(gallery.remove("user_a", "img-1").unwrap());
        assert!(gallery.list("user_a").is_empty());

        // Removing again finds nothing.
        assert!(!gallery.remove("user_a", "img-1").unwrap());
    }

    #[test]
    fn clear_leaves_other_users_alone() {
        let gallery = gallery();
        gallery.add("user_a", image(1)).unwrap();
        gallery.add("user_b", image(2)).unwrap();

        gallery.clear("user_a").unwrap();

        assert!(gallery.list("user_a").is_empty());
        assert_eq!(gallery.list("user_b").len(), 1);
    }

    #[test]
    fn per_user_cap_keeps_the_newest_records() {
        let gallery = gallery();

        for n in 0..(MAX_IMAGES_PER_USER as i64 + 5) {
            gallery.add("user_a", image(n)).unwrap();
        }
        gallery.add("user_b", image(1_000)).unwrap();

        let a = gallery.list("user_a");
        assert_eq!(a.len(), MAX_IMAGES_PER_USER);
        assert_eq!(a[0].id, format!("img-{}", MAX_IMAGES_PER_USER as i64 + 4));
        // The oldest five fell off.
        assert!(!a.iter().any(|i| i.id == "img-0"));
        assert!(!a.iter().any(|i| i.id == "img-4"));
        // The cap is per user.
        assert_eq!(gallery.list("user_b").len(), 1);
    }

    #[test]
    fn byte_cap_drops_the_oldest_share() {
        let gallery = gallery();

        // Each record carries a payload large enough that eight of them
        // exceed the collection byte cap.
        let payload = "x".repeat(700_000);
        for n in 0..10 {
            let mut img = image(n);
            img.url = payload.clone();
            gallery.add("user_a", img).unwrap();
        }

        let kept = gallery.list("user_a");
        assert!(kept.len() < 10);
        // The newest record survives, the oldest went first.
        assert_eq!(kept[0].id, "img-9");
        assert!(!kept.iter().any(|i| i.id == "img-0"));

        let raw = serde_json::to_string(&kept).unwrap();
        assert!(raw.len() <= MAX_GALLERY_BYTES);
    }

    #[test]
    fn stats_summarize_the_user_collection() {
        let gallery = gallery();
        gallery.add("user_a", image(1)).unwrap();
        let mut edited = image(2);
        edited.is_edited = true;
        gallery.add("user_a", edited).unwrap();
        gallery.add("user_b", image(3)).unwrap();

        let stats = gallery.stats("user_a");

        assert_eq!(stats.total_images, 2);
        assert_eq!(stats.generated_images, 1);
        assert_eq!(stats.edited_images, 1);
        assert_eq!(stats.oldest_image, Some(image(1).timestamp));
        assert_eq!(stats.newest_image, Some(image(2).timestamp));
        assert!(stats.storage_size > 0);
    }

    #[test]
    fn export_import_moves_records_between_users() {
        let gallery = gallery();
        gallery.add("user_a", image(1)).unwrap();
        gallery.add("user_a", image(2)).unwrap();

        let bundle = serde_json::to_string(&gallery.export("user_a")).unwrap();
        let count = gallery.import("user_b", &bundle).unwrap();

        assert_eq!(count, 2);
        let b = gallery.list("user_b");
        assert_eq!(b.len(), 2);
        assert!(b.iter().all(|i| i.user_id == "user_b"));
        assert!(b.iter().all(|i| i.id.starts_with("imported_")));
        // Prompts and timestamps survive the round trip.
        assert!(b.iter().any(|i| i.prompt == "prompt 1"));
        // The exporting user keeps their originals.
        assert_eq!(gallery.list("user_a").len(), 2);
    }

    #[test]
    fn import_rejects_malformed_bundles() {
        let gallery = gallery();

        assert!(matches!(
            gallery.import("user_a", "not json"),
            Err(StoreError::InvalidImport(_))
        ));
        assert!(matches!(
            gallery.import("user_a", r#"{"noImages":true}"#),
            Err(StoreError::InvalidImport(_))
        ));
    }

    #[test]
    fn corrupt_collection_starts_empty() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(GALLERY_STORAGE_KEY, "[{broken").unwrap();

        let gallery = LocalGallery::new(kv, StoreEvents::new());
        assert!(gallery.list("user_a").is_empty());
        gallery.add("user_a", image(1)).unwrap();
        assert_eq!(gallery.list("user_a").len(), 1);
    }

    #[tokio::test]
    async fn mutations_emit_events() {
        let events = StoreEvents::new();
        let gallery = LocalGallery::new(Arc::new(MemoryKvStore::new()), events.clone());
        let mut rx = events.subscribe();

        gallery.add("user_a", image(1)).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::GalleryChanged {
                action: GalleryAction::Add,
                user_id: "user_a".to_string(),
                image_id: Some("img-1".to_string()),
            }
        );

        gallery.remove("user_a", "img-1").unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::GalleryChanged {
                action: GalleryAction::Remove,
                user_id: "user_a".to_string(),
                image_id: Some("img-1".to_string()),
            }
        );

        gallery.clear("user_a").unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::GalleryChanged {
                action: GalleryAction::Clear,
                user_id: "user_a".to_string(),
                image_id: None,
            }
        );
    }

    #[test]
    fn storage_probe_reports_availability_and_headroom() {
        let gallery = gallery();
        let info = gallery.storage_availability();
        assert!(info.available);
        assert_eq!(info.space_left, MAX_GALLERY_BYTES);

        gallery.add("user_a", image(1)).unwrap();
        let info = gallery.storage_availability();
        assert!(info.available);
        assert!(info.space_left < MAX_GALLERY_BYTES);
    }
}
