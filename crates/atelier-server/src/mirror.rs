use std::path::PathBuf;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use atelier_shared::MirrorImage;

use crate::error::ServerError;

/// Server-side copy of the gallery ledger, persisted as pretty-printed
/// JSON next to the image files.
///
/// Clients hold the authoritative gallery in their local storage; this
/// mirror is what makes `/api/gallery` answerable without a client and
/// what the sync pass repairs against the files on disk.
#[derive(Debug)]
pub struct MirrorStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the ledger file.
    lock: Mutex<()>,
}

impl MirrorStore {
    pub async fn new(path: PathBuf) -> Result<Self, ServerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ServerError::Storage(format!(
                    "Failed to create data directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        if !path.exists() {
            fs::write(&path, "[]").await.map_err(|e| {
                ServerError::Storage(format!(
                    "Failed to create gallery ledger '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }

        info!(path = %path.display(), "Gallery mirror initialized");

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// All ledger entries, newest first.  A missing or corrupt file reads
    /// as an empty ledger.
    pub async fn load(&self) -> Vec<MirrorImage> {
        let _guard = self.lock.lock().await;
        self.load_unlocked().await
    }

    /// Prepend an entry to the ledger.
    pub async fn add(&self, image: MirrorImage) -> Result<(), ServerError> {
        let _guard = self.lock.lock().await;
        let mut images = self.load_unlocked().await;
        images.insert(0, image);
        self.save_unlocked(&images).await
    }

    /// Append entries, preserving their order, behind existing ones.
    pub async fn extend(&self, entries: Vec<MirrorImage>) -> Result<usize, ServerError> {
        let _guard = self.lock.lock().await;
        let mut images = self.load_unlocked().await;
        let added = entries.len();
        images.extend(entries);
        self.save_unlocked(&images).await?;
        Ok(added)
    }

    /// Remove the entry with the given id.  Returns whether it existed.
    #[allow(dead_code)]
    pub async fn remove(&self, id: &str) -> Result<bool, ServerError> {
        let _guard = self.lock.lock().await;
        let mut images = self.load_unlocked().await;
        let before = images.len();
        images.retain(|image| image.id != id);
        if images.len() == before {
            return Ok(false);
        }
        self.save_unlocked(&images).await?;
        debug!(id = %id, "Removed ledger entry");
        Ok(true)
    }

    /// Drop every ledger entry.
    pub async fn clear(&self) -> Result<(), ServerError> {
        let _guard = self.lock.lock().await;
        self.save_unlocked(&[]).await
    }

    pub async fn count(&self) -> usize {
        self.load().await.len()
    }

    async fn load_unlocked(&self) -> Vec<MirrorImage> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read gallery ledger");
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(images) => images,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt gallery ledger, starting empty");
                Vec::new()
            }
        }
    }

    async fn save_unlocked(&self, images: &[MirrorImage]) -> Result<(), ServerError> {
        let json = serde_json::to_string_pretty(images)
            .map_err(|e| ServerError::Storage(format!("Failed to serialize ledger: {}", e)))?;

        fs::write(&self.path, json).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to write gallery ledger '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}
