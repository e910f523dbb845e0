//! The client facade.
//!
//! [`Studio`] wires the local session identity, the offline quota gate
//! and the gallery from `atelier-store` together with the typed server
//! API.  UI layers talk to this one type.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use atelier_shared::{
    AddedImage, GalleryExport, GalleryImage, GalleryStats, LimitInfo, MirrorImage, QuotaExport,
    SyncStats, UserSession,
};
use atelier_store::{
    KvStore, LocalGallery, NewImage, QuotaLedger, SessionProvider, StorageAvailability,
    StorageWatcher, StoreEvent, StoreEvents,
};

use crate::api::ApiClient;
use crate::error::{ClientError, Result};

/// Session, quota, gallery and server API behind one handle.
///
/// The quota gate runs locally before any request goes out, so an
/// exhausted allowance costs no network traffic.  The server keeps its
/// own count as a backstop for clients that skip the gate.
#[derive(Clone)]
pub struct Studio {
    sessions: SessionProvider,
    ledger: QuotaLedger,
    gallery: LocalGallery,
    api: ApiClient,
    events: StoreEvents,
    kv: Arc<dyn KvStore>,
}

impl Studio {
    /// Wire the client stack over the given store, talking to the server
    /// at `server_url`.
    pub fn new(kv: Arc<dyn KvStore>, server_url: &str) -> Self {
        let events = StoreEvents::new();
        Self {
            sessions: SessionProvider::new(kv.clone()),
            ledger: QuotaLedger::new(kv.clone(), events.clone()),
            gallery: LocalGallery::new(kv.clone(), events.clone()),
            api: ApiClient::new(server_url),
            events,
            kv,
        }
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    /// Generate an image and record it in the local gallery.
    ///
    /// When `source_image` is given (a data URL), the prompt is treated
    /// as an edit instruction for that image.  The returned record's
    /// `url` is the inline data URL of the result.
    pub async fn generate_image(
        &self,
        prompt: &str,
        source_image: Option<String>,
    ) -> Result<GalleryImage> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ClientError::EmptyPrompt);
        }

        let session = self.sessions.current();
        if !self.ledger.can_generate(&session.user_id) {
            let info = self.ledger.limit_info(&session.user_id);
            warn!(user_id = %session.user_id, "Generation limit reached");
            return Err(ClientError::QuotaExhausted(info));
        }

        let reply = self
            .api
            .generate(prompt, source_image.as_deref(), Some(&session.user_id))
            .await?;

        if let Err(e) = self.ledger.increment(&session.user_id) {
            warn!(error = %e, "Completed generation was not recorded in the ledger");
        }

        let timestamp = DateTime::parse_from_rfc3339(&reply.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let image = GalleryImage {
            id: reply.id,
            user_id: session.user_id.clone(),
            url: reply.image,
            filename: reply.filename,
            prompt: reply.prompt,
            timestamp,
            is_edited: reply.is_edited,
        };

        // The image exists either way; a full local store only costs the
        // gallery entry.
        let stored = self.gallery.add(
            &session.user_id,
            NewImage {
                id: image.id.clone(),
                url: image.url.clone(),
                filename: image.filename.clone(),
                prompt: image.prompt.clone(),
                timestamp: image.timestamp,
                is_edited: image.is_edited,
            },
        );
        if let Err(e) = stored {
            warn!(error = %e, "Generated image was not stored in the local gallery");
        }

        Ok(image)
    }

    // ------------------------------------------------------------------
    // Session and quota
    // ------------------------------------------------------------------

    /// The current session, creating one on first use.
    pub fn session(&self) -> UserSession {
        self.sessions.current()
    }

    /// Stable identifier of the current session.
    pub fn user_id(&self) -> String {
        self.sessions.user_id()
    }

    /// Drop the current session.  The next call mints a fresh identity
    /// with an empty gallery and a full allowance.
    pub fn clear_session(&self) -> Result<()> {
        Ok(self.sessions.clear()?)
    }

    /// Quota standing for the current session.
    pub fn limit_info(&self) -> LimitInfo {
        self.ledger.limit_info(&self.sessions.user_id())
    }

    /// Whether the current session may still generate.
    pub fn can_generate(&self) -> bool {
        self.ledger.can_generate(&self.sessions.user_id())
    }

    /// Export quota records for support tooling.
    pub fn export_limits(&self) -> QuotaExport {
        self.ledger.export_data(&self.sessions.user_id())
    }

    /// Reset the current session's allowance.
    pub fn reset_quota(&self) -> Result<()> {
        Ok(self.ledger.reset(&self.sessions.user_id())?)
    }

    // ------------------------------------------------------------------
    // Local gallery
    // ------------------------------------------------------------------

    /// The current session's gallery, newest first.
    pub fn gallery_images(&self) -> Vec<GalleryImage> {
        self.gallery.list(&self.sessions.user_id())
    }

    /// Remove one image.  Returns `false` when no record matches.
    pub fn remove_image(&self, image_id: &str) -> Result<bool> {
        Ok(self.gallery.remove(&self.sessions.user_id(), image_id)?)
    }

    /// Clear the current session's gallery.
    pub fn clear_gallery(&self) -> Result<()> {
        Ok(self.gallery.clear(&self.sessions.user_id())?)
    }

    /// Aggregate statistics over the current session's gallery.
    pub fn gallery_stats(&self) -> GalleryStats {
        self.gallery.stats(&self.sessions.user_id())
    }

    /// Export the gallery as a JSON bundle.
    pub fn export_gallery(&self) -> GalleryExport {
        self.gallery.export(&self.sessions.user_id())
    }

    /// Import records from an export bundle.  Returns how many were
    /// imported.
    pub fn import_gallery(&self, payload: &str) -> Result<usize> {
        Ok(self.gallery.import(&self.sessions.user_id(), payload)?)
    }

    /// Probe local storage health and headroom.
    pub fn storage(&self) -> StorageAvailability {
        self.gallery.storage_availability()
    }

    // ------------------------------------------------------------------
    // Server
    // ------------------------------------------------------------------

    /// Fetch the server's mirror ledger.
    pub async fn server_gallery(&self) -> Result<Vec<MirrorImage>> {
        self.api.fetch_gallery().await
    }

    /// Clear the server's mirror ledger.  Image files stay on disk and
    /// reappear on the next sync pass.
    pub async fn clear_server_gallery(&self) -> Result<()> {
        self.api.clear_gallery().await
    }

    /// Run a sync pass on the server.  Returns the backfilled entries.
    pub async fn run_server_sync(&self) -> Result<Vec<AddedImage>> {
        self.api.run_sync().await
    }

    /// Ledger-versus-files consistency stats from the server.
    pub async fn server_sync_stats(&self) -> Result<SyncStats> {
        self.api.sync_stats().await
    }

    /// `Ok` when the server answers the health probe.
    pub async fn health(&self) -> Result<()> {
        self.api.health().await
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Subscribe to quota, gallery and storage change events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Start the polling watcher that reports writes made by other
    /// processes sharing the store.
    pub fn spawn_storage_watcher(&self) -> JoinHandle<()> {
        StorageWatcher::new(self.kv.clone(), self.events.clone()).spawn()
    }
}
