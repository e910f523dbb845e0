//! Change notifications for the storage layers.
//!
//! A thin wrapper over a tokio broadcast channel.  Emitting never blocks
//! and is a no-op when nobody is listening, so the stores can publish
//! unconditionally.

use tokio::sync::broadcast;

/// Buffered events per subscriber before lagging kicks in.
const EVENT_BUS_CAPACITY: usize = 64;

/// What happened to the gallery collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryAction {
    Add,
    Remove,
    Clear,
    Import,
}

/// Events published by the storage layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A user's generation count changed.
    QuotaChanged {
        user_id: String,
        count: u32,
        remaining: u32,
    },
    /// The gallery collection changed through this process.
    GalleryChanged {
        action: GalleryAction,
        user_id: String,
        image_id: Option<String>,
    },
    /// A storage key was modified by another process, as observed by the
    /// polling watcher.
    StorageChanged { key: String },
}

/// Cloneable handle for publishing and subscribing to [`StoreEvent`]s.
#[derive(Clone)]
pub struct StoreEvents {
    tx: broadcast::Sender<StoreEvent>,
}

impl StoreEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn emit(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for StoreEvents {
    fn default() -> Self {
        Self::new()
    }
}
