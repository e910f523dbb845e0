//! Polling watcher for external storage writes.
//!
//! Two processes can share one on-disk store.  The watcher fingerprints the
//! quota and gallery keys on an interval and publishes
//! [`StoreEvent::StorageChanged`] when a value changed underneath us, so
//! in-process subscribers can reload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use atelier_shared::constants::{
    GALLERY_STORAGE_KEY, QUOTA_STORAGE_KEY, STORAGE_POLL_INTERVAL_SECS,
};

use crate::events::{StoreEvent, StoreEvents};
use crate::kv::KvStore;

/// Keys the watcher keeps an eye on.
const WATCHED_KEYS: [&str; 2] = [QUOTA_STORAGE_KEY, GALLERY_STORAGE_KEY];

pub struct StorageWatcher {
    kv: Arc<dyn KvStore>,
    events: StoreEvents,
    interval: Duration,
}

impl StorageWatcher {
    pub fn new(kv: Arc<dyn KvStore>, events: StoreEvents) -> Self {
        Self {
            kv,
            events,
            interval: Duration::from_secs(STORAGE_POLL_INTERVAL_SECS),
        }
    }

    /// Override the polling interval.  Mostly for tests.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the polling loop.  The task runs until the handle is aborted
    /// or the runtime shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            // Prime with the current state so startup never emits.
            let mut seen: HashMap<&str, Option<u64>> = HashMap::new();
            for key in WATCHED_KEYS {
                seen.insert(key, self.fingerprint(key));
            }

            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                for key in WATCHED_KEYS {
                    let current = self.fingerprint(key);
                    let previous = seen.insert(key, current);
                    if previous != Some(current) {
                        tracing::debug!(key, "Storage key changed externally");
                        self.events.emit(StoreEvent::StorageChanged {
                            key: key.to_string(),
                        });
                    }
                }
            }
        })
    }

    fn fingerprint(&self, key: &str) -> Option<u64> {
        match self.kv.get(key) {
            Ok(Some(raw)) => {
                let hash = blake3::hash(raw.as_bytes());
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&hash.as_bytes()[..8]);
                Some(u64::from_le_bytes(prefix))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Storage poll failed");
                None
            }
        }
    }
}
