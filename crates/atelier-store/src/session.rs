//! Locally issued user identities.
//!
//! A session is created on first access and persisted in the key-value
//! store.  The fingerprint is derived from freshly drawn random material,
//! never from hardware or environment details, so two installations can
//! never collide on purpose and a wiped store simply means a new identity.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use atelier_shared::constants::{FALLBACK_FINGERPRINT, FALLBACK_USER_ID, SESSION_STORAGE_KEY};
use atelier_shared::UserSession;

use crate::error::Result;
use crate::kv::KvStore;

/// Hands out the persistent [`UserSession`] for this installation.
#[derive(Clone)]
pub struct SessionProvider {
    kv: Arc<dyn KvStore>,
}

impl SessionProvider {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Return the current session, creating and persisting one if none
    /// exists.  Every call refreshes `last_active`.
    ///
    /// When the backing store is unavailable a non-persisted fallback
    /// identity is returned so callers always get a session.
    pub fn current(&self) -> UserSession {
        match self.load_or_create() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Session store unavailable, using fallback identity");
                fallback_session()
            }
        }
    }

    /// Current user id, without the rest of the session record.
    pub fn user_id(&self) -> String {
        self.current().user_id
    }

    /// Drop the persisted session so the next access issues a fresh
    /// identity.
    pub fn clear(&self) -> Result<()> {
        tracing::info!("Clearing user session");
        self.kv.remove(SESSION_STORAGE_KEY)
    }

    fn load_or_create(&self) -> Result<UserSession> {
        if let Some(raw) = self.kv.get(SESSION_STORAGE_KEY)? {
            match serde_json::from_str::<UserSession>(&raw) {
                Ok(mut session) => {
                    session.last_active = Utc::now();
                    self.persist(&session)?;
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Corrupt session record, issuing a new identity");
                }
            }
        }

        let session = new_session();
        self.persist(&session)?;
        tracing::info!(user_id = %session.user_id, "Created user session");
        Ok(session)
    }

    fn persist(&self, session: &UserSession) -> Result<()> {
        self.kv.set(SESSION_STORAGE_KEY, &serde_json::to_string(session)?)
    }
}

fn new_session() -> UserSession {
    let now = Utc::now();
    let millis = now.timestamp_millis();
    let fingerprint = fingerprint(millis);
    UserSession {
        user_id: format!("user_{fingerprint}_{millis}"),
        fingerprint,
        created_at: now,
        last_active: now,
    }
}

/// Eight hex characters hashed from a random UUID and the creation time.
fn fingerprint(millis: i64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(&millis.to_le_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash.as_bytes()[..4])
}

fn fallback_session() -> UserSession {
    let now = Utc::now();
    UserSession {
        user_id: FALLBACK_USER_ID.to_string(),
        fingerprint: FALLBACK_FINGERPRINT.to_string(),
        created_at: now,
        last_active: now,
    }
}
