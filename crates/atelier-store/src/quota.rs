//! Lifetime generation quota, tracked per user identity.
//!
//! Every user gets [`MAX_GENERATIONS_PER_USER`] generations, permanently.
//! There is no time window and no reset date.  The ledger only records
//! counts; enforcing the ceiling is the caller's job, which keeps a manual
//! [`QuotaLedger::reset`] able to reopen the allowance.
//!
//! Reads absorb storage failures (log and report an empty ledger), writes
//! report them: a failed [`QuotaLedger::increment`] leaves the stored state
//! untouched and emits no event.

use std::sync::Arc;

use chrono::Utc;

use atelier_shared::constants::{MAX_GENERATIONS_PER_USER, QUOTA_STORAGE_KEY};
use atelier_shared::{LimitInfo, QuotaExport, QuotaRecord};

use crate::error::Result;
use crate::events::{StoreEvent, StoreEvents};
use crate::kv::KvStore;

/// Per-user generation counts over the shared key-value store.
#[derive(Clone)]
pub struct QuotaLedger {
    kv: Arc<dyn KvStore>,
    events: StoreEvents,
}

impl QuotaLedger {
    pub fn new(kv: Arc<dyn KvStore>, events: StoreEvents) -> Self {
        Self { kv, events }
    }

    /// Number of generations recorded for `user_id`.
    pub fn count(&self, user_id: &str) -> u32 {
        self.load()
            .iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    /// Whether `user_id` still has allowance left.
    pub fn can_generate(&self, user_id: &str) -> bool {
        self.count(user_id) < MAX_GENERATIONS_PER_USER
    }

    /// Generations left for `user_id`, saturating at zero.
    pub fn remaining(&self, user_id: &str) -> u32 {
        MAX_GENERATIONS_PER_USER.saturating_sub(self.count(user_id))
    }

    /// Record one completed generation and return the new count.
    ///
    /// The count is not clamped here; gate on [`QuotaLedger::can_generate`]
    /// before starting a generation.
    pub fn increment(&self, user_id: &str) -> Result<u32> {
        let mut records = self.load();
        let now = Utc::now();
        let count = match records.iter_mut().find(|r| r.user_id == user_id) {
            Some(record) => {
                record.count += 1;
                record.last_generated = now;
                record.count
            }
            None => {
                records.push(QuotaRecord {
                    user_id: user_id.to_string(),
                    count: 1,
                    last_generated: now,
                });
                1
            }
        };
        self.save(&records)?;

        tracing::debug!(user_id = %user_id, count, "Recorded generation");
        self.events.emit(StoreEvent::QuotaChanged {
            user_id: user_id.to_string(),
            count,
            remaining: MAX_GENERATIONS_PER_USER.saturating_sub(count),
        });
        Ok(count)
    }

    /// Drop `user_id`'s record, restoring the full allowance.
    pub fn reset(&self, user_id: &str) -> Result<()> {
        let mut records = self.load();
        records.retain(|r| r.user_id != user_id);
        self.save(&records)?;

        tracing::info!(user_id = %user_id, "Reset generation count");
        self.events.emit(StoreEvent::QuotaChanged {
            user_id: user_id.to_string(),
            count: 0,
            remaining: MAX_GENERATIONS_PER_USER,
        });
        Ok(())
    }

    /// Quota standing for `user_id`, as shown in the UI.
    pub fn limit_info(&self, user_id: &str) -> LimitInfo {
        LimitInfo::permanent(self.count(user_id))
    }

    /// All records in the ledger, across user identities.
    pub fn all_records(&self) -> Vec<QuotaRecord> {
        self.load()
    }

    /// Remove every record.  Support tooling only.  The event's `user_id`
    /// is `"all"` so listeners for any user refresh.
    pub fn clear_all(&self) -> Result<()> {
        self.kv.remove(QUOTA_STORAGE_KEY)?;

        tracing::info!("Cleared all generation counts");
        self.events.emit(StoreEvent::QuotaChanged {
            user_id: "all".to_string(),
            count: 0,
            remaining: MAX_GENERATIONS_PER_USER,
        });
        Ok(())
    }

    /// Bundle the ledger for support tooling.
    pub fn export_data(&self, current_user_id: &str) -> QuotaExport {
        QuotaExport {
            export_date: Utc::now(),
            current_user_id: current_user_id.to_string(),
            limits: self.load(),
            max_generations_per_user: MAX_GENERATIONS_PER_USER,
            limit_type: "permanent".to_string(),
        }
    }

    fn load(&self) -> Vec<QuotaRecord> {
        match self.kv.get(QUOTA_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(error = %e, "Corrupt quota records, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Quota store unreadable, starting empty");
                Vec::new()
            }
        }
    }

    fn save(&self, records: &[QuotaRecord]) -> Result<()> {
        self.kv.set(QUOTA_STORAGE_KEY, &serde_json::to_string(records)?)
    }
}
