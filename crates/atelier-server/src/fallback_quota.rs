//! Server-side fallback generation quota.
//!
//! The authoritative quota lives with each client's local ledger, but a
//! client that never sends a user id (or lies about it) would otherwise be
//! unlimited.  This keeps an in-memory per-key counter as a backstop.
//! Counts are lost on restart; the client-side ledger is the durable one.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use tokio::sync::Mutex;

use atelier_shared::constants::MAX_GENERATIONS_PER_USER;
use atelier_shared::LimitInfo;

/// Keyed generation counter shared across request handlers.
#[derive(Clone)]
pub struct FallbackQuota {
    counts: Arc<Mutex<HashMap<String, u32>>>,
    limit: u32,
}

impl FallbackQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            counts: Arc::new(Mutex::new(HashMap::new())),
            limit,
        }
    }

    /// Number of generations recorded for the key.
    pub async fn count(&self, key: &str) -> u32 {
        let counts = self.counts.lock().await;
        counts.get(key).copied().unwrap_or(0)
    }

    /// Whether the key has used up its allowance.
    pub async fn exhausted(&self, key: &str) -> bool {
        self.count(key).await >= self.limit
    }

    /// Record one completed generation for the key and return the new count.
    pub async fn record(&self, key: &str) -> u32 {
        let mut counts = self.counts.lock().await;
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Quota summary for the key, in the same shape clients track locally.
    pub async fn limit_info(&self, key: &str) -> LimitInfo {
        LimitInfo::permanent(self.count(key).await)
    }
}

impl Default for FallbackQuota {
    fn default() -> Self {
        Self::new(MAX_GENERATIONS_PER_USER)
    }
}

/// Best-effort client IP, preferring proxy headers over the socket peer.
///
/// `x-forwarded-for` may carry a comma-separated chain; only the first
/// hop (the original client) is used.
pub fn client_ip(connect: Option<IpAddr>, headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    connect
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_start_at_zero() {
        let quota = FallbackQuota::new(3);
        assert_eq!(quota.count("alice").await, 0);
        assert!(!quota.exhausted("alice").await);
    }

    #[tokio::test]
    async fn record_increments_per_key() {
        let quota = FallbackQuota::new(3);
        assert_eq!(quota.record("alice").await, 1);
        assert_eq!(quota.record("alice").await, 2);
        assert_eq!(quota.record("bob").await, 1);
        assert_eq!(quota.count("alice").await, 2);
        assert_eq!(quota.count("bob").await, 1);
    }

    #[tokio::test]
    async fn exhausted_at_limit() {
        let quota = FallbackQuota::new(2);
        quota.record("alice").await;
        assert!(!quota.exhausted("alice").await);
        quota.record("alice").await;
        assert!(quota.exhausted("alice").await);
        assert!(!quota.exhausted("bob").await);
    }

    #[tokio::test]
    async fn limit_info_shape() {
        let quota = FallbackQuota::new(3);
        quota.record("alice").await;
        let info = quota.limit_info("alice").await;
        assert_eq!(info.current, 1);
        assert_eq!(info.max, 3);
        assert_eq!(info.remaining, 2);
        assert!(info.can_generate);
        assert!(info.reset_date.is_none());
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(
            client_ip(Some(peer), &headers),
            Some("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(
            client_ip(Some(peer), &headers),
            Some("198.51.100.2".parse().unwrap())
        );

        let empty = HeaderMap::new();
        assert_eq!(client_ip(Some(peer), &empty), Some(peer));
        assert_eq!(client_ip(None, &empty), None);
    }

    #[test]
    fn client_ip_ignores_garbage_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(client_ip(Some(peer), &headers), Some(peer));
    }
}
