//! # Rate Limiting Module
//!
//! ## Purpose
//! Bounds request throughput per client identity per logical endpoint over a
//! fixed rolling window.
//!
//! ## Input/Output Specification
//! - **Input**: Endpoint name, client identity, per-window quota
//! - **Output**: Allow/reject decision with a retry-after hint
//! - **Window**: Fixed-length window, counter reset lazily at window start
//!
//! ## Key Features
//! - Counters keyed by `(endpoint, client)` in a concurrent map; the entry
//!   guard serializes the read-modify-write so concurrent bursts cannot
//!   under-count and bypass the limiter
//! - Client identity from the first forwarded-for entry, falling back to the
//!   peer address, falling back to a shared "unknown" sentinel
//! - Expired counters are swept periodically, keeping the map bounded by the
//!   set of currently active clients
//!
//! Counters live in process memory; a multi-instance deployment needs a
//! shared counter store for globally correct limits.

use crate::config::RateLimitConfig;
use crate::errors::{RegistryError, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Calls between opportunistic sweeps of expired counters
const PURGE_INTERVAL: u64 = 1024;

/// Identity assigned to clients with neither a forwarded-for header nor a
/// peer address; all such clients share one counter
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RateKey {
    endpoint: &'static str,
    client: String,
}

#[derive(Debug)]
struct WindowCounter {
    window_start: Instant,
    count: u32,
}

/// Windowed request counter per `(endpoint, client)` pair.
///
/// The client half of the key comes from caller-supplied headers, so the
/// map would grow without bound under forged identities if stale entries
/// were never dropped; expired counters are swept every [`PURGE_INTERVAL`]
/// calls.
pub struct RateLimiter {
    config: RateLimitConfig,
    counters: DashMap<RateKey, WindowCounter>,
    calls: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            counters: DashMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_seconds)
    }

    /// Quota for the public search/suggestions/categories endpoints
    pub fn public_api_limit(&self) -> u32 {
        self.config.public_api_rpm
    }

    /// Quota for the public filtered listing page
    pub fn public_page_limit(&self) -> u32 {
        self.config.public_page_rpm
    }

    /// Quota for trusted search endpoints
    pub fn trusted_api_limit(&self) -> u32 {
        self.config.trusted_api_rpm
    }

    /// Count this call against `(endpoint, client)` and decide.
    ///
    /// The counter increments on every call, allowed or not; with a quota of
    /// N, exactly N calls within one window succeed.
    pub fn check(
        &self,
        endpoint: &'static str,
        client: &str,
        requests_per_window: u32,
    ) -> Result<()> {
        self.check_at(Instant::now(), endpoint, client, requests_per_window)
    }

    fn check_at(
        &self,
        now: Instant,
        endpoint: &'static str,
        client: &str,
        requests_per_window: u32,
    ) -> Result<()> {
        let key = RateKey {
            endpoint,
            client: client.to_string(),
        };
        let window = self.window();

        // The entry guard holds the shard lock for this key, serializing the
        // read-modify-write against concurrent calls for the same pair.
        let mut entry = self.counters.entry(key).or_insert(WindowCounter {
            window_start: now,
            count: 0,
        });
        if now.duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        let count = entry.count;
        drop(entry);

        if self.calls.fetch_add(1, Ordering::Relaxed) % PURGE_INTERVAL == PURGE_INTERVAL - 1 {
            self.purge_expired_at(now);
        }

        if count > requests_per_window {
            tracing::warn!(
                "Rate limit exceeded for {} on {} ({} > {})",
                client,
                endpoint,
                count,
                requests_per_window
            );
            return Err(RegistryError::RateLimited {
                retry_after_seconds: self.config.window_seconds,
            });
        }

        Ok(())
    }

    /// Drop every counter whose window has fully elapsed; such entries
    /// carry no quota state, only memory
    pub fn purge_expired(&self) {
        self.purge_expired_at(Instant::now());
    }

    fn purge_expired_at(&self, now: Instant) {
        let window = self.window();
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| now.duration_since(counter.window_start) < window);
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            tracing::debug!("Purged {} expired rate-limit counters", removed);
        }
    }
}

/// Derive the client identity used for rate-limit bucketing: first entry of
/// the forwarded-for header when present, else the peer address, else the
/// shared unknown sentinel.
pub fn client_identity(forwarded_for: Option<&str>, peer_addr: Option<&str>) -> String {
    if let Some(header) = forwarded_for {
        if let Some(first) = header.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    match peer_addr {
        Some(addr) if !addr.is_empty() => addr.to_string(),
        _ => UNKNOWN_CLIENT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Config::default().rate_limit)
    }

    #[test]
    fn test_exactly_n_allowed_within_window() {
        let limiter = limiter();
        for _ in 0..5 {
            assert!(limiter.check("search", "10.0.0.1", 5).is_ok());
        }
        let err = limiter.check("search", "10.0.0.1", 5).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RateLimited {
                retry_after_seconds: 60
            }
        ));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter();
        for _ in 0..3 {
            assert!(limiter.check("search", "10.0.0.1", 3).is_ok());
        }
        assert!(limiter.check("search", "10.0.0.1", 3).is_err());
        // Different client, same endpoint
        assert!(limiter.check("search", "10.0.0.2", 3).is_ok());
        // Same client, different endpoint
        assert!(limiter.check("suggest", "10.0.0.1", 3).is_ok());
    }

    #[test]
    fn test_window_reset_restores_quota() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..2 {
            assert!(limiter.check_at(start, "search", "10.0.0.1", 2).is_ok());
        }
        assert!(limiter.check_at(start, "search", "10.0.0.1", 2).is_err());

        let next_window = start + Duration::from_secs(61);
        assert!(limiter
            .check_at(next_window, "search", "10.0.0.1", 2)
            .is_ok());
    }

    #[test]
    fn test_expired_counters_are_purged() {
        let limiter = limiter();
        let start = Instant::now();
        for i in 0..10 {
            limiter
                .check_at(start, "search", &format!("198.51.100.{i}"), 5)
                .unwrap();
        }
        assert_eq!(limiter.counters.len(), 10);

        let later = start + Duration::from_secs(61);
        limiter.check_at(later, "search", "203.0.113.1", 5).unwrap();
        limiter.purge_expired_at(later);

        // Only the client active in the current window survives
        assert_eq!(limiter.counters.len(), 1);
        assert!(limiter.counters.contains_key(&RateKey {
            endpoint: "search",
            client: "203.0.113.1".to_string(),
        }));
    }

    #[test]
    fn test_purge_runs_opportunistically_during_checks() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.check_at(start, "search", "198.51.100.1", 5).unwrap();

        let later = start + Duration::from_secs(61);
        for _ in 0..PURGE_INTERVAL {
            let _ = limiter.check_at(later, "search", "203.0.113.1", u32::MAX);
        }

        assert!(!limiter.counters.contains_key(&RateKey {
            endpoint: "search",
            client: "198.51.100.1".to_string(),
        }));
    }

    #[test]
    fn test_concurrent_checks_allow_exactly_n() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let limiter = Arc::new(limiter());
        let successes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let successes = successes.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        if limiter.check("search", "10.0.0.1", 50).is_ok() {
                            successes.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 200 racing calls against a quota of 50: exactly 50 may pass
        assert_eq!(successes.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn test_client_identity_prefers_forwarded_for() {
        assert_eq!(
            client_identity(Some("203.0.113.9, 10.0.0.1"), Some("10.0.0.2")),
            "203.0.113.9"
        );
        assert_eq!(client_identity(None, Some("10.0.0.2")), "10.0.0.2");
        assert_eq!(client_identity(None, None), UNKNOWN_CLIENT);
        assert_eq!(client_identity(Some("  "), None), UNKNOWN_CLIENT);
    }
}
