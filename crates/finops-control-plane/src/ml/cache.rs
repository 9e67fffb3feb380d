// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process TTL cache of forecast responses keyed by (tenant, horizon).
//!
//! The cache is a hint. A miss is always safe and an expired entry is never
//! served.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::types::ForecastResponse;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct Entry {
    response: ForecastResponse,
    expires_at: Instant,
}

/// Forecast cache.
pub struct ForecastCache {
    ttl: Duration,
    entries: Mutex<HashMap<(Uuid, u32), Entry>>,
}

impl Default for ForecastCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl std::fmt::Debug for ForecastCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

impl ForecastCache {
    /// Create a cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry for the key, marked `cached`. Expired entries are evicted.
    pub fn get(&self, organization_id: Uuid, horizon: u32) -> Option<ForecastResponse> {
        let mut entries = self.lock();
        let key = (organization_id, horizon);
        match entries.get(&key) {
            Some(entry) if Instant::now() > entry.expires_at => {
                entries.remove(&key);
                None
            }
            Some(entry) => {
                let mut response = entry.response.clone();
                response.cached = true;
                Some(response)
            }
            None => None,
        }
    }

    /// Store a response.
    pub fn put(&self, organization_id: Uuid, horizon: u32, response: ForecastResponse) {
        self.lock().insert(
            (organization_id, horizon),
            Entry {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Entries currently held, fresh or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(Uuid, u32), Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn response(org: Uuid) -> ForecastResponse {
        ForecastResponse {
            organization_id: org,
            generated_at: Utc::now(),
            model_version: "prophet-1".into(),
            forecasts: Vec::new(),
            total_forecasted: 42.0,
            confidence_level: 0.95,
            cached: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_marks_cached() {
        let cache = ForecastCache::default();
        let org = Uuid::new_v4();
        cache.put(org, 30, response(org));

        let hit = cache.get(org, 30).unwrap();
        assert!(hit.cached);
        assert_eq!(hit.total_forecasted, 42.0);
        assert!(cache.get(org, 7).is_none(), "horizon is part of the key");
        assert!(cache.get(Uuid::new_v4(), 30).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_strict() {
        let cache = ForecastCache::new(Duration::from_secs(60));
        let org = Uuid::new_v4();
        cache.put(org, 30, response(org));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get(org, 30).is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(org, 30).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let cache = ForecastCache::default();
        let org = Uuid::new_v4();
        cache.put(org, 30, response(org));
        cache.clear();
        assert!(cache.get(org, 30).is_none());
    }
}
