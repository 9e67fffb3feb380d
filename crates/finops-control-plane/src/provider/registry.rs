// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Name-keyed registry of long-lived providers.
//!
//! Populated once at startup and read-only afterwards; share it behind an
//! `Arc` without further locking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use super::{CloudProvider, HealthStatus};

/// Providers keyed by [`CloudProvider::name`].
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CloudProvider>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, replacing any provider with the same name.
    pub fn register(&mut self, provider: Arc<dyn CloudProvider>) {
        let name = provider.name().to_string();
        info!(provider = %name, kind = %provider.kind(), "Provider registered");
        self.providers.insert(name, provider);
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CloudProvider>> {
        self.providers.get(name).cloned()
    }

    /// Every provider, in name order.
    pub fn all(&self) -> Vec<Arc<dyn CloudProvider>> {
        let mut all: Vec<_> = self.providers.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Probe every provider concurrently; completes when all have answered.
    pub async fn health_all(&self) -> BTreeMap<String, HealthStatus> {
        let probes = self.providers.iter().map(|(name, provider)| async move {
            let status = provider.health().await;
            debug!(provider = %name, healthy = status.healthy, "Provider health checked");
            (name.clone(), status)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Close every provider.
    pub async fn close_all(&self) {
        for provider in self.providers.values() {
            provider.close().await;
        }
        info!(count = self.providers.len(), "Providers closed");
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
