// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provider for testing.
//!
//! Returns canned costs and recommendations without touching a cloud API, and
//! records the requests it received.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use finops_core::model::{Currency, ProviderKind};
use tokio::sync::Mutex;

use super::{
    CloudProvider, CostItem, CostRequest, CostResponse, HealthStatus, ProviderError,
    ProviderRecommendation, RecommendationRequest, RecommendationResponse, Result, normalize,
};

/// Mock provider for testing.
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    kind: ProviderKind,
    costs: Arc<Mutex<Vec<CostItem>>>,
    recommendations: Arc<Mutex<Vec<ProviderRecommendation>>>,
    requests: Arc<Mutex<Vec<CostRequest>>>,
    closed: Arc<AtomicBool>,
    close_count: Arc<AtomicUsize>,
    /// If true, every cost and recommendation call fails.
    pub fail_by_default: bool,
}

impl MockProvider {
    /// A healthy provider with no data.
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            costs: Arc::new(Mutex::new(Vec::new())),
            recommendations: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            close_count: Arc::new(AtomicUsize::new(0)),
            fail_by_default: false,
        }
    }

    /// A provider whose calls fail and whose health probe is unhealthy.
    pub fn failing(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            fail_by_default: true,
            ..Self::new(name, kind)
        }
    }

    /// Replace the canned cost items.
    pub async fn set_costs(&self, costs: Vec<CostItem>) {
        *self.costs.lock().await = costs;
    }

    /// Replace the canned recommendations.
    pub async fn set_recommendations(&self, recommendations: Vec<ProviderRecommendation>) {
        *self.recommendations.lock().await = recommendations;
    }

    /// Cost requests received so far.
    pub async fn requests(&self) -> Vec<CostRequest> {
        self.requests.lock().await.clone()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many times `close` has been called.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn health(&self) -> HealthStatus {
        if self.fail_by_default {
            HealthStatus::unhealthy("Mock failure")
        } else {
            HealthStatus::healthy("ok").with_detail("mock", true)
        }
    }

    async fn get_costs(&self, request: &CostRequest) -> Result<CostResponse> {
        request.validate()?;
        self.requests.lock().await.push(request.clone());
        if self.fail_by_default {
            return Err(ProviderError::Upstream("Mock failure".into()));
        }
        let costs: Vec<CostItem> = self
            .costs
            .lock()
            .await
            .iter()
            .filter(|c| c.date >= request.start && c.date < request.end)
            .cloned()
            .collect();
        Ok(CostResponse {
            total_amount: normalize::total(&costs),
            costs,
            currency: Currency::Usd,
            start: request.start,
            end: request.end,
            warnings: Vec::new(),
        })
    }

    async fn get_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        if self.fail_by_default {
            return Err(ProviderError::Upstream("Mock failure".into()));
        }
        let recommendations = self
            .recommendations
            .lock()
            .await
            .iter()
            .filter(|r| request.wants(r.kind))
            .cloned()
            .collect();
        Ok(RecommendationResponse::new(recommendations, Currency::Usd))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}
