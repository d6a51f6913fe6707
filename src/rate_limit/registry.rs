//! Rate Limiter Registry
//!
//! Owns one limiter per tenant, created lazily on the tenant's first request.

use dashmap::DashMap;
use prometheus::IntGauge;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::config::RateLimitConfig;
use super::quota::Limiter;
use crate::metrics;

/// Tenant id to limiter map for one configuration snapshot
///
/// A registry is never reconfigured in place; a reload builds a new one.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    /// Configuration every limiter in this registry was built from
    config: RateLimitConfig,

    /// Limiters keyed by tenant id
    limiters: DashMap<String, Arc<Limiter>>,

    /// Handed out for every tenant while limiting is disabled
    unlimited: Arc<Limiter>,

    /// Number of tenants with a limiter in the active registry
    tenants_gauge: IntGauge,

    /// Set once a reload replaced this registry; it stops reporting then
    retired: AtomicBool,
}

impl RateLimiterRegistry {
    /// Create an empty registry reporting to the global tenant gauge
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_tenant_gauge(config, metrics::TRACKED_TENANTS.clone())
    }

    /// Create an empty registry reporting to `tenants_gauge`
    pub fn with_tenant_gauge(config: RateLimitConfig, tenants_gauge: IntGauge) -> Self {
        Self {
            config,
            limiters: DashMap::new(),
            unlimited: Arc::new(Limiter::Unlimited),
            tenants_gauge,
            retired: AtomicBool::new(false),
        }
    }

    /// Get the limiter for a tenant, creating it on first use
    ///
    /// `plan` only matters the first time a tenant is seen: the quota is
    /// fixed when the limiter is created.
    pub fn resolve(&self, tenant_id: &str, plan: Option<&str>) -> Arc<Limiter> {
        if !self.config.enabled {
            return Arc::clone(&self.unlimited);
        }

        if let Some(limiter) = self.limiters.get(tenant_id) {
            return Arc::clone(limiter.value());
        }

        let limiter = self
            .limiters
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                let quota = self.config.tenant_quota(plan);
                debug!(
                    tenant_id,
                    quota = quota.value,
                    source = ?quota.source,
                    "Created tenant rate limiter"
                );
                if !self.is_retired() {
                    self.tenants_gauge.inc();
                }
                Arc::new(Limiter::throttled(quota, self.config.interval))
            });
        Arc::clone(limiter.value())
    }

    /// Drop a tenant's limiter; its next request starts with a full bucket
    pub fn evict(&self, tenant_id: &str) -> bool {
        let removed = self.limiters.remove(tenant_id).is_some();
        if removed && !self.is_retired() {
            self.tenants_gauge.dec();
        }
        removed
    }

    /// Drop every limiter whose bucket has refilled completely
    ///
    /// A limiter still held by a caller is kept even when full: the caller
    /// may be about to consume from it. Returns the number of limiters
    /// removed.
    pub fn evict_idle(&self) -> usize {
        let before = self.limiters.len();
        self.limiters
            .retain(|_, limiter| Arc::strong_count(limiter) > 1 || !limiter.is_idle());
        let evicted = before.saturating_sub(self.limiters.len());
        self.sync_gauge();
        evicted
    }

    /// Stop reporting to the tenant gauge
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Set the tenant gauge from the live map size
    pub(crate) fn sync_gauge(&self) {
        if !self.is_retired() {
            self.tenants_gauge.set(self.limiters.len() as i64);
        }
    }

    /// Number of tenants with a limiter
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Get the configuration this registry enforces
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
