//! Admission Controller
//!
//! Per-request entry point: resolves the tenant's limiter from the active
//! registry and consumes one unit of quota.

use arc_swap::ArcSwap;
use prometheus::IntGauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::RateLimitConfig;
use super::error::ConfigError;
use super::quota::Decision;
use super::registry::RateLimiterRegistry;
use crate::config::Settings;
use crate::metrics;

/// Admission controller
///
/// The registry, together with the configuration it was built from, is one
/// immutable snapshot. Reloading swaps in a new snapshot; callers that
/// already resolved a limiter from the old one finish against the old quota.
#[derive(Debug)]
pub struct AdmissionController {
    registry: ArcSwap<RateLimiterRegistry>,

    /// Tenant gauge shared by every registry this controller builds
    tenants_gauge: IntGauge,
}

impl AdmissionController {
    /// Create a new admission controller
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_tenant_gauge(config, metrics::TRACKED_TENANTS.clone())
    }

    /// Create a controller reporting tracked tenants to `tenants_gauge`
    pub fn with_tenant_gauge(config: RateLimitConfig, tenants_gauge: IntGauge) -> Self {
        log_config("Device rate limiting configured", &config);
        Self {
            registry: ArcSwap::from_pointee(RateLimiterRegistry::with_tenant_gauge(
                config,
                tenants_gauge.clone(),
            )),
            tenants_gauge,
        }
    }

    /// Create a controller that admits everything
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::disabled())
    }

    /// Build the controller from raw settings
    ///
    /// # Errors
    ///
    /// Fails on any invalid quota setting; no controller is built then.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let config = RateLimitConfig::from_settings(settings)?;
        Ok(Self::new(config))
    }

    /// Decide whether a request from `tenant_id` may proceed
    pub fn admit(&self, tenant_id: &str, plan: Option<&str>) -> Decision {
        let limiter = self.registry.load().resolve(tenant_id, plan);
        let decision = limiter.check();

        metrics::ADMISSIONS_TOTAL
            .with_label_values(&[decision.as_str()])
            .inc();
        if let Decision::Deny { retry_after } = decision {
            debug!(
                tenant_id,
                plan,
                retry_after_ms = retry_after.as_millis() as u64,
                "Request denied by rate limit"
            );
        }

        decision
    }

    /// Replace the active configuration
    ///
    /// Every tenant starts over with a fresh limiter built from `config`.
    pub fn reload(&self, config: RateLimitConfig) {
        log_config("Device rate limiting reloaded", &config);
        let registry = Arc::new(RateLimiterRegistry::with_tenant_gauge(
            config,
            self.tenants_gauge.clone(),
        ));
        let previous = self.registry.swap(Arc::clone(&registry));
        previous.retire();
        // Limiters created on the old registry after the swap are not counted
        registry.sync_gauge();
        metrics::RELOADS_TOTAL.with_label_values(&["applied"]).inc();
    }

    /// Reload from raw settings, keeping the current configuration on error
    pub fn reload_from_settings(&self, settings: &Settings) -> Result<(), ConfigError> {
        match RateLimitConfig::from_settings(settings) {
            Ok(config) => {
                self.reload(config);
                Ok(())
            }
            Err(e) => {
                warn!("Rejected rate limit reload: {}", e);
                metrics::RELOADS_TOTAL.with_label_values(&["rejected"]).inc();
                Err(e)
            }
        }
    }

    /// Forget a tenant's limiter
    pub fn evict(&self, tenant_id: &str) -> bool {
        self.registry.load().evict(tenant_id)
    }

    /// Forget every limiter that has refilled completely
    pub fn evict_idle(&self) -> usize {
        let registry = self.registry.load();
        let evicted = registry.evict_idle();
        if evicted > 0 {
            debug!(evicted, remaining = registry.len(), "Evicted idle rate limiters");
        }
        evicted
    }

    /// Number of tenants with a live limiter
    pub fn tracked_tenants(&self) -> usize {
        self.registry.load().len()
    }

    /// Get current configuration
    pub fn config(&self) -> RateLimitConfig {
        self.registry.load().config().clone()
    }

    /// Periodically evict idle limiters
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_cleanup_task(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                controller.evict_idle();
            }
        })
    }
}

fn log_config(message: &str, config: &RateLimitConfig) {
    info!(
        enabled = config.enabled,
        plans = config.plans.len(),
        default_quota = config.default_quota.get(),
        interval_ms = config.interval.as_millis() as u64,
        "{}",
        message
    );
}
