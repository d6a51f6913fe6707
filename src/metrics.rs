// Prometheus metrics for device rate limiting
//
// Exposes metrics on /metrics HTTP endpoint:
// - Admission decisions (counter)
// - Tenants with a live limiter (gauge)
// - Configuration reloads (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::{Arc, Once};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref ADMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("deviceauth_admissions_total", "Device requests by admission decision"),
        &["decision"]
    ).expect("Failed to create admissions metric");

    pub static ref TRACKED_TENANTS: IntGauge = IntGauge::new(
        "deviceauth_ratelimit_tenants",
        "Number of tenants with a live rate limiter"
    ).expect("Failed to create tracked tenants metric");

    pub static ref RELOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("deviceauth_ratelimit_reloads_total", "Rate limit configuration reloads"),
        &["status"]
    ).expect("Failed to create reloads metric");
}

static INIT: Once = Once::new();

/// Register all metrics with [`REGISTRY`]
///
/// Safe to call more than once; only the first call registers.
pub fn init() -> prometheus::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = register_all();
    });
    result
}

fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMISSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRACKED_TENANTS.clone()))?;
    REGISTRY.register(Box::new(RELOADS_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
