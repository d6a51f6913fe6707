//! Device Auth Rate Limiting Library
//!
//! Per-tenant admission control for device requests, driven by the
//! tenant-plan quota configuration of the device authentication service.

pub mod config;
pub mod metrics;
pub mod metrics_server;
pub mod rate_limit;

pub use config::{Config, Settings};
pub use rate_limit::{AdmissionController, ConfigError, Decision, RateLimitConfig};
