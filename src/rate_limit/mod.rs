//! Device Rate Limiting
//!
//! This module turns the tenant-plan quota configuration into per-tenant
//! admission decisions for device requests.
//!
//! # Features
//!
//! - Plan quotas given as a `plan=value` string or as a mapping
//! - Lazily created per-tenant token buckets
//! - Lock-free check-and-consume on the request path
//! - Atomic configuration reload
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Admission Controller                       │
//! │            admit(tenant, plan) -> Allow | Deny               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ArcSwap ──► Rate Limiter Registry (one per snapshot)        │
//! │              ┌──────────────┐  ┌─────────────────────────┐  │
//! │              │ Quota config │  │ DashMap<tenant, Limiter>│  │
//! │              └──────────────┘  └─────────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Quota Plan Parser: settings -> PlanQuotaTable + default     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod plan;
pub mod quota;
pub mod registry;

#[cfg(test)]
mod proptests;

pub use config::RateLimitConfig;
pub use error::{ConfigError, ErrorKind};
pub use manager::AdmissionController;
pub use plan::{PlanQuotaTable, QuotaDefault};
pub use quota::{Decision, Limiter, QuotaSource, TenantQuota, TokenBucket};
pub use registry::RateLimiterRegistry;
