//! Quota Types and Token Bucket Implementation
//!
//! This module provides the resolved per-tenant quota and the token bucket
//! used to enforce it.
//!
//! The bucket is kept in the GCRA form: instead of a token count and a refill
//! timestamp it stores a single "theoretical arrival time" (TAT) in one
//! atomic cell. Consuming a unit pushes the TAT forward by one emission
//! interval, so the check and the consume happen in the same
//! compare-and-swap and concurrent callers can never both spend the last
//! unit.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Where a tenant's quota came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QuotaSource {
    /// The tenant's plan has an override in the plan table
    Plan(String),
    /// No override applies
    Default,
}

/// Resolved quota for one tenant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantQuota {
    /// Requests admitted per replenishment interval
    pub value: f64,

    /// Origin of the value
    pub source: QuotaSource,
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request was admitted and one unit of quota consumed
    Allow,
    /// The request was rejected; nothing was consumed
    Deny {
        /// Time until one unit of quota is available again
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny { .. } => "deny",
        }
    }
}

/// Token bucket for rate limiting
///
/// Refills continuously at `quota` units per `interval`. A fresh bucket
/// admits `floor(quota)` requests back to back (at least one).
#[derive(Debug)]
pub struct TokenBucket {
    /// Nanoseconds it takes to replenish one unit
    emission_interval: u64,

    /// How far the TAT may run ahead of now and still admit
    ///
    /// Always a whole number of emission intervals.
    tolerance: u64,

    /// Theoretical arrival time, in nanoseconds since `epoch`
    tat: AtomicU64,

    /// Reference point for all timestamps of this bucket
    epoch: Instant,
}

impl TokenBucket {
    /// Create a new, full token bucket
    ///
    /// `quota` must be positive and finite; the plan parser guarantees this
    /// for every configured value.
    pub fn new(quota: f64, interval: Duration) -> Self {
        let burst = quota.max(1.0).floor() as u64;
        let emission_interval = (interval.as_nanos() as f64 / quota).round().max(1.0) as u64;
        let tolerance = (burst - 1).saturating_mul(emission_interval);

        Self {
            emission_interval,
            tolerance,
            tat: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Try to consume one unit
    pub fn try_acquire(&self) -> Decision {
        self.try_acquire_at(self.now())
    }

    pub(crate) fn try_acquire_at(&self, now: u64) -> Decision {
        let mut current = self.tat.load(Ordering::SeqCst);

        loop {
            let tat = current.max(now);
            let ahead = tat - now;
            if ahead > self.tolerance {
                return Decision::Deny {
                    retry_after: Duration::from_nanos(ahead - self.tolerance),
                };
            }

            let new_value = tat.saturating_add(self.emission_interval);
            match self.tat.compare_exchange_weak(
                current,
                new_value,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Decision::Allow,
                Err(actual) => {
                    current = actual;
                }
            }
        }
    }

    /// Whether the bucket has refilled completely
    ///
    /// A full bucket behaves exactly like a freshly created one.
    pub fn is_full(&self) -> bool {
        self.is_full_at(self.now())
    }

    pub(crate) fn is_full_at(&self, now: u64) -> bool {
        self.tat.load(Ordering::SeqCst) <= now
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Per-tenant admission object handed out by the registry
#[derive(Debug)]
pub enum Limiter {
    /// Admits everything; used while limiting is disabled
    Unlimited,
    /// Enforces a tenant quota
    Throttled {
        quota: TenantQuota,
        bucket: TokenBucket,
    },
}

impl Limiter {
    /// Build a limiter enforcing `quota`
    pub fn throttled(quota: TenantQuota, interval: Duration) -> Self {
        let bucket = TokenBucket::new(quota.value, interval);
        Limiter::Throttled { quota, bucket }
    }

    /// Check and consume one unit of quota
    pub fn check(&self) -> Decision {
        match self {
            Limiter::Unlimited => Decision::Allow,
            Limiter::Throttled { bucket, .. } => bucket.try_acquire(),
        }
    }

    /// The quota enforced, if any
    pub fn quota(&self) -> Option<&TenantQuota> {
        match self {
            Limiter::Unlimited => None,
            Limiter::Throttled { quota, .. } => Some(quota),
        }
    }

    /// Whether dropping this limiter loses no state
    pub fn is_idle(&self) -> bool {
        match self {
            Limiter::Unlimited => true,
            Limiter::Throttled { bucket, .. } => bucket.is_full(),
        }
    }
}
