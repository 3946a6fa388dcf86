//! Per-group request admission
//!
//! Each executor owns one limiter. Admission is spaced evenly at
//! `1 / qps_limit` seconds with a burst of one, so any rolling one-second
//! window sees at most `qps_limit` admissions no matter how many tasks are
//! waiting. Callers are delayed, never rejected.

use crate::{ClientError, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Gcra};
use std::num::NonZeroU32;

/// Shared admission gate for one quota group
pub struct RateLimiter {
    qps_limit: NonZeroU32,
    inner: DefaultDirectRateLimiter,
}

impl RateLimiter {
    /// Create a limiter admitting `qps_limit` requests per second
    pub fn new(qps_limit: u32) -> Result<Self> {
        let qps_limit = NonZeroU32::new(qps_limit)
            .ok_or_else(|| ClientError::Config("qps_limit must be greater than 0".to_string()))?;
        let quota = Quota::per_second(qps_limit).allow_burst(NonZeroU32::MIN);

        Ok(Self {
            qps_limit,
            inner: Gcra::direct(quota),
        })
    }

    /// Wait until the window has room for one more request
    pub async fn admit(&self) {
        self.inner.until_ready().await;
    }

    /// Take a slot only if one is free right now
    pub fn try_admit(&self) -> bool {
        self.inner.check().is_ok()
    }

    pub fn qps_limit(&self) -> u32 {
        self.qps_limit.get()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("qps_limit", &self.qps_limit)
            .finish()
    }
}
