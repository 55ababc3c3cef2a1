//
//  repo-migrator
//  api/rate_limit.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Rate-Limit Detection
//!
//! A provider can throttle us in two independent ways, and they are signaled
//! differently:
//!
//! | Regime | Signal | Recovery |
//! |--------|--------|----------|
//! | Primary | quota headers at zero **and** a marker in the body | defer the *next* call until the quota resets |
//! | Secondary | 403/429 **and** an abuse-detection marker in the body | wait in place and resend, with exponential back-off |
//!
//! The primary check always wins: a body carrying the primary marker is never
//! scanned for secondary markers.
//!
//! What counts as which is data ([`RateLimitRules`]), so adding a provider
//! means adding a table, not touching the state machine in
//! [`ApiClient`](super::ApiClient).
//!
//! The deferred primary delay is a [`PendingDelay`]: one atomic shared by every
//! clone of a client. It is a coarse cooperative throttle, not a lock. Two
//! callers can both read zero and both get throttled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use super::common::header_value;

/// Requests left in the current quota window.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";

/// Unix epoch seconds at which the quota window resets.
pub const RATE_LIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";

/// Server-suggested wait, in seconds.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Quota assumed when a response has no remaining-quota header.
///
/// This treats "unknown" as "healthy", so primary-limit detection is
/// effectively off against providers that never send the header.
pub const ASSUMED_QUOTA_REMAINING: i64 = 5000;

/// Which responses count as primary or secondary throttling for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRules {
    /// Upper-case body text marking primary quota exhaustion.
    pub primary_marker: Option<&'static str>,

    /// Upper-case body texts marking abuse-detection throttling.
    pub secondary_markers: &'static [&'static str],

    /// Treat a bare 429 (no marker) as secondary throttling.
    pub too_many_requests_is_secondary: bool,

    /// Defer the next call by any `Retry-After` seen on a response.
    pub defer_on_retry_after: bool,
}

impl RateLimitRules {
    /// GitHub REST/GraphQL: both regimes.
    pub const GITHUB: Self = Self {
        primary_marker: Some("API RATE LIMIT EXCEEDED"),
        secondary_markers: &[
            "SECONDARY RATE LIMIT",
            "ABUSE DETECTION",
            "YOU HAVE TRIGGERED AN ABUSE DETECTION MECHANISM",
        ],
        too_many_requests_is_secondary: true,
        defer_on_retry_after: false,
    };

    /// Azure DevOps: throttling is announced with `Retry-After` on otherwise
    /// successful responses.
    pub const AZURE_DEVOPS: Self = Self {
        primary_marker: None,
        secondary_markers: &[],
        too_many_requests_is_secondary: false,
        defer_on_retry_after: true,
    };

    /// Bitbucket Server: no throttling signals.
    pub const BITBUCKET_SERVER: Self = Self {
        primary_marker: None,
        secondary_markers: &[],
        too_many_requests_is_secondary: false,
        defer_on_retry_after: false,
    };

    fn mentions_primary(&self, upper_body: &str) -> bool {
        self.primary_marker
            .is_some_and(|marker| upper_body.contains(marker))
    }

    /// Quota exhausted and the body says so.
    pub fn is_primary_limited(&self, state: &RateLimitState, body: &str) -> bool {
        state.remaining <= 0 && self.mentions_primary(&body.to_uppercase())
    }

    /// 403/429 that is not primary and matches an abuse-detection marker.
    pub fn is_secondary_limited(&self, status: u16, body: &str) -> bool {
        if status != 403 && status != 429 {
            return false;
        }

        let upper = body.to_uppercase();
        if self.mentions_primary(&upper) {
            return false;
        }

        self.secondary_markers
            .iter()
            .any(|marker| upper.contains(marker))
            || (status == 429 && self.too_many_requests_is_secondary)
    }
}

/// Rate-limit facts read from one response.
///
/// Recomputed after every response; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: i64,
    pub reset_epoch_seconds: i64,
    pub retry_after: Option<Duration>,
}

impl RateLimitState {
    /// Reads the quota headers, filling gaps with "healthy" defaults: remaining
    /// [`ASSUMED_QUOTA_REMAINING`], reset now, no `Retry-After`.
    pub fn from_headers(headers: &[(String, String)], now: i64) -> Self {
        let remaining = match header_value(headers, RATE_LIMIT_REMAINING_HEADER)
            .and_then(|v| v.trim().parse::<i64>().ok())
        {
            Some(remaining) => remaining,
            None => {
                tracing::trace!(
                    "No usable {} header, assuming {}",
                    RATE_LIMIT_REMAINING_HEADER,
                    ASSUMED_QUOTA_REMAINING
                );
                ASSUMED_QUOTA_REMAINING
            }
        };

        let reset_epoch_seconds = header_value(headers, RATE_LIMIT_RESET_HEADER)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(now);

        let retry_after = header_value(headers, RETRY_AFTER_HEADER)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            remaining,
            reset_epoch_seconds,
            retry_after,
        }
    }

    /// `max(0, reset - now)`.
    pub fn until_reset(&self, now: i64) -> Duration {
        Duration::from_secs(u64::try_from(self.reset_epoch_seconds.saturating_sub(now)).unwrap_or(0))
    }
}

/// Delay every caller of a client must honor before its next request.
///
/// Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct PendingDelay {
    millis: Arc<AtomicU64>,
}

impl PendingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the pending delay.
    pub fn defer(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }

    /// Clears the delay if it still equals `observed`.
    ///
    /// A newer delay deferred by another caller in the meantime survives.
    pub fn clear(&self, observed: Duration) -> bool {
        let observed = u64::try_from(observed.as_millis()).unwrap_or(u64::MAX);
        self.millis
            .compare_exchange(observed, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Default first wait for secondary throttling.
pub const SECONDARY_BASE_DELAY: Duration = Duration::from_secs(60);

/// Default cap for a single secondary wait.
pub const SECONDARY_MAX_DELAY: Duration = Duration::from_secs(900);

/// Default number of in-place resends for secondary throttling.
pub const SECONDARY_MAX_RETRIES: u32 = 3;

/// Default upper bound of the random jitter added to computed back-off.
pub const SECONDARY_MAX_JITTER: Duration = Duration::from_millis(1000);

/// How long to wait before resending a secondary-throttled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub max_jitter: Duration,
}

impl Default for SecondaryBackoff {
    fn default() -> Self {
        Self {
            base_delay: SECONDARY_BASE_DELAY,
            max_delay: SECONDARY_MAX_DELAY,
            max_retries: SECONDARY_MAX_RETRIES,
            max_jitter: SECONDARY_MAX_JITTER,
        }
    }
}

impl SecondaryBackoff {
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Wait before resend number `retry_count + 1`.
    ///
    /// Order of precedence: a positive `Retry-After`; the time until quota
    /// reset when the quota is exhausted; otherwise `base * 2^retry_count`
    /// capped at `max_delay`, plus jitter.
    pub fn delay_for(&self, retry_count: u32, state: &RateLimitState, now: i64) -> Duration {
        if let Some(retry_after) = state.retry_after {
            return retry_after;
        }

        if state.remaining <= 0 {
            let until_reset = state.until_reset(now);
            if !until_reset.is_zero() {
                return until_reset;
            }
        }

        self.exponential(retry_count) + self.jitter()
    }

    fn exponential(&self, retry_count: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max))
    }
}

/// Wall clock and sleeping, injectable so waits can be asserted exactly.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current Unix time in seconds.
    fn now_unix(&self) -> i64;

    async fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
pub use mock::MockClock;
