//! Dual-window admission: per-minute first, then per-day.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use turnstile_config::RateLimitConfig;
use turnstile_core::{Clock, StoreError, SystemClock};

use crate::{RateStore, WindowCheck, WindowKind, WindowSpec};

/// The verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in `window_kind` after this one
    pub remaining: u32,
    /// When the oldest entry of `window_kind` leaves the window
    pub reset_at: DateTime<Utc>,
    /// The rejecting window, or the tighter window when allowed
    pub window_kind: WindowKind,
    /// True when the store failed and the request was let through
    pub degraded: bool,
}

impl RateDecision {
    /// Whole seconds until `reset_at`, rounded up and at least one (for
    /// `Retry-After`).
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0);
        ((millis + 999) / 1000).max(1) as u64
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateStore>,
    clock: Arc<dyn Clock>,
    minute: WindowSpec,
    day: WindowSpec,
    fail_open: bool,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateStore>, config: &RateLimitConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: Arc<dyn RateStore>,
        clock: Arc<dyn Clock>,
        config: &RateLimitConfig,
    ) -> Self {
        Self {
            store,
            clock,
            minute: WindowSpec {
                kind: WindowKind::PerMinute,
                max: config.per_minute,
            },
            day: WindowSpec {
                kind: WindowKind::PerDay,
                max: config.per_day,
            },
            fail_open: config.fail_open,
            store_timeout: Duration::from_millis(config.store_timeout_ms),
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Admit or reject one request from `client_key`.
    ///
    /// The minute window is checked first and a rejection there returns
    /// without touching the day window. When the minute window admits but
    /// the day window rejects, the minute entry stays recorded.
    ///
    /// Returns `Err` only when the store fails and fail-open is disabled.
    pub async fn check(&self, client_key: &str) -> Result<RateDecision, StoreError> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();

        let minute = match self.check_window(client_key, &self.minute, now_ms).await {
            Ok(check) => check,
            Err(e) => return self.degrade(client_key, e, now),
        };
        if !minute.allowed {
            debug!(client = %client_key, window = %WindowKind::PerMinute, "Rate limited");
            return Ok(self.decision(&self.minute, &minute, now));
        }

        let day = match self.check_window(client_key, &self.day, now_ms).await {
            Ok(check) => check,
            Err(e) => return self.degrade(client_key, e, now),
        };
        if !day.allowed {
            debug!(client = %client_key, window = %WindowKind::PerDay, "Rate limited");
            return Ok(self.decision(&self.day, &day, now));
        }

        let minute_decision = self.decision(&self.minute, &minute, now);
        let day_decision = self.decision(&self.day, &day, now);
        if day_decision.remaining < minute_decision.remaining {
            Ok(day_decision)
        } else {
            Ok(minute_decision)
        }
    }

    async fn check_window(
        &self,
        client_key: &str,
        window: &WindowSpec,
        now_ms: i64,
    ) -> Result<WindowCheck, StoreError> {
        tokio::time::timeout(
            self.store_timeout,
            self.store.check_and_record(client_key, window, now_ms),
        )
        .await
        .map_err(|_| StoreError::Timeout {
            millis: self.store_timeout.as_millis() as u64,
        })?
    }

    fn decision(&self, window: &WindowSpec, check: &WindowCheck, now: DateTime<Utc>) -> RateDecision {
        let size = ChronoDuration::milliseconds(window.kind.size_ms());
        let reset_at = check
            .oldest_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|oldest| oldest + size)
            .unwrap_or(now + size);

        RateDecision {
            allowed: check.allowed,
            remaining: window.max.saturating_sub(check.count),
            reset_at,
            window_kind: window.kind,
            degraded: false,
        }
    }

    fn degrade(
        &self,
        client_key: &str,
        error: StoreError,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        if !self.fail_open {
            warn!(
                event = "rate_store_degraded",
                store = %self.store.name(),
                client = %client_key,
                error = %error,
                "Rate store unavailable, rejecting (fail-open disabled)"
            );
            return Err(error);
        }

        warn!(
            event = "rate_store_degraded",
            store = %self.store.name(),
            client = %client_key,
            error = %error,
            "Rate store unavailable, allowing request"
        );
        Ok(RateDecision {
            allowed: true,
            remaining: self.minute.max,
            reset_at: now + ChronoDuration::milliseconds(WindowKind::PerMinute.size_ms()),
            window_kind: WindowKind::PerMinute,
            degraded: true,
        })
    }
}
