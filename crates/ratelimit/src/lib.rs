//! Request admission control for Turnstile.
//!
//! Two sliding windows (per-minute, per-day) are checked for every client
//! key. Window state lives behind the [`RateStore`] trait so the same
//! [`RateLimiter`] runs against Redis in production and against a
//! process-local map in development and tests.

pub mod limiter;
pub mod local;
pub mod redis_store;

pub use limiter::{RateDecision, RateLimiter};
pub use local::LocalRateStore;
pub use redis_store::RedisRateStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use turnstile_core::StoreError;

/// Which window a decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    PerMinute,
    PerDay,
}

impl WindowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerMinute => "per_minute",
            Self::PerDay => "per_day",
        }
    }

    /// Window length in milliseconds.
    pub fn size_ms(self) -> i64 {
        match self {
            Self::PerMinute => 60_000,
            Self::PerDay => 86_400_000,
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A window and its admission ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub kind: WindowKind,
    pub max: u32,
}

/// Outcome of one atomic prune → count → conditional record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCheck {
    /// Whether the request was recorded
    pub allowed: bool,
    /// Entries in the window after this check
    pub count: u32,
    /// Oldest retained timestamp (ms since epoch), if any
    pub oldest_ms: Option<i64>,
}

/// Storage for sliding-window timestamps.
///
/// Implementations must make `check_and_record` atomic per key: entries
/// at or before `now_ms - window` are dropped, the rest counted, and
/// `now_ms` appended only when the count is below `window.max`.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Backend label for logs.
    fn name(&self) -> &str;

    async fn check_and_record(
        &self,
        key: &str,
        window: &WindowSpec,
        now_ms: i64,
    ) -> Result<WindowCheck, StoreError>;
}
