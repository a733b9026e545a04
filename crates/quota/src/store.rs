//! Usage store abstraction and snapshot types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turnstile_core::StoreError;

use crate::plan::{Feature, PlanLimits, PlanTier, UNLIMITED};

/// A user's plan record. Users without a row are on the free plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub plan: PlanTier,
    pub plan_expires_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn free(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            plan: PlanTier::Free,
            plan_expires_at: None,
        }
    }

    /// A paid plan whose expiry is at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.plan != PlanTier::Free && self.plan_expires_at.is_some_and(|t| t <= now)
    }
}

/// One usage increment, as persisted.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    /// Deduplication key; a repeated id is ignored
    pub event_id: String,
    pub user_id: String,
    pub feature: Feature,
    pub period_key: String,
    pub amount: i64,
    pub at: DateTime<Utc>,
}

/// Counter for one feature in the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureUsage {
    pub used: i64,
    /// `-1` for unlimited
    pub limit: i64,
    pub lifetime: i64,
}

impl FeatureUsage {
    pub fn is_unlimited(&self) -> bool {
        self.limit == UNLIMITED
    }

    /// `None` when unlimited.
    pub fn remaining(&self) -> Option<i64> {
        (!self.is_unlimited()).then(|| (self.limit - self.used).max(0))
    }

    pub fn exhausted(&self) -> bool {
        !self.is_unlimited() && self.used >= self.limit
    }
}

/// Everything the gate knows about a user at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub user_id: String,
    pub plan: PlanTier,
    pub plan_expires_at: Option<DateTime<Utc>>,
    pub day_key: String,
    pub week_key: String,
    pub chat: FeatureUsage,
    pub video: FeatureUsage,
    pub voice: FeatureUsage,
}

impl UsageSnapshot {
    pub fn feature(&self, feature: Feature) -> &FeatureUsage {
        match feature {
            Feature::Chat => &self.chat,
            Feature::Video => &self.video,
            Feature::Voice => &self.voice,
        }
    }

    pub(crate) fn limits(&self) -> PlanLimits {
        PlanLimits {
            chat_daily: self.chat.limit,
            video_weekly: self.video.limit,
            voice_weekly: self.voice.limit,
        }
    }
}

/// Persistence for plans and usage counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    fn name(&self) -> &str;

    /// The user's plan; a missing user reads as free with no expiry.
    async fn account(&self, user_id: &str) -> Result<Account, StoreError>;

    async fn set_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Counter for `feature` in the period `period_key`, zero when absent.
    async fn period_usage(
        &self,
        user_id: &str,
        feature: Feature,
        period_key: &str,
    ) -> Result<i64, StoreError>;

    async fn lifetime_usage(&self, user_id: &str, feature: Feature) -> Result<i64, StoreError>;

    /// Apply one event to the period counter and the lifetime total together.
    ///
    /// Event ids are scoped per user. Returns `false` without changing
    /// anything when this user already recorded `event.event_id`.
    async fn record_usage(&self, event: &UsageEvent) -> Result<bool, StoreError>;

    /// Whether `user_id` already recorded an event with `event_id`.
    async fn event_recorded(&self, user_id: &str, event_id: &str) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn expiry_only_applies_to_paid_plans() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let mut account = Account::free("u1");
        account.plan_expires_at = Some(now - Duration::days(1));
        assert!(!account.is_expired(now));

        account.plan = PlanTier::Pro;
        assert!(account.is_expired(now));

        account.plan_expires_at = None;
        assert!(!account.is_expired(now));
    }

    #[test]
    fn feature_usage_remaining() {
        let limited = FeatureUsage {
            used: 12,
            limit: 10,
            lifetime: 40,
        };
        assert_eq!(limited.remaining(), Some(0));
        assert!(limited.exhausted());

        let unlimited = FeatureUsage {
            used: 500,
            limit: UNLIMITED,
            lifetime: 500,
        };
        assert_eq!(unlimited.remaining(), None);
        assert!(!unlimited.exhausted());
    }
}
