//! Feature-access checks and usage commits.

use std::sync::Arc;
use tracing::{debug, info, warn};
use turnstile_core::{Clock, StoreError, SystemClock};

use crate::plan::{Feature, Period, PlanCatalog, PlanTier, UNLIMITED};
use crate::store::{FeatureUsage, UsageEvent, UsageSnapshot, UsageStore};

/// Result of [`QuotaGate::check_access`].
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub snapshot: UsageSnapshot,
    /// Upgrade-oriented explanation, set only on denial
    pub message: Option<String>,
}

pub struct QuotaGate {
    store: Arc<dyn UsageStore>,
    catalog: PlanCatalog,
    clock: Arc<dyn Clock>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn UsageStore>, catalog: PlanCatalog) -> Self {
        Self::with_clock(store, catalog, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn UsageStore>, catalog: PlanCatalog, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            catalog,
            clock,
        }
    }

    /// Current plan and counters for `user_id`.
    ///
    /// An expired paid plan is downgraded to free, with its expiry
    /// cleared, before anything is read.
    pub async fn snapshot(&self, user_id: &str) -> Result<UsageSnapshot, StoreError> {
        let now = self.clock.now();
        let mut account = self.store.account(user_id).await?;

        if account.is_expired(now) {
            info!(
                user_id,
                plan = %account.plan,
                expired_at = ?account.plan_expires_at,
                "Plan expired, downgrading to free"
            );
            self.store.set_plan(user_id, PlanTier::Free, None).await?;
            account.plan = PlanTier::Free;
            account.plan_expires_at = None;
        }

        let limits = self.catalog.limits(account.plan);
        let day_key = Period::Daily.key(now);
        let week_key = Period::Weekly.key(now);

        let mut usage = Vec::with_capacity(Feature::ALL.len());
        for feature in Feature::ALL {
            let period_key = match feature.period() {
                Period::Daily => &day_key,
                Period::Weekly => &week_key,
            };
            usage.push(FeatureUsage {
                used: self.store.period_usage(user_id, feature, period_key).await?,
                limit: limits.ceiling(feature),
                lifetime: self.store.lifetime_usage(user_id, feature).await?,
            });
        }

        Ok(UsageSnapshot {
            user_id: user_id.to_string(),
            plan: account.plan,
            plan_expires_at: account.plan_expires_at,
            day_key,
            week_key,
            chat: usage[0],
            video: usage[1],
            voice: usage[2],
        })
    }

    /// May `user_id` use `feature` right now?
    ///
    /// Store failures propagate; callers decide whether that denies.
    pub async fn check_access(&self, user_id: &str, feature: Feature) -> Result<AccessDecision, StoreError> {
        let snapshot = self.snapshot(user_id).await?;
        let usage = snapshot.feature(feature);

        if !usage.exhausted() {
            debug!(user_id, %feature, used = usage.used, limit = usage.limit, "Quota check passed");
            return Ok(AccessDecision {
                allowed: true,
                snapshot,
                message: None,
            });
        }

        let message = self.denial_message(snapshot.plan, feature, usage.limit);
        info!(user_id, plan = %snapshot.plan, %feature, used = usage.used, "Quota exhausted");
        Ok(AccessDecision {
            allowed: false,
            snapshot,
            message: Some(message),
        })
    }

    fn denial_message(&self, plan: PlanTier, feature: Feature, limit: i64) -> String {
        let period = feature.period();
        let noun = feature.noun();

        if limit == 0 {
            let next = self.next_tier_offering(plan, feature);
            return match next {
                Some(tier) => format!(
                    "{} is not included in the {} plan. Upgrade to {} to unlock it.",
                    feature.title(),
                    plan.title(),
                    tier.title()
                ),
                None => format!(
                    "{} is not included in your plan. Please contact support to enable it.",
                    feature.title()
                ),
            };
        }

        let used_up = match plan {
            PlanTier::Free => format!("You've used all {limit} free {noun} {}.", period.phrase()),
            tier => format!(
                "You've reached your {} plan limit of {limit} {noun} {}.",
                tier.title(),
                period.per()
            ),
        };

        let upsell = match self.next_tier_offering(plan, feature) {
            Some(tier) => {
                let ceiling = self.catalog.limits(tier).ceiling(feature);
                if ceiling == UNLIMITED {
                    format!("Upgrade to {} for unlimited {noun}.", tier.title())
                } else {
                    format!("Upgrade to {} for up to {ceiling} {noun} {}.", tier.title(), period.per())
                }
            }
            None => "Please contact support to raise your limit.".to_string(),
        };

        format!("{used_up} {upsell}")
    }

    /// The cheapest tier above `plan` with a higher ceiling for `feature`.
    fn next_tier_offering(&self, plan: PlanTier, feature: Feature) -> Option<PlanTier> {
        let current = self.catalog.limits(plan).ceiling(feature);
        let higher: &[PlanTier] = match plan {
            PlanTier::Free => &[PlanTier::Pro, PlanTier::Enterprise],
            PlanTier::Pro => &[PlanTier::Enterprise],
            PlanTier::Enterprise => &[],
        };
        higher.iter().copied().find(|tier| {
            let ceiling = self.catalog.limits(*tier).ceiling(feature);
            ceiling == UNLIMITED || ceiling > current
        })
    }

    /// Count `amount` uses of `feature`. At-least-once: a retry after an
    /// ambiguous failure may count twice. Returns whether the store
    /// acknowledged the write.
    pub async fn increment_usage(&self, user_id: &str, feature: Feature, amount: i64) -> bool {
        let event_id = uuid::Uuid::new_v4().to_string();
        self.increment_usage_keyed(user_id, feature, amount, &event_id).await
    }

    /// Like [`increment_usage`](Self::increment_usage) but deduplicated on
    /// `key`: a second call with the same key is acknowledged without
    /// counting again.
    pub async fn increment_usage_keyed(&self, user_id: &str, feature: Feature, amount: i64, key: &str) -> bool {
        let now = self.clock.now();
        let event = UsageEvent {
            event_id: usage_event_id(feature, key),
            user_id: user_id.to_string(),
            feature,
            period_key: feature.period().key(now),
            amount,
            at: now,
        };

        match self.store.record_usage(&event).await {
            Ok(true) => {
                debug!(user_id, %feature, amount, period = %event.period_key, "Usage recorded");
                true
            }
            Ok(false) => {
                debug!(user_id, %feature, key, "Usage already recorded for key");
                true
            }
            Err(e) => {
                warn!(
                    event = "usage_commit_failed",
                    user_id,
                    %feature,
                    error = %e,
                    "Failed to record usage"
                );
                false
            }
        }
    }

    /// Whether `user_id` already committed usage of `feature` under `key`.
    pub async fn is_recorded(&self, user_id: &str, feature: Feature, key: &str) -> Result<bool, StoreError> {
        self.store
            .event_recorded(user_id, &usage_event_id(feature, key))
            .await
    }

    /// Change a user's plan (administrative; billing lives elsewhere).
    pub async fn set_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), StoreError> {
        self.store.set_plan(user_id, plan, expires_at).await
    }
}

/// Event id for a keyed commit. Stores scope it per user.
fn usage_event_id(feature: Feature, key: &str) -> String {
    format!("{}:{key}", feature.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryUsageStore;
    use crate::sqlite::SqliteUsageStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tracing_test::traced_test;
    use turnstile_core::ManualClock;

    use crate::store::Account;

    fn monday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn gate_with(store: Arc<dyn UsageStore>) -> (QuotaGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(monday_noon()));
        let gate = QuotaGate::with_clock(store, PlanCatalog::default(), clock.clone());
        (gate, clock)
    }

    fn gate() -> (QuotaGate, Arc<ManualClock>) {
        gate_with(Arc::new(InMemoryUsageStore::new()))
    }

    struct BrokenStore;

    #[async_trait]
    impl UsageStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn account(&self, user_id: &str) -> Result<Account, StoreError> {
            Ok(Account::free(user_id))
        }
        async fn set_plan(&self, _: &str, _: PlanTier, _: Option<DateTime<Utc>>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
        async fn period_usage(&self, _: &str, _: Feature, _: &str) -> Result<i64, StoreError> {
            Ok(0)
        }
        async fn lifetime_usage(&self, _: &str, _: Feature) -> Result<i64, StoreError> {
            Ok(0)
        }
        async fn record_usage(&self, _: &UsageEvent) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
        async fn event_recorded(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
    }

    #[tokio::test]
    async fn free_user_denied_after_daily_ceiling() {
        let (gate, _clock) = gate();

        for i in 0..10 {
            let decision = gate.check_access("u1", Feature::Chat).await.unwrap();
            assert!(decision.allowed, "turn {i} should be allowed");
            assert!(gate.increment_usage("u1", Feature::Chat, 1).await);
        }

        let decision = gate.check_access("u1", Feature::Chat).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.snapshot.chat.used, 10);
        let message = decision.message.unwrap();
        assert!(message.contains("10 free chat messages today"), "{message}");
        assert!(message.contains("Upgrade to Pro"), "{message}");
    }

    #[tokio::test]
    async fn daily_counter_rolls_over_at_utc_midnight() {
        let (gate, clock) = gate();
        for _ in 0..10 {
            gate.increment_usage("u1", Feature::Chat, 1).await;
        }
        assert!(!gate.check_access("u1", Feature::Chat).await.unwrap().allowed);

        clock.set(Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 1).unwrap());
        let decision = gate.check_access("u1", Feature::Chat).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.snapshot.chat.used, 0);
        assert_eq!(decision.snapshot.chat.lifetime, 10);
    }

    #[tokio::test]
    async fn weekly_feature_counts_across_days() {
        let (gate, clock) = gate();
        for _ in 0..3 {
            gate.increment_usage("u1", Feature::Voice, 1).await;
            clock.advance(Duration::days(1));
        }
        // Thursday of the same ISO week.
        let decision = gate.check_access("u1", Feature::Voice).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.message.unwrap().contains("this week"));

        clock.set(Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap());
        assert!(gate.check_access("u1", Feature::Voice).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn feature_not_in_plan() {
        let (gate, _clock) = gate();
        let decision = gate.check_access("u1", Feature::Video).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(
            decision.message.unwrap(),
            "Video generation is not included in the Free plan. Upgrade to Pro to unlock it."
        );
    }

    #[tokio::test]
    async fn pro_denial_points_at_enterprise() {
        let (gate, _clock) = gate();
        gate.set_plan("p1", PlanTier::Pro, None).await.unwrap();
        gate.increment_usage("p1", Feature::Video, 10).await;

        let decision = gate.check_access("p1", Feature::Video).await.unwrap();
        assert!(!decision.allowed);
        let message = decision.message.unwrap();
        assert!(message.contains("Pro plan limit of 10 video generations per week"), "{message}");
        assert!(message.contains("Upgrade to Enterprise for unlimited video generations"), "{message}");
    }

    #[tokio::test]
    async fn enterprise_is_unlimited() {
        let (gate, _clock) = gate();
        gate.set_plan("e1", PlanTier::Enterprise, None).await.unwrap();
        gate.increment_usage("e1", Feature::Chat, 10_000).await;

        let decision = gate.check_access("e1", Feature::Chat).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.snapshot.chat.remaining(), None);
    }

    #[tokio::test]
    async fn expired_pro_is_persisted_as_free() {
        let store = Arc::new(SqliteUsageStore::new("sqlite::memory:").await.unwrap());
        let (gate, _clock) = gate_with(store.clone());
        gate.set_plan("alice", PlanTier::Pro, Some(monday_noon() - Duration::hours(1)))
            .await
            .unwrap();

        let decision = gate.check_access("alice", Feature::Chat).await.unwrap();
        assert_eq!(decision.snapshot.plan, PlanTier::Free);
        assert!(decision.snapshot.plan_expires_at.is_none());
        assert_eq!(decision.snapshot.limits(), PlanCatalog::default().limits(PlanTier::Free));

        let stored = store.account("alice").await.unwrap();
        assert_eq!(stored, Account::free("alice"));
    }

    #[tokio::test]
    async fn unexpired_pro_keeps_its_plan() {
        let (gate, _clock) = gate();
        let expiry = monday_noon() + Duration::days(3);
        gate.set_plan("bob", PlanTier::Pro, Some(expiry)).await.unwrap();

        let snapshot = gate.snapshot("bob").await.unwrap();
        assert_eq!(snapshot.plan, PlanTier::Pro);
        assert_eq!(snapshot.plan_expires_at, Some(expiry));
        assert_eq!(snapshot.chat.limit, 200);
    }

    #[tokio::test]
    async fn keyed_increment_counts_once() {
        let (gate, _clock) = gate();
        assert!(gate.increment_usage_keyed("u1", Feature::Chat, 1, "req-42").await);
        assert!(gate.increment_usage_keyed("u1", Feature::Chat, 1, "req-42").await);

        let snapshot = gate.snapshot("u1").await.unwrap();
        assert_eq!(snapshot.chat.used, 1);
        assert!(gate.is_recorded("u1", Feature::Chat, "req-42").await.unwrap());
        assert!(!gate.is_recorded("u1", Feature::Voice, "req-42").await.unwrap());
    }

    #[tokio::test]
    async fn keyed_increment_is_scoped_per_user() {
        let (gate, _clock) = gate_with(Arc::new(SqliteUsageStore::new("sqlite::memory:").await.unwrap()));
        assert!(gate.increment_usage_keyed("alice", Feature::Chat, 1, "req-1").await);
        assert!(gate.increment_usage_keyed("bob", Feature::Chat, 1, "req-1").await);

        assert_eq!(gate.snapshot("alice").await.unwrap().chat.used, 1);
        assert_eq!(gate.snapshot("bob").await.unwrap().chat.used, 1);
        assert!(!gate.is_recorded("carol", Feature::Chat, "req-1").await.unwrap());
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_increment_is_logged_not_raised() {
        let (gate, _clock) = gate_with(Arc::new(BrokenStore));
        assert!(!gate.increment_usage("u1", Feature::Chat, 1).await);
        assert!(logs_contain("usage_commit_failed"));
    }
}
