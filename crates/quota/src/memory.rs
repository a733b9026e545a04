//! In-memory usage store — for tests and ephemeral dev gateways.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use turnstile_core::StoreError;

use crate::plan::{Feature, PlanTier};
use crate::store::{Account, UsageEvent, UsageStore};

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    periods: HashMap<(String, Feature, String), i64>,
    lifetime: HashMap<(String, Feature), i64>,
    /// (user id, event id)
    seen_events: HashSet<(String, String)>,
}

#[derive(Default)]
pub struct InMemoryUsageStore {
    state: RwLock<State>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn account(&self, user_id: &str) -> Result<Account, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Account::free(user_id)))
    }

    async fn set_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.accounts.insert(
            user_id.to_string(),
            Account {
                user_id: user_id.to_string(),
                plan,
                plan_expires_at: expires_at,
            },
        );
        Ok(())
    }

    async fn period_usage(
        &self,
        user_id: &str,
        feature: Feature,
        period_key: &str,
    ) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .periods
            .get(&(user_id.to_string(), feature, period_key.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn lifetime_usage(&self, user_id: &str, feature: Feature) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .lifetime
            .get(&(user_id.to_string(), feature))
            .copied()
            .unwrap_or(0))
    }

    async fn record_usage(&self, event: &UsageEvent) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if !state
            .seen_events
            .insert((event.user_id.clone(), event.event_id.clone()))
        {
            return Ok(false);
        }

        *state
            .periods
            .entry((event.user_id.clone(), event.feature, event.period_key.clone()))
            .or_insert(0) += event.amount;
        *state
            .lifetime
            .entry((event.user_id.clone(), event.feature))
            .or_insert(0) += event.amount;
        Ok(true)
    }

    async fn event_recorded(&self, user_id: &str, event_id: &str) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .seen_events
            .contains(&(user_id.to_string(), event_id.to_string())))
    }
}
