//! SQLite usage store.
//!
//! Tables:
//! - `accounts` — plan tier and expiry per user
//! - `usage_counters` — one row per (user, feature, period key)
//! - `lifetime_usage` — running total per (user, feature)
//! - `usage_events` — one row per increment, keyed by (user, event id)
//!
//! An increment inserts its event row and bumps both counters in one
//! transaction; a conflicting event id aborts before any counter moves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};
use turnstile_core::StoreError;

use crate::plan::{Feature, PlanTier};
use crate::store::{Account, UsageEvent, UsageStore};

pub struct SqliteUsageStore {
    pool: SqlitePool,
}

impl SqliteUsageStore {
    /// Open (creating if missing) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Backend(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Shared-cache memory databases lock per table; one connection avoids SQLITE_LOCKED.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite usage store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "accounts table",
                r#"
                CREATE TABLE IF NOT EXISTS accounts (
                    user_id          TEXT PRIMARY KEY,
                    plan             TEXT NOT NULL DEFAULT 'free',
                    plan_expires_at  TEXT,
                    updated_at       TEXT NOT NULL
                )
                "#,
            ),
            (
                "usage_counters table",
                r#"
                CREATE TABLE IF NOT EXISTS usage_counters (
                    user_id     TEXT NOT NULL,
                    feature     TEXT NOT NULL,
                    period_key  TEXT NOT NULL,
                    used        INTEGER NOT NULL DEFAULT 0,
                    updated_at  TEXT NOT NULL,
                    PRIMARY KEY (user_id, feature, period_key)
                )
                "#,
            ),
            (
                "lifetime_usage table",
                r#"
                CREATE TABLE IF NOT EXISTS lifetime_usage (
                    user_id     TEXT NOT NULL,
                    feature     TEXT NOT NULL,
                    total       INTEGER NOT NULL DEFAULT 0,
                    updated_at  TEXT NOT NULL,
                    PRIMARY KEY (user_id, feature)
                )
                "#,
            ),
            (
                "usage_events table",
                r#"
                CREATE TABLE IF NOT EXISTS usage_events (
                    user_id     TEXT NOT NULL,
                    event_id    TEXT NOT NULL,
                    feature     TEXT NOT NULL,
                    period_key  TEXT NOT NULL,
                    amount      INTEGER NOT NULL,
                    created_at  TEXT NOT NULL,
                    PRIMARY KEY (user_id, event_id)
                )
                "#,
            ),
            (
                "usage_events index",
                "CREATE INDEX IF NOT EXISTS idx_usage_events_user ON usage_events(user_id, created_at DESC)",
            ),
        ];

        for (label, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{label}: {e}")))?;
        }

        debug!("SQLite usage migrations complete");
        Ok(())
    }
}

fn backend(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Backend(format!("{context}: {e}"))
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn account(&self, user_id: &str) -> Result<Account, StoreError> {
        let row = sqlx::query("SELECT plan, plan_expires_at FROM accounts WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("account lookup"))?;

        let Some(row) = row else {
            return Ok(Account::free(user_id));
        };

        let plan_str: String = row.try_get("plan").map_err(backend("plan column"))?;
        let expires_str: Option<String> = row
            .try_get("plan_expires_at")
            .map_err(backend("plan_expires_at column"))?;

        let plan = plan_str.parse::<PlanTier>().unwrap_or_else(|e| {
            warn!(user_id, error = %e, "Unreadable plan, treating as free");
            PlanTier::Free
        });
        let plan_expires_at = expires_str.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        Ok(Account {
            user_id: user_id.to_string(),
            plan,
            plan_expires_at,
        })
    }

    async fn set_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, plan, plan_expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                plan = excluded.plan,
                plan_expires_at = excluded.plan_expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(plan.as_str())
        .bind(expires_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend("plan upsert"))?;
        Ok(())
    }

    async fn period_usage(
        &self,
        user_id: &str,
        feature: Feature,
        period_key: &str,
    ) -> Result<i64, StoreError> {
        let used: Option<i64> = sqlx::query_scalar(
            "SELECT used FROM usage_counters WHERE user_id = ?1 AND feature = ?2 AND period_key = ?3",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("period counter"))?;
        Ok(used.unwrap_or(0))
    }

    async fn lifetime_usage(&self, user_id: &str, feature: Feature) -> Result<i64, StoreError> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT total FROM lifetime_usage WHERE user_id = ?1 AND feature = ?2",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("lifetime counter"))?;
        Ok(total.unwrap_or(0))
    }

    async fn record_usage(&self, event: &UsageEvent) -> Result<bool, StoreError> {
        let at = event.at.to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(backend("begin"))?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO usage_events (user_id, event_id, feature, period_key, amount, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&event.user_id)
        .bind(&event.event_id)
        .bind(event.feature.as_str())
        .bind(&event.period_key)
        .bind(event.amount)
        .bind(&at)
        .execute(&mut *tx)
        .await
        .map_err(backend("usage event insert"))?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(backend("rollback"))?;
            debug!(event_id = %event.event_id, "Duplicate usage event ignored");
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO usage_counters (user_id, feature, period_key, used, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, feature, period_key) DO UPDATE SET
                used = used + excluded.used,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&event.user_id)
        .bind(event.feature.as_str())
        .bind(&event.period_key)
        .bind(event.amount)
        .bind(&at)
        .execute(&mut *tx)
        .await
        .map_err(backend("period counter upsert"))?;

        sqlx::query(
            r#"
            INSERT INTO lifetime_usage (user_id, feature, total, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, feature) DO UPDATE SET
                total = total + excluded.total,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&event.user_id)
        .bind(event.feature.as_str())
        .bind(event.amount)
        .bind(&at)
        .execute(&mut *tx)
        .await
        .map_err(backend("lifetime counter upsert"))?;

        tx.commit().await.map_err(backend("commit"))?;
        Ok(true)
    }

    async fn event_recorded(&self, user_id: &str, event_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM usage_events WHERE user_id = ?1 AND event_id = ?2",
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("usage event lookup"))?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    async fn test_store() -> SqliteUsageStore {
        SqliteUsageStore::new("sqlite::memory:").await.unwrap()
    }

    fn event(id: &str, feature: Feature, period_key: &str) -> UsageEvent {
        UsageEvent {
            event_id: id.into(),
            user_id: "alice".into(),
            feature,
            period_key: period_key.into(),
            amount: 1,
            at: Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn missing_account_reads_as_free() {
        let store = test_store().await;
        assert_eq!(store.account("ghost").await.unwrap(), Account::free("ghost"));
    }

    #[tokio::test]
    async fn plan_roundtrip_with_expiry() {
        let store = test_store().await;
        let expiry = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        store.set_plan("alice", PlanTier::Pro, Some(expiry)).await.unwrap();

        let account = store.account("alice").await.unwrap();
        assert_eq!(account.plan, PlanTier::Pro);
        assert_eq!(account.plan_expires_at, Some(expiry));

        store.set_plan("alice", PlanTier::Free, None).await.unwrap();
        let account = store.account("alice").await.unwrap();
        assert_eq!(account.plan, PlanTier::Free);
        assert!(account.plan_expires_at.is_none());
    }

    #[tokio::test]
    async fn counters_are_upserted_per_period() {
        let store = test_store().await;
        store.record_usage(&event("e1", Feature::Chat, "2026-03-02")).await.unwrap();
        store.record_usage(&event("e2", Feature::Chat, "2026-03-02")).await.unwrap();
        store.record_usage(&event("e3", Feature::Chat, "2026-03-03")).await.unwrap();
        store.record_usage(&event("e4", Feature::Voice, "2026-W10")).await.unwrap();

        assert_eq!(store.period_usage("alice", Feature::Chat, "2026-03-02").await.unwrap(), 2);
        assert_eq!(store.period_usage("alice", Feature::Chat, "2026-03-03").await.unwrap(), 1);
        assert_eq!(store.period_usage("alice", Feature::Voice, "2026-W10").await.unwrap(), 1);
        assert_eq!(store.lifetime_usage("alice", Feature::Chat).await.unwrap(), 3);
        assert_eq!(store.lifetime_usage("alice", Feature::Video).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_event_leaves_counters_untouched() {
        let store = test_store().await;
        assert!(store.record_usage(&event("req-1", Feature::Chat, "2026-03-02")).await.unwrap());
        assert!(!store.record_usage(&event("req-1", Feature::Chat, "2026-03-02")).await.unwrap());

        assert_eq!(store.period_usage("alice", Feature::Chat, "2026-03-02").await.unwrap(), 1);
        assert_eq!(store.lifetime_usage("alice", Feature::Chat).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_event_id_counts_for_each_user() {
        let store = test_store().await;
        let mut bobs = event("req-1", Feature::Chat, "2026-03-02");
        bobs.user_id = "bob".into();

        assert!(store.record_usage(&event("req-1", Feature::Chat, "2026-03-02")).await.unwrap());
        assert!(store.record_usage(&bobs).await.unwrap());

        assert_eq!(store.lifetime_usage("alice", Feature::Chat).await.unwrap(), 1);
        assert_eq!(store.lifetime_usage("bob", Feature::Chat).await.unwrap(), 1);
        assert!(store.event_recorded("bob", "req-1").await.unwrap());
        assert!(!store.event_recorded("carol", "req-1").await.unwrap());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteUsageStore::new(path).await.unwrap();
            store.record_usage(&event("e1", Feature::Chat, "2026-03-02")).await.unwrap();
            store
                .set_plan("alice", PlanTier::Pro, Some(Utc::now() + Duration::days(30)))
                .await
                .unwrap();
        }

        let store = SqliteUsageStore::new(path).await.unwrap();
        assert_eq!(store.period_usage("alice", Feature::Chat, "2026-03-02").await.unwrap(), 1);
        assert_eq!(store.account("alice").await.unwrap().plan, PlanTier::Pro);
    }
}
