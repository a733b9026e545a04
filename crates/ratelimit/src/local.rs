//! Process-local rate store.
//!
//! A mutex-guarded map of timestamp queues. Each check holds the lock for
//! the whole prune/count/record sequence, so it is atomic within one
//! process. Several gateway instances sharing traffic each keep their own
//! counts; use [`RedisRateStore`](crate::RedisRateStore) for that.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use turnstile_core::StoreError;

use crate::{RateStore, WindowCheck, WindowKind, WindowSpec};

/// Key count above which idle queues are swept.
const SWEEP_THRESHOLD: usize = 10_000;

/// Minimum time between sweeps.
const SWEEP_INTERVAL_MS: i64 = 60_000;

#[derive(Default)]
pub struct LocalRateStore {
    inner: Mutex<Windows>,
}

#[derive(Default)]
struct Windows {
    queues: HashMap<(WindowKind, String), VecDeque<i64>>,
    last_sweep_ms: i64,
}

impl Windows {
    /// Drop queues with no entry inside their own window.
    fn sweep_if_due(&mut self, now_ms: i64) {
        if self.queues.len() <= SWEEP_THRESHOLD || now_ms - self.last_sweep_ms < SWEEP_INTERVAL_MS {
            return;
        }
        self.queues.retain(|(kind, _), stamps| {
            stamps.back().is_some_and(|t| *t > now_ms - kind.size_ms())
        });
        self.last_sweep_ms = now_ms;
    }
}

impl LocalRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys (all windows).
    pub fn tracked_keys(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).queues.len()
    }
}

#[async_trait]
impl RateStore for LocalRateStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn check_and_record(
        &self,
        key: &str,
        window: &WindowSpec,
        now_ms: i64,
    ) -> Result<WindowCheck, StoreError> {
        let window_start = now_ms - window.kind.size_ms();
        let mut windows = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        windows.sweep_if_due(now_ms);

        let stamps = windows
            .queues
            .entry((window.kind, key.to_string()))
            .or_default();

        while stamps.front().is_some_and(|t| *t <= window_start) {
            stamps.pop_front();
        }

        let allowed = stamps.len() < window.max as usize;
        if allowed {
            stamps.push_back(now_ms);
        }

        Ok(WindowCheck {
            allowed,
            count: stamps.len() as u32,
            oldest_ms: stamps.front().copied(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WindowKind;

    const MINUTE: WindowSpec = WindowSpec {
        kind: WindowKind::PerMinute,
        max: 3,
    };

    #[tokio::test]
    async fn admits_up_to_max_then_rejects() {
        let store = LocalRateStore::new();
        for i in 0..3 {
            let check = store.check_and_record("1.2.3.4", &MINUTE, 1_000 + i).await.unwrap();
            assert!(check.allowed);
            assert_eq!(check.count, (i + 1) as u32);
        }

        let check = store.check_and_record("1.2.3.4", &MINUTE, 1_010).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.count, 3);
        assert_eq!(check.oldest_ms, Some(1_000));
    }

    #[tokio::test]
    async fn entries_expire_after_window() {
        let store = LocalRateStore::new();
        for i in 0..3 {
            store.check_and_record("k", &MINUTE, i * 10).await.unwrap();
        }
        assert!(!store.check_and_record("k", &MINUTE, 59_000).await.unwrap().allowed);

        // The first entry (t=0) is exactly one window old at t=60_000.
        let check = store.check_and_record("k", &MINUTE, 60_000).await.unwrap();
        assert!(check.allowed);
        assert_eq!(check.oldest_ms, Some(10));
    }

    #[tokio::test]
    async fn rejected_requests_are_not_recorded() {
        let store = LocalRateStore::new();
        for _ in 0..10 {
            store.check_and_record("k", &MINUTE, 5).await.unwrap();
        }
        let check = store.check_and_record("k", &MINUTE, 6).await.unwrap();
        assert_eq!(check.count, 3);
    }

    #[tokio::test]
    async fn keys_and_windows_are_independent() {
        let store = LocalRateStore::new();
        let day = WindowSpec {
            kind: WindowKind::PerDay,
            max: 1,
        };
        assert!(store.check_and_record("a", &day, 0).await.unwrap().allowed);
        assert!(store.check_and_record("a", &MINUTE, 0).await.unwrap().allowed);
        assert!(store.check_and_record("b", &day, 0).await.unwrap().allowed);
        assert!(!store.check_and_record("a", &day, 1).await.unwrap().allowed);
        assert_eq!(store.tracked_keys(), 3);
    }

    #[tokio::test]
    async fn sweep_keeps_live_day_windows() {
        let store = LocalRateStore::new();
        let day = WindowSpec {
            kind: WindowKind::PerDay,
            max: 1,
        };
        store.check_and_record("a", &day, 0).await.unwrap();
        for i in 0..=SWEEP_THRESHOLD {
            store.check_and_record(&format!("c{i}"), &MINUTE, 0).await.unwrap();
        }

        // Two minutes later the minute queues are idle and get swept.
        store.check_and_record("late", &MINUTE, 120_000).await.unwrap();
        assert_eq!(store.tracked_keys(), 2);
        assert!(!store.check_and_record("a", &day, 120_001).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn sweep_runs_at_most_once_per_interval() {
        let store = LocalRateStore::new();
        for i in 0..=SWEEP_THRESHOLD {
            store.check_and_record(&format!("k{i}"), &MINUTE, 30_000).await.unwrap();
        }

        // Sweeps at 61s, but every queue is still live.
        store.check_and_record("x", &MINUTE, 61_000).await.unwrap();
        assert_eq!(store.tracked_keys(), SWEEP_THRESHOLD + 2);

        // Queues went idle at 90s, but the next sweep is not due until 121s.
        store.check_and_record("y", &MINUTE, 100_000).await.unwrap();
        assert_eq!(store.tracked_keys(), SWEEP_THRESHOLD + 3);

        store.check_and_record("z", &MINUTE, 121_000).await.unwrap();
        assert_eq!(store.tracked_keys(), 2);
    }
}
