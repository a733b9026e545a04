//! Plan-based usage quotas for Turnstile.
//!
//! A [`QuotaGate`] answers "may this user use this feature now?" from the
//! user's plan and period counters, downgrading expired paid plans on the
//! way, and commits usage after a successful turn.
//!
//! Counters are keyed by period (UTC day for chat, ISO week for video and
//! voice), so a new period simply starts from zero.

pub mod gate;
pub mod memory;
pub mod plan;
pub mod sqlite;
pub mod store;

pub use gate::{AccessDecision, QuotaGate};
pub use memory::InMemoryUsageStore;
pub use plan::{Feature, Period, PlanCatalog, PlanLimits, PlanTier, UNLIMITED};
pub use sqlite::SqliteUsageStore;
pub use store::{Account, FeatureUsage, UsageEvent, UsageSnapshot, UsageStore};
