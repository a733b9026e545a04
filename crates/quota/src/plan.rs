//! Plans, features, and the ceiling table.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use turnstile_config::{PlanLimitsConfig, PlanTableConfig};

/// Ceiling value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// A metered feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Chat,
    Video,
    Voice,
}

/// How often a feature's counter rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// UTC calendar day
    Daily,
    /// ISO week
    Weekly,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::Chat, Feature::Video, Feature::Voice];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Video => "video",
            Self::Voice => "voice",
        }
    }

    pub fn period(self) -> Period {
        match self {
            Self::Chat => Period::Daily,
            Self::Video | Self::Voice => Period::Weekly,
        }
    }

    /// Plural noun used in user-facing messages.
    pub(crate) fn noun(self) -> &'static str {
        match self {
            Self::Chat => "chat messages",
            Self::Video => "video generations",
            Self::Voice => "voice sessions",
        }
    }

    pub(crate) fn title(self) -> &'static str {
        match self {
            Self::Chat => "Chat",
            Self::Video => "Video generation",
            Self::Voice => "Voice",
        }
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "video" => Ok(Self::Video),
            "voice" => Ok(Self::Voice),
            other => Err(format!("unknown feature '{other}'")),
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Period {
    /// Counter key for the period containing `at`.
    ///
    /// Daily keys look like `2026-03-02`, weekly keys like `2026-W10`.
    /// A new period starts a new counter, so no reset job is needed to
    /// roll counters over.
    pub fn key(self, at: DateTime<Utc>) -> String {
        match self {
            Self::Daily => at.format("%Y-%m-%d").to_string(),
            Self::Weekly => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
        }
    }

    pub(crate) fn phrase(self) -> &'static str {
        match self {
            Self::Daily => "today",
            Self::Weekly => "this week",
        }
    }

    pub fn per(self) -> &'static str {
        match self {
            Self::Daily => "per day",
            Self::Weekly => "per week",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Pro => "Pro",
            Self::Enterprise => "Enterprise",
        }
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown plan '{other}'")),
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-feature ceilings of one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub chat_daily: i64,
    pub video_weekly: i64,
    pub voice_weekly: i64,
}

impl PlanLimits {
    pub fn ceiling(&self, feature: Feature) -> i64 {
        match feature {
            Feature::Chat => self.chat_daily,
            Feature::Video => self.video_weekly,
            Feature::Voice => self.voice_weekly,
        }
    }
}

impl From<PlanLimitsConfig> for PlanLimits {
    fn from(c: PlanLimitsConfig) -> Self {
        Self {
            chat_daily: c.chat_daily,
            video_weekly: c.video_weekly,
            voice_weekly: c.voice_weekly,
        }
    }
}

/// The ceiling table for every tier.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    free: PlanLimits,
    pro: PlanLimits,
    enterprise: PlanLimits,
}

impl PlanCatalog {
    pub fn from_config(table: &PlanTableConfig) -> Self {
        Self {
            free: table.free.into(),
            pro: table.pro.into(),
            enterprise: table.enterprise.into(),
        }
    }

    pub fn limits(&self, tier: PlanTier) -> PlanLimits {
        match tier {
            PlanTier::Free => self.free,
            PlanTier::Pro => self.pro,
            PlanTier::Enterprise => self.enterprise,
        }
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::from_config(&PlanTableConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_key_uses_utc_date() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 23, 59, 59).unwrap();
        assert_eq!(Period::Daily.key(at), "2026-03-02");
        let next = Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap();
        assert_eq!(Period::Daily.key(next), "2026-03-03");
    }

    #[test]
    fn weekly_key_uses_iso_week_year() {
        // 2027-01-01 is a Friday in ISO week 53 of 2026.
        let at = Utc.with_ymd_and_hms(2027, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(Period::Weekly.key(at), "2026-W53");
        let monday = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(Period::Weekly.key(monday), "2026-W10");
    }

    #[test]
    fn feature_periods() {
        assert_eq!(Feature::Chat.period(), Period::Daily);
        assert_eq!(Feature::Video.period(), Period::Weekly);
        assert_eq!(Feature::Voice.period(), Period::Weekly);
    }

    #[test]
    fn parses_tiers_and_features() {
        assert_eq!("pro".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert!("gold".parse::<PlanTier>().is_err());
        assert_eq!("voice".parse::<Feature>().unwrap(), Feature::Voice);
    }

    #[test]
    fn default_catalog_matches_config_defaults() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.limits(PlanTier::Free).ceiling(Feature::Chat), 10);
        assert_eq!(catalog.limits(PlanTier::Free).ceiling(Feature::Video), 0);
        assert_eq!(
            catalog.limits(PlanTier::Enterprise).ceiling(Feature::Voice),
            UNLIMITED
        );
    }
}
