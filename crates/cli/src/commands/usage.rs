//! `turnstile usage` / `turnstile plan` — Inspect and administer quotas.

use std::path::Path;
use turnstile_config::AppConfig;
use turnstile_quota::{Feature, FeatureUsage, PlanTier, UsageSnapshot};

fn format_counter(usage: &FeatureUsage) -> String {
    if usage.is_unlimited() {
        format!("{} / unlimited", usage.used)
    } else {
        format!("{} / {}", usage.used, usage.limit)
    }
}

fn render_snapshot(snapshot: &UsageSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("Usage for {}\n", snapshot.user_id));
    out.push_str("-------------------------------------\n");
    out.push_str(&format!("  Plan:      {}\n", snapshot.plan.title()));
    if let Some(expires) = snapshot.plan_expires_at {
        out.push_str(&format!("  Expires:   {}\n", expires.to_rfc3339()));
    }
    out.push_str(&format!("  Day:       {}\n", snapshot.day_key));
    out.push_str(&format!("  Week:      {}\n", snapshot.week_key));
    out.push('\n');
    for feature in Feature::ALL {
        let usage = snapshot.feature(feature);
        out.push_str(&format!(
            "  {:<6} {:>18} {:<9} lifetime {}\n",
            feature.as_str(),
            format_counter(usage),
            feature.period().per(),
            usage.lifetime
        ));
    }
    out
}

pub async fn show(
    config_path: Option<&Path>,
    user: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        AppConfig::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let gate = turnstile_gateway::build_quota_gate(&config).await?;
    let snapshot = gate.snapshot(user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", render_snapshot(&snapshot));
    }
    Ok(())
}

pub async fn set_plan(
    config_path: Option<&Path>,
    user: &str,
    tier: &str,
    days: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan: PlanTier = tier.parse()?;
    let expires_at = match days {
        Some(d) if d <= 0 => return Err("--days must be positive".into()),
        Some(d) if plan != PlanTier::Free => Some(chrono::Utc::now() + chrono::Duration::days(d)),
        _ => None,
    };

    let config =
        AppConfig::load_with(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let gate = turnstile_gateway::build_quota_gate(&config).await?;
    gate.set_plan(user, plan, expires_at).await?;

    match expires_at {
        Some(at) => println!("{user} is now on {} until {}", plan.title(), at.to_rfc3339()),
        None => println!("{user} is now on {}", plan.title()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> UsageSnapshot {
        UsageSnapshot {
            user_id: "alice".into(),
            plan: PlanTier::Pro,
            plan_expires_at: None,
            day_key: "2026-03-02".into(),
            week_key: "2026-W10".into(),
            chat: FeatureUsage { used: 12, limit: 200, lifetime: 340 },
            video: FeatureUsage { used: 1, limit: 10, lifetime: 4 },
            voice: FeatureUsage { used: 0, limit: -1, lifetime: 0 },
        }
    }

    #[test]
    fn table_lists_every_feature() {
        let text = render_snapshot(&snapshot());
        assert!(text.contains("Plan:      Pro"));
        assert!(text.contains("12 / 200"));
        assert!(text.contains("per day"));
        assert!(text.contains("0 / unlimited"));
        assert!(text.contains("lifetime 340"));
    }
}
