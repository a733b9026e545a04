//! Deterministic tool intents.
//!
//! A handful of requests have a fixed, structured answer that is cheaper
//! and more consistent to generate locally than through the model. When a
//! message matches one of them, the orchestrator returns the rendered
//! markdown and skips the completion call entirely.

use regex_lite::Regex;
use std::sync::LazyLock;

/// (label, share of budget in percent). Shares sum to 100.
const BUDGET_SPLIT: &[(&str, u32)] = &[
    ("Paid advertising", 35),
    ("Content creation", 25),
    ("Email marketing", 15),
    ("Social media management", 15),
    ("Analytics and testing", 10),
];

const CALENDAR_THEMES: &[(&str, &str)] = &[
    ("Behind the scenes", "Show how your product is made or how your day starts."),
    ("Customer spotlight", "Share a review or a photo from a happy customer."),
    ("Educational tip", "Teach one quick, practical tip related to your niche."),
    ("Product showcase", "Feature one product or service with a clear call to action."),
    ("Engagement question", "Ask your audience a simple question to spark comments."),
    ("User-generated content", "Repost something a customer created, with credit."),
    ("Weekly recap", "Summarize the week and tease what is coming next."),
];

const DEFAULT_PLATFORM: &str = "social media";
const DEFAULT_CALENDAR_DAYS: u32 = 7;
const MAX_CALENDAR_DAYS: u32 = 31;

static STRATEGY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(strategy|marketing plan|growth plan|budget plan)\b").expect("valid regex")
});

static MONEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*(k\b)?|\b([0-9][0-9,]*(?:\.[0-9]+)?)\s*(k\b)?\s*(?:dollars|usd)\b")
        .expect("valid regex")
});

static CALENDAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(content\s+calendar|posting\s+schedule|content\s+schedule|posting\s+plan)\b")
        .expect("valid regex")
});

static PLATFORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(instagram|tiktok|facebook|linkedin|twitter|youtube|pinterest|threads)\b")
        .expect("valid regex")
});

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([0-9]{1,3})[\s-]*(day|days|week|weeks)\b").expect("valid regex")
});

static AUTOMATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(automate|automating|automation|automations)\b").expect("valid regex")
});

static ADVICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what|which|how|recommend|recommendations|suggest|ideas?|help|should)\b")
        .expect("valid regex")
});

static AREA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(email|social media|invoic\w*|bookkeeping|accounting|customer support|customer service|leads?|scheduling|appointments?)\b")
        .expect("valid regex")
});

/// A recognized request with a locally generated answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    StrategyGeneration { budget: f64 },
    ContentCalendar { platform: String, days: u32 },
    AutomationRecommendation { area: String },
}

impl Intent {
    /// Name reported in response metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StrategyGeneration { .. } => "strategy_generation",
            Self::ContentCalendar { .. } => "content_calendar",
            Self::AutomationRecommendation { .. } => "automation_recommendation",
        }
    }

    /// Render the structured markdown answer.
    pub fn render(&self) -> String {
        match self {
            Self::StrategyGeneration { budget } => render_strategy(*budget),
            Self::ContentCalendar { platform, days } => render_calendar(platform, *days),
            Self::AutomationRecommendation { area } => render_automation(area),
        }
    }
}

/// Match `message` against the intent set, first match wins.
pub fn detect_intent(message: &str) -> Option<Intent> {
    if STRATEGY.is_match(message) {
        if let Some(budget) = parse_budget(message) {
            return Some(Intent::StrategyGeneration { budget });
        }
    }

    if CALENDAR.is_match(message) {
        let platform = PLATFORM
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| capitalize(&m.as_str().to_lowercase()))
            .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());
        return Some(Intent::ContentCalendar {
            platform,
            days: parse_days(message),
        });
    }

    if AUTOMATION.is_match(message) && ADVICE.is_match(message) {
        let area = AREA
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| normalize_area(m.as_str()))
            .unwrap_or("general operations")
            .to_string();
        return Some(Intent::AutomationRecommendation { area });
    }

    None
}

fn parse_budget(message: &str) -> Option<f64> {
    let caps = MONEY.captures(message)?;
    let (amount, thousands) = match caps.get(1) {
        Some(m) => (m.as_str(), caps.get(2).is_some()),
        None => (caps.get(3)?.as_str(), caps.get(4).is_some()),
    };
    let value: f64 = amount.replace(',', "").parse().ok()?;
    let value = if thousands { value * 1000.0 } else { value };
    (value > 0.0 && value.is_finite()).then_some(value)
}

fn parse_days(message: &str) -> u32 {
    let lower = message.to_lowercase();
    let days = match DURATION.captures(message) {
        Some(caps) => {
            let n: u32 = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(DEFAULT_CALENDAR_DAYS);
            let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            if unit.starts_with("week") { n.saturating_mul(7) } else { n }
        }
        None if lower.contains("month") => 30,
        None if lower.contains("two weeks") => 14,
        None => DEFAULT_CALENDAR_DAYS,
    };
    days.clamp(1, MAX_CALENDAR_DAYS)
}

fn normalize_area(raw: &str) -> &'static str {
    let lower = raw.to_lowercase();
    match lower.as_str() {
        "email" => "email",
        "social media" => "social media",
        "bookkeeping" | "accounting" => "bookkeeping",
        "customer support" | "customer service" => "customer support",
        "lead" | "leads" => "lead follow-up",
        "scheduling" | "appointment" | "appointments" => "scheduling",
        s if s.starts_with("invoic") => "invoicing",
        _ => "general operations",
    }
}

fn capitalize(word: &str) -> String {
    match word {
        "tiktok" => "TikTok".into(),
        "linkedin" => "LinkedIn".into(),
        "youtube" => "YouTube".into(),
        _ => {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

/// `$1,234` or `$1,234.50`.
fn format_money(value: f64) -> String {
    let cents = (value * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if frac == 0 {
        format!("${grouped}")
    } else {
        format!("${grouped}.{frac:02}")
    }
}

fn render_strategy(budget: f64) -> String {
    let mut out = format!(
        "## Marketing strategy for a {} budget\n\n\
         | Channel | Share | Amount |\n|---|---|---|\n",
        format_money(budget)
    );
    for (label, pct) in BUDGET_SPLIT {
        let amount = budget * f64::from(*pct) / 100.0;
        out.push_str(&format!("| {label} | {pct}% | {} |\n", format_money(amount)));
    }
    out.push_str(
        "\n### Next steps\n\
         1. Start paid ads small, then move budget to the best-performing audience after two weeks.\n\
         2. Batch-create content once a week so every channel has material ready.\n\
         3. Send at least one email per week to your existing customers.\n\
         4. Review results every Friday and shift up to 10% of the budget toward what works.\n",
    );
    out
}

fn render_calendar(platform: &str, days: u32) -> String {
    let mut out = format!("## {days}-day {platform} content calendar\n\n");
    for day in 1..=days {
        let (theme, idea) = CALENDAR_THEMES[(day as usize - 1) % CALENDAR_THEMES.len()];
        out.push_str(&format!("- **Day {day}: {theme}.** {idea}\n"));
    }
    out.push_str(
        "\nPost at a consistent time each day and reuse your best-performing posts after a few weeks.\n",
    );
    out
}

fn render_automation(area: &str) -> String {
    let steps: &[&str] = match area {
        "email" => &[
            "Set up a welcome sequence that sends automatically when someone subscribes.",
            "Send abandoned-cart or follow-up reminders 24 hours after a visit.",
            "Tag subscribers by interest so newsletters reach the right people.",
        ],
        "social media" => &[
            "Schedule a week of posts in advance with a scheduling tool.",
            "Use saved replies for the questions you get most often.",
            "Cross-post your best content to a second platform automatically.",
        ],
        "invoicing" => &[
            "Generate invoices automatically when a job is marked complete.",
            "Send payment reminders at 7, 14, and 30 days overdue.",
            "Accept card payments directly from the invoice link.",
        ],
        "bookkeeping" => &[
            "Connect your bank feed so transactions import every day.",
            "Create categorization rules for recurring expenses.",
            "Snap receipts with your phone and attach them to transactions.",
        ],
        "customer support" => &[
            "Publish answers to your top ten questions as a help page.",
            "Send an automatic acknowledgement with expected response time.",
            "Route urgent keywords to your phone so nothing important waits.",
        ],
        "lead follow-up" => &[
            "Send an instant reply to every new inquiry form submission.",
            "Add new leads to a follow-up sequence over the next two weeks.",
            "Notify yourself when a lead opens your proposal.",
        ],
        "scheduling" => &[
            "Share a booking link so clients pick their own time slots.",
            "Send automatic reminders a day and an hour before appointments.",
            "Collect intake details in the booking form instead of by email.",
        ],
        _ => &[
            "List the tasks you repeat every week and how long each takes.",
            "Automate the most time-consuming one first with a simple tool.",
            "Review after a month and move on to the next task.",
        ],
    };

    let mut out = format!("## Automation ideas for {area}\n\n");
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("{}. {step}\n", i + 1));
    }
    out.push_str("\nStart with one automation, measure the time it saves, then add the next.\n");
    out
}
