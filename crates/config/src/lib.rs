//! Configuration loading, validation, and management for Turnstile.
//!
//! Loads configuration from `~/.turnstile/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.turnstile/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion/embedding service (can be overridden in `[completion]`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Completion provider settings
    #[serde(default)]
    pub completion: CompletionConfig,

    /// HTTP gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Dual-window rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Plan ceilings and usage store
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Retrieval-augmented context
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Prompt assembly and output shaping
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("completion", &self.completion)
            .field("gateway", &self.gateway)
            .field("rate_limit", &self.rate_limit)
            .field("quota", &self.quota)
            .field("knowledge", &self.knowledge)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Provider label used in logs and metadata
    #[serde(default = "default_provider")]
    pub provider: String,

    /// OpenAI-compatible base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used when the request does not pick one
    #[serde(default = "default_model")]
    pub model: String,

    /// Extra models a request may select (the default model is always allowed)
    #[serde(default)]
    pub allowed_models: Vec<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Whole-request HTTP timeout for completion calls
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_completion_timeout() -> u64 {
    60
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            allowed_models: vec![],
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("allowed_models", &self.allowed_models)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl CompletionConfig {
    /// Whether a request may select `model`.
    pub fn allows_model(&self, model: &str) -> bool {
        model == self.model || self.allowed_models.iter().any(|m| m == model)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Expose raw diagnostic detail in error responses
    #[serde(default)]
    pub dev_mode: bool,

    /// Bearer token → user id. Sessions are issued elsewhere; this is the
    /// lookup table the gateway authenticates against.
    #[serde(default)]
    pub tokens: HashMap<String, String>,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}
fn default_max_body_bytes() -> usize {
    256 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            dev_mode: false,
            tokens: HashMap::new(),
            cors_origins: default_cors_origins(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("dev_mode", &self.dev_mode)
            .field("tokens", &format_args!("[{} REDACTED]", self.tokens.len()))
            .field("cors_origins", &self.cors_origins)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

/// Where rate windows are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateBackend {
    /// Single-process map
    #[default]
    Memory,
    /// Shared Redis sorted sets
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_per_minute")]
    pub per_minute: u32,

    #[serde(default = "default_per_day")]
    pub per_day: u32,

    #[serde(default)]
    pub backend: RateBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Allow requests when the store cannot be reached
    #[serde(default = "default_true")]
    pub fail_open: bool,

    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_per_minute() -> u32 {
    20
}
fn default_per_day() -> u32 {
    1000
}
fn default_key_prefix() -> String {
    "turnstile:rl".into()
}
fn default_store_timeout_ms() -> u64 {
    250
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_minute: default_per_minute(),
            per_day: default_per_day(),
            backend: RateBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            fail_open: true,
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// Per-feature ceilings of one plan. `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimitsConfig {
    pub chat_daily: i64,
    pub video_weekly: i64,
    pub voice_weekly: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTableConfig {
    #[serde(default = "default_free_limits")]
    pub free: PlanLimitsConfig,

    #[serde(default = "default_pro_limits")]
    pub pro: PlanLimitsConfig,

    #[serde(default = "default_enterprise_limits")]
    pub enterprise: PlanLimitsConfig,
}

fn default_free_limits() -> PlanLimitsConfig {
    PlanLimitsConfig {
        chat_daily: 10,
        video_weekly: 0,
        voice_weekly: 3,
    }
}
fn default_pro_limits() -> PlanLimitsConfig {
    PlanLimitsConfig {
        chat_daily: 200,
        video_weekly: 10,
        voice_weekly: 50,
    }
}
fn default_enterprise_limits() -> PlanLimitsConfig {
    PlanLimitsConfig {
        chat_daily: -1,
        video_weekly: -1,
        voice_weekly: -1,
    }
}

impl Default for PlanTableConfig {
    fn default() -> Self {
        Self {
            free: default_free_limits(),
            pro: default_pro_limits(),
            enterprise: default_enterprise_limits(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// SQLite path or URL for usage counters (`sqlite::memory:` for ephemeral)
    #[serde(default = "default_usage_db")]
    pub database_url: String,

    #[serde(default)]
    pub plans: PlanTableConfig,
}

fn default_usage_db() -> String {
    AppConfig::config_dir().join("usage.db").display().to_string()
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            database_url: default_usage_db(),
            plans: PlanTableConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SQLite path of the chunk index
    #[serde(default = "default_index_path")]
    pub index_path: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Queries shorter than this never trigger retrieval
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,

    /// Budget for embedding + search together
    #[serde(default = "default_knowledge_timeout_ms")]
    pub timeout_ms: u64,

    /// Segment size used when ingesting documents
    #[serde(default = "default_ingest_chunk_chars")]
    pub ingest_chunk_chars: usize,

    /// At least one must appear in a query for retrieval to run
    #[serde(default = "default_topic_keywords")]
    pub topic_keywords: Vec<String>,
}

fn default_index_path() -> String {
    AppConfig::config_dir().join("knowledge.db").display().to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimensions() -> usize {
    1536
}
fn default_max_chunks() -> usize {
    4
}
fn default_similarity_threshold() -> f32 {
    0.65
}
fn default_min_query_chars() -> usize {
    12
}
fn default_knowledge_timeout_ms() -> u64 {
    4000
}
fn default_ingest_chunk_chars() -> usize {
    1200
}
fn default_topic_keywords() -> Vec<String> {
    [
        "marketing", "strategy", "campaign", "content", "social media", "instagram", "tiktok",
        "facebook", "linkedin", "youtube", "seo", "brand", "audience", "engagement", "ads",
        "advertising", "budget", "roi", "conversion", "funnel", "email", "newsletter",
        "automation", "automate", "workflow", "sales", "leads", "customer", "pricing", "growth",
        "analytics", "expense", "revenue", "business", "startup", "launch", "calendar",
        "influencer", "plan", "subscription",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_path: default_index_path(),
            embedding_model: default_embedding_model(),
            dimensions: default_dimensions(),
            max_chunks: default_max_chunks(),
            similarity_threshold: default_similarity_threshold(),
            min_query_chars: default_min_query_chars(),
            timeout_ms: default_knowledge_timeout_ms(),
            ingest_chunk_chars: default_ingest_chunk_chars(),
            topic_keywords: default_topic_keywords(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Most recent turns forwarded to the model
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Character budget of one response segment
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_system_prompt() -> String {
    "You are a friendly, practical assistant for small-business owners. \
     Give concrete, actionable advice on marketing, content, automation, and \
     expenses. Keep answers well structured and concise."
        .into()
}
fn default_history_window() -> usize {
    10
}
fn default_chunk_max_chars() -> usize {
    1500
}
fn default_max_input_chars() -> usize {
    8000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_window: default_history_window(),
            chunk_max_chars: default_chunk_max_chars(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.turnstile/config.toml).
    ///
    /// Also checks environment variables:
    /// - `TURNSTILE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `TURNSTILE_MODEL`
    /// - `TURNSTILE_REDIS_URL` (switches the rate backend to Redis)
    /// - `TURNSTILE_DEV_MODE`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Load from an explicit path if given, otherwise the default path,
    /// then apply environment overrides.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_dir().join("config.toml"),
        };
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("TURNSTILE_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }

        if let Some(model) = var("TURNSTILE_MODEL") {
            self.completion.model = model;
        }

        if let Some(url) = var("TURNSTILE_REDIS_URL") {
            self.rate_limit.redis_url = Some(url);
            self.rate_limit.backend = RateBackend::Redis;
        }

        if let Some(flag) = var("TURNSTILE_DEV_MODE") {
            self.gateway.dev_mode = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".turnstile")
    }

    /// The key used for completion and embedding calls.
    pub fn effective_api_key(&self) -> Option<&str> {
        self.completion
            .api_key
            .as_deref()
            .or(self.api_key.as_deref())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.completion.temperature < 0.0 || self.completion.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "completion.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.rate_limit.per_minute == 0 || self.rate_limit.per_day == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.per_minute and rate_limit.per_day must be > 0".into(),
            ));
        }

        if self.rate_limit.per_day < self.rate_limit.per_minute {
            return Err(ConfigError::ValidationError(
                "rate_limit.per_day must be >= rate_limit.per_minute".into(),
            ));
        }

        if self.rate_limit.backend == RateBackend::Redis && self.rate_limit.redis_url.is_none() {
            return Err(ConfigError::ValidationError(
                "rate_limit.redis_url is required when backend = \"redis\"".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.knowledge.similarity_threshold) {
            return Err(ConfigError::ValidationError(
                "knowledge.similarity_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.knowledge.max_chunks == 0 || self.knowledge.dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "knowledge.max_chunks and knowledge.dimensions must be > 0".into(),
            ));
        }

        if self.pipeline.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.history_window must be > 0".into(),
            ));
        }

        if self.pipeline.chunk_max_chars < 100 {
            return Err(ConfigError::ValidationError(
                "pipeline.chunk_max_chars must be at least 100".into(),
            ));
        }

        for (tier, limits) in [
            ("free", &self.quota.plans.free),
            ("pro", &self.quota.plans.pro),
            ("enterprise", &self.quota.plans.enterprise),
        ] {
            if [limits.chat_daily, limits.video_weekly, limits.voice_weekly]
                .iter()
                .any(|v| *v < -1)
            {
                return Err(ConfigError::ValidationError(format!(
                    "quota.plans.{tier}: ceilings must be >= 0, or -1 for unlimited"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            completion: CompletionConfig::default(),
            gateway: GatewayConfig::default(),
            rate_limit: RateLimitConfig::default(),
            quota: QuotaConfig::default(),
            knowledge: KnowledgeConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8787);
        assert_eq!(config.rate_limit.per_minute, 20);
        assert!(config.rate_limit.fail_open);
        assert_eq!(config.knowledge.max_chunks, 4);
        assert_eq!(config.quota.plans.enterprise.chat_daily, -1);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.completion.model, config.completion.model);
        assert_eq!(parsed.rate_limit.per_day, config.rate_limit.per_day);
        assert_eq!(parsed.quota.plans.free, config.quota.plans.free);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.completion.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn redis_backend_requires_url() {
        let mut config = AppConfig::default();
        config.rate_limit.backend = RateBackend::Redis;
        assert!(config.validate().is_err());

        config.rate_limit.redis_url = Some("redis://127.0.0.1:6379".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn day_window_must_cover_minute_window() {
        let mut config = AppConfig::default();
        config.rate_limit.per_minute = 50;
        config.rate_limit.per_day = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_ceiling_other_than_sentinel_rejected() {
        let mut config = AppConfig::default();
        config.quota.plans.pro.video_weekly = -5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("quota.plans.pro"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.completion.provider, "openai");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[rate_limit]
per_minute = 5

[quota.plans.free]
chat_daily = 3
video_weekly = 0
voice_weekly = 1

[gateway.tokens]
"tok-alice" = "alice"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.rate_limit.per_minute, 5);
        assert_eq!(config.rate_limit.per_day, 1000);
        assert_eq!(config.quota.plans.free.chat_daily, 3);
        assert_eq!(config.quota.plans.pro.chat_daily, 200);
        assert_eq!(config.gateway.tokens.get("tok-alice").map(String::as_str), Some("alice"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-env"),
            ("TURNSTILE_MODEL", "gpt-4o"),
            ("TURNSTILE_REDIS_URL", "redis://cache:6379"),
            ("TURNSTILE_DEV_MODE", "true"),
        ]);
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.effective_api_key(), Some("sk-env"));
        assert_eq!(config.completion.model, "gpt-4o");
        assert_eq!(config.rate_limit.backend, RateBackend::Redis);
        assert!(config.gateway.dev_mode);
    }

    #[test]
    fn allowlist_always_contains_default_model() {
        let mut completion = CompletionConfig::default();
        assert!(completion.allows_model("gpt-4o-mini"));
        assert!(!completion.allows_model("gpt-4o"));
        completion.allowed_models.push("gpt-4o".into());
        assert!(completion.allows_model("gpt-4o"));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-very-secret".into());
        config.gateway.tokens.insert("tok-secret".into(), "bob".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("tok-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("8787"));
    }
}
