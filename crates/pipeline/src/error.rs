//! Pipeline stages and the failure taxonomy surfaced to clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use turnstile_core::{ProviderError, ProviderErrorKind};
use turnstile_quota::Feature;
use turnstile_ratelimit::WindowKind;

/// Where a turn is (or where it stopped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Authenticating,
    QuotaCheck,
    RateCheck,
    Parsing,
    IntentDetection,
    KnowledgeAugmentation,
    CompletionCall,
    UsageCommit,
    Response,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticating => "AUTHENTICATING",
            Self::QuotaCheck => "QUOTA_CHECK",
            Self::RateCheck => "RATE_CHECK",
            Self::Parsing => "PARSING",
            Self::IntentDetection => "INTENT_DETECTION",
            Self::KnowledgeAugmentation => "KNOWLEDGE_AUGMENTATION",
            Self::CompletionCall => "COMPLETION_CALL",
            Self::UsageCommit => "USAGE_COMMIT",
            Self::Response => "RESPONSE",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a turn can fail.
///
/// Admission failures (auth, quota, rate, malformed input) are rejections
/// decided before any external spend; the rest are errors from the
/// completion call or the infrastructure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    #[error("Quota exceeded for {feature}")]
    QuotaExceeded { feature: Feature, message: String },

    #[error("Rate limited on {window_kind} window until {reset_at}")]
    RateLimited {
        window_kind: WindowKind,
        reset_at: DateTime<Utc>,
        remaining: u32,
        /// Seconds until the window admits again
        retry_after_secs: u64,
    },

    #[error("Request {0} was already answered")]
    DuplicateRequest(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 401,
            Self::QuotaExceeded { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::MalformedInput(_) | Self::DuplicateRequest(_) => 400,
            Self::Provider(e) => match e.kind() {
                ProviderErrorKind::Auth => 401,
                ProviderErrorKind::Quota => 429,
                ProviderErrorKind::BadRequest => 400,
                ProviderErrorKind::Unavailable => 502,
                ProviderErrorKind::Network | ProviderErrorKind::Unexpected => 500,
            },
            Self::Unexpected(_) => 500,
        }
    }

    /// Machine-readable `errorType`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthorized",
            Self::QuotaExceeded { .. } => "plan_limit_reached",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedInput(_) => "invalid_request",
            Self::DuplicateRequest(_) => "duplicate_request",
            Self::Provider(e) => e.kind().as_str(),
            Self::Unexpected(_) => "unexpected_error",
        }
    }

    /// Short summary for the `error` field.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "Authentication required",
            Self::QuotaExceeded { .. } => "Plan limit reached",
            Self::RateLimited { .. } => "Too many requests",
            Self::MalformedInput(_) => "Invalid request",
            Self::DuplicateRequest(_) => "Duplicate request",
            Self::Provider(e) => match e.kind() {
                ProviderErrorKind::Auth => "AI service authentication failed",
                ProviderErrorKind::Quota => "AI service quota exceeded",
                ProviderErrorKind::BadRequest => "AI service rejected the request",
                ProviderErrorKind::Unavailable => "AI service unavailable",
                ProviderErrorKind::Network => "AI service unreachable",
                ProviderErrorKind::Unexpected => "Unexpected AI service error",
            },
            Self::Unexpected(_) => "Internal error",
        }
    }

    /// A complete sentence safe to show the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated(_) => "Please sign in to continue the conversation.".into(),
            Self::QuotaExceeded { message, .. } => message.clone(),
            Self::RateLimited { window_kind, .. } => match window_kind {
                WindowKind::PerMinute => {
                    "You're sending messages too quickly. Please wait a moment and try again."
                        .into()
                }
                WindowKind::PerDay => {
                    "You've reached today's message limit. Please try again tomorrow.".into()
                }
            },
            Self::MalformedInput(_) => {
                "I couldn't read that request. Please check your message and try again.".into()
            }
            Self::DuplicateRequest(_) => {
                "That message was already answered. Please send it again as a new message.".into()
            }
            Self::Provider(e) => match e.kind() {
                ProviderErrorKind::Auth => {
                    "The assistant is temporarily unavailable because of a configuration problem. Please try again later."
                        .into()
                }
                ProviderErrorKind::Quota => {
                    "The assistant is handling a lot of requests right now. Please try again in a few minutes."
                        .into()
                }
                ProviderErrorKind::BadRequest => {
                    "I couldn't process that message. Please rephrase it and try again.".into()
                }
                ProviderErrorKind::Unavailable => {
                    "The AI service is temporarily unavailable. Please try again shortly.".into()
                }
                ProviderErrorKind::Network => {
                    "I couldn't reach the AI service. Please try again in a moment.".into()
                }
                ProviderErrorKind::Unexpected => {
                    "Something went wrong while generating a reply. Please try again.".into()
                }
            },
            Self::Unexpected(_) => "Something went wrong on our side. Please try again.".into(),
        }
    }

    /// True for the admission rejections decided before any spend.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_)
                | Self::QuotaExceeded { .. }
                | Self::RateLimited { .. }
                | Self::MalformedInput(_)
                | Self::DuplicateRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_statuses() {
        assert_eq!(PipelineError::Unauthenticated("x".into()).status_code(), 401);
        assert_eq!(
            PipelineError::QuotaExceeded {
                feature: Feature::Chat,
                message: "m".into()
            }
            .status_code(),
            403
        );
        assert_eq!(
            PipelineError::RateLimited {
                window_kind: WindowKind::PerMinute,
                reset_at: Utc::now(),
                remaining: 0,
                retry_after_secs: 30,
            }
            .status_code(),
            429
        );
        assert_eq!(PipelineError::MalformedInput("x".into()).status_code(), 400);

        let duplicate = PipelineError::DuplicateRequest("req-1".into());
        assert_eq!(duplicate.status_code(), 400);
        assert_eq!(duplicate.error_type(), "duplicate_request");
        assert!(duplicate.is_rejection());
    }

    #[test]
    fn provider_kinds_have_distinct_statuses_and_messages() {
        let errors = [
            ProviderError::from_status(401, "bad key"),
            ProviderError::from_status(429, "slow down"),
            ProviderError::from_status(400, "bad"),
            ProviderError::from_status(503, "down"),
            ProviderError::Network("reset".into()),
        ];
        let mapped: Vec<PipelineError> = errors.into_iter().map(PipelineError::from).collect();

        let statuses: Vec<u16> = mapped.iter().map(|e| e.status_code()).collect();
        assert_eq!(statuses, vec![401, 429, 400, 502, 500]);

        let types: Vec<&str> = mapped.iter().map(|e| e.error_type()).collect();
        assert_eq!(
            types,
            vec![
                "auth_error",
                "quota_exceeded",
                "bad_request",
                "service_unavailable",
                "network_error"
            ]
        );

        let mut messages: Vec<String> = mapped.iter().map(|e| e.user_message()).collect();
        assert!(messages.iter().all(|m| m.ends_with('.')));
        messages.dedup();
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn quota_message_passes_through() {
        let err = PipelineError::QuotaExceeded {
            feature: Feature::Chat,
            message: "Upgrade to Pro.".into(),
        };
        assert_eq!(err.user_message(), "Upgrade to Pro.");
        assert!(err.is_rejection());
    }

    #[test]
    fn stage_names() {
        assert_eq!(PipelineStage::KnowledgeAugmentation.to_string(), "KNOWLEDGE_AUGMENTATION");
        assert_eq!(
            serde_json::to_string(&PipelineStage::UsageCommit).unwrap(),
            "\"USAGE_COMMIT\""
        );
    }
}
