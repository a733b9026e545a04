//! Error types for the Turnstile domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failed call to the upstream completion or embedding service.
///
/// Every variant classifies into exactly one [`ProviderErrorKind`], so
/// callers match on the kind and never on raw status codes.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Upstream quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Upstream rejected the request: {message} (status: {status_code})")]
    BadRequest { status_code: u16, message: String },

    #[error("Upstream service unavailable: {message} (status: {status_code})")]
    Unavailable { status_code: u16, message: String },

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// The closed taxonomy upstream failures map into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    #[serde(rename = "auth_error")]
    Auth,
    #[serde(rename = "quota_exceeded")]
    Quota,
    BadRequest,
    #[serde(rename = "service_unavailable")]
    Unavailable,
    #[serde(rename = "network_error")]
    Network,
    #[serde(rename = "unexpected_error")]
    Unexpected,
}

impl ProviderErrorKind {
    /// Wire name used in `errorType` fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth_error",
            Self::Quota => "quota_exceeded",
            Self::BadRequest => "bad_request",
            Self::Unavailable => "service_unavailable",
            Self::Network => "network_error",
            Self::Unexpected => "unexpected_error",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProviderError {
    /// Classify a non-success HTTP status returned by the upstream service.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => Self::AuthenticationFailed(message),
            402 | 429 => Self::QuotaExceeded(message),
            400 | 404 | 409 | 413 | 422 => Self::BadRequest {
                status_code,
                message,
            },
            500..=599 => Self::Unavailable {
                status_code,
                message,
            },
            _ => Self::ApiError {
                status_code,
                message,
            },
        }
    }

    /// Which taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::AuthenticationFailed(_) => ProviderErrorKind::Auth,
            Self::QuotaExceeded(_) => ProviderErrorKind::Quota,
            Self::BadRequest { .. } => ProviderErrorKind::BadRequest,
            Self::Unavailable { .. } => ProviderErrorKind::Unavailable,
            Self::Timeout(_) | Self::Network(_) => ProviderErrorKind::Network,
            Self::ApiError { .. } | Self::NotConfigured(_) => ProviderErrorKind::Unexpected,
        }
    }
}

/// Failures of the external counter stores (rate windows, usage counters).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    MalformedVector { expected: usize, actual: usize },

    #[error("Similarity search failed: {0}")]
    Search(String),

    #[error("Knowledge storage error: {0}")]
    Storage(String),

    #[error("Knowledge retrieval timed out after {millis}ms")]
    Timeout { millis: u64 },
}
