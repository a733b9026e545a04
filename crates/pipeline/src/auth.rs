//! Credential → user resolution.
//!
//! Session issuance lives outside Turnstile; the pipeline only needs to
//! map the caller's bearer credential to a user id.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: Option<&str>) -> Result<AuthenticatedUser, PipelineError>;
}

/// Looks bearer tokens up in a fixed table (from `[gateway.tokens]`).
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, credential: Option<&str>) -> Result<AuthenticatedUser, PipelineError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::Unauthenticated("missing bearer token".into()))?;

        self.tokens
            .get(token)
            .map(|user_id| AuthenticatedUser {
                user_id: user_id.clone(),
            })
            .ok_or_else(|| PipelineError::Unauthenticated("unknown token".into()))
    }
}
