//! The per-request state machine.
//!
//! ```text
//! AUTHENTICATING → QUOTA_CHECK → RATE_CHECK → PARSING → INTENT_DETECTION
//!   → KNOWLEDGE_AUGMENTATION → COMPLETION_CALL → USAGE_COMMIT → RESPONSE
//! ```
//!
//! Admission checks run before anything that costs money. Knowledge
//! retrieval and the usage commit are best-effort: their failures are
//! logged and never change the outcome of a turn.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use turnstile_config::{AppConfig, CompletionConfig, PipelineConfig};
use turnstile_core::{Clock, Message, Provider, ProviderRequest, SystemClock, Usage, split_segments};
use turnstile_knowledge::{AssembledContext, KnowledgeRetriever};
use turnstile_quota::{Feature, QuotaGate};
use turnstile_ratelimit::RateLimiter;

use crate::auth::Authenticator;
use crate::continuation::{continuation_prompt, is_continuation};
use crate::error::{PipelineError, PipelineStage};
use crate::intent::detect_intent;
use crate::request::{ParsedTurn, parse_chat_request};

/// Model name reported for locally generated intent answers.
pub const INTENT_MODEL: &str = "turnstile-intent";

/// One inbound chat turn, as the gateway hands it over.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub request_id: String,
    /// Bearer credential, if the caller sent one
    pub credential: Option<String>,
    /// Rate-limit identity (client address or dev fallback)
    pub client_key: String,
    /// Raw JSON body
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub has_knowledge: bool,
    pub sources: Vec<String>,
    pub usage: Option<Usage>,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub continuation: bool,
}

#[derive(Debug, Clone)]
pub struct TurnSuccess {
    pub request_id: String,
    pub response: String,
    pub segments: Vec<String>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug)]
pub struct TurnFailure {
    pub request_id: String,
    /// Stage that was running when the turn stopped
    pub stage: PipelineStage,
    pub error: PipelineError,
    /// Seconds until a rate-limited client may retry
    pub retry_after_secs: Option<u64>,
}

pub struct RequestOrchestrator {
    authenticator: Arc<dyn Authenticator>,
    quota: Arc<QuotaGate>,
    rate_limiter: Arc<RateLimiter>,
    provider: Arc<dyn Provider>,
    knowledge: Option<Arc<KnowledgeRetriever>>,
    completion: CompletionConfig,
    settings: PipelineConfig,
    clock: Arc<dyn Clock>,
}

impl RequestOrchestrator {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        quota: Arc<QuotaGate>,
        rate_limiter: Arc<RateLimiter>,
        provider: Arc<dyn Provider>,
        config: &AppConfig,
    ) -> Self {
        Self {
            authenticator,
            quota,
            rate_limiter,
            provider,
            knowledge: None,
            completion: config.completion.clone(),
            settings: config.pipeline.clone(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Enable knowledge augmentation.
    pub fn with_knowledge(mut self, retriever: Arc<KnowledgeRetriever>) -> Self {
        self.knowledge = Some(retriever);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn rate_store_name(&self) -> &str {
        self.rate_limiter.store_name()
    }

    pub fn knowledge_enabled(&self) -> bool {
        self.knowledge.is_some()
    }

    /// Run one turn to a terminal state.
    pub async fn handle(&self, request: TurnRequest) -> Result<TurnSuccess, TurnFailure> {
        let mut stage = PipelineStage::Authenticating;
        match self.run(&request, &mut stage).await {
            Ok(success) => Ok(success),
            Err(error) => {
                if error.is_rejection() {
                    info!(
                        request_id = %request.request_id,
                        stage = %stage,
                        error_type = error.error_type(),
                        "Turn rejected: {error}"
                    );
                } else {
                    warn!(
                        request_id = %request.request_id,
                        stage = %stage,
                        error_type = error.error_type(),
                        "Turn failed: {error}"
                    );
                }
                let retry_after_secs = match &error {
                    PipelineError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
                    _ => None,
                };
                Err(TurnFailure {
                    request_id: request.request_id,
                    stage,
                    error,
                    retry_after_secs,
                })
            }
        }
    }

    async fn run(
        &self,
        request: &TurnRequest,
        stage: &mut PipelineStage,
    ) -> Result<TurnSuccess, PipelineError> {
        *stage = PipelineStage::Authenticating;
        let user = self
            .authenticator
            .authenticate(request.credential.as_deref())
            .await?;

        *stage = PipelineStage::QuotaCheck;
        // A request id already billed to this user gets no second completion.
        let already_billed = self
            .quota
            .is_recorded(&user.user_id, Feature::Chat, &request.request_id)
            .await
            .map_err(|e| PipelineError::Unexpected(format!("usage store: {e}")))?;
        if already_billed {
            return Err(PipelineError::DuplicateRequest(request.request_id.clone()));
        }

        let access = self
            .quota
            .check_access(&user.user_id, Feature::Chat)
            .await
            .map_err(|e| PipelineError::Unexpected(format!("usage store: {e}")))?;
        if !access.allowed {
            return Err(PipelineError::QuotaExceeded {
                feature: Feature::Chat,
                message: access.message.unwrap_or_else(|| {
                    "You've reached your chat limit. Please contact support to raise your limit."
                        .into()
                }),
            });
        }

        *stage = PipelineStage::RateCheck;
        let rate = self
            .rate_limiter
            .check(&request.client_key)
            .await
            .map_err(|e| PipelineError::Unexpected(format!("rate store: {e}")))?;
        if !rate.allowed {
            return Err(PipelineError::RateLimited {
                window_kind: rate.window_kind,
                reset_at: rate.reset_at,
                remaining: rate.remaining,
                retry_after_secs: rate.retry_after_secs(self.clock.now()),
            });
        }

        *stage = PipelineStage::Parsing;
        let turn = parse_chat_request(&request.body, &self.completion, self.settings.max_input_chars)?;

        let continued_from = is_continuation(&turn.latest)
            .then(|| turn.last_assistant())
            .flatten()
            .map(str::to_string);

        if continued_from.is_none() {
            *stage = PipelineStage::IntentDetection;
            if let Some(intent) = detect_intent(&turn.latest) {
                debug!(request_id = %request.request_id, intent = intent.name(), "Intent matched, skipping completion");
                *stage = PipelineStage::Response;
                let answer = intent.render();
                return Ok(self.finish(
                    request,
                    answer,
                    ResponseMetadata {
                        has_knowledge: false,
                        sources: Vec::new(),
                        usage: None,
                        model: INTENT_MODEL.into(),
                        timestamp: self.clock.now(),
                        intent: Some(intent.name().into()),
                        continuation: false,
                    },
                ));
            }
        }

        let knowledge = match (&self.knowledge, &continued_from) {
            (Some(retriever), None) => {
                *stage = PipelineStage::KnowledgeAugmentation;
                retriever.retrieve(&turn.latest).await
            }
            _ => AssembledContext::empty(),
        };

        *stage = PipelineStage::CompletionCall;
        let outgoing = match &continued_from {
            Some(previous) => continuation_prompt(previous),
            None => turn.latest.clone(),
        };
        let provider_request = ProviderRequest {
            model: turn.model.clone(),
            messages: self.build_messages(&turn, outgoing, &knowledge),
            temperature: turn.temperature,
            max_tokens: Some(self.completion.max_tokens),
            stop: Vec::new(),
        };
        let response = self.provider.complete(provider_request).await?;

        *stage = PipelineStage::UsageCommit;
        if !self
            .quota
            .increment_usage_keyed(&user.user_id, Feature::Chat, 1, &request.request_id)
            .await
        {
            debug!(request_id = %request.request_id, "Answer returned without a usage commit");
        }

        *stage = PipelineStage::Response;
        info!(
            request_id = %request.request_id,
            user_id = %user.user_id,
            model = %response.model,
            has_knowledge = knowledge.has_relevant_knowledge,
            continuation = continued_from.is_some(),
            "Turn completed"
        );
        Ok(self.finish(
            request,
            response.message.content,
            ResponseMetadata {
                has_knowledge: knowledge.has_relevant_knowledge,
                sources: knowledge.sources,
                usage: response.usage,
                model: response.model,
                timestamp: self.clock.now(),
                intent: None,
                continuation: continued_from.is_some(),
            },
        ))
    }

    /// System preamble, optional knowledge block, then the most recent turns.
    fn build_messages(
        &self,
        turn: &ParsedTurn,
        outgoing: String,
        knowledge: &AssembledContext,
    ) -> Vec<Message> {
        let mut messages = vec![Message::system(&self.settings.system_prompt)];
        if knowledge.has_relevant_knowledge {
            messages.push(Message::system(format!(
                "Use the following knowledge base excerpts when they are relevant to the question. \
                 Prefer them over general knowledge and mention the source when you rely on one.\n\n{}",
                knowledge.context
            )));
        }

        let mut turns = turn.history.clone();
        turns.push(Message::user(outgoing));
        let skip = turns.len().saturating_sub(self.settings.history_window);
        messages.extend(turns.into_iter().skip(skip));
        messages
    }

    fn finish(&self, request: &TurnRequest, answer: String, metadata: ResponseMetadata) -> TurnSuccess {
        let segments = split_segments(&answer, self.settings.chunk_max_chars);
        TurnSuccess {
            request_id: request.request_id.clone(),
            response: answer,
            segments,
            metadata,
        }
    }
}
