//! # Turnstile Pipeline
//!
//! Takes one chat turn from credential to answer. The
//! [`RequestOrchestrator`] runs the admission checks (auth, plan quota,
//! rate window), parses the body, and then either answers locally
//! (continuation rewrite, deterministic intents) or augments the prompt
//! with knowledge and calls the completion provider.
//!
//! Every failure is a [`PipelineError`] with a status code, a
//! machine-readable type, and a user-facing sentence; the gateway only
//! renders them.

pub mod auth;
pub mod continuation;
pub mod error;
pub mod intent;
pub mod orchestrator;
pub mod request;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use auth::{AuthenticatedUser, Authenticator, StaticTokenAuthenticator};
pub use continuation::{continuation_prompt, is_continuation};
pub use error::{PipelineError, PipelineStage};
pub use intent::{Intent, detect_intent};
pub use orchestrator::{
    INTENT_MODEL, RequestOrchestrator, ResponseMetadata, TurnFailure, TurnRequest, TurnSuccess,
};
pub use request::{ChatRequest, ChatTurn, ParsedTurn, parse_chat_request};
