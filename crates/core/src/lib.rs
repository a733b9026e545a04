//! # Turnstile Core
//!
//! Domain types, traits, and error definitions shared by every Turnstile crate.
//! The admission components (rate limiting, quotas, knowledge retrieval) and
//! the request pipeline all depend inward on this crate.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the completion/embedding
//! [`Provider`] and the wall [`Clock`]. Implementations live in their
//! respective crates, which keeps the pipeline testable with stubs and a
//! manually driven clock.

pub mod clock;
pub mod error;
pub mod message;
pub mod provider;
pub mod text;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{KnowledgeError, ProviderError, ProviderErrorKind, StoreError};
pub use message::{Message, Role};
pub use provider::{EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage};
pub use text::split_segments;
