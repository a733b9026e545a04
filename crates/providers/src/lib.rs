//! Provider implementations for Turnstile.
//!
//! All providers implement the `turnstile_core::Provider` trait.
//! [`build_from_config`] picks the backend the configuration describes.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use std::sync::Arc;
use std::time::Duration;
use turnstile_config::AppConfig;
use turnstile_core::{Provider, ProviderError};

/// Build the completion/embedding provider from configuration.
///
/// A missing API key is not an error here: the service still starts and
/// every upstream call reports an auth failure, which the pipeline maps to
/// a 401 with a friendly message.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.effective_api_key().unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!(
            provider = %config.completion.provider,
            "No API key configured; completion calls will fail"
        );
    }

    let provider = OpenAiCompatProvider::with_timeout(
        &config.completion.provider,
        &config.completion.api_url,
        api_key,
        Duration::from_secs(config.completion.timeout_secs),
    )?;
    Ok(Arc::new(provider))
}
