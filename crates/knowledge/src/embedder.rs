//! Query and document embedding.

use async_trait::async_trait;
use std::sync::Arc;
use turnstile_core::{EmbeddingRequest, KnowledgeError, Provider};

/// Turns text into fixed-width vectors.
///
/// Implementations must fail rather than return a vector of the wrong
/// width, since a malformed vector silently corrupts similarity scores.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError>;
}

/// Embeds through the configured [`Provider`] with a fixed model and width.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    dimensions: usize,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
                dimensions: u32::try_from(self.dimensions).ok(),
            })
            .await
            .map_err(|e| KnowledgeError::Embedding(e.to_string()))?;

        if response.embeddings.len() != texts.len() {
            return Err(KnowledgeError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        for vector in &response.embeddings {
            if vector.len() != self.dimensions {
                return Err(KnowledgeError::MalformedVector {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(KnowledgeError::Embedding(
                    "embedding contains non-finite values".into(),
                ));
            }
        }

        Ok(response.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::{
        EmbeddingResponse, Message, ProviderError, ProviderRequest, ProviderResponse,
    };

    struct FixedEmbeddings(Vec<Vec<f32>>);

    #[async_trait]
    impl Provider for FixedEmbeddings {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(""),
                usage: None,
                model: "none".into(),
            })
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            assert_eq!(request.dimensions, Some(3));
            Ok(EmbeddingResponse {
                embeddings: self.0.clone(),
                model: request.model,
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn returns_vectors_of_configured_width() {
        let embedder = ProviderEmbedder::new(
            Arc::new(FixedEmbeddings(vec![vec![0.1, 0.2, 0.3]])),
            "text-embedding-3-small",
            3,
        );
        let vectors = embedder.embed(&["hello".into()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2, 0.3]]);
    }

    #[tokio::test]
    async fn wrong_width_is_rejected() {
        let embedder = ProviderEmbedder::new(
            Arc::new(FixedEmbeddings(vec![vec![0.1, 0.2]])),
            "text-embedding-3-small",
            3,
        );
        let err = embedder.embed(&["hello".into()]).await.unwrap_err();
        assert!(matches!(
            err,
            KnowledgeError::MalformedVector {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn missing_vectors_are_rejected() {
        let embedder = ProviderEmbedder::new(Arc::new(FixedEmbeddings(vec![])), "m", 3);
        let err = embedder.embed(&["hello".into()]).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Embedding(_)));
    }

    #[tokio::test]
    async fn nan_is_rejected() {
        let embedder = ProviderEmbedder::new(
            Arc::new(FixedEmbeddings(vec![vec![0.1, f32::NAN, 0.3]])),
            "m",
            3,
        );
        assert!(embedder.embed(&["hello".into()]).await.is_err());
    }
}
