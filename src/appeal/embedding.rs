use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

/// A remote source of fixed-width text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Embeds `text`, asking for `dim` components where the provider supports it.
    async fn embed(&self, text: &str, dim: usize) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned error status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unexpected response shape: {0}")]
    Shape(String),
    #[error("expected {expected} dimensions, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: &'static str,
    pub error: ProviderError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingSource {
    Provider(&'static str),
    /// Every provider failed; the vector is all zeros.
    ZeroVector,
}

#[derive(Debug)]
pub struct EmbeddingOutcome {
    pub vector: Vec<f32>,
    pub source: EmbeddingSource,
    pub failures: Vec<ProviderFailure>,
}

impl EmbeddingOutcome {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.source == EmbeddingSource::ZeroVector
    }
}

/// Providers tried in order; the first that yields exactly `dim` components wins.
pub struct EmbeddingChain {
    providers: Vec<Box<dyn EmbeddingProvider>>,
    dim: usize,
}

impl std::fmt::Debug for EmbeddingChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingChain")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("dim", &self.dim)
            .finish()
    }
}

impl EmbeddingChain {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            providers: Vec::new(),
            dim,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl EmbeddingProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Walks the chain, recording each provider's failure; falls back to a zero vector.
    pub async fn resolve(&self, text: &str) -> EmbeddingOutcome {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let result = provider.embed(text, self.dim).await.and_then(|vector| {
                if vector.len() == self.dim {
                    Ok(vector)
                } else {
                    Err(ProviderError::Dimension {
                        expected: self.dim,
                        actual: vector.len(),
                    })
                }
            });

            match result {
                Ok(vector) => {
                    debug!(provider = provider.name(), "embedding resolved");
                    return EmbeddingOutcome {
                        vector,
                        source: EmbeddingSource::Provider(provider.name()),
                        failures,
                    };
                }
                Err(error) => {
                    warn!(provider = provider.name(), error = %error, "embedding provider failed");
                    failures.push(ProviderFailure {
                        provider: provider.name(),
                        error,
                    });
                }
            }
        }

        warn!(
            attempted = failures.len(),
            dim = self.dim,
            "all embedding providers failed; using zero vector"
        );
        EmbeddingOutcome {
            vector: vec![0.0; self.dim],
            source: EmbeddingSource::ZeroVector,
            failures,
        }
    }

    /// The embedding vector alone, always `dim` wide.
    pub async fn get_embedding(&self, text: &str) -> Vec<f32> {
        self.resolve(text).await.vector
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns a fixed vector, or a shape error when `vector` is `None`.
    pub(crate) struct StaticProvider {
        pub(crate) name: &'static str,
        pub(crate) vector: Option<Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for StaticProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn embed(&self, _text: &str, _dim: usize) -> Result<Vec<f32>, ProviderError> {
            self.vector
                .clone()
                .ok_or_else(|| ProviderError::Shape("not a numeric array".to_string()))
        }
    }

    #[tokio::test]
    async fn primary_success_short_circuits() {
        let chain = EmbeddingChain::new(3)
            .with_provider(StaticProvider {
                name: "primary",
                vector: Some(vec![0.1, 0.2, 0.3]),
            })
            .with_provider(StaticProvider {
                name: "fallback",
                vector: Some(vec![9.0, 9.0, 9.0]),
            });

        let outcome = chain.resolve("text").await;

        assert_eq!(outcome.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(outcome.source, EmbeddingSource::Provider("primary"));
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn wrong_width_falls_through_to_next_provider() {
        let chain = EmbeddingChain::new(3)
            .with_provider(StaticProvider {
                name: "primary",
                vector: Some(vec![0.1, 0.2]),
            })
            .with_provider(StaticProvider {
                name: "fallback",
                vector: Some(vec![1.0, 2.0, 3.0]),
            });

        let outcome = chain.resolve("text").await;

        assert_eq!(outcome.vector.len(), 3);
        assert_eq!(outcome.source, EmbeddingSource::Provider("fallback"));
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            ProviderError::Dimension {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn all_failures_yield_zero_vector() {
        let chain = EmbeddingChain::new(4)
            .with_provider(StaticProvider {
                name: "primary",
                vector: None,
            })
            .with_provider(StaticProvider {
                name: "fallback",
                vector: Some(vec![1.0; 7]),
            });

        let outcome = chain.resolve("text").await;

        assert!(outcome.is_degraded());
        assert_eq!(outcome.vector, vec![0.0; 4]);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].provider, "primary");
    }

    #[tokio::test]
    async fn empty_chain_returns_zero_vector() {
        let chain = EmbeddingChain::new(2);
        assert_eq!(chain.get_embedding("text").await, vec![0.0, 0.0]);
    }
}
