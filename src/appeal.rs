//! Appeal head training: event-derived labels, text embeddings, and the local regressor fit.

pub mod embedding;
pub mod labels;
pub mod trainer;
pub mod types;

use anyhow::Result;

use crate::clients::{AnthropicEmbeddingProvider, OpenAiEmbeddingProvider};
use crate::config::Config;

pub use embedding::{
    EmbeddingChain, EmbeddingOutcome, EmbeddingProvider, EmbeddingSource, ProviderError,
    ProviderFailure,
};
pub use labels::{aggregate_events, build_examples, decay_weight};
pub use trainer::{AppealTrainer, TrainingOutcome, TrainingReport};
pub use types::{Event, EventType, Item, ItemId, TrainingExample};

/// Anthropic first when a key is configured, then OpenAI.
///
/// # Errors
/// Fails when a provider's HTTP client cannot be built.
pub fn embedding_chain(config: &Config) -> Result<EmbeddingChain> {
    let mut chain = EmbeddingChain::new(config.embedding_dim());
    if let Some(api_key) = config.anthropic_api_key() {
        chain = chain.with_provider(AnthropicEmbeddingProvider::new(
            config.anthropic_base_url(),
            api_key,
            config.anthropic_model(),
            config.embedding_timeout(),
        )?);
    }
    chain = chain.with_provider(OpenAiEmbeddingProvider::new(
        config.openai_base_url(),
        config.openai_api_key(),
        config.openai_embedding_model(),
        config.embedding_timeout(),
    )?);
    Ok(chain)
}
