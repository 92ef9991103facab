pub mod anthropic;
pub mod data_store;
pub(crate) mod headers;
pub mod openai;
pub mod training_api;

pub use anthropic::AnthropicEmbeddingProvider;
pub use data_store::{DataStoreClient, RawTrainingData};
pub use openai::OpenAiEmbeddingProvider;
pub use training_api::{JobStatus, ModelType, TrainingApiClient, TrainingApiError, TrainingJob};
