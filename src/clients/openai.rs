/// OpenAI Embeddings API クライアント（埋め込みチェーンのフォールバック）。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use super::headers::add_bearer_auth;
use crate::appeal::embedding::{EmbeddingProvider, ProviderError};

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingProvider {
    client: Client,
    base_url: Url,
    model: String,
}

impl OpenAiEmbeddingProvider {
    /// # Errors
    /// URL のパース、認証ヘッダーの構築、HTTP クライアントの構築のいずれかに失敗した場合。
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        add_bearer_auth(&mut headers, api_key)?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build openai HTTP client")?;
        let base_url = Url::parse(base_url).context("invalid openai base URL")?;

        Ok(Self {
            client,
            base_url,
            model: model.into(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed(&self, text: &str, _dim: usize) -> Result<Vec<f32>, ProviderError> {
        let url = self
            .base_url
            .join("v1/embeddings")
            .map_err(|error| ProviderError::Shape(format!("invalid embeddings URL: {error}")))?;

        let response = self
            .client
            .post(url)
            .json(&EmbeddingsRequest {
                input: text,
                model: &self.model,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body: EmbeddingsResponse = response.json().await?;
        body.data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| ProviderError::Shape("response has no embedding data".to_string()))
    }
}
