/// Anthropic Messages API を疑似的な埋め込みプロバイダーとして使うクライアント。
///
/// 専用の埋め込みエンドポイントが無いため、指定次元の JSON 配列だけを返すよう依頼し、
/// 応答テキストを数値配列としてパースする。長さの検証は `EmbeddingChain` 側で行う。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::appeal::embedding::{EmbeddingProvider, ProviderError};

pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnthropicEmbeddingProvider {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl AnthropicEmbeddingProvider {
    /// # Errors
    /// URL のパースまたは HTTP クライアントの構築に失敗した場合。
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build anthropic HTTP client")?;
        let base_url = Url::parse(base_url).context("invalid anthropic base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

fn embedding_prompt(text: &str, dim: usize) -> String {
    format!(
        "Create a dense vector embedding for this text. Return only a JSON array of {dim} \
         floating-point numbers between -1 and 1: \"{text}\""
    )
}

fn parse_vector(reply: &str) -> Result<Vec<f32>, ProviderError> {
    serde_json::from_str::<Vec<f32>>(reply.trim())
        .map_err(|error| ProviderError::Shape(format!("reply is not a numeric array: {error}")))
}

#[async_trait]
impl EmbeddingProvider for AnthropicEmbeddingProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn embed(&self, text: &str, dim: usize) -> Result<Vec<f32>, ProviderError> {
        let url = self
            .base_url
            .join("v1/messages")
            .map_err(|error| ProviderError::Shape(format!("invalid messages URL: {error}")))?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: [Message {
                role: "user",
                content: embedding_prompt(text, dim),
            }],
        };

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body: MessagesResponse = response.json().await?;
        let reply = body
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .ok_or_else(|| ProviderError::Shape("no text content block".to_string()))?;

        parse_vector(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AnthropicEmbeddingProvider {
        AnthropicEmbeddingProvider::new(
            &server.uri(),
            "anthropic-key",
            "claude-test",
            Duration::from_secs(5),
        )
        .expect("provider should build")
    }

    #[tokio::test]
    async fn embed_parses_json_array_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "anthropic-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": " [0.5, -0.25, 1.0]\n"}]
            })))
            .mount(&server)
            .await;

        let vector = provider(&server)
            .embed("hello", 3)
            .await
            .expect("embed should succeed");

        assert_eq!(vector, vec![0.5, -0.25, 1.0]);
    }

    #[tokio::test]
    async fn embed_rejects_prose_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "Here is your embedding: [0.1]"}]
            })))
            .mount(&server)
            .await;

        let error = provider(&server)
            .embed("hello", 1)
            .await
            .expect_err("prose should not parse");

        assert!(matches!(error, ProviderError::Shape(_)));
    }

    #[tokio::test]
    async fn embed_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let error = provider(&server)
            .embed("hello", 1)
            .await
            .expect_err("status should fail");

        match error {
            ProviderError::Status { status, body } => {
                assert_eq!(status.as_u16(), 529);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn prompt_names_dimension_and_text() {
        let prompt = embedding_prompt("kayak trip", 1536);
        assert!(prompt.contains("1536 floating-point numbers"));
        assert!(prompt.ends_with("\"kayak trip\""));
    }
}
