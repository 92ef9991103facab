/// model-training Edge Function のクライアント。
///
/// ジョブ作成・状態取得・デプロイ・一覧の 4 アクションをクエリパラメータで切り替える。
/// 再試行は行わず、非 2xx 応答はレスポンスボディをそのまま載せたエラーにする。
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::headers::build_service_headers;

/// Edge Function 側で学習できるモデルの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    AppealHead,
    UserVectors,
    Embeddings,
}

impl ModelType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::AppealHead => "appeal_head",
            ModelType::UserVectors => "user_vectors",
            ModelType::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a remote training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Anything the function returns that is not one of the above; treated as non-terminal.
    Unknown,
}

impl FromStr for JobStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        })
    }
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// `action=status` が返すジョブ行。
///
/// 呼び出し元へは受け取った JSON をそのまま返すため、オブジェクト全体を保持し、
/// 必要なフィールドはアクセサで読む。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingJob(Map<String, Value>);

impl TrainingJob {
    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.str_field("status")
            .and_then(|status| status.parse().ok())
            .unwrap_or(JobStatus::Unknown)
    }

    #[must_use]
    pub fn raw_status(&self) -> Option<&str> {
        self.str_field("status")
    }

    #[must_use]
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn model_version(&self) -> Option<&str> {
        self.str_field("model_version")
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.str_field("error_message")
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    job_id: Value,
}

#[derive(Debug, Deserialize)]
struct ListJobsResponse {
    #[serde(default)]
    jobs: Vec<TrainingJob>,
}

#[derive(Debug, Error)]
pub enum TrainingApiError {
    #[error("{action} request failed: {source}")]
    Request {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to {action}: status {status}: {body}")]
    Status {
        action: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode {action} response: {source}")]
    Decode {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{action} response is missing `{field}`")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
}

/// model-training 関数への単一セッション。
#[derive(Debug, Clone)]
pub struct TrainingApiClient {
    client: Client,
    function_url: Url,
}

impl TrainingApiClient {
    /// 新しいクライアントを作成する。
    ///
    /// # Errors
    /// URL のパース、認証ヘッダーの構築、HTTP クライアントの構築のいずれかに失敗した場合。
    pub fn new(function_url: &str, service_key: &str, timeout: Duration) -> Result<Self> {
        let headers = build_service_headers(service_key)?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build training API HTTP client")?;
        let function_url =
            Url::parse(function_url).context("invalid model-training function URL")?;

        Ok(Self {
            client,
            function_url,
        })
    }

    /// 学習ジョブを作成し、ジョブ ID を返す。
    ///
    /// # Errors
    /// 通信エラー、非 2xx 応答（ボディ付き）、`job_id` 欠落の場合。
    pub async fn create_job(&self, model: ModelType) -> Result<String, TrainingApiError> {
        const ACTION: &str = "create training job";
        let url = self.action_url("train", &[("model", model.as_str())]);
        debug!(model = %model, "creating training job");

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|source| TrainingApiError::Request {
                action: ACTION,
                source,
            })?;
        let body: CreateJobResponse = decode(ACTION, response).await?;

        match body.job_id {
            Value::String(id) => Ok(id),
            Value::Number(id) => Ok(id.to_string()),
            _ => Err(TrainingApiError::MissingField {
                action: ACTION,
                field: "job_id",
            }),
        }
    }

    /// ジョブの現在の状態を取得する。
    ///
    /// # Errors
    /// 通信エラー、非 2xx 応答、`status` 欠落の場合。
    pub async fn job_status(&self, job_id: &str) -> Result<TrainingJob, TrainingApiError> {
        const ACTION: &str = "get job status";
        let url = self.action_url("status", &[("job_id", job_id)]);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| TrainingApiError::Request {
                action: ACTION,
                source,
            })?;
        let job: TrainingJob = decode(ACTION, response).await?;

        if job.raw_status().is_none() {
            return Err(TrainingApiError::MissingField {
                action: ACTION,
                field: "status",
            });
        }
        Ok(job)
    }

    /// 指定バージョンのモデルをデプロイする。
    ///
    /// # Errors
    /// 通信エラーまたは非 2xx 応答の場合。
    pub async fn deploy(&self, model_version: &str) -> Result<(), TrainingApiError> {
        const ACTION: &str = "deploy model";
        let url = self.action_url("deploy", &[("model_version", model_version)]);

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|source| TrainingApiError::Request {
                action: ACTION,
                source,
            })?;
        ensure_success(ACTION, response).await?;
        Ok(())
    }

    /// 直近の学習ジョブ一覧を取得する。
    ///
    /// # Errors
    /// 通信エラーまたは非 2xx 応答の場合。
    pub async fn list_jobs(&self) -> Result<Vec<TrainingJob>, TrainingApiError> {
        const ACTION: &str = "get training summary";
        let url = self.action_url("list", &[]);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| TrainingApiError::Request {
                action: ACTION,
                source,
            })?;
        let body: ListJobsResponse = decode(ACTION, response).await?;
        Ok(body.jobs)
    }

    fn action_url(&self, action: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.function_url.clone();
        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("action", action);
            for (key, value) in params {
                query_pairs.append_pair(key, value);
            }
        }
        url
    }
}

async fn ensure_success(
    action: &'static str,
    response: Response,
) -> Result<Response, TrainingApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TrainingApiError::Status {
        action,
        status,
        body,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(
    action: &'static str,
    response: Response,
) -> Result<T, TrainingApiError> {
    ensure_success(action, response)
        .await?
        .json::<T>()
        .await
        .map_err(|source| TrainingApiError::Decode { action, source })
}
