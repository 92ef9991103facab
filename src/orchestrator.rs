//! Remote training job orchestration: create, poll until terminal, deploy.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clients::{JobStatus, ModelType, TrainingApiClient, TrainingApiError, TrainingJob};
use crate::config::Config;

/// Per-request timeout for the training function. Polling has its own overall deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Embeddings and user vectors feed the appeal head, so they run first.
pub const PIPELINE_ORDER: [ModelType; 3] = [
    ModelType::Embeddings,
    ModelType::UserVectors,
    ModelType::AppealHead,
];

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Api(#[from] TrainingApiError),
    #[error("training job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },
    #[error("training job {job_id} timed out after {timeout:?}")]
    Timeout { job_id: String, timeout: Duration },
    #[error("stopped waiting for training job {job_id}")]
    Cancelled { job_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Running,
    Completed,
    Failed,
}

/// JSON summary of a full pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub models: BTreeMap<ModelType, TrainingJob>,
    pub status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl PipelineReport {
    fn started() -> Self {
        Self {
            started_at: Utc::now(),
            models: BTreeMap::new(),
            status: PipelineStatus::Running,
            completed_at: None,
            error: None,
            failed_at: None,
        }
    }

    fn complete(&mut self) {
        self.status = PipelineStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    fn fail(&mut self, error: String) {
        self.status = PipelineStatus::Failed;
        self.error = Some(error);
        self.failed_at = Some(Utc::now());
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Completed
    }
}

#[derive(Debug, Clone)]
pub struct JobOrchestrator {
    api: TrainingApiClient,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl JobOrchestrator {
    #[must_use]
    pub fn new(api: TrainingApiClient, poll_interval: Duration, job_timeout: Duration) -> Self {
        Self {
            api,
            poll_interval,
            job_timeout,
        }
    }

    /// # Errors
    /// Fails when the training API client cannot be built from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api = TrainingApiClient::new(
            config.training_function_url(),
            config.service_key(),
            REQUEST_TIMEOUT,
        )?;
        Ok(Self::new(api, config.poll_interval(), config.job_timeout()))
    }

    /// Creates a job for `model` and returns its id.
    ///
    /// # Errors
    /// Returns the remote status and raw body when the call does not succeed.
    pub async fn create_training_job(&self, model: ModelType) -> Result<String, OrchestratorError> {
        let job_id = self.api.create_job(model).await?;
        info!(model = %model, job_id = %job_id, "created training job");
        Ok(job_id)
    }

    /// Polls until the job completes, fails, or `timeout` elapses.
    ///
    /// # Errors
    /// [`OrchestratorError::JobFailed`] with the remote message, [`OrchestratorError::Timeout`],
    /// or any status call failure.
    pub async fn wait_for_job_completion(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<TrainingJob, OrchestratorError> {
        self.wait_for_job_completion_with_cancel(job_id, timeout, &CancellationToken::new())
            .await
    }

    /// Same as [`Self::wait_for_job_completion`], but also gives up when `cancel` fires.
    /// The remote job keeps running either way.
    ///
    /// # Errors
    /// See [`Self::wait_for_job_completion`]; additionally [`OrchestratorError::Cancelled`].
    pub async fn wait_for_job_completion_with_cancel(
        &self,
        job_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TrainingJob, OrchestratorError> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(OrchestratorError::Timeout {
                    job_id: job_id.to_string(),
                    timeout,
                });
            }

            let job = self.api.job_status(job_id).await?;
            match job.status() {
                JobStatus::Completed => {
                    info!(job_id, elapsed = ?started.elapsed(), "training job completed");
                    return Ok(job);
                }
                JobStatus::Failed => {
                    return Err(OrchestratorError::JobFailed {
                        job_id: job_id.to_string(),
                        message: job.error_message().unwrap_or("Unknown error").to_string(),
                    });
                }
                _ => {
                    info!(job_id, status = job.raw_status().unwrap_or_default(), "training job in progress");
                }
            }

            let wake_at = match (Instant::now().checked_add(self.poll_interval), deadline) {
                (Some(next_poll), Some(deadline)) => Some(next_poll.min(deadline)),
                (next_poll, deadline) => next_poll.or(deadline),
            };
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(OrchestratorError::Cancelled {
                        job_id: job_id.to_string(),
                    });
                }
                () = sleep_until_some(wake_at) => {}
            }
        }
    }

    /// # Errors
    /// Returns the remote status and raw body when the call does not succeed.
    pub async fn deploy_model(&self, model: ModelType, version: &str) -> Result<(), OrchestratorError> {
        info!(model = %model, version, "deploying model");
        self.api.deploy(version).await?;
        info!(model = %model, version, "model deployed");
        Ok(())
    }

    /// Recent jobs as reported by the training function.
    ///
    /// # Errors
    /// Returns the remote status and raw body when the call does not succeed.
    pub async fn list_jobs(&self) -> Result<Vec<TrainingJob>, OrchestratorError> {
        Ok(self.api.list_jobs().await?)
    }

    /// Trains the appeal head remotely and deploys the resulting version, if any.
    ///
    /// # Errors
    /// Propagates creation, polling and deployment failures.
    pub async fn train_appeal_head(&self) -> Result<TrainingJob, OrchestratorError> {
        info!("starting appeal head model training");
        let job = self.create_and_wait(ModelType::AppealHead).await?;
        if let Some(version) = job.model_version().filter(|v| !v.is_empty()) {
            self.deploy_model(ModelType::AppealHead, version).await?;
        }
        Ok(job)
    }

    /// # Errors
    /// Propagates creation and polling failures.
    pub async fn refresh_user_vectors(&self) -> Result<TrainingJob, OrchestratorError> {
        info!("refreshing user vectors");
        self.create_and_wait(ModelType::UserVectors).await
    }

    /// # Errors
    /// Propagates creation and polling failures.
    pub async fn refresh_embeddings(&self) -> Result<TrainingJob, OrchestratorError> {
        info!("refreshing embeddings");
        self.create_and_wait(ModelType::Embeddings).await
    }

    /// Runs the single-model flow for `model`.
    ///
    /// # Errors
    /// Propagates the failure of the selected flow.
    pub async fn run_model(&self, model: ModelType) -> Result<TrainingJob, OrchestratorError> {
        match model {
            ModelType::AppealHead => self.train_appeal_head().await,
            ModelType::UserVectors => self.refresh_user_vectors().await,
            ModelType::Embeddings => self.refresh_embeddings().await,
        }
    }

    /// Runs every step of [`PIPELINE_ORDER`], stopping at the first failure.
    pub async fn run_full_pipeline(&self) -> PipelineReport {
        info!("starting full model training pipeline");
        let mut report = PipelineReport::started();

        for (index, model) in PIPELINE_ORDER.into_iter().enumerate() {
            info!(step = index + 1, model = %model, "running pipeline step");
            match self.run_model(model).await {
                Ok(job) => {
                    report.models.insert(model, job);
                }
                Err(err) => {
                    error!(model = %model, error = %err, "training pipeline failed");
                    report.fail(err.to_string());
                    return report;
                }
            }
        }

        report.complete();
        info!("full training pipeline completed");
        report
    }

    async fn create_and_wait(&self, model: ModelType) -> Result<TrainingJob, OrchestratorError> {
        let job_id = self.create_training_job(model).await?;
        self.wait_for_job_completion(&job_id, self.job_timeout).await
    }
}

/// Sleeps until `wake_at`, or forever when there is none.
async fn sleep_until_some(wake_at: Option<Instant>) {
    match wake_at {
        Some(wake_at) => sleep_until(wake_at).await,
        None => std::future::pending().await,
    }
}
