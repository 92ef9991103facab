use std::{env, num::NonZeroUsize, path::PathBuf, time::Duration};

use thiserror::Error;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;
pub const DEFAULT_OUTPUT_DIR: &str = "models";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-sonnet-20240229";
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    supabase_url: String,
    service_key: String,
    openai_api_key: String,
    anthropic_api_key: Option<String>,
    training_function_url: String,
    poll_interval: Duration,
    job_timeout: Duration,
    embedding_timeout: Duration,
    /// Unset means data store reads have no request timeout.
    data_store_timeout: Option<Duration>,
    embedding_dim: NonZeroUsize,
    output_dir: PathBuf,
    anthropic_base_url: String,
    openai_base_url: String,
    anthropic_model: String,
    openai_embedding_model: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// コマンドライン引数で環境変数より優先させる値。
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub supabase_url: Option<String>,
    pub service_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub output_dir: Option<PathBuf>,
}

impl Config {
    /// 必須の接続情報だけを指定し、その他はデフォルト値で設定を構築する。
    #[must_use]
    pub fn new(
        supabase_url: impl Into<String>,
        service_key: impl Into<String>,
        openai_api_key: impl Into<String>,
    ) -> Self {
        let supabase_url = supabase_url.into();
        let training_function_url = default_function_url(&supabase_url);
        Self {
            supabase_url,
            service_key: service_key.into(),
            openai_api_key: openai_api_key.into(),
            anthropic_api_key: None,
            training_function_url,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            embedding_timeout: Duration::from_millis(DEFAULT_EMBEDDING_TIMEOUT_MS),
            data_store_timeout: None,
            embedding_dim: NonZeroUsize::new(DEFAULT_EMBEDDING_DIM)
                .unwrap_or(NonZeroUsize::MIN),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            openai_embedding_model: DEFAULT_OPENAI_EMBEDDING_MODEL.to_string(),
        }
    }

    /// 環境変数のみから設定を読み込む。
    ///
    /// # Errors
    /// 必須の環境変数が未設定、もしくは値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&ConfigOverrides::default())
    }

    /// 環境変数から設定を読み込み、`overrides` に値があればそちらを優先する。
    ///
    /// # Errors
    /// `SUPABASE_URL`・`SUPABASE_SERVICE_ROLE_KEY`・`OPENAI_API_KEY` がどちらからも
    /// 与えられない場合、または数値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let supabase_url = required("SUPABASE_URL", overrides.supabase_url.as_deref())?;
        let service_key = required(
            "SUPABASE_SERVICE_ROLE_KEY",
            overrides.service_key.as_deref(),
        )?;
        let openai_api_key = required("OPENAI_API_KEY", overrides.openai_api_key.as_deref())?;
        let anthropic_api_key = overrides
            .anthropic_api_key
            .clone()
            .or_else(|| env::var("ANTHROPIC_API_KEY").ok())
            .filter(|key| !key.trim().is_empty());

        let training_function_url = env::var("TRAINING_FUNCTION_URL")
            .unwrap_or_else(|_| default_function_url(&supabase_url));

        // Polling settings
        let poll_interval =
            parse_duration_secs("TRAINING_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let job_timeout =
            parse_duration_secs("TRAINING_JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS)?;

        // Embedding provider settings
        let embedding_timeout =
            parse_duration_ms("EMBEDDING_TIMEOUT_MS", DEFAULT_EMBEDDING_TIMEOUT_MS)?;
        let embedding_dim = parse_non_zero_usize("APPEAL_EMBED_DIM", DEFAULT_EMBEDDING_DIM)?;
        let data_store_timeout = parse_optional_duration_secs("DATA_STORE_TIMEOUT_SECS")?;
        let anthropic_base_url = env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_ANTHROPIC_BASE_URL.to_string());
        let openai_base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());
        let anthropic_model =
            env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_ANTHROPIC_MODEL.to_string());
        let openai_embedding_model = env::var("OPENAI_EMBEDDING_MODEL")
            .unwrap_or_else(|_| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string());

        let output_dir = overrides.output_dir.clone().unwrap_or_else(|| {
            PathBuf::from(
                env::var("APPEAL_OUTPUT_DIR").unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.to_string()),
            )
        });

        Ok(Self {
            supabase_url,
            service_key,
            openai_api_key,
            anthropic_api_key,
            training_function_url,
            poll_interval,
            job_timeout,
            embedding_timeout,
            data_store_timeout,
            embedding_dim,
            output_dir,
            anthropic_base_url,
            openai_base_url,
            anthropic_model,
            openai_embedding_model,
        })
    }

    #[must_use]
    pub fn with_training_function_url(mut self, url: impl Into<String>) -> Self {
        self.training_function_url = url.into();
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_data_store_timeout(mut self, timeout: Duration) -> Self {
        self.data_store_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_embedding_dim(mut self, dim: NonZeroUsize) -> Self {
        self.embedding_dim = dim;
        self
    }

    #[must_use]
    pub fn with_anthropic(mut self, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(api_key.into());
        self.anthropic_base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_openai_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.openai_base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn supabase_url(&self) -> &str {
        &self.supabase_url
    }

    #[must_use]
    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    #[must_use]
    pub fn openai_api_key(&self) -> &str {
        &self.openai_api_key
    }

    #[must_use]
    pub fn anthropic_api_key(&self) -> Option<&str> {
        self.anthropic_api_key.as_deref()
    }

    #[must_use]
    pub fn training_function_url(&self) -> &str {
        &self.training_function_url
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        self.job_timeout
    }

    #[must_use]
    pub fn embedding_timeout(&self) -> Duration {
        self.embedding_timeout
    }

    #[must_use]
    pub fn data_store_timeout(&self) -> Option<Duration> {
        self.data_store_timeout
    }

    #[must_use]
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim.get()
    }

    #[must_use]
    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    #[must_use]
    pub fn anthropic_base_url(&self) -> &str {
        &self.anthropic_base_url
    }

    #[must_use]
    pub fn openai_base_url(&self) -> &str {
        &self.openai_base_url
    }

    #[must_use]
    pub fn anthropic_model(&self) -> &str {
        &self.anthropic_model
    }

    #[must_use]
    pub fn openai_embedding_model(&self) -> &str {
        &self.openai_embedding_model
    }
}

fn default_function_url(supabase_url: &str) -> String {
    format!(
        "{}/functions/v1/model-training",
        supabase_url.trim_end_matches('/')
    )
}

fn required(name: &'static str, override_value: Option<&str>) -> Result<String, ConfigError> {
    if let Some(value) = override_value.filter(|v| !v.trim().is_empty()) {
        return Ok(value.to_string());
    }
    env_var(name)
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let value = parse_usize(name, default)?;
    NonZeroUsize::new(value).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(value))
}

fn parse_optional_duration_secs(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    raw.parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|error| ConfigError::Invalid {
            name,
            source: anyhow::Error::new(error),
        })
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests hold ENV_MUTEX and assign valid UTF-8 values.
        unsafe {
            env::set_var(name, value);
        }
    }

    fn remove_env(name: &str) {
        // SAFETY: tests hold ENV_MUTEX and clean up deterministic keys.
        unsafe {
            env::remove_var(name);
        }
    }

    fn reset_env() {
        for name in [
            "SUPABASE_URL",
            "SUPABASE_SERVICE_ROLE_KEY",
            "OPENAI_API_KEY",
            "ANTHROPIC_API_KEY",
            "TRAINING_FUNCTION_URL",
            "TRAINING_POLL_INTERVAL_SECS",
            "TRAINING_JOB_TIMEOUT_SECS",
            "EMBEDDING_TIMEOUT_MS",
            "DATA_STORE_TIMEOUT_SECS",
            "APPEAL_EMBED_DIM",
            "APPEAL_OUTPUT_DIR",
            "ANTHROPIC_BASE_URL",
            "OPENAI_BASE_URL",
            "ANTHROPIC_MODEL",
            "OPENAI_EMBEDDING_MODEL",
        ] {
            remove_env(name);
        }
    }

    fn set_required() {
        set_env("SUPABASE_URL", "https://project.supabase.co/");
        set_env("SUPABASE_SERVICE_ROLE_KEY", "service-key");
        set_env("OPENAI_API_KEY", "sk-test");
    }

    #[test]
    fn from_env_uses_defaults_when_optional_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_required();

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.supabase_url(), "https://project.supabase.co/");
        assert_eq!(config.service_key(), "service-key");
        assert_eq!(config.openai_api_key(), "sk-test");
        assert!(config.anthropic_api_key().is_none());
        assert_eq!(
            config.training_function_url(),
            "https://project.supabase.co/functions/v1/model-training"
        );
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.job_timeout(), Duration::from_secs(3600));
        assert_eq!(config.embedding_timeout(), Duration::from_millis(30_000));
        assert_eq!(config.data_store_timeout(), None);
        assert_eq!(config.embedding_dim(), 1536);
        assert_eq!(config.output_dir(), std::path::Path::new("models"));
        assert_eq!(config.anthropic_model(), DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(
            config.openai_embedding_model(),
            DEFAULT_OPENAI_EMBEDDING_MODEL
        );
    }

    #[test]
    fn from_env_overrides_values() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_required();
        set_env("ANTHROPIC_API_KEY", "anthropic-key");
        set_env("TRAINING_FUNCTION_URL", "http://localhost:54321/fn");
        set_env("TRAINING_POLL_INTERVAL_SECS", "5");
        set_env("TRAINING_JOB_TIMEOUT_SECS", "120");
        set_env("DATA_STORE_TIMEOUT_SECS", "300");
        set_env("APPEAL_EMBED_DIM", "8");
        set_env("APPEAL_OUTPUT_DIR", "/tmp/appeal");

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.anthropic_api_key(), Some("anthropic-key"));
        assert_eq!(config.training_function_url(), "http://localhost:54321/fn");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.job_timeout(), Duration::from_secs(120));
        assert_eq!(config.data_store_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.embedding_dim(), 8);
        assert_eq!(config.output_dir(), std::path::Path::new("/tmp/appeal"));
    }

    #[test]
    fn cli_overrides_take_precedence_over_env() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_required();

        let overrides = ConfigOverrides {
            supabase_url: Some("http://cli.example".to_string()),
            service_key: Some("cli-key".to_string()),
            openai_api_key: None,
            anthropic_api_key: Some(String::new()),
            output_dir: Some(PathBuf::from("out")),
        };
        let config = Config::load(&overrides).expect("config should load");

        assert_eq!(config.supabase_url(), "http://cli.example");
        assert_eq!(config.service_key(), "cli-key");
        assert_eq!(config.openai_api_key(), "sk-test");
        assert!(config.anthropic_api_key().is_none());
        assert_eq!(config.output_dir(), std::path::Path::new("out"));
    }

    #[test]
    fn from_env_errors_when_supabase_url_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("SUPABASE_SERVICE_ROLE_KEY", "service-key");
        set_env("OPENAI_API_KEY", "sk-test");

        let error = Config::from_env().expect_err("missing url should fail");

        assert!(matches!(error, ConfigError::Missing("SUPABASE_URL")));
    }

    #[test]
    fn from_env_errors_when_openai_key_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("SUPABASE_URL", "https://project.supabase.co");
        set_env("SUPABASE_SERVICE_ROLE_KEY", "service-key");

        let error = Config::from_env().expect_err("missing openai key should fail");

        assert!(matches!(error, ConfigError::Missing("OPENAI_API_KEY")));
    }

    #[test]
    fn from_env_rejects_zero_embedding_dim() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_required();
        set_env("APPEAL_EMBED_DIM", "0");

        let error = Config::from_env().expect_err("zero dim should fail");

        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "APPEAL_EMBED_DIM",
                ..
            }
        ));
    }
}
