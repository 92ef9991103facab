//! アピール予測ヘッドの学習ドライバー。
//!
//! データ取得 → ラベル計算 → 埋め込み取得 → 学習 → 成果物の書き出しを順に行う。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use tracing::{info, warn};

use super::embedding::EmbeddingChain;
use super::labels::{aggregate_events, build_examples};
use super::types::TrainingExample;
use crate::clients::DataStoreClient;
use crate::config::Config;
use crate::ml::{
    MlError, MlpConfig, MlpRegressor, ScaledRegressor, StandardScaler, export_onnx,
    mean_squared_error, r2_score, train_test_split,
};

/// これ未満の件数では学習しない。
pub const MIN_TRAINING_EXAMPLES: usize = 10;
pub const MODEL_FILE: &str = "appeal_model.bin";
pub const SCALER_FILE: &str = "appeal_scaler.bin";
pub const ONNX_FILE: &str = "appeal_model.onnx";

const TEST_FRACTION: f64 = 0.2;
const SPLIT_SEED: u64 = 42;

/// 学習済みモデルとホールドアウト評価。
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub model: ScaledRegressor,
    pub train_samples: usize,
    pub test_samples: usize,
    pub mse: f64,
    pub r2: f64,
}

/// ゼロベクトルで代替した埋め込みの件数も含む。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub mse: f64,
    pub r2: f64,
    pub epochs: usize,
    pub degraded_embeddings: usize,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub onnx_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    Trained(TrainingReport),
    /// 件数不足のため成果物は作られていない。
    InsufficientData { examples: usize, required: usize },
}

#[derive(Debug)]
pub struct AppealTrainer {
    store: DataStoreClient,
    embeddings: EmbeddingChain,
    mlp: MlpConfig,
}

impl AppealTrainer {
    #[must_use]
    pub fn new(store: DataStoreClient, embeddings: EmbeddingChain) -> Self {
        Self {
            store,
            embeddings,
            mlp: MlpConfig::default(),
        }
    }

    /// # Errors
    /// HTTP クライアントの構築に失敗した場合。
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = DataStoreClient::new(
            config.supabase_url(),
            config.service_key(),
            config.data_store_timeout(),
        )?;
        Ok(Self::new(store, super::embedding_chain(config)?))
    }

    #[must_use]
    pub fn with_mlp_config(mut self, mlp: MlpConfig) -> Self {
        self.mlp = mlp;
        self
    }

    /// アイテムとイベントを取得し、ラベル付きの学習例に変換する。
    ///
    /// # Errors
    /// データストアからの取得に失敗した場合。
    pub async fn fetch_training_data(&self) -> Result<Vec<TrainingExample>> {
        let raw = self.store.fetch_training_data().await?;
        let masses = aggregate_events(&raw.events, Utc::now());
        let examples = build_examples(&raw.items, &masses);
        info!(
            items = raw.items.len(),
            events = raw.events.len(),
            examples = examples.len(),
            "built appeal training examples"
        );
        Ok(examples)
    }

    /// 学習例ごとに埋め込みを 1 件ずつ取得する。戻り値の 2 つ目はゼロベクトル代替の件数。
    pub async fn embed_examples(&self, examples: &[TrainingExample]) -> (Array2<f64>, usize) {
        let dim = self.embeddings.dim();
        let mut features = Array2::zeros((examples.len(), dim));
        let mut degraded = 0;

        for (row, example) in examples.iter().enumerate() {
            let outcome = self.embeddings.resolve(&example.text).await;
            if outcome.is_degraded() {
                degraded += 1;
            }
            features
                .row_mut(row)
                .assign(&Array1::from_iter(outcome.vector.iter().map(|v| f64::from(*v))));
        }

        if degraded > 0 {
            warn!(degraded, total = examples.len(), "some embeddings fell back to zero vectors");
        }
        (features, degraded)
    }

    /// 埋め込みを取得してモデルを学習し、テスト分割で評価する。
    ///
    /// # Errors
    /// 分割・学習に失敗した場合、またはブロッキングタスクが異常終了した場合。
    pub async fn train_model(&self, examples: &[TrainingExample]) -> Result<TrainedModel> {
        info!(examples = examples.len(), "fetching embeddings");
        let (features, _) = self.embed_examples(examples).await;
        self.fit(features, examples).await
    }

    /// 取得から成果物の書き出しまでを一通り実行する。
    ///
    /// # Errors
    /// 出力ディレクトリの作成、データ取得、学習、書き出しのいずれかに失敗した場合。
    /// 学習例が足りない場合はエラーにせず [`TrainingOutcome::InsufficientData`] を返す。
    pub async fn run_training(&self, output_dir: &Path) -> Result<TrainingOutcome> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

        let examples = self.fetch_training_data().await?;
        if examples.len() < MIN_TRAINING_EXAMPLES {
            warn!(
                examples = examples.len(),
                required = MIN_TRAINING_EXAMPLES,
                "insufficient training data; skipping appeal model training"
            );
            return Ok(TrainingOutcome::InsufficientData {
                examples: examples.len(),
                required: MIN_TRAINING_EXAMPLES,
            });
        }

        let (features, degraded) = self.embed_examples(&examples).await;
        let trained = self.fit(features, &examples).await?;

        let model_path = output_dir.join(MODEL_FILE);
        let scaler_path = output_dir.join(SCALER_FILE);
        let onnx_path = output_dir.join(ONNX_FILE);
        let model = trained.model.clone();
        let paths = (model_path.clone(), scaler_path.clone(), onnx_path.clone());
        tokio::task::spawn_blocking(move || -> Result<()> {
            let (model_path, scaler_path, onnx_path) = paths;
            model
                .save(&model_path, &scaler_path)
                .context("failed to save appeal model")?;
            export_onnx(&model, &onnx_path).context("failed to export appeal model to ONNX")?;
            Ok(())
        })
        .await
        .context("artifact writer task panicked")??;
        info!(dir = %output_dir.display(), "appeal model artifacts written");

        Ok(TrainingOutcome::Trained(TrainingReport {
            samples: examples.len(),
            train_samples: trained.train_samples,
            test_samples: trained.test_samples,
            mse: trained.mse,
            r2: trained.r2,
            epochs: trained.model.regressor.epochs(),
            degraded_embeddings: degraded,
            model_path,
            scaler_path,
            onnx_path,
        }))
    }

    async fn fit(&self, features: Array2<f64>, examples: &[TrainingExample]) -> Result<TrainedModel> {
        let targets: Array1<f64> = examples.iter().map(|e| e.appeal_score).collect();
        let config = self.mlp.clone();
        let trained = tokio::task::spawn_blocking(move || fit_and_evaluate(&features, &targets, &config))
            .await
            .context("training task panicked")?
            .context("failed to train appeal model")?;

        info!(
            mse = trained.mse,
            r2 = trained.r2,
            train_samples = trained.train_samples,
            test_samples = trained.test_samples,
            epochs = trained.model.regressor.epochs(),
            "appeal model trained"
        );
        Ok(trained)
    }
}

/// 80/20 に分割し、学習側だけでスケーラーを当ててから回帰器を学習する。
///
/// # Errors
/// サンプル不足、形状の不一致、損失の発散。
pub fn fit_and_evaluate(
    features: &Array2<f64>,
    targets: &Array1<f64>,
    config: &MlpConfig,
) -> Result<TrainedModel, MlError> {
    if features.nrows() != targets.len() {
        return Err(MlError::TargetMismatch {
            samples: features.nrows(),
            targets: targets.len(),
        });
    }
    let split = train_test_split(features.nrows(), TEST_FRACTION, SPLIT_SEED)?;
    let x_train = features.select(Axis(0), &split.train);
    let x_test = features.select(Axis(0), &split.test);
    let y_train = targets.select(Axis(0), &split.train);
    let y_test = targets.select(Axis(0), &split.test);

    let scaler = StandardScaler::fit(x_train.view())?;
    let regressor = MlpRegressor::fit(scaler.transform(x_train.view())?.view(), y_train.view(), config)?;
    let model = ScaledRegressor::new(scaler, regressor);

    let predictions = model.predict(x_test.view())?;
    Ok(TrainedModel {
        train_samples: split.train.len(),
        test_samples: split.test.len(),
        mse: mean_squared_error(y_test.view(), predictions.view()),
        r2: r2_score(y_test.view(), predictions.view()),
        model,
    })
}
