//! Small dense regression toolkit used by the appeal trainer.
//!
//! Callers pass `f64` ndarray matrices with samples along axis 0; the regressor itself
//! trains and runs on burn's ndarray backend.

pub mod metrics;
pub mod mlp;
pub mod onnx;
pub mod pipeline;
pub mod scaler;
pub mod split;

use thiserror::Error;

pub use metrics::{mean_squared_error, r2_score};
pub use mlp::{DenseLayer, Inference, MlpConfig, MlpRegressor, Network};
pub use onnx::{ExportError, build_model_proto, export_onnx};
pub use pipeline::{ArtifactError, ScaledRegressor};
pub use scaler::StandardScaler;
pub use split::{SplitIndices, train_test_split};

#[derive(Debug, Error, PartialEq)]
pub enum MlError {
    #[error("cannot fit on an empty sample set")]
    Empty,
    #[error("expected {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },
    #[error("{samples} samples but {targets} targets")]
    TargetMismatch { samples: usize, targets: usize },
    #[error("{samples} samples cannot be split into non-empty train and test sets")]
    InsufficientSamples { samples: usize },
    #[error("training loss diverged at epoch {epoch}")]
    Diverged { epoch: usize },
    #[error("layer {layer} does not connect to the network")]
    MalformedLayers { layer: usize },
}
