use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array1, ArrayView2};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::{MlError, MlpRegressor, StandardScaler};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to access artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("deserialization error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Scaler and regressor fitted together; inference always scales first.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledRegressor {
    pub scaler: StandardScaler,
    pub regressor: MlpRegressor,
}

impl ScaledRegressor {
    #[must_use]
    pub fn new(scaler: StandardScaler, regressor: MlpRegressor) -> Self {
        Self { scaler, regressor }
    }

    /// # Errors
    /// [`MlError::FeatureMismatch`] when `x` is not as wide as the training data.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, MlError> {
        let scaled = self.scaler.transform(x)?;
        self.regressor.predict(scaled.view())
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.scaler.n_features()
    }

    /// Writes the regressor and scaler as two bincode files.
    ///
    /// # Errors
    /// Encoding or file write failures.
    pub fn save(&self, model_path: &Path, scaler_path: &Path) -> Result<(), ArtifactError> {
        write_bincode(&self.regressor, model_path)?;
        write_bincode(&self.scaler, scaler_path)
    }

    /// # Errors
    /// Missing files or undecodable contents.
    pub fn load(model_path: &Path, scaler_path: &Path) -> Result<Self, ArtifactError> {
        Ok(Self {
            regressor: read_bincode(model_path)?,
            scaler: read_bincode(scaler_path)?,
        })
    }
}

fn write_bincode<T: Serialize>(value: &T, path: &Path) -> Result<(), ArtifactError> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
    fs::write(path, bytes).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(value)
}
