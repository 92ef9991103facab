use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::MlError;

/// Per-feature standardisation to zero mean and unit (population) variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Constant features get a scale of 1 so they map to zero instead of NaN.
    ///
    /// # Errors
    /// [`MlError::Empty`] when `x` has no rows.
    pub fn fit(x: ArrayView2<'_, f64>) -> Result<Self, MlError> {
        let mean = x.mean_axis(Axis(0)).ok_or(MlError::Empty)?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std < f64::EPSILON { 1.0 } else { std });
        Ok(Self { mean, scale })
    }

    /// # Errors
    /// [`MlError::FeatureMismatch`] when `x` is not as wide as the fitted data.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, MlError> {
        if x.ncols() != self.n_features() {
            return Err(MlError::FeatureMismatch {
                expected: self.n_features(),
                actual: x.ncols(),
            });
        }
        Ok((&x - &self.mean) / &self.scale)
    }

    #[must_use]
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    #[must_use]
    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }
}
