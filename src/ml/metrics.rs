use ndarray::ArrayView1;

/// Mean of squared residuals; 0 for empty input.
#[must_use]
pub fn mean_squared_error(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = y_true.len() as f64;
    (&y_true - &y_pred).mapv(|r| r * r).sum() / n
}

/// Coefficient of determination. A constant target scores 1 when predicted exactly, else 0.
#[must_use]
pub fn r2_score(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> f64 {
    let Some(mean) = y_true.mean() else {
        return 0.0;
    };
    let ss_res = (&y_true - &y_pred).mapv(|r| r * r).sum();
    let ss_tot = y_true.mapv(|y| (y - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn perfect_predictions() {
        let y = array![0.1, 0.5, 0.9];
        assert_eq!(mean_squared_error(y.view(), y.view()), 0.0);
        assert!((r2_score(y.view(), y.view()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn predicting_the_mean_scores_zero() {
        let y = array![1.0, 2.0, 3.0];
        let mean = array![2.0, 2.0, 2.0];

        assert!((mean_squared_error(y.view(), mean.view()) - 2.0 / 3.0).abs() < 1e-12);
        assert!(r2_score(y.view(), mean.view()).abs() < 1e-12);
    }

    #[test]
    fn constant_target() {
        let y = array![0.5, 0.5];
        assert_eq!(r2_score(y.view(), array![0.5, 0.5].view()), 1.0);
        assert_eq!(r2_score(y.view(), array![0.4, 0.6].view()), 0.0);
    }
}
