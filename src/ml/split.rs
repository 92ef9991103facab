use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::MlError;

/// Row indices for a shuffled hold-out split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles `0..samples` with `seed` and holds out `ceil(test_fraction * samples)` rows.
///
/// # Errors
/// [`MlError::InsufficientSamples`] when either side would be empty.
pub fn train_test_split(
    samples: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<SplitIndices, MlError> {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let n_test = (test_fraction * samples as f64).ceil() as usize;
    if n_test == 0 || n_test >= samples {
        return Err(MlError::InsufficientSamples { samples });
    }

    let mut indices: Vec<usize> = (0..samples).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = indices.split_off(n_test);

    Ok(SplitIndices {
        train,
        test: indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(10, 2)]
    #[case(11, 3)]
    #[case(25, 5)]
    #[case(101, 21)]
    fn test_side_is_rounded_up(#[case] samples: usize, #[case] expected_test: usize) {
        let split = train_test_split(samples, 0.2, 42).expect("split should succeed");

        assert_eq!(split.test.len(), expected_test);
        assert_eq!(split.train.len(), samples - expected_test);
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..samples).collect::<Vec<_>>());
    }

    #[test]
    fn same_seed_gives_same_split() {
        let first = train_test_split(50, 0.2, 42).expect("split should succeed");
        let second = train_test_split(50, 0.2, 42).expect("split should succeed");
        assert_eq!(first, second);
    }

    #[test]
    fn single_sample_cannot_be_split() {
        assert_eq!(
            train_test_split(1, 0.2, 42),
            Err(MlError::InsufficientSamples { samples: 1 })
        );
    }
}
