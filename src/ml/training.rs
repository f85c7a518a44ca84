//! Shared training utilities: data splits and evaluation metrics

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{MlError, MlResult, ValidationMetrics};

/// Shuffled train/test index split.
///
/// The test part takes `ceil(n * test_size)` rows, leaving at least one row
/// for training whenever `n > 1`.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> MlResult<(Vec<usize>, Vec<usize>)> {
    if !(0.0..1.0).contains(&test_size) {
        return Err(MlError::Training(format!(
            "test size must be in [0, 1), got {}",
            test_size
        )));
    }
    if n < 2 {
        return Err(MlError::InsufficientData(format!(
            "need at least 2 samples to split, got {}",
            n
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_test = ((n as f64 * test_size - 1e-9).ceil() as usize).min(n - 1);
    let test = indices.split_off(n - n_test);
    Ok((indices, test))
}

/// Index where the trailing validation part starts: `floor(n * (1 - split))`.
/// Rows are not shuffled.
pub fn holdout_tail(n: usize, validation_split: f64) -> usize {
    let boundary = (n as f64 * (1.0 - validation_split)) as usize;
    boundary.min(n)
}

/// Calculate validation metrics
pub fn calculate_metrics(predictions: &[f64], targets: &[f64]) -> MlResult<ValidationMetrics> {
    if predictions.len() != targets.len() {
        return Err(MlError::Training(format!(
            "Prediction and target count mismatch: {} vs {}",
            predictions.len(),
            targets.len()
        )));
    }

    if predictions.is_empty() {
        return Err(MlError::InsufficientData("No predictions to evaluate".to_string()));
    }

    let n = predictions.len() as f64;

    let mae: f64 = predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| (p - t).abs())
        .sum::<f64>()
        / n;

    let mse: f64 = predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / n;
    let rmse = mse.sqrt();

    // Night-time targets are exactly zero, so MAPE only covers lit hours
    let (ape_sum, ape_count) = predictions
        .iter()
        .zip(targets)
        .filter(|(_, t)| t.abs() > 1e-10)
        .fold((0.0, 0usize), |(sum, count), (p, t)| {
            (sum + ((p - t) / t).abs() * 100.0, count + 1)
        });
    let mape = if ape_count == 0 { 0.0 } else { ape_sum / ape_count as f64 };

    let mean_target: f64 = targets.iter().sum::<f64>() / n;
    let ss_tot: f64 = targets.iter().map(|t| (t - mean_target).powi(2)).sum();
    let ss_res: f64 = predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| (t - p).powi(2))
        .sum();

    let r2 = if ss_tot.abs() < 1e-10 {
        0.0
    } else {
        1.0 - (ss_res / ss_tot)
    };

    Ok(ValidationMetrics::new(mae, rmse, mape, r2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(100, 0.2, 80, 20)]
    #[case(10, 0.25, 7, 3)]
    #[case(2, 0.2, 1, 1)]
    #[case(5, 0.0, 5, 0)]
    fn test_split_sizes(#[case] n: usize, #[case] test_size: f64, #[case] train: usize, #[case] test: usize) {
        let (tr, te) = train_test_split(n, test_size, 42).unwrap();
        assert_eq!(tr.len(), train);
        assert_eq!(te.len(), test);
    }

    #[test]
    fn test_split_is_a_seeded_permutation() {
        let (tr, te) = train_test_split(50, 0.2, 7).unwrap();
        let mut all: Vec<usize> = tr.iter().chain(te.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());

        assert_eq!(train_test_split(50, 0.2, 7).unwrap(), (tr.clone(), te));
        assert_ne!(train_test_split(50, 0.2, 8).unwrap().0, tr);
    }

    #[test]
    fn test_split_rejects_bad_input() {
        assert!(matches!(train_test_split(1, 0.2, 0), Err(MlError::InsufficientData(_))));
        assert!(train_test_split(10, 1.0, 0).is_err());
    }

    #[rstest]
    #[case(100, 0.2, 80)]
    #[case(10, 0.0, 10)]
    #[case(3, 0.5, 1)]
    fn test_holdout_tail(#[case] n: usize, #[case] split: f64, #[case] boundary: usize) {
        assert_eq!(holdout_tail(n, split), boundary);
    }

    #[test]
    fn test_calculate_metrics() {
        let predictions = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let targets = vec![1.1, 2.1, 2.9, 4.2, 4.8];

        let metrics = calculate_metrics(&predictions, &targets).unwrap();

        assert!(metrics.mae < 0.3);
        assert!(metrics.rmse < 0.4);
        assert!(metrics.r2 > 0.9);
    }

    #[test]
    fn test_mape_skips_zero_targets() {
        let metrics = calculate_metrics(&[0.0, 5.0, 110.0], &[0.0, 0.0, 100.0]).unwrap();
        assert!((metrics.mape - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_errors() {
        assert!(calculate_metrics(&[], &[]).is_err());
        assert!(calculate_metrics(&[1.0], &[1.0, 2.0]).is_err());
    }
}
