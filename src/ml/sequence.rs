//! Sliding-window preparation for the sequence model.
//!
//! A window of length `L` ending before row `i` covers rows `[i - L, i)` and
//! is labeled with the target at row `i`.

use ndarray::{s, Array1, Array2, Array3, ArrayView2};

use crate::domain::{TrainingSample, WeatherRecord, FEATURE_COUNT};

/// Number of windows a series of `n` rows yields
pub fn window_count(n: usize, sequence_length: usize) -> usize {
    n.saturating_sub(sequence_length)
}

/// Stack samples into an `(n, FEATURE_COUNT)` feature matrix and target vector
pub fn to_matrix(samples: &[TrainingSample]) -> (Array2<f64>, Vec<f64>) {
    let mut features = Array2::zeros((samples.len(), FEATURE_COUNT));
    let mut targets = Vec::with_capacity(samples.len());

    for (mut row, sample) in features.rows_mut().into_iter().zip(samples) {
        for (slot, value) in row.iter_mut().zip(sample.record.to_features()) {
            *slot = value;
        }
        targets.push(sample.solar_irradiance);
    }
    (features, targets)
}

/// Stack records into an `(n, FEATURE_COUNT)` matrix
pub fn records_to_matrix(records: &[WeatherRecord]) -> Array2<f64> {
    let mut features = Array2::zeros((records.len(), FEATURE_COUNT));
    for (mut row, record) in features.rows_mut().into_iter().zip(records) {
        for (slot, value) in row.iter_mut().zip(record.to_features()) {
            *slot = value;
        }
    }
    features
}

/// Build `(windows, labels)` with shapes `(m, L, F)` and `(m,)`.
///
/// Series with `n <= L` produce zero windows.
pub fn build_windows(
    features: ArrayView2<f64>,
    targets: &[f64],
    sequence_length: usize,
) -> (Array3<f64>, Array1<f64>) {
    let n = features.nrows().min(targets.len());
    let n_features = features.ncols();
    let m = window_count(n, sequence_length);

    let mut windows = Array3::zeros((m, sequence_length, n_features));
    let mut labels = Array1::zeros(m);

    for (w, i) in (sequence_length..n).enumerate() {
        windows
            .slice_mut(s![w, .., ..])
            .assign(&features.slice(s![i - sequence_length..i, ..]));
        labels[w] = targets[i];
    }

    (windows, labels)
}
