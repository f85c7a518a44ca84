//! Per-column min-max scaling to [0, 1].
//!
//! Bounds are fit once on training data and persisted alongside the model.
//! Zero-range columns use a unit range, so constant training columns map to 0.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{MlError, MlResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
}

impl MinMaxScaler {
    /// Fit column bounds over the rows of `data`
    pub fn fit(data: ArrayView2<f64>) -> MlResult<Self> {
        if data.nrows() == 0 {
            return Err(MlError::InsufficientData(
                "cannot fit scaler on zero rows".to_string(),
            ));
        }

        let data_min = data
            .axis_iter(Axis(1))
            .map(|col| col.fold(f64::INFINITY, |a, &b| a.min(b)))
            .collect();
        let data_max = data
            .axis_iter(Axis(1))
            .map(|col| col.fold(f64::NEG_INFINITY, |a, &b| a.max(b)))
            .collect();

        Ok(Self { data_min, data_max })
    }

    /// Single-column scaler, used for the regression target
    pub fn fit_column(values: &[f64]) -> MlResult<Self> {
        let column = ArrayView2::from_shape((values.len(), 1), values)
            .map_err(|e| MlError::Training(e.to_string()))?;
        Self::fit(column)
    }

    pub fn n_features(&self) -> usize {
        self.data_min.len()
    }

    fn range(&self, col: usize) -> f64 {
        let range = self.data_max[col] - self.data_min[col];
        if range.abs() < f64::EPSILON {
            1.0
        } else {
            range
        }
    }

    fn check_width(&self, width: usize) -> MlResult<()> {
        if width == self.n_features() {
            Ok(())
        } else {
            Err(MlError::Training(format!(
                "scaler fit on {} columns, got {}",
                self.n_features(),
                width
            )))
        }
    }

    pub fn transform(&self, data: ArrayView2<f64>) -> MlResult<Array2<f64>> {
        self.check_width(data.ncols())?;
        let mut out = data.to_owned();
        for (col, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (min, range) = (self.data_min[col], self.range(col));
            column.mapv_inplace(|v| (v - min) / range);
        }
        Ok(out)
    }

    /// Scale one value of column `col`
    pub fn scale(&self, col: usize, value: f64) -> f64 {
        (value - self.data_min[col]) / self.range(col)
    }

    /// Undo [`scale`](Self::scale) for column `col`
    pub fn inverse(&self, col: usize, scaled: f64) -> f64 {
        scaled * self.range(col) + self.data_min[col]
    }
}

/// The pair of scalers a sequence model needs at inference time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceScalers {
    pub features: MinMaxScaler,
    pub target: MinMaxScaler,
}
