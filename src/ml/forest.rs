//! SmartCore Random Forest Regressor
//!
//! Predicts irradiance from a single [`WeatherRecord`]. Features go in
//! unscaled, in [`FEATURE_NAMES`] order.
//!
//! SmartCore does not expose impurity importances for regression forests, so
//! feature importance is measured by permutation on the hold-out split: each
//! column is shuffled in turn and the increase in MSE is recorded.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{RandomForestRegressor, RandomForestRegressorParameters};
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::training::{calculate_metrics, train_test_split};
use super::{write_artifact, MlError, MlResult, ModelMetadata, ModelType, ValidationMetrics};
use crate::domain::{TrainingSample, WeatherRecord, FEATURE_COUNT, FEATURE_NAMES};

type Regressor = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Training parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParameters {
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
    /// Fraction of samples held out for evaluation
    pub test_size: f64,
}

impl Default for ForestParameters {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: Some(10),
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
            test_size: 0.2,
        }
    }
}

impl ForestParameters {
    fn regressor_parameters(&self) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            min_samples_split: self.min_samples_split,
            n_trees: self.n_trees,
            // every split considers all features
            m: Some(FEATURE_COUNT),
            keep_samples: false,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Outcome of a training run, evaluated on the hold-out split
#[derive(Debug, Clone, Serialize)]
pub struct ForestReport {
    pub mse: f64,
    pub r2: f64,
    pub metrics: ValidationMetrics,
    pub train_samples: usize,
    pub test_samples: usize,
    pub feature_importance: Vec<FeatureImportance>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FittedForest {
    regressor: Regressor,
    metadata: ModelMetadata,
    importances: Vec<FeatureImportance>,
    parameters: ForestParameters,
}

/// Random forest irradiance regressor; untrained until [`train`](Self::train)
/// or [`load`](Self::load) succeeds
#[derive(Debug)]
pub struct RandomForestModel {
    parameters: ForestParameters,
    fitted: Option<FittedForest>,
}

impl Default for RandomForestModel {
    fn default() -> Self {
        Self::new(ForestParameters::default())
    }
}

impl RandomForestModel {
    pub fn new(parameters: ForestParameters) -> Self {
        Self {
            parameters,
            fitted: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn parameters(&self) -> &ForestParameters {
        &self.parameters
    }

    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.fitted.as_ref().map(|f| &f.metadata)
    }

    fn fitted(&self) -> MlResult<&FittedForest> {
        self.fitted
            .as_ref()
            .ok_or(MlError::NotTrained(ModelType::RandomForest))
    }

    /// Fit on a seeded shuffled split and evaluate on the hold-out part
    pub fn train(&mut self, samples: &[TrainingSample]) -> MlResult<ForestReport> {
        if samples.len() < 2 {
            return Err(MlError::InsufficientData(format!(
                "random forest needs at least 2 samples, got {}",
                samples.len()
            )));
        }

        let params = &self.parameters;
        let (train_idx, test_idx) = train_test_split(samples.len(), params.test_size, params.seed)?;
        let rows = |idx: &[usize]| -> Vec<[f64; FEATURE_COUNT]> {
            idx.iter().map(|&i| samples[i].record.to_features()).collect()
        };
        let targets = |idx: &[usize]| -> Vec<f64> { idx.iter().map(|&i| samples[i].solar_irradiance).collect() };

        let x_train = to_dense(&rows(&train_idx))?;
        let y_train = targets(&train_idx);

        info!(
            train_samples = train_idx.len(),
            test_samples = test_idx.len(),
            n_trees = params.n_trees,
            "training random forest"
        );

        let regressor = Regressor::fit(&x_train, &y_train, params.regressor_parameters())
            .map_err(|e| MlError::Training(format!("RandomForest training failed: {}", e)))?;

        // Evaluate on the hold-out split, or the training split when it is empty
        let (eval_rows, eval_targets) = if test_idx.is_empty() {
            (rows(&train_idx), y_train)
        } else {
            (rows(&test_idx), targets(&test_idx))
        };
        let predictions = predict_rows(&regressor, &eval_rows)?;
        let metrics = calculate_metrics(&predictions, &eval_targets)?;
        let importances = permutation_importance(&regressor, &eval_rows, &eval_targets, metrics.mse(), params.seed)?;

        info!(mse = metrics.mse(), r2 = metrics.r2, "random forest trained");

        let report = ForestReport {
            mse: metrics.mse(),
            r2: metrics.r2,
            metrics,
            train_samples: train_idx.len(),
            test_samples: test_idx.len(),
            feature_importance: importances.clone(),
        };

        self.fitted = Some(FittedForest {
            regressor,
            metadata: ModelMetadata::new(ModelType::RandomForest, train_idx.len(), metrics),
            importances,
            parameters: self.parameters.clone(),
        });

        Ok(report)
    }

    pub fn predict(&self, record: &WeatherRecord) -> MlResult<f64> {
        let fitted = self.fitted()?;
        let predictions = predict_rows(&fitted.regressor, &[record.to_features()])?;
        predictions
            .first()
            .copied()
            .ok_or_else(|| MlError::Training("Model returned empty predictions".to_string()))
    }

    pub fn predict_batch(&self, records: &[WeatherRecord]) -> MlResult<Vec<f64>> {
        let fitted = self.fitted()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<[f64; FEATURE_COUNT]> = records.iter().map(WeatherRecord::to_features).collect();
        predict_rows(&fitted.regressor, &rows)
    }

    /// Predict from named feature values; every name in [`FEATURE_NAMES`]
    /// must be present
    pub fn predict_named(&self, values: &HashMap<String, f64>) -> MlResult<f64> {
        self.fitted()?;
        let record = WeatherRecord::from_named(values)?;
        self.predict(&record)
    }

    /// Permutation importances, sorted descending
    pub fn feature_importance(&self) -> MlResult<&[FeatureImportance]> {
        Ok(&self.fitted()?.importances)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> MlResult<()> {
        let fitted = self.fitted()?;
        let bytes = bincode::serialize(fitted)?;
        write_artifact(path.as_ref(), &bytes)?;
        info!(path = %path.as_ref().display(), bytes = bytes.len(), "random forest saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> MlResult<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let fitted: FittedForest = bincode::deserialize(&bytes)?;
        debug!(path = %path.as_ref().display(), model_id = %fitted.metadata.model_id, "random forest loaded");
        Ok(Self {
            parameters: fitted.parameters.clone(),
            fitted: Some(fitted),
        })
    }
}

fn to_dense(rows: &[[f64; FEATURE_COUNT]]) -> MlResult<DenseMatrix<f64>> {
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    DenseMatrix::new(rows.len(), FEATURE_COUNT, flat, false)
        .map_err(|e| MlError::Training(format!("failed to build feature matrix: {}", e)))
}

fn predict_rows(regressor: &Regressor, rows: &[[f64; FEATURE_COUNT]]) -> MlResult<Vec<f64>> {
    let x = to_dense(rows)?;
    regressor
        .predict(&x)
        .map_err(|e| MlError::Training(format!("Prediction failed: {}", e)))
}

/// MSE increase per shuffled column, clamped at zero and normalized to sum 1
fn permutation_importance(
    regressor: &Regressor,
    rows: &[[f64; FEATURE_COUNT]],
    targets: &[f64],
    baseline_mse: f64,
    seed: u64,
) -> MlResult<Vec<FeatureImportance>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut increases = [0.0; FEATURE_COUNT];

    for (col, increase) in increases.iter_mut().enumerate() {
        let mut column: Vec<f64> = rows.iter().map(|r| r[col]).collect();
        column.shuffle(&mut rng);

        let permuted: Vec<[f64; FEATURE_COUNT]> = rows
            .iter()
            .zip(&column)
            .map(|(row, &v)| {
                let mut row = *row;
                row[col] = v;
                row
            })
            .collect();

        let predictions = predict_rows(regressor, &permuted)?;
        let mse = calculate_metrics(&predictions, targets)?.mse();
        *increase = (mse - baseline_mse).max(0.0);
    }

    let total: f64 = increases.iter().sum();
    let mut importances: Vec<FeatureImportance> = FEATURE_NAMES
        .iter()
        .zip(increases)
        .map(|(name, inc)| FeatureImportance {
            feature: name.to_string(),
            importance: if total > 0.0 { inc / total } else { 1.0 / FEATURE_COUNT as f64 },
        })
        .collect();
    importances.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    Ok(importances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::weather::tests::delhi_noon;
    use crate::domain::FeatureError;
    use crate::simulation::weather::generate_tabular;

    fn small_params() -> ForestParameters {
        ForestParameters {
            n_trees: 20,
            ..Default::default()
        }
    }

    fn trained() -> (RandomForestModel, ForestReport) {
        let mut model = RandomForestModel::new(small_params());
        let report = model.train(&generate_tabular(800, 42)).unwrap();
        (model, report)
    }

    fn named(record: &WeatherRecord) -> HashMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .map(|n| (n.to_string(), record.get(n).unwrap()))
            .collect()
    }

    #[test]
    fn test_default_parameters() {
        let params = ForestParameters::default();
        assert_eq!(params.n_trees, 100);
        assert_eq!(params.max_depth, Some(10));
        assert_eq!(params.seed, 42);

        let rf = params.regressor_parameters();
        assert_eq!(rf.m, Some(FEATURE_COUNT));
        assert!(!rf.keep_samples);
    }

    #[test]
    fn test_untrained_rejects_everything() {
        let model = RandomForestModel::default();
        assert!(!model.is_trained());
        assert!(matches!(model.predict(&delhi_noon()), Err(MlError::NotTrained(ModelType::RandomForest))));
        assert!(matches!(model.predict_batch(&[delhi_noon()]), Err(MlError::NotTrained(_))));
        // the trained check comes before feature validation
        assert!(matches!(model.predict_named(&HashMap::new()), Err(MlError::NotTrained(_))));
        assert!(model.feature_importance().is_err());
        assert!(model.save("unused.bin").is_err());
    }

    #[test]
    fn test_train_report() {
        let (model, report) = trained();

        assert!(model.is_trained());
        assert_eq!(report.train_samples, 640);
        assert_eq!(report.test_samples, 160);
        assert!(report.mse > 0.0);
        assert!(report.r2 > 0.5, "r2 too low: {}", report.r2);

        let meta = model.metadata().unwrap();
        assert_eq!(meta.model_type, ModelType::RandomForest);
        assert_eq!(meta.training_samples, 640);
    }

    #[test]
    fn test_feature_importance_sorted_and_normalized() {
        let (model, report) = trained();
        let importances = model.feature_importance().unwrap();

        assert_eq!(importances.len(), FEATURE_COUNT);
        assert_eq!(importances, report.feature_importance.as_slice());
        let total: f64 = importances.iter().map(|f| f.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(importances.windows(2).all(|w| w[0].importance >= w[1].importance));

        let top: Vec<&str> = importances[..3].iter().map(|f| f.feature.as_str()).collect();
        assert!(top.contains(&"hour"), "hour should rank near the top, got {:?}", top);
    }

    #[test]
    fn test_predictions_are_plausible() {
        let (model, _) = trained();
        let noon = model.predict(&delhi_noon()).unwrap();
        let midnight = model
            .predict(&WeatherRecord { hour: 0.0, ..delhi_noon() })
            .unwrap();

        assert!(noon >= 0.0);
        assert!(noon > midnight);
    }

    #[test]
    fn test_predict_named_matches_predict() {
        let (model, _) = trained();
        let record = delhi_noon();
        assert_eq!(model.predict_named(&named(&record)).unwrap(), model.predict(&record).unwrap());
    }

    #[test]
    fn test_predict_named_missing_features() {
        let (model, _) = trained();
        let mut values = named(&delhi_noon());
        values.remove("uv_index");

        match model.predict_named(&values) {
            Err(MlError::Features(FeatureError::Missing { missing })) => assert_eq!(missing, vec!["uv_index"]),
            other => panic!("expected missing features, got {:?}", other),
        }
    }

    #[test]
    fn test_predict_batch_matches_single() {
        let (model, _) = trained();
        let records = vec![delhi_noon(), WeatherRecord { cloud_cover: 90.0, ..delhi_noon() }];
        let batch = model.predict_batch(&records).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], model.predict(&records[0]).unwrap());
        assert_eq!(batch[1], model.predict(&records[1]).unwrap());
        assert!(model.predict_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let (model, _) = trained();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rf.bin");

        model.save(&path).unwrap();
        let loaded = RandomForestModel::load(&path).unwrap();

        assert!(loaded.is_trained());
        assert_eq!(loaded.parameters(), model.parameters());
        assert_eq!(loaded.metadata(), model.metadata());
        assert_eq!(
            loaded.predict(&delhi_noon()).unwrap().to_bits(),
            model.predict(&delhi_noon()).unwrap().to_bits()
        );
        assert_eq!(loaded.feature_importance().unwrap(), model.feature_importance().unwrap());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(RandomForestModel::load("/nonexistent/rf.bin"), Err(MlError::Io(_))));
    }

    #[test]
    fn test_train_rejects_tiny_dataset() {
        let mut model = RandomForestModel::default();
        let samples = generate_tabular(1, 0);
        assert!(matches!(model.train(&samples), Err(MlError::InsufficientData(_))));
        assert!(!model.is_trained());
    }
}
