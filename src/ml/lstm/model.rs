use ndarray::{s, Array1, ArrayView1, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::network::{Adam, Network};
use super::{LstmParameters, TrainOptions};
use crate::domain::{TrainingSample, WeatherRecord, FEATURE_COUNT};
use crate::ml::scaler::{MinMaxScaler, SequenceScalers};
use crate::ml::sequence::{build_windows, records_to_matrix, to_matrix};
use crate::ml::training::{calculate_metrics, holdout_tail};
use crate::ml::{write_artifacts, MlError, MlResult, ModelMetadata, ModelType, ValidationMetrics};

/// Minimum loss improvement that resets the learning-rate plateau counter
const LR_MIN_DELTA: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub mae: f64,
    pub val_loss: Option<f64>,
    pub val_mae: Option<f64>,
    pub learning_rate: f64,
}

/// Outcome of a training run. Losses are MSE in scaled target units.
#[derive(Debug, Clone, Serialize)]
pub struct LstmReport {
    /// Best monitored loss; validation loss unless no windows were held out
    pub val_loss: f64,
    /// Lowest monitored MAE of any epoch, tracked apart from `val_loss`
    pub val_mae: f64,
    /// False when training loss was monitored instead of validation loss
    pub validated: bool,
    pub best_epoch: usize,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub final_learning_rate: f64,
    pub train_windows: usize,
    pub validation_windows: usize,
    /// Metrics of the restored best network in W/m²
    pub metrics: ValidationMetrics,
    pub history: Vec<EpochMetrics>,
}

#[derive(Serialize)]
struct LstmArtifactRef<'a> {
    parameters: &'a LstmParameters,
    network: &'a Network,
    metadata: &'a ModelMetadata,
}

#[derive(Deserialize)]
struct LstmArtifact {
    parameters: LstmParameters,
    network: Network,
    metadata: ModelMetadata,
}

#[derive(Debug)]
struct FittedLstm {
    network: Network,
    scalers: SequenceScalers,
    metadata: ModelMetadata,
}

/// Stops training after `patience` epochs without improvement
#[derive(Debug)]
struct EarlyStopping {
    patience: usize,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Returns `(improved, stop)`
    fn update(&mut self, monitor: f64) -> (bool, bool) {
        if monitor < self.best {
            self.best = monitor;
            self.wait = 0;
            (true, false)
        } else {
            self.wait += 1;
            (false, self.wait >= self.patience)
        }
    }
}

/// Multiplies the learning rate by `factor` after `patience` epochs without
/// an improvement of at least [`LR_MIN_DELTA`], never going below `min_lr`
#[derive(Debug)]
struct ReduceOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best: f64,
    wait: usize,
}

impl ReduceOnPlateau {
    fn new(params: &LstmParameters) -> Self {
        Self {
            factor: params.lr_decay_factor,
            patience: params.lr_patience,
            min_lr: params.min_learning_rate,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    fn update(&mut self, monitor: f64, lr: f64) -> f64 {
        if monitor < self.best - LR_MIN_DELTA {
            self.best = monitor;
            self.wait = 0;
            return lr;
        }

        self.wait += 1;
        if self.wait < self.patience {
            return lr;
        }
        self.wait = 0;
        if lr > self.min_lr {
            (lr * self.factor).max(self.min_lr)
        } else {
            lr
        }
    }
}

/// LSTM irradiance regressor; untrained until [`train`](Self::train) or
/// [`load`](Self::load) succeeds
#[derive(Debug)]
pub struct LstmModel {
    parameters: LstmParameters,
    fitted: Option<FittedLstm>,
}

impl Default for LstmModel {
    fn default() -> Self {
        Self::new(LstmParameters::default())
    }
}

impl LstmModel {
    pub fn new(parameters: LstmParameters) -> Self {
        Self {
            parameters,
            fitted: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn parameters(&self) -> &LstmParameters {
        &self.parameters
    }

    pub fn sequence_length(&self) -> usize {
        self.parameters.sequence_length
    }

    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.fitted.as_ref().map(|f| &f.metadata)
    }

    pub fn scalers(&self) -> Option<&SequenceScalers> {
        self.fitted.as_ref().map(|f| &f.scalers)
    }

    fn fitted(&self) -> MlResult<&FittedLstm> {
        self.fitted.as_ref().ok_or(MlError::NotTrained(ModelType::Lstm))
    }

    /// Fit scalers and network on an hourly series
    pub fn train(&mut self, samples: &[TrainingSample], options: &TrainOptions) -> MlResult<LstmReport> {
        let params = self.parameters.clone();
        check_setup(&params, options)?;

        let len = params.sequence_length;
        if samples.len() <= len {
            return Err(MlError::InsufficientData(format!(
                "need more than {} samples to build one {}-step window, got {}",
                len,
                len,
                samples.len()
            )));
        }

        let (features, targets) = to_matrix(samples);
        let scalers = SequenceScalers {
            features: MinMaxScaler::fit(features.view())?,
            target: MinMaxScaler::fit_column(&targets)?,
        };
        let scaled = scalers.features.transform(features.view())?;
        let scaled_targets: Vec<f64> = targets.iter().map(|&t| scalers.target.scale(0, t)).collect();
        let (windows, labels) = build_windows(scaled.view(), &scaled_targets, len);

        let boundary = holdout_tail(labels.len(), options.validation_split);
        if boundary == 0 {
            return Err(MlError::InsufficientData(format!(
                "no training windows left after holding out {} of {}",
                options.validation_split,
                labels.len()
            )));
        }
        let x_train = windows.slice(s![..boundary, .., ..]);
        let y_train = labels.slice(s![..boundary]);
        let x_val = windows.slice(s![boundary.., .., ..]);
        let y_val = labels.slice(s![boundary..]);
        let validated = !y_val.is_empty();

        info!(
            train_windows = boundary,
            validation_windows = y_val.len(),
            sequence_length = len,
            epochs = options.epochs,
            "training lstm"
        );

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut network = Network::new(
            FEATURE_COUNT,
            &params.hidden_units,
            params.dense_units,
            params.dropout,
            &mut rng,
        );
        let mut adam = Adam::new(&network);
        let mut lr = params.learning_rate;
        let mut early_stopping = EarlyStopping::new(params.early_stopping_patience);
        let mut plateau = ReduceOnPlateau::new(&params);

        let mut order: Vec<usize> = (0..boundary).collect();
        let mut history = Vec::with_capacity(options.epochs);
        let mut best_network = network.clone();
        let mut best_epoch = 0;
        let mut best_loss = f64::INFINITY;
        let mut min_mae = f64::INFINITY;
        let mut stopped_early = false;

        for epoch in 1..=options.epochs {
            order.shuffle(&mut rng);

            let (mut loss_sum, mut mae_sum) = (0.0, 0.0);
            for batch in order.chunks(options.batch_size) {
                let xb = x_train.select(Axis(0), batch);
                let yb = y_train.select(Axis(0), batch);
                let step = network.gradients(xb.view(), yb.view(), Some(&mut rng));
                adam.step(&mut network, &step.grads, lr);

                loss_sum += step.loss * batch.len() as f64;
                mae_sum += step.mae * batch.len() as f64;
            }
            let loss = loss_sum / boundary as f64;
            let mae = mae_sum / boundary as f64;

            let (val_loss, val_mae) = if validated {
                let (l, m) = evaluate(&network, x_val, y_val);
                (Some(l), Some(m))
            } else {
                (None, None)
            };
            history.push(EpochMetrics {
                epoch,
                loss,
                mae,
                val_loss,
                val_mae,
                learning_rate: lr,
            });
            debug!(epoch, loss, mae, ?val_loss, ?val_mae, learning_rate = lr, "epoch complete");

            let monitored = val_loss.unwrap_or(loss);
            min_mae = min_mae.min(val_mae.unwrap_or(mae));

            let (improved, stop) = early_stopping.update(monitored);
            if improved {
                best_loss = monitored;
                best_epoch = epoch;
                best_network = network.clone();
            }

            let next_lr = plateau.update(monitored, lr);
            if next_lr < lr {
                info!(epoch, from = lr, to = next_lr, "reducing learning rate");
                lr = next_lr;
            }

            if stop {
                info!(epoch, best_epoch, "early stopping");
                stopped_early = true;
                break;
            }
        }

        let network = best_network;

        // Report metrics in W/m² on the held-out part, or the training part
        let (x_eval, y_eval) = if validated { (x_val, y_val) } else { (x_train, y_train) };
        let predictions: Vec<f64> = network
            .predict(x_eval)
            .iter()
            .map(|&p| scalers.target.inverse(0, p).max(0.0))
            .collect();
        let actual: Vec<f64> = y_eval.iter().map(|&t| scalers.target.inverse(0, t)).collect();
        let metrics = calculate_metrics(&predictions, &actual)?;

        info!(
            best_epoch,
            val_loss = best_loss,
            val_mae = min_mae,
            rmse = metrics.rmse,
            "lstm trained"
        );

        let report = LstmReport {
            val_loss: best_loss,
            val_mae: min_mae,
            validated,
            best_epoch,
            epochs_run: history.len(),
            stopped_early,
            final_learning_rate: lr,
            train_windows: boundary,
            validation_windows: y_val.len(),
            metrics,
            history,
        };

        self.fitted = Some(FittedLstm {
            network,
            scalers,
            metadata: ModelMetadata::new(ModelType::Lstm, boundary, metrics),
        });

        Ok(report)
    }

    /// Irradiance for the hour following `window` (W/m², never negative)
    pub fn predict_sequence(&self, window: &[WeatherRecord]) -> MlResult<f64> {
        let fitted = self.fitted()?;
        let expected = self.parameters.sequence_length;
        if window.len() != expected {
            return Err(MlError::SequenceLength {
                expected,
                actual: window.len(),
            });
        }

        let scaled = fitted.scalers.features.transform(records_to_matrix(window).view())?;
        let x = scaled.insert_axis(Axis(0));
        let prediction = fitted
            .network
            .predict(x.view())
            .get(0)
            .copied()
            .ok_or_else(|| MlError::Training("network returned no prediction".to_string()))?;

        Ok(fitted.scalers.target.inverse(0, prediction).max(0.0))
    }

    /// Iterative forecast: after each step the window shifts left and the
    /// last record is repeated, so weather features are held constant
    pub fn predict_multi_step(&self, window: &[WeatherRecord], steps: usize) -> MlResult<Vec<f64>> {
        self.fitted()?;
        let expected = self.parameters.sequence_length;
        if window.len() != expected {
            return Err(MlError::SequenceLength {
                expected,
                actual: window.len(),
            });
        }
        if steps == 0 {
            return Err(MlError::InvalidSteps("steps must be at least 1".to_string()));
        }

        let mut window = window.to_vec();
        let mut predictions = Vec::with_capacity(steps);
        for _ in 0..steps {
            predictions.push(self.predict_sequence(&window)?);
            if let Some(&last) = window.last() {
                window.remove(0);
                window.push(last);
            }
        }
        Ok(predictions)
    }

    /// Write the network (bincode) and scalers (JSON)
    pub fn save(&self, network_path: impl AsRef<Path>, scaler_path: impl AsRef<Path>) -> MlResult<()> {
        let fitted = self.fitted()?;
        let artifact = LstmArtifactRef {
            parameters: &self.parameters,
            network: &fitted.network,
            metadata: &fitted.metadata,
        };
        let bytes = bincode::serialize(&artifact)?;
        let scalers = serde_json::to_vec_pretty(&fitted.scalers)?;
        write_artifacts(&[
            (network_path.as_ref(), bytes.as_slice()),
            (scaler_path.as_ref(), scalers.as_slice()),
        ])?;

        info!(
            network = %network_path.as_ref().display(),
            scalers = %scaler_path.as_ref().display(),
            bytes = bytes.len(),
            "lstm saved"
        );
        Ok(())
    }

    pub fn load(network_path: impl AsRef<Path>, scaler_path: impl AsRef<Path>) -> MlResult<Self> {
        let artifact: LstmArtifact = bincode::deserialize(&std::fs::read(network_path.as_ref())?)?;
        let scalers: SequenceScalers = serde_json::from_slice(&std::fs::read(scaler_path.as_ref())?)?;

        if scalers.features.n_features() != FEATURE_COUNT || scalers.target.n_features() != 1 {
            return Err(MlError::Serialization(format!(
                "scaler shape mismatch: {} feature columns, {} target columns",
                scalers.features.n_features(),
                scalers.target.n_features()
            )));
        }

        debug!(model_id = %artifact.metadata.model_id, "lstm loaded");
        Ok(Self {
            parameters: artifact.parameters,
            fitted: Some(FittedLstm {
                network: artifact.network,
                scalers,
                metadata: artifact.metadata,
            }),
        })
    }
}

fn check_setup(params: &LstmParameters, options: &TrainOptions) -> MlResult<()> {
    let problem = if params.sequence_length == 0 {
        Some("sequence_length must be at least 1".to_string())
    } else if params.hidden_units.is_empty() || params.hidden_units.contains(&0) {
        Some(format!("hidden_units must be non-empty and positive, got {:?}", params.hidden_units))
    } else if params.dense_units == 0 {
        Some("dense_units must be at least 1".to_string())
    } else if !(0.0..1.0).contains(&params.dropout) {
        Some(format!("dropout must be in [0, 1), got {}", params.dropout))
    } else if params.learning_rate <= 0.0 {
        Some(format!("learning_rate must be positive, got {}", params.learning_rate))
    } else if options.epochs == 0 || options.batch_size == 0 {
        Some("epochs and batch_size must be at least 1".to_string())
    } else if !(0.0..1.0).contains(&options.validation_split) {
        Some(format!("validation_split must be in [0, 1), got {}", options.validation_split))
    } else {
        None
    };

    match problem {
        Some(msg) => Err(MlError::Training(msg)),
        None => Ok(()),
    }
}

/// MSE and MAE in scaled units
fn evaluate(network: &Network, x: ArrayView3<f64>, y: ArrayView1<f64>) -> (f64, f64) {
    let diff: Array1<f64> = &network.predict(x) - &y;
    let n = diff.len().max(1) as f64;
    (diff.mapv(|d| d * d).sum() / n, diff.mapv(f64::abs).sum() / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::weather::tests::delhi_noon;
    use crate::simulation::weather::generate_time_series;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::sync::OnceLock;

    fn tiny_params() -> LstmParameters {
        LstmParameters {
            sequence_length: 6,
            hidden_units: vec![6, 4],
            dense_units: 4,
            ..Default::default()
        }
    }

    fn options(epochs: usize) -> TrainOptions {
        TrainOptions {
            epochs,
            batch_size: 16,
            validation_split: 0.2,
        }
    }

    fn trained() -> (LstmModel, LstmReport) {
        let mut model = LstmModel::new(tiny_params());
        let report = model.train(&generate_time_series(8, 42), &options(3)).unwrap();
        (model, report)
    }

    /// A model with the default 24-step window, trained once for the suite
    fn default_window_model() -> &'static LstmModel {
        static MODEL: OnceLock<LstmModel> = OnceLock::new();
        MODEL.get_or_init(|| {
            let mut model = LstmModel::new(LstmParameters {
                hidden_units: vec![4],
                dense_units: 4,
                ..Default::default()
            });
            model.train(&generate_time_series(3, 1), &options(1)).unwrap();
            model
        })
    }

    fn window(len: usize) -> Vec<WeatherRecord> {
        (0..len)
            .map(|h| WeatherRecord {
                hour: (h % 24) as f64,
                ..delhi_noon()
            })
            .collect()
    }

    #[test]
    fn test_untrained_rejects_everything() {
        let model = LstmModel::new(tiny_params());
        assert!(!model.is_trained());
        assert!(matches!(model.predict_sequence(&window(6)), Err(MlError::NotTrained(ModelType::Lstm))));
        // trained check comes first, even for a malformed window
        assert!(matches!(model.predict_sequence(&window(2)), Err(MlError::NotTrained(_))));
        assert!(matches!(model.predict_multi_step(&window(6), 3), Err(MlError::NotTrained(_))));
        assert!(model.save("a.bin", "a.json").is_err());
    }

    #[test]
    fn test_train_report() {
        let (model, report) = trained();

        // 8 days -> 192 rows -> 186 windows, trailing 20% held out
        assert_eq!(report.train_windows, 148);
        assert_eq!(report.validation_windows, 38);
        assert!(report.validated);
        assert!(report.epochs_run <= 3);
        assert_eq!(report.history.len(), report.epochs_run);
        assert!(report.val_loss.is_finite() && report.val_loss >= 0.0);
        assert!(report.best_epoch >= 1);
        assert_eq!(report.history[0].learning_rate, 0.001);
        assert!(report.history.iter().all(|e| e.val_loss.is_some()));

        let lowest_mae = report
            .history
            .iter()
            .filter_map(|e| e.val_mae)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(report.val_mae, lowest_mae);

        let scalers = model.scalers().unwrap();
        assert_eq!(scalers.features.n_features(), FEATURE_COUNT);
        assert_eq!(scalers.target.data_min, vec![0.0]);

        let meta = model.metadata().unwrap();
        assert_eq!(meta.model_type, ModelType::Lstm);
        assert_eq!(meta.training_samples, 148);
    }

    #[test]
    fn test_no_validation_split_monitors_training_loss() {
        let mut model = LstmModel::new(tiny_params());
        let opts = TrainOptions {
            validation_split: 0.0,
            ..options(2)
        };
        let report = model.train(&generate_time_series(4, 42), &opts).unwrap();

        assert!(!report.validated);
        assert_eq!(report.validation_windows, 0);
        assert!(report.history.iter().all(|e| e.val_loss.is_none()));
        let best = &report.history[report.best_epoch - 1];
        assert_eq!(report.val_loss, best.loss);
    }

    #[rstest]
    #[case(0)]
    #[case(6)]
    fn test_insufficient_data(#[case] n_hours: usize) {
        let samples: Vec<TrainingSample> = generate_time_series(1, 42).into_iter().take(n_hours).collect();
        let mut model = LstmModel::new(tiny_params());
        assert!(matches!(model.train(&samples, &options(1)), Err(MlError::InsufficientData(_))));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_invalid_setup_rejected() {
        let mut model = LstmModel::new(LstmParameters {
            hidden_units: vec![],
            ..tiny_params()
        });
        assert!(matches!(model.train(&generate_time_series(2, 1), &options(1)), Err(MlError::Training(_))));

        let mut model = LstmModel::new(tiny_params());
        let opts = TrainOptions {
            validation_split: 1.0,
            ..options(1)
        };
        assert!(model.train(&generate_time_series(2, 1), &opts).is_err());
    }

    #[rstest]
    #[case(5)]
    #[case(7)]
    #[case(0)]
    fn test_wrong_window_length(#[case] len: usize) {
        let (model, _) = trained();
        match model.predict_sequence(&window(len)) {
            Err(MlError::SequenceLength { expected, actual }) => {
                assert_eq!(expected, 6);
                assert_eq!(actual, len);
            }
            other => panic!("expected a length error, got {:?}", other),
        }
        assert!(matches!(
            model.predict_multi_step(&window(len), 2),
            Err(MlError::SequenceLength { .. })
        ));
    }

    #[test]
    fn test_multi_step_forecast() {
        let (model, _) = trained();
        let w = window(6);

        let forecast = model.predict_multi_step(&w, 5).unwrap();
        assert_eq!(forecast.len(), 5);
        assert!(forecast.iter().all(|&p| p >= 0.0 && p.is_finite()));
        assert_eq!(forecast[0], model.predict_sequence(&w).unwrap());

        assert!(matches!(model.predict_multi_step(&w, 0), Err(MlError::InvalidSteps(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let (model, _) = trained();
        let dir = tempfile::tempdir().unwrap();
        let net_path = dir.path().join("lstm.bin");
        let scaler_path = dir.path().join("scalers.json");

        model.save(&net_path, &scaler_path).unwrap();
        let scaler_json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&scaler_path).unwrap()).unwrap();
        assert!(scaler_json["features"]["data_min"].is_array());

        let loaded = LstmModel::load(&net_path, &scaler_path).unwrap();
        assert_eq!(loaded.parameters(), model.parameters());
        assert_eq!(loaded.metadata(), model.metadata());
        assert_eq!(loaded.scalers(), model.scalers());

        let w = window(6);
        assert_eq!(
            loaded.predict_sequence(&w).unwrap().to_bits(),
            model.predict_sequence(&w).unwrap().to_bits()
        );
    }

    #[test]
    fn test_load_requires_both_files() {
        let (model, _) = trained();
        let dir = tempfile::tempdir().unwrap();
        let net_path = dir.path().join("lstm.bin");
        let scaler_path = dir.path().join("scalers.json");
        model.save(&net_path, &scaler_path).unwrap();

        std::fs::remove_file(&scaler_path).unwrap();
        assert!(matches!(LstmModel::load(&net_path, &scaler_path), Err(MlError::Io(_))));
    }

    #[test]
    fn test_early_stopping_counts_non_improving_epochs() {
        let mut es = EarlyStopping::new(2);
        assert_eq!(es.update(1.0), (true, false));
        assert_eq!(es.update(0.5), (true, false));
        assert_eq!(es.update(0.5), (false, false));
        assert_eq!(es.update(0.7), (false, true));

        let mut eager = EarlyStopping::new(0);
        assert_eq!(eager.update(1.0), (true, false));
        assert_eq!(eager.update(1.0), (false, true));
    }

    #[test]
    fn test_plateau_decay_respects_floor() {
        let params = LstmParameters {
            learning_rate: 0.001,
            lr_decay_factor: 0.2,
            lr_patience: 2,
            min_learning_rate: 1e-4,
            ..Default::default()
        };
        let mut plateau = ReduceOnPlateau::new(&params);
        let mut lr = 0.001;

        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 0.001);
        // improvement smaller than the minimum delta counts as a plateau
        lr = plateau.update(0.99995, lr);
        assert_eq!(lr, 0.001);
        lr = plateau.update(0.99995, lr);
        assert!((lr - 0.0002).abs() < 1e-12);

        lr = plateau.update(1.0, lr);
        lr = plateau.update(1.0, lr);
        assert!((lr - 1e-4).abs() < 1e-12);

        lr = plateau.update(1.0, lr);
        lr = plateau.update(1.0, lr);
        assert!((lr - 1e-4).abs() < 1e-12);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_window_length_must_match(len in 0usize..60) {
            prop_assume!(len != 24);
            let result = default_window_model().predict_sequence(&window(len));
            let is_length_error = matches!(
                result,
                Err(MlError::SequenceLength { expected: 24, actual }) if actual == len
            );
            prop_assert!(is_length_error);
        }
    }

    #[test]
    fn test_default_window_accepts_24_steps() {
        let p = default_window_model().predict_sequence(&window(24)).unwrap();
        assert!(p >= 0.0);
    }
}
