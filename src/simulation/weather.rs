//! # Synthetic Weather Generator
//!
//! Produces labeled weather/irradiance data from closed-form diurnal and
//! seasonal curves plus noise. Two shapes are supported:
//!
//! - **Tabular**: independent observations scattered over India, used by the
//!   random forest.
//! - **Time series**: consecutive hourly observations around Delhi, used by the
//!   LSTM. Irradiance is exactly zero outside the 06:00-18:00 daylight window.
//!
//! All randomness flows from one seeded RNG so datasets are reproducible.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Exp1, StandardNormal};
use std::f64::consts::PI;

use crate::domain::{TrainingSample, WeatherRecord};

/// Delhi, the reference location for time-series and sample data
pub const DELHI_LATITUDE: f64 = 28.6139;
pub const DELHI_LONGITUDE: f64 = 77.2090;

/// First daylight hour (inclusive) for time-series irradiance
pub const DAYLIGHT_START_HOUR: u32 = 6;
/// Last daylight hour (inclusive) for time-series irradiance
pub const DAYLIGHT_END_HOUR: u32 = 18;

/// Peak clear-sky irradiance at solar noon (W/m²)
const PEAK_IRRADIANCE: f64 = 1000.0;

/// India bounding box used for tabular locations
const LATITUDE_RANGE: (f64, f64) = (8.4, 37.6);
const LONGITUDE_RANGE: (f64, f64) = (68.7, 97.25);

/// Seeded generator for synthetic weather datasets
pub struct WeatherGenerator {
    rng: StdRng,
}

impl WeatherGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Non-reproducible generator for ad-hoc samples
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + std_dev * z
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        let e: f64 = self.rng.sample(Exp1);
        mean * e
    }

    /// Independent observations with irradiance from
    /// [`tabular_irradiance`]
    pub fn tabular(&mut self, n_samples: usize) -> Vec<TrainingSample> {
        let mut samples = Vec::with_capacity(n_samples);

        for _ in 0..n_samples {
            let record = WeatherRecord {
                temperature: self.normal(25.0, 10.0),
                humidity: self.rng.gen_range(20.0..90.0),
                pressure: self.normal(1013.0, 20.0),
                wind_speed: self.exponential(3.0),
                cloud_cover: self.rng.gen_range(0.0..100.0),
                uv_index: self.rng.gen_range(0.0..11.0),
                hour: self.rng.gen_range(0..24) as f64,
                day_of_year: self.rng.gen_range(1..366) as f64,
                latitude: self.rng.gen_range(LATITUDE_RANGE.0..LATITUDE_RANGE.1),
                longitude: self.rng.gen_range(LONGITUDE_RANGE.0..LONGITUDE_RANGE.1),
            };
            let noise = self.normal(1.0, 0.1);
            samples.push(TrainingSample::new(record, tabular_irradiance(&record, noise)));
        }

        samples
    }

    /// Hourly observations for `n_days` starting 2023-01-01 00:00
    pub fn time_series(&mut self, n_days: usize) -> Vec<TrainingSample> {
        self.time_series_from(series_start(), n_days)
    }

    pub fn time_series_from(&mut self, start: NaiveDateTime, n_days: usize) -> Vec<TrainingSample> {
        let hours = n_days * 24;
        let mut samples = Vec::with_capacity(hours);

        for offset in 0..hours {
            let timestamp = start + Duration::hours(offset as i64);
            let hour = timestamp.hour();
            let day_of_year = timestamp.ordinal() as f64;
            let h = hour as f64;

            let season = (2.0 * PI * day_of_year / 365.0).sin();
            let base_temp = 25.0 + 10.0 * season;
            let temperature = base_temp + 5.0 * (2.0 * PI * h / 24.0).sin() + self.normal(0.0, 2.0);
            let humidity = (50.0 + 30.0 * season + self.normal(0.0, 10.0)).clamp(20.0, 90.0);
            let pressure = 1013.0 + self.normal(0.0, 10.0);
            let wind_speed = self.normal(3.0, 2.0).abs();
            let cloud_cover = (30.0 + 40.0 * season + self.normal(0.0, 20.0)).clamp(0.0, 100.0);
            let uv_index = (8.0 * (PI * h / 24.0).sin() + self.normal(0.0, 1.0)).max(0.0);
            let latitude = DELHI_LATITUDE + self.normal(0.0, 0.1);
            let longitude = DELHI_LONGITUDE + self.normal(0.0, 0.1);

            let irradiance = if is_daylight(hour) {
                let noise = self.normal(0.0, 50.0);
                time_series_irradiance(hour, day_of_year, cloud_cover, noise)
            } else {
                0.0
            };

            let record = WeatherRecord {
                temperature,
                humidity,
                pressure,
                wind_speed,
                cloud_cover,
                uv_index,
                hour: h,
                day_of_year,
                latitude,
                longitude,
            };
            samples.push(TrainingSample::new(record, irradiance).at(timestamp));
        }

        samples
    }

    /// One plausible Delhi observation at the given local time
    pub fn sample_record(&mut self, at: NaiveDateTime) -> WeatherRecord {
        let temperature = 28.5 + self.normal(0.0, 2.0);
        let humidity = (65.0 + self.normal(0.0, 10.0)).clamp(0.0, 100.0);
        let pressure = 1015.0 + self.normal(0.0, 5.0);
        let wind_speed = (2.5 + self.exponential(1.0)).max(0.0);
        let cloud_cover = (20.0 + self.rng.gen_range(-10.0_f64..30.0)).clamp(0.0, 100.0);
        let uv_index = (8.0 + self.rng.gen_range(-2.0_f64..2.0)).clamp(0.0, 11.0);

        WeatherRecord {
            temperature,
            humidity,
            pressure,
            wind_speed,
            cloud_cover,
            uv_index,
            hour: at.hour() as f64,
            day_of_year: at.ordinal() as f64,
            latitude: DELHI_LATITUDE,
            longitude: DELHI_LONGITUDE,
        }
    }
}

pub fn generate_tabular(n_samples: usize, seed: u64) -> Vec<TrainingSample> {
    WeatherGenerator::new(seed).tabular(n_samples)
}

pub fn generate_time_series(n_days: usize, seed: u64) -> Vec<TrainingSample> {
    WeatherGenerator::new(seed).time_series(n_days)
}

pub fn is_daylight(hour: u32) -> bool {
    (DAYLIGHT_START_HOUR..=DAYLIGHT_END_HOUR).contains(&hour)
}

fn series_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("2023-01-01T00:00 is a valid timestamp")
}

/// Tabular irradiance model.
///
/// Diurnal sine (clipped at zero) scaled by cloud transmission, a temperature
/// penalty around the 25 °C optimum, and a seasonal factor, times a
/// multiplicative `noise` term. Never negative.
pub fn tabular_irradiance(record: &WeatherRecord, noise: f64) -> f64 {
    let base = (PEAK_IRRADIANCE * (PI * record.hour / 24.0).sin()).max(0.0);
    let cloud_reduction = (100.0 - record.cloud_cover) / 100.0;
    let temp_factor = 1.0 - (record.temperature - 25.0).abs() / 100.0;
    let seasonal_factor = 0.8 + 0.4 * (2.0 * PI * record.day_of_year / 365.0).sin();

    (base * cloud_reduction * temp_factor * seasonal_factor * noise).max(0.0)
}

/// Daylight irradiance for the time-series model with additive `noise`.
/// Callers must zero night hours themselves.
pub fn time_series_irradiance(hour: u32, day_of_year: f64, cloud_cover: f64, noise: f64) -> f64 {
    let base = PEAK_IRRADIANCE * (PI * (hour as f64 - DAYLIGHT_START_HOUR as f64) / 12.0).sin();
    let cloud_reduction = (100.0 - cloud_cover) / 100.0;
    let seasonal_factor = 0.7 + 0.6 * (2.0 * PI * day_of_year / 365.0).sin();

    (base * cloud_reduction * seasonal_factor + noise).max(0.0)
}
