//! Solar irradiance prediction service.
//!
//! Trains a random forest and a stacked LSTM on synthetic weather data and
//! serves both behind a small JSON API.

pub mod api;
pub mod config;
pub mod domain;
pub mod ml;
pub mod service;
pub mod simulation;
pub mod telemetry;
