//! # Weather Simulation Module
//!
//! Synthetic, labeled weather data for training and demos. Nothing here
//! touches the network or disk.
//!
//! ## Usage
//!
//! ```rust
//! use solar_irradiance::simulation::WeatherGenerator;
//!
//! let mut generator = WeatherGenerator::new(42);
//! let tabular = generator.tabular(1_000);
//! let hourly = generator.time_series(30);
//!
//! assert_eq!(tabular.len(), 1_000);
//! assert_eq!(hourly.len(), 30 * 24);
//! ```

pub mod weather;

pub use weather::{generate_tabular, generate_time_series, WeatherGenerator};
