//! # its-core
//!
//! Core types for interrupted time-series analysis.
//!
//! This crate provides:
//! - The error taxonomy shared by every stage
//! - Analysis configuration (cutoff dates, fitting options)
//! - The observation table with numeric coercion and series selection
//! - The `LogDensityModel` trait the fitter is written against
//!
//! It performs no I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod pattern;
pub mod traits;
pub mod types;

pub use config::{AnalysisConfig, Cutoffs, ModelConfig};
pub use error::{ConvergenceDiagnostics, Error, Result};
pub use pattern::NamePattern;
pub use traits::LogDensityModel;
pub use types::{DataQualityReport, Observation, ObservationTable, coerce_numeric};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
