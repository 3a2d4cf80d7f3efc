//! Metrics collection and export for autodelete.
//!
//! This crate provides a unified metrics interface using the `metrics` crate facade.
//! When the `prometheus` feature is enabled, metrics are exported in Prometheus format.
//!
//! # Usage
//!
//! ```rust,ignore
//! use autodelete_metrics::{counter, reaper};
//!
//! counter!(reaper::MESSAGES_DELETED_TOTAL).increment(12);
//! ```
//!
//! # Features
//!
//! - `prometheus`: install a Prometheus recorder and render the text format

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
