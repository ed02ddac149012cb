//! Inference module for model prediction
//!
//! This module provides:
//! - Single-sample prediction against a trained model
//! - Batch classification of a folder with decode-failure handling
//! - The per-image output line

pub mod predictor;
pub mod runner;

// Re-export main types for convenience
pub use predictor::{Prediction, PredictionEngine};
pub use runner::{classify_all, format_prediction, BatchOutput};
