//! Training module
//!
//! This module contains:
//! - The two trainable pipeline stages (maximum entropy and end-to-end image classification)
//! - Linear softmax heads shared by both
//! - Bottleneck computation and caching
//! - Structured training events and observers
//! - The `Trainer` that validates a dataset and fits the selected strategy

pub mod bottleneck;
pub mod head;
pub mod image_classification;
pub mod maxent;
pub mod metrics;
pub mod trainer;

// Re-export main types for convenience
pub use image_classification::{
    EarlyStopping, ImageClassification, ImageClassificationOptions, ImageClassifier,
};
pub use maxent::{LinearClassifier, MaxEntOptions, MaximumEntropy};
pub use metrics::{EpochMetrics, EventLog, MetricsObserver, NullObserver, Phase, TrainingEvent};
pub use trainer::Trainer;
