//! # Image Classifier
//!
//! Folder-driven image classification built on the Burn framework: train a
//! classifier from `<root>/<label>/<image>` folders, cache the trained model,
//! and classify a flat folder of new images.
//!
//! ## Strategies
//!
//! - **Pretrained graph**: a frozen convolutional graph turns every image into
//!   an embedding; a maximum entropy classifier is trained on top
//! - **End-to-end**: bottlenecks from a frozen backbone are cached and a
//!   softmax head is trained with a validation split and early stopping
//!
//! ## Modules
//!
//! - `dataset`: Sample enumeration, labeled datasets and seeded splits
//! - `pipeline`: Columnar views, estimators, fitted stages and pipelines
//! - `model`: The convolutional graph and the trained model bundle
//! - `training`: Trainable stages, heads, bottleneck caching and the `Trainer`
//! - `strategy`: The two model-construction strategies
//! - `cache`: On-disk model cache
//! - `inference`: Prediction and batch classification
//! - `config`: Application settings
//! - `utils`: Logging, errors, and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use image_classifier::{
//!     AppConfig, ClassFolderSource, LabeledDataset, ModelCache, NullObserver, PayloadMode, SampleSource, Trainer,
//! };
//!
//! let config = AppConfig::default();
//! let samples = ClassFolderSource::new(config.assets.training_dir(), PayloadMode::Lazy).samples()?;
//! let dataset = LabeledDataset::new(samples)?;
//!
//! let trainer = Trainer::new(config.backend_for_run(), config.seed);
//! let model = ModelCache::new(config.model_path())
//!     .get_or_train(config.use_cache, || trainer.fit(&dataset, &mut NullObserver))?
//!     .into_model();
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod strategy;
pub mod training;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used items for convenience
pub use cache::{CacheOutcome, ModelCache};
pub use config::{AppConfig, BackendConfig, BackendKind};
pub use dataset::{
    ClassFolderSource, DatasetSplitter, FlatFolderSource, LabeledDataset, Payload, PayloadMode, Sample,
    SampleSource, Split,
};
pub use inference::{Prediction, PredictionEngine};
pub use model::{Architecture, TrainedModel};
pub use pipeline::{DataView, Pipeline};
pub use strategy::{ClassifierBackend, FeatureBackend};
pub use training::{MetricsObserver, NullObserver, Trainer, TrainingEvent};
pub use utils::error::{ClassifierError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
