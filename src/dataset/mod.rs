//! Dataset module for image folder handling
//!
//! This module provides functionality for:
//! - Enumerating labeled class folders and flat test folders
//! - Validating a labeled dataset before training
//! - Seeded train/validation splitting

pub mod sample;
pub mod source;
pub mod split;

// Re-export main types for convenience
pub use sample::{LabeledDataset, Payload, PayloadKind, Sample};
pub use source::{ClassFolderSource, FlatFolderSource, PayloadMode, SampleSource};
pub use split::{DatasetSplitter, Split};

/// Default fraction of samples held out for validation
pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.3;
