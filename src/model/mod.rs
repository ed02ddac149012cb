//! Model module
//!
//! This module contains:
//! - The frozen convolutional feature graph and its presets
//! - The trained model artifact and its on-disk bundle

pub mod architecture;
pub mod graph;
pub mod trained;

pub use architecture::Architecture;
pub use graph::{ConvGraph, ConvGraphConfig, POOLED_LAYER, PRE_ACTIVATION_LAYER};
pub use trained::{ModelBundle, ModelColumns, TrainedModel};

/// ImageNet channel means, applied before the end-to-end backbone
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
