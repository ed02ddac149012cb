//! Frozen convolutional feature graph
//!
//! `ConvGraph` is the feature extractor shared by both classifier strategies:
//! - the pretrained-graph strategy reads a named layer (`pre_activation` by
//!   default) as a fixed-length embedding
//! - the end-to-end strategy uses the `pooled` layer as its bottleneck
//!
//! The graph never trains inside this crate. Its weights come from a burn
//! record on disk, or from a seeded initialization when none is given.

use std::path::Path;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use burn::{
    config::Config,
    module::{Module, ParamId},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::{BinBytesRecorder, CompactRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::utils::error::{self, ClassifierError};

/// Globally pooled convolutional features
pub const POOLED_LAYER: &str = "pooled";

/// Linear projection of the pooled features (logit space of the original head)
pub const PRE_ACTIVATION_LAYER: &str = "pre_activation";

/// Serializes seed + init so concurrent callers cannot interleave draws
static SEEDED_INIT: Mutex<()> = Mutex::new(());

/// Configuration for the convolutional feature graph
#[derive(Config, Debug)]
pub struct ConvGraphConfig {
    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the first block; doubled by every following block
    #[config(default = "16")]
    pub base_filters: usize,

    /// Number of conv + pool blocks
    #[config(default = "4")]
    pub depth: usize,

    /// Width of the `pre_activation` layer
    #[config(default = "128")]
    pub embedding_size: usize,
}

impl ConvGraphConfig {
    /// Build a graph with freshly initialized weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvGraph<B> {
        let depth = self.depth.max(1);
        let mut blocks = Vec::with_capacity(depth);
        let mut channels = self.in_channels;
        for i in 0..depth {
            let out = self.base_filters << i;
            blocks.push(ConvBlock::new(channels, out, device));
            channels = out;
        }

        ConvGraph {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            projection: LinearConfig::new(channels, self.embedding_size).init(device),
        }
        .with_ordered_ids()
    }

    /// Build a graph whose weights depend only on `seed`.
    ///
    /// Parameters are initialized lazily, so the graph is run once on a zero
    /// input while the backend RNG is still held.
    pub fn init_seeded<B: Backend>(&self, seed: u64, device: &B::Device) -> ConvGraph<B> {
        let _guard = SEEDED_INIT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        B::seed(seed);
        let graph = self.init(device);
        let side = self.min_input_size() as usize;
        let _ = graph.forward(Tensor::zeros([1, self.in_channels, side, side], device));
        graph
    }

    /// Width of the named layer
    pub fn layer_dims(&self, layer: &str) -> error::Result<usize> {
        match layer {
            POOLED_LAYER => Ok(self.base_filters << (self.depth.max(1) - 1)),
            PRE_ACTIVATION_LAYER => Ok(self.embedding_size),
            other => Err(ClassifierError::Config(format!(
                "graph has no layer '{}' (expected '{}' or '{}')",
                other, POOLED_LAYER, PRE_ACTIVATION_LAYER
            ))),
        }
    }

    /// Smallest input side that survives every pooling step
    pub fn min_input_size(&self) -> u32 {
        1u32 << self.depth.max(1)
    }
}

/// Conv 3x3 + ReLU + 2x2 max pooling
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Convolutional feature graph
///
/// Input: `[batch, channels, height, width]`, output layers are 2D `[batch, dims]`.
#[derive(Module, Debug)]
pub struct ConvGraph<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub projection: Linear<B>,
}

impl<B: Backend> ConvGraph<B> {
    /// Number the parameters in declaration order.
    ///
    /// Recorded weights carry parameter ids; fresh ids are random, which
    /// would make two identical graphs encode to different bytes.
    fn with_ordered_ids(mut self) -> Self {
        let mut next = 0u64;
        let mut id = || {
            next += 1;
            ParamId::from(next)
        };

        for block in self.blocks.iter_mut() {
            block.conv.weight.id = id();
            if let Some(bias) = block.conv.bias.as_mut() {
                bias.id = id();
            }
        }
        self.projection.weight.id = id();
        if let Some(bias) = self.projection.bias.as_mut() {
            bias.id = id();
        }
        self
    }

    /// Pooled features: `[batch, base_filters * 2^(depth-1)]`
    pub fn pooled(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    /// Pre-activation embedding: `[batch, embedding_size]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.projection.forward(self.pooled(x))
    }

    /// Forward pass read out at a named layer
    pub fn forward_layer(&self, x: Tensor<B, 4>, layer: &str) -> error::Result<Tensor<B, 2>> {
        match layer {
            POOLED_LAYER => Ok(self.pooled(x)),
            PRE_ACTIVATION_LAYER => Ok(self.forward(x)),
            other => Err(ClassifierError::Config(format!(
                "graph has no layer '{}'",
                other
            ))),
        }
    }

    /// Load weights written by [`ConvGraph::save_graph`]
    pub fn load_graph(config: &ConvGraphConfig, path: &Path, device: &B::Device) -> error::Result<Self> {
        // the recorder always reads and writes `.mpk`
        if !path.with_extension("mpk").exists() {
            return Err(ClassifierError::PathNotFound(path.to_path_buf()));
        }
        let recorder = CompactRecorder::new();
        config
            .init(device)
            .load_file(path, &recorder, device)
            .map_err(|e| ClassifierError::Model(format!("failed to load graph {:?}: {:?}", path, e)))
    }

    /// Save weights with the compact (half precision) recorder
    pub fn save_graph(&self, path: &Path) -> error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let recorder = CompactRecorder::new();
        self.clone()
            .save_file(path, &recorder)
            .map_err(|e| ClassifierError::Model(format!("failed to save graph {:?}: {:?}", path, e)))
    }

    /// Full-precision weights as base64, for embedding in a model bundle
    pub fn encode_weights(&self) -> error::Result<String> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = Recorder::<B>::record(&recorder, self.clone().into_record(), ())
            .map_err(|e| ClassifierError::Serialization(format!("graph weights: {:?}", e)))?;
        Ok(BASE64.encode(bytes))
    }

    /// Inverse of [`ConvGraph::encode_weights`]
    pub fn decode_weights(config: &ConvGraphConfig, encoded: &str, device: &B::Device) -> error::Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ClassifierError::Serialization(format!("graph weights: {}", e)))?;
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, bytes, device)
            .map_err(|e| ClassifierError::Serialization(format!("graph weights: {:?}", e)))?;
        Ok(config.init(device).load_record(record))
    }
}
