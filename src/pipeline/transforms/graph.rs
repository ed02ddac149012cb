//! Frozen-graph scoring stage
//!
//! `ScoreGraph` pushes pixel vectors through a pretrained [`ConvGraph`] and
//! stores one of its layers as a fixed-length feature vector. The graph is
//! loaded when the stage is built, so a missing graph file is reported
//! before any image is read.

use std::path::Path;

use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{default_device, DefaultBackend, Device};
use crate::model::graph::{ConvGraph, ConvGraphConfig};
use crate::pipeline::stage::{Estimator, FitContext, FittedStage, Transformer};
use crate::pipeline::view::{ColumnType, DataView, Schema, Value};
use crate::utils::error::{ClassifierError, Result};

/// Rows scored per forward pass
pub const DEFAULT_SCORING_BATCH: usize = 16;

/// Pixel layout expected by the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphInput {
    pub width: u32,
    pub height: u32,
    /// Channels-last pixel vectors when true
    pub interleave: bool,
}

impl GraphInput {
    pub fn dims(&self) -> usize {
        (self.width * self.height * 3) as usize
    }
}

/// Estimator wrapper; fitting only checks the schema
#[derive(Debug, Clone)]
pub struct ScoreGraph {
    scorer: GraphScorer,
}

impl ScoreGraph {
    /// Load the graph file and prepare a scoring stage
    pub fn load(
        path: &Path,
        config: ConvGraphConfig,
        input: impl Into<String>,
        output: impl Into<String>,
        layer: impl Into<String>,
        pixels: GraphInput,
    ) -> Result<Self> {
        let layer = layer.into();
        config.layer_dims(&layer)?;

        info!("Loading feature graph from {:?}", path);
        let device = default_device();
        let graph = ConvGraph::load_graph(&config, path, &device)?;

        Ok(Self {
            scorer: GraphScorer {
                graph,
                config,
                input: input.into(),
                output: output.into(),
                layer,
                pixels,
                batch_size: DEFAULT_SCORING_BATCH,
                device,
            },
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.scorer.batch_size = batch_size.max(1);
        self
    }
}

impl Estimator for ScoreGraph {
    fn name(&self) -> &'static str {
        "ScoreGraph"
    }

    fn describe(&self) -> String {
        format!(
            "ScoreGraph({} -> {}, layer={}, input={}x{})",
            self.scorer.input,
            self.scorer.output,
            self.scorer.layer,
            self.scorer.pixels.width,
            self.scorer.pixels.height
        )
    }

    fn needs_rows(&self) -> bool {
        false
    }

    fn fit(&self, data: &DataView, _ctx: &mut FitContext<'_>) -> Result<FittedStage> {
        self.scorer.output_schema(data.schema())?;
        Ok(FittedStage::ScoreGraph(self.scorer.clone()))
    }
}

/// Fitted scoring stage holding the frozen graph
#[derive(Debug, Clone)]
pub struct GraphScorer {
    graph: ConvGraph<DefaultBackend>,
    config: ConvGraphConfig,
    input: String,
    output: String,
    layer: String,
    pixels: GraphInput,
    batch_size: usize,
    device: Device,
}

impl GraphScorer {
    fn score_batch(&self, batch: &[&[f32]]) -> Result<Vec<Vec<f32>>> {
        let GraphInput {
            width,
            height,
            interleave,
        } = self.pixels;
        let (w, h) = (width as usize, height as usize);
        let n = batch.len();

        let flat: Vec<f32> = batch.iter().flat_map(|v| v.iter().copied()).collect();
        let x = if interleave {
            // [N, H, W, C] -> [N, C, H, W]
            Tensor::<DefaultBackend, 4>::from_data(TensorData::new(flat, [n, h, w, 3]), &self.device)
                .swap_dims(1, 3)
                .swap_dims(2, 3)
        } else {
            Tensor::<DefaultBackend, 4>::from_data(TensorData::new(flat, [n, 3, h, w]), &self.device)
        };

        let features = self.graph.forward_layer(x, &self.layer)?;
        let [_, dims] = features.dims();
        let values = features
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Model(format!("graph output: {:?}", e)))?;

        Ok(values.chunks(dims).map(<[f32]>::to_vec).collect())
    }

    pub fn to_record(&self) -> Result<GraphScorerRecord> {
        Ok(GraphScorerRecord {
            input: self.input.clone(),
            output: self.output.clone(),
            layer: self.layer.clone(),
            pixels: self.pixels,
            batch_size: self.batch_size,
            config: self.config.clone(),
            weights: self.graph.encode_weights()?,
        })
    }

    pub fn from_record(record: GraphScorerRecord) -> Result<Self> {
        let device = default_device();
        let graph = ConvGraph::decode_weights(&record.config, &record.weights, &device)?;
        Ok(Self {
            graph,
            config: record.config,
            input: record.input,
            output: record.output,
            layer: record.layer,
            pixels: record.pixels,
            batch_size: record.batch_size.max(1),
            device,
        })
    }
}

impl Transformer for GraphScorer {
    fn name(&self) -> &'static str {
        "ScoreGraph"
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        match input.require(&self.input)?.ty {
            ColumnType::Vector { dims } if dims == self.pixels.dims() => Ok(input.clone().with(
                self.output.clone(),
                ColumnType::Vector {
                    dims: self.config.layer_dims(&self.layer)?,
                },
            )),
            ref other => Err(ClassifierError::Config(format!(
                "ScoreGraph expects '{}' to be vector[{}], found {}",
                self.input,
                self.pixels.dims(),
                other.describe()
            ))),
        }
    }

    fn transform(&self, mut data: DataView) -> Result<DataView> {
        let out_schema = self.output_schema(data.schema())?;
        let out_type = out_schema
            .require(&self.output)
            .map(|c| c.ty.clone())?;

        let column = data.column(&self.input)?;
        let mut scored: Vec<Value> = vec![Value::Missing; column.len()];
        let present: Vec<(usize, &[f32])> = column
            .iter()
            .enumerate()
            .filter_map(|(row, v)| v.as_vector().map(|p| (row, p)))
            .collect();

        for chunk in present.chunks(self.batch_size) {
            let batch: Vec<&[f32]> = chunk.iter().map(|(_, p)| *p).collect();
            for ((row, _), features) in chunk.iter().zip(self.score_batch(&batch)?) {
                scored[*row] = Value::Vector(features);
            }
        }
        debug!("ScoreGraph: scored {} rows", present.len());

        data.set_column(&self.output, out_type, scored)?;
        Ok(data)
    }
}

/// On-disk form of [`GraphScorer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphScorerRecord {
    pub input: String,
    pub output: String,
    pub layer: String,
    pub pixels: GraphInput,
    pub batch_size: usize,
    pub config: ConvGraphConfig,
    /// Base64 of the full-precision burn record
    pub weights: String,
}
