//! Pretrained-graph strategy
//!
//! Images are decoded, resized and flattened to pixel vectors, pushed through
//! the frozen graph, and the chosen layer is used as the feature vector for a
//! maximum entropy classifier. The graph is loaded when the pipeline is built,
//! before any image is read.

use tracing::info;

use crate::config::{BackendKind, PretrainedGraphConfig};
use crate::dataset::{LabeledDataset, PayloadKind};
use crate::model::{ModelColumns, TrainedModel};
use crate::pipeline::transforms::{
    ExtractPixels, GraphInput, LoadImages, MapKeyToValue, MapValueToKey, ResizeImages, ScoreGraph,
};
use crate::pipeline::{
    payload_column, sample_view, FitContext, Pipeline, ID_COLUMN, LABEL_COLUMN, PREDICTED_LABEL_COLUMN,
    SCORE_COLUMN,
};
use crate::strategy::{ClassifierBackend, LABEL_KEY_COLUMN};
use crate::training::MaximumEntropy;
use crate::utils::error::Result;

/// Decoded (then resized in place) image column
const INPUT_COLUMN: &str = "Input";
/// Flattened pixel vectors
const PIXELS_COLUMN: &str = "Pixels";
/// Graph embedding fed to the classifier
const FEATURES_COLUMN: &str = "Features";
/// Text form of the predicted key
const PREDICTED_VALUE_COLUMN: &str = "PredictedLabelValue";

/// Frozen graph features + maximum entropy classifier
#[derive(Debug, Clone)]
pub struct PretrainedGraphExtractor {
    config: PretrainedGraphConfig,
}

impl PretrainedGraphExtractor {
    pub fn new(config: PretrainedGraphConfig) -> Self {
        Self { config }
    }
}

impl ClassifierBackend for PretrainedGraphExtractor {
    fn kind(&self) -> BackendKind {
        BackendKind::PretrainedGraph
    }

    fn pipeline(&self, payload: PayloadKind) -> Result<Pipeline> {
        let config = &self.config;
        let size = config.image_size;
        let scorer = ScoreGraph::load(
            &config.graph_file,
            config.graph.clone(),
            PIXELS_COLUMN,
            FEATURES_COLUMN,
            config.layer.clone(),
            GraphInput {
                width: size,
                height: size,
                interleave: config.interleave,
            },
        )?;

        Ok(Pipeline::new()
            .append(LoadImages::new(payload_column(payload), INPUT_COLUMN).with_decode_policy(config.on_decode_error))
            .append(ResizeImages::new(INPUT_COLUMN, INPUT_COLUMN, size, size))
            .append(
                ExtractPixels::new(INPUT_COLUMN, PIXELS_COLUMN)
                    .with_interleave(config.interleave)
                    .with_offset(config.offset)
                    .with_scale(config.scale),
            )
            .append(scorer)
            .append(MapValueToKey::new(LABEL_COLUMN, LABEL_KEY_COLUMN).with_ordinality(config.key_ordinality))
            .append(MaximumEntropy::new(FEATURES_COLUMN, LABEL_KEY_COLUMN).with_options(config.maxent))
            .append(MapKeyToValue::new(PREDICTED_LABEL_COLUMN, PREDICTED_VALUE_COLUMN)))
    }

    fn fit(&self, dataset: &LabeledDataset, ctx: &mut FitContext<'_>) -> Result<TrainedModel> {
        let kind = dataset.payload_kind();
        let pipeline = self.pipeline(kind)?;
        info!(
            "Fitting pretrained-graph pipeline on {} images ({} stages)",
            dataset.len(),
            pipeline.len()
        );

        let data = sample_view(dataset.samples(), kind)?;
        pipeline.fit(data, ctx)?.into_model(ModelColumns {
            identifier: ID_COLUMN.to_string(),
            label: LABEL_COLUMN.to_string(),
            payload: payload_column(kind).to_string(),
            payload_kind: kind,
            predicted_label: PREDICTED_VALUE_COLUMN.to_string(),
            score: SCORE_COLUMN.to_string(),
        })
    }
}
