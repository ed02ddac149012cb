//! Stage traits and the closed set of fitted stages
//!
//! An [`Estimator`] learns from a [`DataView`] and produces a [`FittedStage`].
//! A fitted stage is a [`Transformer`]: it maps a view to a new view and can
//! report the schema it would produce without seeing any rows.
//!
//! Fitted stages are a closed enum so a trained model can be written to disk
//! as a list of [`StageRecord`]s and read back without any registry.

use serde::{Deserialize, Serialize};

use crate::pipeline::transforms::graph::{GraphScorer, GraphScorerRecord};
use crate::pipeline::transforms::image::{ExtractPixels, LoadImages, ResizeImages};
use crate::pipeline::transforms::key::{KeyMapping, KeyToValue};
use crate::pipeline::view::{DataView, Schema};
use crate::training::image_classification::{ImageClassifier, ImageClassifierRecord};
use crate::training::maxent::LinearClassifier;
use crate::training::metrics::MetricsObserver;
use crate::utils::error::Result;

/// What a stage does with a sample it cannot decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Fail with a data error naming the sample
    #[default]
    Abort,
    /// Drop the sample and log a warning
    Skip,
}

/// Shared state handed to every estimator during a fit
pub struct FitContext<'a> {
    /// Seed for any randomness inside a stage
    pub seed: u64,
    /// Receives training progress
    pub observer: &'a mut dyn MetricsObserver,
}

impl<'a> FitContext<'a> {
    pub fn new(seed: u64, observer: &'a mut dyn MetricsObserver) -> Self {
        Self { seed, observer }
    }
}

/// A stage that maps one view to another
pub trait Transformer {
    fn name(&self) -> &'static str;

    /// Schema produced for `input`, without touching rows
    fn output_schema(&self, input: &Schema) -> Result<Schema>;

    fn transform(&self, data: DataView) -> Result<DataView>;
}

/// A stage that learns from data
pub trait Estimator {
    fn name(&self) -> &'static str;

    /// One-line description for pipeline listings
    fn describe(&self) -> String;

    /// Whether fitting looks at rows; schema-only stages get an empty view
    fn needs_rows(&self) -> bool {
        true
    }

    fn fit(&self, data: &DataView, ctx: &mut FitContext<'_>) -> Result<FittedStage>;
}

/// Every kind of stage a trained model can contain
#[derive(Debug, Clone)]
pub enum FittedStage {
    LoadImages(LoadImages),
    ResizeImages(ResizeImages),
    ExtractPixels(ExtractPixels),
    ScoreGraph(GraphScorer),
    MapValueToKey(KeyMapping),
    LinearClassifier(LinearClassifier),
    ImageClassifier(ImageClassifier),
    MapKeyToValue(KeyToValue),
}

impl FittedStage {
    fn inner(&self) -> &dyn Transformer {
        match self {
            FittedStage::LoadImages(stage) => stage,
            FittedStage::ResizeImages(stage) => stage,
            FittedStage::ExtractPixels(stage) => stage,
            FittedStage::ScoreGraph(stage) => stage,
            FittedStage::MapValueToKey(stage) => stage,
            FittedStage::LinearClassifier(stage) => stage,
            FittedStage::ImageClassifier(stage) => stage,
            FittedStage::MapKeyToValue(stage) => stage,
        }
    }

    /// Serializable form of this stage
    pub fn to_record(&self) -> Result<StageRecord> {
        Ok(match self {
            FittedStage::LoadImages(stage) => StageRecord::LoadImages(stage.clone()),
            FittedStage::ResizeImages(stage) => StageRecord::ResizeImages(stage.clone()),
            FittedStage::ExtractPixels(stage) => StageRecord::ExtractPixels(stage.clone()),
            FittedStage::ScoreGraph(stage) => StageRecord::ScoreGraph(stage.to_record()?),
            FittedStage::MapValueToKey(stage) => StageRecord::MapValueToKey(stage.clone()),
            FittedStage::LinearClassifier(stage) => StageRecord::LinearClassifier(stage.clone()),
            FittedStage::ImageClassifier(stage) => StageRecord::ImageClassifier(stage.to_record()?),
            FittedStage::MapKeyToValue(stage) => StageRecord::MapKeyToValue(stage.clone()),
        })
    }

    /// Rebuild a stage from its serialized form
    pub fn from_record(record: StageRecord) -> Result<Self> {
        Ok(match record {
            StageRecord::LoadImages(stage) => FittedStage::LoadImages(stage),
            StageRecord::ResizeImages(stage) => FittedStage::ResizeImages(stage),
            StageRecord::ExtractPixels(stage) => FittedStage::ExtractPixels(stage),
            StageRecord::ScoreGraph(record) => FittedStage::ScoreGraph(GraphScorer::from_record(record)?),
            StageRecord::MapValueToKey(stage) => FittedStage::MapValueToKey(stage),
            StageRecord::LinearClassifier(stage) => FittedStage::LinearClassifier(stage),
            StageRecord::ImageClassifier(record) => {
                FittedStage::ImageClassifier(ImageClassifier::from_record(record)?)
            }
            StageRecord::MapKeyToValue(stage) => FittedStage::MapKeyToValue(stage),
        })
    }
}

impl Transformer for FittedStage {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        self.inner().output_schema(input)
    }

    fn transform(&self, data: DataView) -> Result<DataView> {
        self.inner().transform(data)
    }
}

/// On-disk form of a fitted stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageRecord {
    LoadImages(LoadImages),
    ResizeImages(ResizeImages),
    ExtractPixels(ExtractPixels),
    ScoreGraph(GraphScorerRecord),
    MapValueToKey(KeyMapping),
    LinearClassifier(LinearClassifier),
    ImageClassifier(ImageClassifierRecord),
    MapKeyToValue(KeyToValue),
}
