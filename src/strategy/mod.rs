//! Model-construction strategies
//!
//! Two interchangeable ways to turn a labeled dataset into a [`TrainedModel`]:
//! - [`PretrainedGraphExtractor`]: frozen graph embedding + maximum entropy classifier
//! - [`EndToEndTrainer`]: backbone bottlenecks + trained softmax head, with a
//!   held-out validation split
//!
//! Both are selected through [`FeatureBackend`], built from a [`BackendConfig`].

pub mod end_to_end;
pub mod pretrained;

use crate::config::{BackendConfig, BackendKind};
use crate::dataset::{LabeledDataset, PayloadKind};
use crate::model::TrainedModel;
use crate::pipeline::{FitContext, Pipeline};
use crate::utils::error::Result;

pub use end_to_end::EndToEndTrainer;
pub use pretrained::PretrainedGraphExtractor;

/// Key column holding the encoded training label
pub const LABEL_KEY_COLUMN: &str = "LabelKey";

/// Something that can fit a classifier on a labeled dataset
pub trait ClassifierBackend {
    fn kind(&self) -> BackendKind;

    /// The estimators this strategy fits, for inspection
    fn pipeline(&self, payload: PayloadKind) -> Result<Pipeline>;

    fn fit(&self, dataset: &LabeledDataset, ctx: &mut FitContext<'_>) -> Result<TrainedModel>;
}

/// The closed set of strategies
#[derive(Debug, Clone)]
pub enum FeatureBackend {
    PretrainedGraph(PretrainedGraphExtractor),
    EndToEnd(EndToEndTrainer),
}

impl FeatureBackend {
    pub fn from_config(config: &BackendConfig) -> Self {
        match config {
            BackendConfig::PretrainedGraph(config) => {
                FeatureBackend::PretrainedGraph(PretrainedGraphExtractor::new(config.clone()))
            }
            BackendConfig::EndToEnd(config) => FeatureBackend::EndToEnd(EndToEndTrainer::new(config.clone())),
        }
    }

    fn inner(&self) -> &dyn ClassifierBackend {
        match self {
            FeatureBackend::PretrainedGraph(backend) => backend,
            FeatureBackend::EndToEnd(backend) => backend,
        }
    }
}

impl ClassifierBackend for FeatureBackend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn pipeline(&self, payload: PayloadKind) -> Result<Pipeline> {
        self.inner().pipeline(payload)
    }

    fn fit(&self, dataset: &LabeledDataset, ctx: &mut FitContext<'_>) -> Result<TrainedModel> {
        self.inner().fit(dataset, ctx)
    }
}
