//! Trained model artifact
//!
//! A [`TrainedModel`] is the frozen result of fitting a pipeline: its stages,
//! the schema it expects, the schema it produces and the names of the columns
//! that callers read. On disk it is a single JSON [`ModelBundle`]. Only ordered
//! containers are serialized, so two identical fits produce identical bytes.

use serde::{Deserialize, Serialize};

use crate::dataset::PayloadKind;
use crate::pipeline::stage::{FittedStage, StageRecord, Transformer};
use crate::pipeline::view::{ColumnType, DataView, Schema};
use crate::utils::error::{ClassifierError, Result};

/// Format tag written into every bundle
pub const MODEL_FORMAT: &str = "image-classifier/model";

/// Bundle layout version
pub const MODEL_VERSION: u32 = 1;

/// Names of the columns a caller needs to feed and read a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelColumns {
    pub identifier: String,
    pub label: String,
    /// Column holding the image path or bytes
    pub payload: String,
    pub payload_kind: PayloadKind,
    /// Text column with the predicted label
    pub predicted_label: String,
    /// Vector column with one probability per class
    pub score: String,
}

/// Immutable fitted pipeline plus its schemas
#[derive(Debug, Clone)]
pub struct TrainedModel {
    stages: Vec<FittedStage>,
    input_schema: Schema,
    output_schema: Schema,
    columns: ModelColumns,
}

impl TrainedModel {
    /// Assemble a model, checking that the named columns exist
    pub fn new(
        stages: Vec<FittedStage>,
        input_schema: Schema,
        output_schema: Schema,
        columns: ModelColumns,
    ) -> Result<Self> {
        input_schema.require(&columns.identifier)?;
        input_schema.require(&columns.label)?;
        input_schema.require(&columns.payload)?;

        match &output_schema.require(&columns.predicted_label)?.ty {
            ColumnType::Text => {}
            other => {
                return Err(ClassifierError::Model(format!(
                    "predicted label column '{}' must be text, found {}",
                    columns.predicted_label,
                    other.describe()
                )))
            }
        }
        match &output_schema.require(&columns.score)?.ty {
            ColumnType::Vector { .. } => {}
            other => {
                return Err(ClassifierError::Model(format!(
                    "score column '{}' must be a vector, found {}",
                    columns.score,
                    other.describe()
                )))
            }
        }

        Ok(Self {
            stages,
            input_schema,
            output_schema,
            columns,
        })
    }

    pub fn stages(&self) -> &[FittedStage] {
        &self.stages
    }

    pub fn input_schema(&self) -> &Schema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    pub fn columns(&self) -> &ModelColumns {
        &self.columns
    }

    /// Number of classes (length of the score vector)
    pub fn num_classes(&self) -> usize {
        match self.output_schema.get(&self.columns.score).map(|c| &c.ty) {
            Some(ColumnType::Vector { dims }) => *dims,
            _ => 0,
        }
    }

    /// Apply every stage in order
    pub fn transform(&self, data: DataView) -> Result<DataView> {
        self.stages
            .iter()
            .try_fold(data, |data, stage| stage.transform(data))
    }

    /// Stage names, in order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn to_bundle(&self) -> Result<ModelBundle> {
        Ok(ModelBundle {
            format: MODEL_FORMAT.to_string(),
            version: MODEL_VERSION,
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            columns: self.columns.clone(),
            stages: self
                .stages
                .iter()
                .map(FittedStage::to_record)
                .collect::<Result<_>>()?,
        })
    }

    pub fn from_bundle(bundle: ModelBundle) -> Result<Self> {
        if bundle.format != MODEL_FORMAT || bundle.version != MODEL_VERSION {
            return Err(ClassifierError::Serialization(format!(
                "unsupported model bundle '{}' v{} (expected '{}' v{})",
                bundle.format, bundle.version, MODEL_FORMAT, MODEL_VERSION
            )));
        }

        let stages = bundle
            .stages
            .into_iter()
            .map(FittedStage::from_record)
            .collect::<Result<Vec<_>>>()?;
        Self::new(stages, bundle.input_schema, bundle.output_schema, bundle.columns)
    }

    /// Serialize to the JSON bundle format
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.to_bundle()?)?)
    }

    /// Parse a JSON bundle
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let bundle: ModelBundle = serde_json::from_slice(bytes)?;
        Self::from_bundle(bundle)
    }
}

/// On-disk model layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format: String,
    pub version: u32,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub columns: ModelColumns,
    pub stages: Vec<StageRecord>,
}
