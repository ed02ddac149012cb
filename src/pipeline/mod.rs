//! Training pipeline abstraction
//!
//! A [`Pipeline`] is an ordered list of estimators. Fitting walks the list:
//! each stage is fit on the output of the previously fitted stages, then used
//! to transform that output for the next stage. Two shortcuts keep this cheap:
//! - stages that fit from the schema alone receive a schema-only view
//! - once no later stage needs rows, data is no longer transformed and only
//!   the schema is propagated (the last stage is never applied during a fit)
//!
//! The result is a [`FittedPipeline`], which can be concatenated with another
//! fitted pipeline and turned into a [`TrainedModel`].

pub mod stage;
pub mod transforms;
pub mod view;

use std::time::Instant;

use tracing::{debug, info};

use crate::dataset::{Payload, PayloadKind, Sample};
use crate::model::trained::{ModelColumns, TrainedModel};
use crate::utils::error::{ClassifierError, Result};

pub use stage::{DecodePolicy, Estimator, FitContext, FittedStage, StageRecord, Transformer};
pub use view::{Column, ColumnType, DataView, Schema, Value};

/// Sample identifier column
pub const ID_COLUMN: &str = "Id";
/// Text label column
pub const LABEL_COLUMN: &str = "Label";
/// Raw image bytes column
pub const IMAGE_BYTES_COLUMN: &str = "Image";
/// Image path column
pub const IMAGE_PATH_COLUMN: &str = "ImagePath";
/// Class probabilities written by the classifier stages
pub const SCORE_COLUMN: &str = "Score";
/// Predicted key written by the classifier stages
pub const PREDICTED_LABEL_COLUMN: &str = "PredictedLabel";

/// Column holding the payload for a given payload kind
pub fn payload_column(kind: PayloadKind) -> &'static str {
    match kind {
        PayloadKind::Path => IMAGE_PATH_COLUMN,
        PayloadKind::Bytes => IMAGE_BYTES_COLUMN,
    }
}

/// Schema of the view built from samples: identifier, label, payload
pub fn input_schema(kind: PayloadKind) -> Schema {
    let payload = match kind {
        PayloadKind::Path => ColumnType::Path,
        PayloadKind::Bytes => ColumnType::Bytes,
    };
    Schema::new()
        .with(ID_COLUMN, ColumnType::Text)
        .with(LABEL_COLUMN, ColumnType::Text)
        .with(payload_column(kind), payload)
}

/// Build the input view for a set of samples.
///
/// Path payloads are read into memory when `kind` is `Bytes`; a file that
/// cannot be read is a data error of that sample. A bytes payload cannot stand
/// in for a path.
pub fn sample_view<'a>(samples: impl IntoIterator<Item = &'a Sample>, kind: PayloadKind) -> Result<DataView> {
    let mut view = DataView::new(input_schema(kind));
    for sample in samples {
        let payload = match (&sample.payload, kind) {
            (Payload::Path(path), PayloadKind::Path) => Value::Path(path.clone()),
            (Payload::Bytes(bytes), PayloadKind::Bytes) => Value::Bytes(bytes.clone()),
            (Payload::Path(_), PayloadKind::Bytes) => Value::Bytes(
                sample
                    .payload
                    .clone()
                    .into_bytes()
                    .map_err(|e| ClassifierError::data(&sample.identifier, e))?,
            ),
            (Payload::Bytes(_), PayloadKind::Path) => {
                return Err(ClassifierError::data(
                    &sample.identifier,
                    "model reads image paths but the sample only has bytes",
                ))
            }
        };
        let label = match &sample.label {
            Some(label) => Value::Text(label.clone()),
            None => Value::Missing,
        };
        view.push_row(vec![Value::Text(sample.identifier.clone()), label, payload])?;
    }
    Ok(view)
}

/// Ordered list of estimators
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Estimator>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append
    pub fn append(mut self, stage: impl Estimator + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn Estimator>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Box<dyn Estimator>] {
        &self.stages
    }

    /// One line per stage, in order
    pub fn describe(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.describe()).collect()
    }

    /// Fit every stage in order
    pub fn fit(&self, data: DataView, ctx: &mut FitContext<'_>) -> Result<FittedPipeline> {
        if self.stages.is_empty() {
            return Err(ClassifierError::Config("cannot fit an empty pipeline".to_string()));
        }

        let input_schema = data.schema().clone();
        let mut current = data;
        let mut fitted = Vec::with_capacity(self.stages.len());

        for (i, estimator) in self.stages.iter().enumerate() {
            let start = Instant::now();
            let stage = if estimator.needs_rows() {
                estimator.fit(&current, ctx)?
            } else {
                estimator.fit(&DataView::schema_only(current.schema().clone()), ctx)?
            };

            let rows_needed = self.stages[i + 1..].iter().any(|s| s.needs_rows());
            current = if rows_needed {
                stage.transform(current)?
            } else {
                DataView::schema_only(stage.output_schema(current.schema())?)
            };

            debug!(
                "Fitted stage {} ({}) in {:.2}s",
                i + 1,
                estimator.name(),
                start.elapsed().as_secs_f64()
            );
            fitted.push(stage);
        }

        info!("Pipeline fitted ({} stages)", fitted.len());
        Ok(FittedPipeline {
            stages: fitted,
            input_schema,
            output_schema: current.schema().clone(),
        })
    }
}

/// Ordered list of fitted stages with their input and output schemas
#[derive(Debug, Clone)]
pub struct FittedPipeline {
    pub stages: Vec<FittedStage>,
    pub input_schema: Schema,
    pub output_schema: Schema,
}

impl FittedPipeline {
    /// Apply every stage in order
    pub fn transform(&self, data: DataView) -> Result<DataView> {
        self.stages
            .iter()
            .try_fold(data, |data, stage| stage.transform(data))
    }

    /// Concatenate: `next` runs on this pipeline's output
    pub fn then(mut self, next: FittedPipeline) -> Result<FittedPipeline> {
        if !self.output_schema.contains_all(&next.input_schema) {
            return Err(ClassifierError::Config(format!(
                "pipelines do not connect: [{}] does not provide [{}]",
                self.output_schema.names().join(", "),
                next.input_schema.names().join(", ")
            )));
        }

        self.stages.extend(next.stages);
        self.output_schema = next.output_schema;
        Ok(self)
    }

    /// Freeze into a trained model
    pub fn into_model(self, columns: ModelColumns) -> Result<TrainedModel> {
        TrainedModel::new(self.stages, self.input_schema, self.output_schema, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transforms::{MapKeyToValue, MapValueToKey};
    use crate::training::metrics::NullObserver;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Estimator that records how many rows it saw
    struct RowCounter {
        rows_seen: Rc<Cell<Option<usize>>>,
        needs_rows: bool,
    }

    impl Estimator for RowCounter {
        fn name(&self) -> &'static str {
            "RowCounter"
        }

        fn describe(&self) -> String {
            "RowCounter".to_string()
        }

        fn needs_rows(&self) -> bool {
            self.needs_rows
        }

        fn fit(&self, data: &DataView, ctx: &mut FitContext<'_>) -> Result<FittedStage> {
            self.rows_seen.set(Some(data.num_rows()));
            MapKeyToValue::new("LabelKey", "LabelValue").fit(data, ctx)
        }
    }

    fn labels() -> DataView {
        let mut view = DataView::new(Schema::new().with(LABEL_COLUMN, ColumnType::Text));
        for label in ["trout", "carp", "carp"] {
            view.push_row(vec![Value::Text(label.into())]).unwrap();
        }
        view
    }

    #[test]
    fn test_fit_feeds_outputs_forward() {
        let seen = Rc::new(Cell::new(None));
        let pipeline = Pipeline::new()
            .append(MapValueToKey::new(LABEL_COLUMN, "LabelKey"))
            .append(RowCounter {
                rows_seen: seen.clone(),
                needs_rows: true,
            });

        let mut observer = NullObserver;
        let fitted = pipeline
            .fit(labels(), &mut FitContext::new(0, &mut observer))
            .unwrap();

        assert_eq!(seen.get(), Some(3));
        assert_eq!(fitted.stages.len(), 2);
        assert_eq!(fitted.output_schema.names(), vec!["Label", "LabelKey", "LabelValue"]);

        let out = fitted.transform(labels()).unwrap();
        assert_eq!(out.rows()[0][2], Value::Text("trout".into()));
    }

    #[test]
    fn test_schema_only_stage_sees_no_rows() {
        let seen = Rc::new(Cell::new(None));
        let pipeline = Pipeline::new()
            .append(MapValueToKey::new(LABEL_COLUMN, "LabelKey"))
            .append(RowCounter {
                rows_seen: seen.clone(),
                needs_rows: false,
            });

        let mut observer = NullObserver;
        pipeline
            .fit(labels(), &mut FitContext::new(0, &mut observer))
            .unwrap();
        assert_eq!(seen.get(), Some(0));
    }

    #[test]
    fn test_then_checks_schemas() {
        let mut observer = NullObserver;
        let first = Pipeline::new()
            .append(MapValueToKey::new(LABEL_COLUMN, "LabelKey"))
            .fit(labels(), &mut FitContext::new(0, &mut observer))
            .unwrap();
        let second = Pipeline::new()
            .append(MapKeyToValue::new("LabelKey", "LabelValue"))
            .fit(
                DataView::schema_only(first.output_schema.clone()),
                &mut FitContext::new(0, &mut observer),
            )
            .unwrap();

        let joined = first.clone().then(second).unwrap();
        assert_eq!(joined.stages.len(), 2);
        assert_eq!(joined.input_schema.names(), vec!["Label"]);

        let orphan = FittedPipeline {
            stages: Vec::new(),
            input_schema: Schema::new().with("Features", ColumnType::Vector { dims: 4 }),
            output_schema: Schema::new(),
        };
        assert!(matches!(first.then(orphan), Err(ClassifierError::Config(_))));
    }

    #[test]
    fn test_sample_view_reads_paths_as_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        crate::test_support::write_png(&path, [1, 2, 3], 4);

        let samples = vec![
            Sample::labeled("a.png", "carp", Payload::Path(path.clone())),
            Sample::unlabeled("b.png", Payload::Path(path)),
        ];
        let view = sample_view(&samples, PayloadKind::Bytes).unwrap();
        assert_eq!(view.schema().names(), vec!["Id", "Label", "Image"]);
        assert!(matches!(view.rows()[0][2], Value::Bytes(_)));
        assert!(view.rows()[1][1].is_missing());

        let bytes = vec![Sample::unlabeled("c.png", Payload::Bytes(vec![1]))];
        assert!(matches!(
            sample_view(&bytes, PayloadKind::Path),
            Err(ClassifierError::Data { .. })
        ));
    }

    #[test]
    fn test_sample_view_vanished_file_is_a_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = vec![Sample::unlabeled("gone.png", Payload::Path(dir.path().join("gone.png")))];

        match sample_view(&gone, PayloadKind::Bytes) {
            Err(ClassifierError::Data { identifier, .. }) => assert_eq!(identifier, "gone.png"),
            other => panic!("expected a data error, got {:?}", other.map(|v| v.num_rows())),
        }
    }

    #[test]
    fn test_describe_and_empty_fit() {
        let pipeline = Pipeline::new()
            .append(MapValueToKey::new(LABEL_COLUMN, "LabelKey"))
            .append(MapKeyToValue::new("LabelKey", "LabelValue"));
        assert_eq!(
            pipeline.describe(),
            vec![
                "MapValueToKey(Label -> LabelKey, ByValue)".to_string(),
                "MapKeyToValue(LabelKey -> LabelValue)".to_string()
            ]
        );

        let mut observer = NullObserver;
        assert!(Pipeline::new()
            .fit(labels(), &mut FitContext::new(0, &mut observer))
            .is_err());
    }
}
