//! End-to-end strategy
//!
//! 1. labels are mapped to keys on the full dataset
//! 2. the keyed rows are shuffled and split into train and validation views
//! 3. `ImageClassification` trains on the train view, scoring the validation
//!    view every epoch
//! 4. predicted keys are mapped back to label text
//!
//! The key mapping and the trained stages are fit separately and joined.

use tracing::info;

use crate::config::{BackendKind, EndToEndConfig};
use crate::dataset::{DatasetSplitter, LabeledDataset, PayloadKind};
use crate::model::{ModelColumns, TrainedModel};
use crate::pipeline::transforms::{MapKeyToValue, MapValueToKey};
use crate::pipeline::{
    payload_column, sample_view, DataView, FitContext, Pipeline, ID_COLUMN, LABEL_COLUMN,
    PREDICTED_LABEL_COLUMN, SCORE_COLUMN,
};
use crate::strategy::ClassifierBackend;
use crate::training::ImageClassification;
use crate::utils::error::Result;

/// Key column used by the end-to-end classifier
pub const LABEL_AS_KEY_COLUMN: &str = "LabelAsKey";

/// Transfer learning on backbone bottlenecks
#[derive(Debug, Clone)]
pub struct EndToEndTrainer {
    config: EndToEndConfig,
}

impl EndToEndTrainer {
    pub fn new(config: EndToEndConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EndToEndConfig {
        &self.config
    }

    fn key_mapping(&self) -> MapValueToKey {
        MapValueToKey::new(LABEL_COLUMN, LABEL_AS_KEY_COLUMN).with_ordinality(self.config.key_ordinality)
    }

    fn classifier(&self, payload: PayloadKind, validation: Option<DataView>) -> ImageClassification {
        let classifier = ImageClassification::new(payload_column(payload), LABEL_AS_KEY_COLUMN)
            .with_options(self.config.options.clone());
        match validation {
            Some(view) if view.num_rows() > 0 => classifier.with_validation(view),
            _ => classifier,
        }
    }
}

impl ClassifierBackend for EndToEndTrainer {
    fn kind(&self) -> BackendKind {
        BackendKind::EndToEnd
    }

    fn pipeline(&self, payload: PayloadKind) -> Result<Pipeline> {
        Ok(Pipeline::new()
            .append(self.key_mapping())
            .append(self.classifier(payload, None))
            .append(MapKeyToValue::new(PREDICTED_LABEL_COLUMN, PREDICTED_LABEL_COLUMN)))
    }

    fn fit(&self, dataset: &LabeledDataset, ctx: &mut FitContext<'_>) -> Result<TrainedModel> {
        let kind = dataset.payload_kind();
        let data = sample_view(dataset.samples(), kind)?;

        let preprocess = Pipeline::new()
            .append(self.key_mapping())
            .fit(data.clone(), ctx)?;
        let keyed = preprocess.transform(data)?;

        let splitter = DatasetSplitter::new(self.config.validation_fraction, ctx.seed)?;
        let mut order: Vec<usize> = (0..keyed.num_rows()).collect();
        splitter.shuffle(&mut order);
        let split = splitter.split(order);
        info!(
            "End-to-end split: {} train / {} validation images",
            split.train.len(),
            split.validation.len()
        );

        let train = keyed.select_rows(&split.train);
        let validation = keyed.select_rows(&split.validation);

        let trained = Pipeline::new()
            .append(self.classifier(kind, Some(validation)))
            .append(MapKeyToValue::new(PREDICTED_LABEL_COLUMN, PREDICTED_LABEL_COLUMN))
            .fit(train, ctx)?;

        preprocess.then(trained)?.into_model(ModelColumns {
            identifier: ID_COLUMN.to_string(),
            label: LABEL_COLUMN.to_string(),
            payload: payload_column(kind).to_string(),
            payload_kind: kind,
            predicted_label: PREDICTED_LABEL_COLUMN.to_string(),
            score: SCORE_COLUMN.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ClassFolderSource, PayloadMode, SampleSource};
    use crate::model::Architecture;
    use crate::pipeline::transforms::KeyOrdinality;
    use crate::pipeline::Value;
    use crate::test_support::write_class_folders;
    use crate::training::{EventLog, ImageClassificationOptions, Phase};
    use std::path::Path;
    use tempfile::tempdir;

    fn trainer(epochs: usize) -> EndToEndTrainer {
        EndToEndTrainer::new(EndToEndConfig {
            validation_fraction: 0.3,
            options: ImageClassificationOptions {
                arch: Architecture::Compact,
                epochs,
                batch_size: 5,
                learning_rate: 0.05,
                early_stopping: None,
                ..ImageClassificationOptions::default()
            },
            ..EndToEndConfig::default()
        })
    }

    fn dataset(root: &Path) -> LabeledDataset {
        let images = root.join("fish-images");
        write_class_folders(
            &images,
            &[("carp", [200, 40, 40]), ("pike", [40, 200, 40]), ("trout", [40, 40, 200])],
            10,
            16,
        );
        LabeledDataset::new(ClassFolderSource::new(images, PayloadMode::Eager).samples().unwrap()).unwrap()
    }

    #[test]
    fn test_split_sizes_reach_the_classifier() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path());

        let mut log = EventLog::new();
        let model = trainer(2)
            .fit(&dataset, &mut FitContext::new(42, &mut log))
            .unwrap();

        // 30 images at 0.3 -> 9 validation, 21 train, each computed once
        assert_eq!(log.bottlenecks_computed(Phase::Train), 21);
        assert_eq!(log.bottlenecks_computed(Phase::Validation), 9);
        assert_eq!(model.num_classes(), 3);
        assert_eq!(
            model.stage_names(),
            vec!["MapValueToKey", "ImageClassifier", "MapKeyToValue"]
        );
    }

    #[test]
    fn test_predictions_are_label_text() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path());

        let mut log = EventLog::new();
        let model = trainer(40)
            .fit(&dataset, &mut FitContext::new(42, &mut log))
            .unwrap();

        let out = model
            .transform(sample_view(dataset.samples(), PayloadKind::Bytes).unwrap())
            .unwrap();
        let correct = out
            .column(PREDICTED_LABEL_COLUMN)
            .unwrap()
            .into_iter()
            .zip(dataset.samples())
            .filter(|(value, sample)| {
                matches!(value, Value::Text(label) if Some(label) == sample.label.as_ref())
            })
            .count();
        assert!(correct >= 27, "only {} of 30 correct", correct);
    }

    #[test]
    fn test_identical_seeded_fits_give_identical_bundles() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path());
        let trainer = trainer(3);

        let mut bundles = Vec::new();
        for _ in 0..2 {
            let mut log = EventLog::new();
            let model = trainer
                .fit(&dataset, &mut FitContext::new(42, &mut log))
                .unwrap();
            bundles.push(model.to_json_bytes().unwrap());
        }
        assert!(bundles[0] == bundles[1], "end-to-end bundles differ between identical fits");
    }

    #[test]
    fn test_pipeline_description() {
        let lines = trainer(3).pipeline(PayloadKind::Bytes).unwrap().describe();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "MapValueToKey(Label -> LabelAsKey, ByValue)");

        let by_occurrence = EndToEndTrainer::new(EndToEndConfig {
            key_ordinality: KeyOrdinality::ByOccurrence,
            ..trainer(3).config().clone()
        });
        let lines = by_occurrence.pipeline(PayloadKind::Bytes).unwrap().describe();
        assert_eq!(lines[0], "MapValueToKey(Label -> LabelAsKey, ByOccurrence)");
        assert!(lines[1].starts_with("ImageClassification(Image -> PredictedLabel"));
    }
}
