//! Inference Predictor Module
//!
//! Applies a trained model to single samples. The engine only borrows the
//! model, so one model can serve any number of engines.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::Sample;
use crate::model::TrainedModel;
use crate::pipeline::{sample_view, Value};
use crate::training::head::argmax;
use crate::utils::error::{ClassifierError, Result};

/// Result of classifying one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub identifier: String,
    /// Known label of the sample, if any
    pub label: Option<String>,
    pub predicted_label: String,
    /// One probability per training class, in key order
    pub scores: Vec<f32>,
}

impl Prediction {
    /// Probability of the predicted class
    pub fn top_score(&self) -> f32 {
        self.scores.get(argmax(&self.scores)).copied().unwrap_or(0.0)
    }

    /// Whether the prediction matches a known label
    pub fn is_correct(&self) -> Option<bool> {
        self.label.as_ref().map(|label| *label == self.predicted_label)
    }
}

/// Runs a trained model on individual samples
#[derive(Debug, Clone, Copy)]
pub struct PredictionEngine<'a> {
    model: &'a TrainedModel,
}

impl<'a> PredictionEngine<'a> {
    pub fn new(model: &'a TrainedModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &TrainedModel {
        self.model
    }

    /// Classify one sample
    pub fn predict(&self, sample: &Sample) -> Result<Prediction> {
        let start = Instant::now();
        let columns = self.model.columns();
        let input = sample_view(std::iter::once(sample), columns.payload_kind)?;
        let output = self.model.transform(input)?;

        if output.num_rows() == 0 {
            return Err(ClassifierError::data(
                &sample.identifier,
                "image could not be decoded and was skipped",
            ));
        }

        let predicted_label = match output.column(&columns.predicted_label)?.first() {
            Some(Value::Text(label)) => label.clone(),
            _ => {
                return Err(ClassifierError::Inference(format!(
                    "no predicted label for '{}'",
                    sample.identifier
                )))
            }
        };
        let scores = match output.column(&columns.score)?.first() {
            Some(Value::Vector(scores)) => scores.clone(),
            _ => {
                return Err(ClassifierError::Inference(format!(
                    "no scores for '{}'",
                    sample.identifier
                )))
            }
        };

        debug!(
            "Classified '{}' as '{}' in {:.1}ms",
            sample.identifier,
            predicted_label,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Prediction {
            identifier: sample.identifier.clone(),
            label: sample.label.clone(),
            predicted_label,
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};
    use crate::cache::ModelCache;
    use crate::config::PretrainedGraphConfig;
    use crate::dataset::{ClassFolderSource, LabeledDataset, Payload, PayloadMode, SampleSource};
    use crate::model::ConvGraphConfig;
    use crate::pipeline::FitContext;
    use crate::strategy::{ClassifierBackend, PretrainedGraphExtractor};
    use crate::test_support::{write_class_folders, write_png};
    use crate::training::NullObserver;
    use std::path::Path;
    use tempfile::tempdir;

    fn train(root: &Path) -> (TrainedModel, LabeledDataset) {
        let graph = ConvGraphConfig::new()
            .with_base_filters(4)
            .with_depth(2)
            .with_embedding_size(8);
        let graph_file = root.join("graph.mpk");
        graph
            .init_seeded::<DefaultBackend>(5, &default_device())
            .save_graph(&graph_file)
            .unwrap();

        let images = root.join("fish-images");
        write_class_folders(
            &images,
            &[("carp", [210, 30, 30]), ("pike", [30, 210, 30]), ("trout", [30, 30, 210])],
            4,
            20,
        );
        let dataset =
            LabeledDataset::new(ClassFolderSource::new(images, PayloadMode::Lazy).samples().unwrap()).unwrap();

        let extractor = PretrainedGraphExtractor::new(PretrainedGraphConfig {
            graph_file,
            graph,
            image_size: 16,
            ..PretrainedGraphConfig::default()
        });
        let mut observer = NullObserver;
        let model = extractor
            .fit(&dataset, &mut FitContext::new(42, &mut observer))
            .unwrap();
        (model, dataset)
    }

    #[test]
    fn test_scores_cover_every_class() {
        let dir = tempdir().unwrap();
        let (model, dataset) = train(dir.path());
        let engine = PredictionEngine::new(&model);

        let prediction = engine.predict(&dataset.samples()[0]).unwrap();
        assert_eq!(prediction.scores.len(), 3);
        assert!((prediction.scores.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert_eq!(prediction.label.as_deref(), Some("carp"));
    }

    #[test]
    fn test_true_class_has_strictly_highest_score() {
        let dir = tempdir().unwrap();
        let (model, _) = train(dir.path());
        let engine = PredictionEngine::new(&model);

        let sample_path = dir.path().join("new.png");
        write_png(&sample_path, [30, 30, 205], 20);

        let prediction = engine
            .predict(&Sample::unlabeled("new.png", Payload::Path(sample_path)))
            .unwrap();
        assert_eq!(prediction.predicted_label, "trout");
        let top = prediction.top_score();
        assert_eq!(prediction.scores.iter().filter(|&&s| s == top).count(), 1);
        assert_eq!(prediction.is_correct(), None);
    }

    #[test]
    fn test_save_load_gives_identical_predictions() {
        let dir = tempdir().unwrap();
        let (model, dataset) = train(dir.path());

        let cache = ModelCache::new(dir.path().join("model_v1.json"));
        cache.save(&model).unwrap();
        let loaded = cache.load().unwrap().unwrap();

        let before = PredictionEngine::new(&model);
        let after = PredictionEngine::new(&loaded);
        for sample in dataset.samples() {
            assert_eq!(before.predict(sample).unwrap(), after.predict(sample).unwrap());
        }
    }

    #[test]
    fn test_undecodable_sample_is_a_data_error() {
        let dir = tempdir().unwrap();
        let (model, _) = train(dir.path());
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not an image").unwrap();

        let err = PredictionEngine::new(&model)
            .predict(&Sample::unlabeled("broken.png", Payload::Path(broken)))
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Data { .. }));
    }
}
