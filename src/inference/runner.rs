//! Batch inference over a folder of samples

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::Sample;
use crate::inference::predictor::{Prediction, PredictionEngine};
use crate::pipeline::DecodePolicy;
use crate::utils::error::{ClassifierError, Result};

/// Outcome of classifying a batch of samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub predictions: Vec<Prediction>,
    /// Identifiers of samples that could not be decoded
    pub skipped: Vec<String>,
}

impl BatchOutput {
    /// Fraction of labeled predictions that match their label
    pub fn accuracy(&self) -> Option<f64> {
        let judged: Vec<bool> = self.predictions.iter().filter_map(Prediction::is_correct).collect();
        if judged.is_empty() {
            None
        } else {
            Some(judged.iter().filter(|&&c| c).count() as f64 / judged.len() as f64)
        }
    }
}

/// Display name of a sample: the file name part of its identifier
pub fn display_name(identifier: &str) -> &str {
    Path::new(identifier)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(identifier)
}

/// One output line per prediction
pub fn format_prediction(prediction: &Prediction) -> String {
    format!(
        "Image: {} predicted as: {} with score: {}",
        display_name(&prediction.identifier),
        prediction.predicted_label,
        prediction.top_score()
    )
}

/// Classify every sample in order.
///
/// Undecodable samples abort the batch under `DecodePolicy::Abort` and are
/// listed in `skipped` under `DecodePolicy::Skip`.
pub fn classify_all(engine: &PredictionEngine<'_>, samples: &[Sample], policy: DecodePolicy) -> Result<BatchOutput> {
    let mut output = BatchOutput::default();

    for sample in samples {
        match engine.predict(sample) {
            Ok(prediction) => output.predictions.push(prediction),
            Err(ClassifierError::Data { identifier, reason }) if policy == DecodePolicy::Skip => {
                warn!("Skipping '{}': {}", identifier, reason);
                output.skipped.push(identifier);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Classified {} images ({} skipped)",
        output.predictions.len(),
        output.skipped.len()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndToEndConfig;
    use crate::dataset::{ClassFolderSource, LabeledDataset, Payload, PayloadKind, PayloadMode, SampleSource};
    use crate::model::Architecture;
    use crate::pipeline::FitContext;
    use crate::strategy::{ClassifierBackend, EndToEndTrainer};
    use crate::test_support::{write_class_folders, write_png};
    use crate::training::{ImageClassificationOptions, NullObserver};
    use tempfile::tempdir;

    fn prediction(identifier: &str, label: Option<&str>, predicted: &str) -> Prediction {
        Prediction {
            identifier: identifier.to_string(),
            label: label.map(str::to_string),
            predicted_label: predicted.to_string(),
            scores: vec![0.25, 0.75],
        }
    }

    #[test]
    fn test_format_prediction() {
        let line = format_prediction(&prediction("assets/test-images/fish1.jpg", None, "trout"));
        assert_eq!(line, "Image: fish1.jpg predicted as: trout with score: 0.75");
    }

    #[test]
    fn test_accuracy_counts_labeled_only() {
        let output = BatchOutput {
            predictions: vec![
                prediction("a", Some("carp"), "carp"),
                prediction("b", Some("carp"), "trout"),
                prediction("c", None, "trout"),
            ],
            skipped: Vec::new(),
        };
        assert_eq!(output.accuracy(), Some(0.5));
        assert_eq!(BatchOutput::default().accuracy(), None);
    }

    #[test]
    fn test_vanished_file_is_skipped_under_skip_policy() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("fish-images");
        write_class_folders(&images, &[("carp", [200, 40, 40]), ("trout", [40, 40, 200])], 3, 16);
        let dataset =
            LabeledDataset::new(ClassFolderSource::new(images, PayloadMode::Eager).samples().unwrap()).unwrap();

        let trainer = EndToEndTrainer::new(EndToEndConfig {
            options: ImageClassificationOptions {
                arch: Architecture::Compact,
                epochs: 1,
                early_stopping: None,
                ..ImageClassificationOptions::default()
            },
            ..EndToEndConfig::default()
        });
        let mut observer = NullObserver;
        let model = trainer
            .fit(&dataset, &mut FitContext::new(42, &mut observer))
            .unwrap();
        assert_eq!(model.columns().payload_kind, PayloadKind::Bytes);

        let present = dir.path().join("fish1.png");
        write_png(&present, [200, 40, 40], 16);
        let samples = vec![
            Sample::unlabeled("fish1.png", Payload::Path(present)),
            Sample::unlabeled("fish2.png", Payload::Path(dir.path().join("fish2.png"))),
        ];
        let engine = PredictionEngine::new(&model);

        let output = classify_all(&engine, &samples, DecodePolicy::Skip).unwrap();
        assert_eq!(output.predictions.len(), 1);
        assert_eq!(output.skipped, vec!["fish2.png".to_string()]);

        let err = classify_all(&engine, &samples, DecodePolicy::Abort).unwrap_err();
        assert!(matches!(err, ClassifierError::Data { .. }));
    }
}
