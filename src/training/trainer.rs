//! Trainer: validate the backend settings, then fit the configured strategy
//!
//! Fitting is a pure function of the dataset, the backend configuration and
//! the seed, as long as any frozen weights it loads stay the same.

use std::time::Instant;

use tracing::info;

use crate::config::BackendConfig;
use crate::dataset::LabeledDataset;
use crate::model::TrainedModel;
use crate::pipeline::FitContext;
use crate::strategy::{ClassifierBackend, FeatureBackend};
use crate::training::metrics::MetricsObserver;
use crate::utils::error::Result;
use crate::utils::format_duration;

/// Fits a [`TrainedModel`] with the strategy selected by a [`BackendConfig`]
#[derive(Debug, Clone)]
pub struct Trainer {
    config: BackendConfig,
    seed: u64,
}

impl Trainer {
    pub fn new(config: BackendConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    /// Fit the configured strategy on `dataset`
    pub fn fit(&self, dataset: &LabeledDataset, observer: &mut dyn MetricsObserver) -> Result<TrainedModel> {
        // a LabeledDataset is non-empty, fully labeled and has at least 2 classes
        self.config.validate()?;

        let backend = FeatureBackend::from_config(&self.config);
        info!(
            "Training {} classifier on {} images, {} classes (seed {})",
            backend.kind(),
            dataset.len(),
            dataset.classes().len(),
            self.seed
        );

        let start = Instant::now();
        let mut ctx = FitContext::new(self.seed, observer);
        let model = backend.fit(dataset, &mut ctx)?;

        info!(
            "Training finished in {} ({} stages)",
            format_duration(start.elapsed().as_secs_f64()),
            model.stages().len()
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndToEndConfig, PretrainedGraphConfig};
    use crate::dataset::{Payload, Sample};
    use crate::model::Architecture;
    use crate::test_support::png_bytes;
    use crate::training::{ImageClassificationOptions, NullObserver};
    use crate::utils::error::ClassifierError;

    fn samples(classes: &[&str]) -> Vec<Sample> {
        classes
            .iter()
            .enumerate()
            .flat_map(|(c, label)| {
                (0..4).map(move |i| {
                    let color = if c == 0 { [200, 20, 20] } else { [20, 20, 200] };
                    Sample::labeled(format!("{}/{}.png", label, i), *label, Payload::Bytes(png_bytes(color, 12)))
                })
            })
            .collect()
    }

    #[test]
    fn test_rejects_single_class() {
        assert!(LabeledDataset::new(samples(&["carp"])).is_err());
    }

    #[test]
    fn test_invalid_config_fails_before_training() {
        let dataset = LabeledDataset::new(samples(&["carp", "trout"])).unwrap();
        let trainer = Trainer::new(
            BackendConfig::EndToEnd(EndToEndConfig {
                validation_fraction: 1.5,
                ..EndToEndConfig::default()
            }),
            42,
        );
        let err = trainer.fit(&dataset, &mut NullObserver).unwrap_err();
        assert!(matches!(err, ClassifierError::Config(_)));
    }

    #[test]
    fn test_missing_graph_is_reported() {
        let dataset = LabeledDataset::new(samples(&["carp", "trout"])).unwrap();
        let trainer = Trainer::new(
            BackendConfig::PretrainedGraph(PretrainedGraphConfig {
                graph_file: "missing/graph.mpk".into(),
                ..PretrainedGraphConfig::default()
            }),
            42,
        );
        let err = trainer.fit(&dataset, &mut NullObserver).unwrap_err();
        assert!(matches!(err, ClassifierError::PathNotFound(_)));
    }

    #[test]
    fn test_fits_end_to_end() {
        let dataset = LabeledDataset::new(samples(&["carp", "trout"])).unwrap();
        let trainer = Trainer::new(
            BackendConfig::EndToEnd(EndToEndConfig {
                validation_fraction: 0.25,
                options: ImageClassificationOptions {
                    arch: Architecture::Compact,
                    epochs: 2,
                    ..ImageClassificationOptions::default()
                },
                ..EndToEndConfig::default()
            }),
            42,
        );

        let mut epochs = 0;
        let mut observer = |event: &crate::training::TrainingEvent| {
            if matches!(event, crate::training::TrainingEvent::Epoch(_)) {
                epochs += 1;
            }
        };
        let model = trainer.fit(&dataset, &mut observer).unwrap();
        assert_eq!(model.num_classes(), 2);
        // train + validation events for each of the two epochs
        assert_eq!(epochs, 4);
    }
}
