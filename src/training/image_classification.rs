//! End-to-end image classification stage
//!
//! Transfer learning on top of a frozen convolutional backbone:
//! 1. every image is decoded, resized and pushed through the backbone once to
//!    get its bottleneck (pooled features), cached by sample identifier
//! 2. a linear softmax head is trained on the bottlenecks with mini-batch Adam,
//!    seeded batch order and staircase exponential learning-rate decay
//! 3. a validation set, when given, is scored every epoch and drives early
//!    stopping; the head with the best validation accuracy is kept
//!
//! Progress is reported through the fit context's `MetricsObserver`.

use std::path::PathBuf;
use std::time::Instant;

use burn::optim::AdamConfig;
use image::RgbImage;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{default_device, DefaultBackend, TrainingBackend};
use crate::model::architecture::Architecture;
use crate::model::graph::{ConvGraph, ConvGraphConfig};
use crate::pipeline::stage::{DecodePolicy, Estimator, FitContext, FittedStage, Transformer};
use crate::pipeline::view::{ColumnType, DataView, Schema, Value};
use crate::training::bottleneck::{content_fingerprint, Backbone, BottleneckCache};
use crate::training::head::{feature_tensor, target_tensor, HeadTrainer, LinearHead};
use crate::training::maxent::key_labels;
use crate::training::metrics::{BottleneckProgress, EpochMetrics, MetricsObserver, Phase, TrainingEvent};
use crate::utils::error::{ClassifierError, Result};
use crate::utils::format_duration;

/// Early stopping on validation accuracy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    /// Epochs without improvement before stopping
    pub patience: usize,
    /// Smallest accuracy gain that counts as improvement
    pub min_delta: f64,
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self {
            patience: 20,
            min_delta: 0.01,
        }
    }
}

/// Settings for [`ImageClassification`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageClassificationOptions {
    pub arch: Architecture,
    /// Backbone weights written by `ConvGraph::save_graph`; seeded init when absent
    pub backbone_weights: Option<PathBuf>,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Learning rate is multiplied by this every `decay_epochs` epochs
    pub decay_rate: f64,
    pub decay_epochs: usize,
    pub l2: f64,
    pub reuse_train_bottlenecks: bool,
    pub reuse_validation_bottlenecks: bool,
    pub early_stopping: Option<EarlyStopping>,
    /// Directory where bottleneck caches are persisted between runs
    pub workspace: Option<PathBuf>,
    pub on_decode_error: DecodePolicy,
}

impl Default for ImageClassificationOptions {
    fn default() -> Self {
        Self {
            arch: Architecture::default(),
            backbone_weights: None,
            epochs: 200,
            batch_size: 10,
            learning_rate: 0.01,
            decay_rate: 0.94,
            decay_epochs: 2,
            l2: 0.0,
            reuse_train_bottlenecks: true,
            reuse_validation_bottlenecks: true,
            early_stopping: Some(EarlyStopping::default()),
            workspace: None,
            on_decode_error: DecodePolicy::default(),
        }
    }
}

impl ImageClassificationOptions {
    /// Learning rate used during `epoch`
    pub fn learning_rate_at(&self, epoch: usize) -> f64 {
        let steps = epoch / self.decay_epochs.max(1);
        self.learning_rate * self.decay_rate.powi(steps as i32)
    }

    fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(ClassifierError::Config(
                "epochs and batch size must be positive".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0) || !(self.decay_rate > 0.0) {
            return Err(ClassifierError::Config(
                "learning rate and decay rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Estimator training an [`ImageClassifier`]
#[derive(Debug, Clone)]
pub struct ImageClassification {
    /// Bytes or path column with the images
    pub features: String,
    pub label_key: String,
    pub predicted_label: String,
    pub score: String,
    /// Held-out rows scored every epoch
    pub validation: Option<DataView>,
    pub options: ImageClassificationOptions,
}

/// One decoded training image
struct Item {
    identifier: String,
    /// Fingerprint of the prepared pixels
    fingerprint: String,
    image: RgbImage,
    target: u32,
}

impl ImageClassification {
    pub fn new(features: impl Into<String>, label_key: impl Into<String>) -> Self {
        Self {
            features: features.into(),
            label_key: label_key.into(),
            predicted_label: crate::pipeline::PREDICTED_LABEL_COLUMN.to_string(),
            score: crate::pipeline::SCORE_COLUMN.to_string(),
            validation: None,
            options: ImageClassificationOptions::default(),
        }
    }

    pub fn with_validation(mut self, validation: DataView) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_options(mut self, options: ImageClassificationOptions) -> Self {
        self.options = options;
        self
    }

    fn load_backbone(&self, seed: u64) -> Result<Backbone> {
        let config = self.options.arch.graph_config();
        let device = default_device();
        let graph = match &self.options.backbone_weights {
            Some(path) => {
                info!("Loading backbone weights from {:?}", path);
                ConvGraph::load_graph(&config, path, &device)?
            }
            None => {
                debug!("Initializing {} backbone with seed {}", self.options.arch, seed);
                config.init_seeded::<DefaultBackend>(seed, &device)
            }
        };

        Ok(Backbone {
            graph,
            config,
            input_size: self.options.arch.input_size(),
            device,
        })
    }

    /// Persisted bottlenecks are only reused with the same architecture and weights
    fn signature(&self, backbone: &Backbone) -> Result<String> {
        Ok(format!("{}:{}", self.options.arch, backbone.signature()?))
    }

    /// Decode every labeled row, applying the decode policy
    fn decode_items(&self, data: &DataView, backbone: &Backbone) -> Result<Vec<Item>> {
        let payloads = data.column(&self.features)?;
        let keys = data.column(&self.label_key)?;
        let mut items = Vec::with_capacity(payloads.len());
        let mut skipped = 0usize;

        for (row, (payload, key)) in payloads.into_iter().zip(keys).enumerate() {
            let identifier = data.row_identifier(row);
            let Some(target) = key.as_key() else {
                debug!("Skipping '{}': label unknown to the key mapping", identifier);
                continue;
            };
            match backbone.prepare(payload) {
                Ok(image) => items.push(Item {
                    identifier,
                    fingerprint: content_fingerprint(image.as_raw()),
                    image,
                    target,
                }),
                Err(reason) => match self.options.on_decode_error {
                    DecodePolicy::Abort => return Err(ClassifierError::data(identifier, reason)),
                    DecodePolicy::Skip => {
                        warn!("ImageClassification: skipping '{}': {}", identifier, reason);
                        skipped += 1;
                    }
                },
            }
        }

        if skipped > 0 {
            info!("ImageClassification: skipped {} undecodable images", skipped);
        }
        Ok(items)
    }

    /// Bottlenecks for every item, computing only what the cache cannot serve
    fn bottlenecks(
        &self,
        phase: Phase,
        items: &[Item],
        backbone: &Backbone,
        cache: &mut BottleneckCache,
        reuse: bool,
        observer: &mut dyn MetricsObserver,
    ) -> Result<Vec<Vec<f32>>> {
        let mut values: Vec<Option<Vec<f32>>> = items
            .iter()
            .map(|item| {
                if reuse {
                    cache.get(&item.identifier, &item.fingerprint).map(<[f32]>::to_vec)
                } else {
                    None
                }
            })
            .collect();

        let pending: Vec<usize> = (0..items.len()).filter(|&i| values[i].is_none()).collect();
        for chunk in pending.chunks(self.options.batch_size) {
            let images: Vec<&RgbImage> = chunk.iter().map(|&i| &items[i].image).collect();
            for (&i, bottleneck) in chunk.iter().zip(backbone.bottlenecks(&images)?) {
                observer.on_event(&TrainingEvent::Bottleneck(BottleneckProgress {
                    dataset: phase,
                    index: i,
                    total: items.len(),
                    identifier: items[i].identifier.clone(),
                }));
                if reuse {
                    cache.insert(
                        items[i].identifier.clone(),
                        items[i].fingerprint.clone(),
                        bottleneck.clone(),
                    );
                }
                values[i] = Some(bottleneck);
            }
        }

        Ok(values.into_iter().flatten().collect())
    }

    fn cache_path(&self, phase: Phase) -> Option<PathBuf> {
        self.options
            .workspace
            .as_ref()
            .map(|dir| dir.join(format!("{}_bottlenecks.json", phase)))
    }

    fn open_cache(&self, phase: Phase, signature: &str, reuse: bool) -> BottleneckCache {
        match self.cache_path(phase) {
            Some(path) if reuse => BottleneckCache::load_or_new(&path, signature),
            _ => BottleneckCache::new(signature),
        }
    }

    /// Save the cache, keeping only entries for `items`
    fn persist_cache(&self, phase: Phase, cache: &mut BottleneckCache, items: &[Item], reuse: bool) -> Result<()> {
        if let (Some(path), true) = (self.cache_path(phase), reuse) {
            let dropped = cache.retain(items.iter().map(|item| item.identifier.as_str()));
            if dropped > 0 {
                debug!("Dropped {} stale {} bottlenecks", dropped, phase);
            }
            cache.save(&path)?;
            debug!("Saved {} {} bottlenecks to {:?}", cache.len(), phase, path);
        }
        Ok(())
    }
}

impl Estimator for ImageClassification {
    fn name(&self) -> &'static str {
        "ImageClassification"
    }

    fn describe(&self) -> String {
        format!(
            "ImageClassification({} -> {}, arch={}, epochs={}, batch={}, validation={})",
            self.features,
            self.predicted_label,
            self.options.arch,
            self.options.epochs,
            self.options.batch_size,
            self.validation.as_ref().map_or(0, DataView::num_rows)
        )
    }

    fn fit(&self, data: &DataView, ctx: &mut FitContext<'_>) -> Result<FittedStage> {
        self.options.validate()?;
        let labels = key_labels(data.schema(), &self.label_key)?;
        if let Some(validation) = &self.validation {
            if key_labels(validation.schema(), &self.label_key)? != labels {
                return Err(ClassifierError::Config(
                    "validation set uses a different label vocabulary".to_string(),
                ));
            }
        }

        let start = Instant::now();
        let backbone = self.load_backbone(ctx.seed)?;
        let signature = self.signature(&backbone)?;

        let train = self.decode_items(data, &backbone)?;
        if train.is_empty() {
            return Err(ClassifierError::Training("no decodable training images".to_string()));
        }
        let validation = match &self.validation {
            Some(view) => self.decode_items(view, &backbone)?,
            None => Vec::new(),
        };
        info!(
            "Training image classifier ({}): {} train / {} validation images, {} classes",
            self.options.arch,
            train.len(),
            validation.len(),
            labels.len()
        );

        let reuse_train = self.options.reuse_train_bottlenecks;
        let reuse_validation = self.options.reuse_validation_bottlenecks;
        let mut train_cache = self.open_cache(Phase::Train, &signature, reuse_train);
        let mut validation_cache = self.open_cache(Phase::Validation, &signature, reuse_validation);

        let device = default_device();
        let train_targets: Vec<u32> = train.iter().map(|item| item.target).collect();
        let validation_targets: Vec<u32> = validation.iter().map(|item| item.target).collect();
        let num_features = backbone.dims();

        let mut trainer: HeadTrainer<TrainingBackend, _> = HeadTrainer::new(
            num_features,
            labels.len(),
            AdamConfig::new().init(),
            self.options.l2,
            &device,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(ctx.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();

        let mut best_accuracy = f64::NEG_INFINITY;
        let mut best_head = None;
        let mut epochs_without_improvement = 0usize;

        for epoch in 0..self.options.epochs {
            let learning_rate = self.options.learning_rate_at(epoch);
            let train_features = self.bottlenecks(
                Phase::Train,
                &train,
                &backbone,
                &mut train_cache,
                reuse_train,
                ctx.observer,
            )?;

            order.shuffle(&mut rng);
            for batch in order.chunks(self.options.batch_size) {
                let rows: Vec<&[f32]> = batch.iter().map(|&i| train_features[i].as_slice()).collect();
                let targets: Vec<u32> = batch.iter().map(|&i| train_targets[i]).collect();
                trainer.step(
                    feature_tensor(&rows, num_features, &device),
                    target_tensor(&targets, &device),
                    learning_rate,
                );
            }

            let rows: Vec<&[f32]> = train_features.iter().map(Vec::as_slice).collect();
            let eval = trainer.evaluate(
                feature_tensor(&rows, num_features, &device),
                target_tensor(&train_targets, &device),
            );
            ctx.observer.on_event(&TrainingEvent::Epoch(EpochMetrics {
                phase: Phase::Train,
                epoch,
                loss: eval.loss,
                accuracy: eval.accuracy,
                learning_rate,
            }));

            if validation.is_empty() {
                continue;
            }

            let validation_features = self.bottlenecks(
                Phase::Validation,
                &validation,
                &backbone,
                &mut validation_cache,
                reuse_validation,
                ctx.observer,
            )?;
            let rows: Vec<&[f32]> = validation_features.iter().map(Vec::as_slice).collect();
            let eval = trainer.evaluate(
                feature_tensor(&rows, num_features, &device),
                target_tensor(&validation_targets, &device),
            );
            ctx.observer.on_event(&TrainingEvent::Epoch(EpochMetrics {
                phase: Phase::Validation,
                epoch,
                loss: eval.loss,
                accuracy: eval.accuracy,
                learning_rate,
            }));

            if let Some(stopping) = self.options.early_stopping {
                if eval.accuracy > best_accuracy + stopping.min_delta || best_head.is_none() {
                    best_accuracy = eval.accuracy;
                    best_head = Some(trainer.snapshot());
                    epochs_without_improvement = 0;
                } else {
                    epochs_without_improvement += 1;
                    if epochs_without_improvement >= stopping.patience {
                        info!(
                            "Early stopping at epoch {} (best validation accuracy {:.2}%)",
                            epoch + 1,
                            best_accuracy * 100.0
                        );
                        break;
                    }
                }
            }
        }

        if let Some(best) = best_head {
            trainer.restore(best);
        }
        self.persist_cache(Phase::Train, &mut train_cache, &train, reuse_train)?;
        self.persist_cache(Phase::Validation, &mut validation_cache, &validation, reuse_validation)?;

        info!(
            "Image classifier trained in {}",
            format_duration(start.elapsed().as_secs_f64())
        );

        Ok(FittedStage::ImageClassifier(ImageClassifier {
            input: self.features.clone(),
            predicted_label: self.predicted_label.clone(),
            score: self.score.clone(),
            labels,
            arch: self.options.arch,
            backbone,
            head: trainer.export()?,
            on_decode_error: self.options.on_decode_error,
        }))
    }
}

/// Fitted end-to-end classifier: frozen backbone + linear head
#[derive(Debug, Clone)]
pub struct ImageClassifier {
    input: String,
    predicted_label: String,
    score: String,
    labels: Vec<String>,
    arch: Architecture,
    backbone: Backbone,
    head: LinearHead,
    on_decode_error: DecodePolicy,
}

impl ImageClassifier {
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn head(&self) -> &LinearHead {
        &self.head
    }

    pub fn to_record(&self) -> Result<ImageClassifierRecord> {
        Ok(ImageClassifierRecord {
            input: self.input.clone(),
            predicted_label: self.predicted_label.clone(),
            score: self.score.clone(),
            labels: self.labels.clone(),
            arch: self.arch,
            input_size: self.backbone.input_size,
            graph: self.backbone.config.clone(),
            head: self.head.clone(),
            on_decode_error: self.on_decode_error,
            weights: self.backbone.graph.encode_weights()?,
        })
    }

    pub fn from_record(record: ImageClassifierRecord) -> Result<Self> {
        let device = default_device();
        let graph = ConvGraph::<DefaultBackend>::decode_weights(&record.graph, &record.weights, &device)?;
        Ok(Self {
            input: record.input,
            predicted_label: record.predicted_label,
            score: record.score,
            labels: record.labels,
            arch: record.arch,
            backbone: Backbone {
                graph,
                config: record.graph,
                input_size: record.input_size,
                device,
            },
            head: record.head,
            on_decode_error: record.on_decode_error,
        })
    }
}

impl Transformer for ImageClassifier {
    fn name(&self) -> &'static str {
        "ImageClassifier"
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        input.require(&self.input)?;
        Ok(input
            .clone()
            .with(
                self.predicted_label.clone(),
                ColumnType::Key {
                    labels: self.labels.clone(),
                },
            )
            .with(
                self.score.clone(),
                ColumnType::Vector {
                    dims: self.labels.len(),
                },
            ))
    }

    fn transform(&self, mut data: DataView) -> Result<DataView> {
        let images = crate::pipeline::transforms::image::decode_column(
            &data,
            &self.input,
            self.on_decode_error,
            "ImageClassifier",
            |value| self.backbone.prepare(value),
        )?;

        let mut predicted = vec![Value::Missing; images.len()];
        let mut scores = vec![Value::Missing; images.len()];
        let present: Vec<(usize, &RgbImage)> = images
            .iter()
            .enumerate()
            .filter_map(|(row, image)| image.as_ref().map(|img| (row, img)))
            .collect();

        for chunk in present.chunks(crate::pipeline::transforms::graph::DEFAULT_SCORING_BATCH) {
            let batch: Vec<&RgbImage> = chunk.iter().map(|(_, img)| *img).collect();
            for ((row, _), bottleneck) in chunk.iter().zip(self.backbone.bottlenecks(&batch)?) {
                let (class, probabilities) = self.head.predict(&bottleneck)?;
                predicted[*row] = Value::Key(class as u32);
                scores[*row] = Value::Vector(probabilities);
            }
        }

        let keep: Vec<bool> = images.iter().map(Option::is_some).collect();
        data.set_column(
            &self.predicted_label,
            ColumnType::Key {
                labels: self.labels.clone(),
            },
            predicted,
        )?;
        data.set_column(
            &self.score,
            ColumnType::Vector {
                dims: self.labels.len(),
            },
            scores,
        )?;
        if keep.iter().any(|k| !k) {
            data.retain_rows(&keep);
        }
        Ok(data)
    }
}

/// On-disk form of [`ImageClassifier`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageClassifierRecord {
    pub input: String,
    pub predicted_label: String,
    pub score: String,
    pub labels: Vec<String>,
    pub arch: Architecture,
    pub input_size: u32,
    pub graph: ConvGraphConfig,
    pub head: LinearHead,
    pub on_decode_error: DecodePolicy,
    /// Base64 of the full-precision backbone record
    pub weights: String,
}
