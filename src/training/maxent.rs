//! Multinomial logistic regression (maximum entropy) stage
//!
//! Trained full-batch with Adam on softmax cross-entropy plus an L2 penalty,
//! starting from zero weights, until the loss change drops below `tolerance`
//! or `max_iterations` is reached.

use burn::optim::AdamConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{default_device, TrainingBackend};
use crate::pipeline::stage::{Estimator, FitContext, FittedStage, Transformer};
use crate::pipeline::view::{ColumnType, DataView, Schema, Value};
use crate::training::head::{feature_tensor, target_tensor, HeadTrainer, LinearHead};
use crate::utils::error::{ClassifierError, Result};

/// Optimizer settings for [`MaximumEntropy`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxEntOptions {
    /// L2 penalty on the weights
    pub l2: f64,
    pub learning_rate: f64,
    pub max_iterations: usize,
    /// Stop when the loss changes by less than this between iterations
    pub tolerance: f64,
}

impl Default for MaxEntOptions {
    fn default() -> Self {
        Self {
            l2: 1e-4,
            learning_rate: 0.05,
            max_iterations: 300,
            tolerance: 1e-6,
        }
    }
}

/// Estimator producing a [`LinearClassifier`]
#[derive(Debug, Clone)]
pub struct MaximumEntropy {
    pub features: String,
    pub label_key: String,
    pub predicted_label: String,
    pub score: String,
    pub options: MaxEntOptions,
}

impl MaximumEntropy {
    pub fn new(features: impl Into<String>, label_key: impl Into<String>) -> Self {
        Self {
            features: features.into(),
            label_key: label_key.into(),
            predicted_label: crate::pipeline::PREDICTED_LABEL_COLUMN.to_string(),
            score: crate::pipeline::SCORE_COLUMN.to_string(),
            options: MaxEntOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MaxEntOptions) -> Self {
        self.options = options;
        self
    }
}

/// Rows with both features and a known label
pub(crate) fn training_rows<'a>(
    data: &'a DataView,
    features: &str,
    label_key: &str,
) -> Result<(Vec<&'a [f32]>, Vec<u32>)> {
    let feature_values = data.column(features)?;
    let keys = data.column(label_key)?;

    let mut rows = Vec::with_capacity(feature_values.len());
    let mut targets = Vec::with_capacity(feature_values.len());
    for (feature, key) in feature_values.into_iter().zip(keys) {
        if let (Some(f), Some(k)) = (feature.as_vector(), key.as_key()) {
            rows.push(f);
            targets.push(k);
        }
    }
    Ok((rows, targets))
}

/// Label vocabulary of a key column
pub(crate) fn key_labels(schema: &Schema, column: &str) -> Result<Vec<String>> {
    match &schema.require(column)?.ty {
        ColumnType::Key { labels } => Ok(labels.clone()),
        other => Err(ClassifierError::Config(format!(
            "'{}' must be a key column, found {}",
            column,
            other.describe()
        ))),
    }
}

impl Estimator for MaximumEntropy {
    fn name(&self) -> &'static str {
        "MaximumEntropy"
    }

    fn describe(&self) -> String {
        format!(
            "MaximumEntropy(features={}, label={}, l2={}, max_iterations={})",
            self.features, self.label_key, self.options.l2, self.options.max_iterations
        )
    }

    fn fit(&self, data: &DataView, _ctx: &mut FitContext<'_>) -> Result<FittedStage> {
        let labels = key_labels(data.schema(), &self.label_key)?;
        let num_features = match data.schema().require(&self.features)?.ty {
            ColumnType::Vector { dims } => dims,
            ref other => {
                return Err(ClassifierError::Config(format!(
                    "'{}' must be a vector column, found {}",
                    self.features,
                    other.describe()
                )))
            }
        };

        let (rows, targets) = training_rows(data, &self.features, &self.label_key)?;
        if rows.is_empty() {
            return Err(ClassifierError::Training(
                "no labeled rows to train the classifier on".to_string(),
            ));
        }
        info!(
            "Training maximum entropy classifier: {} rows, {} features, {} classes",
            rows.len(),
            num_features,
            labels.len()
        );

        let device = default_device();
        let x = feature_tensor::<TrainingBackend>(&rows, num_features, &device);
        let y = target_tensor::<TrainingBackend>(&targets, &device);
        let mut trainer: HeadTrainer<TrainingBackend, _> = HeadTrainer::new(
            num_features,
            labels.len(),
            AdamConfig::new().init(),
            self.options.l2,
            &device,
        );

        let mut previous = f64::INFINITY;
        let mut iterations = 0;
        for iteration in 0..self.options.max_iterations {
            let loss = trainer.step(x.clone(), y.clone(), self.options.learning_rate);
            iterations = iteration + 1;
            if (previous - loss).abs() < self.options.tolerance {
                debug!("Converged after {} iterations (loss {:.6})", iterations, loss);
                break;
            }
            previous = loss;
        }

        let eval = trainer.evaluate(x, y);
        info!(
            "Maximum entropy done after {} iterations | Loss: {:.4} | Train acc: {:.2}%",
            iterations,
            eval.loss,
            eval.accuracy * 100.0
        );

        Ok(FittedStage::LinearClassifier(LinearClassifier {
            features: self.features.clone(),
            predicted_label: self.predicted_label.clone(),
            score: self.score.clone(),
            labels,
            head: trainer.export()?,
        }))
    }
}

/// Fitted linear classifier over a feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub features: String,
    pub predicted_label: String,
    pub score: String,
    pub labels: Vec<String>,
    pub head: LinearHead,
}

impl Transformer for LinearClassifier {
    fn name(&self) -> &'static str {
        "LinearClassifier"
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        input.require(&self.features)?;
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
        let mut predicted = Vec::with_capacity(data.num_rows());
        let mut scores = Vec::with_capacity(data.num_rows());
        for value in data.column(&self.features)? {
            match value.as_vector() {
                Some(features) => {
                    let (class, probabilities) = self.head.predict(features)?;
                    predicted.push(Value::Key(class as u32));
                    scores.push(Value::Vector(probabilities));
                }
                None => {
                    predicted.push(Value::Missing);
                    scores.push(Value::Missing);
                }
            }
        }

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
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::NullObserver;

    fn clusters() -> DataView {
        let labels = vec!["carp".to_string(), "pike".to_string(), "trout".to_string()];
        let schema = Schema::new()
            .with("Features", ColumnType::Vector { dims: 3 })
            .with("LabelKey", ColumnType::Key { labels });
        let mut view = DataView::new(schema);
        for class in 0..3u32 {
            for jitter in [0.0f32, 0.1, 0.2] {
                let mut features = vec![jitter; 3];
                features[class as usize] = 1.0;
                view.push_row(vec![Value::Vector(features), Value::Key(class)])
                    .unwrap();
            }
        }
        view.push_row(vec![Value::Vector(vec![0.3; 3]), Value::Missing])
            .unwrap();
        view
    }

    fn fit(view: &DataView) -> LinearClassifier {
        let mut observer = NullObserver;
        let mut ctx = FitContext::new(0, &mut observer);
        match MaximumEntropy::new("Features", "LabelKey").fit(view, &mut ctx).unwrap() {
            FittedStage::LinearClassifier(stage) => stage,
            other => panic!("unexpected stage {:?}", other.name()),
        }
    }

    #[test]
    fn test_learns_separable_clusters() {
        let view = clusters();
        let classifier = fit(&view);
        assert_eq!(classifier.head.num_classes, 3);

        let out = classifier.transform(view).unwrap();
        let predicted: Vec<_> = out.column("PredictedLabel").unwrap().into_iter().take(9).cloned().collect();
        let expected: Vec<_> = (0..3u32)
            .flat_map(|c| std::iter::repeat(Value::Key(c)).take(3))
            .collect();
        assert_eq!(predicted, expected);

        let scores = out.column("Score").unwrap();
        let first = scores[0].as_vector().unwrap();
        assert_eq!(first.len(), 3);
        assert!((first.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(first[0] > first[1] && first[0] > first[2]);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let view = clusters();
        assert_eq!(fit(&view), fit(&view));
    }

    #[test]
    fn test_requires_key_labels() {
        let schema = Schema::new()
            .with("Features", ColumnType::Vector { dims: 3 })
            .with("LabelKey", ColumnType::Text);
        let mut observer = NullObserver;
        let mut ctx = FitContext::new(0, &mut observer);
        let err = MaximumEntropy::new("Features", "LabelKey")
            .fit(&DataView::new(schema), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Config(_)));
    }
}
