//! Linear softmax heads
//!
//! Both classifier strategies end in a linear layer followed by a softmax.
//! Training runs on the autodiff backend through [`HeadTrainer`]; the result is
//! exported to a plain [`LinearHead`] so inference and serialization do not
//! depend on any backend.

use burn::{
    module::AutodiffModule,
    nn::{
        loss::{CrossEntropyLoss, CrossEntropyLossConfig},
        Initializer, Linear, LinearConfig,
    },
    optim::{GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor, TensorData,
    },
};
use serde::{Deserialize, Serialize};

use crate::utils::error::{ClassifierError, Result};

/// Softmax over a slice of logits
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; ties go to the first occurrence
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Exported linear classifier: `softmax(x W + b)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearHead {
    pub num_features: usize,
    pub num_classes: usize,
    /// Row-major `[num_features][num_classes]`
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl LinearHead {
    pub fn logits(&self, features: &[f32]) -> Result<Vec<f32>> {
        if features.len() != self.num_features {
            return Err(ClassifierError::Inference(format!(
                "expected {} features, got {}",
                self.num_features,
                features.len()
            )));
        }

        let mut logits = self.bias.clone();
        for (row, &x) in self.weights.chunks(self.num_classes).zip(features) {
            for (logit, &w) in logits.iter_mut().zip(row) {
                *logit += x * w;
            }
        }
        Ok(logits)
    }

    /// Predicted class and class probabilities
    pub fn predict(&self, features: &[f32]) -> Result<(usize, Vec<f32>)> {
        let probabilities = softmax(&self.logits(features)?);
        Ok((argmax(&probabilities), probabilities))
    }
}

/// Build a feature matrix tensor from row vectors
pub(crate) fn feature_tensor<B: Backend>(
    rows: &[&[f32]],
    num_features: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::from_data(TensorData::new(flat, [rows.len(), num_features]), device)
}

/// Build a target tensor from class indices
pub(crate) fn target_tensor<B: Backend>(targets: &[u32], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = targets.iter().map(|&t| t as i64).collect();
    Tensor::from_data(TensorData::new(data, [targets.len()]), device)
}

/// Loss and accuracy of one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadEvaluation {
    pub loss: f64,
    pub accuracy: f64,
}

/// Optimizes a zero-initialized linear head with cross-entropy + L2
pub(crate) struct HeadTrainer<B: AutodiffBackend, O: Optimizer<Linear<B>, B>> {
    model: Linear<B>,
    optimizer: O,
    loss: CrossEntropyLoss<B>,
    l2: f64,
    device: B::Device,
}

impl<B: AutodiffBackend, O: Optimizer<Linear<B>, B>> HeadTrainer<B, O> {
    pub fn new(num_features: usize, num_classes: usize, optimizer: O, l2: f64, device: &B::Device) -> Self {
        let model = LinearConfig::new(num_features, num_classes)
            .with_initializer(Initializer::Zeros)
            .init(device);

        Self {
            model,
            optimizer,
            loss: CrossEntropyLossConfig::new().init(device),
            l2,
            device: device.clone(),
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    fn objective(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let loss = self.loss.forward(logits, targets);
        if self.l2 > 0.0 {
            let weight = self.model.weight.val();
            loss + (weight.clone() * weight).sum().mul_scalar(self.l2 / 2.0)
        } else {
            loss
        }
    }

    /// One optimizer step; returns the loss before the update
    pub fn step(&mut self, features: Tensor<B, 2>, targets: Tensor<B, 1, Int>, learning_rate: f64) -> f64 {
        let logits = self.model.forward(features);
        let loss = self.objective(logits, targets);
        let loss_value: f64 = loss.clone().into_scalar().elem();

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optimizer.step(learning_rate, self.model.clone(), grads);

        loss_value
    }

    /// Loss and accuracy without updating the head
    pub fn evaluate(&self, features: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> HeadEvaluation {
        let n = targets.dims()[0];
        let logits = self.model.forward(features);
        let loss: f64 = self
            .objective(logits.clone(), targets.clone())
            .into_scalar()
            .elem();

        let predictions = logits.argmax(1).reshape([n]);
        let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();

        HeadEvaluation {
            loss,
            accuracy: if n == 0 { 0.0 } else { correct as f64 / n as f64 },
        }
    }

    /// Replace the current weights (used to restore the best head)
    pub fn restore(&mut self, model: Linear<B>) {
        self.model = model;
    }

    pub fn snapshot(&self) -> Linear<B> {
        self.model.clone()
    }

    /// Copy the weights out of the backend
    pub fn export(&self) -> Result<LinearHead> {
        export_linear(&self.model.valid())
    }
}

/// Convert a burn linear layer into a plain head
pub(crate) fn export_linear<B: Backend>(linear: &Linear<B>) -> Result<LinearHead> {
    let [num_features, num_classes] = linear.weight.val().dims();
    let weights = linear
        .weight
        .val()
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| ClassifierError::Training(format!("reading head weights: {:?}", e)))?;
    let bias = match &linear.bias {
        Some(bias) => bias
            .val()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Training(format!("reading head bias: {:?}", e)))?,
        None => vec![0.0; num_classes],
    };

    Ok(LinearHead {
        num_features,
        num_classes,
        weights,
        bias,
    })
}
