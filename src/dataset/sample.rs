//! Samples and labeled datasets
//!
//! A [`Sample`] is one image (by path or by raw bytes) with an optional label.
//! A [`LabeledDataset`] is an ordered collection of samples that is valid input
//! for training: non-empty, every sample labeled, at least two classes and a
//! single payload representation.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::error::{ClassifierError, Result, ResultExt};

/// Image payload of a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Image is read from disk when a stage needs it
    Path(PathBuf),
    /// Image bytes already in memory
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Path(_) => PayloadKind::Path,
            Payload::Bytes(_) => PayloadKind::Bytes,
        }
    }

    /// Read the payload into memory
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Payload::Path(path) => std::fs::read(&path).with_path(&path),
            Payload::Bytes(bytes) => Ok(bytes),
        }
    }
}

/// Payload representation, without the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Path,
    Bytes,
}

/// A single image with an optional class label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Reporting name and bottleneck-cache key
    pub identifier: String,
    /// Class label, `None` for inference-only samples
    pub label: Option<String>,
    pub payload: Payload,
}

impl Sample {
    pub fn labeled(identifier: impl Into<String>, label: impl Into<String>, payload: Payload) -> Self {
        Self {
            identifier: identifier.into(),
            label: Some(label.into()),
            payload,
        }
    }

    pub fn unlabeled(identifier: impl Into<String>, payload: Payload) -> Self {
        Self {
            identifier: identifier.into(),
            label: None,
            payload,
        }
    }
}

/// Ordered collection of labeled samples, validated for training
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    samples: Vec<Sample>,
    payload_kind: PayloadKind,
}

impl LabeledDataset {
    /// Validate and wrap a list of samples
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| ClassifierError::Config("training dataset is empty".to_string()))?;
        let payload_kind = first.payload.kind();

        let mut classes = BTreeSet::new();
        for sample in &samples {
            match &sample.label {
                Some(label) => {
                    classes.insert(label.as_str());
                }
                None => {
                    return Err(ClassifierError::Config(format!(
                        "sample '{}' has no label",
                        sample.identifier
                    )))
                }
            }
            if sample.payload.kind() != payload_kind {
                return Err(ClassifierError::Config(format!(
                    "sample '{}' mixes payload kinds ({:?} vs {:?})",
                    sample.identifier,
                    sample.payload.kind(),
                    payload_kind
                )));
            }
        }

        if classes.len() < 2 {
            return Err(ClassifierError::Config(format!(
                "training needs at least 2 classes, found {}",
                classes.len()
            )));
        }

        Ok(Self {
            samples,
            payload_kind,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn payload_kind(&self) -> PayloadKind {
        self.payload_kind
    }

    /// Distinct labels, sorted
    pub fn classes(&self) -> Vec<String> {
        self.samples
            .iter()
            .filter_map(|s| s.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, label: Option<&str>) -> Sample {
        Sample {
            identifier: id.to_string(),
            label: label.map(str::to_string),
            payload: Payload::Bytes(vec![0u8; 4]),
        }
    }

    #[test]
    fn test_dataset_classes_sorted() {
        let dataset = LabeledDataset::new(vec![
            sample("a", Some("trout")),
            sample("b", Some("carp")),
            sample("c", Some("trout")),
        ])
        .unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.classes(), vec!["carp", "trout"]);
        assert_eq!(dataset.payload_kind(), PayloadKind::Bytes);
    }

    #[test]
    fn test_dataset_rejects_single_class() {
        let err = LabeledDataset::new(vec![sample("a", Some("carp")), sample("b", Some("carp"))])
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Config(_)));
    }

    #[test]
    fn test_dataset_rejects_empty_and_unlabeled() {
        assert!(matches!(
            LabeledDataset::new(Vec::new()),
            Err(ClassifierError::Config(_))
        ));
        assert!(matches!(
            LabeledDataset::new(vec![sample("a", Some("carp")), sample("b", None)]),
            Err(ClassifierError::Config(_))
        ));
    }

    #[test]
    fn test_dataset_rejects_mixed_payloads() {
        let mut second = sample("b", Some("trout"));
        second.payload = Payload::Path(PathBuf::from("b.png"));
        let err = LabeledDataset::new(vec![sample("a", Some("carp")), second]).unwrap_err();
        assert!(matches!(err, ClassifierError::Config(_)));
    }

    #[test]
    fn test_payload_into_bytes_missing_file() {
        let err = Payload::Path(PathBuf::from("/definitely/not/here.png"))
            .into_bytes()
            .unwrap_err();
        assert!(matches!(err, ClassifierError::PathNotFound(_)));
    }
}
