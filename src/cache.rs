//! Model cache
//!
//! Keeps a trained model on disk so repeated runs skip training. Writes go to
//! a temporary file in the target directory and are renamed into place, so a
//! reader never sees a partial model. Concurrent writers on the same path are
//! not supported.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::model::TrainedModel;
use crate::utils::error::{ClassifierError, Result, ResultExt};

/// Result of [`ModelCache::get_or_train`]
#[derive(Debug)]
pub enum CacheOutcome {
    /// Loaded from disk, training skipped
    Hit(TrainedModel),
    /// Freshly trained
    Trained(TrainedModel),
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit(_))
    }

    pub fn model(&self) -> &TrainedModel {
        match self {
            CacheOutcome::Hit(model) | CacheOutcome::Trained(model) => model,
        }
    }

    pub fn into_model(self) -> TrainedModel {
        match self {
            CacheOutcome::Hit(model) | CacheOutcome::Trained(model) => model,
        }
    }
}

/// A single model file
#[derive(Debug, Clone)]
pub struct ModelCache {
    path: PathBuf,
}

impl ModelCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the cached model; `None` when there is no file
    pub fn load(&self) -> Result<Option<TrainedModel>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ClassifierError::IoAt {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        TrainedModel::from_json_slice(&bytes)
            .map(Some)
            .map_err(|e| ClassifierError::CacheCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Write the model atomically
    pub fn save(&self, model: &TrainedModel) -> Result<()> {
        let bytes = model.to_json_bytes()?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).with_path(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir).with_path(dir)?;
        file.write_all(&bytes).with_path(&self.path)?;
        file.as_file().sync_all().with_path(&self.path)?;
        file.persist(&self.path).map_err(|e| ClassifierError::IoAt {
            path: self.path.clone(),
            source: e.error,
        })?;

        info!("Saved model to {:?} ({} bytes)", self.path, bytes.len());
        Ok(())
    }

    /// Return the cached model, or train (and save) one.
    ///
    /// A corrupt cache file is logged and treated as a miss. With `use_cache`
    /// off the file is neither read nor written.
    pub fn get_or_train<F>(&self, use_cache: bool, train_fn: F) -> Result<CacheOutcome>
    where
        F: FnOnce() -> Result<TrainedModel>,
    {
        if use_cache {
            match self.load() {
                Ok(Some(model)) => {
                    info!("Loaded cached model from {:?}", self.path);
                    return Ok(CacheOutcome::Hit(model));
                }
                Ok(None) => info!("No cached model at {:?}, training", self.path),
                Err(e @ ClassifierError::CacheCorrupt { .. }) => warn!("{}; retraining", e),
                Err(e) => return Err(e),
            }
        }

        let model = train_fn()?;
        if use_cache {
            self.save(&model)?;
        }
        Ok(CacheOutcome::Trained(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PayloadKind;
    use crate::model::ModelColumns;
    use crate::pipeline::transforms::KeyToValue;
    use crate::pipeline::{ColumnType, FittedStage, Schema};
    use std::cell::Cell;
    use tempfile::tempdir;

    fn model() -> TrainedModel {
        let labels = vec!["carp".to_string(), "trout".to_string()];
        let input = Schema::new()
            .with("Id", ColumnType::Text)
            .with("Label", ColumnType::Text)
            .with("ImagePath", ColumnType::Path)
            .with("Key", ColumnType::Key { labels: labels.clone() })
            .with("Score", ColumnType::Vector { dims: 2 });
        let output = input.clone().with("Predicted", ColumnType::Text);
        TrainedModel::new(
            vec![FittedStage::MapKeyToValue(KeyToValue {
                input: "Key".into(),
                output: "Predicted".into(),
                labels,
            })],
            input,
            output,
            ModelColumns {
                identifier: "Id".into(),
                label: "Label".into(),
                payload: "ImagePath".into(),
                payload_kind: PayloadKind::Path,
                predicted_label: "Predicted".into(),
                score: "Score".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let cache = ModelCache::new(dir.path().join("model.json"));
        assert!(cache.load().unwrap().is_none());
    }

    #[test]
    fn test_trains_once_across_calls() {
        let dir = tempdir().unwrap();
        let cache = ModelCache::new(dir.path().join("nested").join("model.json"));
        let calls = Cell::new(0);
        let train = || {
            calls.set(calls.get() + 1);
            Ok(model())
        };

        let first = cache.get_or_train(true, train).unwrap();
        assert!(!first.is_hit());
        let second = cache.get_or_train(true, train).unwrap();
        assert!(second.is_hit());
        assert_eq!(calls.get(), 1);
        assert_eq!(
            first.model().to_json_bytes().unwrap(),
            second.model().to_json_bytes().unwrap()
        );
    }

    #[test]
    fn test_corrupt_cache_retrains() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"not a model").unwrap();

        let cache = ModelCache::new(&path);
        assert!(matches!(cache.load(), Err(ClassifierError::CacheCorrupt { .. })));

        let outcome = cache.get_or_train(true, || Ok(model())).unwrap();
        assert!(!outcome.is_hit());
        assert!(cache.load().unwrap().is_some());
    }

    #[test]
    fn test_disabled_cache_always_trains() {
        let dir = tempdir().unwrap();
        let cache = ModelCache::new(dir.path().join("model.json"));
        let calls = Cell::new(0);
        for _ in 0..2 {
            cache
                .get_or_train(false, || {
                    calls.set(calls.get() + 1);
                    Ok(model())
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 2);
        assert!(!cache.exists());
    }
}
