//! Bottleneck values and their cache
//!
//! A bottleneck is the pooled backbone output for one image. Computing it is
//! the expensive part of end-to-end training, so values are cached by sample
//! identifier and can be persisted to a workspace directory between runs.
//! A cached value is only served when the image content fingerprint still
//! matches, and a cache file is only reused for the same backbone weights.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use burn::tensor::{Tensor, TensorData};
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::backend::{DefaultBackend, Device};
use crate::model::graph::{ConvGraph, ConvGraphConfig};
use crate::model::{IMAGENET_MEAN, IMAGENET_STD};
use crate::pipeline::transforms::image::{decode_bytes, decode_file};
use crate::pipeline::view::Value;
use crate::utils::error::{ClassifierError, Result, ResultExt};

/// Hex SHA-256 of `data`
pub fn content_fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Frozen backbone producing bottleneck values
#[derive(Debug, Clone)]
pub struct Backbone {
    pub graph: ConvGraph<DefaultBackend>,
    pub config: ConvGraphConfig,
    /// Images are resized to `input_size` x `input_size`
    pub input_size: u32,
    pub device: Device,
}

impl Backbone {
    /// Width of a bottleneck vector
    pub fn dims(&self) -> usize {
        self.config
            .layer_dims(crate::model::POOLED_LAYER)
            .unwrap_or_default()
    }

    /// Identifies the backbone by input size and weight content
    pub fn signature(&self) -> Result<String> {
        let weights = self.graph.encode_weights()?;
        Ok(format!("{}:{}", self.input_size, content_fingerprint(weights.as_bytes())))
    }

    /// Decode a path or bytes value and resize it for the backbone
    pub fn prepare(&self, value: &Value) -> std::result::Result<RgbImage, String> {
        let image = match value {
            Value::Bytes(bytes) => decode_bytes(bytes)?,
            Value::Path(path) => decode_file(path)?,
            Value::Text(path) => decode_file(Path::new(path))?,
            Value::Image(image) => image.clone(),
            Value::Missing => return Err("no image data".to_string()),
            _ => return Err("value is not an image".to_string()),
        };

        if image.dimensions() == (self.input_size, self.input_size) {
            Ok(image)
        } else {
            Ok(image::imageops::resize(
                &image,
                self.input_size,
                self.input_size,
                FilterType::Triangle,
            ))
        }
    }

    /// Bottlenecks for a batch of prepared images
    pub fn bottlenecks(&self, images: &[&RgbImage]) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let side = self.input_size as usize;
        let plane = side * side;

        // CHW, scaled to [0, 1] and normalized with ImageNet statistics
        let mut flat = vec![0.0f32; images.len() * 3 * plane];
        for (i, image) in images.iter().enumerate() {
            let base = i * 3 * plane;
            for (x, y, pixel) in image.enumerate_pixels() {
                let pos = y as usize * side + x as usize;
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    flat[base + c * plane + pos] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
                }
            }
        }

        let x = Tensor::<DefaultBackend, 4>::from_data(
            TensorData::new(flat, [images.len(), 3, side, side]),
            &self.device,
        );
        let pooled = self.graph.pooled(x);
        let [_, dims] = pooled.dims();
        let values = pooled
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Model(format!("backbone output: {:?}", e)))?;

        Ok(values.chunks(dims).map(<[f32]>::to_vec).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedBottleneck {
    /// Fingerprint of the prepared image the values were computed from
    fingerprint: String,
    values: Vec<f32>,
}

/// Bottleneck values keyed by sample identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BottleneckCache {
    /// Identifies the backbone the values were computed with
    pub signature: String,
    entries: BTreeMap<String, CachedBottleneck>,
}

impl BottleneckCache {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Cached values for `identifier`, if they were computed from the same content
    pub fn get(&self, identifier: &str, fingerprint: &str) -> Option<&[f32]> {
        self.entries
            .get(identifier)
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| entry.values.as_slice())
    }

    pub fn insert(&mut self, identifier: impl Into<String>, fingerprint: impl Into<String>, values: Vec<f32>) {
        self.entries.insert(
            identifier.into(),
            CachedBottleneck {
                fingerprint: fingerprint.into(),
                values,
            },
        );
    }

    /// Drop entries whose identifier is not in `identifiers`; returns how many were dropped
    pub fn retain<'a>(&mut self, identifiers: impl IntoIterator<Item = &'a str>) -> usize {
        let keep: BTreeSet<&str> = identifiers.into_iter().collect();
        let before = self.entries.len();
        self.entries.retain(|identifier, _| keep.contains(identifier.as_str()));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a persisted cache; a missing, unreadable or foreign file yields an empty cache
    pub fn load_or_new(path: &Path, signature: &str) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(_) => return Self::new(signature),
        };

        match serde_json::from_slice::<BottleneckCache>(&bytes) {
            Ok(cache) if cache.signature == signature => {
                debug!("Loaded {} cached bottlenecks from {:?}", cache.len(), path);
                cache
            }
            Ok(_) => {
                warn!("Ignoring bottleneck cache {:?}: computed with a different backbone", path);
                Self::new(signature)
            }
            Err(e) => {
                warn!("Ignoring unreadable bottleneck cache {:?}: {}", path, e);
                Self::new(signature)
            }
        }
    }

    /// Persist atomically (temp file in the same directory, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).with_path(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir).with_path(dir)?;
        file.write_all(&serde_json::to_vec(self)?).with_path(path)?;
        file.persist(path)
            .map_err(|e| ClassifierError::IoAt {
                path: path.to_path_buf(),
                source: e.error,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::default_device;
    use crate::test_support::png_bytes;
    use tempfile::tempdir;

    fn backbone() -> Backbone {
        let config = ConvGraphConfig::new()
            .with_base_filters(4)
            .with_depth(2)
            .with_embedding_size(4);
        let device = default_device();
        Backbone {
            graph: config.init(&device),
            config,
            input_size: 8,
            device,
        }
    }

    #[test]
    fn test_prepare_and_compute() {
        let backbone = backbone();
        let image = backbone
            .prepare(&Value::Bytes(png_bytes([10, 200, 30], 20)))
            .unwrap();
        assert_eq!(image.dimensions(), (8, 8));

        let values = backbone.bottlenecks(&[&image, &image]).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].len(), backbone.dims());
        assert_eq!(values[0], values[1]);

        assert!(backbone.prepare(&Value::Bytes(vec![1, 2, 3])).is_err());
    }

    #[test]
    fn test_cache_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ws").join("train_bottlenecks.json");

        let mut cache = BottleneckCache::new("standard:96");
        cache.insert("a.png", "f1", vec![0.5, 1.5]);
        cache.save(&path).unwrap();

        let loaded = BottleneckCache::load_or_new(&path, "standard:96");
        assert_eq!(loaded, cache);

        let foreign = BottleneckCache::load_or_new(&path, "wide:128");
        assert!(foreign.is_empty());

        std::fs::write(&path, b"{not json").unwrap();
        assert!(BottleneckCache::load_or_new(&path, "standard:96").is_empty());
    }

    #[test]
    fn test_changed_content_is_not_served() {
        let mut cache = BottleneckCache::new("sig");
        cache.insert("fish.png", content_fingerprint(b"old pixels"), vec![1.0]);

        assert_eq!(cache.get("fish.png", &content_fingerprint(b"old pixels")), Some(&[1.0][..]));
        assert_eq!(cache.get("fish.png", &content_fingerprint(b"new pixels")), None);
        assert_eq!(cache.get("other.png", &content_fingerprint(b"old pixels")), None);
    }

    #[test]
    fn test_retain_drops_vanished_samples() {
        let mut cache = BottleneckCache::new("sig");
        cache.insert("a.png", "fa", vec![1.0]);
        cache.insert("b.png", "fb", vec![2.0]);
        cache.insert("c.png", "fc", vec![3.0]);

        assert_eq!(cache.retain(["a.png", "c.png"]), 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b.png", "fb").is_none());
    }

    #[test]
    fn test_signature_tracks_weights() {
        let device = default_device();
        let config = ConvGraphConfig::new()
            .with_base_filters(4)
            .with_depth(2)
            .with_embedding_size(4);
        let with_seed = |seed: u64| Backbone {
            graph: config.init_seeded(seed, &device),
            config: config.clone(),
            input_size: 8,
            device: device.clone(),
        };

        assert_eq!(with_seed(1).signature().unwrap(), with_seed(1).signature().unwrap());
        assert_ne!(with_seed(1).signature().unwrap(), with_seed(2).signature().unwrap());
    }
}
