//! Application configuration
//!
//! Settings live in one JSON file (`AppConfig::load` / `AppConfig::save`);
//! every field has a default so a missing or partial file is fine. Paths in
//! the backend settings are relative to the assets root unless absolute.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::graph::ConvGraphConfig;
use crate::model::PRE_ACTIVATION_LAYER;
use crate::pipeline::transforms::KeyOrdinality;
use crate::pipeline::DecodePolicy;
use crate::training::{ImageClassificationOptions, MaxEntOptions};
use crate::utils::error::{ClassifierError, Result, ResultExt};

/// Default random seed
pub const DEFAULT_SEED: u64 = 42;

/// Where the program finds its inputs and keeps its models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub root: PathBuf,
    /// Class folders, relative to `root`
    pub training_folder: PathBuf,
    /// Flat folder of images to classify, relative to `root`
    pub test_folder: PathBuf,
    /// Overrides the backend's default model file name
    pub model_file: Option<PathBuf>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
            training_folder: PathBuf::from("fish-images"),
            test_folder: PathBuf::from("test-images"),
            model_file: None,
        }
    }
}

impl AssetsConfig {
    /// Join a relative path onto the assets root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn training_dir(&self) -> PathBuf {
        self.resolve(&self.training_folder)
    }

    pub fn test_dir(&self) -> PathBuf {
        self.resolve(&self.test_folder)
    }
}

/// Settings of the pretrained-graph strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PretrainedGraphConfig {
    /// Burn record of the frozen graph
    pub graph_file: PathBuf,
    pub graph: ConvGraphConfig,
    /// Layer read out as the embedding
    pub layer: String,
    /// Images are resized to `image_size` x `image_size`
    pub image_size: u32,
    /// Channels-last pixel vectors
    pub interleave: bool,
    /// Subtracted from every channel value
    pub offset: f32,
    /// Multiplied after the offset
    pub scale: f32,
    /// Order in which labels receive keys
    pub key_ordinality: KeyOrdinality,
    pub maxent: MaxEntOptions,
    pub on_decode_error: DecodePolicy,
}

impl Default for PretrainedGraphConfig {
    fn default() -> Self {
        Self {
            graph_file: PathBuf::from("inception/feature_graph.mpk"),
            graph: ConvGraphConfig::new(),
            layer: PRE_ACTIVATION_LAYER.to_string(),
            image_size: 224,
            interleave: true,
            offset: 117.0,
            scale: 1.0,
            key_ordinality: KeyOrdinality::default(),
            maxent: MaxEntOptions::default(),
            on_decode_error: DecodePolicy::default(),
        }
    }
}

/// Settings of the end-to-end strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndToEndConfig {
    /// Fraction of the shuffled dataset held out for validation
    pub validation_fraction: f64,
    /// Order in which labels receive keys
    pub key_ordinality: KeyOrdinality,
    pub options: ImageClassificationOptions,
}

impl Default for EndToEndConfig {
    fn default() -> Self {
        Self {
            validation_fraction: crate::dataset::DEFAULT_VALIDATION_FRACTION,
            key_ordinality: KeyOrdinality::default(),
            options: ImageClassificationOptions::default(),
        }
    }
}

/// Which strategy builds the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    PretrainedGraph,
    EndToEnd,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::PretrainedGraph => write!(f, "pretrained-graph"),
            BackendKind::EndToEnd => write!(f, "end-to-end"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "pretrained-graph" | "pretrained" | "v1" => Ok(BackendKind::PretrainedGraph),
            "end-to-end" | "e2e" | "v2" => Ok(BackendKind::EndToEnd),
            other => Err(ClassifierError::Config(format!(
                "unknown backend '{}' (expected pretrained-graph or end-to-end)",
                other
            ))),
        }
    }
}

/// Strategy selection plus its settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    PretrainedGraph(PretrainedGraphConfig),
    EndToEnd(EndToEndConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::PretrainedGraph(PretrainedGraphConfig::default())
    }
}

impl BackendConfig {
    /// Default settings for a strategy
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::PretrainedGraph => BackendConfig::PretrainedGraph(Default::default()),
            BackendKind::EndToEnd => BackendConfig::EndToEnd(Default::default()),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::PretrainedGraph(_) => BackendKind::PretrainedGraph,
            BackendConfig::EndToEnd(_) => BackendKind::EndToEnd,
        }
    }

    /// Model file used when the assets config does not name one
    pub fn default_model_file(&self) -> &'static str {
        match self {
            BackendConfig::PretrainedGraph(_) => "model_v1.json",
            BackendConfig::EndToEnd(_) => "model_v2.json",
        }
    }

    /// Resolve relative file settings against the assets root
    pub fn resolved(&self, assets: &AssetsConfig) -> Self {
        match self {
            BackendConfig::PretrainedGraph(config) => BackendConfig::PretrainedGraph(PretrainedGraphConfig {
                graph_file: assets.resolve(&config.graph_file),
                ..config.clone()
            }),
            BackendConfig::EndToEnd(config) => {
                let mut config = config.clone();
                config.options.backbone_weights = config
                    .options
                    .backbone_weights
                    .as_deref()
                    .map(|p| assets.resolve(p));
                config.options.workspace = config.options.workspace.as_deref().map(|p| assets.resolve(p));
                BackendConfig::EndToEnd(config)
            }
        }
    }

    /// Apply a decode policy to every stage that decodes images
    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        match &mut self {
            BackendConfig::PretrainedGraph(config) => config.on_decode_error = policy,
            BackendConfig::EndToEnd(config) => config.options.on_decode_error = policy,
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            BackendConfig::PretrainedGraph(config) => {
                config.graph.layer_dims(&config.layer)?;
                if config.image_size < config.graph.min_input_size() {
                    return Err(ClassifierError::Config(format!(
                        "image_size {} is below the graph's minimum of {}",
                        config.image_size,
                        config.graph.min_input_size()
                    )));
                }
                if !config.scale.is_finite() || !config.offset.is_finite() {
                    return Err(ClassifierError::Config(
                        "pixel offset and scale must be finite".to_string(),
                    ));
                }
                if config.maxent.max_iterations == 0 || !(config.maxent.learning_rate > 0.0) {
                    return Err(ClassifierError::Config(
                        "maxent needs a positive learning rate and iteration count".to_string(),
                    ));
                }
            }
            BackendConfig::EndToEnd(config) => {
                let ratio = config.validation_fraction;
                if !ratio.is_finite() || ratio <= 0.0 || ratio >= 1.0 {
                    return Err(ClassifierError::Config(format!(
                        "validation_fraction must be in (0, 1), got {}",
                        ratio
                    )));
                }
                if config.options.epochs == 0 || config.options.batch_size == 0 {
                    return Err(ClassifierError::Config(
                        "epochs and batch_size must be positive".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub assets: AssetsConfig,
    pub backend: BackendConfig,
    pub seed: u64,
    /// Load a saved model instead of retraining when one exists
    pub use_cache: bool,
    pub on_decode_error: DecodePolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            assets: AssetsConfig::default(),
            backend: BackendConfig::default(),
            seed: DEFAULT_SEED,
            use_cache: true,
            on_decode_error: DecodePolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?).with_path(path)
    }

    pub fn validate(&self) -> Result<()> {
        self.backend.validate()
    }

    /// Model file for the selected backend
    pub fn model_path(&self) -> PathBuf {
        match &self.assets.model_file {
            Some(file) => self.assets.resolve(file),
            None => self.assets.resolve(Path::new(self.backend.default_model_file())),
        }
    }

    /// Backend settings with paths resolved and the decode policy applied
    pub fn backend_for_run(&self) -> BackendConfig {
        self.backend
            .resolved(&self.assets)
            .with_decode_policy(self.on_decode_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_follow_assets_layout() {
        let config = AppConfig::default();
        assert_eq!(config.seed, 42);
        assert!(config.use_cache);
        assert_eq!(config.assets.training_dir(), PathBuf::from("assets/fish-images"));
        assert_eq!(config.model_path(), PathBuf::from("assets/model_v1.json"));

        let config = AppConfig {
            backend: BackendConfig::for_kind(BackendKind::EndToEnd),
            ..AppConfig::default()
        };
        assert_eq!(config.model_path(), PathBuf::from("assets/model_v2.json"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig {
            backend: BackendConfig::for_kind(BackendKind::EndToEnd),
            seed: 7,
            ..AppConfig::default()
        };
        config.on_decode_error = DecodePolicy::Skip;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.backend.kind(), BackendKind::EndToEnd);
        assert_eq!(loaded.on_decode_error, DecodePolicy::Skip);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "seed": 3, "use_cache": false }"#).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.seed, 3);
        assert!(!loaded.use_cache);
        assert_eq!(loaded.backend.kind(), BackendKind::PretrainedGraph);
    }

    #[test]
    fn test_key_ordinality_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "backend": { "backend": "end_to_end", "key_ordinality": "by_occurrence" } }"#,
        )
        .unwrap();

        match AppConfig::load(&path).unwrap().backend {
            BackendConfig::EndToEnd(e2e) => assert_eq!(e2e.key_ordinality, KeyOrdinality::ByOccurrence),
            other => panic!("unexpected backend {:?}", other),
        }
        assert_eq!(PretrainedGraphConfig::default().key_ordinality, KeyOrdinality::ByValue);
    }

    #[test]
    fn test_validation() {
        let mut e2e = EndToEndConfig::default();
        e2e.validation_fraction = 1.0;
        assert!(BackendConfig::EndToEnd(e2e).validate().is_err());

        let mut v1 = PretrainedGraphConfig::default();
        v1.layer = "logits".to_string();
        assert!(BackendConfig::PretrainedGraph(v1).validate().is_err());

        assert!(BackendConfig::default().validate().is_ok());
    }

    #[test]
    fn test_resolved_paths_and_policy() {
        let assets = AssetsConfig {
            root: PathBuf::from("/data"),
            ..AssetsConfig::default()
        };
        match BackendConfig::default().resolved(&assets) {
            BackendConfig::PretrainedGraph(config) => {
                assert_eq!(config.graph_file, PathBuf::from("/data/inception/feature_graph.mpk"))
            }
            other => panic!("unexpected backend {:?}", other.kind()),
        }

        let backend = BackendConfig::for_kind(BackendKind::EndToEnd).with_decode_policy(DecodePolicy::Skip);
        match backend {
            BackendConfig::EndToEnd(config) => assert_eq!(config.options.on_decode_error, DecodePolicy::Skip),
            other => panic!("unexpected backend {:?}", other.kind()),
        }
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("end_to_end".parse::<BackendKind>().unwrap(), BackendKind::EndToEnd);
        assert_eq!("V1".parse::<BackendKind>().unwrap(), BackendKind::PretrainedGraph);
        assert!("inception".parse::<BackendKind>().is_err());
    }
}
