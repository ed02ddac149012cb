//! Image folder enumeration
//!
//! Two layouts are supported:
//! ```text
//! training/               test/
//! ├── carp/               ├── 01.jpg
//! │   ├── 01.jpg          └── 02.jpg
//! │   └── 02.jpg
//! └── trout/
//!     └── ...
//! ```
//! The class-folder layout yields labeled samples (label = first path segment
//! below the root), the flat layout yields unlabeled ones. Enumeration is
//! sorted by file name so every run sees the same order.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dataset::sample::{Payload, Sample};
use crate::utils::error::{ClassifierError, Result, ResultExt};

/// File extensions treated as images
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

/// How sample payloads are materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadMode {
    /// Keep the file path, decode later
    #[default]
    Lazy,
    /// Read raw bytes during enumeration
    Eager,
}

/// Anything that can produce samples
pub trait SampleSource {
    fn samples(&self) -> Result<Vec<Sample>>;
}

/// Check whether a path has an image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map_or(false, |ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Labeled samples from `<root>/<label>/**/<image>`
#[derive(Debug, Clone)]
pub struct ClassFolderSource {
    root: PathBuf,
    mode: PayloadMode,
}

impl ClassFolderSource {
    pub fn new(root: impl Into<PathBuf>, mode: PayloadMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }
}

impl SampleSource for ClassFolderSource {
    fn samples(&self) -> Result<Vec<Sample>> {
        info!("Loading labeled images from: {:?}", self.root);
        ensure_dir(&self.root)?;

        let mut samples = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| walk_error(&self.root, e))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image_file(path) {
                continue;
            }

            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let mut components = relative.components();
            let label = match (components.next(), components.next()) {
                (Some(first), Some(_)) => first.as_os_str().to_string_lossy().into_owned(),
                _ => {
                    warn!("Skipping {:?}: image is not inside a class folder", path);
                    continue;
                }
            };

            samples.push(Sample::labeled(
                path.display().to_string(),
                label,
                load_payload(path, self.mode)?,
            ));
        }

        info!("Loaded {} labeled images", samples.len());
        Ok(samples)
    }
}

/// Unlabeled samples from the images directly inside `root`
#[derive(Debug, Clone)]
pub struct FlatFolderSource {
    root: PathBuf,
    mode: PayloadMode,
}

impl FlatFolderSource {
    pub fn new(root: impl Into<PathBuf>, mode: PayloadMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }
}

impl SampleSource for FlatFolderSource {
    fn samples(&self) -> Result<Vec<Sample>> {
        info!("Loading test images from: {:?}", self.root);
        ensure_dir(&self.root)?;

        let mut samples = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| walk_error(&self.root, e))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image_file(path) {
                debug!("Ignoring non-image entry {:?}", path);
                continue;
            }

            let identifier = entry.file_name().to_string_lossy().into_owned();
            samples.push(Sample::unlabeled(identifier, load_payload(path, self.mode)?));
        }

        info!("Loaded {} test images", samples.len());
        Ok(samples)
    }
}

fn ensure_dir(root: &Path) -> Result<()> {
    let metadata = std::fs::metadata(root).with_path(root)?;
    if metadata.is_dir() {
        Ok(())
    } else {
        Err(ClassifierError::IoAt {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        })
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> ClassifierError {
    let path = err.path().unwrap_or(root).to_path_buf();
    ClassifierError::IoAt {
        path,
        source: err.into(),
    }
}

fn load_payload(path: &Path, mode: PayloadMode) -> Result<Payload> {
    match mode {
        PayloadMode::Lazy => Ok(Payload::Path(path.to_path_buf())),
        PayloadMode::Eager => Ok(Payload::Bytes(std::fs::read(path).with_path(path)?)),
    }
}
