//! Image decoding and pixel extraction stages
//!
//! These stages carry no learned state; fitting them only validates the
//! input schema, so they are fit against a schema-only view.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pipeline::stage::{DecodePolicy, Estimator, FitContext, FittedStage, Transformer};
use crate::pipeline::view::{ColumnType, DataView, Schema, Value};
use crate::utils::error::{ClassifierError, Result};

/// Decode an image from raw bytes
pub fn decode_bytes(bytes: &[u8]) -> std::result::Result<RgbImage, String> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| e.to_string())
}

/// Decode an image file
pub fn decode_file(path: &Path) -> std::result::Result<RgbImage, String> {
    ImageReader::open(path)
        .map_err(|e| e.to_string())?
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .decode()
        .map(|img| img.to_rgb8())
        .map_err(|e| e.to_string())
}

/// Decode every value of a column, applying the decode policy to failures.
///
/// Returns the decoded images (or `None` for dropped rows) in row order.
pub(crate) fn decode_column<F>(
    data: &DataView,
    column: &str,
    policy: DecodePolicy,
    stage: &str,
    mut decode: F,
) -> Result<Vec<Option<RgbImage>>>
where
    F: FnMut(&Value) -> std::result::Result<RgbImage, String>,
{
    let values = data.column(column)?;
    let mut images = Vec::with_capacity(values.len());
    let mut skipped = 0usize;

    for (row, value) in values.into_iter().enumerate() {
        match decode(value) {
            Ok(image) => images.push(Some(image)),
            Err(reason) => match policy {
                DecodePolicy::Abort => {
                    return Err(ClassifierError::data(data.row_identifier(row), reason))
                }
                DecodePolicy::Skip => {
                    warn!("{}: skipping '{}': {}", stage, data.row_identifier(row), reason);
                    skipped += 1;
                    images.push(None);
                }
            },
        }
    }

    if skipped > 0 {
        info!("{}: skipped {} undecodable images", stage, skipped);
    }
    Ok(images)
}

/// Decode images from a path or bytes column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadImages {
    pub input: String,
    pub output: String,
    /// Folder that relative paths are resolved against
    pub image_folder: Option<PathBuf>,
    pub on_decode_error: DecodePolicy,
}

impl LoadImages {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            image_folder: None,
            on_decode_error: DecodePolicy::default(),
        }
    }

    pub fn with_image_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.image_folder = Some(folder.into());
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.on_decode_error = policy;
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.image_folder {
            Some(folder) if path.is_relative() => folder.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn decode(&self, value: &Value) -> std::result::Result<RgbImage, String> {
        match value {
            Value::Path(path) => decode_file(&self.resolve(path)),
            Value::Text(path) => decode_file(&self.resolve(Path::new(path))),
            Value::Bytes(bytes) => decode_bytes(bytes),
            Value::Missing => Err("no image data".to_string()),
            _ => Err("value is not a path or bytes".to_string()),
        }
    }
}

impl Transformer for LoadImages {
    fn name(&self) -> &'static str {
        "LoadImages"
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        match input.require(&self.input)?.ty {
            ColumnType::Path | ColumnType::Bytes | ColumnType::Text => Ok(input
                .clone()
                .with(self.output.clone(), ColumnType::Image { size: None })),
            ref other => Err(ClassifierError::Config(format!(
                "LoadImages expects a path or bytes column, '{}' is {}",
                self.input,
                other.describe()
            ))),
        }
    }

    fn transform(&self, mut data: DataView) -> Result<DataView> {
        let images = decode_column(&data, &self.input, self.on_decode_error, "LoadImages", |v| {
            self.decode(v)
        })?;

        let keep: Vec<bool> = images.iter().map(Option::is_some).collect();
        let values = images
            .into_iter()
            .map(|img| img.map_or(Value::Missing, Value::Image))
            .collect();
        data.set_column(&self.output, ColumnType::Image { size: None }, values)?;
        if keep.iter().any(|k| !k) {
            data.retain_rows(&keep);
        }
        Ok(data)
    }
}

impl Estimator for LoadImages {
    fn name(&self) -> &'static str {
        "LoadImages"
    }

    fn describe(&self) -> String {
        format!("LoadImages({} -> {})", self.input, self.output)
    }

    fn needs_rows(&self) -> bool {
        false
    }

    fn fit(&self, data: &DataView, _ctx: &mut FitContext<'_>) -> Result<FittedStage> {
        Transformer::output_schema(self, data.schema())?;
        Ok(FittedStage::LoadImages(self.clone()))
    }
}

/// Resize decoded images to a fixed size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeImages {
    pub input: String,
    pub output: String,
    pub width: u32,
    pub height: u32,
}

impl ResizeImages {
    pub fn new(input: impl Into<String>, output: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            width,
            height,
        }
    }
}

impl Transformer for ResizeImages {
    fn name(&self) -> &'static str {
        "ResizeImages"
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        match input.require(&self.input)?.ty {
            ColumnType::Image { .. } => Ok(input.clone().with(
                self.output.clone(),
                ColumnType::Image {
                    size: Some((self.width, self.height)),
                },
            )),
            ref other => Err(ClassifierError::Config(format!(
                "ResizeImages expects an image column, '{}' is {}",
                self.input,
                other.describe()
            ))),
        }
    }

    fn transform(&self, mut data: DataView) -> Result<DataView> {
        let resized = data
            .column(&self.input)?
            .into_iter()
            .map(|value| match value {
                Value::Image(img) if img.dimensions() == (self.width, self.height) => {
                    Value::Image(img.clone())
                }
                Value::Image(img) => Value::Image(image::imageops::resize(
                    img,
                    self.width,
                    self.height,
                    FilterType::Triangle,
                )),
                _ => Value::Missing,
            })
            .collect();

        data.set_column(
            &self.output,
            ColumnType::Image {
                size: Some((self.width, self.height)),
            },
            resized,
        )?;
        Ok(data)
    }
}

impl Estimator for ResizeImages {
    fn name(&self) -> &'static str {
        "ResizeImages"
    }

    fn describe(&self) -> String {
        format!(
            "ResizeImages({} -> {}, {}x{})",
            self.input, self.output, self.width, self.height
        )
    }

    fn needs_rows(&self) -> bool {
        false
    }

    fn fit(&self, data: &DataView, _ctx: &mut FitContext<'_>) -> Result<FittedStage> {
        Transformer::output_schema(self, data.schema())?;
        Ok(FittedStage::ResizeImages(self.clone()))
    }
}

/// Flatten an image into a float vector: `(pixel - offset) * scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractPixels {
    pub input: String,
    pub output: String,
    /// Channels-last (`HWC`) when true, planar (`CHW`) otherwise
    pub interleave: bool,
    pub offset: f32,
    pub scale: f32,
}

impl ExtractPixels {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            interleave: true,
            offset: 117.0,
            scale: 1.0,
        }
    }

    pub fn with_interleave(mut self, interleave: bool) -> Self {
        self.interleave = interleave;
        self
    }

    pub fn with_offset(mut self, offset: f32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    fn size(&self, input: &Schema) -> Result<(u32, u32)> {
        match input.require(&self.input)?.ty {
            ColumnType::Image { size: Some(size) } => Ok(size),
            ref other => Err(ClassifierError::Config(format!(
                "ExtractPixels expects a resized image column, '{}' is {}",
                self.input,
                other.describe()
            ))),
        }
    }

    /// Pixel values of one image in the configured layout
    pub fn extract(&self, img: &RgbImage) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let plane = (width * height) as usize;
        let mut out = vec![0.0f32; plane * 3];

        for (x, y, pixel) in img.enumerate_pixels() {
            let pos = (y * width + x) as usize;
            for c in 0..3 {
                let value = (pixel[c] as f32 - self.offset) * self.scale;
                let index = if self.interleave { pos * 3 + c } else { c * plane + pos };
                out[index] = value;
            }
        }
        out
    }
}

impl Transformer for ExtractPixels {
    fn name(&self) -> &'static str {
        "ExtractPixels"
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        let (width, height) = self.size(input)?;
        Ok(input.clone().with(
            self.output.clone(),
            ColumnType::Vector {
                dims: (width * height * 3) as usize,
            },
        ))
    }

    fn transform(&self, mut data: DataView) -> Result<DataView> {
        let (width, height) = self.size(data.schema())?;
        let pixels = data
            .column(&self.input)?
            .into_iter()
            .map(|value| match value {
                Value::Image(img) => Value::Vector(self.extract(img)),
                _ => Value::Missing,
            })
            .collect();

        data.set_column(
            &self.output,
            ColumnType::Vector {
                dims: (width * height * 3) as usize,
            },
            pixels,
        )?;
        Ok(data)
    }
}

impl Estimator for ExtractPixels {
    fn name(&self) -> &'static str {
        "ExtractPixels"
    }

    fn describe(&self) -> String {
        format!(
            "ExtractPixels({} -> {}, interleave={}, offset={}, scale={})",
            self.input, self.output, self.interleave, self.offset, self.scale
        )
    }

    fn needs_rows(&self) -> bool {
        false
    }

    fn fit(&self, data: &DataView, _ctx: &mut FitContext<'_>) -> Result<FittedStage> {
        Transformer::output_schema(self, data.schema())?;
        Ok(FittedStage::ExtractPixels(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ID_COLUMN;
    use crate::test_support::{png_bytes, write_png};
    use image::Rgb;
    use tempfile::tempdir;

    fn bytes_view(payloads: Vec<(&str, Vec<u8>)>) -> DataView {
        let schema = Schema::new()
            .with(ID_COLUMN, ColumnType::Text)
            .with("Image", ColumnType::Bytes);
        let mut view = DataView::new(schema);
        for (id, bytes) in payloads {
            view.push_row(vec![Value::Text(id.into()), Value::Bytes(bytes)])
                .unwrap();
        }
        view
    }

    #[test]
    fn test_load_resize_extract() {
        let view = bytes_view(vec![("a.png", png_bytes([200, 100, 50], 12))]);
        let view = LoadImages::new("Image", "input").transform(view).unwrap();
        let view = ResizeImages::new("input", "input", 4, 4).transform(view).unwrap();
        assert_eq!(
            view.schema().get("input").unwrap().ty,
            ColumnType::Image { size: Some((4, 4)) }
        );

        let view = ExtractPixels::new("input", "pixels").transform(view).unwrap();
        let pixels = view.column("pixels").unwrap()[0].as_vector().unwrap().to_vec();
        assert_eq!(pixels.len(), 48);
        // red channel of the first pixel, offset 117
        assert!((pixels[0] - 83.0).abs() <= 4.0);
    }

    #[test]
    fn test_extract_layouts() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(1, 0, Rgb([4, 5, 6]));

        let interleaved = ExtractPixels::new("i", "o").with_offset(0.0).extract(&img);
        assert_eq!(interleaved, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let planar = ExtractPixels::new("i", "o")
            .with_interleave(false)
            .with_offset(1.0)
            .with_scale(0.5)
            .extract(&img);
        assert_eq!(planar, vec![0.0, 1.5, 0.5, 2.0, 1.0, 2.5]);
    }

    #[test]
    fn test_decode_abort_names_sample() {
        let view = bytes_view(vec![("broken.png", vec![1, 2, 3])]);
        let err = LoadImages::new("Image", "input").transform(view).unwrap_err();
        assert!(matches!(err, ClassifierError::Data { ref identifier, .. } if identifier == "broken.png"));
    }

    #[test]
    fn test_decode_skip_drops_rows() {
        let view = bytes_view(vec![
            ("ok.png", png_bytes([0, 0, 0], 4)),
            ("broken.png", vec![0u8; 8]),
        ]);
        let view = LoadImages::new("Image", "input")
            .with_decode_policy(DecodePolicy::Skip)
            .transform(view)
            .unwrap();
        assert_eq!(view.num_rows(), 1);
        assert_eq!(view.row_identifier(0), "ok.png");
    }

    #[test]
    fn test_image_folder_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("carp.png"), [9, 9, 9], 4);

        let mut view = DataView::new(Schema::new().with("ImagePath", ColumnType::Path));
        view.push_row(vec![Value::Path(PathBuf::from("carp.png"))]).unwrap();

        let out = LoadImages::new("ImagePath", "input")
            .with_image_folder(dir.path())
            .transform(view)
            .unwrap();
        assert!(matches!(out.rows()[0][1], Value::Image(_)));
    }

    #[test]
    fn test_extract_requires_resized_images() {
        let schema = Schema::new().with("input", ColumnType::Image { size: None });
        let err = ExtractPixels::new("input", "pixels")
            .output_schema(&schema)
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Config(_)));
    }
}
