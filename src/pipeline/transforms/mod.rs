//! Built-in pipeline stages

pub mod graph;
pub mod image;
pub mod key;

pub use self::graph::{GraphInput, GraphScorer, ScoreGraph};
pub use self::image::{ExtractPixels, LoadImages, ResizeImages};
pub use self::key::{KeyMapping, KeyOrdinality, KeyToValue, MapKeyToValue, MapValueToKey};
