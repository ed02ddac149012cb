//! Seeded train/validation splitting
//!
//! The split is deterministic and reproducible using a fixed random seed:
//! items are shuffled with `ChaCha8Rng::seed_from_u64(seed)`, the first
//! `floor(n * ratio)` become the validation set and the rest the train set.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::utils::error::{ClassifierError, Result};

/// Result of splitting a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<T> {
    pub train: Vec<T>,
    pub validation: Vec<T>,
}

/// Splits collections into train and validation parts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetSplitter {
    validation_ratio: f64,
    seed: u64,
}

impl DatasetSplitter {
    /// Create a splitter; the ratio must lie strictly between 0 and 1
    pub fn new(validation_ratio: f64, seed: u64) -> Result<Self> {
        if !validation_ratio.is_finite() || validation_ratio <= 0.0 || validation_ratio >= 1.0 {
            return Err(ClassifierError::Config(format!(
                "validation ratio must lie in (0, 1), got {}",
                validation_ratio
            )));
        }
        Ok(Self {
            validation_ratio,
            seed,
        })
    }

    /// Number of validation items for a collection of `n`
    pub fn validation_count(&self, n: usize) -> usize {
        (n as f64 * self.validation_ratio).floor() as usize
    }

    /// Shuffle in place with this splitter's seed
    pub fn shuffle<T>(&self, items: &mut [T]) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        items.shuffle(&mut rng);
    }

    /// Shuffle and split into train / validation
    pub fn split<T>(&self, mut items: Vec<T>) -> Split<T> {
        let n_validation = self.validation_count(items.len());
        self.shuffle(&mut items);
        let train = items.split_off(n_validation);

        Split {
            train,
            validation: items,
        }
    }
}
