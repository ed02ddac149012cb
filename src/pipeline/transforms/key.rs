//! Label <-> key conversion stages
//!
//! `MapValueToKey` learns a label vocabulary and replaces text labels with
//! 0-based keys; `MapKeyToValue` turns keys back into labels using the
//! vocabulary carried by the key column's type.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::pipeline::stage::{Estimator, FitContext, FittedStage, Transformer};
use crate::pipeline::view::{ColumnType, DataView, Schema, Value};
use crate::utils::error::{ClassifierError, Result};

/// Order in which labels receive keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrdinality {
    /// Sorted by label value
    #[default]
    ByValue,
    /// In order of first appearance
    ByOccurrence,
}

/// Estimator: text labels -> keys
#[derive(Debug, Clone)]
pub struct MapValueToKey {
    pub input: String,
    pub output: String,
    pub ordinality: KeyOrdinality,
}

impl MapValueToKey {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ordinality: KeyOrdinality::default(),
        }
    }

    pub fn with_ordinality(mut self, ordinality: KeyOrdinality) -> Self {
        self.ordinality = ordinality;
        self
    }
}

impl Estimator for MapValueToKey {
    fn name(&self) -> &'static str {
        "MapValueToKey"
    }

    fn describe(&self) -> String {
        format!("MapValueToKey({} -> {}, {:?})", self.input, self.output, self.ordinality)
    }

    fn fit(&self, data: &DataView, _ctx: &mut FitContext<'_>) -> Result<FittedStage> {
        let column = data.schema().require(&self.input)?;
        if column.ty != ColumnType::Text {
            return Err(ClassifierError::Config(format!(
                "MapValueToKey expects a text column, '{}' is {}",
                self.input,
                column.ty.describe()
            )));
        }

        let values = data.column(&self.input)?.into_iter().filter_map(Value::as_text);
        let labels: Vec<String> = match self.ordinality {
            KeyOrdinality::ByValue => values
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            KeyOrdinality::ByOccurrence => {
                let mut labels: Vec<String> = Vec::new();
                for value in values {
                    if !labels.iter().any(|l| l == value) {
                        labels.push(value.to_string());
                    }
                }
                labels
            }
        };

        if labels.is_empty() {
            return Err(ClassifierError::Training(format!(
                "column '{}' has no labels to map",
                self.input
            )));
        }

        tracing::debug!("MapValueToKey: {} labels in '{}'", labels.len(), self.input);
        Ok(FittedStage::MapValueToKey(KeyMapping {
            input: self.input.clone(),
            output: self.output.clone(),
            labels,
        }))
    }
}

/// Fitted label -> key mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapping {
    pub input: String,
    pub output: String,
    /// Label for each key, indexed by key
    pub labels: Vec<String>,
}

impl KeyMapping {
    /// Key of a label, `None` when the label was not seen during fitting
    pub fn key_of(&self, label: &str) -> Option<u32> {
        self.labels.iter().position(|l| l == label).map(|i| i as u32)
    }
}

impl Transformer for KeyMapping {
    fn name(&self) -> &'static str {
        "MapValueToKey"
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        input.require(&self.input)?;
        Ok(input.clone().with(
            self.output.clone(),
            ColumnType::Key {
                labels: self.labels.clone(),
            },
        ))
    }

    fn transform(&self, mut data: DataView) -> Result<DataView> {
        let keys = data
            .column(&self.input)?
            .into_iter()
            .map(|value| match value.as_text().and_then(|l| self.key_of(l)) {
                Some(key) => Value::Key(key),
                None => Value::Missing,
            })
            .collect();

        data.set_column(
            &self.output,
            ColumnType::Key {
                labels: self.labels.clone(),
            },
            keys,
        )?;
        Ok(data)
    }
}

/// Estimator: keys -> text labels, fit from the schema alone
#[derive(Debug, Clone)]
pub struct MapKeyToValue {
    pub input: String,
    pub output: String,
}

impl MapKeyToValue {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

impl Estimator for MapKeyToValue {
    fn name(&self) -> &'static str {
        "MapKeyToValue"
    }

    fn describe(&self) -> String {
        format!("MapKeyToValue({} -> {})", self.input, self.output)
    }

    fn needs_rows(&self) -> bool {
        false
    }

    fn fit(&self, data: &DataView, _ctx: &mut FitContext<'_>) -> Result<FittedStage> {
        match &data.schema().require(&self.input)?.ty {
            ColumnType::Key { labels } => Ok(FittedStage::MapKeyToValue(KeyToValue {
                input: self.input.clone(),
                output: self.output.clone(),
                labels: labels.clone(),
            })),
            other => Err(ClassifierError::Config(format!(
                "MapKeyToValue expects a key column, '{}' is {}",
                self.input,
                other.describe()
            ))),
        }
    }
}

/// Fitted key -> label mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyToValue {
    pub input: String,
    pub output: String,
    pub labels: Vec<String>,
}

impl Transformer for KeyToValue {
    fn name(&self) -> &'static str {
        "MapKeyToValue"
    }

    fn output_schema(&self, input: &Schema) -> Result<Schema> {
        input.require(&self.input)?;
        Ok(input.clone().with(self.output.clone(), ColumnType::Text))
    }

    fn transform(&self, mut data: DataView) -> Result<DataView> {
        let labels = data
            .column(&self.input)?
            .into_iter()
            .map(|value| {
                value
                    .as_key()
                    .and_then(|k| self.labels.get(k as usize))
                    .map_or(Value::Missing, |l| Value::Text(l.clone()))
            })
            .collect();

        data.set_column(&self.output, ColumnType::Text, labels)?;
        Ok(data)
    }
}
