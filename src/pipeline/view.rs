//! Tabular data flowing between pipeline stages
//!
//! A [`DataView`] is a [`Schema`] (ordered, named, typed columns) plus rows of
//! [`Value`]s. Key columns carry their label vocabulary in the schema, so a
//! stage that maps keys back to labels can be fit without looking at rows.

use std::path::PathBuf;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::utils::error::{ClassifierError, Result};

/// Type of a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Path,
    Bytes,
    /// Decoded RGB image; size is known once a resize stage ran
    Image { size: Option<(u32, u32)> },
    /// Fixed-length float vector
    Vector { dims: usize },
    /// 0-based index into `labels`
    Key { labels: Vec<String> },
}

impl ColumnType {
    /// Short name used in schema descriptions
    pub fn describe(&self) -> String {
        match self {
            ColumnType::Text => "text".to_string(),
            ColumnType::Path => "path".to_string(),
            ColumnType::Bytes => "bytes".to_string(),
            ColumnType::Image { size: Some((w, h)) } => format!("image[{}x{}]", w, h),
            ColumnType::Image { size: None } => "image".to_string(),
            ColumnType::Vector { dims } => format!("vector[{}]", dims),
            ColumnType::Key { labels } => format!("key[{}]", labels.len()),
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// Ordered list of columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append (replaces an existing column of the same name)
    pub fn with(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.set_column(name, ty);
        self
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with a configuration error
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.require_index(name).map(|index| &self.columns[index])
    }

    /// Position of a column, failing with a configuration error
    pub fn require_index(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| {
            ClassifierError::Config(format!(
                "unknown column '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    /// Replace the column with this name, or append it; returns its index
    pub fn set_column(&mut self, name: impl Into<String>, ty: ColumnType) -> usize {
        let name = name.into();
        match self.index_of(&name) {
            Some(index) => {
                self.columns[index].ty = ty;
                index
            }
            None => {
                self.columns.push(Column { name, ty });
                self.columns.len() - 1
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether every column of `other` exists here with the same type
    pub fn contains_all(&self, other: &Schema) -> bool {
        other.columns.iter().all(|c| self.get(&c.name) == Some(c))
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Path(PathBuf),
    Bytes(Vec<u8>),
    Image(RgbImage),
    Vector(Vec<f32>),
    Key(u32),
    /// Unknown label or skipped value
    Missing,
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<u32> {
        match self {
            Value::Key(k) => Some(*k),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

/// Schema plus rows
#[derive(Debug, Clone, PartialEq)]
pub struct DataView {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl DataView {
    /// Empty view with the given schema
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// View that carries only a schema, used to fit schema-only stages
    pub fn schema_only(schema: Schema) -> Self {
        Self::new(schema)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.schema.columns.len() {
            return Err(ClassifierError::Config(format!(
                "row has {} values but schema has {} columns",
                row.len(),
                self.schema.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Index of a column, failing with a configuration error
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.schema.require_index(name)
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> Result<Vec<&Value>> {
        let index = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Write a column (replacing one with the same name, or appending)
    pub fn set_column(&mut self, name: &str, ty: ColumnType, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(ClassifierError::Config(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }

        let width = self.schema.columns.len();
        let index = self.schema.set_column(name, ty);
        for (row, value) in self.rows.iter_mut().zip(values) {
            if index == width {
                row.push(value);
            } else {
                row[index] = value;
            }
        }
        Ok(())
    }

    /// Name used for a row in logs and errors: the `Id` column when present
    pub fn row_identifier(&self, row: usize) -> String {
        self.schema
            .index_of(super::ID_COLUMN)
            .and_then(|index| self.rows.get(row)?.get(index)?.as_text().map(str::to_string))
            .unwrap_or_else(|| format!("row {}", row))
    }

    /// Keep only rows whose mask entry is true
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.rows.retain(|_| flags.next().copied().unwrap_or(false));
    }

    /// New view with the given rows, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> DataView {
        DataView {
            schema: self.schema.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> DataView {
        let schema = Schema::new()
            .with("Id", ColumnType::Text)
            .with("Label", ColumnType::Text);
        let mut view = DataView::new(schema);
        view.push_row(vec![Value::Text("a".into()), Value::Text("carp".into())])
            .unwrap();
        view.push_row(vec![Value::Text("b".into()), Value::Text("trout".into())])
            .unwrap();
        view
    }

    #[test]
    fn test_set_column_appends_then_replaces() {
        let mut view = view();
        view.set_column("Score", ColumnType::Vector { dims: 1 }, vec![
            Value::Vector(vec![0.1]),
            Value::Vector(vec![0.9]),
        ])
        .unwrap();
        assert_eq!(view.schema().names(), vec!["Id", "Label", "Score"]);

        view.set_column("Label", ColumnType::Key { labels: vec!["carp".into(), "trout".into()] }, vec![
            Value::Key(0),
            Value::Key(1),
        ])
        .unwrap();
        assert_eq!(view.schema().names(), vec!["Id", "Label", "Score"]);
        assert_eq!(view.rows()[1][1], Value::Key(1));
    }

    #[test]
    fn test_set_column_length_mismatch() {
        let mut view = view();
        let err = view
            .set_column("Score", ColumnType::Text, vec![Value::Missing])
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Config(_)));
    }

    #[test]
    fn test_unknown_column() {
        let view = view();
        assert!(matches!(view.column("Nope"), Err(ClassifierError::Config(_))));
        assert_eq!(view.column("Id").unwrap().len(), 2);
    }

    #[test]
    fn test_retain_and_select_rows() {
        let mut view = view();
        let reordered = view.select_rows(&[1, 0]);
        assert_eq!(reordered.rows()[0][0], Value::Text("b".into()));

        view.retain_rows(&[false, true]);
        assert_eq!(view.num_rows(), 1);
        assert_eq!(view.rows()[0][0], Value::Text("b".into()));
    }

    #[test]
    fn test_schema_contains_all() {
        let full = view().schema().clone();
        let partial = Schema::new().with("Label", ColumnType::Text);
        assert!(full.contains_all(&partial));
        assert!(!partial.contains_all(&full));
    }
}
