// Tabular Datasets
//
// Immutable, column-ordered tables shared by the drift evaluator,
// the blender and the trainer. Every transformation returns a new
// dataset; inputs are never mutated.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell.
///
/// Serialized untagged so that JSON numbers map to `Numeric` and JSON
/// strings map to `Categorical`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Numeric(f64),
    Categorical(String),
}

impl Value {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Numeric(v) => Some(*v),
            Value::Categorical(_) => None,
        }
    }

    /// Stable textual key, used for category counting and label handling.
    pub fn key(&self) -> String {
        match self {
            Value::Numeric(v) => format!("{v}"),
            Value::Categorical(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Numeric(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Categorical(s.to_string())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("row {row} has {actual} values, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),

    #[error("unknown column `{0}`")]
    UnknownColumn(String),

    #[error("schema mismatch: only in left {left_only:?}, only in right {right_only:?}")]
    SchemaMismatch {
        left_only: Vec<String>,
        right_only: Vec<String>,
    },
}

/// Raw serialized shape; validated on the way in.
#[derive(Deserialize)]
struct RawDataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// An ordered sequence of rows over a fixed set of named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = DatasetError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        Dataset::new(raw.columns, raw.rows)
    }
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, DatasetError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(DatasetError::DuplicateColumn(column.clone()));
            }
        }

        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DatasetError::RowWidth {
                    row: idx,
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
        }

        Ok(Self { columns, rows })
    }

    /// A dataset with the given columns and no rows.
    pub fn empty(columns: Vec<String>) -> Result<Self, DatasetError> {
        Self::new(columns, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&[Value]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>, DatasetError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| DatasetError::UnknownColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Column sets are compared as sets; order may differ.
    pub fn same_schema(&self, other: &Dataset) -> bool {
        self.check_schema(other).is_ok()
    }

    pub fn check_schema(&self, other: &Dataset) -> Result<(), DatasetError> {
        let left: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        let right: HashSet<&str> = other.columns.iter().map(String::as_str).collect();

        if left == right {
            return Ok(());
        }

        let mut left_only: Vec<String> = left.difference(&right).map(|s| s.to_string()).collect();
        let mut right_only: Vec<String> =
            right.difference(&left).map(|s| s.to_string()).collect();
        left_only.sort();
        right_only.sort();

        Err(DatasetError::SchemaMismatch {
            left_only,
            right_only,
        })
    }

    /// For each of our columns, its position in `other`.
    pub(crate) fn column_mapping(&self, other: &Dataset) -> Result<Vec<usize>, DatasetError> {
        self.check_schema(other)?;
        self.columns
            .iter()
            .map(|name| {
                other
                    .column_index(name)
                    .ok_or_else(|| DatasetError::UnknownColumn(name.clone()))
            })
            .collect()
    }

    /// Rows of `self` followed by the rows of `other`, in `self`'s column order.
    pub fn concat(&self, other: &Dataset) -> Result<Dataset, DatasetError> {
        let mapping = self.column_mapping(other)?;

        let mut rows = Vec::with_capacity(self.len() + other.len());
        rows.extend(self.rows.iter().cloned());
        rows.extend(other.rows.iter().map(|row| align(row, &mapping)));

        Ok(Dataset {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Replace rows at the given positions. Used by the blender.
    pub(crate) fn with_rows_replaced(&self, replacements: Vec<(usize, Vec<Value>)>) -> Dataset {
        let mut rows = self.rows.clone();
        for (idx, row) in replacements {
            rows[idx] = row;
        }
        Dataset {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Number of positions whose rows differ between two datasets of the same schema.
    ///
    /// Rows beyond the shorter dataset count as differing.
    pub fn differing_rows(&self, other: &Dataset) -> Result<usize, DatasetError> {
        let mapping = self.column_mapping(other)?;
        let changed = self
            .rows
            .iter()
            .zip(&other.rows)
            .filter(|(ours, theirs)| **ours != align(theirs, &mapping))
            .count();
        Ok(changed + self.len().abs_diff(other.len()))
    }
}

/// Re-orders a row using a mapping produced by `column_mapping`.
pub(crate) fn align(row: &[Value], mapping: &[usize]) -> Vec<Value> {
    mapping.iter().map(|&idx| row[idx].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = Dataset::new(
            cols(&["a", "b"]),
            vec![vec![1.0.into(), 2.0.into()], vec![3.0.into()]],
        )
        .unwrap_err();

        assert_eq!(
            err,
            DatasetError::RowWidth {
                row: 1,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = Dataset::empty(cols(&["a", "a"])).unwrap_err();
        assert_eq!(err, DatasetError::DuplicateColumn("a".into()));
    }

    #[test]
    fn schema_is_order_insensitive() {
        let left = Dataset::empty(cols(&["a", "b"])).unwrap();
        let right = Dataset::empty(cols(&["b", "a"])).unwrap();
        let other = Dataset::empty(cols(&["a", "c"])).unwrap();

        assert!(left.same_schema(&right));
        assert!(matches!(
            left.check_schema(&other),
            Err(DatasetError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn concat_aligns_columns() {
        let left = Dataset::new(cols(&["a", "b"]), vec![vec![1.0.into(), "x".into()]]).unwrap();
        let right = Dataset::new(cols(&["b", "a"]), vec![vec!["y".into(), 2.0.into()]]).unwrap();

        let joined = left.concat(&right).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.row(1).unwrap(), &[Value::Numeric(2.0), "y".into()]);
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let json = r#"{"columns":["tenure","Contract"],"rows":[[12,"Month-to-month"]]}"#;
        let ds: Dataset = serde_json::from_str(json).unwrap();

        assert_eq!(ds.row(0).unwrap()[0], Value::Numeric(12.0));
        assert_eq!(ds.row(0).unwrap()[1], Value::Categorical("Month-to-month".into()));
    }

    #[test]
    fn deserialization_validates_rows() {
        let json = r#"{"columns":["a","b"],"rows":[[1]]}"#;
        assert!(serde_json::from_str::<Dataset>(json).is_err());
    }

    #[test]
    fn differing_rows_counts_positions() {
        let base = Dataset::new(
            cols(&["a"]),
            vec![vec![1.0.into()], vec![2.0.into()], vec![3.0.into()]],
        )
        .unwrap();
        let changed = base.with_rows_replaced(vec![(1, vec![9.0.into()])]);

        assert_eq!(base.differing_rows(&base).unwrap(), 0);
        assert_eq!(base.differing_rows(&changed).unwrap(), 1);
    }
}
