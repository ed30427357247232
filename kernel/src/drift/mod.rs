// Drift Detection
//
// Compares a reference dataset with a current dataset column by column
// and summarizes the share of drifted columns. The statistical engine is
// a pluggable collaborator behind `DriftEvaluator`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::{Dataset, DatasetError};

pub mod statistical;

pub use statistical::StatisticalEvaluator;

/// How a column was interpreted for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Statistical test applied to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftTest {
    KolmogorovSmirnov,
    ChiSquare,
}

/// Drift verdict for a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub column: String,
    pub kind: ColumnKind,
    pub test: DriftTest,
    pub statistic: f64,
    pub p_value: f64,
    pub drifted: bool,
}

/// Aggregate drift report for one reference/current comparison.
///
/// Reports are never mutated; every evaluation produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub columns: Vec<ColumnDrift>,
    pub total_columns: usize,
    pub drifted_columns: usize,
    /// `drifted_columns / total_columns`, 0 when there are no columns.
    pub ratio: f64,
    /// Whether the ratio reached the dataset-level drift share.
    pub dataset_drift: bool,
}

impl DriftReport {
    pub fn from_columns(columns: Vec<ColumnDrift>, dataset_drift_share: f64) -> Self {
        let total_columns = columns.len();
        let drifted_columns = columns.iter().filter(|c| c.drifted).count();
        let ratio = if total_columns == 0 {
            0.0
        } else {
            drifted_columns as f64 / total_columns as f64
        };

        Self {
            report_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            columns,
            total_columns,
            drifted_columns,
            ratio,
            dataset_drift: total_columns > 0 && ratio >= dataset_drift_share,
        }
    }

    /// Names of drifted columns, in column order.
    pub fn drifted(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.drifted)
            .map(|c| c.column.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDrift> {
        self.columns.iter().find(|c| c.column == name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DriftError {
    #[error("reference and current schemas differ: {0}")]
    SchemaMismatch(#[source] DatasetError),
}

/// Capability to compare two datasets of the same schema.
///
/// Implementations must be deterministic for identical inputs and must
/// treat mismatched schemas as an error rather than comparing the
/// overlapping columns.
pub trait DriftEvaluator: Send + Sync {
    fn evaluate(&self, reference: &Dataset, current: &Dataset) -> Result<DriftReport, DriftError>;
}
