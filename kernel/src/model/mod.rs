// Model Artifacts
//
// A fitted classifier plus the metadata needed to audit it. The training
// routine itself is a collaborator behind `Trainer`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::{Dataset, DatasetError};

pub mod centroid;

pub use centroid::{CentroidClassifier, CentroidTrainer};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrainingError {
    #[error("label column `{0}` not found")]
    MissingLabel(String),

    #[error("training dataset is empty")]
    Empty,

    #[error("label column `{label}` has {classes} distinct class(es); at least 2 required")]
    DegenerateLabels { label: String, classes: usize },

    #[error("no feature columns besides the label")]
    NoFeatures,

    #[error("dataset does not match the model's features: {0}")]
    Dataset(#[from] DatasetError),
}

/// Fitted classifier variants an artifact can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    NearestCentroid(CentroidClassifier),
}

impl Classifier {
    fn predict(&self, dataset: &Dataset) -> Result<Vec<String>, TrainingError> {
        match self {
            Classifier::NearestCentroid(model) => model.predict(dataset),
        }
    }
}

/// A fitted classifier and its metadata.
///
/// Exactly one artifact is active per store; superseded artifacts are
/// kept for audit only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: Uuid,
    pub label_column: String,
    pub training_rows: usize,
    pub created_at: DateTime<Utc>,
    /// Accuracy on the held-out split, when one could be carved out.
    pub holdout_accuracy: Option<f64>,
    pub classifier: Classifier,
}

impl ModelArtifact {
    pub fn predict(&self, dataset: &Dataset) -> Result<Vec<String>, TrainingError> {
        self.classifier.predict(dataset)
    }

    /// Share of rows whose predicted label matches the label column.
    pub fn accuracy(&self, dataset: &Dataset) -> Result<f64, TrainingError> {
        if dataset.is_empty() {
            return Err(TrainingError::Empty);
        }
        let labels = dataset
            .column_values(&self.label_column)
            .map_err(|_| TrainingError::MissingLabel(self.label_column.clone()))?;
        let predictions = self.predict(dataset)?;

        let correct = labels
            .iter()
            .zip(&predictions)
            .filter(|(label, predicted)| label.key() == **predicted)
            .count();
        Ok(correct as f64 / dataset.len() as f64)
    }
}

/// Capability to fit a classifier on a labeled dataset.
///
/// Implementations must return `TrainingError` rather than panic on
/// degenerate inputs such as a single-class label column.
pub trait Trainer: Send + Sync {
    fn fit(&self, dataset: &Dataset, label_column: &str) -> Result<ModelArtifact, TrainingError>;
}
