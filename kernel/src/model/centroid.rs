// Nearest-Centroid Trainer
//
// Default `Trainer`: standardized numeric features plus one-hot encoded
// categorical features, one centroid per class, prediction by smallest
// squared Euclidean distance.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{Classifier, ModelArtifact, Trainer, TrainingError};
use crate::dataset::{Dataset, DatasetError, Value};

/// Encoding of one input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Feature {
    Numeric {
        column: String,
        mean: f64,
        scale: f64,
    },
    OneHot {
        column: String,
        categories: Vec<String>,
    },
}

impl Feature {
    fn column(&self) -> &str {
        match self {
            Feature::Numeric { column, .. } | Feature::OneHot { column, .. } => column,
        }
    }

    fn encode(&self, value: &Value, out: &mut Vec<f64>) {
        match self {
            Feature::Numeric { mean, scale, .. } => {
                let v = value.as_numeric().filter(|v| v.is_finite()).unwrap_or(*mean);
                out.push((v - mean) / scale);
            }
            Feature::OneHot { categories, .. } => {
                let key = value.key();
                out.extend(
                    categories
                        .iter()
                        .map(|c| if *c == key { 1.0 } else { 0.0 }),
                );
            }
        }
    }

    fn fit(column: &str, values: &[&Value]) -> Self {
        let numeric: Option<Vec<f64>> = values.iter().map(|v| v.as_numeric()).collect();
        match numeric {
            Some(numbers) => {
                let finite: Vec<f64> = numbers.into_iter().filter(|v| v.is_finite()).collect();
                let n = finite.len().max(1) as f64;
                let mean = finite.iter().sum::<f64>() / n;
                let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = variance.sqrt();
                Feature::Numeric {
                    column: column.to_string(),
                    mean,
                    scale: if std > 1e-12 { std } else { 1.0 },
                }
            }
            None => {
                let categories: BTreeSet<String> = values.iter().map(|v| v.key()).collect();
                Feature::OneHot {
                    column: column.to_string(),
                    categories: categories.into_iter().collect(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCentroid {
    pub label: String,
    pub support: usize,
    pub centroid: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidClassifier {
    pub features: Vec<Feature>,
    pub centroids: Vec<ClassCentroid>,
}

impl CentroidClassifier {
    fn fit(dataset: &Dataset, label_idx: usize, rows: &[usize]) -> Self {
        let features: Vec<Feature> = dataset
            .columns()
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != label_idx)
            .map(|(idx, column)| {
                let values: Vec<&Value> = rows.iter().map(|&r| &dataset.rows()[r][idx]).collect();
                Feature::fit(column, &values)
            })
            .collect();

        let mut classifier = Self {
            features,
            centroids: Vec::new(),
        };

        let indices: Vec<usize> = classifier
            .features
            .iter()
            .filter_map(|f| dataset.column_index(f.column()))
            .collect();

        let mut sums: BTreeMap<String, (usize, Vec<f64>)> = BTreeMap::new();
        for &r in rows {
            let row = &dataset.rows()[r];
            let encoded = classifier.encode(row, &indices);
            let entry = sums
                .entry(row[label_idx].key())
                .or_insert_with(|| (0, vec![0.0; encoded.len()]));
            entry.0 += 1;
            for (acc, v) in entry.1.iter_mut().zip(&encoded) {
                *acc += v;
            }
        }

        classifier.centroids = sums
            .into_iter()
            .map(|(label, (support, sum))| ClassCentroid {
                label,
                support,
                centroid: sum.into_iter().map(|v| v / support as f64).collect(),
            })
            .collect();

        classifier
    }

    fn encode(&self, row: &[Value], indices: &[usize]) -> Vec<f64> {
        let mut out = Vec::new();
        for (feature, &idx) in self.features.iter().zip(indices) {
            feature.encode(&row[idx], &mut out);
        }
        out
    }

    /// Positions of our feature columns in `dataset`.
    fn feature_indices(&self, dataset: &Dataset) -> Result<Vec<usize>, DatasetError> {
        self.features
            .iter()
            .map(|f| {
                dataset
                    .column_index(f.column())
                    .ok_or_else(|| DatasetError::UnknownColumn(f.column().to_string()))
            })
            .collect()
    }

    fn predict_row(&self, row: &[Value], indices: &[usize]) -> String {
        let encoded = self.encode(row, indices);
        self.centroids
            .iter()
            .map(|c| {
                let distance: f64 = c
                    .centroid
                    .iter()
                    .zip(&encoded)
                    .map(|(a, b)| (a - b).powi(2))
                    .sum();
                (distance, &c.label)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, label)| label.clone())
            .unwrap_or_default()
    }

    pub fn predict(&self, dataset: &Dataset) -> Result<Vec<String>, TrainingError> {
        let indices = self.feature_indices(dataset)?;
        Ok(dataset
            .rows()
            .iter()
            .map(|row| self.predict_row(row, &indices))
            .collect())
    }

    fn accuracy_on(&self, dataset: &Dataset, label_idx: usize, rows: &[usize]) -> Option<f64> {
        if rows.is_empty() {
            return None;
        }
        let indices = self.feature_indices(dataset).ok()?;
        let correct = rows
            .iter()
            .filter(|&&r| {
                let row = &dataset.rows()[r];
                self.predict_row(row, &indices) == row[label_idx].key()
            })
            .count();
        Some(correct as f64 / rows.len() as f64)
    }
}

/// Fits a `CentroidClassifier` on a shuffled training split and scores it
/// on the held-out remainder.
#[derive(Debug, Clone)]
pub struct CentroidTrainer {
    pub holdout_share: f64,
    pub seed: u64,
}

impl Default for CentroidTrainer {
    fn default() -> Self {
        Self {
            holdout_share: 0.2,
            seed: 42,
        }
    }
}

/// Minimum rows before a holdout split is carved out.
const MIN_ROWS_FOR_HOLDOUT: usize = 5;

impl Trainer for CentroidTrainer {
    fn fit(&self, dataset: &Dataset, label_column: &str) -> Result<ModelArtifact, TrainingError> {
        let label_idx = dataset
            .column_index(label_column)
            .ok_or_else(|| TrainingError::MissingLabel(label_column.to_string()))?;

        if dataset.is_empty() {
            return Err(TrainingError::Empty);
        }
        if dataset.columns().len() < 2 {
            return Err(TrainingError::NoFeatures);
        }

        let classes = distinct_labels(dataset, label_idx, 0..dataset.len());
        if classes < 2 {
            return Err(TrainingError::DegenerateLabels {
                label: label_column.to_string(),
                classes,
            });
        }

        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.seed));

        let holdout_len = if dataset.len() >= MIN_ROWS_FOR_HOLDOUT {
            (dataset.len() as f64 * self.holdout_share).round() as usize
        } else {
            0
        };
        let (holdout, train) = order.split_at(holdout_len);

        // A split that leaves a single class to train on falls back to all rows.
        let (train, holdout): (&[usize], &[usize]) =
            if distinct_labels(dataset, label_idx, train.iter().copied()) < 2 {
                (order.as_slice(), &order[..0])
            } else {
                (train, holdout)
            };

        let classifier = CentroidClassifier::fit(dataset, label_idx, train);
        let holdout_accuracy = classifier.accuracy_on(dataset, label_idx, holdout);

        debug!(
            training_rows = train.len(),
            holdout_rows = holdout.len(),
            classes,
            holdout_accuracy,
            "centroid classifier fitted"
        );

        Ok(ModelArtifact {
            id: Uuid::new_v4(),
            label_column: label_column.to_string(),
            training_rows: train.len(),
            created_at: Utc::now(),
            holdout_accuracy,
            classifier: Classifier::NearestCentroid(classifier),
        })
    }
}

fn distinct_labels(dataset: &Dataset, label_idx: usize, rows: impl Iterator<Item = usize>) -> usize {
    rows.map(|r| dataset.rows()[r][label_idx].key())
        .collect::<BTreeSet<_>>()
        .len()
}
