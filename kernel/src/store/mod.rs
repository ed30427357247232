// Artifact Storage Abstraction
//
// Defines the persistence contract for the reference dataset, the
// current dataset, the active model and the latest drift report.
// Implementations may persist to disk, object storage, databases, etc.

use std::io;
use std::path::PathBuf;

use crate::dataset::Dataset;
use crate::drift::DriftReport;
use crate::model::ModelArtifact;

pub mod fs;

pub use fs::FsStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no {0} has been stored yet")]
    Missing(&'static str),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt artifact {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store moved on: commit expected generation {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },
}

/// Everything a successful retrain cycle publishes, as one unit.
///
/// `expected_generation` is the generation the cycle's reference was read
/// at. The store refuses the commit if anything was published since.
#[derive(Debug, Clone, Copy)]
pub struct Commit<'a> {
    pub expected_generation: u64,
    pub reference: &'a Dataset,
    pub model: &'a ModelArtifact,
    pub report: &'a DriftReport,
}

/// Reference and current datasets read together with their generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Basis {
    pub generation: u64,
    pub reference: Dataset,
    pub current: Dataset,
}

/// Initial state installed by bootstrap or a demo reset.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub reference: Dataset,
    pub current: Dataset,
    pub model: Option<ModelArtifact>,
}

/// Storage backend for control-loop artifacts.
///
/// Properties required from implementations:
/// - Whole-unit reads and writes
/// - `commit` is all-or-nothing: readers observe either the previous
///   reference/model/report triple or the new one, never a mix
/// - CAS semantics on generation: a commit whose `expected_generation`
///   is not the current one fails with `Conflict` and changes nothing
/// - Superseded models may be retained for audit but never reactivated
///
/// Implementations MUST NOT:
/// - Mutate stored datasets in place
/// - Expose partially written artifacts
pub trait ArtifactStore: Send + Sync {
    fn reference(&self) -> Result<Dataset, StoreError>;

    fn current(&self) -> Result<Dataset, StoreError>;

    fn active_model(&self) -> Result<Option<ModelArtifact>, StoreError>;

    fn latest_report(&self) -> Result<Option<DriftReport>, StoreError>;

    /// Number of successful commits and resets so far.
    fn generation(&self) -> Result<u64, StoreError>;

    /// Reference and current as of one generation.
    ///
    /// The generation is read first, so a commit landing between the reads
    /// shows up as a `Conflict` later rather than going unnoticed.
    fn basis(&self) -> Result<Basis, StoreError> {
        Ok(Basis {
            generation: self.generation()?,
            reference: self.reference()?,
            current: self.current()?,
        })
    }

    /// Atomically publish a new reference, active model and report, and
    /// return the new generation.
    fn commit(&mut self, commit: Commit<'_>) -> Result<u64, StoreError>;

    /// Replace the latest report without touching reference or model.
    fn record_report(&mut self, report: &DriftReport) -> Result<(), StoreError>;

    /// Install a fresh baseline, clearing the latest report.
    fn reset(&mut self, baseline: Baseline) -> Result<(), StoreError>;
}

/// Volatile store for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    reference: Option<Dataset>,
    current: Option<Dataset>,
    model: Option<ModelArtifact>,
    report: Option<DriftReport>,
    retired: Vec<ModelArtifact>,
    generation: u64,
}

impl InMemoryStore {
    pub fn new(baseline: Baseline) -> Self {
        Self {
            reference: Some(baseline.reference),
            current: Some(baseline.current),
            model: baseline.model,
            ..Self::default()
        }
    }

    /// Models superseded by later commits, oldest first.
    pub fn retired_models(&self) -> &[ModelArtifact] {
        &self.retired
    }
}

impl ArtifactStore for InMemoryStore {
    fn reference(&self) -> Result<Dataset, StoreError> {
        self.reference.clone().ok_or(StoreError::Missing("reference"))
    }

    fn current(&self) -> Result<Dataset, StoreError> {
        self.current.clone().ok_or(StoreError::Missing("current"))
    }

    fn active_model(&self) -> Result<Option<ModelArtifact>, StoreError> {
        Ok(self.model.clone())
    }

    fn latest_report(&self) -> Result<Option<DriftReport>, StoreError> {
        Ok(self.report.clone())
    }

    fn generation(&self) -> Result<u64, StoreError> {
        Ok(self.generation)
    }

    fn commit(&mut self, commit: Commit<'_>) -> Result<u64, StoreError> {
        if commit.expected_generation != self.generation {
            return Err(StoreError::Conflict {
                expected: commit.expected_generation,
                actual: self.generation,
            });
        }

        if let Some(previous) = self.model.replace(commit.model.clone()) {
            self.retired.push(previous);
        }
        self.reference = Some(commit.reference.clone());
        self.report = Some(commit.report.clone());
        self.generation += 1;
        Ok(self.generation)
    }

    fn record_report(&mut self, report: &DriftReport) -> Result<(), StoreError> {
        self.report = Some(report.clone());
        Ok(())
    }

    fn reset(&mut self, baseline: Baseline) -> Result<(), StoreError> {
        if let Some(previous) = self.model.take() {
            self.retired.push(previous);
        }
        self.reference = Some(baseline.reference);
        self.current = Some(baseline.current);
        self.model = baseline.model;
        self.report = None;
        self.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::Value;
    use crate::model::{CentroidTrainer, Trainer};

    pub(crate) fn labeled(offset: f64) -> Dataset {
        Dataset::new(
            vec!["x".into(), "Churn".into()],
            (0..20)
                .map(|i| {
                    vec![
                        Value::Numeric(f64::from(i) + offset),
                        Value::Numeric(f64::from(i % 2)),
                    ]
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn empty_store_reports_missing() {
        let store = InMemoryStore::default();
        assert!(matches!(store.reference(), Err(StoreError::Missing("reference"))));
        assert!(store.active_model().unwrap().is_none());
    }

    #[test]
    fn commit_retires_previous_model() {
        let trainer = CentroidTrainer::default();
        let first = trainer.fit(&labeled(0.0), "Churn").unwrap();
        let second = trainer.fit(&labeled(5.0), "Churn").unwrap();

        let mut store = InMemoryStore::new(Baseline {
            reference: labeled(0.0),
            current: labeled(5.0),
            model: Some(first.clone()),
        });

        let report = DriftReport::from_columns(vec![], 0.5);
        let generation = store
            .commit(Commit {
                expected_generation: 0,
                reference: &labeled(2.0),
                model: &second,
                report: &report,
            })
            .unwrap();

        assert_eq!(generation, 1);
        assert_eq!(store.active_model().unwrap().unwrap().id, second.id);
        assert_eq!(store.retired_models()[0].id, first.id);
        assert_eq!(store.reference().unwrap(), labeled(2.0));
        assert_eq!(store.generation().unwrap(), 1);
    }

    #[test]
    fn commit_on_outdated_generation_conflicts() {
        let trainer = CentroidTrainer::default();
        let model = trainer.fit(&labeled(0.0), "Churn").unwrap();
        let mut store = InMemoryStore::new(Baseline {
            reference: labeled(0.0),
            current: labeled(5.0),
            model: None,
        });
        let report = DriftReport::from_columns(vec![], 0.5);

        store
            .commit(Commit {
                expected_generation: 0,
                reference: &labeled(1.0),
                model: &model,
                report: &report,
            })
            .unwrap();
        let err = store
            .commit(Commit {
                expected_generation: 0,
                reference: &labeled(2.0),
                model: &model,
                report: &report,
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict { expected: 0, actual: 1 }));
        assert_eq!(store.reference().unwrap(), labeled(1.0));
        assert_eq!(store.generation().unwrap(), 1);
    }

    #[test]
    fn basis_carries_generation() {
        let store = InMemoryStore::new(Baseline {
            reference: labeled(0.0),
            current: labeled(5.0),
            model: None,
        });

        let basis = store.basis().unwrap();
        assert_eq!(basis.generation, 0);
        assert_eq!(basis.reference, labeled(0.0));
        assert_eq!(basis.current, labeled(5.0));
    }
}
