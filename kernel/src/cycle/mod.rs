// Retrain Cycle
//
// One drift-check -> blend -> retrain -> persist iteration. The cycle
// computes everything in memory, checks its invariants, and only then
// hands the new reference, model and report to the store as one commit.
// Any failure before the commit leaves the store as it was.

use tracing::{info, warn};

use crate::blend::{BlendError, Blender};
use crate::config::{ConfigError, ControlConfig};
use crate::dataset::{Dataset, DatasetError};
use crate::drift::{DriftError, DriftEvaluator, DriftReport, StatisticalEvaluator};
use crate::model::{CentroidTrainer, ModelArtifact, Trainer, TrainingError};
use crate::severity::{SeverityClassifier, SeverityTier};
use crate::store::{ArtifactStore, Commit, StoreError};

pub mod invariants;
pub mod state;

pub use invariants::{InvariantEngine, InvariantViolation};
pub use state::{CycleEvent, CycleState, CycleStateMachine, StateError};

use invariants::CycleSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("reference and current are not comparable: {0}")]
    SchemaMismatch(#[source] DatasetError),

    #[error("current dataset is empty; nothing to blend in")]
    InsufficientData,

    #[error("blending failed: {0}")]
    Blend(#[source] BlendError),

    #[error("model training failed: {0}")]
    Retrain(#[from] TrainingError),

    #[error("{0}")]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("persisting cycle output failed: {0}")]
    Store(#[from] StoreError),
}

impl From<DriftError> for CycleError {
    fn from(err: DriftError) -> Self {
        match err {
            DriftError::SchemaMismatch(source) => CycleError::SchemaMismatch(source),
        }
    }
}

impl From<BlendError> for CycleError {
    fn from(err: BlendError) -> Self {
        match err {
            BlendError::InsufficientData => CycleError::InsufficientData,
            BlendError::SchemaMismatch(source) => CycleError::SchemaMismatch(source),
            other => CycleError::Blend(other),
        }
    }
}

/// Outcome of one cycle.
///
/// When `triggered` is false every optional field is `None` and nothing
/// was persisted.
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub state: CycleState,
    /// Store generation after the cycle; unchanged when skipped.
    pub generation: u64,
    pub report_before: DriftReport,
    pub severity_before: SeverityTier,
    pub triggered: bool,
    pub report_after: Option<DriftReport>,
    pub severity_after: Option<SeverityTier>,
    pub rows_replaced: Option<usize>,
    pub blend_fraction: Option<f64>,
    pub new_reference: Option<Dataset>,
    pub new_model: Option<ModelArtifact>,
}

pub struct RetrainCycle {
    evaluator: Box<dyn DriftEvaluator>,
    trainer: Box<dyn Trainer>,
    blender: Blender,
    severity: SeverityClassifier,
    invariants: InvariantEngine,
    label_column: String,
}

impl RetrainCycle {
    pub fn new(
        evaluator: Box<dyn DriftEvaluator>,
        trainer: Box<dyn Trainer>,
        blender: Blender,
        severity: SeverityClassifier,
        label_column: impl Into<String>,
    ) -> Self {
        Self {
            evaluator,
            trainer,
            blender,
            severity,
            invariants: InvariantEngine::standard(),
            label_column: label_column.into(),
        }
    }

    /// Cycle wired with the statistical evaluator and centroid trainer.
    pub fn from_config(config: &ControlConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            Box::new(StatisticalEvaluator::new(&config.drift)),
            Box::new(CentroidTrainer::default()),
            Blender::new(&config.blend, config.seed),
            SeverityClassifier::from_thresholds(&config.severity)?,
            config.label_column.clone(),
        ))
    }

    pub fn severity(&self) -> &SeverityClassifier {
        &self.severity
    }

    pub fn evaluate(&self, reference: &Dataset, current: &Dataset) -> Result<DriftReport, CycleError> {
        Ok(self.evaluator.evaluate(reference, current)?)
    }

    /// Fit a model outside any cycle, used when installing a baseline.
    pub fn fit_baseline(&self, dataset: &Dataset) -> Result<ModelArtifact, CycleError> {
        Ok(self.trainer.fit(dataset, &self.label_column)?)
    }

    /// Run one cycle against `store`.
    ///
    /// Retraining happens only when the measured ratio is strictly
    /// greater than `trigger_threshold`. `base_generation` is the store
    /// generation `reference` was read at; the commit fails with a store
    /// conflict if another writer has published since.
    pub fn run(
        &mut self,
        store: &mut dyn ArtifactStore,
        base_generation: u64,
        reference: &Dataset,
        current: &Dataset,
        trigger_threshold: f64,
    ) -> Result<CycleResult, CycleError> {
        let mut sm = CycleStateMachine::new();

        let report_before = self.evaluator.evaluate(reference, current)?;
        sm.apply(CycleEvent::Evaluate)?;
        let severity_before = self.severity.classify(report_before.ratio);

        if report_before.ratio <= trigger_threshold {
            sm.apply(CycleEvent::Skip)?;
            info!(
                ratio = report_before.ratio,
                trigger_threshold,
                "drift below trigger, cycle skipped"
            );
            return Ok(CycleResult {
                state: sm.current_state(),
                generation: base_generation,
                report_before,
                severity_before,
                triggered: false,
                report_after: None,
                severity_after: None,
                rows_replaced: None,
                blend_fraction: None,
                new_reference: None,
                new_model: None,
            });
        }
        sm.apply(CycleEvent::Trigger)?;
        info!(
            ratio = report_before.ratio,
            trigger_threshold,
            severity = ?severity_before,
            "drift above trigger, retraining"
        );

        let blended = self.blender.blend(reference, current, None)?;
        sm.apply(CycleEvent::Blend)?;

        let training_set = blended.dataset.concat(current).map_err(CycleError::SchemaMismatch)?;
        let model = self
            .trainer
            .fit(&training_set, &self.label_column)
            .map_err(|err| {
                warn!(error = %err, "retraining failed");
                CycleError::Retrain(err)
            })?;
        sm.apply(CycleEvent::Retrain)?;

        let report_after = self.evaluator.evaluate(&blended.dataset, current)?;

        self.invariants.evaluate(&CycleSnapshot {
            reference,
            current,
            new_reference: &blended.dataset,
            report_before: &report_before,
            report_after: &report_after,
            rows_replaced: blended.rows_replaced,
        })?;

        let generation = store.commit(Commit {
            expected_generation: base_generation,
            reference: &blended.dataset,
            model: &model,
            report: &report_after,
        })?;
        sm.apply(CycleEvent::Persist)?;

        let severity_after = self.severity.classify(report_after.ratio);
        info!(
            ratio_before = report_before.ratio,
            ratio_after = report_after.ratio,
            rows_replaced = blended.rows_replaced,
            model_id = %model.id,
            generation,
            "cycle persisted"
        );

        Ok(CycleResult {
            state: sm.current_state(),
            generation,
            report_before,
            severity_before,
            triggered: true,
            report_after: Some(report_after),
            severity_after: Some(severity_after),
            rows_replaced: Some(blended.rows_replaced),
            blend_fraction: Some(blended.fraction),
            new_reference: Some(blended.dataset),
            new_model: Some(model),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::BlendSettings;
    use crate::drift::{ColumnDrift, ColumnKind, DriftTest};
    use crate::simulate::{ChurnScenario, DatasetFactory};
    use crate::store::{Baseline, InMemoryStore};

    /// Evaluator reporting the same ratio for every comparison.
    pub(crate) struct FixedRatio(pub f64);

    impl DriftEvaluator for FixedRatio {
        fn evaluate(&self, reference: &Dataset, current: &Dataset) -> Result<DriftReport, DriftError> {
            reference.check_schema(current).map_err(DriftError::SchemaMismatch)?;
            let total = reference.columns().len();
            let drifted = (self.0 * total as f64).round() as usize;
            let columns = reference
                .columns()
                .iter()
                .enumerate()
                .map(|(i, column)| ColumnDrift {
                    column: column.clone(),
                    kind: ColumnKind::Numeric,
                    test: DriftTest::KolmogorovSmirnov,
                    statistic: 0.0,
                    p_value: 1.0,
                    drifted: i < drifted,
                })
                .collect();
            Ok(DriftReport::from_columns(columns, 0.5))
        }
    }

    /// Trainer that always fails.
    pub(crate) struct BrokenTrainer;

    impl Trainer for BrokenTrainer {
        fn fit(&self, _: &Dataset, label_column: &str) -> Result<ModelArtifact, TrainingError> {
            Err(TrainingError::MissingLabel(label_column.to_string()))
        }
    }

    pub(crate) fn stub_cycle(evaluator: Box<dyn DriftEvaluator>, trainer: Box<dyn Trainer>) -> RetrainCycle {
        RetrainCycle::new(
            evaluator,
            trainer,
            Blender::seeded(&BlendSettings::default(), 17),
            SeverityClassifier::new(0.10, 0.25).unwrap(),
            "Churn",
        )
    }

    fn scenario() -> (Dataset, Dataset) {
        let pair = ChurnScenario::default().generate(21).unwrap();
        (pair.reference, pair.current)
    }

    fn store_for(reference: &Dataset, current: &Dataset) -> InMemoryStore {
        InMemoryStore::new(Baseline {
            reference: reference.clone(),
            current: current.clone(),
            model: None,
        })
    }

    #[test]
    fn high_drift_triggers_and_persists() {
        // 5 of 7 columns drifted: ratio ~0.71.
        let (reference, current) = scenario();
        let mut store = store_for(&reference, &current);
        let mut cycle = stub_cycle(Box::new(FixedRatio(5.0 / 7.0)), Box::new(CentroidTrainer::default()));

        let result = cycle.run(&mut store, 0, &reference, &current, 0.25).unwrap();

        assert!(result.triggered);
        assert_eq!(result.state, CycleState::Persisted);
        assert_eq!(result.severity_before, SeverityTier::High);

        let new_reference = result.new_reference.unwrap();
        assert_eq!(new_reference.len(), reference.len());
        assert_eq!(new_reference.columns(), reference.columns());

        let replaced = result.rows_replaced.unwrap();
        let lo = (0.40 * reference.len() as f64).floor() as usize;
        let hi = (0.60 * reference.len() as f64).floor() as usize;
        assert!((lo..=hi).contains(&replaced));

        assert_eq!(store.reference().unwrap(), new_reference);
        assert_eq!(store.active_model().unwrap().unwrap().id, result.new_model.unwrap().id);
        assert_eq!(
            store.latest_report().unwrap().unwrap().report_id,
            result.report_after.unwrap().report_id
        );
        assert_eq!(store.generation().unwrap(), 1);
        assert_eq!(result.generation, 1);
    }

    #[test]
    fn outdated_base_generation_is_not_committed() {
        let (reference, current) = scenario();
        let mut store = store_for(&reference, &current);
        let mut first = stub_cycle(Box::new(FixedRatio(1.0)), Box::new(CentroidTrainer::default()));
        let mut second = stub_cycle(Box::new(FixedRatio(1.0)), Box::new(CentroidTrainer::default()));

        // Both cycles start from the same generation-0 reference.
        let persisted = first.run(&mut store, 0, &reference, &current, 0.25).unwrap();
        let err = second.run(&mut store, 0, &reference, &current, 0.25).unwrap_err();

        assert!(matches!(
            err,
            CycleError::Store(StoreError::Conflict { expected: 0, actual: 1 })
        ));
        assert_eq!(store.generation().unwrap(), 1);
        assert_eq!(store.reference().unwrap(), persisted.new_reference.unwrap());
        assert_eq!(store.active_model().unwrap().unwrap().id, persisted.new_model.unwrap().id);
    }

    #[test]
    fn low_drift_skips_without_persisting() {
        let (reference, current) = scenario();
        let mut store = store_for(&reference, &current);
        let mut cycle = stub_cycle(Box::new(FixedRatio(0.2)), Box::new(CentroidTrainer::default()));

        let result = cycle.run(&mut store, 0, &reference, &current, 0.25).unwrap();

        assert!(!result.triggered);
        assert_eq!(result.state, CycleState::Skipped);
        assert!(result.report_after.is_none());
        assert!(result.rows_replaced.is_none());
        assert!(result.new_reference.is_none());
        assert!(result.new_model.is_none());
        assert_eq!(store.generation().unwrap(), 0);
        assert!(store.latest_report().unwrap().is_none());
    }

    #[test]
    fn ratio_equal_to_trigger_does_not_trigger() {
        let (reference, current) = scenario();
        let mut store = store_for(&reference, &current);
        let mut cycle = stub_cycle(Box::new(FixedRatio(0.0)), Box::new(CentroidTrainer::default()));

        let result = cycle.run(&mut store, 0, &reference, &current, 0.0).unwrap();

        assert!(!result.triggered);
    }

    #[test]
    fn trainer_failure_leaves_store_untouched() {
        let (reference, current) = scenario();
        let mut store = store_for(&reference, &current);
        let mut cycle = stub_cycle(Box::new(FixedRatio(1.0)), Box::new(BrokenTrainer));

        let err = cycle.run(&mut store, 0, &reference, &current, 0.25).unwrap_err();

        assert!(matches!(err, CycleError::Retrain(_)));
        assert!(err.to_string().starts_with("model training failed"));
        assert_eq!(store.reference().unwrap(), reference);
        assert!(store.active_model().unwrap().is_none());
        assert_eq!(store.generation().unwrap(), 0);
    }

    #[test]
    fn empty_current_is_insufficient_data() {
        let (reference, _) = scenario();
        let current = Dataset::empty(reference.columns().to_vec()).unwrap();
        let mut store = store_for(&reference, &current);
        let mut cycle = stub_cycle(Box::new(FixedRatio(1.0)), Box::new(CentroidTrainer::default()));

        let err = cycle.run(&mut store, 0, &reference, &current, 0.25).unwrap_err();
        assert!(matches!(err, CycleError::InsufficientData));
    }

    #[test]
    fn schema_mismatch_surfaces_before_anything_else() {
        let (reference, _) = scenario();
        let current = Dataset::new(vec!["other".into()], vec![vec![1.0.into()]]).unwrap();
        let mut store = InMemoryStore::default();
        let mut cycle = RetrainCycle::from_config(&ControlConfig::default_config()).unwrap();

        let err = cycle.run(&mut store, 0, &reference, &current, 0.25).unwrap_err();
        assert!(matches!(err, CycleError::SchemaMismatch(_)));
    }

    #[test]
    fn statistical_cycle_persists_on_generated_drift() {
        let (reference, current) = scenario();
        let mut store = store_for(&reference, &current);
        let mut config = ControlConfig::default_config();
        config.seed = Some(5);
        let mut cycle = RetrainCycle::from_config(&config).unwrap();

        let result = cycle.run(&mut store, 0, &reference, &current, 0.25).unwrap();

        assert!(result.report_before.ratio > 0.25);
        assert_eq!(result.state, CycleState::Persisted);
        assert_eq!(result.new_model.unwrap().training_rows, (2 * reference.len() * 4) / 5);
    }
}
