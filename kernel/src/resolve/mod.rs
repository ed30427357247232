// Drift Resolution Controller
//
// Owns the store and the retrain cycle and turns an operator decision
// into store changes: reject does nothing, approve runs one cycle, and
// auto-resolve repeats cycles until drift falls below the target, the
// iteration limit is hit, or a stop is requested.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ConfigError, ControlConfig};
use crate::cycle::{CycleError, CycleResult, RetrainCycle};
use crate::dataset::Dataset;
use crate::drift::DriftReport;
use crate::severity::{IntendedAction, SeverityTier};
use crate::store::{ArtifactStore, Baseline, Basis, StoreError};

pub mod run;

pub use run::{ResolutionRun, ResolutionStep, RunError, Termination, TimelineEntry};

/// Operator decision on a drift report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    ApproveOnce,
    Reject,
    AutoResolve,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown decision `{0}`; expected approve, reject or auto")]
pub struct UnknownDecision(pub String);

impl FromStr for Decision {
    type Err = UnknownDecision;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "y" | "yes" => Ok(Decision::ApproveOnce),
            "reject" | "n" | "no" => Ok(Decision::Reject),
            "auto" => Ok(Decision::AutoResolve),
            _ => Err(UnknownDecision(s.to_string())),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::ApproveOnce => "approve",
            Decision::Reject => "reject",
            Decision::AutoResolve => "auto",
        })
    }
}

/// What a decision did.
#[derive(Debug)]
pub enum Outcome {
    Rejected,
    Single(CycleResult),
    Resolved(ResolutionRun),
}

/// A drift report with its severity, as shown to an operator.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub report: DriftReport,
    pub severity: SeverityTier,
    pub action: IntendedAction,
    pub description: &'static str,
}

/// Why an auto-resolve run halted early.
#[derive(Debug, thiserror::Error)]
pub enum HaltCause {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("resolution log rejected an update: {0}")]
    Log(#[from] RunError),
}

/// Auto-resolve halted by a failing iteration.
///
/// `run` holds every iteration that was persisted before the failure and
/// is finalized as `Failed` unless the log itself is what failed.
#[derive(Debug, thiserror::Error)]
#[error("auto-resolve halted after {} completed iteration(s): {source}", .run.len())]
pub struct ResolutionFailure {
    pub run: ResolutionRun,
    #[source]
    pub source: HaltCause,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Resolution(#[from] ResolutionFailure),
}

/// Cloneable flag checked between auto-resolve iterations.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ResolutionController<S: ArtifactStore> {
    store: S,
    cycle: RetrainCycle,
    config: ControlConfig,
    stop: StopSignal,
}

impl<S: ArtifactStore> ResolutionController<S> {
    /// Controller with the default evaluator and trainer.
    pub fn new(store: S, config: ControlConfig) -> Result<Self, ConfigError> {
        let cycle = RetrainCycle::from_config(&config)?;
        Self::with_cycle(store, cycle, config)
    }

    pub fn with_cycle(store: S, cycle: RetrainCycle, config: ControlConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            cycle,
            config,
            stop: StopSignal::new(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Install a reference/current pair, train the initial model on the
    /// reference, and record the first report.
    pub fn bootstrap(&mut self, reference: Dataset, current: Dataset) -> Result<Detection, ResolutionError> {
        let model = self.cycle.fit_baseline(&reference)?;
        info!(model_id = %model.id, rows = reference.len(), "baseline model trained");

        self.store.reset(Baseline {
            reference,
            current,
            model: Some(model),
        })?;
        self.detect()
    }

    /// Evaluate the stored reference against the stored current dataset
    /// and record the report.
    pub fn detect(&mut self) -> Result<Detection, ResolutionError> {
        let reference = self.store.reference()?;
        let current = self.store.current()?;

        let report = self.cycle.evaluate(&reference, &current)?;
        self.store.record_report(&report)?;

        let severity = self.cycle.severity().classify(report.ratio);
        info!(
            ratio = report.ratio,
            drifted = report.drifted_columns,
            total = report.total_columns,
            severity = ?severity,
            "drift analysis refreshed"
        );

        Ok(Detection {
            report,
            severity,
            action: severity.action(),
            description: severity.description(),
        })
    }

    /// Apply an operator decision to the stored datasets.
    pub fn decide(&mut self, decision: Decision) -> Result<Outcome, ResolutionError> {
        let basis = self.store.basis()?;
        info!(%decision, generation = basis.generation, "decision received");

        match decision {
            Decision::Reject => {
                info!("retraining rejected, store left unchanged");
                Ok(Outcome::Rejected)
            }
            Decision::ApproveOnce => Ok(Outcome::Single(self.approve_once(&basis)?)),
            Decision::AutoResolve => {
                let run = self.resolve(
                    basis,
                    self.config.auto_trigger_threshold,
                    self.config.target_ratio,
                    self.config.max_iterations,
                )?;
                Ok(Outcome::Resolved(run))
            }
        }
    }

    /// Exactly one cycle with the single-approval trigger threshold.
    pub fn approve_once(&mut self, basis: &Basis) -> Result<CycleResult, CycleError> {
        let threshold = self.config.single_trigger_threshold;
        self.cycle
            .run(
                &mut self.store,
                basis.generation,
                &basis.reference,
                &basis.current,
                threshold,
            )
            .map_err(|err| {
                warn!(error = %err, "single retrain failed, no changes made");
                err
            })
    }

    /// Repeat cycles, feeding each blended reference into the next, until
    /// drift is below `target_ratio`, `max_iterations` cycles have been
    /// persisted, a cycle is skipped, or the stop signal is raised.
    ///
    /// A raised stop signal is cleared once it has stopped a run.
    pub fn resolve(
        &mut self,
        basis: Basis,
        trigger_threshold: f64,
        target_ratio: f64,
        max_iterations: usize,
    ) -> Result<ResolutionRun, ResolutionFailure> {
        let Basis {
            mut generation,
            mut reference,
            current,
        } = basis;
        let mut run = ResolutionRun::new();
        let mut last_ratio = None;

        info!(
            run_id = %run.run_id(),
            trigger_threshold,
            target_ratio,
            max_iterations,
            "auto-resolve started"
        );

        let (termination, converged) = loop {
            if self.stop.is_raised() {
                self.stop.clear();
                break (Termination::Stopped, false);
            }
            if run.len() >= max_iterations {
                break (Termination::Capped, false);
            }

            let iteration = run.next_iteration();
            let outcome = self
                .cycle
                .run(&mut self.store, generation, &reference, &current, trigger_threshold);
            let result = match outcome {
                Ok(result) => result,
                Err(err) => {
                    warn!(iteration, error = %err, "auto-resolve iteration failed");
                    return Err(halted(run, last_ratio, err.into()));
                }
            };

            let ratio_before = result.report_before.ratio;
            let result_generation = result.generation;
            let Some((step, next_reference)) = completed_step(result, iteration) else {
                last_ratio = Some(ratio_before);
                break (Termination::BelowTrigger, ratio_before < target_ratio);
            };

            let ratio_after = step.report_after.ratio;
            info!(iteration, ratio_before, ratio_after, "auto-resolve iteration persisted");

            last_ratio = Some(ratio_after);
            if let Err(err) = run.append(step) {
                warn!(iteration, error = %err, "resolution log rejected a persisted iteration");
                return Err(halted(run, last_ratio, err.into()));
            }
            generation = result_generation;
            reference = next_reference;

            if ratio_after < target_ratio {
                break (Termination::Converged, true);
            }
        };

        if let Err(err) = run.finalize(termination, converged, last_ratio) {
            return Err(ResolutionFailure {
                run,
                source: err.into(),
            });
        }
        info!(
            run_id = %run.run_id(),
            iterations = run.len(),
            ?termination,
            converged,
            final_ratio = last_ratio,
            "auto-resolve finished"
        );
        Ok(run)
    }
}

/// Close `run` as failed and pair it with the cause.
///
/// If the log refuses to finalize, that refusal becomes the cause and the
/// original one is logged.
fn halted(mut run: ResolutionRun, last_ratio: Option<f64>, cause: HaltCause) -> ResolutionFailure {
    match run.finalize(Termination::Failed, false, last_ratio) {
        Ok(()) => ResolutionFailure { run, source: cause },
        Err(err) => {
            warn!(error = %cause, "halt cause superseded by resolution log error");
            ResolutionFailure {
                run,
                source: err.into(),
            }
        }
    }
}

/// The log entry and next reference of a persisted cycle; `None` when the
/// cycle was skipped.
fn completed_step(result: CycleResult, iteration: u32) -> Option<(ResolutionStep, Dataset)> {
    match result {
        CycleResult {
            triggered: true,
            report_before,
            report_after: Some(report_after),
            severity_after: Some(severity_after),
            rows_replaced: Some(rows_replaced),
            blend_fraction: Some(blend_fraction),
            new_reference: Some(new_reference),
            ..
        } => Some((
            ResolutionStep {
                iteration,
                report_before,
                rows_replaced,
                blend_fraction,
                report_after,
                severity_after,
            },
            new_reference,
        )),
        _ => None,
    }
}

/// Controller shared between callers; decisions are applied one at a time.
///
/// The stop signal is held outside the lock so a running auto-resolve can
/// be stopped from another thread.
pub struct SharedController<S: ArtifactStore> {
    inner: Arc<Mutex<ResolutionController<S>>>,
    stop: StopSignal,
}

impl<S: ArtifactStore> Clone for SharedController<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stop: self.stop.clone(),
        }
    }
}

impl<S: ArtifactStore> SharedController<S> {
    pub fn new(controller: ResolutionController<S>) -> Self {
        let stop = controller.stop_signal();
        Self {
            inner: Arc::new(Mutex::new(controller)),
            stop,
        }
    }

    pub fn decide(&self, decision: Decision) -> Result<Outcome, ResolutionError> {
        self.inner.lock().decide(decision)
    }

    pub fn detect(&self) -> Result<Detection, ResolutionError> {
        self.inner.lock().detect()
    }

    pub fn stop(&self) {
        self.stop.raise();
    }

    /// Run `f` with exclusive access to the controller.
    pub fn with<R>(&self, f: impl FnOnce(&mut ResolutionController<S>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }
}
