// Resolution Run Log
//
// Append-only record of the iterations of one auto-resolve run. Steps
// must arrive in iteration order starting at 1, and nothing can be
// appended once the run has been finalized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::drift::DriftReport;
use crate::severity::SeverityTier;

/// One completed (persisted) retrain cycle inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionStep {
    pub iteration: u32,
    pub report_before: DriftReport,
    pub rows_replaced: usize,
    pub blend_fraction: f64,
    pub report_after: DriftReport,
    pub severity_after: SeverityTier,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Drift fell below the target ratio.
    Converged,
    /// The iteration limit was reached first.
    Capped,
    /// Drift was already at or below the trigger threshold.
    BelowTrigger,
    /// The stop signal was raised between iterations.
    Stopped,
    /// An iteration failed; earlier iterations remain persisted.
    Failed,
}

/// Row of the progress view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub iteration: u32,
    pub ratio_before: f64,
    pub ratio_after: f64,
    pub severity: SeverityTier,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RunError {
    #[error("iteration out of order: expected {expected}, got {actual}")]
    OutOfOrder { expected: u32, actual: u32 },

    #[error("run {0} is already finalized")]
    Finalized(Uuid),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRun {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    steps: Vec<ResolutionStep>,
    termination: Option<Termination>,
    converged: bool,
    final_ratio: Option<f64>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for ResolutionRun {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionRun {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            steps: Vec::new(),
            termination: None,
            converged: false,
            final_ratio: None,
            finished_at: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Iteration number the next step must carry.
    pub fn next_iteration(&self) -> u32 {
        self.steps.last().map(|s| s.iteration + 1).unwrap_or(1)
    }

    pub fn append(&mut self, step: ResolutionStep) -> Result<(), RunError> {
        if self.is_finalized() {
            return Err(RunError::Finalized(self.run_id));
        }

        let expected = self.next_iteration();
        if step.iteration != expected {
            return Err(RunError::OutOfOrder {
                expected,
                actual: step.iteration,
            });
        }

        self.steps.push(step);
        Ok(())
    }

    /// Close the run. `final_ratio` is the last drift ratio observed.
    pub fn finalize(
        &mut self,
        termination: Termination,
        converged: bool,
        final_ratio: Option<f64>,
    ) -> Result<(), RunError> {
        if self.is_finalized() {
            return Err(RunError::Finalized(self.run_id));
        }

        self.termination = Some(termination);
        self.converged = converged;
        self.final_ratio = final_ratio;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.termination.is_some()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn final_ratio(&self) -> Option<f64> {
        self.final_ratio
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.steps
            .iter()
            .map(|s| TimelineEntry {
                iteration: s.iteration,
                ratio_before: s.report_before.ratio,
                ratio_after: s.report_after.ratio,
                severity: s.severity_after,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(iteration: u32) -> ResolutionStep {
        ResolutionStep {
            iteration,
            report_before: DriftReport::from_columns(vec![], 0.5),
            rows_replaced: 10,
            blend_fraction: 0.5,
            report_after: DriftReport::from_columns(vec![], 0.5),
            severity_after: SeverityTier::Low,
        }
    }

    #[test]
    fn steps_append_in_order() {
        let mut run = ResolutionRun::new();
        run.append(step(1)).unwrap();
        run.append(step(2)).unwrap();

        assert_eq!(run.len(), 2);
        assert_eq!(run.next_iteration(), 3);
        assert_eq!(
            run.timeline().iter().map(|e| e.iteration).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn out_of_order_step_is_rejected() {
        let mut run = ResolutionRun::new();
        run.append(step(1)).unwrap();

        assert_eq!(
            run.append(step(3)).unwrap_err(),
            RunError::OutOfOrder {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(run.len(), 1);
    }

    #[test]
    fn first_step_must_be_one() {
        let mut run = ResolutionRun::new();
        assert!(run.append(step(0)).is_err());
    }

    #[test]
    fn finalized_run_is_closed() {
        let mut run = ResolutionRun::new();
        run.append(step(1)).unwrap();
        run.finalize(Termination::Converged, true, Some(0.0)).unwrap();

        assert!(run.converged());
        assert_eq!(run.termination(), Some(Termination::Converged));
        assert_eq!(run.append(step(2)).unwrap_err(), RunError::Finalized(run.run_id()));
        assert!(run.finalize(Termination::Capped, false, None).is_err());
    }
}
