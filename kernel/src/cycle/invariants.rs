// Cycle Invariants
//
// Pure rules checked after a cycle has blended and retrained but before
// anything is persisted. A violation aborts the cycle with the store
// untouched.

use crate::dataset::Dataset;
use crate::drift::DriftReport;

/// Outcome of one invariant check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Everything an invariant may inspect about a completed-but-unpersisted cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleSnapshot<'a> {
    pub reference: &'a Dataset,
    pub current: &'a Dataset,
    pub new_reference: &'a Dataset,
    pub report_before: &'a DriftReport,
    pub report_after: &'a DriftReport,
    pub rows_replaced: usize,
}

/// A rule over a cycle snapshot. Implementations only read the snapshot
/// and must return the same answer for the same input.
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, snapshot: &CycleSnapshot<'_>) -> InvariantResult;
}

/// Ordered set of invariants checked before a cycle commits.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Engine with every built-in cycle invariant registered.
    pub fn standard() -> Self {
        let mut engine = Self::new();
        engine.register(RowCountPreserved);
        engine.register(SchemaPreserved);
        engine.register(ReplacementBounded);
        engine.register(RatiosBounded);
        engine
    }

    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Checks invariants in registration order and reports the first one
    /// that fails.
    pub fn evaluate(&self, snapshot: &CycleSnapshot<'_>) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            if let InvariantResult::Fail(reason) = invariant.validate(snapshot) {
                return Err(InvariantViolation {
                    invariant: invariant.name(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

/// The first failed invariant and its reason.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invariant `{invariant}` violated: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub reason: String,
}

/// Blending never changes the reference row count.
pub struct RowCountPreserved;

impl Invariant for RowCountPreserved {
    fn name(&self) -> &'static str {
        "row-count-preserved"
    }

    fn validate(&self, s: &CycleSnapshot<'_>) -> InvariantResult {
        if s.new_reference.len() == s.reference.len() {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail(format!(
                "reference had {} rows, blended reference has {}",
                s.reference.len(),
                s.new_reference.len()
            ))
        }
    }
}

/// The blended reference keeps the reference column order.
pub struct SchemaPreserved;

impl Invariant for SchemaPreserved {
    fn name(&self) -> &'static str {
        "schema-preserved"
    }

    fn validate(&self, s: &CycleSnapshot<'_>) -> InvariantResult {
        if s.new_reference.columns() == s.reference.columns() && s.new_reference.same_schema(s.current)
        {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail("blended reference changed the column schema".into())
        }
    }
}

/// A blend can replace at most every reference row.
pub struct ReplacementBounded;

impl Invariant for ReplacementBounded {
    fn name(&self) -> &'static str {
        "replacement-bounded"
    }

    fn validate(&self, s: &CycleSnapshot<'_>) -> InvariantResult {
        if s.rows_replaced <= s.reference.len() {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail(format!(
                "{} rows replaced out of {}",
                s.rows_replaced,
                s.reference.len()
            ))
        }
    }
}

/// Drift ratios are shares and must lie in [0, 1].
pub struct RatiosBounded;

impl Invariant for RatiosBounded {
    fn name(&self) -> &'static str {
        "ratios-bounded"
    }

    fn validate(&self, s: &CycleSnapshot<'_>) -> InvariantResult {
        for ratio in [s.report_before.ratio, s.report_after.ratio] {
            if !(0.0..=1.0).contains(&ratio) {
                return InvariantResult::Fail(format!("drift ratio {ratio} outside [0, 1]"));
            }
        }
        InvariantResult::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    fn rows(n: i32) -> Dataset {
        Dataset::new(
            vec!["x".into()],
            (0..n).map(|i| vec![Value::Numeric(f64::from(i))]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn standard_invariants_pass_on_valid_cycle() {
        let reference = rows(10);
        let current = rows(12);
        let blended = rows(10);
        let report = DriftReport::from_columns(vec![], 0.5);

        let snapshot = CycleSnapshot {
            reference: &reference,
            current: &current,
            new_reference: &blended,
            report_before: &report,
            report_after: &report,
            rows_replaced: 5,
        };

        InvariantEngine::standard().evaluate(&snapshot).unwrap();
    }

    #[test]
    fn shrunken_reference_is_rejected() {
        let reference = rows(10);
        let current = rows(12);
        let blended = rows(8);
        let report = DriftReport::from_columns(vec![], 0.5);

        let snapshot = CycleSnapshot {
            reference: &reference,
            current: &current,
            new_reference: &blended,
            report_before: &report,
            report_after: &report,
            rows_replaced: 5,
        };

        let err = InvariantEngine::standard().evaluate(&snapshot).unwrap_err();
        assert!(err.to_string().contains("row-count-preserved"));
    }
}
