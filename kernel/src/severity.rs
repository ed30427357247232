// Drift Severity Classification
//
// Maps an aggregate drift ratio to a severity tier and the action an
// operator is expected to take. This module is pure and deterministic.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, SeverityThresholds};

/// Severity of measured drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityTier {
    /// Drift below the lower threshold.
    Low,

    /// Drift between the thresholds, bounds inclusive.
    Medium,

    /// Drift above the upper threshold.
    High,
}

/// What an operator is expected to do for a given tier.
///
/// NOTE:
/// Actions are advisory. Retraining still goes through the decision gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntendedAction {
    Observe,
    Monitor,
    Retrain,
}

impl SeverityTier {
    pub fn action(self) -> IntendedAction {
        match self {
            SeverityTier::Low => IntendedAction::Observe,
            SeverityTier::Medium => IntendedAction::Monitor,
            SeverityTier::High => IntendedAction::Retrain,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            SeverityTier::Low => "acceptable drift levels",
            SeverityTier::Medium => "consider monitoring",
            SeverityTier::High => "retraining recommended",
        }
    }
}

/// Classify a ratio against an already validated threshold pair.
pub fn classify(ratio: f64, low_threshold: f64, high_threshold: f64) -> SeverityTier {
    if ratio < low_threshold {
        SeverityTier::Low
    } else if ratio <= high_threshold {
        SeverityTier::Medium
    } else {
        SeverityTier::High
    }
}

/// Reusable classifier holding one consistent threshold pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityClassifier {
    low: f64,
    high: f64,
}

impl SeverityClassifier {
    pub fn new(low: f64, high: f64) -> Result<Self, ConfigError> {
        if !(low.is_finite() && high.is_finite() && 0.0 <= low && low < high && high <= 1.0) {
            return Err(ConfigError::InvalidThresholds { low, high });
        }
        Ok(Self { low, high })
    }

    pub fn from_thresholds(thresholds: &SeverityThresholds) -> Result<Self, ConfigError> {
        Self::new(thresholds.low, thresholds.high)
    }

    pub fn classify(&self, ratio: f64) -> SeverityTier {
        classify(ratio, self.low, self.high)
    }
}
