// Control Loop Configuration
//
// Every threshold and limit the control loop uses, loaded from JSON or
// taken from the built-in defaults. Validated once, before any
// component is constructed.

use serde::{Deserialize, Serialize};

use crate::severity::SeverityClassifier;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("severity thresholds must satisfy 0 <= low < high <= 1 (low={low}, high={high})")]
    InvalidThresholds { low: f64, high: f64 },

    #[error("`{field}` must lie in [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("blend fraction range must satisfy 0 < min <= max < 1 (min={min}, max={max})")]
    InvalidBlendRange { min: f64, max: f64 },

    #[error("max_iterations must be at least 1")]
    ZeroIterations,

    #[error("label column must not be empty")]
    EmptyLabelColumn,

    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Lower and upper severity cut-offs on the drift ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: 0.10,
            high: 0.25,
        }
    }
}

/// Range the blend fraction is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendSettings {
    pub min_fraction: f64,
    pub max_fraction: f64,
}

impl Default for BlendSettings {
    fn default() -> Self {
        Self {
            min_fraction: 0.40,
            max_fraction: 0.60,
        }
    }
}

/// Parameters of the default statistical evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftSettings {
    /// Per-column p-value below which a column counts as drifted.
    pub significance: f64,
    /// Numeric columns with at most this many distinct reference values
    /// are tested as categories.
    pub categorical_cardinality: usize,
    /// Ratio at which the whole dataset is flagged as drifted.
    pub dataset_drift_share: f64,
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            significance: 0.05,
            categorical_cardinality: 5,
            dataset_drift_share: 0.5,
        }
    }
}

/// Full configuration of the drift-to-retrain loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub severity: SeverityThresholds,
    /// Trigger used when a human approves a single retrain.
    pub single_trigger_threshold: f64,
    /// Trigger used by unattended auto-resolve.
    pub auto_trigger_threshold: f64,
    pub target_ratio: f64,
    pub max_iterations: usize,
    pub blend: BlendSettings,
    pub label_column: String,
    pub drift: DriftSettings,
    /// Blend RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ControlConfig {
    /// Built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            severity: SeverityThresholds::default(),
            single_trigger_threshold: 0.25,
            auto_trigger_threshold: 0.10,
            target_ratio: 0.10,
            max_iterations: 10,
            blend: BlendSettings::default(),
            label_column: "Churn".into(),
            drift: DriftSettings::default(),
            seed: None,
        }
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        SeverityClassifier::from_thresholds(&self.severity)?;

        for (field, value) in [
            ("single_trigger_threshold", self.single_trigger_threshold),
            ("auto_trigger_threshold", self.auto_trigger_threshold),
            ("target_ratio", self.target_ratio),
            ("drift.significance", self.drift.significance),
            ("drift.dataset_drift_share", self.drift.dataset_drift_share),
        ] {
            unit_range(field, value)?;
        }

        let BlendSettings {
            min_fraction: min,
            max_fraction: max,
        } = self.blend;
        if !(min.is_finite() && max.is_finite() && 0.0 < min && min <= max && max < 1.0) {
            return Err(ConfigError::InvalidBlendRange { min, max });
        }

        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }

        if self.label_column.trim().is_empty() {
            return Err(ConfigError::EmptyLabelColumn);
        }

        Ok(())
    }
}

pub(crate) fn unit_range(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default_config();
        config.validate().unwrap();

        assert_eq!(config.single_trigger_threshold, 0.25);
        assert_eq!(config.auto_trigger_threshold, 0.10);
        assert_eq!(config.target_ratio, 0.10);
        assert_eq!(config.max_iterations, 10);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = ControlConfig::from_json(r#"{ "max_iterations": 3, "seed": 7 }"#).unwrap();

        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.severity, SeverityThresholds::default());
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = ControlConfig::from_json(r#"{ "severity": { "low": 0.3, "high": 0.2 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThresholds { .. }));
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let err = ControlConfig::from_json(r#"{ "max_iterations": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroIterations));
    }

    #[test]
    fn full_blend_range_is_rejected() {
        let config = ControlConfig {
            blend: BlendSettings {
                min_fraction: 0.0,
                max_fraction: 1.0,
            },
            ..ControlConfig::default_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBlendRange { .. })
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            ControlConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }
}
