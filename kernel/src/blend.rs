// Reference Blending
//
// Pulls the reference distribution toward the current distribution by
// replacing a random 40-60% of reference rows with current rows. A
// single call never fully replaces or fully preserves the reference.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::config::BlendSettings;
use crate::dataset::{self, Dataset, DatasetError};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BlendError {
    #[error("current dataset is empty; nothing to blend in")]
    InsufficientData,

    #[error("blend fraction {fraction} outside [{min}, {max}]")]
    FractionOutOfRange { fraction: f64, min: f64, max: f64 },

    #[error("reference and current schemas differ: {0}")]
    SchemaMismatch(#[source] DatasetError),
}

/// Result of one blend.
#[derive(Debug, Clone, Serialize)]
pub struct BlendOutcome {
    pub dataset: Dataset,
    pub rows_replaced: usize,
    pub fraction: f64,
}

pub struct Blender {
    rng: StdRng,
    min_fraction: f64,
    max_fraction: f64,
}

impl Blender {
    /// Deterministic blender for tests and reproducible runs.
    pub fn seeded(settings: &BlendSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy(settings: &BlendSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    pub fn new(settings: &BlendSettings, seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(settings, seed),
            None => Self::from_entropy(settings),
        }
    }

    fn with_rng(settings: &BlendSettings, rng: StdRng) -> Self {
        Self {
            rng,
            min_fraction: settings.min_fraction,
            max_fraction: settings.max_fraction,
        }
    }

    /// Replace `floor(fraction * len(reference))` randomly chosen reference
    /// rows with rows drawn from `current`.
    ///
    /// Current rows are drawn without replacement when there are enough of
    /// them, with replacement otherwise. When `fraction` is `None` it is
    /// drawn uniformly from the configured range.
    pub fn blend(
        &mut self,
        reference: &Dataset,
        current: &Dataset,
        fraction: Option<f64>,
    ) -> Result<BlendOutcome, BlendError> {
        if current.is_empty() {
            return Err(BlendError::InsufficientData);
        }

        let mapping = reference
            .column_mapping(current)
            .map_err(BlendError::SchemaMismatch)?;

        let fraction = match fraction {
            Some(f) if f.is_finite() && (self.min_fraction..=self.max_fraction).contains(&f) => f,
            Some(f) => {
                return Err(BlendError::FractionOutOfRange {
                    fraction: f,
                    min: self.min_fraction,
                    max: self.max_fraction,
                })
            }
            None => self.rng.gen_range(self.min_fraction..=self.max_fraction),
        };

        let selected = (fraction * reference.len() as f64).floor() as usize;
        let positions = index::sample(&mut self.rng, reference.len(), selected).into_vec();

        let sources: Vec<usize> = if current.len() >= selected {
            index::sample(&mut self.rng, current.len(), selected).into_vec()
        } else {
            (0..selected)
                .map(|_| self.rng.gen_range(0..current.len()))
                .collect()
        };

        let replacements = positions
            .into_iter()
            .zip(sources)
            .map(|(target, source)| (target, dataset::align(&current.rows()[source], &mapping)))
            .collect();

        debug!(
            fraction,
            rows_replaced = selected,
            reference_rows = reference.len(),
            current_rows = current.len(),
            "reference blended"
        );

        Ok(BlendOutcome {
            dataset: reference.with_rows_replaced(replacements),
            rows_replaced: selected,
            fraction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    fn sequence(name: &str, range: std::ops::Range<i32>) -> Dataset {
        Dataset::new(
            vec![name.to_string()],
            range.map(|i| vec![Value::Numeric(f64::from(i))]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn half_fraction_replaces_half_the_rows() {
        let reference = sequence("x", 0..100);
        let current = sequence("x", 1000..1200);
        let mut blender = Blender::seeded(&BlendSettings::default(), 7);

        let outcome = blender.blend(&reference, &current, Some(0.5)).unwrap();

        assert_eq!(outcome.rows_replaced, 50);
        assert_eq!(outcome.dataset.len(), reference.len());
        let differing = reference.differing_rows(&outcome.dataset).unwrap();
        assert!((40..=60).contains(&differing));
    }

    #[test]
    fn drawn_fraction_stays_in_range() {
        let reference = sequence("x", 0..100);
        let current = sequence("x", 1000..1100);
        let mut blender = Blender::seeded(&BlendSettings::default(), 11);

        for _ in 0..50 {
            let outcome = blender.blend(&reference, &current, None).unwrap();
            assert!((0.40..=0.60).contains(&outcome.fraction));
            assert!((40..=60).contains(&outcome.rows_replaced));
            assert_eq!(outcome.dataset.len(), 100);
        }
    }

    #[test]
    fn inputs_are_untouched() {
        let reference = sequence("x", 0..20);
        let current = sequence("x", 100..120);
        let reference_before = reference.clone();
        let current_before = current.clone();

        let mut blender = Blender::seeded(&BlendSettings::default(), 3);
        blender.blend(&reference, &current, None).unwrap();

        assert_eq!(reference, reference_before);
        assert_eq!(current, current_before);
    }

    #[test]
    fn small_current_is_sampled_with_replacement() {
        let reference = sequence("x", 0..100);
        let current = sequence("x", 500..503);
        let mut blender = Blender::seeded(&BlendSettings::default(), 5);

        let outcome = blender.blend(&reference, &current, Some(0.6)).unwrap();

        assert_eq!(outcome.rows_replaced, 60);
        let from_current = outcome
            .dataset
            .rows()
            .iter()
            .filter(|row| row[0].as_numeric().unwrap() >= 500.0)
            .count();
        assert_eq!(from_current, 60);
    }

    #[test]
    fn empty_current_is_insufficient() {
        let reference = sequence("x", 0..10);
        let current = Dataset::empty(vec!["x".into()]).unwrap();
        let mut blender = Blender::seeded(&BlendSettings::default(), 1);

        assert_eq!(
            blender.blend(&reference, &current, None).unwrap_err(),
            BlendError::InsufficientData
        );
    }

    #[test]
    fn explicit_fraction_outside_range_is_rejected() {
        let reference = sequence("x", 0..10);
        let current = sequence("x", 10..20);
        let mut blender = Blender::seeded(&BlendSettings::default(), 1);

        assert!(matches!(
            blender.blend(&reference, &current, Some(1.0)),
            Err(BlendError::FractionOutOfRange { .. })
        ));
    }

    #[test]
    fn same_seed_same_blend() {
        let reference = sequence("x", 0..50);
        let current = sequence("x", 50..100);

        let a = Blender::seeded(&BlendSettings::default(), 42)
            .blend(&reference, &current, None)
            .unwrap();
        let b = Blender::seeded(&BlendSettings::default(), 42)
            .blend(&reference, &current, None)
            .unwrap();

        assert_eq!(a.dataset, b.dataset);
        assert_eq!(a.rows_replaced, b.rows_replaced);
    }

    #[test]
    fn current_rows_are_realigned() {
        let reference = Dataset::new(
            vec!["a".into(), "b".into()],
            vec![vec![1.0.into(), "x".into()]; 10],
        )
        .unwrap();
        let current = Dataset::new(
            vec!["b".into(), "a".into()],
            vec![vec!["y".into(), 2.0.into()]; 10],
        )
        .unwrap();
        let mut blender = Blender::seeded(&BlendSettings::default(), 9);

        let outcome = blender.blend(&reference, &current, Some(0.5)).unwrap();

        assert_eq!(outcome.dataset.columns(), reference.columns());
        assert!(outcome
            .dataset
            .rows()
            .iter()
            .any(|row| row == &vec![Value::Numeric(2.0), Value::from("y")]));
    }
}
