// Synthetic Drift Scenarios
//
// Produces labeled reference/current pairs with a controllable amount of
// drift, for the demo command and for exercising the control loop end to
// end. Not part of the control loop itself.

use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::{Dataset, DatasetError, Value};

/// A reference dataset and a current dataset with the same schema.
#[derive(Debug, Clone)]
pub struct DatasetPair {
    pub reference: Dataset,
    pub current: Dataset,
}

/// Errors that can occur while generating a scenario.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid category weights: {0}")]
    Weights(#[from] WeightedError),

    #[error("generated rows do not fit the schema: {0}")]
    Dataset(#[from] DatasetError),
}

/// Source of reference/current pairs.
///
/// Implementations must be deterministic for a given seed.
pub trait DatasetFactory {
    fn generate(&self, seed: u64) -> Result<DatasetPair, SimulationError>;
}

const CONTRACTS: [&str; 3] = ["Month-to-month", "One year", "Two year"];
const PAYMENT_METHODS: [&str; 4] = [
    "Electronic check",
    "Mailed check",
    "Bank transfer",
    "Credit card",
];

/// Feature columns in the order they are shifted.
pub const SHIFTABLE_COLUMNS: [&str; 5] = [
    "tenure",
    "MonthlyCharges",
    "TotalCharges",
    "Contract",
    "PaymentMethod",
];

/// Telecom churn table: five shiftable features, `SeniorCitizen`, and the
/// `Churn` label.
///
/// The first `shifted_columns` entries of [`SHIFTABLE_COLUMNS`] are drawn
/// from a different distribution in the current dataset. `shift` in
/// `[0, 1]` scales how far they move.
#[derive(Debug, Clone)]
pub struct ChurnScenario {
    pub reference_rows: usize,
    pub current_rows: usize,
    pub shifted_columns: usize,
    pub shift: f64,
}

impl Default for ChurnScenario {
    fn default() -> Self {
        Self {
            reference_rows: 400,
            current_rows: 400,
            shifted_columns: SHIFTABLE_COLUMNS.len(),
            shift: 1.0,
        }
    }
}

impl ChurnScenario {
    pub fn columns() -> Vec<String> {
        SHIFTABLE_COLUMNS
            .iter()
            .chain(["SeniorCitizen", "Churn"].iter())
            .map(|c| c.to_string())
            .collect()
    }

    fn shifted(&self, column: usize) -> bool {
        column < self.shifted_columns.min(SHIFTABLE_COLUMNS.len())
    }

    fn sample(&self, rng: &mut StdRng, rows: usize, drifted: bool) -> Result<Dataset, SimulationError> {
        let shift = if drifted { self.shift.clamp(0.0, 1.0) } else { 0.0 };
        let s = |column: usize| if self.shifted(column) { shift } else { 0.0 };

        let contract_weights = WeightedIndex::new([
            0.55 + 0.35 * s(3),
            0.25 - 0.15 * s(3),
            0.20 - 0.15 * s(3),
        ])?;
        let payment_weights = WeightedIndex::new([
            0.25 + 0.45 * s(4),
            0.25 - 0.15 * s(4),
            0.25 - 0.15 * s(4),
            0.25 - 0.15 * s(4),
        ])?;

        let data = (0..rows)
            .map(|_| {
                let tenure = (rng.gen_range(1.0..72.0) * (1.0 - 0.7 * s(0))).round().max(1.0);
                let monthly = rng.gen_range(20.0..110.0) + 40.0 * s(1);
                let total = rng.gen_range(100.0..8000.0) * (1.0 + 1.5 * s(2));
                let contract = contract_weights.sample(rng);
                let payment = payment_weights.sample(rng);
                let senior = rng.gen_bool(0.16);

                let mut churn_p = 0.08;
                if contract == 0 {
                    churn_p += 0.30;
                }
                if tenure < 12.0 {
                    churn_p += 0.25;
                }
                if payment == 0 {
                    churn_p += 0.10;
                }
                let churned = rng.gen_bool(churn_p);

                vec![
                    Value::Numeric(tenure),
                    Value::Numeric((monthly * 100.0).round() / 100.0),
                    Value::Numeric((total * 100.0).round() / 100.0),
                    Value::from(CONTRACTS[contract]),
                    Value::from(PAYMENT_METHODS[payment]),
                    Value::Numeric(if senior { 1.0 } else { 0.0 }),
                    Value::Numeric(if churned { 1.0 } else { 0.0 }),
                ]
            })
            .collect();

        Ok(Dataset::new(Self::columns(), data)?)
    }
}

impl DatasetFactory for ChurnScenario {
    fn generate(&self, seed: u64) -> Result<DatasetPair, SimulationError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let reference = self.sample(&mut rng, self.reference_rows, false)?;
        let current = self.sample(&mut rng, self.current_rows, true)?;
        Ok(DatasetPair { reference, current })
    }
}
