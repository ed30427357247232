// Statistical Drift Evaluator
//
// Default `DriftEvaluator`: two-sample Kolmogorov-Smirnov for numeric
// columns with enough distinct values, chi-square goodness-of-fit on
// category frequencies for everything else.
//
// The p-value approximations (Stephens' lambda for KS, Wilson-Hilferty
// for chi-square, Abramowitz-Stegun erf) follow entrenar's drift module.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::{ColumnDrift, ColumnKind, DriftError, DriftEvaluator, DriftReport, DriftTest};
use crate::config::DriftSettings;
use crate::dataset::{Dataset, Value};

/// Column-wise hypothesis testing at a fixed significance level.
#[derive(Debug, Clone)]
pub struct StatisticalEvaluator {
    significance: f64,
    categorical_cardinality: usize,
    dataset_drift_share: f64,
}

impl Default for StatisticalEvaluator {
    fn default() -> Self {
        Self::new(&DriftSettings::default())
    }
}

impl StatisticalEvaluator {
    pub fn new(settings: &DriftSettings) -> Self {
        Self {
            significance: settings.significance,
            categorical_cardinality: settings.categorical_cardinality,
            dataset_drift_share: settings.dataset_drift_share,
        }
    }

    fn evaluate_column(&self, name: &str, reference: &[&Value], current: &[&Value]) -> ColumnDrift {
        let numeric = reference
            .iter()
            .chain(current.iter())
            .all(|v| v.as_numeric().is_some());
        let kind = if numeric {
            ColumnKind::Numeric
        } else {
            ColumnKind::Categorical
        };

        if reference.is_empty() || current.is_empty() {
            let test = if numeric {
                DriftTest::KolmogorovSmirnov
            } else {
                DriftTest::ChiSquare
            };
            return ColumnDrift {
                column: name.to_string(),
                kind,
                test,
                statistic: 0.0,
                p_value: 1.0,
                drifted: false,
            };
        }

        let (test, statistic, p_value) =
            if numeric && distinct_numeric(reference) > self.categorical_cardinality {
                let (d, p) = ks_test(&finite(reference), &finite(current));
                (DriftTest::KolmogorovSmirnov, d, p)
            } else {
                let (chi, p) = chi_square_test(reference, current);
                (DriftTest::ChiSquare, chi, p)
            };

        ColumnDrift {
            column: name.to_string(),
            kind,
            test,
            statistic,
            p_value,
            drifted: p_value < self.significance,
        }
    }
}

impl DriftEvaluator for StatisticalEvaluator {
    fn evaluate(&self, reference: &Dataset, current: &Dataset) -> Result<DriftReport, DriftError> {
        reference
            .check_schema(current)
            .map_err(DriftError::SchemaMismatch)?;

        let mut columns = Vec::with_capacity(reference.columns().len());
        for name in reference.columns() {
            let reference_values = reference
                .column_values(name)
                .map_err(DriftError::SchemaMismatch)?;
            let current_values = current
                .column_values(name)
                .map_err(DriftError::SchemaMismatch)?;

            let verdict = self.evaluate_column(name, &reference_values, &current_values);
            debug!(
                column = %verdict.column,
                test = ?verdict.test,
                statistic = verdict.statistic,
                p_value = verdict.p_value,
                drifted = verdict.drifted,
                "column evaluated"
            );
            columns.push(verdict);
        }

        Ok(DriftReport::from_columns(columns, self.dataset_drift_share))
    }
}

fn finite(values: &[&Value]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|v| v.as_numeric())
        .filter(|v| v.is_finite())
        .collect()
}

fn distinct_numeric(values: &[&Value]) -> usize {
    values
        .iter()
        .filter_map(|v| v.as_numeric())
        .map(f64::to_bits)
        .collect::<HashSet<_>>()
        .len()
}

/// Two-sample Kolmogorov-Smirnov. Returns `(D, p)`.
pub fn ks_test(reference: &[f64], current: &[f64]) -> (f64, f64) {
    if reference.is_empty() || current.is_empty() {
        return (0.0, 1.0);
    }

    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);

    let n1 = a.len() as f64;
    let n2 = b.len() as f64;
    let (mut i, mut j) = (0usize, 0usize);
    let mut d_max = 0.0f64;

    // Step through every distinct value so ties move both CDFs together.
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d_max = d_max.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    let n_eff = (n1 * n2) / (n1 + n2);
    let sqrt_n = n_eff.sqrt();
    let lambda = (sqrt_n + 0.12 + 0.11 / sqrt_n) * d_max;

    (d_max, ks_p_value(lambda))
}

/// Chi-square goodness of fit of current category counts against the
/// reference proportions. Returns `(chi2, p)`.
///
/// Reference counts get add-half smoothing so categories unseen in the
/// reference still have a non-zero expectation.
pub fn chi_square_test(reference: &[&Value], current: &[&Value]) -> (f64, f64) {
    let mut counts: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for value in reference {
        counts.entry(value.key()).or_default().0 += 1.0;
    }
    for value in current {
        counts.entry(value.key()).or_default().1 += 1.0;
    }

    let k = counts.len();
    if k < 2 {
        return (0.0, 1.0);
    }

    let reference_total = reference.len() as f64 + 0.5 * k as f64;
    let current_total = current.len() as f64;

    let chi_sq: f64 = counts
        .values()
        .map(|&(reference_count, observed)| {
            let expected = (reference_count + 0.5) / reference_total * current_total;
            (observed - expected).powi(2) / expected
        })
        .sum();

    (chi_sq, chi_square_p_value(chi_sq, k - 1))
}

/// Asymptotic Kolmogorov distribution tail, P(K > lambda).
pub fn ks_p_value(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    let mut p = 0.0;
    for k in 1..=100 {
        let sign = if k % 2 == 1 { 1.0 } else { -1.0 };
        let term = sign * (-2.0 * f64::from(k).powi(2) * lambda.powi(2)).exp();
        p += term;
        if term.abs() < 1e-10 {
            break;
        }
    }
    (2.0 * p).clamp(0.0, 1.0)
}

/// Upper-tail chi-square p-value via the Wilson-Hilferty approximation.
pub fn chi_square_p_value(chi_sq: f64, df: usize) -> f64 {
    if df == 0 || chi_sq <= 0.0 {
        return 1.0;
    }
    let k = df as f64;
    let z = ((chi_sq / k).powf(1.0 / 3.0) - (1.0 - 2.0 / (9.0 * k))) / (2.0 / (9.0 * k)).sqrt();
    (0.5 * (1.0 - erf(z / std::f64::consts::SQRT_2))).clamp(0.0, 1.0)
}

/// Abramowitz-Stegun 7.1.26.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x >= 0.0 { 1.0 } else { -1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}
