//! Outcome regression: ordinary least squares of life expectancy on economic
//! and temporal features.
//!
//! The fit is explanatory, so R² is reported on the training data. A
//! rank-deficient design (a constant feature such as a single observed year,
//! or two collinear time features) is detected before fitting and handled
//! according to [`RankDeficiencyPolicy`].

use crate::config::{RankDeficiencyPolicy, RegressionFeature};
use crate::data::{Dataset, Observation};
use crate::error::AnalysisError;
use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_linear::LinearRegression;
use log::{info, warn};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Relative tolerance below which a centred column counts as constant.
const CONSTANT_TOLERANCE: f64 = 1e-10;
/// A feature whose R² against the preceding features exceeds 1 - this is collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-10;

/// The fitted linear model. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    /// Features in coefficient order. May be shorter than requested when
    /// constant features were dropped.
    pub features: Vec<RegressionFeature>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Coefficient of determination on the training data.
    pub r_squared: f64,
    pub n_observations: usize,
    /// Earliest training year; origin of the `year_index` feature.
    pub base_year: i32,
}

impl FittedModel {
    /// Predicted life expectancy for a given log-GDP and year.
    pub fn predict(&self, log_gdp: f64, year: i32) -> f64 {
        self.features
            .iter()
            .zip(&self.coefficients)
            .map(|(feature, beta)| beta * feature_value(*feature, log_gdp, year, self.base_year))
            .sum::<f64>()
            + self.intercept
    }

    pub fn predict_observation(&self, observation: &Observation) -> f64 {
        self.predict(observation.log_gdp, observation.year)
    }

    /// Coefficient of `feature`, if the model uses it.
    pub fn coefficient(&self, feature: RegressionFeature) -> Option<f64> {
        self.features
            .iter()
            .position(|f| *f == feature)
            .map(|i| self.coefficients[i])
    }
}

fn feature_value(feature: RegressionFeature, log_gdp: f64, year: i32, base_year: i32) -> f64 {
    match feature {
        RegressionFeature::LogGdp => log_gdp,
        RegressionFeature::Year => f64::from(year),
        RegressionFeature::YearIndex => f64::from(year - base_year),
    }
}

/// The full-data fit together with per-observation fitted values and
/// residuals, aligned with the dataset by index.
#[derive(Debug, Clone)]
pub struct OutcomeFit {
    pub model: FittedModel,
    pub fitted: Vec<f64>,
    /// actual - fitted
    pub residuals: Vec<f64>,
}

/// Fit the outcome model on the whole dataset and score every observation.
pub fn fit_outcome_model(
    dataset: &Dataset,
    features: &[RegressionFeature],
    policy: RankDeficiencyPolicy,
) -> Result<OutcomeFit, AnalysisError> {
    let base_year = dataset.min_year().ok_or(AnalysisError::EmptyDataset {
        total: 0,
        dropped: 0,
    })?;
    let model = fit_rows(dataset.observations(), features, policy, base_year)?;

    let fitted: Vec<f64> = dataset
        .iter()
        .map(|o| model.predict_observation(o))
        .collect();
    let residuals = dataset
        .iter()
        .zip(&fitted)
        .map(|(o, f)| o.life_expectancy - f)
        .collect();

    let terms: Vec<String> = model
        .features
        .iter()
        .zip(&model.coefficients)
        .map(|(feature, beta)| format!("{feature}={beta:.4}"))
        .collect();
    info!(
        "Outcome model fitted on {} rows: intercept={:.4}, {} (R²={:.3})",
        model.n_observations,
        model.intercept,
        terms.join(", "),
        model.r_squared
    );

    Ok(OutcomeFit {
        model,
        fitted,
        residuals,
    })
}

fn fit_rows(
    rows: &[Observation],
    features: &[RegressionFeature],
    policy: RankDeficiencyPolicy,
    base_year: i32,
) -> Result<FittedModel, AnalysisError> {
    let mut features = features.to_vec();
    let x = loop {
        if features.is_empty() {
            return Err(AnalysisError::ModelDegenerate(
                "no regression features with any variation remain".to_string(),
            ));
        }
        let x = design_matrix(rows, &features, base_year);
        match check_rank(&x) {
            Ok(()) => break x,
            Err(RankIssue::Constant(j)) if policy == RankDeficiencyPolicy::DropConstantFeatures => {
                warn!(
                    "Feature '{}' is constant across all {} rows; dropping it and refitting",
                    features[j],
                    rows.len()
                );
                features.remove(j);
            }
            Err(issue) => return Err(issue.into_error(&features)),
        }
    };

    let actual: Vec<f64> = rows.iter().map(|o| o.life_expectancy).collect();
    let training = DatasetBase::new(x, Array1::from(actual.clone()));
    let fitted = LinearRegression::new()
        .fit(&training)
        .map_err(|e| AnalysisError::ModelDegenerate(e.to_string()))?;

    let coefficients = fitted.params().to_vec();
    let intercept = fitted.intercept();
    let predictions: Vec<f64> = training
        .records()
        .outer_iter()
        .map(|row| row.dot(fitted.params()) + intercept)
        .collect();
    // OLS with an intercept cannot do worse than the mean; clamp rounding noise.
    let r_squared = r_squared(&actual, &predictions).clamp(0.0, 1.0);

    Ok(FittedModel {
        features,
        coefficients,
        intercept,
        r_squared,
        n_observations: rows.len(),
        base_year,
    })
}

fn design_matrix(rows: &[Observation], features: &[RegressionFeature], base_year: i32) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), features.len()), |(i, j)| {
        feature_value(features[j], rows[i].log_gdp, rows[i].year, base_year)
    })
}

#[derive(Debug, PartialEq)]
enum RankIssue {
    TooFewRows { rows: usize, parameters: usize },
    /// Column index of a zero-variance feature.
    Constant(usize),
    /// Column index of a feature that is a linear combination of earlier ones.
    Collinear(usize),
}

impl RankIssue {
    fn into_error(self, features: &[RegressionFeature]) -> AnalysisError {
        let detail = match self {
            RankIssue::TooFewRows { rows, parameters } => format!(
                "{rows} observations cannot identify {parameters} parameters (intercept plus {} features)",
                parameters - 1
            ),
            RankIssue::Constant(j) => format!(
                "feature '{}' has no variation, so the design matrix is singular",
                features[j]
            ),
            RankIssue::Collinear(j) => format!(
                "feature '{}' is a linear combination of {:?}",
                features[j],
                features[..j].iter().map(|f| f.name()).collect::<Vec<_>>()
            ),
        };
        AnalysisError::ModelDegenerate(detail)
    }
}

/// Checks that `[1 | x]` has full column rank.
///
/// Columns are centred and scaled to unit length, then eliminated in order on
/// their correlation matrix. The pivot at step k is 1 - R² of column k
/// regressed on the columns before it.
fn check_rank(x: &Array2<f64>) -> Result<(), RankIssue> {
    let (n, p) = x.dim();
    let means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
    let mut z = x - &means;
    // Constant columns take precedence over the row count.
    for (j, mut column) in z.axis_iter_mut(Axis(1)).enumerate() {
        let scale = x.column(j).iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
        let norm = column.dot(&column).sqrt();
        if norm <= CONSTANT_TOLERANCE * scale * (n as f64).sqrt() {
            return Err(RankIssue::Constant(j));
        }
        column.mapv_inplace(|v| v / norm);
    }
    if n < p + 1 {
        return Err(RankIssue::TooFewRows {
            rows: n,
            parameters: p + 1,
        });
    }

    let mut a = z.t().dot(&z);
    for k in 0..p {
        let pivot = a[[k, k]];
        if pivot < COLLINEAR_TOLERANCE {
            return Err(RankIssue::Collinear(k));
        }
        for i in (k + 1)..p {
            let factor = a[[i, k]] / pivot;
            for j in k..p {
                a[[i, j]] -= factor * a[[k, j]];
            }
        }
    }
    Ok(())
}

/// Coefficient of determination, 1 - SS_res / SS_tot. When the outcome has no
/// variance this is 1 for an exact fit and 0 otherwise.
pub fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len() as f64;
    let mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(y, f)| (y - f).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Train/test R² from a seeded random split. A diagnostic only: the model
/// used downstream is always the full-data fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldoutReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_r_squared: f64,
    /// Out-of-sample, so it can be negative.
    pub test_r_squared: f64,
}

/// Fit on a random `1 - test_fraction` share of the rows and score both parts.
pub fn evaluate_holdout(
    dataset: &Dataset,
    features: &[RegressionFeature],
    policy: RankDeficiencyPolicy,
    test_fraction: f64,
    seed: u64,
) -> Result<HoldoutReport, AnalysisError> {
    let n = dataset.len();
    let test_rows = (test_fraction * n as f64).ceil() as usize;
    if test_rows < 2 || n - test_rows.min(n) < 2 {
        return Err(AnalysisError::InvalidConfig(format!(
            "holdout_fraction {test_fraction} splits {n} rows into {} train / {test_rows} test rows; both need at least 2",
            n.saturating_sub(test_rows)
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test_idx, train_idx) = indices.split_at(test_rows);
    let pick = |idx: &[usize]| -> Vec<Observation> {
        idx.iter().map(|&i| dataset.observations()[i].clone()).collect()
    };
    let train = pick(train_idx);
    let test = pick(test_idx);

    let base_year = dataset.min_year().unwrap_or_default();
    let model = fit_rows(&train, features, policy, base_year)?;

    let test_actual: Vec<f64> = test.iter().map(|o| o.life_expectancy).collect();
    let test_predicted: Vec<f64> = test.iter().map(|o| model.predict_observation(o)).collect();
    let report = HoldoutReport {
        train_rows: train.len(),
        test_rows: test.len(),
        train_r_squared: model.r_squared,
        test_r_squared: r_squared(&test_actual, &test_predicted),
    };
    info!(
        "Holdout R²: train {:.3} ({} rows), test {:.3} ({} rows)",
        report.train_r_squared, report.train_rows, report.test_r_squared, report.test_rows
    );
    Ok(report)
}
