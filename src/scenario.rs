//! What-if simulation: how predicted life expectancy moves when GDP changes
//! by a fixed percentage, using the already-fitted outcome model.

use crate::data::Dataset;
use crate::error::AnalysisError;
use crate::regression::FittedModel;
use crate::segment::{ClusterAssignment, RiskTier};
use serde::Serialize;

/// Rows a scenario applies to. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioFilter {
    pub countries: Vec<String>,
    pub tiers: Vec<RiskTier>,
}

impl ScenarioFilter {
    fn matches(&self, country: &str, tier: RiskTier) -> bool {
        (self.countries.is_empty() || self.countries.iter().any(|c| c == country))
            && (self.tiers.is_empty() || self.tiers.contains(&tier))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioParams {
    /// GDP change in percent; must be greater than -100.
    pub gdp_change_pct: f64,
    pub filter: ScenarioFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioRow {
    /// Position of the observation in the dataset.
    pub index: usize,
    pub country: String,
    pub year: i32,
    pub gdp: f64,
    pub scenario_gdp: f64,
    pub baseline_predicted: f64,
    pub scenario_predicted: f64,
    /// scenario_predicted - baseline_predicted
    pub delta: f64,
    pub cluster_id: usize,
    pub risk_tier: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierDelta {
    pub tier: RiskTier,
    pub observations: usize,
    pub mean_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub gdp_change_pct: f64,
    pub rows: Vec<ScenarioRow>,
    /// Tiers with at least one selected row, from High Risk to Low Risk.
    pub by_tier: Vec<TierDelta>,
    /// Mean delta over all selected rows; `None` when the filter selects nothing.
    pub mean_delta: Option<f64>,
}

impl ScenarioReport {
    /// The tier whose rows gain the most on average.
    pub fn most_benefited_tier(&self) -> Option<&TierDelta> {
        self.by_tier
            .iter()
            .max_by(|a, b| a.mean_delta.total_cmp(&b.mean_delta).then(b.tier.cmp(&a.tier)))
    }
}

/// Baseline and perturbed prediction for a single (GDP, year) point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointScenario {
    pub baseline_predicted: f64,
    pub scenario_predicted: f64,
    pub delta: f64,
}

/// GDP multiplier for a percentage change, rejecting changes that would make
/// GDP non-positive.
pub fn gdp_multiplier(gdp_change_pct: f64) -> Result<f64, AnalysisError> {
    if !gdp_change_pct.is_finite() {
        return Err(AnalysisError::InvalidScenarioParameter(format!(
            "GDP change must be a finite percentage, got {gdp_change_pct}"
        )));
    }
    if gdp_change_pct <= -100.0 {
        return Err(AnalysisError::InvalidScenarioParameter(format!(
            "a GDP change of {gdp_change_pct}% would make GDP non-positive; it must be greater than -100%"
        )));
    }
    Ok(1.0 + gdp_change_pct / 100.0)
}

/// Simulate a GDP change for one point.
pub fn simulate_point(
    model: &FittedModel,
    gdp: f64,
    year: i32,
    gdp_change_pct: f64,
) -> Result<PointScenario, AnalysisError> {
    if !(gdp.is_finite() && gdp > 0.0) {
        return Err(AnalysisError::InvalidScenarioParameter(format!(
            "baseline GDP must be positive, got {gdp}"
        )));
    }
    let multiplier = gdp_multiplier(gdp_change_pct)?;
    let baseline_predicted = model.predict(gdp.ln(), year);
    let scenario_predicted = model.predict((gdp * multiplier).ln(), year);
    Ok(PointScenario {
        baseline_predicted,
        scenario_predicted,
        delta: scenario_predicted - baseline_predicted,
    })
}

/// Simulate a GDP change for every selected observation.
///
/// The model is never refit and nothing is mutated, so runs with different
/// parameters are independent of each other.
pub fn simulate(
    dataset: &Dataset,
    model: &FittedModel,
    assignments: &[ClusterAssignment],
    params: &ScenarioParams,
) -> Result<ScenarioReport, AnalysisError> {
    let multiplier = gdp_multiplier(params.gdp_change_pct)?;
    if assignments.len() != dataset.len() {
        return Err(AnalysisError::InvalidScenarioParameter(format!(
            "{} cluster assignments supplied for {} observations",
            assignments.len(),
            dataset.len()
        )));
    }

    let rows: Vec<ScenarioRow> = dataset
        .iter()
        .zip(assignments)
        .enumerate()
        .filter(|(_, (o, a))| params.filter.matches(&o.country, a.tier))
        .map(|(index, (o, a))| {
            let scenario_gdp = o.gdp * multiplier;
            let baseline_predicted = model.predict_observation(o);
            let scenario_predicted = model.predict(scenario_gdp.ln(), o.year);
            ScenarioRow {
                index,
                country: o.country.clone(),
                year: o.year,
                gdp: o.gdp,
                scenario_gdp,
                baseline_predicted,
                scenario_predicted,
                delta: scenario_predicted - baseline_predicted,
                cluster_id: a.cluster_id,
                risk_tier: a.tier,
            }
        })
        .collect();

    let by_tier: Vec<TierDelta> = RiskTier::ALL
        .iter()
        .filter_map(|&tier| {
            let deltas: Vec<f64> = rows
                .iter()
                .filter(|r| r.risk_tier == tier)
                .map(|r| r.delta)
                .collect();
            (!deltas.is_empty()).then(|| TierDelta {
                tier,
                observations: deltas.len(),
                mean_delta: deltas.iter().sum::<f64>() / deltas.len() as f64,
            })
        })
        .collect();

    let mean_delta =
        (!rows.is_empty()).then(|| rows.iter().map(|r| r.delta).sum::<f64>() / rows.len() as f64);

    match mean_delta {
        Some(mean) => log::info!(
            "Scenario {:+}% GDP over {} rows: mean life expectancy change {:+.3} years",
            params.gdp_change_pct,
            rows.len(),
            mean
        ),
        None => log::warn!("Scenario filter selected no observations"),
    }

    Ok(ScenarioReport {
        gdp_change_pct: params.gdp_change_pct,
        rows,
        by_tier,
        mean_delta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegressionFeature;
    use crate::data::Observation;
    use approx::assert_abs_diff_eq;

    fn model(beta_log_gdp: f64) -> FittedModel {
        FittedModel {
            features: vec![RegressionFeature::LogGdp, RegressionFeature::Year],
            coefficients: vec![beta_log_gdp, 0.1],
            intercept: -150.0,
            r_squared: 0.8,
            n_observations: 4,
            base_year: 2000,
        }
    }

    fn dataset_and_assignments() -> (Dataset, Vec<ClusterAssignment>) {
        let dataset = Dataset::from_observations(vec![
            Observation::new("A", 2000, 50.0, 800.0),
            Observation::new("B", 2000, 62.0, 4_000.0),
            Observation::new("C", 2005, 71.0, 10_000.0),
            Observation::new("D", 2005, 80.0, 45_000.0),
        ])
        .unwrap();
        let assignments = RiskTier::ALL
            .iter()
            .enumerate()
            .map(|(cluster_id, &tier)| ClusterAssignment { cluster_id, tier })
            .collect();
        (dataset, assignments)
    }

    fn params(pct: f64) -> ScenarioParams {
        ScenarioParams {
            gdp_change_pct: pct,
            filter: ScenarioFilter::default(),
        }
    }

    #[test]
    fn test_zero_change_gives_zero_delta() {
        let (dataset, assignments) = dataset_and_assignments();
        let report = simulate(&dataset, &model(2.0), &assignments, &params(0.0)).unwrap();
        assert_eq!(report.rows.len(), 4);
        for row in &report.rows {
            assert_eq!(row.delta, 0.0);
        }
        assert_eq!(report.mean_delta, Some(0.0));
    }

    #[test]
    fn test_documented_example() {
        let point = simulate_point(&model(2.0), 10_000.0, 2010, 10.0).unwrap();
        assert_abs_diff_eq!(point.delta, 2.0 * 1.1f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(point.delta, 0.19, epsilon = 0.01);
    }

    #[test]
    fn test_monotonic_in_change_with_coefficient_sign() {
        let (dataset, assignments) = dataset_and_assignments();
        for beta in [2.0, -2.0] {
            let m = model(beta);
            let deltas: Vec<f64> = [-50.0, -10.0, 0.0, 10.0, 50.0, 200.0]
                .iter()
                .map(|&pct| {
                    simulate(&dataset, &m, &assignments, &params(pct))
                        .unwrap()
                        .rows[2]
                        .delta
                })
                .collect();
            for pair in deltas.windows(2) {
                if beta > 0.0 {
                    assert!(pair[1] > pair[0]);
                } else {
                    assert!(pair[1] < pair[0]);
                }
            }
        }
    }

    #[test]
    fn test_invalid_change_rejected() {
        let (dataset, assignments) = dataset_and_assignments();
        for pct in [-150.0, -100.0, f64::NAN, f64::INFINITY] {
            let err = simulate(&dataset, &model(2.0), &assignments, &params(pct)).unwrap_err();
            assert!(matches!(err, AnalysisError::InvalidScenarioParameter(_)));
        }
        assert!(simulate_point(&model(2.0), 1_000.0, 2000, -150.0).is_err());
        assert!(simulate_point(&model(2.0), 0.0, 2000, 10.0).is_err());
    }

    #[test]
    fn test_runs_are_independent() {
        let (dataset, assignments) = dataset_and_assignments();
        let m = model(2.0);
        let first = simulate(&dataset, &m, &assignments, &params(10.0)).unwrap();
        let _ = simulate(&dataset, &m, &assignments, &params(-40.0)).unwrap();
        let again = simulate(&dataset, &m, &assignments, &params(10.0)).unwrap();
        assert_eq!(first, again);
        assert_eq!(m, model(2.0));
    }

    #[test]
    fn test_filter_and_tier_aggregation() {
        let (dataset, assignments) = dataset_and_assignments();
        let params = ScenarioParams {
            gdp_change_pct: 25.0,
            filter: ScenarioFilter {
                countries: vec![],
                tiers: vec![RiskTier::HighRisk, RiskTier::LowRisk],
            },
        };
        let report = simulate(&dataset, &model(2.0), &assignments, &params).unwrap();
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.by_tier.len(), 2);
        assert_eq!(report.by_tier[0].tier, RiskTier::HighRisk);
        assert_eq!(report.by_tier[1].tier, RiskTier::LowRisk);
        // Without a year effect on the delta every row gains 2 ln 1.25.
        assert_abs_diff_eq!(report.by_tier[0].mean_delta, 2.0 * 1.25f64.ln(), epsilon = 1e-9);
        assert_abs_diff_eq!(report.mean_delta.unwrap(), 2.0 * 1.25f64.ln(), epsilon = 1e-9);

        let only_b = ScenarioParams {
            gdp_change_pct: 25.0,
            filter: ScenarioFilter {
                countries: vec!["B".to_string()],
                tiers: vec![],
            },
        };
        let report = simulate(&dataset, &model(2.0), &assignments, &only_b).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].risk_tier, RiskTier::ElevatedRisk);
        assert_abs_diff_eq!(report.rows[0].scenario_gdp, 5_000.0);

        let nobody = ScenarioParams {
            gdp_change_pct: 25.0,
            filter: ScenarioFilter {
                countries: vec!["Atlantis".to_string()],
                tiers: vec![],
            },
        };
        let report = simulate(&dataset, &model(2.0), &assignments, &nobody).unwrap();
        assert!(report.rows.is_empty());
        assert_eq!(report.mean_delta, None);
        assert!(report.most_benefited_tier().is_none());
    }

    #[test]
    fn test_mismatched_assignments_rejected() {
        let (dataset, assignments) = dataset_and_assignments();
        let err = simulate(&dataset, &model(2.0), &assignments[..2], &params(10.0)).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidScenarioParameter(_)));
    }
}
