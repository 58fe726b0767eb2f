//! Analysis configuration.
//!
//! Every option has an explicit default in [`AnalysisConfig::default`]. A
//! configuration file is plain TOML; any key it omits keeps its default, and
//! command-line flags override both.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Features available to the outcome regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionFeature {
    /// Natural log of GDP.
    LogGdp,
    /// Calendar year.
    Year,
    /// Years since the earliest year in the training data.
    YearIndex,
}

impl RegressionFeature {
    pub fn name(&self) -> &'static str {
        match self {
            RegressionFeature::LogGdp => "log_gdp",
            RegressionFeature::Year => "year",
            RegressionFeature::YearIndex => "year_index",
        }
    }

    /// Parses a feature from its column-style name.
    pub fn parse(name: &str) -> Result<Self, AnalysisError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "log_gdp" | "gdp_log" => Ok(RegressionFeature::LogGdp),
            "year" => Ok(RegressionFeature::Year),
            "year_index" => Ok(RegressionFeature::YearIndex),
            other => Err(AnalysisError::InvalidConfig(format!(
                "unknown regression feature '{other}' (expected log_gdp, year or year_index)"
            ))),
        }
    }
}

impl fmt::Display for RegressionFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do with rows whose life expectancy or GDP is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MissingValuePolicy {
    /// Drop the row.
    Drop,
    /// Fill with the mean of the same country's present values; drop the row
    /// when the country has none.
    CountryMean,
}

/// What to do when the regression design matrix is rank-deficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RankDeficiencyPolicy {
    /// Fail with `ModelDegenerate`.
    Fail,
    /// Drop zero-variance features and refit on the rest.
    DropConstantFeatures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Number of K-means clusters (risk segments).
    pub clusters: usize,
    /// Rows reported in each outlier list.
    pub top_n: usize,
    /// GDP perturbation for the scenario simulator, in percent.
    pub gdp_change_pct: f64,
    /// Regression features, in design-matrix order.
    pub features: Vec<RegressionFeature>,
    /// Seed for K-means initialisation and the holdout shuffle.
    pub seed: u64,
    pub missing_values: MissingValuePolicy,
    pub rank_deficiency: RankDeficiencyPolicy,
    /// Independent K-means restarts; the lowest-inertia run wins.
    pub kmeans_runs: usize,
    pub kmeans_max_iterations: u64,
    pub kmeans_tolerance: f64,
    /// Share of rows held out for a train/test R² diagnostic. Unset skips it.
    pub holdout_fraction: Option<f64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            clusters: 4,
            top_n: 10,
            gdp_change_pct: 10.0,
            features: vec![RegressionFeature::LogGdp, RegressionFeature::Year],
            seed: 42,
            missing_values: MissingValuePolicy::Drop,
            rank_deficiency: RankDeficiencyPolicy::Fail,
            kmeans_runs: 10,
            kmeans_max_iterations: 300,
            kmeans_tolerance: 1e-4,
            holdout_fraction: None,
        }
    }
}

impl AnalysisConfig {
    /// Loads a configuration from a TOML file and validates it.
    pub fn from_toml_file(path: &Path) -> Result<Self, AnalysisError> {
        let text = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.clusters < 2 {
            return Err(AnalysisError::InvalidConfig(format!(
                "clusters must be at least 2 to form ordinal risk tiers, got {}",
                self.clusters
            )));
        }
        if self.top_n == 0 {
            return Err(AnalysisError::InvalidConfig(
                "top_n must be at least 1".to_string(),
            ));
        }
        if self.features.is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "at least one regression feature is required".to_string(),
            ));
        }
        for (i, feature) in self.features.iter().enumerate() {
            if self.features[..i].contains(feature) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "regression feature '{feature}' is listed more than once"
                )));
            }
        }
        if self.kmeans_runs == 0 || self.kmeans_max_iterations == 0 {
            return Err(AnalysisError::InvalidConfig(
                "kmeans_runs and kmeans_max_iterations must be positive".to_string(),
            ));
        }
        if !(self.kmeans_tolerance.is_finite() && self.kmeans_tolerance > 0.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "kmeans_tolerance must be a positive number, got {}",
                self.kmeans_tolerance
            )));
        }
        if let Some(fraction) = self.holdout_fraction {
            if !(fraction > 0.0 && fraction < 1.0) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "holdout_fraction must lie strictly between 0 and 1, got {fraction}"
                )));
            }
        }
        // gdp_change_pct is checked by the scenario simulator.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clusters, 4);
        assert_eq!(config.top_n, 10);
        assert_eq!(
            config.features,
            vec![RegressionFeature::LogGdp, RegressionFeature::Year]
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AnalysisConfig = toml::from_str(
            r#"
            clusters = 3
            features = ["log_gdp", "year_index"]
            missing_values = "country_mean"
            "#,
        )
        .unwrap();
        assert_eq!(config.clusters, 3);
        assert_eq!(config.top_n, 10);
        assert_eq!(config.missing_values, MissingValuePolicy::CountryMean);
        assert_eq!(config.features[1], RegressionFeature::YearIndex);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<AnalysisConfig, _> = toml::from_str("clusterz = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AnalysisConfig::default();
        config.clusters = 1;
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidConfig(_))
        ));

        let mut config = AnalysisConfig::default();
        config.features = vec![RegressionFeature::Year, RegressionFeature::Year];
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.holdout_fraction = Some(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_feature_names() {
        assert_eq!(
            RegressionFeature::parse("LOG_GDP").unwrap(),
            RegressionFeature::LogGdp
        );
        assert_eq!(
            RegressionFeature::parse("gdp_log").unwrap(),
            RegressionFeature::LogGdp
        );
        assert!(RegressionFeature::parse("population").is_err());
    }
}
