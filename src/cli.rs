//! Command-line interface definitions and argument parsing

use crate::config::{AnalysisConfig, MissingValuePolicy, RankDeficiencyPolicy, RegressionFeature};
use crate::scenario::ScenarioFilter;
use crate::segment::RiskTier;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Life expectancy and GDP analytics: outcome regression, outlier ranking,
/// risk segmentation and GDP scenarios
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full analysis and write the output tables
    Run(RunArgs),
    /// Re-run a GDP scenario with a saved model, without refitting
    Scenario(ScenarioArgs),
    /// Predict one (GDP, year) point with a saved model
    Predict(PredictArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the input CSV file
    #[arg(short, long)]
    pub input: PathBuf,

    /// TOML configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for the output tables and summary
    #[arg(short, long, default_value = "healthgap-out")]
    pub out_dir: PathBuf,

    /// Number of clusters (risk segments) for K-Means
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Rows reported in each outlier list
    #[arg(long)]
    pub top_n: Option<usize>,

    /// GDP change in percent for the scenario, e.g. 10 or -5
    #[arg(long, allow_negative_numbers = true)]
    pub gdp_change_pct: Option<f64>,

    /// Seed for K-Means initialization and the holdout split
    #[arg(long)]
    pub seed: Option<u64>,

    /// Regression features as a comma-separated list
    /// Example: --features "log_gdp,year_index"
    #[arg(long, value_delimiter = ',')]
    pub features: Vec<String>,

    /// Policy for missing life expectancy or GDP values
    #[arg(long, value_enum)]
    pub missing: Option<MissingValuePolicy>,

    /// Policy for a rank-deficient regression design
    #[arg(long, value_enum)]
    pub rank_deficiency: Option<RankDeficiencyPolicy>,

    /// Fraction of rows held out to report out-of-sample R²
    #[arg(long)]
    pub holdout: Option<f64>,

    /// Save the fitted models to this TOML file
    #[arg(long)]
    pub save_model: Option<PathBuf>,
}

impl RunArgs {
    /// Build the effective configuration: defaults, then the config file,
    /// then command-line flags.
    pub fn resolve_config(&self) -> anyhow::Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_toml_file(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(clusters) = self.clusters {
            config.clusters = clusters;
        }
        if let Some(top_n) = self.top_n {
            config.top_n = top_n;
        }
        if let Some(pct) = self.gdp_change_pct {
            config.gdp_change_pct = pct;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if !self.features.is_empty() {
            config.features = self
                .features
                .iter()
                .map(|name| RegressionFeature::parse(name))
                .collect::<Result<_, _>>()?;
        }
        if let Some(policy) = self.missing {
            config.missing_values = policy;
        }
        if let Some(policy) = self.rank_deficiency {
            config.rank_deficiency = policy;
        }
        if self.holdout.is_some() {
            config.holdout_fraction = self.holdout;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScenarioArgs {
    /// Path to the input CSV file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Model artifact written by `run --save-model`
    #[arg(short, long)]
    pub model: PathBuf,

    /// GDP change in percent
    #[arg(long, allow_negative_numbers = true, default_value = "10.0")]
    pub gdp_change_pct: f64,

    /// Only simulate these countries (repeatable)
    #[arg(long = "country")]
    pub countries: Vec<String>,

    /// Only simulate these risk tiers (repeatable), e.g. "High Risk"
    #[arg(long = "tier")]
    pub tiers: Vec<String>,

    /// Write the scenario table to this CSV file
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Policy for missing life expectancy or GDP values
    #[arg(long, value_enum, default_value = "drop")]
    pub missing: MissingValuePolicy,
}

impl ScenarioArgs {
    pub fn filter(&self) -> anyhow::Result<ScenarioFilter> {
        let tiers = self
            .tiers
            .iter()
            .map(|text| {
                RiskTier::parse(text).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Invalid risk tier: {} (expected one of High Risk, Elevated Risk, Moderate Risk, Low Risk)",
                        text
                    )
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(ScenarioFilter {
            countries: self.countries.clone(),
            tiers,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct PredictArgs {
    /// Model artifact written by `run --save-model`
    #[arg(short, long)]
    pub model: PathBuf,

    /// Point to predict as comma-separated values
    /// Example: --point "25000000000,2015" for GDP=2.5e10 in 2015
    #[arg(short, long)]
    pub point: String,

    /// Observed life expectancy; when given, the point is also assigned a risk tier
    #[arg(long)]
    pub life_expectancy: Option<f64>,

    /// GDP change in percent for the point scenario
    #[arg(long, allow_negative_numbers = true, default_value = "10.0")]
    pub gdp_change_pct: f64,
}

impl PredictArgs {
    /// Parse the point string.
    /// Expected format: "gdp,year"
    pub fn parse_point(&self) -> anyhow::Result<(f64, i32)> {
        let parts: Vec<&str> = self.point.split(',').collect();
        if parts.len() != 2 {
            anyhow::bail!("Point must be in format 'gdp,year'");
        }

        let gdp: f64 = parts[0]
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid GDP value: {}", parts[0]))?;
        let year: i32 = parts[1]
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid year value: {}", parts[1]))?;
        if !(gdp.is_finite() && gdp > 0.0) {
            anyhow::bail!("GDP must be positive, got {}", gdp);
        }

        Ok((gdp, year))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args() -> RunArgs {
        RunArgs {
            input: PathBuf::from("data.csv"),
            config: None,
            out_dir: PathBuf::from("out"),
            clusters: None,
            top_n: None,
            gdp_change_pct: None,
            seed: None,
            features: Vec::new(),
            missing: None,
            rank_deficiency: None,
            holdout: None,
            save_model: None,
        }
    }

    #[test]
    fn test_parse_point() {
        let mut args = PredictArgs {
            model: PathBuf::from("model.toml"),
            point: "10000,2015".to_string(),
            life_expectancy: None,
            gdp_change_pct: 10.0,
        };

        assert_eq!(args.parse_point().unwrap(), (10000.0, 2015));

        args.point = " 2.5e10 , 2000 ".to_string();
        assert_eq!(args.parse_point().unwrap(), (2.5e10, 2000));

        args.point = "invalid".to_string();
        assert!(args.parse_point().is_err());

        args.point = "-5,2000".to_string();
        assert!(args.parse_point().is_err());

        args.point = "1000,2000.5".to_string();
        assert!(args.parse_point().is_err());
    }

    #[test]
    fn test_defaults_without_overrides() {
        assert_eq!(run_args().resolve_config().unwrap(), AnalysisConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = RunArgs {
            clusters: Some(3),
            gdp_change_pct: Some(-5.0),
            features: vec!["gdp_log".to_string(), "year_index".to_string()],
            missing: Some(MissingValuePolicy::CountryMean),
            holdout: Some(0.2),
            ..run_args()
        };
        let config = args.resolve_config().unwrap();
        assert_eq!(config.clusters, 3);
        assert_eq!(config.gdp_change_pct, -5.0);
        assert_eq!(
            config.features,
            vec![RegressionFeature::LogGdp, RegressionFeature::YearIndex]
        );
        assert_eq!(config.missing_values, MissingValuePolicy::CountryMean);
        assert_eq!(config.holdout_fraction, Some(0.2));
        assert_eq!(config.top_n, 10);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = RunArgs {
            clusters: Some(1),
            ..run_args()
        };
        assert!(args.resolve_config().is_err());

        let args = RunArgs {
            features: vec!["population".to_string()],
            ..run_args()
        };
        assert!(args.resolve_config().is_err());
    }

    #[test]
    fn test_command_line_parsing() {
        let cli = Cli::try_parse_from([
            "healthgap",
            "run",
            "--input",
            "data.csv",
            "-k",
            "5",
            "--gdp-change-pct",
            "-20",
            "--features",
            "log_gdp,year",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.clusters, Some(5));
                assert_eq!(args.gdp_change_pct, Some(-20.0));
                assert_eq!(args.features, vec!["log_gdp", "year"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_scenario_filter() {
        let cli = Cli::try_parse_from([
            "healthgap",
            "scenario",
            "-i",
            "data.csv",
            "-m",
            "model.toml",
            "--country",
            "Chad",
            "--country",
            "Niger",
            "--tier",
            "high risk",
        ])
        .unwrap();
        let Command::Scenario(args) = cli.command else {
            panic!("expected the scenario subcommand");
        };
        let filter = args.filter().unwrap();
        assert_eq!(filter.countries, vec!["Chad", "Niger"]);
        assert_eq!(filter.tiers, vec![RiskTier::HighRisk]);

        let bad = ScenarioArgs {
            tiers: vec!["Severe".to_string()],
            ..args
        };
        assert!(bad.filter().is_err());
    }
}
