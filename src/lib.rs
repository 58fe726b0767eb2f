//! healthgap: life expectancy versus GDP analytics
//!
//! This library loads a country/year panel of life expectancy and GDP, fits a
//! log-GDP outcome regression, ranks countries by residual, segments them into
//! ordinal risk tiers with K-means, and simulates GDP change scenarios.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod data;
pub mod describe;
pub mod error;
pub mod outliers;
pub mod pipeline;
pub mod regression;
pub mod report;
pub mod scenario;
pub mod segment;

// Re-export public items for easier access
pub use artifact::ModelArtifact;
pub use cli::{Cli, Command};
pub use config::{AnalysisConfig, MissingValuePolicy, RankDeficiencyPolicy, RegressionFeature};
pub use data::{load_dataset, Dataset, Observation};
pub use error::{AnalysisError, Stage};
pub use pipeline::{analyze, run_pipeline, scenario_from_artifact, PipelineOutput};
pub use regression::{fit_outcome_model, FittedModel};
pub use scenario::{simulate, simulate_point, ScenarioFilter, ScenarioParams};
pub use segment::{fit_segmentation, ClusterModel, RiskTier};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, AnalysisError>;
