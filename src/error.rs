//! Error taxonomy shared by every pipeline stage.

use polars::prelude::PolarsError;
use std::fmt;
use thiserror::Error;

/// The pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Load,
    Describe,
    Regression,
    Outliers,
    Segmentation,
    Scenario,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "configuration",
            Stage::Load => "load/clean",
            Stage::Describe => "descriptive analysis",
            Stage::Regression => "outcome regression",
            Stage::Outliers => "outlier detection",
            Stage::Segmentation => "segmentation",
            Stage::Scenario => "scenario simulation",
            Stage::Report => "report output",
        };
        f.write_str(name)
    }
}

/// A comprehensive error type for all analysis failures.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error(
        "No usable rows remain after cleaning: {dropped} of {total} input rows were dropped."
    )]
    EmptyDataset { total: usize, dropped: usize },

    #[error("The outcome regression cannot be fit: {0}")]
    ModelDegenerate(String),

    #[error(
        "Cannot form {requested} non-empty clusters from only {distinct} distinct (life_expectancy, log_gdp) points."
    )]
    ClusteringDegenerate { requested: usize, distinct: usize },

    #[error("Invalid scenario parameter: {0}")]
    InvalidScenarioParameter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("K-means fitting failed: {0}")]
    Clustering(#[from] linfa_clustering::KMeansError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error from the underlying Polars library: {0}")]
    Polars(#[from] PolarsError),

    #[error("Failed to parse TOML file: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl AnalysisError {
    /// The stage that raises this kind of error. IO and CSV errors can come
    /// from either end of the pipeline, so they carry no fixed stage.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AnalysisError::DataIntegrity(_) | AnalysisError::EmptyDataset { .. } => {
                Some(Stage::Load)
            }
            AnalysisError::ModelDegenerate(_) => Some(Stage::Regression),
            AnalysisError::ClusteringDegenerate { .. } | AnalysisError::Clustering(_) => {
                Some(Stage::Segmentation)
            }
            AnalysisError::InvalidScenarioParameter(_) => Some(Stage::Scenario),
            AnalysisError::InvalidConfig(_)
            | AnalysisError::TomlParse(_)
            | AnalysisError::TomlSerialize(_) => Some(Stage::Config),
            AnalysisError::Io(_) | AnalysisError::Polars(_) => None,
        }
    }
}
