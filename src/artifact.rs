//! Saved model artifact: the fitted outcome model and cluster model in a
//! small, human-readable TOML file, so later scenario runs reuse the exact
//! same parameters instead of refitting.

use crate::error::AnalysisError;
use crate::regression::FittedModel;
use crate::segment::ClusterModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Format version written into every artifact.
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub outcome_model: FittedModel,
    pub cluster_model: ClusterModel,
}

impl ModelArtifact {
    pub fn new(outcome_model: FittedModel, cluster_model: ClusterModel) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            outcome_model,
            cluster_model,
        }
    }

    /// Saves the artifact in TOML format.
    pub fn save(&self, path: &Path) -> Result<(), AnalysisError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        log::info!("Model artifact saved to '{}'", path.display());
        Ok(())
    }

    /// Loads an artifact and checks that it is internally consistent.
    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let toml_string = fs::read_to_string(path)?;
        let artifact: ModelArtifact = toml::from_str(&toml_string)?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<(), AnalysisError> {
        if self.version != ARTIFACT_VERSION {
            return Err(AnalysisError::InvalidConfig(format!(
                "model artifact version {} is not supported (expected {ARTIFACT_VERSION})",
                self.version
            )));
        }
        let outcome = &self.outcome_model;
        if outcome.features.len() != outcome.coefficients.len() {
            return Err(AnalysisError::InvalidConfig(format!(
                "model artifact lists {} features but {} coefficients",
                outcome.features.len(),
                outcome.coefficients.len()
            )));
        }
        let clusters = &self.cluster_model;
        if clusters.centroids.is_empty() || clusters.centroids.len() != clusters.tiers.len() {
            return Err(AnalysisError::InvalidConfig(format!(
                "model artifact has {} centroids but {} tiers",
                clusters.centroids.len(),
                clusters.tiers.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegressionFeature;
    use crate::segment::{FeatureScaler, RiskTier};
    use tempfile::NamedTempFile;

    fn artifact() -> ModelArtifact {
        ModelArtifact::new(
            FittedModel {
                features: vec![RegressionFeature::LogGdp, RegressionFeature::YearIndex],
                coefficients: vec![2.5, 0.15],
                intercept: 12.0,
                r_squared: 0.71,
                n_observations: 96,
                base_year: 2000,
            },
            ClusterModel {
                scaler: FeatureScaler {
                    mean: [72.8, 26.4],
                    std: [10.6, 1.4],
                },
                centroids: vec![[-2.3, -0.9], [-0.1, 0.2], [0.5, -0.4], [0.7, 1.1]],
                tiers: RiskTier::ALL.to_vec(),
                inertia: 12.5,
                seed: 42,
            },
        )
    }

    #[test]
    fn test_save_and_load() {
        let file = NamedTempFile::new().unwrap();
        let original = artifact();
        original.save(file.path()).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("High Risk"));
        assert!(text.contains("year_index"));

        let loaded = ModelArtifact::load(file.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_inconsistent_artifact_rejected() {
        let file = NamedTempFile::new().unwrap();
        let mut broken = artifact();
        broken.outcome_model.coefficients.pop();
        broken.save(file.path()).unwrap();
        assert!(matches!(
            ModelArtifact::load(file.path()),
            Err(AnalysisError::InvalidConfig(_))
        ));
    }
}
