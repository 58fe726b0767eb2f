//! K-means risk segmentation
//!
//! Observations are clustered on standardized life expectancy and log-GDP.
//! K-means numbers its clusters arbitrarily, so the raw indices are never
//! exposed: centroids are ranked by life expectancy and the rank becomes the
//! cluster id, which in turn fixes the risk tier. Refitting the same data
//! therefore reproduces the same labels even when the raw indices permute.

use crate::config::AnalysisConfig;
use crate::data::Dataset;
use crate::error::AnalysisError;
use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Rows used for the silhouette diagnostic; it is quadratic in this count.
const SILHOUETTE_SAMPLE: usize = 1000;

/// Ordinal risk tier, from worst to best outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    #[serde(rename = "High Risk")]
    HighRisk,
    #[serde(rename = "Elevated Risk")]
    ElevatedRisk,
    #[serde(rename = "Moderate Risk")]
    ModerateRisk,
    #[serde(rename = "Low Risk")]
    LowRisk,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::HighRisk,
        RiskTier::ElevatedRisk,
        RiskTier::ModerateRisk,
        RiskTier::LowRisk,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::HighRisk => "High Risk",
            RiskTier::ElevatedRisk => "Elevated Risk",
            RiskTier::ModerateRisk => "Moderate Risk",
            RiskTier::LowRisk => "Low Risk",
        }
    }

    /// Tier of the cluster ranked `rank` (0 = lowest life expectancy) out of
    /// `n_clusters`. The lowest rank is always High Risk and the highest always
    /// Low Risk; with four clusters each tier is used exactly once.
    pub fn for_rank(rank: usize, n_clusters: usize) -> Self {
        if n_clusters < 2 {
            return RiskTier::HighRisk;
        }
        let last = (Self::ALL.len() - 1) as f64;
        let index = (rank as f64 * last / (n_clusters - 1) as f64).round() as usize;
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    /// Parses a tier from its label or a kebab/snake-case spelling such as
    /// `high-risk`.
    pub fn parse(text: &str) -> Option<Self> {
        let normalized: String = text
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        Self::ALL.into_iter().find(|tier| {
            let label: String = tier
                .label()
                .to_ascii_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .collect();
            label == normalized || label.trim_end_matches("risk") == normalized
        })
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Standardization parameters for (life expectancy, log-GDP).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: [f64; 2],
    /// Population standard deviation; a zero deviation is stored as 1.
    pub std: [f64; 2],
}

impl FeatureScaler {
    pub fn fit(points: &[[f64; 2]]) -> Self {
        let n = points.len() as f64;
        let mut mean = [0.0; 2];
        let mut std = [0.0; 2];
        for j in 0..2 {
            mean[j] = points.iter().map(|p| p[j]).sum::<f64>() / n;
            let var = points.iter().map(|p| (p[j] - mean[j]).powi(2)).sum::<f64>() / n;
            std[j] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }
        Self { mean, std }
    }

    pub fn transform(&self, life_expectancy: f64, log_gdp: f64) -> [f64; 2] {
        [
            (life_expectancy - self.mean[0]) / self.std[0],
            (log_gdp - self.mean[1]) / self.std[1],
        ]
    }

    pub fn inverse(&self, scaled: [f64; 2]) -> [f64; 2] {
        [
            scaled[0] * self.std[0] + self.mean[0],
            scaled[1] * self.std[1] + self.mean[1],
        ]
    }
}

/// Fitted segmentation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    pub scaler: FeatureScaler,
    /// Centroids in standardized space, ordered by ascending life expectancy.
    /// The position of a centroid is its cluster id.
    pub centroids: Vec<[f64; 2]>,
    /// Tier of each cluster id.
    pub tiers: Vec<RiskTier>,
    /// Within-cluster sum of squares on the training data.
    pub inertia: f64,
    pub seed: u64,
}

impl ClusterModel {
    pub fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    /// Cluster id of the centroid nearest to a point, ties going to the lower id.
    pub fn assign(&self, life_expectancy: f64, log_gdp: f64) -> usize {
        let point = self.scaler.transform(life_expectancy, log_gdp);
        let mut min_distance = f64::INFINITY;
        let mut closest_cluster = 0;

        for (cluster_id, centroid) in self.centroids.iter().enumerate() {
            let distance = squared_distance(&point, centroid);
            if distance < min_distance {
                min_distance = distance;
                closest_cluster = cluster_id;
            }
        }

        closest_cluster
    }

    pub fn tier(&self, cluster_id: usize) -> RiskTier {
        self.tiers[cluster_id]
    }

    /// Centroids mapped back to (life expectancy, log-GDP) units.
    pub fn centroids_original_units(&self) -> Vec<[f64; 2]> {
        self.centroids
            .iter()
            .map(|c| self.scaler.inverse(*c))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterAssignment {
    pub cluster_id: usize,
    pub tier: RiskTier,
}

/// Per-observation cluster assignments plus the model that produced them.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub model: ClusterModel,
    /// Aligned with the dataset by index.
    pub assignments: Vec<ClusterAssignment>,
    /// Mean silhouette coefficient over a sample of rows.
    pub silhouette: f64,
}

impl Segmentation {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.model.n_clusters()];
        for assignment in &self.assignments {
            sizes[assignment.cluster_id] += 1;
        }
        sizes
    }
}

/// K-means settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationParams {
    pub n_clusters: usize,
    pub n_runs: usize,
    pub max_iterations: u64,
    pub tolerance: f64,
    pub seed: u64,
}

impl From<&AnalysisConfig> for SegmentationParams {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            n_clusters: config.clusters,
            n_runs: config.kmeans_runs,
            max_iterations: config.kmeans_max_iterations,
            tolerance: config.kmeans_tolerance,
            seed: config.seed,
        }
    }
}

/// Fit the segmentation on a cleaned dataset.
///
/// # Returns
/// * `Segmentation` with ranked centroids, tier labels and one assignment per row
pub fn fit_segmentation(
    dataset: &Dataset,
    params: &SegmentationParams,
) -> Result<Segmentation, AnalysisError> {
    let k = params.n_clusters;
    let points: Vec<[f64; 2]> = dataset
        .iter()
        .map(|o| [o.life_expectancy, o.log_gdp])
        .collect();

    let distinct = points
        .iter()
        .map(|p| (p[0].to_bits(), p[1].to_bits()))
        .collect::<HashSet<_>>()
        .len();
    if distinct < k {
        return Err(AnalysisError::ClusteringDegenerate {
            requested: k,
            distinct,
        });
    }

    let scaler = FeatureScaler::fit(&points);
    let scaled: Vec<[f64; 2]> = points
        .iter()
        .map(|p| scaler.transform(p[0], p[1]))
        .collect();
    let features = Array2::from_shape_fn((scaled.len(), 2), |(i, j)| scaled[i][j]);

    let observations = DatasetBase::from(features);
    let rng = StdRng::seed_from_u64(params.seed);
    let kmeans: KMeans<f64, L2Dist> = KMeans::params_with(k, rng, L2Dist)
        .n_runs(params.n_runs)
        .max_n_iterations(params.max_iterations)
        .tolerance(params.tolerance)
        .fit(&observations)?;

    let raw = kmeans.centroids();
    let mut order: Vec<usize> = (0..raw.nrows()).collect();
    order.sort_by(|&a, &b| {
        raw[[a, 0]]
            .total_cmp(&raw[[b, 0]])
            .then(raw[[a, 1]].total_cmp(&raw[[b, 1]]))
            .then(a.cmp(&b))
    });
    let centroids: Vec<[f64; 2]> = order.iter().map(|&i| [raw[[i, 0]], raw[[i, 1]]]).collect();
    let tiers: Vec<RiskTier> = (0..k).map(|rank| RiskTier::for_rank(rank, k)).collect();

    let mut model = ClusterModel {
        scaler,
        centroids,
        tiers,
        inertia: 0.0,
        seed: params.seed,
    };

    let labels: Vec<usize> = dataset
        .iter()
        .map(|o| model.assign(o.life_expectancy, o.log_gdp))
        .collect();
    model.inertia = compute_inertia(&scaled, &labels, &model.centroids);
    let silhouette = compute_silhouette_sample(&scaled, &labels, k, SILHOUETTE_SAMPLE);

    let assignments: Vec<ClusterAssignment> = labels
        .iter()
        .map(|&cluster_id| ClusterAssignment {
            cluster_id,
            tier: model.tier(cluster_id),
        })
        .collect();

    let segmentation = Segmentation {
        model,
        assignments,
        silhouette,
    };
    let centroids = segmentation.model.centroids_original_units();
    for (cluster_id, size) in segmentation.cluster_sizes().iter().enumerate() {
        let [le, log_gdp] = centroids[cluster_id];
        if *size == 0 {
            log::warn!("Cluster {cluster_id} has no members after assignment");
        }
        log::info!(
            "Cluster {cluster_id} ({}): {size} rows, centroid life expectancy {le:.1}, log GDP {log_gdp:.2}",
            segmentation.model.tier(cluster_id)
        );
    }
    log::debug!(
        "Segmentation inertia {:.3}, silhouette {:.3}",
        segmentation.model.inertia,
        segmentation.silhouette
    );

    Ok(segmentation)
}

/// Assign every observation with an existing cluster model, without refitting.
pub fn assign_dataset(dataset: &Dataset, model: &ClusterModel) -> Vec<ClusterAssignment> {
    dataset
        .iter()
        .map(|o| {
            let cluster_id = model.assign(o.life_expectancy, o.log_gdp);
            ClusterAssignment {
                cluster_id,
                tier: model.tier(cluster_id),
            }
        })
        .collect()
}

/// Within-cluster sum of squared distances in standardized units.
fn compute_inertia(points: &[[f64; 2]], labels: &[usize], centroids: &[[f64; 2]]) -> f64 {
    points
        .iter()
        .zip(labels)
        .map(|(point, &cluster)| squared_distance(point, &centroids[cluster]))
        .sum()
}

/// Mean silhouette coefficient over the first `sample_size` points. A point
/// alone in its cluster, or with no other cluster in the sample, scores 0.
fn compute_silhouette_sample(
    points: &[[f64; 2]],
    labels: &[usize],
    n_clusters: usize,
    sample_size: usize,
) -> f64 {
    let sample = &points[..points.len().min(sample_size)];
    if sample.len() < 2 {
        return 0.0;
    }

    let total: f64 = sample
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let mut sums = vec![0.0; n_clusters];
            let mut counts = vec![0usize; n_clusters];
            for (j, other) in sample.iter().enumerate() {
                if i != j {
                    sums[labels[j]] += squared_distance(point, other).sqrt();
                    counts[labels[j]] += 1;
                }
            }

            let own = labels[i];
            if counts[own] == 0 {
                return 0.0;
            }
            let cohesion = sums[own] / counts[own] as f64;
            let separation = (0..n_clusters)
                .filter(|&c| c != own && counts[c] > 0)
                .map(|c| sums[c] / counts[c] as f64)
                .fold(f64::INFINITY, f64::min);

            let spread = cohesion.max(separation);
            if separation.is_infinite() || spread == 0.0 {
                0.0
            } else {
                (separation - cohesion) / spread
            }
        })
        .sum();

    total / sample.len() as f64
}

fn squared_distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}
