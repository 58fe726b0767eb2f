//! Output files written after a run: per-row tables as CSV through Polars and
//! a TOML summary of everything else.

use crate::data::{CleaningReport, Dataset};
use crate::describe::{DescriptiveSummary, YearTrend};
use crate::error::AnalysisError;
use crate::outliers::OutlierReport;
use crate::pipeline::PipelineOutput;
use crate::regression::{FittedModel, HoldoutReport};
use crate::scenario::{ScenarioReport, TierDelta};
use crate::segment::{RiskTier, Segmentation};
use polars::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const SCORED_FILE: &str = "scored.csv";
pub const SCENARIO_FILE: &str = "scenario.csv";
pub const TREND_FILE: &str = "trend.csv";
pub const SUMMARY_FILE: &str = "summary.toml";

/// Paths of the files written by [`write_outputs`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub scored: PathBuf,
    pub scenario: PathBuf,
    pub trend: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub tier: RiskTier,
    pub size: usize,
    pub centroid_life_expectancy: f64,
    pub centroid_log_gdp: f64,
}

#[derive(Debug, Serialize)]
pub struct SegmentationSummary {
    pub inertia: f64,
    pub silhouette: f64,
    pub seed: u64,
    pub clusters: Vec<ClusterSummary>,
}

impl SegmentationSummary {
    pub fn new(segmentation: &Segmentation) -> Self {
        let sizes = segmentation.cluster_sizes();
        let clusters = segmentation
            .model
            .centroids_original_units()
            .into_iter()
            .enumerate()
            .map(|(cluster_id, [le, log_gdp])| ClusterSummary {
                cluster_id,
                tier: segmentation.model.tier(cluster_id),
                size: sizes[cluster_id],
                centroid_life_expectancy: le,
                centroid_log_gdp: log_gdp,
            })
            .collect();
        Self {
            inertia: segmentation.model.inertia,
            silhouette: segmentation.silhouette,
            seed: segmentation.model.seed,
            clusters,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScenarioSummary {
    pub gdp_change_pct: f64,
    pub observations: usize,
    pub mean_delta: Option<f64>,
    pub by_tier: Vec<TierDelta>,
}

/// Contents of `summary.toml`.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub observations: usize,
    pub cleaning: &'a CleaningReport,
    pub descriptive: &'a DescriptiveSummary,
    pub outcome_model: &'a FittedModel,
    pub holdout: Option<&'a HoldoutReport>,
    pub outliers: &'a OutlierReport,
    pub segmentation: SegmentationSummary,
    pub scenario: ScenarioSummary,
}

impl<'a> RunSummary<'a> {
    pub fn new(output: &'a PipelineOutput) -> Self {
        Self {
            observations: output.dataset.len(),
            cleaning: &output.dataset.report,
            descriptive: &output.summary,
            outcome_model: &output.outcome.model,
            holdout: output.holdout.as_ref(),
            outliers: &output.outliers,
            segmentation: SegmentationSummary::new(&output.segmentation),
            scenario: ScenarioSummary {
                gdp_change_pct: output.scenario.gdp_change_pct,
                observations: output.scenario.rows.len(),
                mean_delta: output.scenario.mean_delta,
                by_tier: output.scenario.by_tier.clone(),
            },
        }
    }
}

/// Write every output file of a run into `dir`, creating it if needed.
pub fn write_outputs(output: &PipelineOutput, dir: &Path) -> Result<OutputPaths, AnalysisError> {
    fs::create_dir_all(dir)?;
    let paths = OutputPaths {
        scored: dir.join(SCORED_FILE),
        scenario: dir.join(SCENARIO_FILE),
        trend: dir.join(TREND_FILE),
        summary: dir.join(SUMMARY_FILE),
    };

    let mut scored = scored_frame(output)?;
    write_csv(&mut scored, &paths.scored)?;
    let mut scenario = scenario_frame(&output.scenario)?;
    write_csv(&mut scenario, &paths.scenario)?;
    let mut trend = trend_frame(&output.summary.trend)?;
    write_csv(&mut trend, &paths.trend)?;
    write_summary(&RunSummary::new(output), &paths.summary)?;

    log::info!("Wrote outputs to '{}'", dir.display());
    Ok(paths)
}

/// One row per observation with its fit, residual, cluster and quartile.
pub fn scored_frame(output: &PipelineOutput) -> Result<DataFrame, AnalysisError> {
    let dataset: &Dataset = &output.dataset;
    let assignments = &output.segmentation.assignments;
    let df = df!(
        "country" => dataset.iter().map(|o| o.country.as_str()).collect::<Vec<_>>(),
        "year" => dataset.iter().map(|o| o.year).collect::<Vec<i32>>(),
        "life_expectancy" => dataset.life_expectancy(),
        "gdp" => dataset.gdp(),
        "log_gdp" => dataset.iter().map(|o| o.log_gdp).collect::<Vec<f64>>(),
        "fitted_value" => output.outcome.fitted.clone(),
        "residual" => output.outcome.residuals.clone(),
        "cluster_id" => assignments.iter().map(|a| a.cluster_id as u32).collect::<Vec<u32>>(),
        "risk_tier" => assignments.iter().map(|a| a.tier.label()).collect::<Vec<_>>(),
        "outcome_quartile" => output.quartiles.iter().map(|&q| u32::from(q)).collect::<Vec<u32>>(),
    )?;
    Ok(df)
}

pub fn scenario_frame(report: &ScenarioReport) -> Result<DataFrame, AnalysisError> {
    let rows = &report.rows;
    let df = df!(
        "country" => rows.iter().map(|r| r.country.as_str()).collect::<Vec<_>>(),
        "year" => rows.iter().map(|r| r.year).collect::<Vec<i32>>(),
        "gdp" => rows.iter().map(|r| r.gdp).collect::<Vec<f64>>(),
        "scenario_gdp" => rows.iter().map(|r| r.scenario_gdp).collect::<Vec<f64>>(),
        "baseline_predicted" => rows.iter().map(|r| r.baseline_predicted).collect::<Vec<f64>>(),
        "scenario_predicted" => rows.iter().map(|r| r.scenario_predicted).collect::<Vec<f64>>(),
        "delta" => rows.iter().map(|r| r.delta).collect::<Vec<f64>>(),
        "cluster_id" => rows.iter().map(|r| r.cluster_id as u32).collect::<Vec<u32>>(),
        "risk_tier" => rows.iter().map(|r| r.risk_tier.label()).collect::<Vec<_>>(),
    )?;
    Ok(df)
}

pub fn trend_frame(trend: &[YearTrend]) -> Result<DataFrame, AnalysisError> {
    let df = df!(
        "year" => trend.iter().map(|t| t.year).collect::<Vec<i32>>(),
        "mean_life_expectancy" => trend.iter().map(|t| t.mean_life_expectancy).collect::<Vec<f64>>(),
        "observations" => trend.iter().map(|t| t.observations as u32).collect::<Vec<u32>>(),
    )?;
    Ok(df)
}

/// Write a frame as CSV with a header row.
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<(), AnalysisError> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    log::debug!("Wrote {} rows to '{}'", df.height(), path.display());
    Ok(())
}

pub fn write_summary(summary: &RunSummary<'_>, path: &Path) -> Result<(), AnalysisError> {
    let text = toml::to_string_pretty(summary)?;
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(())
}
