//! The batch run: every stage in order, each a pure function of the previous
//! stage's output. The first failing stage aborts the run.

use crate::artifact::ModelArtifact;
use crate::config::{AnalysisConfig, MissingValuePolicy};
use crate::data::{load_dataset, Dataset};
use crate::describe::{describe, outcome_quartiles, DescriptiveSummary};
use crate::error::{AnalysisError, Stage};
use crate::outliers::{detect_outliers, OutlierReport};
use crate::regression::{evaluate_holdout, fit_outcome_model, HoldoutReport, OutcomeFit};
use crate::scenario::{gdp_multiplier, simulate, ScenarioFilter, ScenarioParams, ScenarioReport};
use crate::segment::{assign_dataset, fit_segmentation, Segmentation, SegmentationParams};
use log::{debug, error, info};
use std::path::Path;
use std::time::Instant;

/// Everything a full run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub config: AnalysisConfig,
    pub dataset: Dataset,
    pub summary: DescriptiveSummary,
    /// Life expectancy quartile (1-4) per observation.
    pub quartiles: Vec<u8>,
    pub outcome: OutcomeFit,
    pub holdout: Option<HoldoutReport>,
    pub outliers: OutlierReport,
    pub segmentation: Segmentation,
    pub scenario: ScenarioReport,
}

impl PipelineOutput {
    /// The fitted models, ready to be saved and reused without refitting.
    pub fn artifact(&self) -> ModelArtifact {
        ModelArtifact::new(
            self.outcome.model.clone(),
            self.segmentation.model.clone(),
        )
    }
}

fn run_stage<T>(
    stage: Stage,
    f: impl FnOnce() -> Result<T, AnalysisError>,
) -> Result<T, AnalysisError> {
    let start = Instant::now();
    debug!("Stage '{stage}' started");
    let result = f();
    match &result {
        Ok(_) => debug!("Stage '{stage}' finished in {:.2?}", start.elapsed()),
        Err(e) => error!("Stage '{stage}' failed: {e}"),
    }
    result
}

/// Load `input` and run every stage on it.
pub fn run_pipeline(input: &Path, config: &AnalysisConfig) -> Result<PipelineOutput, AnalysisError> {
    run_stage(Stage::Config, || {
        config.validate()?;
        gdp_multiplier(config.gdp_change_pct).map(|_| ())
    })?;
    let dataset = run_stage(Stage::Load, || load_dataset(input, config.missing_values))?;
    analyze(dataset, config)
}

/// Run every stage after loading on an already-cleaned dataset.
pub fn analyze(dataset: Dataset, config: &AnalysisConfig) -> Result<PipelineOutput, AnalysisError> {
    config.validate()?;

    let (summary, quartiles) = run_stage(Stage::Describe, || {
        let summary = describe(&dataset)?;
        let quartiles = outcome_quartiles(&dataset, &summary.life_expectancy);
        info!(
            "Life expectancy {:.1} to {:.1} (gap {:.1} years) across {} rows",
            summary.life_expectancy.min,
            summary.life_expectancy.max,
            summary.outcome_gap,
            dataset.len()
        );
        Ok((summary, quartiles))
    })?;

    let (outcome, holdout) = run_stage(Stage::Regression, || {
        let outcome = fit_outcome_model(&dataset, &config.features, config.rank_deficiency)?;
        let holdout = config
            .holdout_fraction
            .map(|fraction| {
                evaluate_holdout(
                    &dataset,
                    &config.features,
                    config.rank_deficiency,
                    fraction,
                    config.seed,
                )
            })
            .transpose()?;
        Ok((outcome, holdout))
    })?;

    let outliers = run_stage(Stage::Outliers, || {
        detect_outliers(&dataset, &outcome, config.top_n)
    })?;

    let segmentation = run_stage(Stage::Segmentation, || {
        fit_segmentation(&dataset, &SegmentationParams::from(config))
    })?;

    let scenario = run_stage(Stage::Scenario, || {
        simulate(
            &dataset,
            &outcome.model,
            &segmentation.assignments,
            &ScenarioParams {
                gdp_change_pct: config.gdp_change_pct,
                filter: ScenarioFilter::default(),
            },
        )
    })?;

    Ok(PipelineOutput {
        config: config.clone(),
        dataset,
        summary,
        quartiles,
        outcome,
        holdout,
        outliers,
        segmentation,
        scenario,
    })
}

/// Re-run a scenario against a saved artifact. The models are used as saved;
/// rows are assigned to the saved clusters.
pub fn scenario_from_artifact(
    input: &Path,
    artifact: &ModelArtifact,
    params: &ScenarioParams,
    missing_values: MissingValuePolicy,
) -> Result<(Dataset, ScenarioReport), AnalysisError> {
    run_stage(Stage::Scenario, || gdp_multiplier(params.gdp_change_pct).map(|_| ()))?;
    let dataset = run_stage(Stage::Load, || load_dataset(input, missing_values))?;
    let report = run_stage(Stage::Scenario, || {
        let assignments = assign_dataset(&dataset, &artifact.cluster_model);
        simulate(&dataset, &artifact.outcome_model, &assignments, params)
    })?;
    Ok((dataset, report))
}
