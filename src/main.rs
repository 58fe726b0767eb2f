//! healthgap: life expectancy versus GDP analytics CLI
//!
//! This is the main entrypoint that orchestrates the batch analysis, scenario
//! re-runs from a saved model, and single-point prediction.

use anyhow::Result;
use clap::Parser;
use healthgap::cli::{PredictArgs, RunArgs, ScenarioArgs};
use healthgap::report;
use healthgap::scenario::simulate_point;
use healthgap::{run_pipeline, scenario_from_artifact, AnalysisError, Cli, Command, ModelArtifact};
use healthgap::{ScenarioParams, Stage};
use std::time::Instant;

fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match &cli.command {
        Command::Run(args) => run_full_pipeline(args, cli.verbose),
        Command::Scenario(args) => run_scenario_mode(args),
        Command::Predict(args) => run_prediction_mode(args),
    };

    if let Err(err) = &result {
        if let Some(stage) = err.downcast_ref::<AnalysisError>().and_then(AnalysisError::stage) {
            eprintln!("Failed during {stage}");
        }
    }
    result
}

/// Run the full analysis pipeline
fn run_full_pipeline(args: &RunArgs, verbose: bool) -> Result<()> {
    println!("=== Life Expectancy / GDP Analysis ===\n");

    let start_time = Instant::now();
    let config = args.resolve_config()?;
    if verbose {
        println!("Input file: {}", args.input.display());
        println!("Configuration: {:?}\n", config);
    }

    let output = run_pipeline(&args.input, &config)?;
    let dataset = &output.dataset;

    println!(
        "✓ Data loaded: {} observations ({} rows dropped)",
        dataset.len(),
        dataset.report.dropped()
    );

    // Descriptive statistics
    println!("\n=== Descriptive Statistics ===");
    for (name, column) in [
        ("life_expectancy", &output.summary.life_expectancy),
        ("gdp", &output.summary.gdp),
    ] {
        println!(
            "{:<16} count {:>5}  mean {:>12.3}  std {:>12.3}  min {:>12.3}  median {:>12.3}  max {:>12.3}",
            name, column.count, column.mean, column.std, column.min, column.median, column.max
        );
    }
    println!("Outcome gap: {:.2} years", output.summary.outcome_gap);

    // Outcome model
    let model = &output.outcome.model;
    println!("\n=== Outcome Model ===");
    println!("Intercept: {:.4}", model.intercept);
    for (feature, coefficient) in model.features.iter().zip(&model.coefficients) {
        println!("  {:<12} {:.4}", feature.name(), coefficient);
    }
    println!("R²: {:.4}", model.r_squared);
    if let Some(holdout) = &output.holdout {
        println!(
            "Holdout R²: train {:.4} ({} rows), test {:.4} ({} rows)",
            holdout.train_r_squared, holdout.train_rows, holdout.test_r_squared, holdout.test_rows
        );
    }

    // Outliers
    println!("\n=== Largest Underperformers (below prediction) ===");
    for row in &output.outliers.underperformers {
        println!(
            "{:<28} {}  actual {:>6.2}  predicted {:>6.2}  residual {:>+7.2}",
            row.country, row.year, row.life_expectancy, row.fitted_value, row.residual
        );
    }
    println!("\n=== Largest Overperformers (above prediction) ===");
    for row in &output.outliers.overperformers {
        println!(
            "{:<28} {}  actual {:>6.2}  predicted {:>6.2}  residual {:>+7.2}",
            row.country, row.year, row.life_expectancy, row.fitted_value, row.residual
        );
    }
    if verbose {
        println!("\nCountries by mean residual (below prediction):");
        for country in &output.outliers.country_underperformers {
            println!(
                "  {:<28} {:>+7.2} over {} years",
                country.country, country.mean_residual, country.observations
            );
        }
    }

    // Segmentation
    println!("\n=== Risk Segments ===");
    let segmentation = &output.segmentation;
    let centroids = segmentation.model.centroids_original_units();
    for (cluster_id, &size) in segmentation.cluster_sizes().iter().enumerate() {
        let percentage = (size as f64 / dataset.len() as f64) * 100.0;
        let [le, log_gdp] = centroids[cluster_id];
        println!(
            "Cluster {} ({}): {} rows ({:.1}%), mean life expectancy {:.1}, log GDP {:.2}",
            cluster_id,
            segmentation.model.tier(cluster_id),
            size,
            percentage,
            le,
            log_gdp
        );
    }
    println!("\nSilhouette score (sample): {:.3}", segmentation.silhouette);
    println!("Within-cluster sum of squares: {:.2}", segmentation.model.inertia);

    // Scenario
    print_scenario_summary(&output.scenario);

    let report_start = Instant::now();
    let paths = report::write_outputs(&output, &args.out_dir).map_err(|err| {
        eprintln!("Failed during {}", Stage::Report);
        err
    })?;
    if let Some(path) = &args.save_model {
        output.artifact().save(path)?;
    }
    if verbose {
        println!(
            "\n  Output time: {:.2}s",
            report_start.elapsed().as_secs_f64()
        );
    }

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Scored table saved to: {}", paths.scored.display());
    println!("Scenario table saved to: {}", paths.scenario.display());
    println!("Yearly trend saved to: {}", paths.trend.display());
    println!("Summary saved to: {}", paths.summary.display());
    if let Some(path) = &args.save_model {
        println!("Model saved to: {}", path.display());
    }

    Ok(())
}

/// Re-run a scenario with a saved model
fn run_scenario_mode(args: &ScenarioArgs) -> Result<()> {
    println!("=== Scenario Mode ===");

    let start_time = Instant::now();
    let artifact = ModelArtifact::load(&args.model)?;
    let params = ScenarioParams {
        gdp_change_pct: args.gdp_change_pct,
        filter: args.filter()?,
    };
    let (dataset, scenario) =
        scenario_from_artifact(&args.input, &artifact, &params, args.missing)?;

    println!(
        "✓ Applied model from {} to {} observations",
        args.model.display(),
        dataset.len()
    );
    print_scenario_summary(&scenario);

    if let Some(path) = &args.out {
        let mut df = report::scenario_frame(&scenario)?;
        report::write_csv(&mut df, path)?;
        println!("\nScenario table saved to: {}", path.display());
    }
    println!(
        "  Processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}

/// Predict a single point with a saved model
fn run_prediction_mode(args: &PredictArgs) -> Result<()> {
    println!("=== Prediction Mode ===");
    let (gdp, year) = args.parse_point()?;
    println!("Input point: GDP={}, year={}", gdp, year);

    let artifact = ModelArtifact::load(&args.model)?;
    let point = simulate_point(&artifact.outcome_model, gdp, year, args.gdp_change_pct)?;

    println!(
        "\n✓ Predicted life expectancy: {:.2} years",
        point.baseline_predicted
    );
    println!(
        "  With GDP {:+}%: {:.2} years ({:+.3})",
        args.gdp_change_pct, point.scenario_predicted, point.delta
    );

    if let Some(life_expectancy) = args.life_expectancy {
        let cluster_model = &artifact.cluster_model;
        let cluster = cluster_model.assign(life_expectancy, gdp.ln());
        println!(
            "\nCluster {} ({}), residual {:+.2}",
            cluster,
            cluster_model.tier(cluster),
            life_expectancy - point.baseline_predicted
        );
    }

    Ok(())
}

fn print_scenario_summary(scenario: &healthgap::scenario::ScenarioReport) {
    println!("\n=== GDP Scenario ({:+}%) ===", scenario.gdp_change_pct);
    for tier in &scenario.by_tier {
        println!(
            "{:<14} {:>5} rows  mean change {:>+7.3} years",
            tier.tier.label(),
            tier.observations,
            tier.mean_delta
        );
    }
    match scenario.mean_delta {
        Some(mean) => println!("Overall mean change: {:+.3} years", mean),
        None => println!("No observations matched the scenario filter"),
    }
    if let Some(best) = scenario.most_benefited_tier() {
        println!("Largest gain: {}", best.tier);
    }
}
