//! Descriptive statistics and the global life expectancy trend

use crate::data::Dataset;
use crate::error::AnalysisError;
use polars::prelude::*;
use serde::Serialize;

/// Summary statistics of one numeric column: count, moments and quartiles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator); 0 for a single value.
    pub std: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl ColumnSummary {
    /// Summarise a slice of finite values. Every statistic of an empty slice
    /// is NaN.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                count: 0,
                mean: f64::NAN,
                std: f64::NAN,
                min: f64::NAN,
                q1: f64::NAN,
                median: f64::NAN,
                q3: f64::NAN,
                max: f64::NAN,
            };
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let std = if count > 1 {
            let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        Self {
            count,
            mean,
            std,
            min: sorted[0],
            q1: quantile_sorted(&sorted, 0.25),
            median: quantile_sorted(&sorted, 0.5),
            q3: quantile_sorted(&sorted, 0.75),
            max: sorted[count - 1],
        }
    }
}

/// Quantile with linear interpolation between closest ranks.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Mean life expectancy across all countries for one year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearTrend {
    pub year: i32,
    pub mean_life_expectancy: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptiveSummary {
    pub life_expectancy: ColumnSummary,
    pub gdp: ColumnSummary,
    /// max - min life expectancy over all observations.
    pub outcome_gap: f64,
    /// Ascending by year.
    pub trend: Vec<YearTrend>,
}

/// Compute the descriptive summary of a cleaned dataset.
pub fn describe(dataset: &Dataset) -> Result<DescriptiveSummary, AnalysisError> {
    let life_expectancy = ColumnSummary::from_values(&dataset.life_expectancy());
    let gdp = ColumnSummary::from_values(&dataset.gdp());
    let outcome_gap = life_expectancy.max - life_expectancy.min;
    let trend = yearly_trend(dataset)?;

    log::info!(
        "Life expectancy: mean {:.2}, median {:.2}, range {:.1}..{:.1} (gap {:.1} years)",
        life_expectancy.mean,
        life_expectancy.median,
        life_expectancy.min,
        life_expectancy.max,
        outcome_gap
    );

    Ok(DescriptiveSummary {
        life_expectancy,
        gdp,
        outcome_gap,
        trend,
    })
}

/// Per-year mean life expectancy, ascending by year.
pub fn yearly_trend(dataset: &Dataset) -> Result<Vec<YearTrend>, AnalysisError> {
    let df = df!(
        "year" => dataset.iter().map(|o| o.year).collect::<Vec<i32>>(),
        "life_expectancy" => dataset.life_expectancy(),
    )?;

    let by_year = df
        .lazy()
        .group_by([col("year")])
        .agg([
            col("life_expectancy").mean().alias("mean_life_expectancy"),
            col("life_expectancy").count().alias("observations"),
        ])
        .sort(["year"], SortMultipleOptions::default())
        .collect()?;

    let years = by_year.column("year")?.i32()?;
    let means = by_year.column("mean_life_expectancy")?.f64()?;
    let counts = by_year.column("observations")?.cast(&DataType::UInt64)?;
    let counts = counts.u64()?;

    let trend = years
        .into_iter()
        .zip(means)
        .zip(counts)
        .filter_map(|((year, mean), n)| {
            Some(YearTrend {
                year: year?,
                mean_life_expectancy: mean?,
                observations: n? as usize,
            })
        })
        .collect();
    Ok(trend)
}

/// Life expectancy quartile of every observation: 1 for the lowest quarter up
/// to 4 for the highest. Bins are right-inclusive, so a value equal to the
/// first quartile lands in quartile 1.
pub fn outcome_quartiles(dataset: &Dataset, summary: &ColumnSummary) -> Vec<u8> {
    dataset
        .iter()
        .map(|o| {
            let v = o.life_expectancy;
            if v <= summary.q1 {
                1
            } else if v <= summary.median {
                2
            } else if v <= summary.q3 {
                3
            } else {
                4
            }
        })
        .collect()
}
