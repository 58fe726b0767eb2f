//! Residual ranking: which countries fall short of, or exceed, the life
//! expectancy their GDP and year predict.

use crate::data::Dataset;
use crate::error::AnalysisError;
use crate::regression::OutcomeFit;
use polars::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;

/// One observation in an outlier list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRow {
    /// Position of the observation in the dataset.
    pub index: usize,
    pub country: String,
    pub year: i32,
    pub life_expectancy: f64,
    pub fitted_value: f64,
    pub residual: f64,
}

/// Mean residual of one country across all its years.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryResidual {
    pub country: String,
    pub mean_residual: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierReport {
    /// Negative residuals, most negative first.
    pub underperformers: Vec<RankedRow>,
    /// Positive residuals, most positive first.
    pub overperformers: Vec<RankedRow>,
    pub country_underperformers: Vec<CountryResidual>,
    pub country_overperformers: Vec<CountryResidual>,
}

/// Rank observations and countries by residual and keep the top `top_n` of
/// each sign. Ties are broken by country name, then year, so the output order
/// is fully determined by the data.
pub fn detect_outliers(
    dataset: &Dataset,
    fit: &OutcomeFit,
    top_n: usize,
) -> Result<OutlierReport, AnalysisError> {
    let rows: Vec<RankedRow> = dataset
        .iter()
        .enumerate()
        .map(|(index, o)| RankedRow {
            index,
            country: o.country.clone(),
            year: o.year,
            life_expectancy: o.life_expectancy,
            fitted_value: fit.fitted[index],
            residual: fit.residuals[index],
        })
        .collect();

    let tie_break =
        |a: &RankedRow, b: &RankedRow| a.country.cmp(&b.country).then(a.year.cmp(&b.year));

    let mut underperformers: Vec<RankedRow> =
        rows.iter().filter(|r| r.residual < 0.0).cloned().collect();
    underperformers.sort_by(|a, b| a.residual.total_cmp(&b.residual).then_with(|| tie_break(a, b)));
    underperformers.truncate(top_n);

    let mut overperformers: Vec<RankedRow> =
        rows.into_iter().filter(|r| r.residual > 0.0).collect();
    overperformers.sort_by(|a, b| b.residual.total_cmp(&a.residual).then_with(|| tie_break(a, b)));
    overperformers.truncate(top_n);

    let countries = country_residuals(dataset, fit)?;
    let by_country = |a: &CountryResidual, b: &CountryResidual| a.country.cmp(&b.country);

    let mut country_underperformers: Vec<CountryResidual> = countries
        .iter()
        .filter(|c| c.mean_residual < 0.0)
        .cloned()
        .collect();
    country_underperformers.sort_by(|a, b| {
        a.mean_residual
            .total_cmp(&b.mean_residual)
            .then_with(|| by_country(a, b))
    });
    country_underperformers.truncate(top_n);

    let mut country_overperformers: Vec<CountryResidual> = countries
        .into_iter()
        .filter(|c| c.mean_residual > 0.0)
        .collect();
    country_overperformers.sort_by(|a, b| {
        b.mean_residual
            .total_cmp(&a.mean_residual)
            .then_with(|| by_country(a, b))
    });
    country_overperformers.truncate(top_n);

    if let Some(worst) = underperformers.first() {
        log::info!(
            "Largest shortfall: {} {} at {:.2} years below prediction",
            worst.country,
            worst.year,
            -worst.residual
        );
    }

    Ok(OutlierReport {
        underperformers,
        overperformers,
        country_underperformers,
        country_overperformers,
    })
}

/// Mean residual per country, ordered by country name.
pub fn country_residuals(
    dataset: &Dataset,
    fit: &OutcomeFit,
) -> Result<Vec<CountryResidual>, AnalysisError> {
    let df = df!(
        "country" => dataset.iter().map(|o| o.country.as_str()).collect::<Vec<_>>(),
        "residual" => fit.residuals.clone(),
    )?;

    let by_country = df
        .lazy()
        .group_by([col("country")])
        .agg([
            col("residual").mean().alias("mean_residual"),
            col("residual").count().alias("observations"),
        ])
        .sort(["country"], SortMultipleOptions::default())
        .collect()?;

    let countries = by_country.column("country")?.str()?;
    let means = by_country.column("mean_residual")?.f64()?;
    let counts = by_country.column("observations")?.cast(&DataType::UInt64)?;
    let counts = counts.u64()?;

    let residuals = countries
        .into_iter()
        .zip(means)
        .zip(counts)
        .filter_map(|((country, mean), n)| {
            Some(CountryResidual {
                country: country?.to_string(),
                mean_residual: mean?,
                observations: n? as usize,
            })
        })
        .collect();
    Ok(residuals)
}

/// Whether a list is ordered by residual in the given direction.
pub fn is_sorted_by_residual(rows: &[RankedRow], direction: Ordering) -> bool {
    rows.windows(2).all(|pair| {
        let ord = pair[0].residual.total_cmp(&pair[1].residual);
        ord == direction || ord == Ordering::Equal
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegressionFeature;
    use crate::data::Observation;
    use crate::regression::FittedModel;
    use std::collections::HashSet;

    fn fit_with_residuals(dataset: &Dataset, residuals: &[f64]) -> OutcomeFit {
        let fitted = dataset
            .iter()
            .zip(residuals)
            .map(|(o, r)| o.life_expectancy - r)
            .collect();
        OutcomeFit {
            model: FittedModel {
                features: vec![RegressionFeature::LogGdp],
                coefficients: vec![1.0],
                intercept: 0.0,
                r_squared: 0.5,
                n_observations: dataset.len(),
                base_year: 2000,
            },
            fitted,
            residuals: residuals.to_vec(),
        }
    }

    fn dataset() -> Dataset {
        Dataset::from_observations(vec![
            Observation::new("Zimbabwe", 2000, 46.0, 6.7e9),
            Observation::new("Chile", 2000, 77.3, 7.8e10),
            Observation::new("Mexico", 2000, 74.8, 6.8e11),
            Observation::new("Germany", 2000, 78.0, 1.9e12),
            Observation::new("China", 2000, 71.7, 1.2e12),
            Observation::new("Zimbabwe", 2001, 45.3, 6.8e9),
            Observation::new("Chile", 2001, 77.3, 7.1e10),
        ])
        .unwrap()
    }

    #[test]
    fn test_lists_are_disjoint_and_sorted() {
        let dataset = dataset();
        let fit = fit_with_residuals(&dataset, &[-8.0, 1.5, -0.5, 2.0, 0.0, -7.5, 1.5]);
        let report = detect_outliers(&dataset, &fit, 10).unwrap();

        assert_eq!(report.underperformers.len(), 3);
        assert_eq!(report.overperformers.len(), 3);
        assert!(is_sorted_by_residual(&report.underperformers, Ordering::Less));
        assert!(is_sorted_by_residual(&report.overperformers, Ordering::Greater));

        let under: HashSet<usize> = report.underperformers.iter().map(|r| r.index).collect();
        let over: HashSet<usize> = report.overperformers.iter().map(|r| r.index).collect();
        assert!(under.is_disjoint(&over));
        // A zero residual is neither.
        assert!(!under.contains(&4) && !over.contains(&4));

        assert_eq!(report.underperformers[0].country, "Zimbabwe");
        assert_eq!(report.underperformers[0].year, 2000);
    }

    #[test]
    fn test_ties_broken_by_country_then_year() {
        let dataset = dataset();
        let fit = fit_with_residuals(&dataset, &[1.0, 1.0, 1.0, 3.0, -1.0, 1.0, 1.0]);
        let report = detect_outliers(&dataset, &fit, 10).unwrap();
        let order: Vec<(&str, i32)> = report
            .overperformers
            .iter()
            .map(|r| (r.country.as_str(), r.year))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Germany", 2000),
                ("Chile", 2000),
                ("Chile", 2001),
                ("Mexico", 2000),
                ("Zimbabwe", 2000),
                ("Zimbabwe", 2001),
            ]
        );
    }

    #[test]
    fn test_top_n_and_determinism() {
        let dataset = dataset();
        let fit = fit_with_residuals(&dataset, &[-8.0, 1.5, -0.5, 2.0, 0.3, -7.5, 1.5]);
        let first = detect_outliers(&dataset, &fit, 2).unwrap();
        let second = detect_outliers(&dataset, &fit, 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.underperformers.len(), 2);
        assert_eq!(first.overperformers.len(), 2);
        assert_eq!(first.overperformers[1].country, "Chile");
        assert_eq!(first.overperformers[1].year, 2000);
    }

    #[test]
    fn test_country_level_ranking() {
        let dataset = dataset();
        let fit = fit_with_residuals(&dataset, &[-8.0, 1.5, -0.5, 2.0, 0.0, -7.0, 0.5]);
        let report = detect_outliers(&dataset, &fit, 10).unwrap();

        assert_eq!(report.country_underperformers[0].country, "Zimbabwe");
        assert_eq!(report.country_underperformers[0].observations, 2);
        assert!((report.country_underperformers[0].mean_residual + 7.5).abs() < 1e-12);
        assert_eq!(report.country_underperformers[1].country, "Mexico");

        let over: Vec<&str> = report
            .country_overperformers
            .iter()
            .map(|c| c.country.as_str())
            .collect();
        assert_eq!(over, vec!["Germany", "Chile"]);
    }
}
