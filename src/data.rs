//! Data loading and cleaning using Polars
//!
//! The input is a delimited text file with one row per (country, year). Every
//! cell is read as text and coerced here, so a stray `..` or `n/a` in a numeric
//! column becomes a missing value instead of failing the whole read. What
//! happens to rows with missing values is decided by [`MissingValuePolicy`].

use crate::config::MissingValuePolicy;
use crate::error::AnalysisError;
use log::{debug, info, warn};
use polars::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Required columns and the header spellings accepted for each, compared
/// case-insensitively after trimming.
const REQUIRED_COLUMNS: [(&str, &[&str]); 4] = [
    ("country", &["country", "country name"]),
    ("year", &["year"]),
    (
        "life_expectancy",
        &[
            "life_expectancy",
            "life expectancy at birth (years)",
            "life expectancy",
        ],
    ),
    ("gdp", &["gdp"]),
];

const MISSING_TOKENS: [&str; 6] = ["", "na", "n/a", "nan", "null", ".."];

/// One cleaned (country, year) row.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub country: String,
    pub year: i32,
    /// Life expectancy at birth, in years.
    pub life_expectancy: f64,
    pub gdp: f64,
    /// Natural log of `gdp`.
    pub log_gdp: f64,
}

impl Observation {
    /// Builds an observation and derives `log_gdp`. The caller guarantees
    /// `gdp > 0`.
    pub fn new(country: impl Into<String>, year: i32, life_expectancy: f64, gdp: f64) -> Self {
        Self {
            country: country.into(),
            year,
            life_expectancy,
            gdp,
            log_gdp: gdp.ln(),
        }
    }
}

/// A row as read from disk, before coercion into an [`Observation`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based data row number (the header is row 0).
    pub row: usize,
    pub country: Option<String>,
    pub year: Option<f64>,
    pub life_expectancy: Option<f64>,
    pub gdp: Option<f64>,
}

/// Counts of what cleaning did to the input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleaningReport {
    pub rows_read: usize,
    /// Rows without a usable country or integral year.
    pub dropped_missing_key: usize,
    /// Rows with life expectancy or GDP missing and not imputed.
    pub dropped_missing_value: usize,
    pub dropped_non_positive_gdp: usize,
    pub imputed_life_expectancy: usize,
    pub imputed_gdp: usize,
}

impl CleaningReport {
    pub fn dropped(&self) -> usize {
        self.dropped_missing_key + self.dropped_missing_value + self.dropped_non_positive_gdp
    }
}

/// The cleaned table: ordered observations with unique (country, year) keys.
/// Only cleaning builds one, so a `Dataset` is never empty.
#[derive(Debug, Clone)]
pub struct Dataset {
    observations: Vec<Observation>,
    pub report: CleaningReport,
}

impl Dataset {
    /// Builds a dataset from already-typed observations, applying the same
    /// validation as file input.
    pub fn from_observations(observations: Vec<Observation>) -> Result<Self, AnalysisError> {
        let records = observations_to_records(&observations);
        clean_records(records, MissingValuePolicy::Drop)
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    pub fn life_expectancy(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.life_expectancy).collect()
    }

    pub fn gdp(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.gdp).collect()
    }

    pub fn min_year(&self) -> Option<i32> {
        self.observations.iter().map(|o| o.year).min()
    }

    /// Converts the observations back into raw records, e.g. to re-run cleaning.
    pub fn to_records(&self) -> Vec<RawRecord> {
        observations_to_records(&self.observations)
    }
}

fn observations_to_records(observations: &[Observation]) -> Vec<RawRecord> {
    observations
        .iter()
        .enumerate()
        .map(|(i, o)| RawRecord {
            row: i + 1,
            country: Some(o.country.clone()),
            year: Some(f64::from(o.year)),
            life_expectancy: Some(o.life_expectancy),
            gdp: Some(o.gdp),
        })
        .collect()
}

/// Load a CSV file and clean it into a [`Dataset`].
///
/// # Arguments
/// * `path` - Path to the CSV file
/// * `policy` - How to treat missing life expectancy or GDP values
pub fn load_dataset(
    path: impl AsRef<Path>,
    policy: MissingValuePolicy,
) -> Result<Dataset, AnalysisError> {
    let records = read_raw_records(path.as_ref())?;
    let dataset = clean_records(records, policy)?;
    let report = &dataset.report;
    info!(
        "Cleaned dataset: {} of {} rows kept ({} missing key, {} missing value, {} non-positive GDP)",
        dataset.len(),
        report.rows_read,
        report.dropped_missing_key,
        report.dropped_missing_value,
        report.dropped_non_positive_gdp
    );
    if report.imputed_life_expectancy + report.imputed_gdp > 0 {
        info!(
            "Imputed {} life expectancy and {} GDP values from country means",
            report.imputed_life_expectancy, report.imputed_gdp
        );
    }
    Ok(dataset)
}

/// Read the required columns of a CSV file as raw, untyped records.
pub fn read_raw_records(path: &Path) -> Result<Vec<RawRecord>, AnalysisError> {
    info!("Loading data from '{}'", path.display());

    // Schema inference is disabled so that every column arrives as text.
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0)),
        )
        .finish()?;

    let header: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut resolved = Vec::with_capacity(REQUIRED_COLUMNS.len());
    for (canonical, aliases) in REQUIRED_COLUMNS {
        let found = header
            .iter()
            .find(|name| {
                let normalized = name.trim().to_ascii_lowercase();
                aliases.iter().any(|alias| *alias == normalized)
            })
            .ok_or_else(|| {
                AnalysisError::DataIntegrity(format!(
                    "the required column '{canonical}' was not found in '{}' (columns present: {})",
                    path.display(),
                    header.join(", ")
                ))
            })?;
        debug!("Column '{canonical}' read from header '{found}'");
        resolved.push(found.clone());
    }

    let countries = text_column(&df, &resolved[0])?;
    let years = text_column(&df, &resolved[1])?;
    let life_expectancy = text_column(&df, &resolved[2])?;
    let gdp = text_column(&df, &resolved[3])?;

    let mut unparsable: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let row = i + 1;
        let mut numeric = |column: &'static str, cell: &Option<String>| {
            let parsed = parse_numeric(cell.as_deref());
            if parsed.is_err() {
                let entry = unparsable.entry(column).or_insert((0, row));
                entry.0 += 1;
            }
            parsed.unwrap_or(None)
        };
        let year = numeric("year", &years[i]);
        let le = numeric("life_expectancy", &life_expectancy[i]);
        let g = numeric("gdp", &gdp[i]);
        records.push(RawRecord {
            row,
            country: countries[i]
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            year,
            life_expectancy: le,
            gdp: g,
        });
    }

    for (column, (count, first_row)) in &unparsable {
        warn!(
            "{count} non-numeric value(s) in column '{column}' treated as missing (first at row {first_row})"
        );
    }

    Ok(records)
}

fn text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, AnalysisError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let values = column
        .str()?
        .into_iter()
        .map(|cell| cell.map(str::to_string))
        .collect();
    Ok(values)
}

/// Parses a numeric cell. `Ok(None)` is a recognised missing token, `Err` is
/// text that is not a finite number.
fn parse_numeric(cell: Option<&str>) -> Result<Option<f64>, ()> {
    let Some(text) = cell.map(str::trim) else {
        return Ok(None);
    };
    if MISSING_TOKENS.contains(&text.to_ascii_lowercase().as_str()) {
        return Ok(None);
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(()),
    }
}

fn integral_year(value: f64) -> Option<i32> {
    if value.fract() == 0.0 && value >= f64::from(i32::MIN) && value <= f64::from(i32::MAX) {
        Some(value as i32)
    } else {
        None
    }
}

/// Clean raw records into a [`Dataset`].
///
/// Rows without a country or an integral year are dropped. Missing or
/// non-finite life expectancy or GDP is handled according to `policy`. Rows with GDP <= 0 are
/// excluded so that `log_gdp` is always defined. Input order is preserved.
pub fn clean_records(
    records: Vec<RawRecord>,
    policy: MissingValuePolicy,
) -> Result<Dataset, AnalysisError> {
    let mut report = CleaningReport {
        rows_read: records.len(),
        ..CleaningReport::default()
    };

    let keyed: Vec<(String, i32, RawRecord)> = records
        .into_iter()
        .filter_map(|mut record| {
            let country = record.country.clone()?;
            let year = record.year.and_then(integral_year)?;
            record.life_expectancy = record.life_expectancy.filter(|v| v.is_finite());
            record.gdp = record.gdp.filter(|v| v.is_finite());
            Some((country, year, record))
        })
        .collect();
    report.dropped_missing_key = report.rows_read - keyed.len();

    let fill = match policy {
        MissingValuePolicy::Drop => None,
        MissingValuePolicy::CountryMean => Some(CountryMeans::from_rows(&keyed)),
    };

    let mut seen: HashMap<(String, i32), usize> = HashMap::new();
    let mut observations = Vec::with_capacity(keyed.len());
    for (country, year, record) in keyed {
        let life_expectancy = match (record.life_expectancy, &fill) {
            (Some(value), _) => Some(value),
            (None, Some(means)) => {
                let imputed = means.life_expectancy.get(&country).copied();
                if imputed.is_some() {
                    report.imputed_life_expectancy += 1;
                }
                imputed
            }
            (None, None) => None,
        };
        let gdp = match (record.gdp, &fill) {
            (Some(value), _) => Some(value),
            (None, Some(means)) => {
                let imputed = means.gdp.get(&country).copied();
                if imputed.is_some() {
                    report.imputed_gdp += 1;
                }
                imputed
            }
            (None, None) => None,
        };

        let (Some(life_expectancy), Some(gdp)) = (life_expectancy, gdp) else {
            report.dropped_missing_value += 1;
            continue;
        };
        if gdp <= 0.0 {
            debug!("Row {}: GDP {gdp} is not positive, excluded", record.row);
            report.dropped_non_positive_gdp += 1;
            continue;
        }

        if let Some(first_row) = seen.insert((country.clone(), year), record.row) {
            return Err(AnalysisError::DataIntegrity(format!(
                "duplicate observation for country '{country}' and year {year} (rows {first_row} and {})",
                record.row
            )));
        }
        observations.push(Observation::new(country, year, life_expectancy, gdp));
    }

    if observations.is_empty() {
        return Err(AnalysisError::EmptyDataset {
            total: report.rows_read,
            dropped: report.dropped(),
        });
    }

    Ok(Dataset {
        observations,
        report,
    })
}

/// Per-country means of the present values, used for imputation.
struct CountryMeans {
    life_expectancy: HashMap<String, f64>,
    gdp: HashMap<String, f64>,
}

impl CountryMeans {
    fn from_rows(rows: &[(String, i32, RawRecord)]) -> Self {
        let mut le: HashMap<String, (f64, usize)> = HashMap::new();
        let mut gdp: HashMap<String, (f64, usize)> = HashMap::new();
        for (country, _, record) in rows {
            if let Some(value) = record.life_expectancy {
                let entry = le.entry(country.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
            if let Some(value) = record.gdp.filter(|g| *g > 0.0) {
                let entry = gdp.entry(country.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        let finish = |sums: HashMap<String, (f64, usize)>| {
            sums.into_iter()
                .map(|(country, (sum, n))| (country, sum / n as f64))
                .collect()
        };
        Self {
            life_expectancy: finish(le),
            gdp: finish(gdp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    fn record(row: usize, country: &str, year: f64, le: Option<f64>, gdp: Option<f64>) -> RawRecord {
        RawRecord {
            row,
            country: Some(country.to_string()),
            year: Some(year),
            life_expectancy: le,
            gdp,
        }
    }

    #[test]
    fn test_load_source_headers_and_extra_columns() {
        let file = create_test_csv(
            "Country,Year,Life expectancy at birth (years),GDP,Region\n\
             Chile,2000,77.3,77860932152,South America\n\
             Chile,2001,77.3,70979923960,South America\n\
             China,2000,71.7,1211350000000,Asia\n",
        );
        let dataset = load_dataset(file.path(), MissingValuePolicy::Drop).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.observations()[2].country, "China");
        assert_eq!(dataset.observations()[2].year, 2000);
        assert_abs_diff_eq!(
            dataset.observations()[0].log_gdp,
            77860932152f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_missing_column_is_data_integrity_error() {
        let file = create_test_csv("country,year,gdp\nChile,2000,100.0\n");
        let err = load_dataset(file.path(), MissingValuePolicy::Drop).unwrap_err();
        match err {
            AnalysisError::DataIntegrity(msg) => assert!(msg.contains("life_expectancy")),
            other => panic!("Expected DataIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_and_unparsable_values_dropped() {
        let file = create_test_csv(
            "country,year,life_expectancy,gdp\n\
             A,2000,70.0,1000\n\
             A,2001,NA,1100\n\
             A,2002,71.0,..\n\
             A,2003,abc,1200\n\
             ,2004,72.0,1300\n\
             A,2005.5,72.0,1300\n\
             A,2006,72.5,-5\n",
        );
        let dataset = load_dataset(file.path(), MissingValuePolicy::Drop).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.report.rows_read, 7);
        assert_eq!(dataset.report.dropped_missing_key, 2);
        assert_eq!(dataset.report.dropped_missing_value, 3);
        assert_eq!(dataset.report.dropped_non_positive_gdp, 1);
    }

    #[test]
    fn test_non_finite_values_treated_as_missing() {
        let dataset = Dataset::from_observations(vec![
            Observation::new("A", 2000, f64::NAN, 1000.0),
            Observation::new("B", 2000, 70.0, f64::INFINITY),
            Observation::new("C", 2000, 72.0, 2000.0),
        ])
        .unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.observations()[0].country, "C");
        assert_eq!(dataset.report.dropped_missing_value, 2);

        let records = vec![
            record(1, "A", 2000.0, Some(70.0), Some(f64::INFINITY)),
            record(2, "A", 2001.0, Some(72.0), Some(300.0)),
        ];
        let dataset = clean_records(records, MissingValuePolicy::CountryMean).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.report.imputed_gdp, 1);
        assert_abs_diff_eq!(dataset.observations()[0].gdp, 300.0);
        assert!(dataset.iter().all(|o| o.log_gdp.is_finite()));
    }

    #[test]
    fn test_no_observations_is_empty_dataset() {
        let err = Dataset::from_observations(Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::EmptyDataset {
                total: 0,
                dropped: 0
            }
        ));
    }

    #[test]
    fn test_country_mean_imputation() {
        let records = vec![
            record(1, "A", 2000.0, Some(70.0), Some(100.0)),
            record(2, "A", 2001.0, None, Some(300.0)),
            record(3, "A", 2002.0, Some(74.0), None),
            record(4, "B", 2000.0, None, Some(50.0)),
        ];
        let dataset = clean_records(records, MissingValuePolicy::CountryMean).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_abs_diff_eq!(dataset.observations()[1].life_expectancy, 72.0);
        assert_abs_diff_eq!(dataset.observations()[2].gdp, 200.0);
        assert_eq!(dataset.report.imputed_life_expectancy, 1);
        assert_eq!(dataset.report.imputed_gdp, 1);
        // Country B has no life expectancy to average.
        assert_eq!(dataset.report.dropped_missing_value, 1);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let records = vec![
            record(1, "A", 2000.0, Some(70.0), Some(100.0)),
            record(2, "A", 2000.0, Some(71.0), Some(110.0)),
        ];
        let err = clean_records(records, MissingValuePolicy::Drop).unwrap_err();
        match err {
            AnalysisError::DataIntegrity(msg) => assert!(msg.contains("rows 1 and 2")),
            other => panic!("Expected DataIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_after_cleaning() {
        let records = vec![record(1, "A", 2000.0, None, Some(100.0))];
        let err = clean_records(records, MissingValuePolicy::Drop).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::EmptyDataset {
                total: 1,
                dropped: 1
            }
        ));
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let records = vec![
            record(1, "A", 2000.0, Some(70.0), Some(100.0)),
            record(2, "A", 2001.0, None, Some(300.0)),
            record(3, "B", 2000.0, Some(60.0), Some(-1.0)),
            record(4, "B", 2001.0, Some(61.0), Some(40.0)),
        ];
        for policy in [MissingValuePolicy::Drop, MissingValuePolicy::CountryMean] {
            let once = clean_records(records.clone(), policy).unwrap();
            let twice = clean_records(once.to_records(), policy).unwrap();
            assert_eq!(once.observations(), twice.observations());
            assert_eq!(twice.report.dropped(), 0);
        }
    }
}
