use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::climate::ClimateSeries;
use crate::features::{FeatureRow, FEATURE_COLUMNS};
use crate::utils::{mean, normalize_zero, ols_slope, pearson};

/// Headline numbers for the overview page.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ClimateOverview {
    pub first_year: i32,
    pub last_year: i32,
    pub coverage_years: usize,
    pub mean_temperature: f64,
    /// Last minus first observation
    pub temperature_change: f64,
    pub mean_precipitation: f64,
    pub precipitation_change: f64,
    pub temperature_precipitation_correlation: Option<f64>,
    /// OLS slope of temperature against year, scaled to °C per decade
    pub temperature_trend_per_decade: Option<f64>,
}

impl ClimateOverview {
    pub fn from_series(series: &ClimateSeries) -> Option<Self> {
        let first = series.records().first()?;
        let last = series.records().last()?;
        let temps = series.temperatures();
        let precips = series.precipitations();
        let years: Vec<f64> = series.years().iter().map(|&y| y as f64).collect();

        Some(Self {
            first_year: first.year,
            last_year: last.year,
            coverage_years: series.len(),
            mean_temperature: mean(&temps)?,
            temperature_change: normalize_zero(last.temperature - first.temperature),
            mean_precipitation: mean(&precips)?,
            precipitation_change: normalize_zero(last.precipitation - first.precipitation),
            temperature_precipitation_correlation: pearson(&temps, &precips),
            temperature_trend_per_decade: ols_slope(&years, &temps).map(|s| s * 10.0),
        })
    }
}

/// Pearson correlations between every pair of feature columns.
///
/// Cells involving a constant column are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.values[i][j]
    }
}

pub fn correlation_matrix(rows: &[FeatureRow]) -> CorrelationMatrix {
    let columns: Vec<Vec<f64>> = (0..FEATURE_COLUMNS.len())
        .map(|c| rows.iter().map(|r| r.columns()[c]).collect())
        .collect();

    let values = columns
        .iter()
        .map(|a| columns.iter().map(|b| pearson(a, b)).collect())
        .collect();

    CorrelationMatrix {
        columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        values,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MonthlyProfile {
    pub month: u32,
    pub observations: usize,
    pub mean_temperature: f64,
    pub mean_precipitation: f64,
}

/// Mean temperature and precipitation per calendar month present in `rows`.
pub fn seasonal_profile(rows: &[FeatureRow]) -> Vec<MonthlyProfile> {
    let mut by_month: BTreeMap<u32, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for row in rows {
        let entry = by_month.entry(row.month).or_default();
        entry.0.push(row.temperature);
        entry.1.push(row.precipitation);
    }

    by_month
        .into_iter()
        .filter_map(|(month, (temps, precips))| {
            Some(MonthlyProfile {
                month,
                observations: temps.len(),
                mean_temperature: mean(&temps)?,
                mean_precipitation: mean(&precips)?,
            })
        })
        .collect()
}

/// Error of predictions against observations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct ErrorMetrics {
    pub mse: f64,
    pub mae: f64,
    pub rmse: f64,
}

impl ErrorMetrics {
    /// Metrics over the overlapping prefix of the two slices; NaN when empty.
    pub fn between(actual: &[f64], predicted: &[f64]) -> Self {
        let n = actual.len().min(predicted.len());
        if n == 0 {
            return Self {
                mse: f64::NAN,
                mae: f64::NAN,
                rmse: f64::NAN,
            };
        }

        let (sq, abs) = actual
            .iter()
            .zip(predicted)
            .fold((0.0, 0.0), |(sq, abs), (a, p)| {
                let err = a - p;
                (sq + err * err, abs + err.abs())
            });

        let mse = sq / n as f64;
        Self {
            mse,
            mae: abs / n as f64,
            rmse: mse.sqrt(),
        }
    }
}
