use std::f64::consts::PI;

use crate::climate::ClimateSeries;
use crate::utils::{mean, sample_std};

/// Names of the regression inputs, in [`EngineeredRow`] order.
pub const ENGINEERED_FEATURES: [&str; 6] = [
    "year_sin",
    "year_cos",
    "temp_rolling_mean",
    "temp_rolling_std",
    "temp_diff",
    "temp_diff2",
];

/// Period of the calendar-year encoding, in years.
pub const CYCLE_PERIOD_YEARS: f64 = 100.0;

/// Window of the rolling temperature statistics.
pub const ROLLING_WINDOW: usize = 5;

pub type EngineeredRow = [f64; 6];

/// Training series with the engineered regression inputs attached.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedSeries {
    pub years: Vec<i32>,
    pub temperatures: Vec<f64>,
    pub rows: Vec<EngineeredRow>,
}

/// `(sin, cos)` of the year's position on the long calendar cycle.
pub fn cyclical_encoding(year: i32) -> (f64, f64) {
    let angle = 2.0 * PI * year as f64 / CYCLE_PERIOD_YEARS;
    (angle.sin(), angle.cos())
}

fn rolling(values: &[f64], window: usize, stat: fn(&[f64]) -> Option<f64>) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                None
            } else {
                stat(&values[i + 1 - window..=i])
            }
        })
        .collect()
}

fn diff(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    out.push(None);
    for pair in values.windows(2) {
        out.push(match (pair[0], pair[1]) {
            (Some(prev), Some(cur)) => Some(cur - prev),
            _ => None,
        });
    }
    out.truncate(values.len());
    out
}

/// Fill each gap with the nearest later value. Gaps with no later value stay empty.
fn backfill(values: Vec<Option<f64>>) -> Vec<Option<f64>> {
    let mut next = None;
    let mut filled: Vec<Option<f64>> = values
        .into_iter()
        .rev()
        .map(|v| {
            if v.is_some() {
                next = v;
            }
            next
        })
        .collect();
    filled.reverse();
    filled
}

/// Attach cyclical, rolling and difference features to a climate series.
///
/// Returns `None` when a column cannot be completed, which happens when the
/// series is shorter than the rolling window.
pub fn augment(series: &ClimateSeries) -> Option<AugmentedSeries> {
    let years = series.years();
    let temperatures = series.temperatures();

    let rolling_mean = backfill(rolling(&temperatures, ROLLING_WINDOW, mean));
    let rolling_std = backfill(rolling(&temperatures, ROLLING_WINDOW, sample_std));
    let raw: Vec<Option<f64>> = temperatures.iter().copied().map(Some).collect();
    let first_diff = diff(&raw);
    let second_diff = backfill(diff(&first_diff));
    let first_diff = backfill(first_diff);

    let mut rows = Vec::with_capacity(years.len());
    for (i, &year) in years.iter().enumerate() {
        let (sin, cos) = cyclical_encoding(year);
        rows.push([
            sin,
            cos,
            rolling_mean[i]?,
            rolling_std[i]?,
            first_diff[i]?,
            second_diff[i]?,
        ]);
    }

    Some(AugmentedSeries {
        years,
        temperatures,
        rows,
    })
}

/// Regression inputs for future years.
///
/// Future rolling statistics are not observable, so the mean and sample
/// standard deviation of the seasonal forecast over the whole horizon stand
/// in for them (the deviation is zero for a single-period horizon), and both
/// differences are zero.
pub fn future_rows(years: &[i32], seasonal_forecast: &[f64]) -> Vec<EngineeredRow> {
    let horizon_mean = mean(seasonal_forecast).unwrap_or(f64::NAN);
    let horizon_std = sample_std(seasonal_forecast).unwrap_or(0.0);

    years
        .iter()
        .map(|&year| {
            let (sin, cos) = cyclical_encoding(year);
            [sin, cos, horizon_mean, horizon_std, 0.0, 0.0]
        })
        .collect()
}
