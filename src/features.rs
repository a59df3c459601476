use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::climate::ClimateSeries;
use crate::utils::{mean, sample_std};

/// Calendar-aware feature row derived from one climate record.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FeatureRow {
    pub year: i32,
    pub temperature: f64,
    pub precipitation: f64,
    pub month: u32,
    pub day_of_year: u32,
    pub is_winter: u8,
    pub is_monsoon: u8,
    pub monthly_temp_mean: f64,
    pub monthly_temp_std: f64,
    pub monthly_precip_mean: f64,
    pub monthly_precip_std: f64,
    /// Temperature minus its month-group mean
    pub temp_seasonal: f64,
    /// Precipitation minus its month-group mean
    pub precip_seasonal: f64,
}

/// Column names in the order returned by [`FeatureRow::columns`].
pub const FEATURE_COLUMNS: [&str; 13] = [
    "year",
    "temperature",
    "precipitation",
    "month",
    "day_of_year",
    "is_winter",
    "is_monsoon",
    "monthly_temp_mean",
    "monthly_temp_std",
    "monthly_precip_mean",
    "monthly_precip_std",
    "temp_seasonal",
    "precip_seasonal",
];

/// Columns that are prediction targets rather than model inputs.
pub const TARGET_COLUMNS: [&str; 4] = ["temperature", "precipitation", "year", "month"];

impl FeatureRow {
    /// Every column as a float, ordered like [`FEATURE_COLUMNS`].
    pub fn columns(&self) -> [f64; 13] {
        [
            self.year as f64,
            self.temperature,
            self.precipitation,
            self.month as f64,
            self.day_of_year as f64,
            self.is_winter as f64,
            self.is_monsoon as f64,
            self.monthly_temp_mean,
            self.monthly_temp_std,
            self.monthly_precip_mean,
            self.monthly_precip_std,
            self.temp_seasonal,
            self.precip_seasonal,
        ]
    }
}

/// Model inputs and targets separated out of a feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSplit {
    pub feature_names: Vec<&'static str>,
    pub features: Vec<Vec<f64>>,
    pub target_names: Vec<&'static str>,
    pub targets: Vec<Vec<f64>>,
}

/// Feature rows produced by [`build_features`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct FeatureTable {
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Separate target columns from model input columns.
    ///
    /// Returns `None` for an empty table.
    pub fn split_targets(&self) -> Option<FeatureSplit> {
        if self.rows.is_empty() {
            return None;
        }

        let (target_idx, feature_idx): (Vec<usize>, Vec<usize>) = (0..FEATURE_COLUMNS.len())
            .partition(|&i| TARGET_COLUMNS.contains(&FEATURE_COLUMNS[i]));

        let pick = |idx: &[usize]| -> Vec<Vec<f64>> {
            self.rows
                .iter()
                .map(|row| {
                    let cols = row.columns();
                    idx.iter().map(|&i| cols[i]).collect()
                })
                .collect()
        };

        Some(FeatureSplit {
            feature_names: feature_idx.iter().map(|&i| FEATURE_COLUMNS[i]).collect(),
            features: pick(&feature_idx),
            target_names: target_idx.iter().map(|&i| FEATURE_COLUMNS[i]).collect(),
            targets: pick(&target_idx),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct MonthStats {
    temp_mean: f64,
    temp_std: Option<f64>,
    precip_mean: f64,
    precip_std: Option<f64>,
}

/// Calendar position of a bare year: the first day of that year.
fn calendar_date(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
}

fn is_winter(month: u32) -> bool {
    month == 12 || month <= 2
}

fn is_monsoon(month: u32) -> bool {
    (6..=9).contains(&month)
}

/// Derive the calendar feature table from a yearly climate series.
///
/// Each year is placed on its first calendar day, so yearly input lands in a
/// single January group. Rows whose month group is too small for a standard
/// deviation are dropped; an input that yields nothing returns an empty table.
#[instrument(skip(series), fields(records = series.len()))]
pub fn build_features(series: &ClimateSeries) -> FeatureTable {
    if series.is_empty() {
        return FeatureTable::default();
    }

    let mut dated = Vec::with_capacity(series.len());
    for record in series.records() {
        match calendar_date(record.year) {
            Some(date) => dated.push((record, date)),
            None => {
                warn!("Year {} has no calendar date, skipping", record.year);
            }
        }
    }

    let mut groups: BTreeMap<u32, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for (record, date) in &dated {
        let entry = groups.entry(date.month()).or_default();
        entry.0.push(record.temperature);
        entry.1.push(record.precipitation);
    }

    let stats: BTreeMap<u32, MonthStats> = groups
        .iter()
        .filter_map(|(&month, (temps, precips))| {
            Some((
                month,
                MonthStats {
                    temp_mean: mean(temps)?,
                    temp_std: sample_std(temps),
                    precip_mean: mean(precips)?,
                    precip_std: sample_std(precips),
                },
            ))
        })
        .collect();

    let mut rows = Vec::with_capacity(dated.len());
    let mut dropped = 0usize;

    for (record, date) in dated {
        let month = date.month();
        let Some(group) = stats.get(&month) else {
            dropped += 1;
            continue;
        };
        let (Some(temp_std), Some(precip_std)) = (group.temp_std, group.precip_std) else {
            dropped += 1;
            continue;
        };

        rows.push(FeatureRow {
            year: record.year,
            temperature: record.temperature,
            precipitation: record.precipitation,
            month,
            day_of_year: date.ordinal(),
            is_winter: is_winter(month) as u8,
            is_monsoon: is_monsoon(month) as u8,
            monthly_temp_mean: group.temp_mean,
            monthly_temp_std: temp_std,
            monthly_precip_mean: group.precip_mean,
            monthly_precip_std: precip_std,
            temp_seasonal: record.temperature - group.temp_mean,
            precip_seasonal: record.precipitation - group.precip_mean,
        });
    }

    if dropped > 0 {
        warn!("Dropped {} incomplete feature rows out of {}", dropped, series.len());
    }
    debug!("Built {} feature rows", rows.len());

    FeatureTable { rows }
}
