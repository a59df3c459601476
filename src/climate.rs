use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ClimateSeriesError {
    #[error("Climate series contains no observations")]
    Empty,
    #[error("Duplicate observation for year {0}")]
    DuplicateYear(i32),
    #[error("Non-finite {field} value for year {year}")]
    NonFiniteValue { year: i32, field: &'static str },
}

/// One yearly observation of national averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClimateRecord {
    pub year: i32,
    /// Average temperature in °C
    pub temperature: f64,
    /// Average precipitation in mm
    pub precipitation: f64,
}

/// Yearly climate observations, ascending by year with unique years.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ClimateSeries {
    records: Vec<ClimateRecord>,
}

impl ClimateSeries {
    /// Validate and sort a set of complete records.
    pub fn new(mut records: Vec<ClimateRecord>) -> Result<Self, ClimateSeriesError> {
        if records.is_empty() {
            return Err(ClimateSeriesError::Empty);
        }

        for record in &records {
            if !record.temperature.is_finite() {
                return Err(ClimateSeriesError::NonFiniteValue {
                    year: record.year,
                    field: "temperature",
                });
            }
            if !record.precipitation.is_finite() {
                return Err(ClimateSeriesError::NonFiniteValue {
                    year: record.year,
                    field: "precipitation",
                });
            }
        }

        records.sort_by_key(|r| r.year);
        if let Some(pair) = records.windows(2).find(|w| w[0].year == w[1].year) {
            return Err(ClimateSeriesError::DuplicateYear(pair[0].year));
        }

        Ok(Self { records })
    }

    /// Merge separately fetched temperature and precipitation observations by year.
    ///
    /// Years missing either value are dropped, so the result only holds
    /// complete rows. Later duplicates of a year overwrite earlier ones.
    pub fn from_partial(
        temperatures: &[(i32, f64)],
        precipitations: &[(i32, f64)],
    ) -> Result<Self, ClimateSeriesError> {
        let precip_by_year: BTreeMap<i32, f64> = precipitations.iter().copied().collect();
        let temp_by_year: BTreeMap<i32, f64> = temperatures.iter().copied().collect();

        let records = temp_by_year
            .into_iter()
            .filter_map(|(year, temperature)| {
                precip_by_year.get(&year).map(|&precipitation| ClimateRecord {
                    year,
                    temperature,
                    precipitation,
                })
            })
            .collect();

        Self::new(records)
    }

    pub fn records(&self) -> &[ClimateRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn years(&self) -> Vec<i32> {
        self.records.iter().map(|r| r.year).collect()
    }

    pub fn temperatures(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.temperature).collect()
    }

    pub fn precipitations(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.precipitation).collect()
    }

    pub fn first_year(&self) -> Option<i32> {
        self.records.first().map(|r| r.year)
    }

    pub fn last_year(&self) -> Option<i32> {
        self.records.last().map(|r| r.year)
    }

    /// Copy of the series with every temperature passed through `adjust`.
    pub(crate) fn map_temperature(&self, adjust: impl Fn(f64) -> f64) -> Self {
        Self {
            records: self
                .records
                .iter()
                .map(|r| ClimateRecord {
                    temperature: adjust(r.temperature),
                    ..*r
                })
                .collect(),
        }
    }
}
