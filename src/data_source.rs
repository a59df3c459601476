use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::climate::{ClimateRecord, ClimateSeries, ClimateSeriesError};
use crate::fetch_error::FetchError;
use crate::fetcher::{WorldBankFetcher, PRECIPITATION_INDICATOR, TEMPERATURE_INDICATOR};

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Primary source failed: {0}")]
    Primary(#[from] FetchError),

    #[error("Source returned an unusable series: {0}")]
    InvalidSeries(#[from] ClimateSeriesError),

    #[error("Fallback data at {path} is unusable: {reason}")]
    Fallback { path: String, reason: String },

    #[error("Climate data unavailable (primary: {primary}; fallback: {fallback})")]
    Unavailable { primary: String, fallback: String },
}

/// Where the resolved series came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    WorldBank,
    Fallback,
}

impl fmt::Display for DataOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataOrigin::WorldBank => write!(f, "World Bank API"),
            DataOrigin::Fallback => write!(f, "local fallback file"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedClimateData {
    pub series: ClimateSeries,
    pub origin: DataOrigin,
}

/// Two-stage acquisition: the World Bank API with bounded retries, then a
/// local CSV file.
pub struct ClimateDataResolver {
    fetcher: WorldBankFetcher,
    fallback_path: PathBuf,
    max_attempts: usize,
    retry_delay: Duration,
}

impl ClimateDataResolver {
    pub fn new(fetcher: WorldBankFetcher, fallback_path: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            fallback_path: fallback_path.into(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// Total attempts against the primary source, including the first. Zero is treated as one.
    pub fn with_retry(mut self, max_attempts: usize, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    #[instrument(skip(self), fields(fallback = %self.fallback_path.display()))]
    pub async fn resolve(&self) -> Result<ResolvedClimateData, DataError> {
        let primary_err = match self.fetch_primary().await {
            Ok(series) => {
                info!("Loaded {} years of climate data from the World Bank API", series.len());
                return Ok(ResolvedClimateData {
                    series,
                    origin: DataOrigin::WorldBank,
                });
            }
            Err(e) => e,
        };

        warn!("Primary climate source failed, using fallback: {}", primary_err);

        match load_fallback_csv(&self.fallback_path).await {
            Ok(series) => {
                info!("Loaded {} years of climate data from fallback file", series.len());
                Ok(ResolvedClimateData {
                    series,
                    origin: DataOrigin::Fallback,
                })
            }
            Err(fallback_err) => {
                error!("Fallback climate source failed: {}", fallback_err);
                Err(DataError::Unavailable {
                    primary: primary_err.to_string(),
                    fallback: fallback_err.to_string(),
                })
            }
        }
    }

    async fn fetch_primary(&self) -> Result<ClimateSeries, DataError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_delay)
            .with_max_times(self.max_attempts - 1);

        let fetch_both = || async {
            let temperatures = self.fetcher.fetch_indicator(TEMPERATURE_INDICATOR).await?;
            let precipitations = self.fetcher.fetch_indicator(PRECIPITATION_INDICATOR).await?;
            Ok::<_, FetchError>((temperatures, precipitations))
        };

        let (temperatures, precipitations) = fetch_both
            .retry(backoff)
            .notify(|err: &FetchError, dur: Duration| {
                warn!("World Bank request failed, retrying in {:?}: {}", dur, err);
            })
            .await?;

        debug!(
            "Fetched {} temperature and {} precipitation observations",
            temperatures.len(),
            precipitations.len()
        );
        Ok(ClimateSeries::from_partial(&temperatures, &precipitations)?)
    }
}

/// Read the fallback CSV at `path`.
pub async fn load_fallback_csv(path: &Path) -> Result<ClimateSeries, DataError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DataError::Fallback {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    parse_climate_csv(&text).map_err(|reason| DataError::Fallback {
        path: path.display().to_string(),
        reason,
    })
}

/// Cell value of a measurement column; empty and `NA`/`NaN`/`null` cells are missing.
fn measurement(raw: &str, name: &str, line_no: usize) -> Result<Option<f64>, String> {
    let raw = raw.trim_matches('"');
    if raw.is_empty() || ["na", "nan", "null"].contains(&raw.to_ascii_lowercase().as_str()) {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|e| format!("line {line_no}: invalid {name}: {e}"))
}

/// Parse a `year,temperature,precipitation` CSV.
///
/// Columns are located by header name, so extra columns and any column order
/// are accepted. Blank lines are skipped, as are rows missing a temperature or
/// precipitation value.
pub fn parse_climate_csv(text: &str) -> Result<ClimateSeries, String> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (_, header) = lines.next().ok_or_else(|| "file is empty".to_string())?;
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().trim_matches('"').to_ascii_lowercase())
        .collect();
    let position = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| format!("missing '{name}' column"))
    };
    let year_col = position("year")?;
    let temp_col = position("temperature")?;
    let precip_col = position("precipitation")?;

    let mut records = Vec::new();
    let mut skipped = 0;
    for (line_no, line) in lines {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |col: usize| {
            parts
                .get(col)
                .copied()
                .ok_or_else(|| format!("line {line_no}: expected {} fields, got {}", columns.len(), parts.len()))
        };

        let year = field(year_col)?
            .trim_matches('"')
            .parse::<i32>()
            .map_err(|e| format!("line {line_no}: invalid year: {e}"))?;
        let temperature = measurement(field(temp_col)?, "temperature", line_no)?;
        let precipitation = measurement(field(precip_col)?, "precipitation", line_no)?;

        let (Some(temperature), Some(precipitation)) = (temperature, precipitation) else {
            warn!("Skipping line {} (year {}): missing temperature or precipitation", line_no, year);
            skipped += 1;
            continue;
        };

        records.push(ClimateRecord {
            year,
            temperature,
            precipitation,
        });
    }

    if skipped > 0 {
        debug!("Skipped {} incomplete rows", skipped);
    }

    ClimateSeries::new(records).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv() {
        let csv = "year,temperature,precipitation\n2001,12.5,1500.2\n\n2000,12.1,1480.0\n";
        let series = parse_climate_csv(csv).unwrap();

        assert_eq!(series.years(), vec![2000, 2001]);
        assert_eq!(series.temperatures(), vec![12.1, 12.5]);
    }

    #[test]
    fn test_parse_csv_skips_incomplete_rows() {
        let csv = "year,temperature,precipitation\n1990,12.4,1500\n1991,12.5,\n1992,12.6,1510\n1993,NA,1490\n1994,nan,1480\n";
        let series = parse_climate_csv(csv).unwrap();

        assert_eq!(series.years(), vec![1990, 1992]);
        assert_eq!(series.precipitations(), vec![1500.0, 1510.0]);
    }

    #[test]
    fn test_parse_csv_all_rows_incomplete() {
        let csv = "year,temperature,precipitation\n1990,,1500\n1991,12.5,\n";
        assert!(parse_climate_csv(csv).is_err());
    }

    #[test]
    fn test_parse_csv_rejects_non_integer_year() {
        for year in ["1990.9", "1e12", "NaN", ""] {
            let csv = format!("year,temperature,precipitation\n1989,12.0,1500\n{year},12.4,1500\n");
            let err = parse_climate_csv(&csv).unwrap_err();
            assert!(err.starts_with("line 3: invalid year"), "{year}: {err}");
        }
    }

    #[test]
    fn test_parse_csv_reordered_and_extra_columns() {
        let csv = "Precipitation,Year,station,Temperature\n1500,2000,KTM,12.0\n";
        let series = parse_climate_csv(csv).unwrap();

        assert_eq!(series.records()[0].year, 2000);
        assert_eq!(series.records()[0].precipitation, 1500.0);
    }

    #[test]
    fn test_parse_csv_missing_column() {
        let err = parse_climate_csv("year,temperature\n2000,12.0\n").unwrap_err();
        assert!(err.contains("precipitation"));
    }

    #[test]
    fn test_parse_csv_bad_number_reports_line() {
        let err = parse_climate_csv("year,temperature,precipitation\n2000,warm,1500\n").unwrap_err();
        assert!(err.starts_with("line 2"));
    }

    #[test]
    fn test_parse_csv_header_only() {
        assert!(parse_climate_csv("year,temperature,precipitation\n").is_err());
    }
}
