use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::fetch_error::FetchError;

pub const DEFAULT_BASE_URL: &str = "https://api.worldbank.org/v2";
pub const COUNTRY_CODE: &str = "NPL";
pub const TEMPERATURE_INDICATOR: &str = "AG.TMP.AVG";
pub const PRECIPITATION_INDICATOR: &str = "AG.PCP.AVG";

/// One data point of a World Bank indicator page.
#[derive(Debug, Clone, Deserialize)]
struct IndicatorEntry {
    date: String,
    value: Option<f64>,
}

/// Client for annual country indicators of the World Bank API.
#[derive(Clone)]
pub struct WorldBankFetcher {
    client: Client,
    base_url: String,
    start_year: i32,
    end_year: i32,
}

impl WorldBankFetcher {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), start_year, end_year)
    }

    /// Point the fetcher at another host, e.g. a local mock server.
    pub fn with_base_url(base_url: String, start_year: i32, end_year: i32) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            start_year,
            end_year,
        }
    }

    pub fn indicator_url(&self, indicator: &str) -> String {
        format!(
            "{}/country/{}/indicator/{}?format=json&date={}:{}&per_page=1000",
            self.base_url, COUNTRY_CODE, indicator, self.start_year, self.end_year
        )
    }

    /// Fetch `(year, value)` pairs for `indicator`, skipping years without a value.
    #[instrument(skip(self), fields(start = self.start_year, end = self.end_year))]
    pub async fn fetch_indicator(&self, indicator: &str) -> Result<Vec<(i32, f64)>, FetchError> {
        let url = self.indicator_url(indicator);
        debug!("Requesting {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        debug!("Received HTTP response with status: {}", status);
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        debug!("Retrieved indicator payload, size: {} bytes", body.len());

        parse_indicator_response(indicator, &body)
    }
}

/// Parse the `[metadata, entries]` envelope returned by the indicator endpoint.
pub fn parse_indicator_response(indicator: &str, body: &str) -> Result<Vec<(i32, f64)>, FetchError> {
    let envelope: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    let parts = envelope
        .as_array()
        .ok_or_else(|| FetchError::Parse("response is not a JSON array".to_string()))?;

    // Errors come back as a one-element array carrying a "message" object.
    let entries = match parts.get(1) {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => return Err(FetchError::NoData(indicator.to_string())),
        Some(other) => {
            return Err(FetchError::Parse(format!(
                "expected an array of observations, got {other}"
            )))
        }
    };

    let mut observations = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for raw in entries {
        let entry: IndicatorEntry = serde_json::from_value(raw.clone())
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        let Some(value) = entry.value else {
            skipped += 1;
            continue;
        };
        match entry.date.trim().parse::<i32>() {
            Ok(year) => observations.push((year, value)),
            Err(e) => {
                warn!("Skipping entry with unparseable date '{}': {}", entry.date, e);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} entries without a usable value", skipped);
    }
    if observations.is_empty() {
        return Err(FetchError::NoData(indicator.to_string()));
    }

    observations.sort_by_key(|&(year, _)| year);
    Ok(observations)
}
