// Shared fixtures for integration tests
#![allow(dead_code)]

use nepal_climate_forecast::climate::{ClimateRecord, ClimateSeries};

pub const FALLBACK_CSV: &str = include_str!("../data/nepal_climate_data.csv");

/// Annual series starting in 1990 with a warming trend, an oscillation and a
/// precipitation cycle, long enough for the seasonal model.
pub fn synthetic_series(years: usize) -> ClimateSeries {
    let records = (0..years)
        .map(|i| {
            let t = i as f64;
            ClimateRecord {
                year: 1990 + i as i32,
                temperature: 12.4 + 0.03 * t + 0.35 * (t * 0.9).sin() + 0.1 * (t * 2.3).cos(),
                precipitation: 1480.0 + 65.0 * (t * 0.7).cos() - 2.0 * t,
            }
        })
        .collect();
    ClimateSeries::new(records).expect("synthetic series is valid")
}

/// World Bank indicator payload for `observations`, newest first like the real API.
pub fn indicator_body(indicator: &str, observations: &[(i32, Option<f64>)]) -> String {
    let entries: Vec<serde_json::Value> = observations
        .iter()
        .rev()
        .map(|(year, value)| {
            serde_json::json!({
                "indicator": {"id": indicator, "value": "indicator"},
                "country": {"id": "NP", "value": "Nepal"},
                "countryiso3code": "NPL",
                "date": year.to_string(),
                "value": value,
                "unit": "",
                "obs_status": "",
                "decimal": 1
            })
        })
        .collect();

    serde_json::json!([
        {"page": 1, "pages": 1, "per_page": 1000, "total": entries.len()},
        entries
    ])
    .to_string()
}
