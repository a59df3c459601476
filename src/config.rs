use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub world_bank_base_url: String,
    pub data_start_year: i32,
    pub data_end_year: i32,
    pub fallback_data_path: PathBuf,
    pub locations_path: Option<PathBuf>,
    pub fetch_max_attempts: usize,
    pub fetch_retry_delay_secs: u64,
    pub max_forecast_years: usize,
}

/// Read `key`, falling back to `default` when unset. Set but unparseable values are errors.
fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_var("SERVER_PORT", 8080)?,
            world_bank_base_url: env::var("WORLD_BANK_BASE_URL")
                .unwrap_or_else(|_| crate::fetcher::DEFAULT_BASE_URL.to_string()),
            data_start_year: parse_var("DATA_START_YEAR", 1990)?,
            data_end_year: parse_var("DATA_END_YEAR", 2023)?,
            fallback_data_path: env::var("FALLBACK_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/nepal_climate_data.csv")),
            locations_path: env::var("LOCATIONS_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            fetch_max_attempts: parse_var("FETCH_MAX_ATTEMPTS", 3)?,
            fetch_retry_delay_secs: parse_var("FETCH_RETRY_DELAY_SECS", 2)?,
            max_forecast_years: parse_var("MAX_FORECAST_YEARS", 10)?,
        };

        if config.data_start_year > config.data_end_year {
            return Err(ConfigError::InvalidValue {
                key: "DATA_START_YEAR".to_string(),
                value: format!("{} (after DATA_END_YEAR {})", config.data_start_year, config.data_end_year),
            });
        }
        if config.fetch_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FETCH_MAX_ATTEMPTS".to_string(),
                value: "0".to_string(),
            });
        }
        if config.max_forecast_years == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_FORECAST_YEARS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(config)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_secs(self.fetch_retry_delay_secs)
    }
}
