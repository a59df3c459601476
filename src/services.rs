pub mod forecast_service;

pub use forecast_service::{FeatureImportanceResponse, ForecastService, ScopeForecast, ServiceError};
