use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::analysis::{
    correlation_matrix, seasonal_profile, ClimateOverview, CorrelationMatrix, MonthlyProfile,
};
use crate::climate::ClimateSeries;
use crate::data_source::DataOrigin;
use crate::features::{build_features, FeatureTable};
use crate::forecast::{ForecastEngine, ForecastError, ForecastResult, ModelSummary, Scope};
use crate::locations::{LocationError, LocationProfile, LocationRegistry, LocationSnapshot};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error("Forecast horizon of {requested} years exceeds the maximum of {max}")]
    HorizonTooLong { requested: usize, max: usize },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Forecast for one scope together with the training metadata of its models.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ScopeForecast {
    pub forecast: ForecastResult,
    pub model: ModelSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FeatureImportanceResponse {
    pub scope: String,
    pub importances: BTreeMap<String, f64>,
}

/// Read-only climate data plus on-demand model training.
///
/// Every forecast call builds its own [`ForecastEngine`]; nothing trained is
/// kept between calls.
#[derive(Clone)]
pub struct ForecastService {
    series: Arc<ClimateSeries>,
    origin: DataOrigin,
    registry: Arc<LocationRegistry>,
    max_forecast_years: usize,
}

impl ForecastService {
    pub fn new(
        series: ClimateSeries,
        origin: DataOrigin,
        registry: LocationRegistry,
        max_forecast_years: usize,
    ) -> Self {
        Self {
            series: Arc::new(series),
            origin,
            registry: Arc::new(registry),
            max_forecast_years,
        }
    }

    pub fn series(&self) -> &ClimateSeries {
        &self.series
    }

    pub fn origin(&self) -> DataOrigin {
        self.origin
    }

    pub fn max_forecast_years(&self) -> usize {
        self.max_forecast_years
    }

    pub fn overview(&self) -> Option<ClimateOverview> {
        ClimateOverview::from_series(&self.series)
    }

    pub fn features(&self) -> FeatureTable {
        build_features(&self.series)
    }

    pub fn correlations(&self) -> CorrelationMatrix {
        correlation_matrix(&self.features().rows)
    }

    pub fn seasonal_profile(&self) -> Vec<MonthlyProfile> {
        seasonal_profile(&self.features().rows)
    }

    pub fn locations(&self) -> &[LocationProfile] {
        self.registry.profiles()
    }

    /// Latest elevation-adjusted observation for every registered location.
    pub fn location_snapshots(&self) -> Vec<LocationSnapshot> {
        self.registry
            .adjust_all(&self.series)
            .iter()
            .filter_map(|s| s.snapshot())
            .collect()
    }

    fn check_horizon(&self, years: usize) -> Result<(), ServiceError> {
        if years == 0 {
            return Err(ForecastError::EmptyForecastInputs(years).into());
        }
        if years > self.max_forecast_years {
            return Err(ServiceError::HorizonTooLong {
                requested: years,
                max: self.max_forecast_years,
            });
        }
        Ok(())
    }

    /// Series a scope trains on: the national series, or its elevation-adjusted copy.
    fn series_for(&self, scope: &Scope) -> Result<ClimateSeries, ServiceError> {
        match scope {
            Scope::Base => Ok(self.series.as_ref().clone()),
            Scope::Location(name) => {
                let profile = self.registry.get(name)?;
                Ok(crate::locations::adjust_series(&self.series, profile).series)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn forecast_base(&self, years: usize) -> Result<ScopeForecast, ServiceError> {
        self.forecast_scope(Scope::Base, years).await
    }

    #[instrument(skip(self))]
    pub async fn forecast_location(&self, name: &str, years: usize) -> Result<ScopeForecast, ServiceError> {
        let profile = self.registry.get(name)?;
        self.forecast_scope(Scope::location(profile.name.clone()), years)
            .await
    }

    async fn forecast_scope(&self, scope: Scope, years: usize) -> Result<ScopeForecast, ServiceError> {
        self.check_horizon(years)?;
        let series = self.series_for(&scope)?;

        let result = tokio::task::spawn_blocking(move || -> Result<ScopeForecast, ForecastError> {
            let mut engine = ForecastEngine::new();
            engine.try_train(&series, scope.clone())?;
            let forecast = engine.predict(years, &scope)?;
            let model = engine
                .model_summary(&scope)
                .cloned()
                .ok_or_else(|| ForecastError::NotTrained(scope.clone()))?;
            Ok(ScopeForecast { forecast, model })
        })
        .await??;

        info!(
            scope = %result.forecast.scope,
            periods = result.forecast.rows.len(),
            "Forecast completed"
        );
        Ok(result)
    }

    /// Forecasts for every registered location.
    ///
    /// Locations whose training or prediction fails are logged and left out.
    #[instrument(skip(self))]
    pub async fn forecast_all_locations(&self, years: usize) -> Result<Vec<ForecastResult>, ServiceError> {
        self.check_horizon(years)?;
        let adjusted = self.registry.adjust_all(&self.series);

        let results = tokio::task::spawn_blocking(move || {
            let mut engine = ForecastEngine::new();
            for location in &adjusted {
                if !engine.train(&location.series, Scope::location(location.name())) {
                    warn!(location = %location.name(), "Skipping location after failed training");
                }
            }
            engine.predict_all_locations(years)
        })
        .await??;

        debug!("Produced {} location forecasts", results.len());
        Ok(results)
    }

    #[instrument(skip(self))]
    pub async fn feature_importance(&self, name: &str) -> Result<FeatureImportanceResponse, ServiceError> {
        let scope = Scope::location(self.registry.get(name)?.name.clone());
        let series = self.series_for(&scope)?;

        let importances = tokio::task::spawn_blocking(move || -> Result<BTreeMap<String, f64>, ForecastError> {
            let mut engine = ForecastEngine::new();
            engine.try_train(&series, scope.clone())?;
            engine
                .feature_importance(&scope)
                .ok_or(ForecastError::NotTrained(scope))
        })
        .await??;

        Ok(FeatureImportanceResponse {
            scope: name.to_string(),
            importances,
        })
    }
}
