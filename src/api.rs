use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::analysis::{ClimateOverview, CorrelationMatrix, ErrorMetrics, MonthlyProfile};
use crate::climate::{ClimateRecord, ClimateSeries};
use crate::data_source::DataOrigin;
use crate::features::{FeatureRow, FeatureTable};
use crate::forecast::{ForecastError, ForecastResult, ForecastRow, ModelSummary};
use crate::locations::{LocationError, LocationProfile, LocationSnapshot};
use crate::services::{FeatureImportanceResponse, ForecastService, ScopeForecast, ServiceError};

/// Forecast horizon used when `years` is omitted.
pub const DEFAULT_FORECAST_YEARS: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub forecast_service: ForecastService,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, ToSchema)]
pub struct ClimateDataResponse {
    pub origin: DataOrigin,
    pub series: ClimateSeries,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HorizonParams {
    /// Number of years to forecast
    #[serde(default = "default_years")]
    pub years: usize,
}

fn default_years() -> usize {
    DEFAULT_FORECAST_YEARS
}

/// API error carrying the HTTP status chosen for the underlying failure.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::Forecast(ForecastError::NotTrained(_)) => StatusCode::NOT_FOUND,
            ServiceError::Location(LocationError::UnknownLocation(_)) => StatusCode::NOT_FOUND,
            ServiceError::Forecast(ForecastError::EmptyForecastInputs(_)) => StatusCode::BAD_REQUEST,
            ServiceError::HorizonTooLong { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Forecast(
                ForecastError::InsufficientHistory { .. }
                | ForecastError::FitFailure { .. }
                | ForecastError::DegenerateForecast(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Location(_) | ServiceError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        } else {
            warn!("Request rejected ({}): {}", self.status, self.message);
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        get_climate,
        get_overview,
        get_features,
        get_correlations,
        get_seasonal_profile,
        get_locations,
        get_location_snapshots,
        get_base_forecast,
        get_location_forecasts,
        get_location_forecast,
        get_feature_importance,
    ),
    components(schemas(
        HealthResponse,
        ErrorResponse,
        ClimateDataResponse,
        DataOrigin,
        ClimateSeries,
        ClimateRecord,
        ClimateOverview,
        FeatureTable,
        FeatureRow,
        CorrelationMatrix,
        MonthlyProfile,
        LocationProfile,
        LocationSnapshot,
        ScopeForecast,
        ForecastResult,
        ForecastRow,
        ModelSummary,
        ErrorMetrics,
        FeatureImportanceResponse,
    )),
    tags(
        (name = "climate", description = "Historical climate data and analysis"),
        (name = "locations", description = "Elevation-adjusted locations"),
        (name = "forecast", description = "Ensemble temperature forecasts"),
    ),
    info(
        title = "Nepal Climate Forecast API",
        description = "Climate history, elevation adjustment and SARIMA/random forest ensemble forecasts for Nepal"
    )
)]
pub struct ApiDoc;

pub fn generate_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/climate", get(get_climate))
        .route("/climate/overview", get(get_overview))
        .route("/climate/features", get(get_features))
        .route("/climate/correlations", get(get_correlations))
        .route("/climate/seasonal-profile", get(get_seasonal_profile))
        .route("/locations", get(get_locations))
        .route("/locations/snapshot", get(get_location_snapshots))
        .route("/forecast", get(get_base_forecast))
        .route("/forecast/locations", get(get_location_forecasts))
        .route("/forecast/{location}", get(get_location_forecast))
        .route("/forecast/{location}/importance", get(get_feature_importance))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
#[instrument(skip(_state))]
async fn health(State(_state): State<AppState>) -> impl IntoResponse {
    debug!("Health check requested");
    let response = HealthResponse {
        status: "healthy".to_string(),
    };
    (StatusCode::OK, Json(response))
}

#[utoipa::path(
    get,
    path = "/api/v1/climate",
    tag = "climate",
    responses((status = 200, description = "Resolved annual climate series", body = ClimateDataResponse))
)]
#[instrument(skip(state))]
async fn get_climate(State(state): State<AppState>) -> Json<ClimateDataResponse> {
    let service = &state.forecast_service;
    info!(
        "Serving {} years of climate data from {}",
        service.series().len(),
        service.origin()
    );
    Json(ClimateDataResponse {
        origin: service.origin(),
        series: service.series().clone(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/climate/overview",
    tag = "climate",
    responses(
        (status = 200, description = "Summary statistics", body = ClimateOverview),
        (status = 404, description = "No data to summarize", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
async fn get_overview(State(state): State<AppState>) -> Result<Json<ClimateOverview>, ApiError> {
    state.forecast_service.overview().map(Json).ok_or_else(|| ApiError {
        status: StatusCode::NOT_FOUND,
        message: "No climate data to summarize".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/climate/features",
    tag = "climate",
    responses((status = 200, description = "Calendar-aware feature rows", body = FeatureTable))
)]
#[instrument(skip(state))]
async fn get_features(State(state): State<AppState>) -> Json<FeatureTable> {
    let table = state.forecast_service.features();
    debug!("Built {} feature rows", table.len());
    Json(table)
}

#[utoipa::path(
    get,
    path = "/api/v1/climate/correlations",
    tag = "climate",
    responses((status = 200, description = "Pearson correlations between feature columns", body = CorrelationMatrix))
)]
#[instrument(skip(state))]
async fn get_correlations(State(state): State<AppState>) -> Json<CorrelationMatrix> {
    Json(state.forecast_service.correlations())
}

#[utoipa::path(
    get,
    path = "/api/v1/climate/seasonal-profile",
    tag = "climate",
    responses((status = 200, description = "Per-month means", body = Vec<MonthlyProfile>))
)]
#[instrument(skip(state))]
async fn get_seasonal_profile(State(state): State<AppState>) -> Json<Vec<MonthlyProfile>> {
    Json(state.forecast_service.seasonal_profile())
}

#[utoipa::path(
    get,
    path = "/api/v1/locations",
    tag = "locations",
    responses((status = 200, description = "Registered locations", body = Vec<LocationProfile>))
)]
#[instrument(skip(state))]
async fn get_locations(State(state): State<AppState>) -> Json<Vec<LocationProfile>> {
    Json(state.forecast_service.locations().to_vec())
}

#[utoipa::path(
    get,
    path = "/api/v1/locations/snapshot",
    tag = "locations",
    responses((status = 200, description = "Latest adjusted values per location", body = Vec<LocationSnapshot>))
)]
#[instrument(skip(state))]
async fn get_location_snapshots(State(state): State<AppState>) -> Json<Vec<LocationSnapshot>> {
    let snapshots = state.forecast_service.location_snapshots();
    info!("Built snapshots for {} locations", snapshots.len());
    Json(snapshots)
}

#[utoipa::path(
    get,
    path = "/api/v1/forecast",
    tag = "forecast",
    params(HorizonParams),
    responses(
        (status = 200, description = "National forecast", body = ScopeForecast),
        (status = 400, description = "Invalid horizon", body = ErrorResponse),
        (status = 422, description = "Models could not be fitted", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
async fn get_base_forecast(
    State(state): State<AppState>,
    Query(params): Query<HorizonParams>,
) -> Result<Json<ScopeForecast>, ApiError> {
    let forecast = state.forecast_service.forecast_base(params.years).await?;
    Ok(Json(forecast))
}

#[utoipa::path(
    get,
    path = "/api/v1/forecast/locations",
    tag = "forecast",
    params(HorizonParams),
    responses(
        (status = 200, description = "Forecast for every location that could be trained", body = Vec<ForecastResult>),
        (status = 400, description = "Invalid horizon", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
async fn get_location_forecasts(
    State(state): State<AppState>,
    Query(params): Query<HorizonParams>,
) -> Result<Json<Vec<ForecastResult>>, ApiError> {
    let forecasts = state
        .forecast_service
        .forecast_all_locations(params.years)
        .await?;
    info!("Forecast {} locations", forecasts.len());
    Ok(Json(forecasts))
}

#[utoipa::path(
    get,
    path = "/api/v1/forecast/{location}",
    tag = "forecast",
    params(
        ("location" = String, Path, description = "Location name"),
        HorizonParams
    ),
    responses(
        (status = 200, description = "Forecast for one location", body = ScopeForecast),
        (status = 400, description = "Invalid horizon", body = ErrorResponse),
        (status = 404, description = "Unknown location", body = ErrorResponse),
        (status = 422, description = "Models could not be fitted", body = ErrorResponse)
    )
)]
#[instrument(skip(state), fields(location = %location))]
async fn get_location_forecast(
    State(state): State<AppState>,
    Path(location): Path<String>,
    Query(params): Query<HorizonParams>,
) -> Result<Json<ScopeForecast>, ApiError> {
    let forecast = state
        .forecast_service
        .forecast_location(&location, params.years)
        .await?;
    Ok(Json(forecast))
}

#[utoipa::path(
    get,
    path = "/api/v1/forecast/{location}/importance",
    tag = "forecast",
    params(("location" = String, Path, description = "Location name")),
    responses(
        (status = 200, description = "Regression feature importances", body = FeatureImportanceResponse),
        (status = 404, description = "Unknown location", body = ErrorResponse),
        (status = 422, description = "Models could not be fitted", body = ErrorResponse)
    )
)]
#[instrument(skip(state), fields(location = %location))]
async fn get_feature_importance(
    State(state): State<AppState>,
    Path(location): Path<String>,
) -> Result<Json<FeatureImportanceResponse>, ApiError> {
    let response = state.forecast_service.feature_importance(&location).await?;
    Ok(Json(response))
}
