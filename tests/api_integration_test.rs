// API integration tests that verify HTTP endpoints
// Tests the Axum router with real HTTP requests against in-memory data

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::synthetic_series;
use http_body_util::BodyExt; // For `.collect()`
use nepal_climate_forecast::api::{create_router, AppState};
use nepal_climate_forecast::data_source::DataOrigin;
use nepal_climate_forecast::locations::LocationRegistry;
use nepal_climate_forecast::services::ForecastService;
use serde_json::Value;
use tower::ServiceExt; // For `oneshot`

fn app(years: usize) -> Router {
    let service = ForecastService::new(
        synthetic_series(years),
        DataOrigin::Fallback,
        LocationRegistry::nepal(),
        10,
    );
    create_router(AppState {
        forecast_service: service,
    })
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (status, body) = get(app(34), "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_climate_endpoint() {
    let (status, body) = get(app(34), "/api/v1/climate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["origin"], "fallback");
    assert_eq!(body["series"]["records"].as_array().unwrap().len(), 34);
}

#[tokio::test]
async fn test_overview_endpoint() {
    let (status, body) = get(app(34), "/api/v1/climate/overview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["first_year"], 1990);
    assert_eq!(body["last_year"], 2023);
    assert_eq!(body["coverage_years"], 34);
}

#[tokio::test]
async fn test_analysis_endpoints() {
    let (status, features) = get(app(34), "/api/v1/climate/features").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(features["rows"].as_array().unwrap().len(), 34);

    let (status, matrix) = get(app(34), "/api/v1/climate/correlations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(matrix["columns"].as_array().unwrap().len(), 13);

    let (status, profile) = get(app(34), "/api/v1/climate/seasonal-profile").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile[0]["month"], 1);
}

#[tokio::test]
async fn test_location_endpoints() {
    let (status, locations) = get(app(34), "/api/v1/locations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(locations.as_array().unwrap().len(), 5);

    let (status, snapshots) = get(app(34), "/api/v1/locations/snapshot").await;
    assert_eq!(status, StatusCode::OK);
    let snapshots = snapshots.as_array().unwrap();
    assert_eq!(snapshots.len(), 5);
    assert!(snapshots.iter().all(|s| s["year"] == 2023));
}

#[tokio::test]
async fn test_base_forecast() {
    let (status, body) = get(app(34), "/api/v1/forecast?years=3").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["forecast"]["scope"], "base");
    let rows = body["forecast"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["year"], 2024);
    assert!(rows[0].get("location").is_none());
    assert_eq!(body["model"]["observations"], 34);
}

#[tokio::test]
async fn test_forecast_default_horizon() {
    let (status, body) = get(app(34), "/api/v1/forecast").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["forecast"]["rows"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_location_forecast() {
    let (status, body) = get(app(34), "/api/v1/forecast/Pokhara?years=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["forecast"]["scope"], "Pokhara");
    assert_eq!(body["forecast"]["rows"][1]["location"], "Pokhara");
}

#[tokio::test]
async fn test_all_location_forecasts() {
    let (status, body) = get(app(34), "/api/v1/forecast/locations?years=2").await;
    assert_eq!(status, StatusCode::OK);
    let forecasts = body.as_array().unwrap();
    assert_eq!(forecasts.len(), 5);
    assert_eq!(forecasts[0]["scope"], "Bharatpur");
}

#[tokio::test]
async fn test_feature_importance() {
    let (status, body) = get(app(34), "/api/v1/forecast/Dharan/importance").await;
    assert_eq!(status, StatusCode::OK);

    let importances = body["importances"].as_object().unwrap();
    assert_eq!(importances.len(), 6);
    let total: f64 = importances.values().map(|v| v.as_f64().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_zero_years_is_bad_request() {
    let (status, body) = get(app(34), "/api/v1/forecast?years=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("at least one period"));
}

#[tokio::test]
async fn test_horizon_above_maximum_is_bad_request() {
    let (status, body) = get(app(34), "/api/v1/forecast/Kathmandu?years=25").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("maximum of 10"));
}

#[tokio::test]
async fn test_unknown_location_is_not_found() {
    let (status, body) = get(app(34), "/api/v1/forecast/Atlantis?years=2").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unknown location: Atlantis");

    let (status, _) = get(app(34), "/api/v1/forecast/Atlantis/importance").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_short_history_is_unprocessable() {
    let (status, body) = get(app(12), "/api/v1/forecast?years=2").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("Insufficient history"));
}

#[tokio::test]
async fn test_short_history_all_locations_is_empty() {
    let (status, body) = get(app(12), "/api/v1/forecast/locations?years=2").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_openapi_lists_routes() {
    let spec = nepal_climate_forecast::api::generate_openapi_spec();
    let json = serde_json::to_value(&spec).unwrap();
    let paths = json["paths"].as_object().unwrap();

    assert!(paths.contains_key("/api/v1/forecast"));
    assert!(paths.contains_key("/api/v1/forecast/{location}/importance"));
    assert_eq!(paths.len(), 12);
}
