use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::data_source::ClimateDataResolver;
use crate::fetcher::WorldBankFetcher;
use crate::locations::LocationRegistry;
use crate::services::ForecastService;

/// Running application: the HTTP server task.
pub struct Application {
    pub server_handle: JoinHandle<Result<(), std::io::Error>>,
}

impl Application {
    /// Resolve the climate data, load the location table and spawn the server.
    ///
    /// Data is acquired once here; requests only read it.
    pub async fn build(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Initializing application components");

        let fetcher = WorldBankFetcher::with_base_url(
            config.world_bank_base_url.clone(),
            config.data_start_year,
            config.data_end_year,
        );
        let resolver = ClimateDataResolver::new(fetcher, config.fallback_data_path.clone())
            .with_retry(config.fetch_max_attempts, config.fetch_retry_delay());
        let data = resolver.resolve().await?;
        info!(
            "Climate data covers {} years from {}",
            data.series.len(),
            data.origin
        );

        let registry = match &config.locations_path {
            Some(path) => {
                info!("Loading locations from {}", path.display());
                LocationRegistry::from_json_file(path)?
            }
            None => LocationRegistry::nepal(),
        };
        info!("{} locations registered", registry.len());

        let forecast_service = ForecastService::new(
            data.series,
            data.origin,
            registry,
            config.max_forecast_years,
        );

        let app_state = AppState { forecast_service };
        let app = create_router(app_state).layer(TraceLayer::new_for_http());

        let addr = config.server_addr();
        info!("Starting HTTP server on {}", addr);

        let server_handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await
        });

        info!("Application initialized successfully");

        Ok(Self { server_handle })
    }

    /// Run until the server stops.
    pub async fn run_until_stopped(self) -> Result<(), Box<dyn std::error::Error>> {
        self.server_handle.await??;
        Ok(())
    }
}
