use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use nepal_climate_forecast::analysis::ClimateOverview;
use nepal_climate_forecast::data_source::{load_fallback_csv, ClimateDataResolver, DataOrigin};
use nepal_climate_forecast::fetcher::{WorldBankFetcher, DEFAULT_BASE_URL};
use nepal_climate_forecast::forecast::{ForecastEngine, ForecastResult, Scope};
use nepal_climate_forecast::locations::LocationRegistry;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "forecast-report")]
#[command(about = "Train the ensemble for Nepal and each location and print forecast tables", long_about = None)]
struct Cli {
    /// Years to forecast (1-10)
    #[arg(long, default_value = "5")]
    years: usize,

    /// Read the local CSV instead of calling the World Bank API
    #[arg(long)]
    offline: bool,

    /// Fallback CSV with year,temperature,precipitation columns
    #[arg(long, env = "FALLBACK_DATA_PATH", default_value = "data/nepal_climate_data.csv")]
    data_file: PathBuf,

    /// JSON location table (defaults to the built-in Nepal cities)
    #[arg(long, env = "LOCATIONS_PATH")]
    locations: Option<PathBuf>,

    #[arg(long, env = "WORLD_BANK_BASE_URL", default_value = DEFAULT_BASE_URL)]
    world_bank_base_url: String,

    #[arg(long, env = "DATA_START_YEAR", default_value = "1990")]
    start_year: i32,

    #[arg(long, env = "DATA_END_YEAR", default_value = "2023")]
    end_year: i32,

    /// Also print the regression feature importances of every location
    #[arg(long)]
    importance: bool,
}

fn print_forecast(title: &str, forecast: &ForecastResult) {
    println!("\n{title}");
    println!("{}", "-".repeat(60));
    println!("{:<8}{:>12}{:>12}{:>14}{:>14}", "Year", "Temp (°C)", "Lower", "Upper", "SARIMA");
    for row in &forecast.rows {
        println!(
            "{:<8}{:>12.2}{:>12.2}{:>14.2}{:>14.2}",
            row.year, row.temperature, row.lower_bound, row.upper_bound, row.seasonal_component
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    if cli.years == 0 || cli.years > 10 {
        return Err(format!("--years must be between 1 and 10, got {}", cli.years).into());
    }

    let (series, origin) = if cli.offline {
        (load_fallback_csv(&cli.data_file).await?, DataOrigin::Fallback)
    } else {
        let fetcher =
            WorldBankFetcher::with_base_url(cli.world_bank_base_url.clone(), cli.start_year, cli.end_year);
        let resolved = ClimateDataResolver::new(fetcher, cli.data_file.clone())
            .with_retry(3, Duration::from_secs(2))
            .resolve()
            .await?;
        (resolved.series, resolved.origin)
    };

    let registry = match &cli.locations {
        Some(path) => LocationRegistry::from_json_file(path)?,
        None => LocationRegistry::nepal(),
    };

    println!("\n{}", "=".repeat(60));
    println!("Nepal Climate Forecast");
    println!("{}", "=".repeat(60));
    println!("Source:             {origin}");
    if let Some(overview) = ClimateOverview::from_series(&series) {
        println!("Coverage:           {}-{} ({} years)", overview.first_year, overview.last_year, overview.coverage_years);
        println!("Mean Temperature:   {:.2} °C", overview.mean_temperature);
        println!("Temperature Change: {:+.2} °C", overview.temperature_change);
        println!("Mean Precipitation: {:.1} mm", overview.mean_precipitation);
        if let Some(trend) = overview.temperature_trend_per_decade {
            println!("Trend:              {trend:+.3} °C/decade");
        }
    }

    let train_start = Instant::now();
    let mut engine = ForecastEngine::new();
    let adjusted = registry.adjust_all(&series);

    let pb = ProgressBar::new(adjusted.len() as u64 + 1);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );

    pb.set_message("national series");
    engine.try_train(&series, Scope::Base)?;
    pb.inc(1);

    for location in &adjusted {
        pb.set_message(location.name().to_string());
        if !engine.train(&location.series, Scope::location(location.name())) {
            warn!("Training failed for {}", location.name());
        }
        pb.inc(1);
    }
    pb.finish_with_message("trained");
    info!("Trained {} scopes", engine.trained_scopes().len());

    let base = engine.predict(cli.years, &Scope::Base)?;
    print_forecast("National forecast", &base);

    println!("\nLocation forecasts for {}", base.years().last().copied().unwrap_or_default());
    println!("{}", "-".repeat(60));
    println!("{:<14}{:>12}{:>12}{:>12}", "Location", "Elevation", "Temp (°C)", "Change");
    for forecast in engine.predict_all_locations(cli.years)? {
        let Some(name) = forecast.scope.location_name() else {
            continue;
        };
        let Some(last) = forecast.rows.last() else {
            continue;
        };
        let elevation = registry.get(name).map(|p| p.elevation_meters).unwrap_or(f64::NAN);
        let latest = adjusted
            .iter()
            .find(|s| s.name() == name)
            .and_then(|s| s.snapshot())
            .map(|s| s.temperature)
            .unwrap_or(f64::NAN);
        println!(
            "{:<14}{:>10.0} m{:>12.2}{:>+12.2}",
            name,
            elevation,
            last.temperature,
            last.temperature - latest
        );
    }

    let mut scopes = vec![Scope::Base];
    if cli.importance {
        scopes.extend(adjusted.iter().map(|s| Scope::location(s.name())));
    }
    for scope in scopes {
        let Some(importances) = engine.feature_importance(&scope) else {
            continue;
        };
        println!("\nFeature importance ({scope})");
        println!("{}", "-".repeat(60));
        let mut ranked: Vec<(String, f64)> = importances.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (feature, score) in ranked {
            println!("{feature:<20}{score:>10.4}");
        }
    }

    println!("{}", "-".repeat(60));
    println!("Total Time:         {:.2}s", train_start.elapsed().as_secs_f64());

    Ok(())
}
