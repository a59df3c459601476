pub mod augment;
pub mod engine;
pub mod forest;
pub mod sarima;

use serde::{Serialize, Serializer};
use std::fmt;
use utoipa::ToSchema;

pub use augment::{EngineeredRow, ENGINEERED_FEATURES};
pub use engine::{
    EnsembleTrainer, FitError, ForecastEngine, ModelSet, ModelSummary, ModelTrainer,
    RegressionModel, SeasonalModel,
};
pub use forest::{ForestParams, RandomForestRegressor};
pub use sarima::{SarimaModel, SarimaOrder};

/// Weight of the seasonal model in the ensemble blend.
pub const SEASONAL_WEIGHT: f64 = 0.6;
/// Weight of the regression model in the ensemble blend.
pub const REGRESSION_WEIGHT: f64 = 0.4;

/// Training and prediction context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// The unadjusted national series
    Base,
    /// A named location from the registry
    Location(String),
}

impl Scope {
    pub fn location(name: impl Into<String>) -> Self {
        Scope::Location(name.into())
    }

    pub fn location_name(&self) -> Option<&str> {
        match self {
            Scope::Base => None,
            Scope::Location(name) => Some(name),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Base => write!(f, "base"),
            Scope::Location(name) => write!(f, "{name}"),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ForecastError {
    #[error("Insufficient history for {scope}: need at least {required} observations, got {actual}")]
    InsufficientHistory {
        scope: Scope,
        required: usize,
        actual: usize,
    },
    #[error("Model fit failed for {scope}: {reason}")]
    FitFailure { scope: Scope, reason: String },
    #[error("Model not trained for {0}")]
    NotTrained(Scope),
    #[error("Forecast horizon must be at least one period, got {0}")]
    EmptyForecastInputs(usize),
    #[error("Forecast for {0} produced no finite values")]
    DegenerateForecast(Scope),
}

/// One forecast year.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ForecastRow {
    pub year: i32,
    /// Ensemble blend of the two components
    pub temperature: f64,
    pub seasonal_component: f64,
    pub regression_component: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ForecastResult {
    #[schema(value_type = String)]
    pub scope: Scope,
    pub rows: Vec<ForecastRow>,
}

impl ForecastResult {
    pub fn temperatures(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.temperature).collect()
    }

    pub fn years(&self) -> Vec<i32> {
        self.rows.iter().map(|r| r.year).collect()
    }
}
