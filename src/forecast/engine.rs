use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, instrument, warn};

use super::augment::{augment, future_rows, EngineeredRow, ENGINEERED_FEATURES};
use super::forest::{ForestParams, RandomForestRegressor};
use super::sarima::{SarimaModel, SarimaOrder};
use super::{ForecastError, ForecastResult, ForecastRow, Scope, REGRESSION_WEIGHT, SEASONAL_WEIGHT};
use crate::analysis::ErrorMetrics;
use crate::climate::ClimateSeries;

/// Default confidence level of forecast intervals.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Time-series half of the ensemble.
pub trait SeasonalModel: Send + Sync {
    /// Point forecasts for the `steps` periods after the training data.
    fn forecast(&self, steps: usize) -> Vec<f64>;

    /// Prediction interval half-widths; zero when the model has no error model.
    fn interval_half_widths(&self, steps: usize, _confidence_level: f64) -> Vec<f64> {
        vec![0.0; steps]
    }

    /// Innovation variance, if the model estimates one.
    fn residual_variance(&self) -> Option<f64> {
        None
    }
}

/// Feature-driven half of the ensemble.
pub trait RegressionModel: Send + Sync {
    fn predict(&self, rows: &[EngineeredRow]) -> Vec<f64>;

    /// One non-negative score per engineered feature.
    fn feature_importances(&self) -> Vec<f64>;
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FitError {
    #[error("need at least {required} observations, got {actual}")]
    TooShort { required: usize, actual: usize },
    #[error("{0}")]
    Numerical(String),
}

/// Builds the two sub-models of a [`ModelSet`].
pub trait ModelTrainer: Send + Sync {
    /// Shortest series the trainer accepts.
    fn min_observations(&self) -> usize;

    fn fit_seasonal(&self, temperatures: &[f64]) -> Result<Box<dyn SeasonalModel>, FitError>;

    fn fit_regression(
        &self,
        rows: &[EngineeredRow],
        targets: &[f64],
    ) -> Result<Box<dyn RegressionModel>, FitError>;
}

impl SeasonalModel for SarimaModel {
    fn forecast(&self, steps: usize) -> Vec<f64> {
        SarimaModel::forecast(self, steps)
    }

    fn interval_half_widths(&self, steps: usize, confidence_level: f64) -> Vec<f64> {
        SarimaModel::interval_half_widths(self, steps, confidence_level)
    }

    fn residual_variance(&self) -> Option<f64> {
        Some(self.sigma2())
    }
}

impl RegressionModel for RandomForestRegressor {
    fn predict(&self, rows: &[EngineeredRow]) -> Vec<f64> {
        RandomForestRegressor::predict(self, rows)
    }

    fn feature_importances(&self) -> Vec<f64> {
        RandomForestRegressor::feature_importances(self).to_vec()
    }
}

/// Seasonal ARIMA plus random forest, the production trainer.
#[derive(Debug, Clone, Default)]
pub struct EnsembleTrainer {
    pub order: SarimaOrder,
    pub forest: ForestParams,
}

impl ModelTrainer for EnsembleTrainer {
    fn min_observations(&self) -> usize {
        self.order.min_observations()
    }

    fn fit_seasonal(&self, temperatures: &[f64]) -> Result<Box<dyn SeasonalModel>, FitError> {
        let required = self.order.min_observations();
        if temperatures.len() < required {
            return Err(FitError::TooShort {
                required,
                actual: temperatures.len(),
            });
        }
        let model = SarimaModel::fit(temperatures, self.order).map_err(FitError::Numerical)?;
        Ok(Box::new(model))
    }

    fn fit_regression(
        &self,
        rows: &[EngineeredRow],
        targets: &[f64],
    ) -> Result<Box<dyn RegressionModel>, FitError> {
        let model =
            RandomForestRegressor::fit(rows, targets, &self.forest).map_err(FitError::Numerical)?;
        Ok(Box::new(model))
    }
}

/// Training metadata kept next to the models.
#[derive(Debug, Clone, PartialEq, serde::Serialize, utoipa::ToSchema)]
pub struct ModelSummary {
    pub observations: usize,
    pub first_year: i32,
    pub last_year: i32,
    pub seasonal_residual_variance: Option<f64>,
    /// In-sample fit of the regression model
    pub regression_fit: ErrorMetrics,
}

/// Trained models for one scope.
pub struct ModelSet {
    seasonal: Box<dyn SeasonalModel>,
    regression: Box<dyn RegressionModel>,
    importance: BTreeMap<String, f64>,
    summary: ModelSummary,
}

impl ModelSet {
    pub fn feature_importance(&self) -> &BTreeMap<String, f64> {
        &self.importance
    }

    pub fn summary(&self) -> &ModelSummary {
        &self.summary
    }
}

impl std::fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSet")
            .field("importance", &self.importance)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

/// Per-scope model table with train-then-swap semantics.
///
/// One engine belongs to one session or request; it is never shared.
pub struct ForecastEngine {
    trainer: Box<dyn ModelTrainer>,
    models: HashMap<Scope, ModelSet>,
    confidence_level: f64,
}

impl ForecastEngine {
    pub fn new() -> Self {
        Self::with_trainer(EnsembleTrainer::default())
    }

    pub fn with_trainer(trainer: impl ModelTrainer + 'static) -> Self {
        Self {
            trainer: Box::new(trainer),
            models: HashMap::new(),
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }

    /// Confidence level of the forecast bounds, clamped to [0.5, 0.999].
    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level.clamp(0.5, 0.999);
        self
    }

    /// Train both sub-models for `scope`, replacing any earlier model set.
    ///
    /// Returns `false` and keeps the earlier model set when training fails.
    pub fn train(&mut self, series: &ClimateSeries, scope: Scope) -> bool {
        match self.try_train(series, scope.clone()) {
            Ok(()) => true,
            Err(e) => {
                error!(scope = %scope, error = %e, "Error training model");
                false
            }
        }
    }

    #[instrument(skip(self, series), fields(scope = %scope, observations = series.len()))]
    pub fn try_train(&mut self, series: &ClimateSeries, scope: Scope) -> Result<(), ForecastError> {
        let model_set = self.fit_model_set(series, &scope)?;
        info!(
            observations = model_set.summary.observations,
            "Trained model set"
        );
        if self.models.insert(scope, model_set).is_some() {
            debug!("Replaced previous model set");
        }
        Ok(())
    }

    fn fit_model_set(&self, series: &ClimateSeries, scope: &Scope) -> Result<ModelSet, ForecastError> {
        let required = self.trainer.min_observations();
        if series.len() < required {
            return Err(ForecastError::InsufficientHistory {
                scope: scope.clone(),
                required,
                actual: series.len(),
            });
        }

        let fit_failure = |e: FitError| match e {
            FitError::TooShort { required, actual } => ForecastError::InsufficientHistory {
                scope: scope.clone(),
                required,
                actual,
            },
            FitError::Numerical(reason) => ForecastError::FitFailure {
                scope: scope.clone(),
                reason,
            },
        };

        let augmented = augment(series).ok_or_else(|| ForecastError::FitFailure {
            scope: scope.clone(),
            reason: "engineered features could not be completed".to_string(),
        })?;

        let seasonal = self
            .trainer
            .fit_seasonal(&augmented.temperatures)
            .map_err(fit_failure)?;
        let regression = self
            .trainer
            .fit_regression(&augmented.rows, &augmented.temperatures)
            .map_err(fit_failure)?;

        let scores = regression.feature_importances();
        if scores.len() != ENGINEERED_FEATURES.len() {
            return Err(ForecastError::FitFailure {
                scope: scope.clone(),
                reason: format!(
                    "regression model reported {} importances for {} features",
                    scores.len(),
                    ENGINEERED_FEATURES.len()
                ),
            });
        }
        let importance = ENGINEERED_FEATURES
            .iter()
            .map(|name| name.to_string())
            .zip(scores)
            .collect();

        let in_sample = regression.predict(&augmented.rows);
        let summary = ModelSummary {
            observations: series.len(),
            first_year: augmented.years[0],
            last_year: augmented.years[augmented.years.len() - 1],
            seasonal_residual_variance: seasonal.residual_variance(),
            regression_fit: ErrorMetrics::between(&augmented.temperatures, &in_sample),
        };

        Ok(ModelSet {
            seasonal,
            regression,
            importance,
            summary,
        })
    }

    /// Ensemble forecast for the `periods` years after the training data.
    #[instrument(skip(self), fields(scope = %scope))]
    pub fn predict(&self, periods: usize, scope: &Scope) -> Result<ForecastResult, ForecastError> {
        if periods == 0 {
            return Err(ForecastError::EmptyForecastInputs(periods));
        }
        let models = self
            .models
            .get(scope)
            .ok_or_else(|| ForecastError::NotTrained(scope.clone()))?;

        let seasonal = models.seasonal.forecast(periods);
        let years: Vec<i32> = (1..=periods as i32)
            .map(|i| models.summary.last_year + i)
            .collect();
        let regression = models.regression.predict(&future_rows(&years, &seasonal));

        if seasonal.len() != periods || regression.len() != periods {
            return Err(ForecastError::DegenerateForecast(scope.clone()));
        }
        if seasonal.iter().all(|v| v.is_nan()) || regression.iter().all(|v| v.is_nan()) {
            warn!("Model output is entirely NaN");
            return Err(ForecastError::DegenerateForecast(scope.clone()));
        }

        let half_widths = models
            .seasonal
            .interval_half_widths(periods, self.confidence_level);
        let location = scope.location_name().map(str::to_string);

        let rows = years
            .iter()
            .enumerate()
            .map(|(i, &year)| {
                let temperature = SEASONAL_WEIGHT * seasonal[i] + REGRESSION_WEIGHT * regression[i];
                let half_width = half_widths.get(i).copied().unwrap_or(0.0);
                ForecastRow {
                    year,
                    temperature,
                    seasonal_component: seasonal[i],
                    regression_component: regression[i],
                    lower_bound: temperature - half_width,
                    upper_bound: temperature + half_width,
                    location: location.clone(),
                }
            })
            .collect();

        debug!(periods, "Produced ensemble forecast");
        Ok(ForecastResult {
            scope: scope.clone(),
            rows,
        })
    }

    /// Forecasts for every trained location scope, ordered by location name.
    ///
    /// A location whose prediction fails is logged and left out; only a zero
    /// horizon fails the call.
    pub fn predict_all_locations(&self, periods: usize) -> Result<Vec<ForecastResult>, ForecastError> {
        if periods == 0 {
            return Err(ForecastError::EmptyForecastInputs(periods));
        }

        let mut scopes: Vec<&Scope> = self
            .models
            .keys()
            .filter(|s| matches!(s, Scope::Location(_)))
            .collect();
        scopes.sort();

        let forecasts: Vec<ForecastResult> = scopes
            .into_iter()
            .filter_map(|scope| match self.predict(periods, scope) {
                Ok(forecast) => Some(forecast),
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Leaving location out of forecast");
                    None
                }
            })
            .collect();

        Ok(forecasts)
    }

    pub fn feature_importance(&self, scope: &Scope) -> Option<BTreeMap<String, f64>> {
        self.models.get(scope).map(|m| m.importance.clone())
    }

    pub fn model_summary(&self, scope: &Scope) -> Option<&ModelSummary> {
        self.models.get(scope).map(|m| &m.summary)
    }

    pub fn is_trained(&self, scope: &Scope) -> bool {
        self.models.contains_key(scope)
    }

    pub fn trained_scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self.models.keys().cloned().collect();
        scopes.sort();
        scopes
    }
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::ClimateRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ConstantSeasonal(f64);

    impl SeasonalModel for ConstantSeasonal {
        fn forecast(&self, steps: usize) -> Vec<f64> {
            vec![self.0; steps]
        }
    }

    struct ConstantRegression {
        value: f64,
        importances: Vec<f64>,
    }

    impl RegressionModel for ConstantRegression {
        fn predict(&self, rows: &[EngineeredRow]) -> Vec<f64> {
            vec![self.value; rows.len()]
        }

        fn feature_importances(&self) -> Vec<f64> {
            self.importances.clone()
        }
    }

    /// Fixed-output trainer that counts sub-model fits.
    struct MockTrainer {
        seasonal: f64,
        regression: f64,
        fits: Arc<AtomicUsize>,
    }

    impl MockTrainer {
        fn new(seasonal: f64, regression: f64) -> Self {
            Self {
                seasonal,
                regression,
                fits: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ModelTrainer for MockTrainer {
        fn min_observations(&self) -> usize {
            5
        }

        fn fit_seasonal(&self, _temperatures: &[f64]) -> Result<Box<dyn SeasonalModel>, FitError> {
            self.fits.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ConstantSeasonal(self.seasonal)))
        }

        fn fit_regression(
            &self,
            _rows: &[EngineeredRow],
            _targets: &[f64],
        ) -> Result<Box<dyn RegressionModel>, FitError> {
            Ok(Box::new(ConstantRegression {
                value: self.regression,
                importances: vec![0.5, 0.1, 0.1, 0.1, 0.1, 0.1],
            }))
        }
    }

    fn series(n: usize) -> ClimateSeries {
        ClimateSeries::new(
            (0..n)
                .map(|i| ClimateRecord {
                    year: 1990 + i as i32,
                    temperature: 12.0 + 0.05 * i as f64,
                    precipitation: 1500.0,
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_blend_is_exact() {
        let mut engine = ForecastEngine::with_trainer(MockTrainer::new(10.0, 20.0));
        assert!(engine.train(&series(8), Scope::Base));

        let result = engine.predict(1, &Scope::Base).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert!((result.rows[0].temperature - 14.0).abs() < 1e-12);
        assert_eq!(result.rows[0].seasonal_component, 10.0);
        assert_eq!(result.rows[0].regression_component, 20.0);
        assert_eq!(result.rows[0].year, 1998);
        assert_eq!(result.rows[0].location, None);
    }

    #[test]
    fn test_zero_periods_rejected_before_models() {
        let mut engine = ForecastEngine::with_trainer(MockTrainer::new(10.0, 20.0));
        engine.train(&series(8), Scope::Base);
        assert_eq!(
            engine.predict(0, &Scope::Base),
            Err(ForecastError::EmptyForecastInputs(0))
        );

        // Checked even for untrained scopes
        let fresh = ForecastEngine::with_trainer(MockTrainer::new(1.0, 1.0));
        assert_eq!(
            fresh.predict(0, &Scope::Base),
            Err(ForecastError::EmptyForecastInputs(0))
        );
    }

    #[test]
    fn test_untrained_scope() {
        let engine = ForecastEngine::with_trainer(MockTrainer::new(10.0, 20.0));
        assert_eq!(
            engine.predict(3, &Scope::location("Pokhara")),
            Err(ForecastError::NotTrained(Scope::location("Pokhara")))
        );
        assert!(engine.feature_importance(&Scope::location("Pokhara")).is_none());
    }

    #[test]
    fn test_short_series_skips_fitting() {
        let trainer = MockTrainer::new(10.0, 20.0);
        let fits = trainer.fits.clone();
        let mut engine = ForecastEngine::with_trainer(trainer);

        assert!(!engine.train(&series(3), Scope::Base));
        assert_eq!(fits.load(Ordering::SeqCst), 0);
        assert!(!engine.is_trained(&Scope::Base));
    }

    #[test]
    fn test_location_rows_are_tagged() {
        let mut engine = ForecastEngine::with_trainer(MockTrainer::new(10.0, 20.0));
        engine.train(&series(8), Scope::location("Dharan"));
        engine.train(&series(8), Scope::location("Bharatpur"));
        engine.train(&series(8), Scope::Base);

        let all = engine.predict_all_locations(2).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].scope, Scope::location("Bharatpur"));
        assert_eq!(all[1].rows[1].location.as_deref(), Some("Dharan"));
    }

    #[test]
    fn test_wrong_importance_width_is_fit_failure() {
        struct NarrowTrainer;
        impl ModelTrainer for NarrowTrainer {
            fn min_observations(&self) -> usize {
                5
            }
            fn fit_seasonal(&self, _: &[f64]) -> Result<Box<dyn SeasonalModel>, FitError> {
                Ok(Box::new(ConstantSeasonal(1.0)))
            }
            fn fit_regression(
                &self,
                _: &[EngineeredRow],
                _: &[f64],
            ) -> Result<Box<dyn RegressionModel>, FitError> {
                Ok(Box::new(ConstantRegression {
                    value: 1.0,
                    importances: vec![1.0],
                }))
            }
        }

        let mut engine = ForecastEngine::with_trainer(NarrowTrainer);
        let result = engine.try_train(&series(8), Scope::Base);
        assert!(matches!(result, Err(ForecastError::FitFailure { .. })));
    }

    #[test]
    fn test_nan_output_is_degenerate() {
        let mut engine = ForecastEngine::with_trainer(MockTrainer::new(f64::NAN, 20.0));
        engine.train(&series(8), Scope::Base);
        assert_eq!(
            engine.predict(2, &Scope::Base),
            Err(ForecastError::DegenerateForecast(Scope::Base))
        );
    }

    #[test]
    fn test_failed_location_left_out_of_all_forecasts() {
        /// Produces NaN forecasts for series that start below freezing.
        struct ColdFailsTrainer;
        impl ModelTrainer for ColdFailsTrainer {
            fn min_observations(&self) -> usize {
                5
            }
            fn fit_seasonal(&self, temperatures: &[f64]) -> Result<Box<dyn SeasonalModel>, FitError> {
                let level = if temperatures[0] < 0.0 { f64::NAN } else { 10.0 };
                Ok(Box::new(ConstantSeasonal(level)))
            }
            fn fit_regression(
                &self,
                _rows: &[EngineeredRow],
                _targets: &[f64],
            ) -> Result<Box<dyn RegressionModel>, FitError> {
                Ok(Box::new(ConstantRegression {
                    value: 20.0,
                    importances: vec![0.5, 0.1, 0.1, 0.1, 0.1, 0.1],
                }))
            }
        }

        let cold = ClimateSeries::new(
            (0..8)
                .map(|i| ClimateRecord {
                    year: 1990 + i,
                    temperature: -5.0,
                    precipitation: 300.0,
                })
                .collect(),
        )
        .unwrap();

        let mut engine = ForecastEngine::with_trainer(ColdFailsTrainer);
        assert!(engine.train(&series(8), Scope::location("Biratnagar")));
        assert!(engine.train(&cold, Scope::location("Jomsom")));
        assert!(engine.train(&series(8), Scope::location("Pokhara")));
        assert_eq!(
            engine.predict(2, &Scope::location("Jomsom")),
            Err(ForecastError::DegenerateForecast(Scope::location("Jomsom")))
        );

        let all = engine.predict_all_locations(2).unwrap();
        let scopes: Vec<Scope> = all.iter().map(|f| f.scope.clone()).collect();
        assert_eq!(scopes, vec![Scope::location("Biratnagar"), Scope::location("Pokhara")]);

        assert_eq!(
            engine.predict_all_locations(0),
            Err(ForecastError::EmptyForecastInputs(0))
        );
    }
}
