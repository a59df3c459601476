use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Dyn, OMatrix, OVector, Owned};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, warn};

/// Seasonal ARIMA order `(p, d, q) x (P, D, Q, s)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SarimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub period: usize,
}

impl Default for SarimaOrder {
    /// SARIMA(2,1,2)(1,1,1,12)
    fn default() -> Self {
        Self {
            p: 2,
            d: 1,
            q: 2,
            seasonal_p: 1,
            seasonal_d: 1,
            seasonal_q: 1,
            period: 12,
        }
    }
}

impl SarimaOrder {
    pub fn n_params(&self) -> usize {
        self.p + self.q + self.seasonal_p + self.seasonal_q
    }

    /// Observations lost to regular and seasonal differencing.
    pub fn differencing_lag(&self) -> usize {
        self.d + self.period * self.seasonal_d
    }

    /// Shortest series that leaves more residuals than parameters.
    pub fn min_observations(&self) -> usize {
        self.differencing_lag() + self.n_params() + 1
    }

    /// `(1 - L)^d (1 - L^s)^D` as lag-polynomial coefficients.
    fn differencing_polynomial(&self) -> Vec<f64> {
        let mut poly = vec![1.0];
        for _ in 0..self.d {
            poly = poly_mul(&poly, &[1.0, -1.0]);
        }
        let mut seasonal = vec![0.0; self.period + 1];
        seasonal[0] = 1.0;
        seasonal[self.period] = -1.0;
        for _ in 0..self.seasonal_d {
            poly = poly_mul(&poly, &seasonal);
        }
        poly
    }
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Map unconstrained values to the coefficients of a stationary AR polynomial.
///
/// Each value becomes a partial autocorrelation in (-1, 1) via `tanh`, and the
/// Durbin-Levinson recursion turns those into AR coefficients.
fn constrain_stationary(unconstrained: &[f64]) -> Vec<f64> {
    let mut phi: Vec<f64> = Vec::with_capacity(unconstrained.len());
    for (k, u) in unconstrained.iter().enumerate() {
        let r = u.tanh();
        let mut next = vec![0.0; k + 1];
        next[k] = r;
        for j in 0..k {
            next[j] = phi[j] - r * phi[k - 1 - j];
        }
        phi = next;
    }
    phi
}

/// `1 - sum(coef_i L^(i*step))`
fn ar_polynomial(coefs: &[f64], step: usize) -> Vec<f64> {
    let mut poly = vec![0.0; coefs.len() * step + 1];
    poly[0] = 1.0;
    for (i, c) in coefs.iter().enumerate() {
        poly[(i + 1) * step] = -c;
    }
    poly
}

/// `1 + sum(coef_i L^(i*step))`
fn ma_polynomial(coefs: &[f64], step: usize) -> Vec<f64> {
    let mut poly = vec![0.0; coefs.len() * step + 1];
    poly[0] = 1.0;
    for (i, c) in coefs.iter().enumerate() {
        poly[(i + 1) * step] = *c;
    }
    poly
}

#[derive(Debug, Clone, PartialEq)]
struct Coefficients {
    ar: Vec<f64>,
    ma: Vec<f64>,
    seasonal_ar: Vec<f64>,
    seasonal_ma: Vec<f64>,
    /// Combined AR polynomial of the differenced series
    ar_poly: Vec<f64>,
    /// Combined MA polynomial
    ma_poly: Vec<f64>,
}

impl Coefficients {
    fn from_unconstrained(order: &SarimaOrder, params: &[f64]) -> Self {
        let (ar_u, rest) = params.split_at(order.p);
        let (ma_u, rest) = rest.split_at(order.q);
        let (sar_u, sma_u) = rest.split_at(order.seasonal_p);

        let ar = constrain_stationary(ar_u);
        // Invertibility of 1 + theta(L) is stationarity of 1 - (-theta)(L).
        let ma: Vec<f64> = constrain_stationary(ma_u).iter().map(|c| -c).collect();
        let seasonal_ar = constrain_stationary(sar_u);
        let seasonal_ma: Vec<f64> = constrain_stationary(sma_u).iter().map(|c| -c).collect();

        let ar_poly = poly_mul(&ar_polynomial(&ar, 1), &ar_polynomial(&seasonal_ar, order.period));
        let ma_poly = poly_mul(&ma_polynomial(&ma, 1), &ma_polynomial(&seasonal_ma, order.period));

        Self {
            ar,
            ma,
            seasonal_ar,
            seasonal_ma,
            ar_poly,
            ma_poly,
        }
    }

    /// One-step innovations of the differenced series, pre-sample values taken as zero.
    fn residuals(&self, w: &[f64]) -> Vec<f64> {
        let mut e = vec![0.0; w.len()];
        for t in 0..w.len() {
            let mut value = w[t];
            for (k, a) in self.ar_poly.iter().enumerate().skip(1) {
                if k <= t {
                    value += a * w[t - k];
                }
            }
            for (k, m) in self.ma_poly.iter().enumerate().skip(1) {
                if k <= t {
                    value -= m * e[t - k];
                }
            }
            e[t] = value;
        }
        e
    }
}

/// Conditional-sum-of-squares objective over unconstrained parameters.
struct CssProblem<'a> {
    order: SarimaOrder,
    params: DVector<f64>,
    differenced: &'a [f64],
}

impl CssProblem<'_> {
    fn residuals_at(&self, params: &[f64]) -> Vec<f64> {
        Coefficients::from_unconstrained(&self.order, params).residuals(self.differenced)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CssProblem<'_> {
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;

    fn set_params(&mut self, p: &DVector<f64>) {
        self.params.copy_from(p);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<OVector<f64, Dyn>> {
        let e = self.residuals_at(self.params.as_slice());
        if e.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(DVector::from_vec(e))
    }

    /// Forward-difference Jacobian of the residuals.
    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, Dyn>> {
        let base = self.residuals_at(self.params.as_slice());
        let n = base.len();
        let k = self.params.len();
        let mut jac = DMatrix::<f64>::zeros(n, k);

        let mut shifted: Vec<f64> = self.params.iter().copied().collect();
        for j in 0..k {
            let h = 1e-6 * (1.0 + shifted[j].abs());
            let original = shifted[j];
            shifted[j] = original + h;
            let bumped = self.residuals_at(&shifted);
            shifted[j] = original;
            for i in 0..n {
                jac[(i, j)] = (bumped[i] - base[i]) / h;
            }
        }

        if jac.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(jac)
    }
}

/// Fitted seasonal ARIMA model for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SarimaModel {
    order: SarimaOrder,
    coefficients: Coefficients,
    differencing: Vec<f64>,
    history: Vec<f64>,
    differenced: Vec<f64>,
    residuals: Vec<f64>,
    sigma2: f64,
    degrees_of_freedom: f64,
}

impl SarimaModel {
    /// Fit by conditional sum of squares with Levenberg-Marquardt.
    ///
    /// Coefficients are reparameterized so the fitted AR parts are stationary
    /// and the MA parts invertible. A solver that stops early still yields a
    /// model as long as the objective is finite.
    pub fn fit(values: &[f64], order: SarimaOrder) -> Result<Self, String> {
        let required = order.min_observations();
        if values.len() < required {
            return Err(format!(
                "Need at least {} observations for the seasonal model, got {}",
                required,
                values.len()
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err("Seasonal model input contains non-finite values".to_string());
        }

        let differencing = order.differencing_polynomial();
        let lag = differencing.len() - 1;
        let differenced: Vec<f64> = (lag..values.len())
            .map(|t| {
                differencing
                    .iter()
                    .enumerate()
                    .map(|(k, c)| c * values[t - k])
                    .sum()
            })
            .collect();

        let problem = CssProblem {
            order,
            params: DVector::zeros(order.n_params()),
            differenced: &differenced,
        };
        let (fitted, report) = LevenbergMarquardt::new().minimize(problem);

        if !report.objective_function.is_finite() {
            return Err(format!(
                "Seasonal model fit diverged ({:?})",
                report.termination
            ));
        }
        if !report.termination.was_successful() {
            warn!(
                "Seasonal model solver stopped early ({:?}), keeping best parameters",
                report.termination
            );
        }

        let coefficients = Coefficients::from_unconstrained(&order, fitted.params.as_slice());
        let residuals = coefficients.residuals(&differenced);
        let css: f64 = residuals.iter().map(|e| e * e).sum();
        let degrees_of_freedom = (differenced.len() - order.n_params()) as f64;
        let sigma2 = css / degrees_of_freedom;

        if !sigma2.is_finite() {
            return Err("Seasonal model residual variance is not finite".to_string());
        }

        debug!(
            ar = ?coefficients.ar,
            ma = ?coefficients.ma,
            seasonal_ar = ?coefficients.seasonal_ar,
            seasonal_ma = ?coefficients.seasonal_ma,
            sigma2,
            evaluations = report.number_of_evaluations,
            "Seasonal model fitted"
        );

        Ok(Self {
            order,
            coefficients,
            differencing,
            history: values.to_vec(),
            differenced,
            residuals,
            sigma2,
            degrees_of_freedom,
        })
    }

    pub fn order(&self) -> SarimaOrder {
        self.order
    }

    pub fn ar_coefficients(&self) -> &[f64] {
        &self.coefficients.ar
    }

    pub fn ma_coefficients(&self) -> &[f64] {
        &self.coefficients.ma
    }

    pub fn seasonal_ar_coefficients(&self) -> &[f64] {
        &self.coefficients.seasonal_ar
    }

    pub fn seasonal_ma_coefficients(&self) -> &[f64] {
        &self.coefficients.seasonal_ma
    }

    /// Innovation variance estimate.
    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    /// Root mean square of the in-sample innovations.
    pub fn residual_rmse(&self) -> f64 {
        let n = self.residuals.len() as f64;
        (self.residuals.iter().map(|e| e * e).sum::<f64>() / n).sqrt()
    }

    /// Point forecasts for the `steps` periods after the last observation.
    pub fn forecast(&self, steps: usize) -> Vec<f64> {
        let ar_poly = &self.coefficients.ar_poly;
        let ma_poly = &self.coefficients.ma_poly;

        let mut w = self.differenced.clone();
        let mut e = self.residuals.clone();
        let mut y = self.history.clone();
        let mut out = Vec::with_capacity(steps);

        for _ in 0..steps {
            let t = w.len();
            let mut w_hat = 0.0;
            for (k, a) in ar_poly.iter().enumerate().skip(1) {
                if k <= t {
                    w_hat -= a * w[t - k];
                }
            }
            for (k, m) in ma_poly.iter().enumerate().skip(1) {
                if k <= t {
                    w_hat += m * e[t - k];
                }
            }
            w.push(w_hat);
            e.push(0.0);

            // Undo differencing: y_t = w_t - sum_{k>=1} diff_k * y_{t-k}
            let ty = y.len();
            let mut y_hat = w_hat;
            for (k, c) in self.differencing.iter().enumerate().skip(1) {
                y_hat -= c * y[ty - k];
            }
            y.push(y_hat);
            out.push(y_hat);
        }
        out
    }

    /// Forecast standard errors from the psi-weights of the integrated model.
    pub fn forecast_std_errors(&self, steps: usize) -> Vec<f64> {
        let total_ar = poly_mul(&self.coefficients.ar_poly, &self.differencing);
        let ma_poly = &self.coefficients.ma_poly;

        let mut psi = Vec::with_capacity(steps);
        for j in 0..steps {
            let mut value = if j == 0 {
                1.0
            } else {
                ma_poly.get(j).copied().unwrap_or(0.0)
            };
            for k in 1..=j {
                if let Some(a) = total_ar.get(k) {
                    value -= a * psi[j - k];
                }
            }
            psi.push(value);
        }

        let mut cumulative = 0.0;
        psi.iter()
            .map(|p| {
                cumulative += p * p;
                (self.sigma2 * cumulative).sqrt()
            })
            .collect()
    }

    /// Half-widths of two-sided Student-t prediction intervals.
    pub fn interval_half_widths(&self, steps: usize, confidence_level: f64) -> Vec<f64> {
        let t_value = StudentsT::new(0.0, 1.0, self.degrees_of_freedom)
            .map(|dist| dist.inverse_cdf(1.0 - (1.0 - confidence_level) / 2.0))
            .unwrap_or(f64::NAN);
        self.forecast_std_errors(steps)
            .into_iter()
            .map(|se| t_value * se)
            .collect()
    }
}
