//! Proportional-odds ordinal regression.
//!
//! For a station with ordered outcome levels `1..=m` and centered year
//! `x = year - reference_year`, the model is
//!
//! ```text
//! P(Y <= j | x) = sigmoid(theta_j - beta * x),   j = 1..m-1
//! ```
//!
//! with strictly increasing cutpoints `theta_j` and a single slope `beta`.
//! Parameters are estimated by maximum likelihood using Newton-Raphson with
//! the analytic gradient and Hessian, halving steps that would decrease the
//! likelihood or disorder the cutpoints.
//!
//! Small, perfectly separable samples push the cutpoints and slope towards
//! infinity. That is reported through the convergence status and the
//! `degenerate` flag; estimates are never clamped.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::filter::FilterOutcome;
use super::logit::{sigmoid, sigmoid_density, sigmoid_density_slope};
use crate::logging::{self, Stage};
use crate::model::{ClassGrade, SampleRecord};

/// Step halvings tried before giving up on an iteration.
const MAX_HALVINGS: usize = 40;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Convergence tolerance on the gradient and on the relative change in
    /// log-likelihood.
    pub tolerance: f64,
    /// |coefficient| above which a fit is flagged degenerate (logit scale).
    pub extreme_coefficient: f64,
    /// Standard error above which a fit is flagged degenerate.
    pub extreme_std_error: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_iterations: 100,
            tolerance: 1e-8,
            extreme_coefficient: 20.0,
            extreme_std_error: 100.0,
        }
    }
}

/// Outcome of the optimiser. Every status other than `Converged` means the
/// estimates should not be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergenceStatus {
    Converged,
    IterationLimit,
    SingularHessian,
    NonFiniteLikelihood,
    Stalled,
}

impl ConvergenceStatus {
    /// Numeric convergence code; zero means converged.
    pub fn code(self) -> i32 {
        match self {
            ConvergenceStatus::Converged => 0,
            ConvergenceStatus::IterationLimit => 1,
            ConvergenceStatus::SingularHessian => 2,
            ConvergenceStatus::NonFiniteLikelihood => 3,
            ConvergenceStatus::Stalled => 4,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ConvergenceStatus::Converged => "converged",
            ConvergenceStatus::IterationLimit => "iteration limit reached",
            ConvergenceStatus::SingularHessian => "singular information matrix",
            ConvergenceStatus::NonFiniteLikelihood => "non-finite log-likelihood",
            ConvergenceStatus::Stalled => "step halving failed to improve the likelihood",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FitError {
    #[error("station has fewer than two observed grades ({0})")]
    TooFewLevels(usize),

    #[error("station has fewer than two observations ({0})")]
    TooFewObservations(usize),

    #[error("log-likelihood is non-finite at starting values")]
    NonFiniteStart,
}

/// A fitted proportional-odds model for one station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedModel {
    pub station_id: String,
    /// Outcome levels, ascending. Grades never observed at the station are
    /// not part of the model.
    pub levels: Vec<ClassGrade>,
    /// `levels.len() - 1` strictly increasing logit-scale thresholds.
    pub cutpoints: Vec<f64>,
    /// Change in log cumulative odds per year; positive means improving.
    pub slope: f64,
    pub reference_year: i32,
    /// NaN where the information matrix could not be inverted.
    pub cutpoint_std_errors: Vec<f64>,
    pub slope_std_error: f64,
    pub log_likelihood: f64,
    pub iterations: usize,
    pub n_obs: usize,
    pub status: ConvergenceStatus,
    /// Extreme coefficients or standard errors, typical of separable data.
    pub degenerate: bool,
}

impl FittedModel {
    pub fn convergence_code(&self) -> i32 {
        self.status.code()
    }

    /// True when the optimiser converged and the fit is not degenerate.
    pub fn is_reliable(&self) -> bool {
        self.status == ConvergenceStatus::Converged && !self.degenerate
    }

    /// Multiplicative change in the odds of a better grade per year.
    pub fn odds_ratio_per_year(&self) -> f64 {
        self.slope.exp()
    }

    pub fn centered(&self, year: f64) -> f64 {
        year - f64::from(self.reference_year)
    }

    /// `P(Y <= level_j)` for each cutpoint at calendar `year`.
    pub fn cumulative_probabilities(&self, year: f64) -> Vec<f64> {
        let x = self.centered(year);
        self.cutpoints
            .iter()
            .map(|theta| sigmoid(theta - self.slope * x))
            .collect()
    }

    /// Probability of each entry of `levels` at calendar `year`.
    pub fn level_probabilities(&self, year: f64) -> Vec<f64> {
        let cumulative = self.cumulative_probabilities(year);
        let mut probs = Vec::with_capacity(self.levels.len());
        let mut previous = 0.0;
        for c in &cumulative {
            probs.push((c - previous).max(0.0));
            previous = *c;
        }
        probs.push((1.0 - previous).max(0.0));
        probs
    }
}

/// Fit result for one station; failures do not stop the other stations.
#[derive(Debug, Clone, PartialEq)]
pub struct StationFit {
    pub station_id: String,
    pub result: Result<FittedModel, FitError>,
}

// ---------------------------------------------------------------------------
// Likelihood
// ---------------------------------------------------------------------------

/// Design of one station's data: centered years and zero-based level
/// indices.
struct Design {
    xs: Vec<f64>,
    cats: Vec<usize>,
    levels: usize,
}

impl Design {
    fn n_params(&self) -> usize {
        self.levels
    }

    fn slope_index(&self) -> usize {
        self.levels - 1
    }

    /// Linear predictors bounding category `cat` at `x`. `None` stands for
    /// -inf (lower) or +inf (upper).
    fn bounds(&self, params: &[f64], cat: usize, x: f64) -> (Option<f64>, Option<f64>) {
        let beta = params[self.slope_index()];
        let lower = (cat > 0).then(|| params[cat - 1] - beta * x);
        let upper = (cat < self.levels - 1).then(|| params[cat] - beta * x);
        (lower, upper)
    }

    /// Probability of category `cat` at `x`.
    fn category_probability(&self, params: &[f64], cat: usize, x: f64) -> f64 {
        match self.bounds(params, cat, x) {
            (None, Some(u)) => sigmoid(u),
            (Some(l), None) => sigmoid(-l),
            // sigmoid(u) - sigmoid(l), rearranged to avoid cancellation
            (Some(l), Some(u)) => sigmoid(u) * sigmoid(-l) * -(l - u).exp_m1(),
            (None, None) => 1.0,
        }
    }

    fn log_likelihood(&self, params: &[f64]) -> Option<f64> {
        let mut ll = 0.0;
        for (&x, &cat) in self.xs.iter().zip(&self.cats) {
            let p = self.category_probability(params, cat, x);
            if !(p > 0.0) {
                return None;
            }
            ll += p.ln();
        }
        ll.is_finite().then_some(ll)
    }

    /// Log-likelihood, gradient and Hessian at `params`.
    fn derivatives(&self, params: &[f64]) -> Option<(f64, DVector<f64>, DMatrix<f64>)> {
        let k = self.n_params();
        let b = self.slope_index();
        let mut ll = 0.0;
        let mut grad = DVector::zeros(k);
        let mut hess = DMatrix::zeros(k, k);

        for (&x, &cat) in self.xs.iter().zip(&self.cats) {
            let p = self.category_probability(params, cat, x);
            if !(p > 0.0) {
                return None;
            }
            ll += p.ln();

            let (lower, upper) = self.bounds(params, cat, x);
            let (fu, du) = upper.map_or((0.0, 0.0), |u| (sigmoid_density(u), sigmoid_density_slope(u)));
            let (fl, dl) = lower.map_or((0.0, 0.0), |l| (sigmoid_density(l), sigmoid_density_slope(l)));

            // first derivatives of p
            let mut dp = DVector::zeros(k);
            if upper.is_some() {
                dp[cat] = fu;
            }
            if lower.is_some() {
                dp[cat - 1] = -fl;
            }
            dp[b] = -x * (fu - fl);

            // second derivatives of p
            let mut d2p = DMatrix::zeros(k, k);
            if upper.is_some() {
                d2p[(cat, cat)] = du;
                d2p[(cat, b)] = -x * du;
                d2p[(b, cat)] = -x * du;
            }
            if lower.is_some() {
                d2p[(cat - 1, cat - 1)] = -dl;
                d2p[(cat - 1, b)] = x * dl;
                d2p[(b, cat - 1)] = x * dl;
            }
            d2p[(b, b)] = x * x * (du - dl);

            grad += &dp / p;
            hess += d2p / p - (&dp * dp.transpose()) / (p * p);
        }

        (ll.is_finite() && grad.iter().all(|g| g.is_finite()) && hess.iter().all(|h| h.is_finite()))
            .then_some((ll, grad, hess))
    }
}

fn cutpoints_ordered(params: &[f64], levels: usize) -> bool {
    params[..levels - 1].windows(2).all(|w| w[0] < w[1])
}

fn max_abs(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()))
}

// ---------------------------------------------------------------------------
// Fitting
// ---------------------------------------------------------------------------

/// Fits the proportional-odds model to one station's graded records.
///
/// Records without a grade are ignored. The outcome levels are the distinct
/// grades present, in ascending order.
pub fn fit_station(
    station_id: &str,
    records: &[SampleRecord],
    reference_year: i32,
    options: &FitOptions,
) -> Result<FittedModel, FitError> {
    let graded: Vec<(f64, ClassGrade)> = records
        .iter()
        .filter_map(|r| r.grade.map(|g| (f64::from(r.year - reference_year), g)))
        .collect();

    if graded.len() < 2 {
        return Err(FitError::TooFewObservations(graded.len()));
    }

    let mut levels: Vec<ClassGrade> = graded.iter().map(|(_, g)| *g).collect();
    levels.sort();
    levels.dedup();
    if levels.len() < 2 {
        return Err(FitError::TooFewLevels(levels.len()));
    }

    let design = Design {
        xs: graded.iter().map(|(x, _)| *x).collect(),
        cats: graded
            .iter()
            .map(|(_, g)| levels.iter().position(|l| l == g).unwrap_or_default())
            .collect(),
        levels: levels.len(),
    };

    // Start from the empirical cumulative logits with no trend.
    let n = graded.len() as f64;
    let mut params: Vec<f64> = (0..design.levels - 1)
        .map(|j| {
            let at_or_below = design.cats.iter().filter(|&&c| c <= j).count() as f64;
            super::logit::logit(at_or_below / n)
        })
        .collect();
    params.push(0.0);

    let Some((mut ll, mut grad, mut hess)) = design.derivatives(&params) else {
        return Err(FitError::NonFiniteStart);
    };

    let mut status = ConvergenceStatus::IterationLimit;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        if max_abs(&grad) < options.tolerance {
            status = ConvergenceStatus::Converged;
            break;
        }
        iterations += 1;

        let information = -hess.clone();
        let Some(step) = information.lu().solve(&grad) else {
            status = ConvergenceStatus::SingularHessian;
            break;
        };
        if step.iter().any(|s| !s.is_finite()) {
            status = ConvergenceStatus::SingularHessian;
            break;
        }

        let mut scale = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_HALVINGS {
            let candidate: Vec<f64> = params
                .iter()
                .zip(step.iter())
                .map(|(p, s)| p + scale * s)
                .collect();
            if cutpoints_ordered(&candidate, design.levels) {
                if let Some(candidate_ll) = design.log_likelihood(&candidate) {
                    if candidate_ll >= ll - 1e-12 * ll.abs() {
                        accepted = Some((candidate, candidate_ll));
                        break;
                    }
                }
            }
            scale *= 0.5;
        }

        let Some((candidate, candidate_ll)) = accepted else {
            status = if max_abs(&grad) < options.tolerance.sqrt() {
                ConvergenceStatus::Converged
            } else {
                ConvergenceStatus::Stalled
            };
            break;
        };

        let Some((new_ll, new_grad, new_hess)) = design.derivatives(&candidate) else {
            status = ConvergenceStatus::NonFiniteLikelihood;
            break;
        };
        let relative_change = (candidate_ll - ll).abs() / (ll.abs() + 0.1);
        params = candidate;
        ll = new_ll;
        grad = new_grad;
        hess = new_hess;

        if relative_change < options.tolerance && max_abs(&grad) < options.tolerance.sqrt() {
            status = ConvergenceStatus::Converged;
            break;
        }
    }
    if status == ConvergenceStatus::IterationLimit && max_abs(&grad) < options.tolerance {
        status = ConvergenceStatus::Converged;
    }

    let k = design.n_params();
    let b = design.slope_index();
    let covariance = (-hess).try_inverse();
    let std_errors: Vec<f64> = match &covariance {
        Some(cov) => (0..k).map(|i| std_error(cov[(i, i)])).collect(),
        None => vec![f64::NAN; k],
    };
    if status == ConvergenceStatus::Converged && std_errors.iter().any(|se| se.is_nan()) {
        status = ConvergenceStatus::SingularHessian;
    }

    let slope = params[b];
    let cutpoints = params[..design.levels - 1].to_vec();

    // Cutpoints and their errors are judged at the mean sample year so the
    // verdict does not depend on the reference year.
    let x_bar = design.xs.iter().sum::<f64>() / design.xs.len() as f64;
    let centered_std_errors: Vec<f64> = match &covariance {
        Some(cov) => (0..b)
            .map(|j| std_error(cov[(j, j)] + x_bar * x_bar * cov[(b, b)] - 2.0 * x_bar * cov[(j, b)]))
            .collect(),
        None => vec![f64::NAN; b],
    };
    let degenerate = status == ConvergenceStatus::SingularHessian
        || slope.abs() > options.extreme_coefficient
        || cutpoints
            .iter()
            .any(|theta| (theta - slope * x_bar).abs() > options.extreme_coefficient)
        || centered_std_errors
            .iter()
            .chain(std::iter::once(&std_errors[b]))
            .any(|se| se.is_nan() || *se > options.extreme_std_error);

    Ok(FittedModel {
        station_id: station_id.to_string(),
        levels,
        cutpoints,
        slope,
        reference_year,
        cutpoint_std_errors: std_errors[..design.levels - 1].to_vec(),
        slope_std_error: std_errors[design.slope_index()],
        log_likelihood: ll,
        iterations,
        n_obs: graded.len(),
        status,
        degenerate,
    })
}

/// Square root of a variance; NaN when the variance is not positive.
fn std_error(variance: f64) -> f64 {
    if variance > 0.0 { variance.sqrt() } else { f64::NAN }
}

/// Fits every retained station of a filter outcome, in station order.
pub fn fit_all(outcome: &FilterOutcome, reference_year: i32, options: &FitOptions) -> Vec<StationFit> {
    let mut fits = Vec::with_capacity(outcome.retained.len());
    let (mut converged, mut unreliable, mut failed) = (0, 0, 0);

    for station_id in &outcome.retained {
        let records = outcome.records.get(station_id).map(Vec::as_slice).unwrap_or_default();
        let result = fit_station(station_id, records, reference_year, options);

        match &result {
            Ok(model) if model.is_reliable() => {
                converged += 1;
                logging::debug(
                    Stage::Fit,
                    Some(station_id),
                    &format!(
                        "converged in {} iteration(s): slope {:.4} (SE {:.4})",
                        model.iterations, model.slope, model.slope_std_error
                    ),
                );
            }
            Ok(model) => {
                unreliable += 1;
                logging::warn(
                    Stage::Fit,
                    Some(station_id),
                    &format!(
                        "convergence code {} ({}){}",
                        model.convergence_code(),
                        model.status.describe(),
                        if model.degenerate { ", degenerate estimates" } else { "" }
                    ),
                );
            }
            Err(e) => {
                failed += 1;
                logging::log_fit_failure(station_id, e);
            }
        }

        fits.push(StationFit {
            station_id: station_id.clone(),
            result,
        });
    }

    logging::log_fit_summary(fits.len(), converged, unreliable, failed);
    fits
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
