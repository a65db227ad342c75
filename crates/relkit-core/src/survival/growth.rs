//! Reliability growth: power-law (Crow-AMSAA / Duane) and loglinear
//! (Cox-Lewis) models over grouped test data.
//!
//! Each index `k` is fitted on the prefix of observations `1..=k`, so the
//! output traces how the estimates evolve as testing accumulates.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::errors::{RelkitError, RelkitResult};
use crate::guards::{safe_div, safe_recip};
use crate::models::{Bounded, FitMethod};
use crate::stats::{chi2_ppf, invert_2x2, least_squares, student_t_ppf, tail_probability};

const BISECT_ITER: usize = 200;

/// Cramér-von Mises critical values for the Crow-AMSAA fit, by number of
/// failures, at significance levels [`CVM_SIGNIFICANCE`].
const CVM_TABLE: [(u32, [f64; 5]); 22] = [
    (2, [0.138, 0.149, 0.162, 0.175, 0.186]),
    (3, [0.121, 0.135, 0.154, 0.184, 0.23]),
    (4, [0.121, 0.134, 0.155, 0.191, 0.28]),
    (5, [0.121, 0.137, 0.160, 0.199, 0.30]),
    (6, [0.123, 0.139, 0.162, 0.204, 0.31]),
    (7, [0.124, 0.140, 0.165, 0.208, 0.32]),
    (8, [0.124, 0.141, 0.165, 0.210, 0.32]),
    (9, [0.125, 0.142, 0.167, 0.212, 0.32]),
    (10, [0.125, 0.142, 0.167, 0.212, 0.32]),
    (11, [0.126, 0.143, 0.169, 0.214, 0.32]),
    (12, [0.126, 0.144, 0.169, 0.214, 0.32]),
    (13, [0.126, 0.144, 0.169, 0.214, 0.33]),
    (14, [0.126, 0.144, 0.169, 0.214, 0.33]),
    (15, [0.126, 0.144, 0.169, 0.215, 0.33]),
    (16, [0.127, 0.145, 0.171, 0.216, 0.33]),
    (17, [0.127, 0.145, 0.171, 0.217, 0.33]),
    (18, [0.127, 0.146, 0.171, 0.217, 0.33]),
    (19, [0.127, 0.146, 0.171, 0.217, 0.33]),
    (20, [0.128, 0.146, 0.172, 0.217, 0.33]),
    (30, [0.128, 0.146, 0.172, 0.218, 0.33]),
    (60, [0.128, 0.147, 0.173, 0.220, 0.33]),
    (100, [0.129, 0.147, 0.173, 0.220, 0.34]),
];

/// Significance levels (1 − confidence) of the [`CVM_TABLE`] columns.
const CVM_SIGNIFICANCE: [f64; 5] = [0.20, 0.15, 0.10, 0.05, 0.01];

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrowthObservation {
    pub failures: u32,
    pub cumulative_time: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthModel {
    #[default]
    PowerLaw,
    Loglinear,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthPoint {
    /// 1-based observation index.
    pub index: usize,
    pub cumulative_time: f64,
    pub cumulative_failures: u32,
    /// Duane α for the power law, γ₁ for the loglinear model.
    pub shape: Bounded,
    /// Duane b for the power law, γ₀ for the loglinear model.
    pub scale: Bounded,
    pub cumulative_mtbf: Bounded,
    pub instantaneous_mtbf: Bounded,
    pub cumulative_intensity: Bounded,
    pub instantaneous_intensity: Bounded,
}

impl GrowthPoint {
    fn degenerate(index: usize, cumulative_time: f64, cumulative_failures: u32) -> Self {
        Self { index, cumulative_time, cumulative_failures, ..Self::default() }
    }

    /// Fill the intensities as reciprocals of the MTBF bounds.
    fn with_intensities(mut self) -> Self {
        let recip = |b: Bounded| Bounded::new(safe_recip(b.upper), safe_recip(b.point), safe_recip(b.lower));
        self.cumulative_intensity = recip(self.cumulative_mtbf);
        self.instantaneous_intensity = recip(self.instantaneous_mtbf);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthCurve {
    pub model: GrowthModel,
    pub method: FitMethod,
    pub points: Vec<GrowthPoint>,
}

fn validate(observations: &[GrowthObservation]) -> RelkitResult<()> {
    if observations.is_empty() {
        return Err(RelkitError::MissingData("growth analysis needs observations".into()));
    }
    let mut previous = 0.0;
    for (i, obs) in observations.iter().enumerate() {
        if !obs.cumulative_time.is_finite() || obs.cumulative_time <= previous {
            return Err(RelkitError::OutOfRange(format!(
                "observation {}: cumulative time {} must exceed {previous}",
                i + 1,
                obs.cumulative_time
            )));
        }
        previous = obs.cumulative_time;
    }
    Ok(())
}

/// Bounds `exp(ln v ± z·se_ln)` for a positive quantity.
fn log_bounds(value: f64, se_ln: f64, z: f64) -> Bounded {
    if value <= 0.0 {
        return Bounded::exact(value);
    }
    let factor = (z * se_ln).exp();
    Bounded::new(value / factor, value, value * factor)
}

/// Variance of `g` given a gradient and the `(v00, v01, v11)` covariance.
fn delta_variance(gradient: [f64; 2], cov: (f64, f64, f64)) -> f64 {
    let (v00, v01, v11) = cov;
    (gradient[0] * gradient[0] * v00
        + 2.0 * gradient[0] * gradient[1] * v01
        + gradient[1] * gradient[1] * v11)
        .max(0.0)
}

// ---------------------------------------------------------------------------
// Power law
// ---------------------------------------------------------------------------

pub fn power_law(
    observations: &[GrowthObservation],
    method: FitMethod,
    config: &AnalysisConfig,
) -> RelkitResult<GrowthCurve> {
    validate(observations)?;
    let points = (1..=observations.len())
        .map(|k| match method {
            FitMethod::Mle => power_law_mle(&observations[..k], config.z()),
            FitMethod::RankRegression => power_law_regression(&observations[..k], config),
        })
        .collect();
    Ok(GrowthCurve { model: GrowthModel::PowerLaw, method, points })
}

fn power_law_mle(prefix: &[GrowthObservation], z: f64) -> GrowthPoint {
    let k = prefix.len();
    let t = prefix[k - 1].cumulative_time;
    let total: u32 = prefix.iter().map(|o| o.failures).sum();
    let n = total as f64;
    let ln_t = t.ln();
    let weighted_ln: f64 = prefix.iter().map(|o| o.failures as f64 * o.cumulative_time.ln()).sum();
    let denominator = n * ln_t - weighted_ln;
    if total == 0 || denominator <= 0.0 {
        debug!("power-law MLE degenerate at index {k}");
        return GrowthPoint::degenerate(k, t, total);
    }

    let beta = n / denominator;
    let t_beta = t.powf(beta);
    let lambda = n / t_beta;

    let info_ll = n / (lambda * lambda);
    let info_lb = t_beta * ln_t;
    let info_bb = n / (beta * beta) + lambda * t_beta * ln_t * ln_t;
    let cov = invert_2x2(info_ll, info_lb, info_bb).unwrap_or((0.0, 0.0, 0.0));
    let se_lambda = cov.0.max(0.0).sqrt();
    let se_beta = cov.2.max(0.0).sqrt();

    let shape = Bounded::additive(1.0 - beta, se_beta, z);
    let scale = Bounded::multiplicative(1.0 / lambda, se_lambda / (lambda * lambda), z);

    // Expected failures m = λT^β and intensity ρ = λβT^(β-1).
    let var_m = delta_variance([t_beta, lambda * t_beta * ln_t], cov);
    let cumulative_intensity = n / t;
    let ci = log_bounds(cumulative_intensity, safe_div(var_m.sqrt(), n), z);

    let rho = lambda * beta * t_beta / t;
    let var_rho = delta_variance(
        [beta * t_beta / t, lambda * t_beta / t * (1.0 + beta * ln_t)],
        cov,
    );
    let ii = log_bounds(rho, safe_div(var_rho.sqrt(), rho), z);

    GrowthPoint {
        index: k,
        cumulative_time: t,
        cumulative_failures: total,
        shape,
        scale,
        cumulative_mtbf: Bounded::new(safe_recip(ci.upper), t / n, safe_recip(ci.lower)),
        instantaneous_mtbf: Bounded::new(safe_recip(ii.upper), safe_recip(rho), safe_recip(ii.lower)),
        cumulative_intensity: ci,
        instantaneous_intensity: ii,
    }
}

/// Duane regression of `ln(T/N)` on `ln T`.
fn power_law_regression(prefix: &[GrowthObservation], config: &AnalysisConfig) -> GrowthPoint {
    let k = prefix.len();
    let t = prefix[k - 1].cumulative_time;
    let mut cumulative = 0u32;
    let points: Vec<(f64, f64)> = prefix
        .iter()
        .filter_map(|o| {
            cumulative += o.failures;
            (cumulative > 0).then(|| (o.cumulative_time.ln(), (o.cumulative_time / cumulative as f64).ln()))
        })
        .collect();
    let total = cumulative;
    if points.is_empty() {
        return GrowthPoint::degenerate(k, t, total);
    }

    let mtbf_c = t / total as f64;
    let Some(line) = least_squares(&points) else {
        // One usable point: flat curve through the cumulative MTBF.
        return GrowthPoint {
            index: k,
            cumulative_time: t,
            cumulative_failures: total,
            shape: Bounded::exact(0.0),
            scale: Bounded::exact(mtbf_c),
            cumulative_mtbf: Bounded::exact(mtbf_c),
            instantaneous_mtbf: Bounded::exact(mtbf_c),
            ..GrowthPoint::default()
        }
        .with_intensities();
    };

    let critical = if line.dof > 0 {
        student_t_ppf(tail_probability(config.confidence, config.bound_type), line.dof as f64)
    } else {
        config.z()
    };
    let alpha = line.slope;
    let b = line.intercept.exp();
    let ln_t = t.ln();
    let fitted = line.intercept + alpha * ln_t;
    let se_fitted = (line.var_intercept + ln_t * ln_t * line.var_slope + 2.0 * ln_t * line.covariance)
        .max(0.0)
        .sqrt();
    let cumulative_mtbf = log_bounds(fitted.exp(), se_fitted, critical);
    let growth = 1.0 - alpha;
    let instantaneous_mtbf = Bounded::new(
        safe_div(cumulative_mtbf.lower, growth),
        safe_div(cumulative_mtbf.point, growth),
        safe_div(cumulative_mtbf.upper, growth),
    );

    GrowthPoint {
        index: k,
        cumulative_time: t,
        cumulative_failures: total,
        shape: Bounded::additive(alpha, line.var_slope.sqrt(), critical),
        scale: log_bounds(b, line.var_intercept.sqrt(), critical),
        cumulative_mtbf,
        instantaneous_mtbf,
        ..GrowthPoint::default()
    }
    .with_intensities()
}

// ---------------------------------------------------------------------------
// Loglinear
// ---------------------------------------------------------------------------

/// `expm1(u)/u` and its first two derivatives.
fn expm1_ratio(u: f64) -> (f64, f64, f64) {
    if u.abs() < 1.0 {
        // Σ uⁿ/(n+1)! and its term-wise derivatives.
        let (mut k0, mut k1, mut k2) = (0.0, 0.0, 0.0);
        let mut factorial = 1.0;
        for n in 0..30 {
            factorial *= (n + 1) as f64;
            let nf = n as f64;
            k0 += u.powi(n) / factorial;
            if n >= 1 {
                k1 += nf * u.powi(n - 1) / factorial;
            }
            if n >= 2 {
                k2 += nf * (nf - 1.0) * u.powi(n - 2) / factorial;
            }
        }
        return (k0, k1, k2);
    }
    let e = u.exp();
    (
        u.exp_m1() / u,
        (u * e - e + 1.0) / (u * u),
        (u * u * e - 2.0 * u * e + 2.0 * e - 2.0) / (u * u * u),
    )
}

/// Solve `1/u − 1/(1 − e^{−u}) = target` for `u`, with `target ∈ (−1, 0)`.
fn solve_loglinear_shape(target: f64) -> Option<f64> {
    let q = |u: f64| {
        if u.abs() < 1e-6 {
            -0.5 - u / 12.0
        } else {
            1.0 / u + 1.0 / (-u).exp_m1()
        }
    };
    let (mut lo, mut hi) = (-1.0, 1.0);
    let mut guard = 0;
    while q(lo) < target && guard < 60 {
        lo *= 2.0;
        guard += 1;
    }
    while q(hi) > target && guard < 120 {
        hi *= 2.0;
        guard += 1;
    }
    if q(lo) < target || q(hi) > target {
        return None;
    }
    for _ in 0..BISECT_ITER {
        let mid = 0.5 * (lo + hi);
        if q(mid) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi))
}

pub fn loglinear(observations: &[GrowthObservation], config: &AnalysisConfig) -> RelkitResult<GrowthCurve> {
    validate(observations)?;
    let z = config.z();
    let points = (1..=observations.len())
        .map(|k| loglinear_point(&observations[..k], z))
        .collect();
    Ok(GrowthCurve { model: GrowthModel::Loglinear, method: FitMethod::Mle, points })
}

fn loglinear_point(prefix: &[GrowthObservation], z: f64) -> GrowthPoint {
    let k = prefix.len();
    let t = prefix[k - 1].cumulative_time;
    let total: u32 = prefix.iter().map(|o| o.failures).sum();
    let n = total as f64;
    let weighted_time: f64 = prefix.iter().map(|o| o.failures as f64 * o.cumulative_time).sum();
    let mean_fraction = weighted_time / (n * t);
    // All failures at the last time leave the likelihood without a maximum.
    if total == 0 || mean_fraction >= 1.0 {
        return GrowthPoint::degenerate(k, t, total);
    }
    let Some(u) = solve_loglinear_shape(-mean_fraction) else {
        debug!("loglinear shape has no root at index {k}");
        return GrowthPoint::degenerate(k, t, total);
    };

    let gamma1 = u / t;
    let (h0, h1, h2) = expm1_ratio(u);
    let gamma0 = (n / t / h0).ln();
    let scale_factor = gamma0.exp();
    // Information for (γ₀, γ₁) with h(γ₁) = (e^{γ₁T} − 1)/γ₁ = T·k(γ₁T).
    let info00 = scale_factor * t * h0;
    let info01 = scale_factor * t * t * h1;
    let info11 = scale_factor * t * t * t * h2;
    let cov = invert_2x2(info00, info01, info11).unwrap_or((0.0, 0.0, 0.0));

    let rho = (gamma0 + gamma1 * t).exp();
    if !gamma0.is_finite() || !rho.is_finite() || rho <= 0.0 {
        debug!("loglinear estimate overflowed at index {k}");
        return GrowthPoint::degenerate(k, t, total);
    }
    let se_ln_rho = delta_variance([1.0, t], cov).sqrt();
    let ii = log_bounds(rho, se_ln_rho, z);

    let cumulative_intensity = n / t;
    let se_ln_c = delta_variance([1.0, t * h1 / h0], cov).sqrt();
    let ci = log_bounds(cumulative_intensity, se_ln_c, z);

    GrowthPoint {
        index: k,
        cumulative_time: t,
        cumulative_failures: total,
        shape: Bounded::additive(gamma1, cov.2.max(0.0).sqrt(), z),
        scale: Bounded::additive(gamma0, cov.0.max(0.0).sqrt(), z),
        cumulative_mtbf: Bounded::new(safe_recip(ci.upper), t / n, safe_recip(ci.lower)),
        instantaneous_mtbf: Bounded::new(safe_recip(ii.upper), safe_recip(rho), safe_recip(ii.lower)),
        cumulative_intensity: ci,
        instantaneous_intensity: ii,
    }
}

// ---------------------------------------------------------------------------
// Crow-AMSAA assessment
// ---------------------------------------------------------------------------

/// How the growth test ended. Time-terminated tests stop at the last
/// observation time; failure-terminated tests stop at the last failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestTermination {
    #[default]
    Time,
    Failure,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrowAmsaaPoint {
    pub index: usize,
    pub cumulative_time: f64,
    pub cumulative_failures: u32,
    pub cumulative_mtbf: Bounded,
    pub instantaneous_mtbf: Bounded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChiSquareTest {
    pub statistic: f64,
    pub dof: f64,
    pub lower_critical: f64,
    pub upper_critical: f64,
}

impl ChiSquareTest {
    pub fn rejects(&self) -> bool {
        self.statistic < self.lower_critical || self.statistic > self.upper_critical
    }
}

/// Crow-AMSAA fit over the whole test with Crow's chi-square bounds and
/// goodness-of-fit statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrowAmsaaAssessment {
    pub grouped: bool,
    pub termination: TestTermination,
    pub total_failures: u32,
    pub total_time: f64,
    /// Crow-AMSAA β (1 − Duane α).
    pub beta: Bounded,
    /// Crow-AMSAA λ in `N(t) = λt^β`.
    pub lambda: Bounded,
    pub points: Vec<CrowAmsaaPoint>,
    /// Only computed for exact failure times.
    pub cramer_von_mises: Option<f64>,
    /// `None` when the failure count or confidence falls outside the table.
    pub cramer_von_mises_critical: Option<f64>,
    /// Model chi-square for grouped data, `2N/β` against β = 1 for exact data.
    pub chi_square: Option<ChiSquareTest>,
}

/// Shape estimate for grouped data: the root in β of
/// `Σ Fᵢ [(Tᵢ^β ln Tᵢ − Tᵢ₋₁^β ln Tᵢ₋₁) / (Tᵢ^β − Tᵢ₋₁^β) − ln T]`.
///
/// Each bracketed term falls as β grows, so the root is unique when it exists.
/// Returns `None` when every failure sits in the first or the last interval.
pub fn beta_grouped(observations: &[GrowthObservation]) -> Option<f64> {
    let last = observations.last()?;
    let ln_t = last.cumulative_time.ln();
    let score = |beta: f64| -> f64 {
        let mut previous: Option<f64> = None;
        let mut sum = 0.0;
        for obs in observations {
            let ln_ti = obs.cumulative_time.ln();
            // (Tᵢ^β ln Tᵢ − Tᵢ₋₁^β ln Tᵢ₋₁) / (Tᵢ^β − Tᵢ₋₁^β) = ln Tᵢ + c / (e^{cβ} − 1)
            let weighted = match previous {
                Some(prev) => {
                    let c = ln_ti - prev;
                    ln_ti + c / (c * beta).exp_m1()
                }
                None => ln_ti,
            };
            sum += obs.failures as f64 * (weighted - ln_t);
            previous = Some(ln_ti);
        }
        sum
    };

    let (mut lo, mut hi) = (0.5, 2.0);
    let mut guard = 0;
    while score(lo) <= 0.0 && guard < 60 {
        lo /= 2.0;
        guard += 1;
    }
    while score(hi) >= 0.0 && guard < 120 {
        hi *= 2.0;
        guard += 1;
    }
    if score(lo) <= 0.0 || score(hi) >= 0.0 {
        return None;
    }
    for _ in 0..BISECT_ITER {
        let mid = 0.5 * (lo + hi);
        if score(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi))
}

/// Chi-square bounds `(lower, upper)` on the cumulative intensity `n/t`.
fn crow_intensity_bounds(n: u32, t: f64, termination: TestTermination, p_lower: f64, p_upper: f64) -> (f64, f64) {
    let n = n as f64;
    let lower = if n > 0.0 { chi2_ppf(p_lower, 2.0 * n) / (2.0 * t) } else { 0.0 };
    let upper_dof = match termination {
        TestTermination::Time => 2.0 * n + 2.0,
        TestTermination::Failure => 2.0 * n,
    };
    let upper = if upper_dof > 0.0 { chi2_ppf(p_upper, upper_dof) / (2.0 * t) } else { 0.0 };
    (lower, upper)
}

fn crow_shape_bounds(n: u32, beta: f64, termination: TestTermination, p_lower: f64, p_upper: f64) -> Bounded {
    let nf = n as f64;
    match termination {
        TestTermination::Time if n >= 2 => {
            let scale = beta / (2.0 * (nf - 1.0));
            Bounded::new(scale * chi2_ppf(p_lower, 2.0 * nf), beta, scale * chi2_ppf(p_upper, 2.0 * nf))
        }
        TestTermination::Failure if n >= 3 => {
            let dof = 2.0 * (nf - 1.0);
            let scale = beta * nf / (dof * (nf - 2.0));
            Bounded::new(scale * chi2_ppf(p_lower, dof), beta, scale * chi2_ppf(p_upper, dof))
        }
        _ => {
            debug!("too few failures ({n}) for Crow shape bounds");
            Bounded::exact(beta)
        }
    }
}

/// Cramér-von Mises statistic for exact failure times.
///
/// Failure-terminated tests drop the last failure (M = N − 1); both forms
/// use the unbiased shape `(M − 1)β/N`.
pub fn cramer_von_mises(observations: &[GrowthObservation], beta: f64, termination: TestTermination) -> Option<f64> {
    let end = observations.last()?.cumulative_time;
    let times: Vec<f64> = observations
        .iter()
        .flat_map(|o| std::iter::repeat(o.cumulative_time).take(o.failures as usize))
        .collect();
    let n = times.len();
    let m = match termination {
        TestTermination::Time => n,
        TestTermination::Failure => n.checked_sub(1)?,
    };
    if m < 2 {
        return None;
    }
    let mf = m as f64;
    let unbiased = (mf - 1.0) * beta / n as f64;
    let spread: f64 = times[..m]
        .iter()
        .enumerate()
        .map(|(i, t)| ((t / end).powf(unbiased) - (2.0 * (i + 1) as f64 - 1.0) / (2.0 * mf)).powi(2))
        .sum();
    Some(spread + 1.0 / (12.0 * mf))
}

/// Critical value of the Cramér-von Mises statistic for `failures` at
/// `confidence`, interpolating linearly across the table in both directions.
/// Counts above the largest tabulated entry use that entry.
pub fn cramer_von_mises_critical_value(failures: u32, confidence: f64) -> RelkitResult<f64> {
    let significance = 1.0 - confidence;
    let (least, most) = (CVM_SIGNIFICANCE[CVM_SIGNIFICANCE.len() - 1], CVM_SIGNIFICANCE[0]);
    if !(least - 1e-9..=most + 1e-9).contains(&significance) {
        return Err(RelkitError::OutOfRange(format!(
            "Cramér-von Mises table covers confidence {:.2} to {:.2}, got {confidence}",
            1.0 - most,
            1.0 - least
        )));
    }
    if failures < CVM_TABLE[0].0 {
        return Err(RelkitError::OutOfRange(format!(
            "Cramér-von Mises table needs at least {} failures, got {failures}",
            CVM_TABLE[0].0
        )));
    }

    let row = |values: &[f64; 5]| -> f64 {
        let j = CVM_SIGNIFICANCE
            .windows(2)
            .position(|w| significance <= w[0] && significance >= w[1])
            .unwrap_or(CVM_SIGNIFICANCE.len() - 2);
        let (s0, s1) = (CVM_SIGNIFICANCE[j], CVM_SIGNIFICANCE[j + 1]);
        let w = ((s0 - significance) / (s0 - s1)).clamp(0.0, 1.0);
        values[j] + w * (values[j + 1] - values[j])
    };

    let k = CVM_TABLE.partition_point(|(n, _)| *n < failures);
    if k == CVM_TABLE.len() {
        return Ok(row(&CVM_TABLE[k - 1].1));
    }
    let (n1, upper) = CVM_TABLE[k];
    if n1 == failures {
        return Ok(row(&upper));
    }
    let (n0, lower) = CVM_TABLE[k - 1];
    let w = (failures - n0) as f64 / (n1 - n0) as f64;
    let (a, b) = (row(&lower), row(&upper));
    Ok(a + w * (b - a))
}

/// Chi-square goodness of fit for grouped data against expected counts
/// `λ(Tᵢ^β − Tᵢ₋₁^β)`; `None` with fewer than three intervals.
fn grouped_chi_square(observations: &[GrowthObservation], lambda: f64, beta: f64, confidence: f64) -> Option<ChiSquareTest> {
    let dof = observations.len().checked_sub(2).filter(|d| *d > 0)? as f64;
    let mut previous = 0.0;
    let mut statistic = 0.0;
    for obs in observations {
        let cumulative = obs.cumulative_time.powf(beta);
        let expected = lambda * (cumulative - previous);
        statistic += safe_div((obs.failures as f64 - expected).powi(2), expected);
        previous = cumulative;
    }
    Some(ChiSquareTest {
        statistic,
        dof,
        lower_critical: chi2_ppf(1.0 - confidence, dof),
        upper_critical: chi2_ppf(confidence, dof),
    })
}

/// `2N/β` against a χ² with `2N` (time) or `2(N − 1)` (failure) degrees of
/// freedom; rejection means β differs from one.
fn exact_chi_square(n: u32, beta: f64, termination: TestTermination, confidence: f64) -> Option<ChiSquareTest> {
    let nf = n as f64;
    let dof = match termination {
        TestTermination::Time => 2.0 * nf,
        TestTermination::Failure => 2.0 * (nf - 1.0),
    };
    if dof <= 0.0 || beta <= 0.0 {
        return None;
    }
    let half = (1.0 - confidence) / 2.0;
    Some(ChiSquareTest {
        statistic: 2.0 * nf / beta,
        dof,
        lower_critical: chi2_ppf(half, dof),
        upper_critical: chi2_ppf(1.0 - half, dof),
    })
}

/// Fit Crow-AMSAA to the whole test and attach Crow's bounds and the
/// goodness-of-fit statistics.
///
/// `grouped` data carry failure counts per interval ending at each
/// cumulative time; otherwise each observation is an exact failure time
/// (a trailing zero-failure observation marks the end of a time-terminated
/// test).
pub fn crow_amsaa_assessment(
    observations: &[GrowthObservation],
    grouped: bool,
    termination: TestTermination,
    config: &AnalysisConfig,
) -> RelkitResult<CrowAmsaaAssessment> {
    validate(observations)?;
    let end = observations[observations.len() - 1];
    if termination == TestTermination::Failure && end.failures == 0 {
        return Err(RelkitError::OutOfRange(
            "a failure-terminated test must end on a failure".into(),
        ));
    }
    let total: u32 = observations.iter().map(|o| o.failures).sum();
    if total < 2 {
        return Err(RelkitError::MissingData(format!(
            "Crow-AMSAA needs at least two failures, got {total}"
        )));
    }
    let n = total as f64;
    let t = end.cumulative_time;

    let beta = if grouped {
        beta_grouped(observations)
    } else {
        let weighted_ln: f64 = observations.iter().map(|o| o.failures as f64 * o.cumulative_time.ln()).sum();
        let denominator = n * t.ln() - weighted_ln;
        (denominator > 0.0).then(|| n / denominator)
    }
    .ok_or_else(|| RelkitError::DegenerateResult("Crow-AMSAA shape has no finite estimate".into()))?;
    let lambda = n / t.powf(beta);

    let p_upper = tail_probability(config.confidence, config.bound_type);
    let p_lower = 1.0 - p_upper;
    let z = config.z();
    let beta_bounds = crow_shape_bounds(total, beta, termination, p_lower, p_upper);
    let t_beta = t.powf(beta);
    let (rate_lower, rate_upper) = crow_intensity_bounds(total, t_beta, termination, p_lower, p_upper);
    let lambda_bounds = Bounded::new(rate_lower, lambda, rate_upper);

    let mut cumulative_failures = 0u32;
    let points = observations
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            cumulative_failures += obs.failures;
            let ti = obs.cumulative_time;
            let (lower, upper) = crow_intensity_bounds(cumulative_failures, ti, termination, p_lower, p_upper);
            let cumulative_mtbf =
                Bounded::new(safe_recip(upper), ti.powf(1.0 - beta) / lambda, safe_recip(lower));
            // ln of the instantaneous MTBF has large-sample variance 2/N.
            let instantaneous = safe_recip(lambda * beta * ti.powf(beta - 1.0));
            let instantaneous_mtbf = if cumulative_failures > 0 {
                log_bounds(instantaneous, (2.0 / cumulative_failures as f64).sqrt(), z)
            } else {
                Bounded::exact(instantaneous)
            };
            CrowAmsaaPoint {
                index: i + 1,
                cumulative_time: ti,
                cumulative_failures,
                cumulative_mtbf,
                instantaneous_mtbf,
            }
        })
        .collect();

    let (cramer_von_mises, cramer_von_mises_critical, chi_square) = if grouped {
        (None, None, grouped_chi_square(observations, lambda, beta, config.confidence))
    } else {
        let statistic = cramer_von_mises(observations, beta, termination);
        let m = match termination {
            TestTermination::Time => total,
            TestTermination::Failure => total - 1,
        };
        let critical = statistic.and_then(|_| cramer_von_mises_critical_value(m, config.confidence).ok());
        (statistic, critical, exact_chi_square(total, beta, termination, config.confidence))
    };
    debug!(
        "Crow-AMSAA over {} observations: beta={beta:.6} lambda={lambda:.6} cvm={cramer_von_mises:?}",
        observations.len()
    );

    Ok(CrowAmsaaAssessment {
        grouped,
        termination,
        total_failures: total,
        total_time: t,
        beta: beta_bounds,
        lambda: lambda_bounds,
        points,
        cramer_von_mises,
        cramer_von_mises_critical,
        chi_square,
    })
}
