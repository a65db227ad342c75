//! Parametric life-distribution fits.
//!
//! Maximum likelihood handles every censoring status; rank regression uses
//! Johnson-adjusted Bernard median ranks. Positive parameters are optimized
//! on the log scale so the simplex never leaves the support.

use tracing::debug;

use super::SurvivalDataset;
use crate::config::AnalysisConfig;
use crate::errors::{RelkitError, RelkitResult};
use crate::models::{
    Bounded, CensorStatus, Covariance, Distribution, FailureRecord, FitMethod, FitResult,
};
use crate::stats::{
    gamma, invert_2x2, least_squares, mean, normal_cdf, normal_ppf, normal_sf, population_variance,
};

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;
const SIMPLEX_MAX_ITER: usize = 5000;
const SIMPLEX_TOLERANCE: f64 = 1e-12;
const HESSIAN_STEP: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Life models
// ---------------------------------------------------------------------------

/// A fully specified life distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LifeModel {
    pub distribution: Distribution,
    pub scale: f64,
    pub shape: f64,
}

impl LifeModel {
    pub fn new(distribution: Distribution, scale: f64, shape: f64) -> Self {
        Self { distribution, scale, shape }
    }

    fn is_valid(&self) -> bool {
        let finite = self.scale.is_finite() && self.shape.is_finite();
        match self.distribution {
            Distribution::Exponential => finite && self.scale > 0.0,
            Distribution::Weibull => finite && self.scale > 0.0 && self.shape > 0.0,
            Distribution::Normal | Distribution::Lognormal => finite && self.shape > 0.0,
        }
    }

    pub fn cdf(&self, t: f64) -> f64 {
        match self.distribution {
            Distribution::Exponential if t > 0.0 => -(-t / self.scale).exp_m1(),
            Distribution::Weibull if t > 0.0 => -(-(t / self.scale).powf(self.shape)).exp_m1(),
            Distribution::Normal => normal_cdf((t - self.scale) / self.shape),
            Distribution::Lognormal if t > 0.0 => normal_cdf((t.ln() - self.scale) / self.shape),
            _ => 0.0,
        }
    }

    /// Reliability `S(t) = 1 − F(t)`.
    pub fn sf(&self, t: f64) -> f64 {
        match self.distribution {
            Distribution::Exponential if t > 0.0 => (-t / self.scale).exp(),
            Distribution::Weibull if t > 0.0 => (-(t / self.scale).powf(self.shape)).exp(),
            Distribution::Normal => normal_sf((t - self.scale) / self.shape),
            Distribution::Lognormal if t > 0.0 => normal_sf((t.ln() - self.scale) / self.shape),
            _ => 1.0,
        }
    }

    pub fn ln_pdf(&self, t: f64) -> f64 {
        match self.distribution {
            Distribution::Exponential if t >= 0.0 => -self.scale.ln() - t / self.scale,
            Distribution::Weibull if t > 0.0 => {
                let u = t / self.scale;
                self.shape.ln() - self.scale.ln() + (self.shape - 1.0) * u.ln()
                    - u.powf(self.shape)
            }
            Distribution::Normal => {
                let z = (t - self.scale) / self.shape;
                -0.5 * z * z - self.shape.ln() - LN_SQRT_2PI
            }
            Distribution::Lognormal if t > 0.0 => {
                let z = (t.ln() - self.scale) / self.shape;
                -0.5 * z * z - self.shape.ln() - t.ln() - LN_SQRT_2PI
            }
            _ => f64::NEG_INFINITY,
        }
    }

    /// Mean life.
    pub fn mean(&self) -> f64 {
        match self.distribution {
            Distribution::Exponential | Distribution::Normal => self.scale,
            Distribution::Lognormal => (self.scale + 0.5 * self.shape * self.shape).exp(),
            Distribution::Weibull => self.scale * gamma(1.0 + 1.0 / self.shape),
        }
    }

    fn ln_contribution(&self, record: &FailureRecord) -> f64 {
        let right = record.right_interval;
        match record.status {
            CensorStatus::Event => self.ln_pdf(right),
            CensorStatus::RightCensored => self.sf(right).ln(),
            CensorStatus::LeftCensored => self.cdf(right).ln(),
            CensorStatus::IntervalCensored if right > record.left_interval => {
                (self.cdf(right) - self.cdf(record.left_interval)).max(0.0).ln()
            }
            CensorStatus::IntervalCensored => self.ln_pdf(right),
        }
    }

    pub fn log_likelihood(&self, records: &[FailureRecord]) -> f64 {
        records
            .iter()
            .map(|r| r.quantity as f64 * self.ln_contribution(r))
            .sum()
    }
}

/// Free (unconstrained) coordinates: log for positive parameters.
fn to_free(model: &LifeModel) -> Vec<f64> {
    match model.distribution {
        Distribution::Exponential => vec![model.scale.ln()],
        Distribution::Weibull => vec![model.scale.ln(), model.shape.ln()],
        Distribution::Normal | Distribution::Lognormal => vec![model.scale, model.shape.ln()],
    }
}

fn from_free(distribution: Distribution, free: &[f64]) -> LifeModel {
    match distribution {
        Distribution::Exponential => LifeModel::new(distribution, free[0].exp(), 0.0),
        Distribution::Weibull => LifeModel::new(distribution, free[0].exp(), free[1].exp()),
        Distribution::Normal | Distribution::Lognormal => {
            LifeModel::new(distribution, free[0], free[1].exp())
        }
    }
}

/// d(natural)/d(free) for each coordinate.
fn free_jacobian(model: &LifeModel) -> [f64; 2] {
    match model.distribution {
        Distribution::Exponential => [model.scale, 0.0],
        Distribution::Weibull => [model.scale, model.shape],
        Distribution::Normal | Distribution::Lognormal => [1.0, model.shape],
    }
}

// ---------------------------------------------------------------------------
// Numerics
// ---------------------------------------------------------------------------

/// Minimize `f` with the Nelder-Mead simplex.
fn nelder_mead(f: impl Fn(&[f64]) -> f64, start: Vec<f64>, step: &[f64]) -> Vec<f64> {
    let dim = start.len();
    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
    let f0 = f(&start);
    simplex.push((start.clone(), f0));
    for (i, s) in step.iter().enumerate().take(dim) {
        let mut p = start.clone();
        p[i] += s;
        let v = f(&p);
        simplex.push((p, v));
    }

    for _ in 0..SIMPLEX_MAX_ITER {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best = simplex[0].1;
        let worst = simplex[dim].1;
        let spread = simplex
            .iter()
            .skip(1)
            .flat_map(|(p, _)| p.iter().zip(&simplex[0].0).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if (worst - best).abs() <= SIMPLEX_TOLERANCE * (best.abs() + SIMPLEX_TOLERANCE)
            && spread <= 1e-10
        {
            break;
        }

        let centroid: Vec<f64> = (0..dim)
            .map(|j| simplex[..dim].iter().map(|(p, _)| p[j]).sum::<f64>() / dim as f64)
            .collect();
        let worst_point = simplex[dim].0.clone();
        let along = |coef: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&worst_point)
                .map(|(c, w)| c + coef * (c - w))
                .collect()
        };

        let reflected = along(1.0);
        let fr = f(&reflected);
        if fr < best {
            let expanded = along(2.0);
            let fe = f(&expanded);
            simplex[dim] = if fe < fr { (expanded, fe) } else { (reflected, fr) };
        } else if fr < simplex[dim - 1].1 {
            simplex[dim] = (reflected, fr);
        } else {
            let contracted = if fr < worst { along(0.5) } else { along(-0.5) };
            let fc = f(&contracted);
            if fc < fr.min(worst) {
                simplex[dim] = (contracted, fc);
            } else {
                let anchor = simplex[0].0.clone();
                for entry in simplex.iter_mut().skip(1) {
                    let p: Vec<f64> =
                        anchor.iter().zip(&entry.0).map(|(a, x)| a + 0.5 * (x - a)).collect();
                    let v = f(&p);
                    *entry = (p, v);
                }
            }
        }
    }
    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    simplex.swap_remove(0).0
}

/// Central-difference Hessian of `f` at `x`.
fn hessian(f: &impl Fn(&[f64]) -> f64, x: &[f64]) -> Vec<Vec<f64>> {
    let dim = x.len();
    let h: Vec<f64> = x.iter().map(|v| HESSIAN_STEP * v.abs().max(1.0)).collect();
    let eval = |di: &[(usize, f64)]| {
        let mut p = x.to_vec();
        for (i, d) in di {
            p[*i] += d;
        }
        f(&p)
    };
    let f0 = f(x);
    let mut out = vec![vec![0.0; dim]; dim];
    for i in 0..dim {
        out[i][i] = (eval(&[(i, h[i])]) - 2.0 * f0 + eval(&[(i, -h[i])])) / (h[i] * h[i]);
        for j in 0..i {
            let v = (eval(&[(i, h[i]), (j, h[j])]) - eval(&[(i, h[i]), (j, -h[j])])
                - eval(&[(i, -h[i]), (j, h[j])])
                + eval(&[(i, -h[i]), (j, -h[j])]))
                / (4.0 * h[i] * h[j]);
            out[i][j] = v;
            out[j][i] = v;
        }
    }
    out
}

/// Covariance of the natural parameters from the observed information at the
/// optimum. A singular information matrix collapses the bounds.
fn observed_covariance(model: &LifeModel, records: &[FailureRecord]) -> Covariance {
    let distribution = model.distribution;
    let nll = |free: &[f64]| -from_free(distribution, free).log_likelihood(records);
    let free = to_free(model);
    let info = hessian(&nll, &free);
    let jac = free_jacobian(model);

    let covariance = if free.len() == 1 {
        if info[0][0] > 0.0 && info[0][0].is_finite() {
            Covariance { scale: jac[0] * jac[0] / info[0][0], ..Covariance::default() }
        } else {
            Covariance::default()
        }
    } else {
        match invert_2x2(info[0][0], info[0][1], info[1][1]) {
            Some((c00, c01, c11)) if c00 > 0.0 && c11 > 0.0 => Covariance {
                scale: jac[0] * jac[0] * c00,
                shape: jac[1] * jac[1] * c11,
                covariance: jac[0] * jac[1] * c01,
            },
            _ => Covariance::default(),
        }
    };
    if covariance == Covariance::default() {
        debug!("observed information is singular; collapsing {distribution:?} bounds");
    }
    covariance
}

// ---------------------------------------------------------------------------
// Maximum likelihood
// ---------------------------------------------------------------------------

/// Count of records that carry failure information (everything but
/// suspensions), weighted by quantity.
fn observed_failures(records: &[FailureRecord]) -> u32 {
    records
        .iter()
        .filter(|r| r.status != CensorStatus::RightCensored)
        .map(|r| r.quantity)
        .sum()
}

/// Representative failure times for starting values.
fn representative_times(records: &[FailureRecord]) -> Vec<f64> {
    records
        .iter()
        .filter(|r| r.status != CensorStatus::RightCensored)
        .flat_map(|r| {
            let t = 0.5 * (r.left_interval + r.right_interval);
            std::iter::repeat(t).take(r.quantity as usize)
        })
        .collect()
}

fn check_support(distribution: Distribution, records: &[FailureRecord]) -> RelkitResult<()> {
    if !matches!(distribution, Distribution::Weibull | Distribution::Lognormal) {
        return Ok(());
    }
    match records
        .iter()
        .find(|r| r.status != CensorStatus::RightCensored && r.right_interval <= 0.0)
    {
        Some(r) => Err(RelkitError::OutOfRange(format!(
            "unit {}: {distribution:?} needs failure times above zero",
            r.unit_id
        ))),
        None => Ok(()),
    }
}

fn closed_form(distribution: Distribution, records: &[FailureRecord]) -> RelkitResult<Option<(LifeModel, Covariance)>> {
    let only = |allowed: &[CensorStatus]| records.iter().all(|r| allowed.contains(&r.status));
    match distribution {
        Distribution::Exponential
            if only(&[CensorStatus::Event, CensorStatus::RightCensored]) =>
        {
            let r = observed_failures(records) as f64;
            let total: f64 = records.iter().map(|rec| rec.quantity as f64 * rec.right_interval).sum();
            if total <= 0.0 {
                return Err(RelkitError::DegenerateResult("total time on test is zero".into()));
            }
            let theta = total / r;
            Ok(Some((
                LifeModel::new(distribution, theta, 0.0),
                Covariance { scale: theta * theta / r, ..Covariance::default() },
            )))
        }
        Distribution::Normal | Distribution::Lognormal if only(&[CensorStatus::Event]) => {
            let values: Vec<f64> = representative_times(records)
                .into_iter()
                .map(|t| if distribution == Distribution::Lognormal { t.ln() } else { t })
                .collect();
            let n = values.len() as f64;
            let mu = mean(&values);
            let sigma = population_variance(&values).sqrt();
            if sigma <= 0.0 {
                return Err(RelkitError::DegenerateResult(
                    "failure times have no spread".into(),
                ));
            }
            Ok(Some((
                LifeModel::new(distribution, mu, sigma),
                Covariance { scale: sigma * sigma / n, shape: sigma * sigma / (2.0 * n), covariance: 0.0 },
            )))
        }
        _ => Ok(None),
    }
}

fn starting_model(distribution: Distribution, records: &[FailureRecord]) -> LifeModel {
    let times = representative_times(records);
    let positive: Vec<f64> = times.iter().copied().filter(|t| *t > 0.0).collect();
    let m = mean(&positive).max(1e-6);
    match distribution {
        Distribution::Exponential => {
            let total: f64 = records.iter().map(|r| r.quantity as f64 * r.right_interval).sum();
            let r = times.len().max(1) as f64;
            LifeModel::new(distribution, (total / r).max(1e-6), 0.0)
        }
        Distribution::Weibull => LifeModel::new(distribution, m, 1.0),
        Distribution::Normal => {
            let sd = population_variance(&times).sqrt();
            LifeModel::new(distribution, mean(&times), if sd > 0.0 { sd } else { m * 0.5 })
        }
        Distribution::Lognormal => {
            let logs: Vec<f64> = positive.iter().map(|t| t.ln()).collect();
            let sd = population_variance(&logs).sqrt();
            LifeModel::new(distribution, mean(&logs), if sd > 0.0 { sd } else { 1.0 })
        }
    }
}

fn fit_mle(distribution: Distribution, records: &[FailureRecord]) -> RelkitResult<(LifeModel, Covariance)> {
    if observed_failures(records) < 1 {
        return Err(RelkitError::DegenerateResult(
            "maximum likelihood needs at least one failure".into(),
        ));
    }
    check_support(distribution, records)?;
    if let Some(found) = closed_form(distribution, records)? {
        return Ok(found);
    }

    let start = rank_regression_estimate(distribution, records)
        .map(|(model, _)| model)
        .ok()
        .filter(LifeModel::is_valid)
        .unwrap_or_else(|| starting_model(distribution, records));
    let objective = |free: &[f64]| {
        let model = from_free(distribution, free);
        let ll = model.log_likelihood(records);
        if model.is_valid() && ll.is_finite() {
            -ll
        } else {
            f64::INFINITY
        }
    };
    let start_free = to_free(&start);
    let step: Vec<f64> = start_free.iter().map(|v| 0.1 * v.abs().max(1.0)).collect();
    let best = from_free(distribution, &nelder_mead(objective, start_free, &step));
    if !best.is_valid() || !best.log_likelihood(records).is_finite() {
        return Err(RelkitError::DegenerateResult(format!(
            "{distribution:?} likelihood did not converge"
        )));
    }
    Ok((best, observed_covariance(&best, records)))
}

// ---------------------------------------------------------------------------
// Rank regression
// ---------------------------------------------------------------------------

/// `(time, F)` for each failure using Johnson's adjusted rank and Bernard's
/// approximation. Failures sort ahead of suspensions at the same time.
pub fn median_ranks(records: &[FailureRecord]) -> Vec<(f64, f64)> {
    let mut units: Vec<(f64, bool)> = records
        .iter()
        .flat_map(|r| {
            let failed = r.status != CensorStatus::RightCensored;
            std::iter::repeat((r.right_interval, failed)).take(r.quantity as usize)
        })
        .collect();
    units.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

    let n = units.len() as f64;
    let mut rank = 0.0;
    let mut out = Vec::new();
    for (i, (t, failed)) in units.into_iter().enumerate() {
        if failed {
            let reverse_rank = n - i as f64;
            rank += (n + 1.0 - rank) / (1.0 + reverse_rank);
            out.push((t, (rank - 0.3) / (n + 0.4)));
        }
    }
    out
}

/// Least-squares fit on the probability plot. The covariance is the
/// regression's residual covariance `s²(XᵀX)⁻¹` carried through the delta
/// method, so the bounds shrink with the scatter about the plotted line and
/// collapse onto the point for a perfect line.
fn rank_regression_estimate(
    distribution: Distribution,
    records: &[FailureRecord],
) -> RelkitResult<(LifeModel, Covariance)> {
    let ranks = median_ranks(records);
    if ranks.len() < 2 {
        return Err(RelkitError::DegenerateResult(
            "rank regression needs at least two failures".into(),
        ));
    }
    check_support(distribution, records)?;
    let degenerate = || {
        RelkitError::DegenerateResult(format!("{distribution:?} probability plot has no slope"))
    };

    if distribution == Distribution::Exponential {
        // y = t/θ through the origin.
        let points: Vec<(f64, f64)> = ranks.iter().map(|(t, f)| (*t, -(-f).ln_1p())).collect();
        let sxx: f64 = points.iter().map(|(x, _)| x * x).sum();
        let sxy: f64 = points.iter().map(|(x, y)| x * y).sum();
        if sxx <= 0.0 || sxy <= 0.0 {
            return Err(degenerate());
        }
        let slope = sxy / sxx;
        let sse: f64 = points.iter().map(|(x, y)| (y - slope * x).powi(2)).sum();
        let var_slope = sse / (points.len() as f64 - 1.0) / sxx;
        let theta = 1.0 / slope;
        return Ok((
            LifeModel::new(distribution, theta, 0.0),
            Covariance { scale: var_slope / slope.powi(4), ..Covariance::default() },
        ));
    }

    let points: Vec<(f64, f64)> = ranks
        .iter()
        .map(|(t, f)| match distribution {
            Distribution::Weibull => (t.ln(), (-(-f).ln_1p()).ln()),
            Distribution::Lognormal => (t.ln(), normal_ppf(*f)),
            _ => (*t, normal_ppf(*f)),
        })
        .collect();
    let line = least_squares(&points).ok_or_else(degenerate)?;
    if line.slope <= 0.0 {
        return Err(degenerate());
    }
    let (a, b) = (line.intercept, line.slope);

    // Gradients of (scale, shape) with respect to (intercept, slope).
    let (scale, shape, d_scale, d_shape) = match distribution {
        Distribution::Weibull => {
            let eta = (-a / b).exp();
            (eta, b, [-eta / b, eta * a / (b * b)], [0.0, 1.0])
        }
        _ => (-a / b, 1.0 / b, [-1.0 / b, a / (b * b)], [0.0, -1.0 / (b * b)]),
    };
    let quad = |g: [f64; 2], h: [f64; 2]| {
        g[0] * h[0] * line.var_intercept
            + (g[0] * h[1] + g[1] * h[0]) * line.covariance
            + g[1] * h[1] * line.var_slope
    };
    Ok((
        LifeModel::new(distribution, scale, shape),
        Covariance {
            scale: quad(d_scale, d_scale),
            shape: quad(d_shape, d_shape),
            covariance: quad(d_scale, d_shape),
        },
    ))
}

// ---------------------------------------------------------------------------
// Result assembly
// ---------------------------------------------------------------------------

fn ordered(a: f64, point: f64, b: f64) -> Bounded {
    Bounded::new(a.min(b), point, a.max(b))
}

/// Fit `distribution` to the dataset with `method`.
pub fn fit(
    dataset: &SurvivalDataset,
    distribution: Distribution,
    method: FitMethod,
    config: &AnalysisConfig,
) -> RelkitResult<FitResult> {
    let records = dataset.records();
    let (model, variance) = match method {
        FitMethod::Mle => fit_mle(distribution, records)?,
        FitMethod::RankRegression => rank_regression_estimate(distribution, records)?,
    };
    if !model.is_valid() {
        return Err(RelkitError::DegenerateResult(format!(
            "{distribution:?} estimate is outside the parameter space"
        )));
    }

    let z = config.z();
    let se_scale = variance.scale.max(0.0).sqrt();
    let se_shape = variance.shape.max(0.0).sqrt();
    let (scale, shape) = match distribution {
        Distribution::Exponential => (Bounded::additive(model.scale, se_scale, z), Bounded::default()),
        Distribution::Weibull => (
            Bounded::multiplicative(model.scale, se_scale, z),
            Bounded::multiplicative(model.shape, se_shape, z),
        ),
        Distribution::Normal | Distribution::Lognormal => (
            Bounded::additive(model.scale, se_scale, z),
            Bounded::additive(model.shape, se_shape, z),
        ),
    };

    let at_scale = |s: f64| LifeModel { scale: s, ..model };
    let mtbf_at = |s: f64| {
        let m = at_scale(s);
        if m.is_valid() { m.mean().max(0.0) } else { 0.0 }
    };
    let mtbf = ordered(mtbf_at(scale.lower), model.mean(), mtbf_at(scale.upper));
    let reliability = config.mission_time.map(|t| {
        let r_at = |s: f64| {
            let m = at_scale(s);
            if m.is_valid() { m.sf(t) } else { 0.0 }
        };
        ordered(r_at(scale.lower), model.sf(t), r_at(scale.upper))
    });

    let log_likelihood = model.log_likelihood(records);
    let k = distribution.parameter_count() as f64;
    let n_failures = observed_failures(records);
    let n_suspensions = records
        .iter()
        .filter(|r| r.status == CensorStatus::RightCensored)
        .map(|r| r.quantity)
        .sum::<u32>();
    let n_total = (n_failures + n_suspensions) as f64;
    debug!("{distribution:?} {method:?}: lnL={log_likelihood:.6} over {n_total} units");

    Ok(FitResult {
        distribution,
        method,
        scale,
        shape,
        location: Bounded::default(),
        variance,
        mtbf,
        reliability,
        log_likelihood,
        aic: 2.0 * k - 2.0 * log_likelihood,
        bic: k * n_total.ln() - 2.0 * log_likelihood,
        n_failures,
        n_suspensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(times: &[f64]) -> SurvivalDataset {
        SurvivalDataset::new(
            times
                .iter()
                .enumerate()
                .map(|(i, t)| FailureRecord::event(format!("U{i}"), *t).unwrap())
                .collect(),
        )
        .unwrap()
    }

    /// Bernard quantiles of a Weibull(η = 100, β = 2).
    fn weibull_sample(n: usize) -> Vec<f64> {
        (1..=n)
            .map(|i| {
                let p = (i as f64 - 0.3) / (n as f64 + 0.4);
                100.0 * (-(-p).ln_1p()).sqrt()
            })
            .collect()
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig::default()
    }

    #[test]
    fn test_exponential_mle_closed_form() {
        let ds = events(&[10.0, 25.0, 40.0, 60.0]);
        let fit = fit(&ds, Distribution::Exponential, FitMethod::Mle, &config()).unwrap();
        assert!((fit.scale.point - 33.75).abs() < 1e-12);
        assert!((fit.mtbf.point - 33.75).abs() < 1e-12);
        assert!((fit.variance.scale - 33.75f64.powi(2) / 4.0).abs() < 1e-9);
        let ll = -4.0 * 33.75f64.ln() - 4.0;
        assert!((fit.log_likelihood - ll).abs() < 1e-9);
        assert!((fit.aic - (2.0 - 2.0 * ll)).abs() < 1e-9);
        assert!((fit.bic - (4f64.ln() - 2.0 * ll)).abs() < 1e-9);
    }

    #[test]
    fn test_exponential_counts_suspension_time() {
        let ds = SurvivalDataset::new(vec![
            FailureRecord::event("A", 10.0).unwrap(),
            FailureRecord::event("B", 20.0).unwrap(),
            FailureRecord::suspension("C", 30.0).unwrap(),
        ])
        .unwrap();
        let fit = fit(&ds, Distribution::Exponential, FitMethod::Mle, &config()).unwrap();
        assert!((fit.scale.point - 30.0).abs() < 1e-12);
        assert_eq!(fit.n_failures, 2);
        assert_eq!(fit.n_suspensions, 1);
    }

    #[test]
    fn test_exponential_rank_regression() {
        let ds = events(&[10.0, 25.0, 40.0, 60.0]);
        let fit = fit(&ds, Distribution::Exponential, FitMethod::RankRegression, &config()).unwrap();
        assert!((fit.scale.point - 36.511_563_3).abs() < 1e-6);
    }

    #[test]
    fn test_weibull_rank_regression_recovers_plot_line() {
        let ds = events(&weibull_sample(20));
        let fit = fit(&ds, Distribution::Weibull, FitMethod::RankRegression, &config()).unwrap();
        assert!((fit.scale.point - 100.0).abs() < 1e-9);
        assert!((fit.shape.point - 2.0).abs() < 1e-9);
        // A perfect line leaves no residual variance.
        assert!((fit.scale.upper - fit.scale.lower).abs() < 1e-9);
    }

    #[test]
    fn test_weibull_rank_regression_with_scatter() {
        let pattern = [1.0, -1.0, -1.0, 1.0];
        let times: Vec<f64> = weibull_sample(20)
            .iter()
            .enumerate()
            .map(|(i, t)| t * (1.0 + 0.02 * pattern[i % 4]))
            .collect();
        let fit = fit(&events(&times), Distribution::Weibull, FitMethod::RankRegression, &config())
            .unwrap();
        assert!((fit.scale.point / 100.0 - 1.0).abs() < 0.05);
        assert!((fit.shape.point / 2.0 - 1.0).abs() < 0.05);
        assert!(fit.shape.lower < fit.shape.point && fit.shape.point < fit.shape.upper);
        assert!(fit.mtbf.lower < fit.mtbf.point && fit.mtbf.point < fit.mtbf.upper);
    }

    #[test]
    fn test_weibull_rank_regression_bounds_at_ninety_percent() {
        let pattern = [1.0, -1.0, -1.0, 1.0];
        let times: Vec<f64> = weibull_sample(20)
            .iter()
            .enumerate()
            .map(|(i, t)| t * (1.0 + 0.02 * pattern[i % 4]))
            .collect();
        let config = AnalysisConfig { confidence: 0.90, ..AnalysisConfig::default() };
        let fit = fit(&events(&times), Distribution::Weibull, FitMethod::RankRegression, &config)
            .unwrap();
        assert!(fit.scale.contains(100.0) && fit.shape.contains(2.0));
        assert!((fit.scale.lower - 99.137).abs() < 1e-2 && (fit.scale.upper - 100.856).abs() < 1e-2);
        assert!((fit.shape.lower - 1.9721).abs() < 1e-3 && (fit.shape.upper - 2.0264).abs() < 1e-3);

        // Narrower than the default 95% interval.
        let wide = fit_default(&times);
        assert!(wide.scale.lower < fit.scale.lower && fit.scale.upper < wide.scale.upper);
    }

    fn fit_default(times: &[f64]) -> FitResult {
        fit(&events(times), Distribution::Weibull, FitMethod::RankRegression, &config()).unwrap()
    }

    #[test]
    fn test_left_censored_records_count_as_failures() {
        let ds = SurvivalDataset::new(vec![
            FailureRecord::event("A", 10.0).unwrap(),
            FailureRecord::new("B", 0.0, 15.0, CensorStatus::LeftCensored, 2).unwrap(),
            FailureRecord::event("C", 40.0).unwrap(),
            FailureRecord::suspension("D", 60.0).unwrap(),
        ])
        .unwrap();
        let fit = fit(&ds, Distribution::Weibull, FitMethod::Mle, &config()).unwrap();
        // The likelihood treats left-censored units as failed before 15.
        assert_eq!(fit.n_failures, 4);
        assert_eq!(fit.n_suspensions, 1);
        assert_eq!(fit.n_failures + fit.n_suspensions, 5);
    }

    #[test]
    fn test_weibull_mle_matches_score_equations() {
        let ds = events(&weibull_sample(20));
        let fit = fit(&ds, Distribution::Weibull, FitMethod::Mle, &config()).unwrap();
        assert!((fit.shape.point - 2.171_102).abs() < 1e-3);
        assert!((fit.scale.point - 99.372_65).abs() < 1e-2);
        assert!(fit.scale.lower < fit.scale.point && fit.scale.point < fit.scale.upper);
        assert!(fit.variance.scale > 0.0 && fit.variance.shape > 0.0);
    }

    #[test]
    fn test_normal_closed_form() {
        let ds = events(&[8.0, 10.0, 12.0]);
        let fit = fit(&ds, Distribution::Normal, FitMethod::Mle, &config()).unwrap();
        let sigma2: f64 = 8.0 / 3.0;
        assert!((fit.scale.point - 10.0).abs() < 1e-12);
        assert!((fit.shape.point - sigma2.sqrt()).abs() < 1e-12);
        assert!((fit.variance.scale - sigma2 / 3.0).abs() < 1e-12);
        assert!((fit.mtbf.point - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_interval_censored_fit_is_a_likelihood_maximum() {
        let ds = SurvivalDataset::new(vec![
            FailureRecord::new("A", 0.0, 20.0, CensorStatus::IntervalCensored, 2).unwrap(),
            FailureRecord::new("B", 20.0, 50.0, CensorStatus::IntervalCensored, 3).unwrap(),
            FailureRecord::new("C", 50.0, 90.0, CensorStatus::IntervalCensored, 2).unwrap(),
            FailureRecord::suspension("D", 90.0).unwrap(),
        ])
        .unwrap();
        let fit = fit(&ds, Distribution::Weibull, FitMethod::Mle, &config()).unwrap();
        let best = LifeModel::new(Distribution::Weibull, fit.scale.point, fit.shape.point);
        let ll = best.log_likelihood(ds.records());
        assert!((ll - fit.log_likelihood).abs() < 1e-9);
        for (ds_, dk) in [(1.02, 1.0), (0.98, 1.0), (1.0, 1.02), (1.0, 0.98)] {
            let nearby = LifeModel::new(Distribution::Weibull, best.scale * ds_, best.shape * dk);
            assert!(nearby.log_likelihood(ds.records()) <= ll);
        }
    }

    #[test]
    fn test_reliability_at_mission_time() {
        let ds = events(&[10.0, 25.0, 40.0, 60.0]);
        let cfg = AnalysisConfig { mission_time: Some(10.0), ..config() };
        let fit = fit(&ds, Distribution::Exponential, FitMethod::Mle, &cfg).unwrap();
        let r = fit.reliability.unwrap();
        assert!((r.point - (-10.0f64 / 33.75).exp()).abs() < 1e-12);
        assert!(r.lower <= r.point && r.point <= r.upper);
    }

    #[test]
    fn test_too_few_failures() {
        let only_one = events(&[10.0]);
        let err = fit(&only_one, Distribution::Weibull, FitMethod::RankRegression, &config())
            .unwrap_err();
        assert_eq!(err.code(), "degenerate_result");

        let none = SurvivalDataset::new(vec![FailureRecord::suspension("A", 5.0).unwrap()]).unwrap();
        let err = fit(&none, Distribution::Weibull, FitMethod::Mle, &config()).unwrap_err();
        assert_eq!(err.code(), "degenerate_result");
    }

    #[test]
    fn test_weibull_rejects_zero_failure_time() {
        let err = fit(&events(&[0.0, 5.0]), Distribution::Weibull, FitMethod::Mle, &config())
            .unwrap_err();
        assert_eq!(err.code(), "out_of_range");
    }

    #[test]
    fn test_median_ranks_with_suspension() {
        let ds = SurvivalDataset::new(vec![
            FailureRecord::event("A", 10.0).unwrap(),
            FailureRecord::suspension("B", 20.0).unwrap(),
            FailureRecord::event("C", 30.0).unwrap(),
        ])
        .unwrap();
        let ranks = median_ranks(ds.records());
        assert_eq!(ranks.len(), 2);
        assert!((ranks[0].1 - 0.7 / 3.4).abs() < 1e-12);
        // Second failure: 1 + (4 − 1)/(1 + 1) = 2.5.
        assert!((ranks[1].1 - 2.2 / 3.4).abs() < 1e-12);
    }
}
