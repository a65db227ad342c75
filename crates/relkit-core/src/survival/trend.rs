//! Trend tests for deciding between a homogeneous and a non-homogeneous
//! Poisson process.

use serde::{Deserialize, Serialize};

use super::SurvivalDataset;
use crate::guards::safe_div;
use crate::models::{BoundType, FailureRecord};
use crate::stats::{
    chi2_cdf, chi2_ppf, mean, normal_cdf, normal_ppf, population_variance, sample_covariance,
    tail_probability,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendVerdict {
    #[default]
    Constant,
    Nonconstant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendStatistic {
    pub statistic: f64,
    pub critical_lower: f64,
    pub critical_upper: f64,
    pub p_value: f64,
    pub verdict: TrendVerdict,
}

impl TrendStatistic {
    fn judged(statistic: f64, critical_lower: f64, critical_upper: f64, p_value: f64) -> Self {
        let verdict = if statistic < critical_lower || statistic > critical_upper {
            TrendVerdict::Nonconstant
        } else {
            TrendVerdict::Constant
        };
        Self { statistic, critical_lower, critical_upper, p_value, verdict }
    }

    /// Normal-approximation statistic compared against ±z.
    fn normal(statistic: f64, z: f64) -> Self {
        Self::judged(statistic, -z, z, normal_cdf(statistic.abs()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub n_failures: usize,
    pub total_time: f64,
    pub mil_hdbk: TrendStatistic,
    pub laplace: TrendStatistic,
    pub lewis_robinson: TrendStatistic,
    pub serial_correlation: TrendStatistic,
    /// Power-law shape estimate n / Σ ln(tₙ/tᵢ).
    pub power_law_shape: f64,
    /// Power-law scale estimate tₙ / n^(1/β).
    pub power_law_scale: f64,
}

/// Times between failures. Records are taken in request-date order when
/// every failure carries a date, otherwise in time order. A record that spans
/// an interval contributes its width; an exact record contributes the gap
/// since the previous failure.
fn times_between_failures(dataset: &SurvivalDataset) -> Vec<f64> {
    let mut failures: Vec<&FailureRecord> =
        dataset.records().iter().filter(|r| r.status.is_failure()).collect();
    let dated = failures.iter().all(|r| r.request_date.is_some());
    failures.sort_by(|a, b| {
        if dated {
            a.request_date
                .cmp(&b.request_date)
                .then(a.right_interval.total_cmp(&b.right_interval))
        } else {
            a.right_interval.total_cmp(&b.right_interval)
        }
    });

    let mut out = Vec::new();
    let mut previous = 0.0;
    for record in failures {
        for _ in 0..record.quantity {
            let gap = if record.right_interval > record.left_interval {
                record.right_interval - record.left_interval
            } else {
                (record.right_interval - previous).max(0.0)
            };
            out.push(gap);
            previous = record.right_interval;
        }
    }
    out
}

pub fn trend_tests(dataset: &SurvivalDataset, confidence: f64, bound_type: BoundType) -> TrendReport {
    let times = dataset.failure_times();
    let n = times.len();
    if n < 2 {
        return TrendReport { n_failures: n, total_time: times.last().copied().unwrap_or(0.0), ..TrendReport::default() };
    }
    let nf = n as f64;
    let total_time = times[n - 1];
    let alpha = tail_probability(confidence, bound_type);
    let z = normal_ppf(alpha);

    // MIL-HDBK-189: -2 Σ ln(tᵢ/tₙ) ~ χ²(2n) under a constant rate.
    let log_sum: f64 = times
        .iter()
        .filter(|t| **t > 0.0)
        .map(|t| (total_time / t).ln())
        .sum();
    let mil_stat = 2.0 * log_sum;
    let dof = 2.0 * nf;
    let mil_hdbk = TrendStatistic::judged(
        mil_stat,
        chi2_ppf(1.0 - alpha, dof),
        chi2_ppf(alpha, dof),
        chi2_cdf(mil_stat, dof),
    );

    let ratio_sum: f64 = times.iter().map(|t| safe_div(*t, total_time)).sum();
    let z_laplace = (ratio_sum - nf / 2.0) / (nf / 12.0).sqrt();
    let laplace = TrendStatistic::normal(z_laplace, z);

    let tbf = times_between_failures(dataset);
    let std_tbf = population_variance(&tbf).sqrt();
    let z_lewis = z_laplace * safe_div(mean(&tbf), std_tbf);
    let lewis_robinson = TrendStatistic::normal(z_lewis, z);

    let rho = if tbf.len() >= 3 {
        let m = tbf.len();
        (m as f64 - 1.0).sqrt()
            * safe_div(sample_covariance(&tbf[..m - 1], &tbf[1..]), population_variance(&tbf))
    } else {
        0.0
    };
    let serial_correlation = TrendStatistic::normal(rho, z);

    let power_law_shape = safe_div(nf, log_sum);
    let power_law_scale = if power_law_shape > 0.0 {
        total_time / nf.powf(1.0 / power_law_shape)
    } else {
        0.0
    };

    TrendReport {
        n_failures: n,
        total_time,
        mil_hdbk,
        laplace,
        lewis_robinson,
        serial_correlation,
        power_law_shape,
        power_law_scale,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn dataset(times: &[f64]) -> SurvivalDataset {
        SurvivalDataset::new(
            times
                .iter()
                .map(|t| FailureRecord::event("SYS", *t).unwrap())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_evenly_spaced_failures_are_constant() {
        let times: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let report = trend_tests(&dataset(&times), 0.95, BoundType::TwoSided);
        assert!((report.laplace.statistic - 0.5 / (10.0f64 / 12.0).sqrt()).abs() < 1e-12);
        assert_eq!(report.laplace.verdict, TrendVerdict::Constant);
        assert_eq!(report.mil_hdbk.verdict, TrendVerdict::Constant);
        // Equal gaps have zero spread, so Lewis-Robinson falls back to 0.
        assert_eq!(report.lewis_robinson.statistic, 0.0);
        assert_eq!(report.serial_correlation.statistic, 0.0);
    }

    #[test]
    fn test_growing_gaps_are_nonconstant() {
        let times: Vec<f64> = (1..=10).map(|i| (i * i * i) as f64).collect();
        let report = trend_tests(&dataset(&times), 0.95, BoundType::TwoSided);
        assert!(report.laplace.statistic < -1.96);
        assert_eq!(report.laplace.verdict, TrendVerdict::Nonconstant);
        assert!(report.mil_hdbk.statistic > report.mil_hdbk.critical_upper);
        assert_eq!(report.mil_hdbk.verdict, TrendVerdict::Nonconstant);
        assert!(report.power_law_shape < 1.0);
        assert!(report.power_law_scale > 0.0);
    }

    #[test]
    fn test_mil_hdbk_statistic_value() {
        let report = trend_tests(&dataset(&[10.0, 40.0, 100.0]), 0.9, BoundType::TwoSided);
        let expected = 2.0 * ((100.0f64 / 10.0).ln() + (100.0f64 / 40.0).ln());
        assert!((report.mil_hdbk.statistic - expected).abs() < 1e-12);
        assert!((report.power_law_shape - 3.0 / (expected / 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_single_failure_is_inconclusive() {
        let report = trend_tests(&dataset(&[10.0]), 0.95, BoundType::TwoSided);
        assert_eq!(report.n_failures, 1);
        assert_eq!(report.laplace.verdict, TrendVerdict::Constant);
    }

    #[test]
    fn test_request_dates_order_gaps() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        let ds = SurvivalDataset::new(vec![
            FailureRecord::new("A", 0.0, 30.0, crate::models::CensorStatus::Event, 1)
                .unwrap()
                .with_request_date(day(3)),
            FailureRecord::new("A", 0.0, 10.0, crate::models::CensorStatus::Event, 1)
                .unwrap()
                .with_request_date(day(1)),
            FailureRecord::new("A", 0.0, 20.0, crate::models::CensorStatus::Event, 1)
                .unwrap()
                .with_request_date(day(2)),
        ])
        .unwrap();
        assert_eq!(times_between_failures(&ds), vec![10.0, 20.0, 30.0]);
    }
}
