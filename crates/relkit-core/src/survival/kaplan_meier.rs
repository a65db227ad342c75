//! Kaplan-Meier product-limit estimator with Greenwood variance.
//!
//! Event and interval-censored records are failures at their right interval;
//! right- and left-censored records leave the risk set there without failing.
//! Bounds on Ŝ use the log transform.

use serde::{Deserialize, Serialize};

use super::{distinct_sorted, SurvivalDataset};
use crate::errors::{RelkitError, RelkitResult};
use crate::guards::safe_div;
use crate::models::Bounded;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KaplanMeierPoint {
    pub time: f64,
    pub at_risk: f64,
    pub failures: f64,
    pub suspensions: f64,
    pub survival: Bounded,
    pub std_error: f64,
    pub cumulative_hazard: Bounded,
    pub hazard_rate: Bounded,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KaplanMeierTable {
    pub points: Vec<KaplanMeierPoint>,
    /// Area under Ŝ(t) up to the last observed time.
    pub mtbf: Bounded,
    pub mtbf_variance: f64,
}

pub fn kaplan_meier(dataset: &SurvivalDataset, z: f64) -> RelkitResult<KaplanMeierTable> {
    if dataset.is_empty() {
        return Err(RelkitError::MissingData("Kaplan-Meier needs at least one record".into()));
    }
    let times = distinct_sorted(dataset.records().iter().map(|r| r.right_interval).collect());
    let mut failures = vec![0.0; times.len()];
    let mut suspensions = vec![0.0; times.len()];
    for record in dataset.records() {
        let i = times.partition_point(|t| *t < record.right_interval);
        if record.status.is_failure() {
            failures[i] += record.quantity as f64;
        } else {
            suspensions[i] += record.quantity as f64;
        }
    }

    let mut at_risk: f64 = failures.iter().chain(&suspensions).sum();
    let mut survival: f64 = 1.0;
    let mut greenwood: f64 = 0.0;
    let mut hazard = Bounded::exact(0.0);
    let mut points = Vec::with_capacity(times.len());

    for (i, &t) in times.iter().enumerate() {
        let d = failures[i];
        let n = at_risk;
        if n > 0.0 {
            survival *= 1.0 - d / n;
        }
        if d > 0.0 && n > d {
            greenwood += d / (n * (n - d));
        }
        let spread = z * greenwood.sqrt();
        let bounds = if survival > 0.0 {
            Bounded::new(
                (survival * (-spread).exp()).clamp(0.0, 1.0),
                survival,
                (survival * spread.exp()).clamp(0.0, 1.0),
            )
        } else {
            Bounded::exact(0.0)
        };

        // Ŝ = 0 carries the previous cumulative hazard forward.
        if survival > 0.0 {
            hazard.point = -survival.ln();
        }
        if bounds.upper > 0.0 {
            hazard.lower = -bounds.upper.ln();
        }
        if bounds.lower > 0.0 {
            hazard.upper = -bounds.lower.ln();
        }
        let hazard_rate = Bounded::new(
            safe_div(hazard.lower, t),
            safe_div(hazard.point, t),
            safe_div(hazard.upper, t),
        );

        points.push(KaplanMeierPoint {
            time: t,
            at_risk: n,
            failures: d,
            suspensions: suspensions[i],
            survival: bounds,
            std_error: survival * greenwood.sqrt(),
            cumulative_hazard: hazard,
            hazard_rate,
        });
        at_risk -= d + suspensions[i];
    }

    let (mtbf, mtbf_variance) = restricted_mean(&points, z);
    Ok(KaplanMeierTable { points, mtbf, mtbf_variance })
}

/// Area under the step function and its variance.
fn restricted_mean(points: &[KaplanMeierPoint], z: f64) -> (Bounded, f64) {
    let mut cumulative_area = Vec::with_capacity(points.len());
    let mut area = 0.0;
    let mut prev_time = 0.0;
    let mut prev_survival = 1.0;
    for p in points {
        area += prev_survival * (p.time - prev_time);
        cumulative_area.push(area);
        prev_time = p.time;
        prev_survival = p.survival.point;
    }

    let mut variance: f64 = 0.0;
    for (p, area_to) in points.iter().zip(&cumulative_area) {
        let n = p.at_risk;
        let d = p.failures;
        if d > 0.0 && n > d {
            let beyond = area - area_to;
            variance += beyond * beyond * d / (n * (n - d));
        }
    }
    (Bounded::additive(area, variance.sqrt(), z), variance)
}
