//! Nelson's mean cumulative function for recurrent-event data.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{distinct_sorted, SurvivalDataset};
use crate::errors::{RelkitError, RelkitResult};
use crate::guards::safe_div;
use crate::models::Bounded;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McfPoint {
    pub time: f64,
    /// Units still under observation (Σδ).
    pub units_at_risk: f64,
    /// Events observed at this time (Σdδ).
    pub events: f64,
    /// Mean events per unit at risk (d̄).
    pub mean_events: f64,
    pub mcf: Bounded,
    pub variance: f64,
    pub cumulative_mtbf: Bounded,
    /// Interval length over the MCF increment. The bounds divide by the
    /// increments of the upper and lower MCF bounds, so they need not
    /// bracket the point when the variance shrinks.
    pub instantaneous_mtbf: Bounded,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct McfTable {
    pub points: Vec<McfPoint>,
}

struct UnitHistory {
    last_seen: f64,
    events: Vec<f64>,
}

pub fn mean_cumulative_function(dataset: &SurvivalDataset, z: f64) -> RelkitResult<McfTable> {
    if dataset.is_empty() {
        return Err(RelkitError::MissingData("MCF needs at least one record".into()));
    }
    let times = distinct_sorted(dataset.records().iter().map(|r| r.right_interval).collect());
    let index_of = |t: f64| times.partition_point(|x| *x < t);

    let mut units: IndexMap<&str, UnitHistory> = IndexMap::new();
    for record in dataset.records() {
        let unit = units.entry(record.unit_id.as_str()).or_insert_with(|| UnitHistory {
            last_seen: f64::NEG_INFINITY,
            events: vec![0.0; times.len()],
        });
        unit.last_seen = unit.last_seen.max(record.right_interval);
        if record.status.is_failure() {
            unit.events[index_of(record.right_interval)] += record.quantity as f64;
        }
    }

    let n_times = times.len();
    let mut delta_dot = vec![0.0; n_times];
    let mut d_dot = vec![0.0; n_times];
    for unit in units.values() {
        for (i, t) in times.iter().enumerate() {
            if *t <= unit.last_seen {
                delta_dot[i] += 1.0;
                d_dot[i] += unit.events[i];
            }
        }
    }
    let d_bar: Vec<f64> = d_dot.iter().zip(&delta_dot).map(|(d, n)| safe_div(*d, *n)).collect();

    // Per-unit running sum of (δ/δ·)(d - d̄) for the Nelson variance.
    let mut running = vec![0.0; units.len()];
    let mut points = Vec::with_capacity(n_times);
    let mut mcf: f64 = 0.0;
    let mut prev_time = 0.0;
    let mut prev_mcf = 0.0;
    let (mut prev_lower, mut prev_upper) = (0.0, 0.0);
    for i in 0..n_times {
        for (u, unit) in units.values().enumerate() {
            if times[i] <= unit.last_seen {
                running[u] += safe_div(1.0, delta_dot[i]) * (unit.events[i] - d_bar[i]);
            }
        }
        let variance: f64 = running.iter().map(|r| r * r).sum();
        mcf += d_bar[i];

        let half_width = z * variance.sqrt();
        let lower = (mcf - half_width).max(0.0);
        let upper = mcf + half_width;
        let t = times[i];
        let cumulative_mtbf = Bounded::new(safe_div(t, upper), safe_div(t, mcf), safe_div(t, lower));
        let step = t - prev_time;
        let instantaneous_mtbf = Bounded::new(
            safe_div(step, upper - prev_upper),
            safe_div(step, mcf - prev_mcf),
            safe_div(step, lower - prev_lower),
        );

        points.push(McfPoint {
            time: t,
            units_at_risk: delta_dot[i],
            events: d_dot[i],
            mean_events: d_bar[i],
            mcf: Bounded::new(lower, mcf, upper),
            variance,
            cumulative_mtbf,
            instantaneous_mtbf,
        });
        prev_time = t;
        prev_mcf = mcf;
        prev_lower = lower;
        prev_upper = upper;
    }
    Ok(McfTable { points })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::models::{CensorStatus, FailureRecord};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    /// Two units: A fails at 5 and 10 and is observed to 20; B fails at 10
    /// and leaves at 12.
    fn two_units() -> SurvivalDataset {
        SurvivalDataset::new(vec![
            FailureRecord::event("A", 5.0).unwrap(),
            FailureRecord::event("A", 10.0).unwrap(),
            FailureRecord::suspension("A", 20.0).unwrap(),
            FailureRecord::event("B", 10.0).unwrap(),
            FailureRecord::suspension("B", 12.0).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_mcf_hand_computed() {
        let table = mean_cumulative_function(&two_units(), 1.96).unwrap();
        let times: Vec<f64> = table.points.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![5.0, 10.0, 12.0, 20.0]);

        let at_risk: Vec<f64> = table.points.iter().map(|p| p.units_at_risk).collect();
        assert_eq!(at_risk, vec![2.0, 2.0, 2.0, 1.0]);

        let mcf: Vec<f64> = table.points.iter().map(|p| p.mcf.point).collect();
        assert!(close(mcf[0], 0.5));
        assert!(close(mcf[1], 1.5));
        assert!(close(mcf[2], 1.5));
        assert!(close(mcf[3], 1.5));

        // At t = 5: running sums are +0.25 and -0.25.
        assert!(close(table.points[0].variance, 0.125));
        assert!(close(table.points[0].cumulative_mtbf.point, 10.0));
        assert!(close(table.points[1].instantaneous_mtbf.point, 5.0));
        // No events at 12: the MCF slope is flat, so the instantaneous MTBF falls back.
        assert_eq!(table.points[2].instantaneous_mtbf.point, 0.0);
    }

    #[test]
    fn test_instantaneous_mtbf_bounds_follow_mcf_bounds() {
        let table = mean_cumulative_function(&two_units(), 1.96).unwrap();
        let (first, second) = (&table.points[0], &table.points[1]);

        // The lower MCF bound clamps to zero at t = 5, so only the upper
        // increment is usable there.
        assert_eq!(first.mcf.lower, 0.0);
        assert!(close(first.instantaneous_mtbf.lower, 5.0 / first.mcf.upper));
        assert_eq!(first.instantaneous_mtbf.upper, 0.0);

        let expected_lower = 5.0 / (second.mcf.upper - first.mcf.upper);
        let expected_upper = 5.0 / (second.mcf.lower - first.mcf.lower);
        assert!(close(second.instantaneous_mtbf.lower, expected_lower));
        assert!(close(second.instantaneous_mtbf.upper, expected_upper));
        assert!(second.instantaneous_mtbf.upper > second.instantaneous_mtbf.point);
    }

    #[test]
    fn test_bounds_bracket_point() {
        let table = mean_cumulative_function(&two_units(), 1.645).unwrap();
        for p in &table.points {
            assert!(p.mcf.lower <= p.mcf.point && p.mcf.point <= p.mcf.upper);
            assert!(p.mcf.lower >= 0.0);
        }
    }

    #[test]
    fn test_empty_dataset() {
        let err = mean_cumulative_function(&SurvivalDataset::default(), 1.96).unwrap_err();
        assert_eq!(err.code(), "missing_data");
    }

    proptest! {
        #[test]
        fn test_mcf_is_non_decreasing(
            events in prop::collection::vec((0u8..4, 1u32..50, any::<bool>()), 1..40)
        ) {
            let records: Vec<FailureRecord> = events
                .iter()
                .map(|(unit, t, failed)| {
                    let status = if *failed { CensorStatus::Event } else { CensorStatus::RightCensored };
                    FailureRecord::new(format!("U{unit}"), *t as f64, *t as f64, status, 1).unwrap()
                })
                .collect();
            let ds = SurvivalDataset::new(records).unwrap();
            let table = mean_cumulative_function(&ds, 1.96).unwrap();
            for pair in table.points.windows(2) {
                prop_assert!(pair[1].mcf.point >= pair[0].mcf.point);
            }
        }
    }
}
