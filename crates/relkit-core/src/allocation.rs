//! Reliability allocation: apportion a system goal to immediate children.
//!
//! Four methods are supported (equal, AGREE, ARINC, feasibility of
//! objectives). Zero denominators never abort a call; the affected row gets
//! the documented fallback and its id is listed in the outcome.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{RelkitError, RelkitResult};
use crate::guards::{guarded_div, safe_div, safe_ln, safe_recip, RATE_FALLBACK, RELIABILITY_FALLBACK};
use crate::models::{AllocationRow, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    Equal,
    Agree,
    Arinc,
    FeasibilityOfObjectives,
}

impl AllocationMethod {
    /// Legacy numeric codes used by stored analyses.
    pub fn from_code(code: i64) -> RelkitResult<Self> {
        match code {
            1 => Ok(AllocationMethod::Equal),
            2 => Ok(AllocationMethod::Agree),
            3 => Ok(AllocationMethod::Arinc),
            4 => Ok(AllocationMethod::FeasibilityOfObjectives),
            other => Err(RelkitError::InvalidMethod(format!("allocation method code {other}"))),
        }
    }
}

impl FromStr for AllocationMethod {
    type Err = RelkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        if let Ok(code) = token.parse::<i64>() {
            return Self::from_code(code);
        }
        match token.replace(['-', ' '], "_").as_str() {
            "equal" | "equal_apportionment" => Ok(AllocationMethod::Equal),
            "agree" => Ok(AllocationMethod::Agree),
            "arinc" => Ok(AllocationMethod::Arinc),
            "foo" | "feasibility" | "feasibility_of_objectives" => {
                Ok(AllocationMethod::FeasibilityOfObjectives)
            }
            other => Err(RelkitError::InvalidMethod(format!("allocation method {other:?}"))),
        }
    }
}

/// The system-level requirement, expressed in exactly one measure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "measure", content = "value", rename_all = "snake_case")]
pub enum AllocationGoal {
    Reliability(f64),
    Mtbf(f64),
    FailureRate(f64),
}

/// A goal expressed in all three measures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalSet {
    pub reliability: f64,
    pub mtbf: f64,
    pub failure_rate: f64,
}

/// Derive the two missing goal measures from the one supplied.
pub fn calculate_goals(goal: AllocationGoal, mission_time: f64) -> GoalSet {
    match goal {
        AllocationGoal::Reliability(r) => {
            let mtbf = match safe_ln(r) {
                Some(ln_r) => safe_div(-mission_time, ln_r),
                None => RATE_FALLBACK,
            };
            GoalSet { reliability: r, mtbf, failure_rate: safe_recip(mtbf) }
        }
        AllocationGoal::FailureRate(fr) => GoalSet {
            reliability: (-fr * mission_time).exp(),
            mtbf: safe_recip(fr),
            failure_rate: fr,
        },
        AllocationGoal::Mtbf(mtbf) => GoalSet {
            reliability: guarded_div(-mission_time, mtbf, 0.0).get().exp(),
            mtbf,
            failure_rate: safe_recip(mtbf),
        },
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub method: AllocationMethod,
    pub goals: GoalSet,
    pub mission_time: f64,
    pub n_included: usize,
    pub rows: Vec<AllocationRow>,
    /// Rows whose computation hit a zero denominator.
    pub degenerate: Vec<NodeId>,
}

/// Apportion `goal` over `rows` with `method` for mission time `mission_time`.
pub fn allocate(
    rows: Vec<AllocationRow>,
    goal: AllocationGoal,
    mission_time: f64,
    method: AllocationMethod,
) -> AllocationOutcome {
    let goals = calculate_goals(goal, mission_time);
    let mut rows = rows;
    for row in rows.iter_mut() {
        row.clear_computed();
    }
    let n_included = rows.iter().filter(|r| r.included).count();
    let mut degenerate = Vec::new();

    match method {
        AllocationMethod::Equal => equal(&mut rows, &goals, mission_time, n_included, &mut degenerate),
        AllocationMethod::Agree => agree(&mut rows, &goals, mission_time, n_included, &mut degenerate),
        AllocationMethod::Arinc => {
            let total: f64 = rows
                .iter()
                .filter(|r| r.included)
                .map(|r| r.current_failure_rate)
                .sum();
            let weights: Vec<f64> = rows.iter().map(|r| r.current_failure_rate).collect();
            proportional(&mut rows, &weights, total, &goals, mission_time, &mut degenerate);
            // The ARINC weight is the share FRᵢ/ΣFR itself.
            for row in rows.iter_mut().filter(|r| r.included) {
                row.weight = row.percent_weight;
            }
        }
        AllocationMethod::FeasibilityOfObjectives => {
            let weights: Vec<f64> = rows.iter().map(|r| r.factors.iter().product()).collect();
            let total: f64 = rows
                .iter()
                .zip(&weights)
                .filter(|(r, _)| r.included)
                .map(|(_, w)| *w)
                .sum();
            proportional(&mut rows, &weights, total, &goals, mission_time, &mut degenerate);
        }
    }

    for row in rows.iter_mut().filter(|r| r.included) {
        row.availability_alloc =
            guarded_div(row.mtbf_alloc, row.mtbf_alloc + row.mttr, RELIABILITY_FALLBACK).get();
    }

    if !degenerate.is_empty() {
        debug!(
            "allocation {:?} produced {} degenerate row(s)",
            method,
            degenerate.len()
        );
    }
    info!(
        "allocated {:?} goal across {} of {} children",
        method,
        n_included,
        rows.len()
    );

    AllocationOutcome { method, goals, mission_time, n_included, rows, degenerate }
}

fn equal(
    rows: &mut [AllocationRow],
    goals: &GoalSet,
    mission_time: f64,
    n_included: usize,
    degenerate: &mut Vec<NodeId>,
) {
    let weight = safe_div(1.0, n_included as f64);
    for row in rows.iter_mut().filter(|r| r.included) {
        row.weight = weight;
        row.percent_weight = weight;
        row.reliability_alloc = goals.reliability.powf(weight);
        let fr = match safe_ln(row.reliability_alloc) {
            Some(ln_r) => guarded_div(-ln_r, mission_time, RATE_FALLBACK),
            None => guarded_div(0.0, 0.0, RATE_FALLBACK),
        };
        row.failure_rate_alloc = fr.get();
        let mtbf = guarded_div(1.0, row.failure_rate_alloc, RATE_FALLBACK);
        row.mtbf_alloc = mtbf.get();
        if fr.is_fallback() || mtbf.is_fallback() {
            degenerate.push(row.entity_id);
        }
    }
}

fn agree(
    rows: &mut [AllocationRow],
    goals: &GoalSet,
    mission_time: f64,
    n_included: usize,
    degenerate: &mut Vec<NodeId>,
) {
    let ln_goal = safe_ln(goals.reliability);
    for row in rows.iter_mut().filter(|r| r.included) {
        let operating_time = mission_time * row.duty_cycle / 100.0;
        row.weight = row.importance_weight;
        let denominator = match ln_goal {
            Some(ln_r) => -row.n_sub_elements * ln_r,
            None => 0.0,
        };
        let mtbf = guarded_div(
            n_included as f64 * row.importance_weight * operating_time,
            denominator,
            RATE_FALLBACK,
        );
        row.mtbf_alloc = mtbf.get();
        let fr = guarded_div(1.0, row.mtbf_alloc, RATE_FALLBACK);
        row.failure_rate_alloc = fr.get();
        row.reliability_alloc = (-row.failure_rate_alloc * mission_time).exp();
        if mtbf.is_fallback() || fr.is_fallback() {
            degenerate.push(row.entity_id);
        }
    }
}

/// Shared tail of ARINC and FOO: weight by share of `total`, then scale the
/// target failure rate. `weight` keeps the raw input weight.
fn proportional(
    rows: &mut [AllocationRow],
    weights: &[f64],
    total: f64,
    goals: &GoalSet,
    mission_time: f64,
    degenerate: &mut Vec<NodeId>,
) {
    for (row, weight) in rows.iter_mut().zip(weights) {
        if !row.included {
            continue;
        }
        let share = guarded_div(*weight, total, 0.0);
        row.weight = *weight;
        row.percent_weight = share.get();
        row.failure_rate_alloc = share.get() * goals.failure_rate;
        let mtbf = guarded_div(1.0, row.failure_rate_alloc, RATE_FALLBACK);
        row.mtbf_alloc = mtbf.get();
        row.reliability_alloc = (-row.failure_rate_alloc * mission_time).exp();
        if share.is_fallback() || mtbf.is_fallback() {
            degenerate.push(row.entity_id);
        }
    }
}

/// Child goal produced by trickling an allocation down one level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildGoal {
    pub entity_id: NodeId,
    pub goal: AllocationGoal,
}

/// Each included child's allocated reliability becomes its own goal for the
/// next level of allocation.
pub fn trickle_down(outcome: &AllocationOutcome) -> Vec<ChildGoal> {
    outcome
        .rows
        .iter()
        .filter(|r| r.included)
        .map(|r| ChildGoal {
            entity_id: r.entity_id,
            goal: AllocationGoal::Reliability(r.reliability_alloc),
        })
        .collect()
}
