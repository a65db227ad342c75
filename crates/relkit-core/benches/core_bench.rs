//! Criterion benchmarks for relkit-core.
//!
//! Everything here calls the pure Rust API; no Python runtime is needed.
//!
//! ## Benchmark groups
//!
//! 1. **allocation**: The four apportionment methods over wide rows.
//! 2. **criticality**: Row criticality and item totals.
//! 3. **nonparametric**: MCF and Kaplan-Meier tables.
//! 4. **parametric**: Exponential / Weibull fits by MLE and rank regression.
//! 5. **growth**: Power-law and loglinear growth curves, Crow-AMSAA assessment.
//! 6. **formula**: Parse + evaluate of user-defined formulas.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/relkit-core/Cargo.toml
//! # Run only the parametric group:
//! cargo bench --manifest-path crates/relkit-core/Cargo.toml -- parametric
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use _relkit_core::allocation::{allocate, AllocationGoal, AllocationMethod};
use _relkit_core::config::{AnalysisConfig, SeverityPolicy};
use _relkit_core::criticality::calculate;
use _relkit_core::formula::{evaluate, Formula, Scope};
use _relkit_core::models::{
    AllocationRow, CensorStatus, CriticalityRow, Distribution, FailureRecord, FitMethod, NodeId,
};
use _relkit_core::survival::growth::{
    crow_amsaa_assessment, loglinear, power_law, GrowthObservation, TestTermination,
};
use _relkit_core::survival::kaplan_meier::kaplan_meier;
use _relkit_core::survival::mcf::mean_cumulative_function;
use _relkit_core::survival::parametric::fit;
use _relkit_core::survival::SurvivalDataset;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `n` allocation rows with spread-out inputs so no method degenerates.
fn allocation_rows(n: usize) -> Vec<AllocationRow> {
    (1..=n as u64)
        .map(|i| {
            let mut row = AllocationRow::new(NodeId(i));
            row.n_sub_elements = (i % 7 + 1) as f64;
            row.importance_weight = 0.5 + (i % 5) as f64 * 0.1;
            row.duty_cycle = 50.0 + (i % 50) as f64;
            row.current_failure_rate = 1e-6 * (i % 11 + 1) as f64;
            row.factors = [
                (i % 10 + 1) as f64,
                (i % 9 + 1) as f64,
                (i % 8 + 1) as f64,
                (i % 7 + 1) as f64,
            ];
            row
        })
        .collect()
}

fn criticality_rows(n: usize) -> Vec<CriticalityRow> {
    (1..=n as u64)
        .map(|i| CriticalityRow {
            cause_id: NodeId(1000 + i),
            mode_id: NodeId(i / 3 + 1),
            mode_ratio: Some(0.1 + (i % 9) as f64 * 0.1),
            operating_time: Some(100.0 + i as f64),
            effect_probability: Some(0.5),
            severity_class: ["I", "II", "III", "IV"][(i % 4) as usize].to_string(),
            rpn_severity: (i % 10 + 1) as i64,
            rpn_occurrence: (i % 9 + 1) as i64,
            rpn_detection: (i % 8 + 1) as i64,
            rpn_severity_new: (i % 5 + 1) as i64,
            rpn_occurrence_new: (i % 4 + 1) as i64,
            rpn_detection_new: (i % 3 + 1) as i64,
            mode_criticality: 0.0,
            rpn: 0,
            rpn_new: 0,
        })
        .collect()
}

/// Deterministic Weibull(β=1.8, η=500) sample via inverse CDF on a grid,
/// every fifth unit right-censored.
fn life_records(n: usize) -> Vec<FailureRecord> {
    (0..n)
        .map(|i| {
            let p = (i as f64 + 0.5) / n as f64;
            let t = 500.0 * (-(1.0 - p).ln()).powf(1.0 / 1.8);
            let status = if i % 5 == 4 { CensorStatus::RightCensored } else { CensorStatus::Event };
            FailureRecord::new(format!("U{i}"), 0.0, t, status, 1).unwrap()
        })
        .collect()
}

/// Recurrent failures on a handful of units.
fn repair_records(units: usize, per_unit: usize) -> Vec<FailureRecord> {
    let mut records = Vec::with_capacity(units * (per_unit + 1));
    for u in 0..units {
        let mut t = 0.0;
        for k in 0..per_unit {
            t += 10.0 + ((u * 31 + k * 17) % 23) as f64;
            records.push(FailureRecord::event(format!("S{u}"), t).unwrap());
        }
        records.push(FailureRecord::suspension(format!("S{u}"), t + 15.0).unwrap());
    }
    records
}

fn growth_observations(n: usize) -> Vec<GrowthObservation> {
    (1..=n)
        .map(|i| GrowthObservation {
            failures: (i % 3 + 1) as u32,
            cumulative_time: 100.0 * (i as f64).powf(1.6),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    let rows = allocation_rows(200);
    let methods = [
        AllocationMethod::Equal,
        AllocationMethod::Agree,
        AllocationMethod::Arinc,
        AllocationMethod::FeasibilityOfObjectives,
    ];
    for method in methods {
        group.bench_with_input(BenchmarkId::new("allocate_200", format!("{method:?}")), &method, |b, &m| {
            b.iter(|| {
                allocate(
                    black_box(rows.clone()),
                    AllocationGoal::Reliability(0.95),
                    black_box(100.0),
                    m,
                )
            })
        });
    }
    group.finish();
}

fn bench_criticality(c: &mut Criterion) {
    let mut group = c.benchmark_group("criticality");
    let policy = SeverityPolicy::default();
    for n in [50usize, 500] {
        let rows = criticality_rows(n);
        group.bench_with_input(BenchmarkId::new("calculate", n), &rows, |b, rows| {
            b.iter(|| calculate(black_box(rows.clone()), 1e-5, &policy))
        });
    }
    group.finish();
}

fn bench_nonparametric(c: &mut Criterion) {
    let mut group = c.benchmark_group("nonparametric");
    let repairs = SurvivalDataset::new(repair_records(20, 25)).unwrap();
    let lives = SurvivalDataset::new(life_records(500)).unwrap();
    group.bench_function("mcf_20x25", |b| {
        b.iter(|| mean_cumulative_function(black_box(&repairs), 1.96).unwrap())
    });
    group.bench_function("kaplan_meier_500", |b| {
        b.iter(|| kaplan_meier(black_box(&lives), 1.96).unwrap())
    });
    group.finish();
}

fn bench_parametric(c: &mut Criterion) {
    let mut group = c.benchmark_group("parametric");
    let config = AnalysisConfig::default();
    let dataset = SurvivalDataset::new(life_records(100)).unwrap();
    let cases = [
        (Distribution::Exponential, FitMethod::Mle),
        (Distribution::Weibull, FitMethod::Mle),
        (Distribution::Weibull, FitMethod::RankRegression),
        (Distribution::Lognormal, FitMethod::Mle),
    ];
    for (distribution, method) in cases {
        let id = format!("{distribution:?}_{method:?}");
        group.bench_function(id, |b| {
            b.iter(|| fit(black_box(&dataset), distribution, method, &config).unwrap())
        });
    }
    group.finish();
}

fn bench_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("growth");
    let config = AnalysisConfig::default();
    let observations = growth_observations(30);
    group.bench_function("crow_amsaa_30", |b| {
        b.iter(|| power_law(black_box(&observations), FitMethod::Mle, &config).unwrap())
    });
    group.bench_function("duane_30", |b| {
        b.iter(|| power_law(black_box(&observations), FitMethod::RankRegression, &config).unwrap())
    });
    group.bench_function("loglinear_30", |b| {
        b.iter(|| loglinear(black_box(&observations), &config).unwrap())
    });
    group.bench_function("crow_amsaa_grouped_30", |b| {
        b.iter(|| {
            crow_amsaa_assessment(black_box(&observations), true, TestTermination::Time, &config).unwrap()
        })
    });
    group.finish();
}

fn bench_formula(c: &mut Criterion) {
    let mut group = c.benchmark_group("formula");
    let mut scope = Scope::with_names(["hr", "pi1", "pi2", "uf1", "res1"]);
    scope.set("hr", 2.5e-6).unwrap();
    scope.set("pi1", 1.4).unwrap();
    scope.set("pi2", 0.8).unwrap();
    scope.set("uf1", 40.0).unwrap();
    let source = "hr * pi1 * pi2 * exp(-(uf1 - 25) / 10) + max(res1, 0)";

    group.bench_function("parse_and_evaluate", |b| {
        b.iter(|| evaluate(black_box(source), &scope).unwrap())
    });
    let parsed = Formula::parse(source).unwrap();
    group.bench_function("evaluate_parsed", |b| {
        b.iter(|| parsed.evaluate(black_box(&scope)).unwrap())
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Register all benchmark groups
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_allocation,
    bench_criticality,
    bench_nonparametric,
    bench_parametric,
    bench_growth,
    bench_formula,
);
criterion_main!(benches);
