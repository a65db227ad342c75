//! FMEA criticality and risk priority numbers.
//!
//! Rows are processed independently: a row with missing or out-of-range
//! inputs is reported in `failures` and skipped in the roll-up, while the
//! rest of the item is still computed.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SeverityPolicy;
use crate::errors::{RelkitError, RelkitResult};
use crate::guards::clamp_rpn_score;
use crate::hierarchy::Hierarchy;
use crate::models::{CriticalityRow, HierarchyNode, Level, NodeId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    pub cause_id: NodeId,
    pub code: String,
    pub message: String,
}

impl RowFailure {
    fn new(cause_id: NodeId, err: &RelkitError) -> Self {
        Self { cause_id, code: err.code().to_string(), message: err.to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriticalityReport {
    pub item_id: Option<NodeId>,
    pub item_failure_rate: f64,
    pub rows: Vec<CriticalityRow>,
    pub mode_criticality: IndexMap<NodeId, f64>,
    pub criticality_by_class: IndexMap<String, f64>,
    pub item_criticality: f64,
    pub category: String,
    pub failures: Vec<RowFailure>,
}

/// `severity * occurrence * detection` with each score clamped to [1, 10].
pub fn rpn(severity: i64, occurrence: i64, detection: i64) -> i64 {
    clamp_rpn_score(severity) * clamp_rpn_score(occurrence) * clamp_rpn_score(detection)
}

fn required(value: Option<f64>, name: &str, cause_id: NodeId) -> RelkitResult<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(RelkitError::MissingData(format!("cause {cause_id}: {name} is missing"))),
    }
}

fn unit_interval(value: f64, name: &str, cause_id: NodeId) -> RelkitResult<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(RelkitError::MissingData(format!(
            "cause {cause_id}: {name} = {value} is outside [0, 1]"
        )))
    }
}

/// Criticality contribution of one cause row.
pub fn row_criticality(row: &CriticalityRow, item_failure_rate: f64) -> RelkitResult<f64> {
    let ratio = unit_interval(
        required(row.mode_ratio, "mode_ratio", row.cause_id)?,
        "mode_ratio",
        row.cause_id,
    )?;
    let time = required(row.operating_time, "operating_time", row.cause_id)?;
    if time < 0.0 {
        return Err(RelkitError::MissingData(format!(
            "cause {}: operating_time = {time} is negative",
            row.cause_id
        )));
    }
    let probability = unit_interval(
        required(row.effect_probability, "effect_probability", row.cause_id)?,
        "effect_probability",
        row.cause_id,
    )?;
    Ok(ratio * time * probability * item_failure_rate)
}

pub fn calculate(
    rows: Vec<CriticalityRow>,
    item_failure_rate: f64,
    policy: &SeverityPolicy,
) -> CriticalityReport {
    let mut rows = rows;
    let mut failures = Vec::new();
    let mut mode_criticality: IndexMap<NodeId, f64> = IndexMap::new();
    let mut criticality_by_class: IndexMap<String, f64> = IndexMap::new();

    for row in rows.iter_mut() {
        row.rpn = rpn(row.rpn_severity, row.rpn_occurrence, row.rpn_detection);
        row.rpn_new = rpn(row.rpn_severity_new, row.rpn_occurrence_new, row.rpn_detection_new);
        match row_criticality(row, item_failure_rate) {
            Ok(value) => {
                row.mode_criticality = value;
                *mode_criticality.entry(row.mode_id).or_insert(0.0) += value;
                *criticality_by_class.entry(row.severity_class.clone()).or_insert(0.0) += value;
            }
            Err(err) => {
                warn!("criticality skipped for cause {}: {}", row.cause_id, err);
                row.mode_criticality = 0.0;
                failures.push(RowFailure::new(row.cause_id, &err));
            }
        }
    }

    let item_criticality: f64 = mode_criticality.values().sum();
    let category = policy.classify(item_criticality).to_string();
    CriticalityReport {
        item_id: None,
        item_failure_rate,
        rows,
        mode_criticality,
        criticality_by_class,
        item_criticality,
        category,
        failures,
    }
}

// ---------------------------------------------------------------------------
// Hierarchy integration
// ---------------------------------------------------------------------------

fn int_attr(node: &HierarchyNode, key: &str) -> RelkitResult<i64> {
    node.number(key).map(|v| v.round() as i64)
}

/// Criticality inputs live on the cause; a value absent there is inherited
/// from the owning mode.
fn inherited(cause: &HierarchyNode, mode: &HierarchyNode, key: &str) -> Option<f64> {
    cause.number(key).or_else(|_| mode.number(key)).ok()
}

fn build_row(mode: &HierarchyNode, cause: &HierarchyNode) -> RelkitResult<CriticalityRow> {
    Ok(CriticalityRow {
        cause_id: cause.id,
        mode_id: mode.id,
        mode_ratio: inherited(cause, mode, "mode_ratio"),
        operating_time: inherited(cause, mode, "operating_time"),
        effect_probability: inherited(cause, mode, "effect_probability"),
        severity_class: mode.text("severity_class").unwrap_or_default().to_string(),
        rpn_severity: int_attr(mode, "rpn_severity")?,
        rpn_occurrence: int_attr(cause, "rpn_occurrence")?,
        rpn_detection: int_attr(cause, "rpn_detection")?,
        rpn_severity_new: int_attr(mode, "rpn_severity_new")?,
        rpn_occurrence_new: int_attr(cause, "rpn_occurrence_new")?,
        rpn_detection_new: int_attr(cause, "rpn_detection_new")?,
        mode_criticality: 0.0,
        rpn: 0,
        rpn_new: 0,
    })
}

/// Collect one row per cause below `item_id`: mode -> mechanism -> cause, or
/// mode -> cause when the mode has no mechanisms.
pub fn rows_from_hierarchy(
    tree: &Hierarchy,
    item_id: NodeId,
) -> RelkitResult<(Vec<CriticalityRow>, Vec<RowFailure>)> {
    let mut rows = Vec::new();
    let mut failures = Vec::new();
    for mode_id in tree.descendants(item_id)? {
        let mode = tree.get(mode_id)?;
        if mode.level != Level::Mode {
            continue;
        }
        let mut causes = Vec::new();
        for child in tree.children(mode_id)? {
            match child.level {
                Level::Cause => causes.push(child),
                Level::Mechanism => causes.extend(
                    tree.children(child.id)?
                        .into_iter()
                        .filter(|n| n.level == Level::Cause),
                ),
                _ => {}
            }
        }
        for cause in causes {
            match build_row(mode, cause) {
                Ok(row) => rows.push(row),
                Err(err) => {
                    warn!("cause {} skipped: {}", cause.id, err);
                    failures.push(RowFailure::new(cause.id, &err));
                }
            }
        }
    }
    Ok((rows, failures))
}

/// Analyse every failure mode below `item_id`.
pub fn analyze_item(
    tree: &Hierarchy,
    item_id: NodeId,
    item_failure_rate: f64,
    policy: &SeverityPolicy,
) -> RelkitResult<CriticalityReport> {
    let (rows, mut failures) = rows_from_hierarchy(tree, item_id)?;
    let mut report = calculate(rows, item_failure_rate, policy);
    failures.append(&mut report.failures);
    report.failures = failures;
    report.item_id = Some(item_id);
    info!(
        "item {} criticality {:.6e} ({}) with {} failed row(s)",
        item_id,
        report.item_criticality,
        report.category,
        report.failures.len()
    );
    Ok(report)
}

/// Store computed values back onto cause, mode and item nodes.
pub fn write_back(tree: &mut Hierarchy, report: &CriticalityReport) -> RelkitResult<()> {
    for row in &report.rows {
        let failed = report.failures.iter().any(|f| f.cause_id == row.cause_id);
        let cause = tree.get_mut(row.cause_id)?;
        cause.set("rpn", row.rpn as f64);
        cause.set("rpn_new", row.rpn_new as f64);
        if !failed {
            cause.set("mode_criticality", row.mode_criticality);
        }
    }
    for (mode_id, value) in &report.mode_criticality {
        tree.set_attribute(*mode_id, "mode_criticality", *value)?;
    }
    if let Some(item_id) = report.item_id {
        tree.set_attribute(item_id, "item_criticality", report.item_criticality)?;
        tree.set_attribute(item_id, "criticality_category", report.category.as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use proptest::prelude::*;

    use super::*;
    use crate::hierarchy::IdSequence;
    use crate::models::AttributeValue;

    fn row(cause: u64, mode: u64, class: &str) -> CriticalityRow {
        CriticalityRow {
            cause_id: NodeId(cause),
            mode_id: NodeId(mode),
            mode_ratio: Some(0.5),
            operating_time: Some(10.0),
            effect_probability: Some(1.0),
            severity_class: class.to_string(),
            rpn_severity: 7,
            rpn_occurrence: 4,
            rpn_detection: 3,
            rpn_severity_new: 7,
            rpn_occurrence_new: 2,
            rpn_detection_new: 2,
            mode_criticality: 0.0,
            rpn: 0,
            rpn_new: 0,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn test_mode_criticality_reference_value() {
        let report = calculate(vec![row(10, 1, "IV")], 0.000617, &SeverityPolicy::default());
        assert!(close(report.rows[0].mode_criticality, 0.003085));
        assert!(close(report.mode_criticality[&NodeId(1)], 0.003085));
        assert!(close(report.criticality_by_class["IV"], 0.003085));
        assert_eq!(report.category, "critical");
    }

    #[test]
    fn test_rpn_and_rpn_new() {
        let report = calculate(vec![row(10, 1, "I")], 1e-6, &SeverityPolicy::default());
        assert_eq!(report.rows[0].rpn, 84);
        assert_eq!(report.rows[0].rpn_new, 28);
    }

    #[test]
    fn test_rpn_scores_are_clamped() {
        assert_eq!(rpn(0, 0, 0), 1);
        assert_eq!(rpn(11, 12, 99), 1000);
        assert_eq!(rpn(-3, 5, 10), 50);
    }

    proptest! {
        #[test]
        fn test_rpn_always_in_range(s in -50i64..50, o in -50i64..50, d in -50i64..50) {
            let value = rpn(s, o, d);
            prop_assert!((1..=1000).contains(&value));
        }
    }

    #[test]
    fn test_modes_sum_causes_and_classes_roll_up() {
        let rows = vec![row(10, 1, "I"), row(11, 1, "I"), row(20, 2, "III")];
        let report = calculate(rows, 1e-4, &SeverityPolicy::default());
        assert!(close(report.mode_criticality[&NodeId(1)], 2.0 * 5e-4));
        assert!(close(report.mode_criticality[&NodeId(2)], 5e-4));
        assert!(close(report.criticality_by_class["I"], 1e-3));
        assert!(close(report.item_criticality, 1.5e-3));
    }

    #[test]
    fn test_missing_row_does_not_abort_batch() {
        let mut bad = row(11, 1, "I");
        bad.operating_time = None;
        let mut out_of_range = row(12, 1, "I");
        out_of_range.mode_ratio = Some(1.5);
        let report = calculate(vec![row(10, 1, "I"), bad, out_of_range], 1e-4, &SeverityPolicy::default());
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.code == "missing_data"));
        assert!(close(report.item_criticality, 5e-4));
        // RPN still computed for the failed rows.
        assert_eq!(report.rows[1].rpn, 84);
    }

    fn attrs(pairs: &[(&str, AttributeValue)]) -> IndexMap<String, AttributeValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn fmea_tree() -> (Hierarchy, NodeId, NodeId, NodeId, NodeId) {
        let mut ids = IdSequence::new();
        let mut tree = Hierarchy::new();
        let n = AttributeValue::Number;
        let item = tree.insert(None, Level::System, attrs(&[]), &mut ids).unwrap();
        let assembly = tree.insert(Some(item), Level::Assembly, attrs(&[]), &mut ids).unwrap();
        let mode = tree
            .insert(
                Some(assembly),
                Level::Mode,
                attrs(&[
                    ("severity_class", "II".into()),
                    ("rpn_severity", n(8.0)),
                    ("rpn_severity_new", n(6.0)),
                    ("mode_ratio", n(0.25)),
                ]),
                &mut ids,
            )
            .unwrap();
        let mechanism = tree.insert(Some(mode), Level::Mechanism, attrs(&[]), &mut ids).unwrap();
        let cause = tree
            .insert(
                Some(mechanism),
                Level::Cause,
                attrs(&[
                    ("operating_time", n(100.0)),
                    ("effect_probability", n(0.5)),
                    ("rpn_occurrence", n(5.0)),
                    ("rpn_detection", n(2.0)),
                    ("rpn_occurrence_new", n(3.0)),
                    ("rpn_detection_new", n(2.0)),
                ]),
                &mut ids,
            )
            .unwrap();
        let broken = tree
            .insert(
                Some(mode),
                Level::Cause,
                attrs(&[("operating_time", "n/a".into()), ("rpn_occurrence", n(1.0))]),
                &mut ids,
            )
            .unwrap();
        (tree, assembly, mode, cause, broken)
    }

    #[test]
    fn test_analyze_item_from_hierarchy() {
        let (mut tree, assembly, mode, cause, broken) = fmea_tree();
        let report = analyze_item(&tree, assembly, 2e-5, &SeverityPolicy::default()).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].cause_id, broken);
        assert_eq!(report.rows[0].rpn, 80);
        assert_eq!(report.rows[0].rpn_new, 36);
        let expected = 0.25 * 100.0 * 0.5 * 2e-5;
        assert!(close(report.item_criticality, expected));

        write_back(&mut tree, &report).unwrap();
        assert!(close(tree.get(mode).unwrap().number("mode_criticality").unwrap(), expected));
        assert_eq!(tree.get(cause).unwrap().number("rpn").unwrap(), 80.0);
        assert_eq!(
            tree.get(assembly).unwrap().text("criticality_category"),
            Some("critical")
        );
    }

    #[test]
    fn test_analyze_unknown_item() {
        let (tree, ..) = fmea_tree();
        let err = analyze_item(&tree, NodeId(999), 1e-5, &SeverityPolicy::default()).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
