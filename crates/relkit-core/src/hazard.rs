//! Hazard analysis: hazard risk index (HRI) before and after mitigation at
//! assembly and system level, plus user-defined formula results.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::RelkitResult;
use crate::formula::{evaluate_slots, FormulaFailure, OnFailure, Scope, RESULT_SLOTS};
use crate::models::NodeId;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardInput {
    pub hazard_id: NodeId,
    pub assembly_severity: i64,
    pub assembly_probability: i64,
    pub assembly_severity_final: i64,
    pub assembly_probability_final: i64,
    pub system_severity: i64,
    pub system_probability: i64,
    pub system_severity_final: i64,
    pub system_probability_final: i64,
    pub user_float: [f64; 3],
    pub user_int: [i64; 3],
    pub formulas: [String; RESULT_SLOTS],
    pub results: [f64; RESULT_SLOTS],
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HazardResult {
    pub hazard_id: NodeId,
    pub assembly_hri: i64,
    pub assembly_hri_final: i64,
    pub system_hri: i64,
    pub system_hri_final: i64,
    pub results: [f64; RESULT_SLOTS],
    pub errors: Vec<FormulaFailure>,
}

fn hazard_scope(input: &HazardInput) -> RelkitResult<Scope> {
    let names = (1..=3)
        .map(|i| format!("uf{i}"))
        .chain((1..=3).map(|i| format!("ui{i}")))
        .chain((1..=RESULT_SLOTS).map(|i| format!("res{i}")));
    let mut scope = Scope::with_names(names);
    for (i, v) in input.user_float.iter().enumerate() {
        scope.set(&format!("uf{}", i + 1), *v)?;
    }
    for (i, v) in input.user_int.iter().enumerate() {
        scope.set(&format!("ui{}", i + 1), *v as f64)?;
    }
    Ok(scope)
}

/// HRI = probability × severity for each of the four assessments, saturating
/// at the `i64` range; a failing user formula keeps its previous result.
pub fn calculate(input: &HazardInput) -> RelkitResult<HazardResult> {
    let mut scope = hazard_scope(input)?;
    let mut results = input.results;
    let errors = evaluate_slots(&input.formulas, &mut scope, &mut results, OnFailure::KeepPrevious)?;
    let result = HazardResult {
        hazard_id: input.hazard_id,
        assembly_hri: input.assembly_probability.saturating_mul(input.assembly_severity),
        assembly_hri_final: input.assembly_probability_final.saturating_mul(input.assembly_severity_final),
        system_hri: input.system_probability.saturating_mul(input.system_severity),
        system_hri_final: input.system_probability_final.saturating_mul(input.system_severity_final),
        results,
        errors,
    };
    debug!(
        "hazard {}: assembly HRI {} -> {}, system HRI {} -> {}",
        result.hazard_id,
        result.assembly_hri,
        result.assembly_hri_final,
        result.system_hri,
        result.system_hri_final
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hri_products() {
        let input = HazardInput {
            hazard_id: NodeId(1),
            assembly_severity: 4,
            assembly_probability: 3,
            assembly_severity_final: 2,
            assembly_probability_final: 1,
            system_severity: 5,
            system_probability: 2,
            system_severity_final: 5,
            system_probability_final: 1,
            ..HazardInput::default()
        };
        let result = calculate(&input).unwrap();
        assert_eq!(result.assembly_hri, 12);
        assert_eq!(result.assembly_hri_final, 2);
        assert_eq!(result.system_hri, 10);
        assert_eq!(result.system_hri_final, 5);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_hri_saturates_on_overflow() {
        let input = HazardInput {
            assembly_severity: i64::MAX,
            assembly_probability: 2,
            system_severity: i64::MIN,
            system_probability: 3,
            system_severity_final: 3,
            system_probability_final: 4,
            ..HazardInput::default()
        };
        let result = calculate(&input).unwrap();
        assert_eq!(result.assembly_hri, i64::MAX);
        assert_eq!(result.system_hri, i64::MIN);
        assert_eq!(result.system_hri_final, 12);
    }

    #[test]
    fn test_failed_formula_keeps_previous_result() {
        let mut input = HazardInput::default();
        input.user_float = [1.5, 0.0, 0.0];
        input.user_int = [2, 0, 0];
        input.formulas[0] = "uf1 * ui1".into();
        input.formulas[1] = "hr * 2".into();
        input.results[1] = 42.0;
        let result = calculate(&input).unwrap();
        assert_eq!(result.results[0], 3.0);
        assert_eq!(result.results[1], 42.0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "invalid_formula");
    }
}
