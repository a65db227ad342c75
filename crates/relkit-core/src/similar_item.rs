//! Similar-item analysis: scale a known item's hazard rate to a new design
//! by conversion tables or by user-defined formulas.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::RelkitResult;
use crate::formula::{evaluate_slots, FormulaFailure, OnFailure, Scope, RESULT_SLOTS};
use crate::models::NodeId;

/// Quality conversion factors, `QUALITY[from - 1][to - 1]`.
const QUALITY: [[f64; 4]; 4] = [
    [1.0, 0.8, 0.5, 0.2],
    [1.3, 1.0, 0.6, 0.3],
    [2.0, 1.7, 1.0, 0.4],
    [5.0, 3.3, 2.5, 1.0],
];

/// Environment conversion factors, `ENVIRONMENT[from - 1][to - 1]`.
const ENVIRONMENT: [[f64; 6]; 6] = [
    [1.0, 0.2, 0.3, 0.3, 0.1, 1.1],
    [5.0, 1.0, 1.4, 1.4, 0.5, 5.0],
    [3.3, 0.7, 1.0, 1.0, 0.3, 3.3],
    [3.3, 0.7, 1.0, 1.0, 0.3, 3.3],
    [10.0, 2.0, 3.3, 3.3, 1.0, 10.0],
    [0.9, 0.2, 0.3, 0.3, 0.1, 1.0],
];

/// Temperature conversion factors for 10..=70 °C in steps of 10.
const TEMPERATURE: [[f64; 7]; 7] = [
    [1.0, 0.9, 0.8, 0.8, 0.7, 0.5, 0.4],
    [1.1, 1.0, 0.9, 0.8, 0.7, 0.6, 0.5],
    [1.2, 1.1, 1.0, 0.9, 0.8, 0.6, 0.5],
    [1.3, 1.2, 1.1, 1.0, 0.9, 0.7, 0.6],
    [1.5, 1.4, 1.2, 1.1, 1.0, 0.8, 0.7],
    [1.9, 1.7, 1.6, 1.5, 1.2, 1.0, 0.8],
    [2.4, 2.2, 1.9, 1.8, 1.5, 1.2, 1.0],
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarItemMethod {
    #[default]
    Topic633,
    UserDefined,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarItemInput {
    pub hardware_id: NodeId,
    pub method: SimilarItemMethod,
    /// Hazard rate of the existing item.
    pub hazard_rate: f64,
    pub quality_from: u32,
    pub quality_to: u32,
    pub environment_from: u32,
    pub environment_to: u32,
    pub temperature_from: f64,
    pub temperature_to: f64,
    pub pi: [f64; 10],
    pub user_float: [f64; 5],
    pub user_int: [i64; 5],
    pub formulas: [String; RESULT_SLOTS],
    /// Prior results, visible to the formulas as `res1`..`res5`.
    pub results: [f64; RESULT_SLOTS],
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarItemResult {
    pub hardware_id: NodeId,
    pub method: SimilarItemMethod,
    /// Quality, environment and temperature factors (topic 633 only).
    pub change_factors: [f64; 3],
    /// Conversions with no table entry; each one used factor 1.0.
    pub missing_factors: Vec<String>,
    pub results: [f64; RESULT_SLOTS],
    pub errors: Vec<FormulaFailure>,
}

fn table_entry<const N: usize>(table: &[[f64; N]; N], from: u32, to: u32) -> Option<f64> {
    let row = table.get((from as usize).checked_sub(1)?)?;
    row.get((to as usize).checked_sub(1)?).copied()
}

/// Round to the nearest 10 °C and map 10..=70 onto a table index.
fn temperature_index(celsius: f64) -> Option<u32> {
    let rounded = (celsius / 10.0).round() * 10.0;
    (10.0..=70.0).contains(&rounded).then(|| (rounded / 10.0) as u32)
}

/// Topic 633: `hr / (cf_quality · cf_environment · cf_temperature)`.
pub fn topic_633(input: &SimilarItemInput) -> SimilarItemResult {
    let mut missing = Vec::new();
    let mut factor = |name: &str, found: Option<f64>| {
        found.unwrap_or_else(|| {
            missing.push(name.to_string());
            1.0
        })
    };
    let quality = factor("quality", table_entry(&QUALITY, input.quality_from, input.quality_to));
    let environment = factor(
        "environment",
        table_entry(&ENVIRONMENT, input.environment_from, input.environment_to),
    );
    let temperature = factor(
        "temperature",
        temperature_index(input.temperature_from)
            .zip(temperature_index(input.temperature_to))
            .and_then(|(from, to)| table_entry(&TEMPERATURE, from, to)),
    );
    if !missing.is_empty() {
        debug!("hardware {}: no conversion for {missing:?}, using 1.0", input.hardware_id);
    }

    let product = quality * environment * temperature;
    let mut results = input.results;
    results[0] = if product == 0.0 { 0.0 } else { input.hazard_rate / product };
    SimilarItemResult {
        hardware_id: input.hardware_id,
        method: SimilarItemMethod::Topic633,
        change_factors: [quality, environment, temperature],
        missing_factors: missing,
        results,
        errors: Vec::new(),
    }
}

/// The variables user-defined similar-item formulas may read.
pub fn similar_item_scope(input: &SimilarItemInput) -> RelkitResult<Scope> {
    let names = std::iter::once("hr".to_string())
        .chain((1..=10).map(|i| format!("pi{i}")))
        .chain((1..=5).map(|i| format!("uf{i}")))
        .chain((1..=5).map(|i| format!("ui{i}")))
        .chain((1..=RESULT_SLOTS).map(|i| format!("res{i}")));
    let mut scope = Scope::with_names(names);
    scope.set("hr", input.hazard_rate)?;
    for (i, v) in input.pi.iter().enumerate() {
        scope.set(&format!("pi{}", i + 1), *v)?;
    }
    for (i, v) in input.user_float.iter().enumerate() {
        scope.set(&format!("uf{}", i + 1), *v)?;
    }
    for (i, v) in input.user_int.iter().enumerate() {
        scope.set(&format!("ui{}", i + 1), *v as f64)?;
    }
    Ok(scope)
}

/// Evaluate the five formulas in order. A failing formula yields 0.0 and is
/// recorded in `errors`.
pub fn user_defined(input: &SimilarItemInput) -> RelkitResult<SimilarItemResult> {
    let mut scope = similar_item_scope(input)?;
    let mut results = input.results;
    let errors = evaluate_slots(&input.formulas, &mut scope, &mut results, OnFailure::Zero)?;
    Ok(SimilarItemResult {
        hardware_id: input.hardware_id,
        method: SimilarItemMethod::UserDefined,
        change_factors: [1.0; 3],
        missing_factors: Vec::new(),
        results,
        errors,
    })
}

pub fn calculate(input: &SimilarItemInput) -> RelkitResult<SimilarItemResult> {
    match input.method {
        SimilarItemMethod::Topic633 => Ok(topic_633(input)),
        SimilarItemMethod::UserDefined => user_defined(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> SimilarItemInput {
        SimilarItemInput {
            hardware_id: NodeId(7),
            hazard_rate: 0.004,
            quality_from: 1,
            quality_to: 2,
            environment_from: 3,
            environment_to: 5,
            temperature_from: 32.0,
            temperature_to: 48.0,
            ..SimilarItemInput::default()
        }
    }

    #[test]
    fn test_topic_633_tables() {
        let result = topic_633(&input());
        // quality 0.8, environment 0.3, temperature (30 -> 50) 0.8.
        assert_eq!(result.change_factors, [0.8, 0.3, 0.8]);
        assert!((result.results[0] - 0.004 / (0.8 * 0.3 * 0.8)).abs() < 1e-15);
        assert!(result.missing_factors.is_empty());
    }

    #[test]
    fn test_topic_633_missing_entry_uses_unity() {
        let mut i = input();
        i.quality_to = 9;
        i.temperature_to = 95.0;
        let result = topic_633(&i);
        assert_eq!(result.change_factors, [1.0, 0.3, 1.0]);
        assert_eq!(result.missing_factors, vec!["quality", "temperature"]);
        assert!((result.results[0] - 0.004 / 0.3).abs() < 1e-15);
    }

    #[test]
    fn test_temperature_rounding() {
        assert_eq!(temperature_index(14.9), Some(1));
        assert_eq!(temperature_index(65.0), Some(7));
        assert_eq!(temperature_index(4.0), None);
        assert_eq!(temperature_index(76.0), None);
    }

    #[test]
    fn test_user_defined_formulas() {
        let mut i = input();
        i.method = SimilarItemMethod::UserDefined;
        i.pi[0] = 2.0;
        i.user_int[1] = 3;
        i.formulas[0] = "hr * pi1".into();
        i.formulas[1] = "res1 / ui2".into();
        i.formulas[2] = "os.system(1)".into();
        i.results[2] = 5.0;
        let result = calculate(&i).unwrap();
        assert!((result.results[0] - 0.008).abs() < 1e-15);
        assert!((result.results[1] - 0.008 / 3.0).abs() < 1e-15);
        assert_eq!(result.results[2], 0.0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].slot, 3);
    }
}
