//! PyO3 bindings for the `_relkit_core` extension module.
//!
//! Payloads cross the boundary as plain dicts/lists: they are serialized with
//! the Python `json` module, decoded into the typed Rust records, and results
//! come back the same way.

use indexmap::IndexMap;
use parking_lot::Mutex;
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::allocation::{self, AllocationGoal, AllocationMethod, AllocationOutcome};
use crate::config::{AnalysisConfig, SeverityPolicy};
use crate::criticality;
use crate::errors::{RelkitError, RelkitResult};
use crate::formula::{self, Scope};
use crate::hazard::{self, HazardInput};
use crate::hierarchy::{Hierarchy, IdSequence};
use crate::matrix::{HeaderEntity, MatrixKind, RelationshipMatrix};
use crate::models::{
    AllocationRow, AttributeValue, CellValue, CriticalityRow, FailureRecord, HierarchyNode, Level,
    MatrixCell, NodeId,
};
use crate::similar_item::{self, SimilarItemInput};
use crate::survival::growth::{GrowthModel, GrowthObservation, TestTermination};
use crate::survival::{SurvivalAnalysisEngine, SurvivalDataset};

// ---------------------------------------------------------------------------
// JSON bridging
// ---------------------------------------------------------------------------

fn dumps(obj: &Bound<'_, PyAny>) -> PyResult<String> {
    let py = obj.py();
    py.import("json")?.call_method1("dumps", (obj,))?.extract()
}

fn from_py<T: DeserializeOwned>(obj: &Bound<'_, PyAny>) -> PyResult<T> {
    let payload = dumps(obj)?;
    serde_json::from_str(&payload).map_err(|e| PyErr::from(RelkitError::from(e)))
}

fn to_py<T: Serialize + ?Sized>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let json_str =
        serde_json::to_string(value).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    let json_module = py.import("json")?;
    json_module
        .call_method1("loads", (json_str,))
        .map(|o| o.into())
}

/// Decode a unit-variant enum from its snake_case name.
fn enum_from_str<T: DeserializeOwned>(token: &str) -> RelkitResult<T> {
    Ok(serde_json::from_value(Value::String(token.trim().to_ascii_lowercase()))?)
}

/// Explicit config wins; otherwise defaults with `RELKIT_*` overrides.
fn load_config(config: Option<&Bound<'_, PyAny>>) -> PyResult<AnalysisConfig> {
    match config {
        Some(obj) => Ok(AnalysisConfig::from_json_str(&dumps(obj)?)?),
        None => Ok(AnalysisConfig::default().with_env_overrides()?),
    }
}

/// Accepts a method name (`"arinc"`) or a legacy numeric code (`3`).
fn method_from_value(value: &Value) -> RelkitResult<AllocationMethod> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(code) => AllocationMethod::from_code(code),
            None => Err(RelkitError::InvalidMethod(format!("allocation method code {n}"))),
        },
        Value::String(s) => s.parse(),
        other => Err(RelkitError::InvalidMethod(format!("allocation method {other}"))),
    }
}

fn attribute_from_py(value: &Bound<'_, PyAny>) -> PyResult<AttributeValue> {
    if let Ok(number) = value.extract::<f64>() {
        return Ok(AttributeValue::Number(number));
    }
    Ok(AttributeValue::Text(value.extract::<String>()?))
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AllocationRequest {
    rows: Vec<AllocationRow>,
    goal: AllocationGoal,
    mission_time: f64,
    method: Value,
}

/// `goal` is `{"measure": "reliability" | "mtbf" | "failure_rate", "value": x}`.
#[pyfunction]
pub fn calculate_goals(py: Python<'_>, goal: &Bound<'_, PyDict>, mission_time: f64) -> PyResult<PyObject> {
    let goal: AllocationGoal = from_py(goal.as_any())?;
    to_py(py, &allocation::calculate_goals(goal, mission_time))
}

#[pyfunction]
pub fn allocate(py: Python<'_>, payload: &Bound<'_, PyDict>) -> PyResult<PyObject> {
    let request: AllocationRequest = from_py(payload.as_any())?;
    let method = method_from_value(&request.method)?;
    let outcome = allocation::allocate(request.rows, request.goal, request.mission_time, method);
    to_py(py, &outcome)
}

/// Takes an outcome as returned by `allocate`.
#[pyfunction]
pub fn trickle_down(py: Python<'_>, outcome: &Bound<'_, PyDict>) -> PyResult<PyObject> {
    let outcome: AllocationOutcome = from_py(outcome.as_any())?;
    to_py(py, &allocation::trickle_down(&outcome))
}

// ---------------------------------------------------------------------------
// Criticality
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CriticalityRequest {
    rows: Vec<CriticalityRow>,
    item_failure_rate: f64,
    #[serde(default)]
    severity_policy: SeverityPolicy,
}

#[pyfunction]
pub fn calculate_criticality(py: Python<'_>, payload: &Bound<'_, PyDict>) -> PyResult<PyObject> {
    let request: CriticalityRequest = from_py(payload.as_any())?;
    let report = criticality::calculate(request.rows, request.item_failure_rate, &request.severity_policy);
    to_py(py, &report)
}

#[pyfunction]
pub fn rpn(severity: i64, occurrence: i64, detection: i64) -> i64 {
    criticality::rpn(severity, occurrence, detection)
}

// ---------------------------------------------------------------------------
// Survival (stateless helpers over a throwaway engine)
// ---------------------------------------------------------------------------

fn dataset_from_py(records: &Bound<'_, PyAny>) -> PyResult<SurvivalDataset> {
    let records: Vec<FailureRecord> = from_py(records)?;
    Ok(SurvivalDataset::new(records)?)
}

#[pyfunction]
#[pyo3(signature = (records, config=None))]
pub fn fit_distribution(
    py: Python<'_>,
    records: &Bound<'_, PyAny>,
    config: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyObject> {
    let dataset = dataset_from_py(records)?;
    let mut engine = SurvivalAnalysisEngine::new(load_config(config)?);
    to_py(py, engine.fit(&dataset)?)
}

#[pyfunction]
#[pyo3(signature = (records, config=None))]
pub fn mean_cumulative_function(
    py: Python<'_>,
    records: &Bound<'_, PyAny>,
    config: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyObject> {
    let dataset = dataset_from_py(records)?;
    let mut engine = SurvivalAnalysisEngine::new(load_config(config)?);
    to_py(py, engine.mean_cumulative_function(&dataset)?)
}

#[pyfunction]
#[pyo3(signature = (records, config=None))]
pub fn kaplan_meier(
    py: Python<'_>,
    records: &Bound<'_, PyAny>,
    config: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyObject> {
    let dataset = dataset_from_py(records)?;
    let mut engine = SurvivalAnalysisEngine::new(load_config(config)?);
    to_py(py, engine.kaplan_meier(&dataset)?)
}

#[pyfunction]
#[pyo3(signature = (records, config=None))]
pub fn trend_tests(
    py: Python<'_>,
    records: &Bound<'_, PyAny>,
    config: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyObject> {
    let dataset = dataset_from_py(records)?;
    let mut engine = SurvivalAnalysisEngine::new(load_config(config)?);
    to_py(py, engine.trend_tests(&dataset)?)
}

#[pyfunction]
#[pyo3(signature = (observations, model="power_law", config=None))]
pub fn reliability_growth(
    py: Python<'_>,
    observations: &Bound<'_, PyAny>,
    model: &str,
    config: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyObject> {
    let observations: Vec<GrowthObservation> = from_py(observations)?;
    let model: GrowthModel = enum_from_str(model)?;
    let mut engine = SurvivalAnalysisEngine::new(load_config(config)?);
    to_py(py, engine.growth(&observations, model)?)
}

#[pyfunction]
#[pyo3(signature = (observations, grouped=false, termination="time", config=None))]
pub fn crow_amsaa_assessment(
    py: Python<'_>,
    observations: &Bound<'_, PyAny>,
    grouped: bool,
    termination: &str,
    config: Option<&Bound<'_, PyAny>>,
) -> PyResult<PyObject> {
    let observations: Vec<GrowthObservation> = from_py(observations)?;
    let termination: TestTermination = enum_from_str(termination)?;
    let mut engine = SurvivalAnalysisEngine::new(load_config(config)?);
    to_py(py, engine.crow_amsaa(&observations, grouped, termination)?)
}

// ---------------------------------------------------------------------------
// Similar item, hazard, formulas
// ---------------------------------------------------------------------------

#[pyfunction]
pub fn similar_item_analysis(py: Python<'_>, payload: &Bound<'_, PyDict>) -> PyResult<PyObject> {
    let input: SimilarItemInput = from_py(payload.as_any())?;
    to_py(py, &similar_item::calculate(&input)?)
}

#[pyfunction]
pub fn hazard_analysis(py: Python<'_>, payload: &Bound<'_, PyDict>) -> PyResult<PyObject> {
    let input: HazardInput = from_py(payload.as_any())?;
    to_py(py, &hazard::calculate(&input)?)
}

/// Evaluate one formula; only the names in `variables` are in scope.
#[pyfunction]
#[pyo3(signature = (source, variables=None))]
pub fn evaluate_formula(source: &str, variables: Option<&Bound<'_, PyDict>>) -> PyResult<f64> {
    let values: IndexMap<String, f64> = match variables {
        Some(vars) => from_py(vars.as_any())?,
        None => IndexMap::new(),
    };
    let mut scope = Scope::with_names(values.keys().cloned());
    for (name, value) in &values {
        scope.set(name, *value)?;
    }
    Ok(formula::evaluate(source, &scope)?)
}

#[pyfunction]
pub fn init_logging() -> bool {
    crate::logging::init()
}

// ---------------------------------------------------------------------------
// Stateful classes
// ---------------------------------------------------------------------------

struct HierarchyState {
    tree: Hierarchy,
    ids: IdSequence,
}

#[pyclass(name = "Hierarchy")]
pub struct PyHierarchy {
    state: Mutex<HierarchyState>,
}

#[pymethods]
impl PyHierarchy {
    /// Optionally reload persisted nodes; new ids continue after the largest.
    #[new]
    #[pyo3(signature = (nodes=None))]
    fn new(nodes: Option<&Bound<'_, PyAny>>) -> PyResult<Self> {
        let mut ids = IdSequence::new();
        let tree = match nodes {
            Some(obj) => {
                let nodes: Vec<HierarchyNode> = from_py(obj)?;
                Hierarchy::from_nodes(nodes, &mut ids)?
            }
            None => Hierarchy::new(),
        };
        Ok(Self { state: Mutex::new(HierarchyState { tree, ids }) })
    }

    fn __len__(&self) -> usize {
        self.state.lock().tree.len()
    }

    #[pyo3(signature = (parent, level, attributes=None))]
    fn insert(
        &self,
        parent: Option<u64>,
        level: &str,
        attributes: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<u64> {
        let level: Level = level.parse()?;
        let attributes: IndexMap<String, AttributeValue> = match attributes {
            Some(attrs) => from_py(attrs.as_any())?,
            None => IndexMap::new(),
        };
        let mut state = self.state.lock();
        let HierarchyState { tree, ids } = &mut *state;
        let id = tree.insert(parent.map(NodeId), level, attributes, ids)?;
        Ok(id.0)
    }

    fn get(&self, py: Python<'_>, id: u64) -> PyResult<PyObject> {
        let state = self.state.lock();
        to_py(py, state.tree.get(NodeId(id))?)
    }

    fn set_attribute(&self, id: u64, key: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let value = attribute_from_py(value)?;
        self.state.lock().tree.set_attribute(NodeId(id), key, value)?;
        Ok(())
    }

    fn children(&self, py: Python<'_>, id: u64) -> PyResult<PyObject> {
        let state = self.state.lock();
        to_py(py, &state.tree.children(NodeId(id))?)
    }

    fn descendants(&self, id: u64) -> PyResult<Vec<u64>> {
        let ids = self.state.lock().tree.descendants(NodeId(id))?;
        Ok(ids.into_iter().map(|n| n.0).collect())
    }

    fn ancestors(&self, id: u64) -> PyResult<Vec<u64>> {
        let ids = self.state.lock().tree.ancestors(NodeId(id))?;
        Ok(ids.into_iter().map(|n| n.0).collect())
    }

    fn roots(&self) -> Vec<u64> {
        self.state.lock().tree.roots().into_iter().map(|n| n.0).collect()
    }

    /// Remove a node and its subtree; returns every removed id.
    fn remove(&self, id: u64) -> PyResult<Vec<u64>> {
        let removed = self.state.lock().tree.remove(NodeId(id))?;
        Ok(removed.into_iter().map(|n| n.0).collect())
    }

    fn nodes(&self, py: Python<'_>) -> PyResult<PyObject> {
        let state = self.state.lock();
        let nodes: Vec<&HierarchyNode> = state.tree.nodes().collect();
        to_py(py, &nodes)
    }

    /// Run the criticality analysis below `item_id` and write the computed
    /// values back onto the nodes.
    #[pyo3(signature = (item_id, item_failure_rate, severity_policy=None))]
    fn analyze_criticality(
        &self,
        py: Python<'_>,
        item_id: u64,
        item_failure_rate: f64,
        severity_policy: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<PyObject> {
        let policy: SeverityPolicy = match severity_policy {
            Some(obj) => from_py(obj.as_any())?,
            None => SeverityPolicy::default(),
        };
        let mut state = self.state.lock();
        let report = criticality::analyze_item(&state.tree, NodeId(item_id), item_failure_rate, &policy)?;
        criticality::write_back(&mut state.tree, &report)?;
        to_py(py, &report)
    }
}

#[pyclass(name = "RelationshipMatrix")]
pub struct PyRelationshipMatrix {
    matrix: Mutex<RelationshipMatrix>,
}

#[pymethods]
impl PyRelationshipMatrix {
    /// `kind` is `"weighted"` or `"tristate"`.
    #[new]
    fn new(kind: &str) -> PyResult<Self> {
        let kind: MatrixKind = enum_from_str(kind)?;
        Ok(Self { matrix: Mutex::new(RelationshipMatrix::new(kind)) })
    }

    /// Build from header entities (`{"id", "label"}`) and stored cells.
    #[staticmethod]
    fn load(
        kind: &str,
        rows: &Bound<'_, PyAny>,
        columns: &Bound<'_, PyAny>,
        cells: &Bound<'_, PyAny>,
    ) -> PyResult<Self> {
        let kind: MatrixKind = enum_from_str(kind)?;
        let rows: Vec<HeaderEntity> = from_py(rows)?;
        let columns: Vec<HeaderEntity> = from_py(columns)?;
        let cells: Vec<MatrixCell> = from_py(cells)?;
        let matrix = RelationshipMatrix::select_all(kind, &rows, &columns, &cells)?;
        Ok(Self { matrix: Mutex::new(matrix) })
    }

    fn row_ids(&self) -> Vec<i64> {
        self.matrix.lock().row_ids().collect()
    }

    fn column_ids(&self) -> Vec<i64> {
        self.matrix.lock().column_ids().collect()
    }

    fn select(&self, py: Python<'_>, row: i64, column: i64) -> PyResult<PyObject> {
        let value = self.matrix.lock().select(row, column)?;
        to_py(py, &value)
    }

    /// `value` is `{"weight": n}` or `{"link": "none" | "partial" | "complete"}`.
    fn set(&self, row: i64, column: i64, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let value: CellValue = from_py(value)?;
        self.matrix.lock().set(row, column, value)?;
        Ok(())
    }

    fn insert_row(&self, id: i64, label: &str) -> PyResult<()> {
        Ok(self.matrix.lock().insert_row(id, label)?)
    }

    fn insert_column(&self, id: i64, label: &str) -> PyResult<()> {
        Ok(self.matrix.lock().insert_column(id, label)?)
    }

    fn delete_row(&self, id: i64) -> PyResult<()> {
        Ok(self.matrix.lock().delete_row(id)?)
    }

    fn delete_column(&self, id: i64) -> PyResult<()> {
        Ok(self.matrix.lock().delete_column(id)?)
    }

    fn dirty_cells(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.matrix.lock().dirty_cells())
    }

    fn cells(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.matrix.lock().cells())
    }

    /// Call `persist(cell)` for every changed cell and return how many
    /// succeeded. `persist` must not call back into this matrix.
    fn update(&self, py: Python<'_>, persist: &Bound<'_, PyAny>) -> PyResult<usize> {
        let mut matrix = self.matrix.lock();
        let persisted = matrix.update(|cell| -> PyResult<()> {
            persist.call1((to_py(py, cell)?,))?;
            Ok(())
        })?;
        Ok(persisted)
    }
}

/// Survival engine that keeps the last published result of each analysis.
#[pyclass(name = "SurvivalAnalysisEngine")]
pub struct PySurvivalEngine {
    engine: Mutex<SurvivalAnalysisEngine>,
}

#[pymethods]
impl PySurvivalEngine {
    #[new]
    #[pyo3(signature = (config=None))]
    fn new(config: Option<&Bound<'_, PyAny>>) -> PyResult<Self> {
        Ok(Self { engine: Mutex::new(SurvivalAnalysisEngine::new(load_config(config)?)) })
    }

    fn fit(&self, py: Python<'_>, records: &Bound<'_, PyAny>) -> PyResult<PyObject> {
        let dataset = dataset_from_py(records)?;
        let mut engine = self.engine.lock();
        to_py(py, engine.fit(&dataset)?)
    }

    fn mean_cumulative_function(&self, py: Python<'_>, records: &Bound<'_, PyAny>) -> PyResult<PyObject> {
        let dataset = dataset_from_py(records)?;
        let mut engine = self.engine.lock();
        to_py(py, engine.mean_cumulative_function(&dataset)?)
    }

    fn kaplan_meier(&self, py: Python<'_>, records: &Bound<'_, PyAny>) -> PyResult<PyObject> {
        let dataset = dataset_from_py(records)?;
        let mut engine = self.engine.lock();
        to_py(py, engine.kaplan_meier(&dataset)?)
    }

    fn trend_tests(&self, py: Python<'_>, records: &Bound<'_, PyAny>) -> PyResult<PyObject> {
        let dataset = dataset_from_py(records)?;
        let mut engine = self.engine.lock();
        to_py(py, engine.trend_tests(&dataset)?)
    }

    #[pyo3(signature = (observations, model="power_law"))]
    fn growth(&self, py: Python<'_>, observations: &Bound<'_, PyAny>, model: &str) -> PyResult<PyObject> {
        let observations: Vec<GrowthObservation> = from_py(observations)?;
        let model: GrowthModel = enum_from_str(model)?;
        let mut engine = self.engine.lock();
        to_py(py, engine.growth(&observations, model)?)
    }

    #[pyo3(signature = (observations, grouped=false, termination="time"))]
    fn crow_amsaa(
        &self,
        py: Python<'_>,
        observations: &Bound<'_, PyAny>,
        grouped: bool,
        termination: &str,
    ) -> PyResult<PyObject> {
        let observations: Vec<GrowthObservation> = from_py(observations)?;
        let termination: TestTermination = enum_from_str(termination)?;
        let mut engine = self.engine.lock();
        to_py(py, engine.crow_amsaa(&observations, grouped, termination)?)
    }

    fn last_fit(&self, py: Python<'_>) -> PyResult<Option<PyObject>> {
        self.engine.lock().last_fit().map(|r| to_py(py, r)).transpose()
    }

    fn last_mcf(&self, py: Python<'_>) -> PyResult<Option<PyObject>> {
        self.engine.lock().last_mcf().map(|r| to_py(py, r)).transpose()
    }

    fn last_kaplan_meier(&self, py: Python<'_>) -> PyResult<Option<PyObject>> {
        self.engine.lock().last_kaplan_meier().map(|r| to_py(py, r)).transpose()
    }

    fn last_trend(&self, py: Python<'_>) -> PyResult<Option<PyObject>> {
        self.engine.lock().last_trend().map(|r| to_py(py, r)).transpose()
    }

    fn last_growth(&self, py: Python<'_>) -> PyResult<Option<PyObject>> {
        self.engine.lock().last_growth().map(|r| to_py(py, r)).transpose()
    }

    fn last_crow_amsaa(&self, py: Python<'_>) -> PyResult<Option<PyObject>> {
        self.engine.lock().last_crow_amsaa().map(|r| to_py(py, r)).transpose()
    }
}
