//! relkit core library: reliability and risk analysis engines.
//!
//! The crate provides reliability allocation, FMEA criticality, parametric and
//! non-parametric survival analysis, reliability growth, similar-item and
//! hazard analysis over typed records.  With the `python` feature it is built
//! as a Python extension module (`_relkit_core`) via PyO3; the pure Rust API
//! is usable on its own.

pub mod allocation;
pub mod config;
pub mod criticality;
pub mod errors;
pub mod formula;
pub mod guards;
pub mod hazard;
pub mod hierarchy;
pub mod logging;
pub mod matrix;
pub mod models;
pub mod similar_item;
pub mod stats;
pub mod survival;

#[cfg(feature = "python")]
mod python;

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::wrap_pyfunction;

// ---------------------------------------------------------------------------
// Top-level Python module: _relkit_core
// ---------------------------------------------------------------------------

#[cfg(feature = "python")]
#[pymodule]
fn _relkit_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // -- Constants ------------------------------------------------------------
    m.add("RESULT_SLOTS", formula::RESULT_SLOTS)?;
    m.add("MIN_RPN_SCORE", guards::MIN_RPN_SCORE)?;
    m.add("MAX_RPN_SCORE", guards::MAX_RPN_SCORE)?;
    m.add("ENV_CONFIDENCE", config::ENV_CONFIDENCE)?;
    m.add("ENV_BOUND_TYPE", config::ENV_BOUND_TYPE)?;

    // -- Logging --------------------------------------------------------------
    m.add_function(wrap_pyfunction!(python::init_logging, m)?)?;

    // -- Stateful structures --------------------------------------------------
    m.add_class::<python::PyHierarchy>()?;
    m.add_class::<python::PyRelationshipMatrix>()?;
    m.add_class::<python::PySurvivalEngine>()?;

    // -- Allocation -----------------------------------------------------------
    m.add_function(wrap_pyfunction!(python::calculate_goals, m)?)?;
    m.add_function(wrap_pyfunction!(python::allocate, m)?)?;
    m.add_function(wrap_pyfunction!(python::trickle_down, m)?)?;

    // -- Criticality ----------------------------------------------------------
    m.add_function(wrap_pyfunction!(python::calculate_criticality, m)?)?;
    m.add_function(wrap_pyfunction!(python::rpn, m)?)?;

    // -- Survival and growth --------------------------------------------------
    m.add_function(wrap_pyfunction!(python::fit_distribution, m)?)?;
    m.add_function(wrap_pyfunction!(python::mean_cumulative_function, m)?)?;
    m.add_function(wrap_pyfunction!(python::kaplan_meier, m)?)?;
    m.add_function(wrap_pyfunction!(python::trend_tests, m)?)?;
    m.add_function(wrap_pyfunction!(python::reliability_growth, m)?)?;
    m.add_function(wrap_pyfunction!(python::crow_amsaa_assessment, m)?)?;

    // -- Similar item, hazard, formulas ---------------------------------------
    m.add_function(wrap_pyfunction!(python::similar_item_analysis, m)?)?;
    m.add_function(wrap_pyfunction!(python::hazard_analysis, m)?)?;
    m.add_function(wrap_pyfunction!(python::evaluate_formula, m)?)?;

    Ok(())
}
