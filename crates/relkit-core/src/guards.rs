//! Guarded arithmetic and input clamping shared by every engine.
//!
//! A zero denominator is never an error here: each helper returns the
//! documented fallback and the caller decides whether to record it as a
//! degenerate result.

/// Fallback for failure rates and MTBF when a denominator is zero.
pub const RATE_FALLBACK: f64 = 0.0;

/// Fallback for reliability (and availability) when a denominator is zero.
pub const RELIABILITY_FALLBACK: f64 = 1.0;

pub const MIN_RPN_SCORE: i64 = 1;
pub const MAX_RPN_SCORE: i64 = 10;

/// Outcome of a guarded division.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Guarded {
    Value(f64),
    Fallback(f64),
}

impl Guarded {
    pub fn get(self) -> f64 {
        match self {
            Guarded::Value(v) | Guarded::Fallback(v) => v,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, Guarded::Fallback(_))
    }
}

/// Divide, returning `fallback` when the denominator is zero or the quotient
/// is not finite.
pub fn guarded_div(numerator: f64, denominator: f64, fallback: f64) -> Guarded {
    if denominator == 0.0 || !denominator.is_finite() {
        return Guarded::Fallback(fallback);
    }
    let q = numerator / denominator;
    if q.is_finite() {
        Guarded::Value(q)
    } else {
        Guarded::Fallback(fallback)
    }
}

/// Division for rates and MTBF (fallback 0.0).
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    guarded_div(numerator, denominator, RATE_FALLBACK).get()
}

/// Reciprocal for rate <-> MTBF conversions (fallback 0.0).
pub fn safe_recip(value: f64) -> f64 {
    safe_div(1.0, value)
}

/// Natural log that yields `None` for non-positive input.
pub fn safe_ln(value: f64) -> Option<f64> {
    if value > 0.0 && value.is_finite() {
        Some(value.ln())
    } else {
        None
    }
}

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

/// Clamp a severity/occurrence/detection score into `[1, 10]`.
pub fn clamp_rpn_score(value: i64) -> i64 {
    clamp_int(value, MIN_RPN_SCORE, MAX_RPN_SCORE)
}

pub fn clamp_probability(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
