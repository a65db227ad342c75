//! Analysis configuration supplied by the collaborator.
//!
//! Loaded from JSON (file or string) with every field defaulted, then
//! optionally overridden from `RELKIT_*` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{RelkitError, RelkitResult};
use crate::models::{BoundType, Distribution, FitMethod};

pub const ENV_CONFIDENCE: &str = "RELKIT_CONFIDENCE";
pub const ENV_BOUND_TYPE: &str = "RELKIT_BOUND_TYPE";

/// One severity bucket: item criticalities up to and including `upper_bound`
/// fall into `label`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityThreshold {
    pub upper_bound: f64,
    pub label: String,
}

/// Ordered thresholds used to classify an item's total criticality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    pub thresholds: Vec<SeverityThreshold>,
    pub overflow_label: String,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            thresholds: vec![
                SeverityThreshold { upper_bound: 1e-6, label: "negligible".into() },
                SeverityThreshold { upper_bound: 1e-4, label: "marginal".into() },
                SeverityThreshold { upper_bound: 1e-2, label: "critical".into() },
            ],
            overflow_label: "catastrophic".into(),
        }
    }
}

impl SeverityPolicy {
    pub fn classify(&self, criticality: f64) -> &str {
        let mut sorted: Vec<&SeverityThreshold> = self.thresholds.iter().collect();
        sorted.sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));
        sorted
            .into_iter()
            .find(|t| criticality <= t.upper_bound)
            .map(|t| t.label.as_str())
            .unwrap_or(self.overflow_label.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Confidence level as a fraction; percentages above 1 are normalized.
    pub confidence: f64,
    pub bound_type: BoundType,
    pub distribution: Distribution,
    pub fit_method: FitMethod,
    /// Time at which fitted reliability is reported.
    pub mission_time: Option<f64>,
    pub start_time: f64,
    /// Upper edge of the analysis window; 0 means unbounded.
    pub end_time: f64,
    pub severity_policy: SeverityPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            confidence: 0.95,
            bound_type: BoundType::TwoSided,
            distribution: Distribution::Weibull,
            fit_method: FitMethod::Mle,
            mission_time: None,
            start_time: 0.0,
            end_time: 0.0,
            severity_policy: SeverityPolicy::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(payload: &str) -> RelkitResult<Self> {
        let config: Self = serde_json::from_str(payload)?;
        config.validated()
    }

    pub fn from_path(path: impl AsRef<Path>) -> RelkitResult<Self> {
        let payload = std::fs::read_to_string(path)?;
        Self::from_json_str(&payload)
    }

    /// Apply `RELKIT_CONFIDENCE` and `RELKIT_BOUND_TYPE` when set.
    pub fn with_env_overrides(mut self) -> RelkitResult<Self> {
        if let Ok(raw) = std::env::var(ENV_CONFIDENCE) {
            self.confidence = raw.trim().parse::<f64>().map_err(|_| {
                RelkitError::OutOfRange(format!("{ENV_CONFIDENCE}={raw:?} is not a number"))
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_BOUND_TYPE) {
            self.bound_type = raw.parse()?;
        }
        self.validated()
    }

    pub fn validated(mut self) -> RelkitResult<Self> {
        if self.confidence > 1.0 && self.confidence < 100.0 {
            self.confidence /= 100.0;
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(RelkitError::OutOfRange(format!(
                "confidence {} must lie in (0, 1)",
                self.confidence
            )));
        }
        if self.start_time < 0.0 || self.end_time < 0.0 {
            return Err(RelkitError::OutOfRange("analysis window must be non-negative".into()));
        }
        if self.end_time > 0.0 && self.end_time <= self.start_time {
            return Err(RelkitError::OutOfRange(format!(
                "analysis window ({}, {}] is empty",
                self.start_time, self.end_time
            )));
        }
        Ok(self)
    }

    pub fn z(&self) -> f64 {
        crate::stats::z_value(self.confidence, self.bound_type)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = AnalysisConfig::from_json_str("{}").unwrap();
        assert_eq!(config, AnalysisConfig::default());
    }

    #[test]
    fn test_percent_confidence_normalized() {
        let config = AnalysisConfig::from_json_str(r#"{"confidence": 90}"#).unwrap();
        assert!((config.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        let err = AnalysisConfig::from_json_str(r#"{"confidence": 0}"#).unwrap_err();
        assert_eq!(err.code(), "out_of_range");
    }

    #[test]
    fn test_empty_window_rejected() {
        let err =
            AnalysisConfig::from_json_str(r#"{"start_time": 10, "end_time": 5}"#).unwrap_err();
        assert_eq!(err.code(), "out_of_range");
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"distribution": "lognormal", "fit_method": "rank_regression", "mission_time": 100.0}}"#
        )
        .unwrap();
        let config = AnalysisConfig::from_path(file.path()).unwrap();
        assert_eq!(config.distribution, Distribution::Lognormal);
        assert_eq!(config.fit_method, FitMethod::RankRegression);
        assert_eq!(config.mission_time, Some(100.0));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AnalysisConfig::from_path(dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code(), "io");
    }

    #[test]
    fn test_severity_policy_classify() {
        let policy = SeverityPolicy::default();
        assert_eq!(policy.classify(5e-7), "negligible");
        assert_eq!(policy.classify(1e-4), "marginal");
        assert_eq!(policy.classify(0.5), "catastrophic");
    }
}
