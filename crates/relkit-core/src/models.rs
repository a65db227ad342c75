//! Shared typed records exchanged between the collaborator and the engines.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{RelkitError, RelkitResult};

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

/// Identifier of a hierarchy node, unique within one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    System,
    Assembly,
    Function,
    Mode,
    Mechanism,
    Cause,
    Control,
    Action,
}

impl Level {
    /// Whether a node at `child` level may be attached below `self`.
    pub fn accepts_child(self, child: Level) -> bool {
        use Level::*;
        matches!(
            (self, child),
            (System, Assembly)
                | (Assembly, Assembly)
                | (Assembly, Function)
                | (Assembly, Mode)
                | (Function, Function)
                | (Function, Mode)
                | (Mode, Mechanism)
                | (Mode, Cause)
                | (Mode, Control)
                | (Mode, Action)
                | (Mechanism, Cause)
                | (Cause, Control)
                | (Cause, Action)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::System => "system",
            Level::Assembly => "assembly",
            Level::Function => "function",
            Level::Mode => "mode",
            Level::Mechanism => "mechanism",
            Level::Cause => "cause",
            Level::Control => "control",
            Level::Action => "action",
        }
    }
}

impl FromStr for Level {
    type Err = RelkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Level::System),
            "assembly" => Ok(Level::Assembly),
            "function" => Ok(Level::Function),
            "mode" => Ok(Level::Mode),
            "mechanism" => Ok(Level::Mechanism),
            "cause" => Ok(Level::Cause),
            "control" => Ok(Level::Control),
            "action" => Ok(Level::Action),
            other => Err(RelkitError::OutOfRange(format!("unknown hierarchy level {other:?}"))),
        }
    }
}

/// A loosely-typed attribute as the collaborator loaded it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub level: Level,
    #[serde(default)]
    pub attributes: IndexMap<String, AttributeValue>,
}

impl HierarchyNode {
    /// Numeric attribute lookup; absent or non-numeric values are `MissingData`.
    pub fn number(&self, key: &str) -> RelkitResult<f64> {
        let missing = || RelkitError::MissingData(format!("node {} has no numeric {key}", self.id));
        match self.attributes.get(key) {
            Some(AttributeValue::Number(v)) if v.is_finite() => Ok(*v),
            Some(AttributeValue::Text(text)) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(missing),
            _ => Err(missing()),
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(AttributeValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }
}

// ---------------------------------------------------------------------------
// Survival records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CensorStatus {
    Event,
    RightCensored,
    LeftCensored,
    IntervalCensored,
}

impl CensorStatus {
    /// Event and interval-censored records both count as failures.
    pub fn is_failure(self) -> bool {
        matches!(self, CensorStatus::Event | CensorStatus::IntervalCensored)
    }
}

impl FromStr for CensorStatus {
    type Err = RelkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "event" | "failure" => Ok(CensorStatus::Event),
            "right_censored" | "suspension" => Ok(CensorStatus::RightCensored),
            "left_censored" => Ok(CensorStatus::LeftCensored),
            "interval_censored" => Ok(CensorStatus::IntervalCensored),
            other => Err(RelkitError::OutOfRange(format!("unknown censoring status {other:?}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub unit_id: String,
    pub left_interval: f64,
    pub right_interval: f64,
    pub status: CensorStatus,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub request_date: Option<NaiveDate>,
}

fn default_quantity() -> u32 {
    1
}

impl FailureRecord {
    pub fn new(
        unit_id: impl Into<String>,
        left_interval: f64,
        right_interval: f64,
        status: CensorStatus,
        quantity: u32,
    ) -> RelkitResult<Self> {
        let record = Self {
            unit_id: unit_id.into(),
            left_interval,
            right_interval,
            status,
            quantity,
            request_date: None,
        };
        record.validate()?;
        Ok(record)
    }

    /// Exact failure observed at `time`.
    pub fn event(unit_id: impl Into<String>, time: f64) -> RelkitResult<Self> {
        Self::new(unit_id, time, time, CensorStatus::Event, 1)
    }

    /// Unit removed from observation at `time` without failing.
    pub fn suspension(unit_id: impl Into<String>, time: f64) -> RelkitResult<Self> {
        Self::new(unit_id, time, time, CensorStatus::RightCensored, 1)
    }

    pub fn with_request_date(mut self, date: NaiveDate) -> Self {
        self.request_date = Some(date);
        self
    }

    pub fn validate(&self) -> RelkitResult<()> {
        if !self.left_interval.is_finite() || !self.right_interval.is_finite() {
            return Err(RelkitError::OutOfRange(format!(
                "unit {}: interval bounds must be finite",
                self.unit_id
            )));
        }
        if self.left_interval < 0.0 || self.left_interval > self.right_interval {
            return Err(RelkitError::OutOfRange(format!(
                "unit {}: interval [{}, {}] is not ordered",
                self.unit_id, self.left_interval, self.right_interval
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Allocation / criticality rows
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub entity_id: NodeId,
    #[serde(default = "default_true")]
    pub included: bool,
    /// Sub-element count `ni` (AGREE).
    #[serde(default = "default_one")]
    pub n_sub_elements: f64,
    /// Importance weight `wi` (AGREE).
    #[serde(default = "default_one")]
    pub importance_weight: f64,
    /// Percent of mission time the child operates (AGREE).
    #[serde(default = "default_duty_cycle")]
    pub duty_cycle: f64,
    /// Current predicted failure rate (ARINC).
    #[serde(default)]
    pub current_failure_rate: f64,
    #[serde(default)]
    pub mttr: f64,
    /// Intricacy, state-of-art, operating-time and environment factors (FOO).
    #[serde(default = "default_factors")]
    pub factors: [f64; 4],

    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub percent_weight: f64,
    #[serde(default)]
    pub failure_rate_alloc: f64,
    #[serde(default)]
    pub mtbf_alloc: f64,
    #[serde(default)]
    pub reliability_alloc: f64,
    #[serde(default)]
    pub availability_alloc: f64,
}

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_duty_cycle() -> f64 {
    100.0
}

fn default_factors() -> [f64; 4] {
    [1.0; 4]
}

impl AllocationRow {
    pub fn new(entity_id: NodeId) -> Self {
        Self {
            entity_id,
            included: true,
            n_sub_elements: 1.0,
            importance_weight: 1.0,
            duty_cycle: 100.0,
            current_failure_rate: 0.0,
            mttr: 0.0,
            factors: default_factors(),
            weight: 0.0,
            percent_weight: 0.0,
            failure_rate_alloc: 0.0,
            mtbf_alloc: 0.0,
            reliability_alloc: 0.0,
            availability_alloc: 0.0,
        }
    }

    pub fn clear_computed(&mut self) {
        self.weight = 0.0;
        self.percent_weight = 0.0;
        self.failure_rate_alloc = 0.0;
        self.mtbf_alloc = 0.0;
        self.reliability_alloc = 0.0;
        self.availability_alloc = 0.0;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriticalityRow {
    pub cause_id: NodeId,
    pub mode_id: NodeId,
    pub mode_ratio: Option<f64>,
    pub operating_time: Option<f64>,
    pub effect_probability: Option<f64>,
    #[serde(default)]
    pub severity_class: String,
    pub rpn_severity: i64,
    pub rpn_occurrence: i64,
    pub rpn_detection: i64,
    pub rpn_severity_new: i64,
    pub rpn_occurrence_new: i64,
    pub rpn_detection_new: i64,

    #[serde(default)]
    pub mode_criticality: f64,
    #[serde(default)]
    pub rpn: i64,
    #[serde(default)]
    pub rpn_new: i64,
}

// ---------------------------------------------------------------------------
// Matrix cells
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    None,
    Partial,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellValue {
    Weight(i64),
    Link(LinkState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    pub row_id: i64,
    pub column_id: i64,
    pub value: CellValue,
}

// ---------------------------------------------------------------------------
// Fit results
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundType {
    Lower,
    Upper,
    #[default]
    TwoSided,
}

impl FromStr for BoundType {
    type Err = RelkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "lower" | "lower_one_sided" => Ok(BoundType::Lower),
            "upper" | "upper_one_sided" => Ok(BoundType::Upper),
            "two_sided" | "both" => Ok(BoundType::TwoSided),
            other => Err(RelkitError::OutOfRange(format!("unknown bound type {other:?}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    Exponential,
    Lognormal,
    Normal,
    #[default]
    Weibull,
}

impl Distribution {
    /// Number of free parameters used by AIC/BIC.
    pub fn parameter_count(self) -> usize {
        match self {
            Distribution::Exponential => 1,
            _ => 2,
        }
    }
}

impl FromStr for Distribution {
    type Err = RelkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" | "exp" => Ok(Distribution::Exponential),
            "lognormal" | "lnorm" => Ok(Distribution::Lognormal),
            "normal" | "gaussian" => Ok(Distribution::Normal),
            "weibull" => Ok(Distribution::Weibull),
            other => Err(RelkitError::InvalidMethod(format!("unknown distribution {other:?}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    #[default]
    Mle,
    RankRegression,
}

impl FromStr for FitMethod {
    type Err = RelkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "mle" | "maximum_likelihood" => Ok(FitMethod::Mle),
            "rank_regression" | "regression" | "rr" => Ok(FitMethod::RankRegression),
            other => Err(RelkitError::InvalidMethod(format!("unknown fit method {other:?}"))),
        }
    }
}

/// A point estimate with its confidence bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounded {
    pub lower: f64,
    pub point: f64,
    pub upper: f64,
}

impl Bounded {
    pub fn new(lower: f64, point: f64, upper: f64) -> Self {
        Self { lower, point, upper }
    }

    /// Degenerate bound collapsed onto the point.
    pub fn exact(point: f64) -> Self {
        Self::new(point, point, point)
    }

    /// `point ± z·se`.
    pub fn additive(point: f64, se: f64, z: f64) -> Self {
        Self::new(point - z * se, point, point + z * se)
    }

    /// `point·exp(±z·se/point)` for positive quantities.
    pub fn multiplicative(point: f64, se: f64, z: f64) -> Self {
        if point <= 0.0 {
            return Self::exact(point);
        }
        let factor = (z * se / point).exp();
        Self::new(point / factor, point, point * factor)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Covariance {
    pub scale: f64,
    pub shape: f64,
    pub covariance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub distribution: Distribution,
    pub method: FitMethod,
    pub scale: Bounded,
    pub shape: Bounded,
    pub location: Bounded,
    pub variance: Covariance,
    pub mtbf: Bounded,
    pub reliability: Option<Bounded>,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    /// Units the likelihood treats as failed: exact, interval- and
    /// left-censored. Differs from `SurvivalDataset::failure_count`, which
    /// leaves left-censored units out.
    pub n_failures: u32,
    /// Right-censored units.
    pub n_suspensions: u32,
}
