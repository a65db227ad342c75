//! Survival and growth analysis over flat failure/censoring records.

pub mod growth;
pub mod kaplan_meier;
pub mod mcf;
pub mod parametric;
pub mod trend;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::errors::{RelkitError, RelkitResult};
use crate::models::{FailureRecord, FitResult};

use self::growth::{CrowAmsaaAssessment, GrowthCurve, GrowthModel, GrowthObservation, TestTermination};
use self::kaplan_meier::KaplanMeierTable;
use self::mcf::McfTable;
use self::trend::TrendReport;

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Validated, de-duplicated failure records in first-seen order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurvivalDataset {
    records: Vec<FailureRecord>,
}

impl SurvivalDataset {
    /// Validate every record and merge duplicates on
    /// `(unit, left, right, status)` by summing quantities.
    pub fn new(records: Vec<FailureRecord>) -> RelkitResult<Self> {
        let mut merged: IndexMap<(String, u64, u64, u8), FailureRecord> = IndexMap::new();
        for record in records {
            record.validate()?;
            let key = (
                record.unit_id.clone(),
                record.left_interval.to_bits(),
                record.right_interval.to_bits(),
                record.status as u8,
            );
            match merged.get_mut(&key) {
                Some(existing) => existing.quantity += record.quantity,
                None => {
                    merged.insert(key, record);
                }
            }
        }
        Ok(Self { records: merged.into_values().filter(|r| r.quantity > 0).collect() })
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keep records whose right interval lies in `(start, end]`; `end == 0`
    /// leaves the window open-ended.
    pub fn window(&self, start: f64, end: f64) -> Self {
        let records = self
            .records
            .iter()
            .filter(|r| r.right_interval > start && (end <= 0.0 || r.right_interval <= end))
            .cloned()
            .collect();
        Self { records }
    }

    pub fn failure_count(&self) -> u32 {
        self.records
            .iter()
            .filter(|r| r.status.is_failure())
            .map(|r| r.quantity)
            .sum()
    }

    pub fn suspension_count(&self) -> u32 {
        self.records
            .iter()
            .filter(|r| !r.status.is_failure())
            .map(|r| r.quantity)
            .sum()
    }

    /// Failure times (right interval) expanded by quantity, ascending.
    pub fn failure_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .records
            .iter()
            .filter(|r| r.status.is_failure())
            .flat_map(|r| std::iter::repeat(r.right_interval).take(r.quantity as usize))
            .collect();
        times.sort_by(f64::total_cmp);
        times
    }
}

/// Distinct values of `times`, ascending.
pub(crate) fn distinct_sorted(mut times: Vec<f64>) -> Vec<f64> {
    times.sort_by(f64::total_cmp);
    times.dedup();
    times
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Holds the latest published result of each analysis. A failed request
/// returns its error and leaves the previously published result in place.
#[derive(Clone, Debug, Default)]
pub struct SurvivalAnalysisEngine {
    config: AnalysisConfig,
    fit: Option<FitResult>,
    mcf: Option<McfTable>,
    kaplan_meier: Option<KaplanMeierTable>,
    trend: Option<TrendReport>,
    growth: Option<GrowthCurve>,
    crow_amsaa: Option<CrowAmsaaAssessment>,
}

impl SurvivalAnalysisEngine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config, ..Self::default() }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn last_fit(&self) -> Option<&FitResult> {
        self.fit.as_ref()
    }

    pub fn last_mcf(&self) -> Option<&McfTable> {
        self.mcf.as_ref()
    }

    pub fn last_kaplan_meier(&self) -> Option<&KaplanMeierTable> {
        self.kaplan_meier.as_ref()
    }

    pub fn last_trend(&self) -> Option<&TrendReport> {
        self.trend.as_ref()
    }

    pub fn last_growth(&self) -> Option<&GrowthCurve> {
        self.growth.as_ref()
    }

    pub fn last_crow_amsaa(&self) -> Option<&CrowAmsaaAssessment> {
        self.crow_amsaa.as_ref()
    }

    fn windowed(&self, dataset: &SurvivalDataset) -> RelkitResult<SurvivalDataset> {
        let windowed = dataset.window(self.config.start_time, self.config.end_time);
        if windowed.is_empty() {
            return Err(RelkitError::MissingData(format!(
                "no records in analysis window ({}, {}]",
                self.config.start_time, self.config.end_time
            )));
        }
        debug!(
            "{} of {} records inside the analysis window",
            windowed.records().len(),
            dataset.records().len()
        );
        Ok(windowed)
    }

    /// Fit the configured distribution with the configured method.
    pub fn fit(&mut self, dataset: &SurvivalDataset) -> RelkitResult<&FitResult> {
        let data = self.windowed(dataset)?;
        let result = parametric::fit(
            &data,
            self.config.distribution,
            self.config.fit_method,
            &self.config,
        )
        .inspect_err(|e| warn!("fit failed, keeping previous result: {e}"))?;
        info!(
            "{:?} {:?} fit: scale={:.6} shape={:.6} mtbf={:.6}",
            result.distribution, result.method, result.scale.point, result.shape.point, result.mtbf.point
        );
        Ok(self.fit.insert(result))
    }

    pub fn mean_cumulative_function(&mut self, dataset: &SurvivalDataset) -> RelkitResult<&McfTable> {
        let data = self.windowed(dataset)?;
        let table = mcf::mean_cumulative_function(&data, self.config.z())?;
        Ok(self.mcf.insert(table))
    }

    pub fn kaplan_meier(&mut self, dataset: &SurvivalDataset) -> RelkitResult<&KaplanMeierTable> {
        let data = self.windowed(dataset)?;
        let table = kaplan_meier::kaplan_meier(&data, self.config.z())?;
        Ok(self.kaplan_meier.insert(table))
    }

    pub fn trend_tests(&mut self, dataset: &SurvivalDataset) -> RelkitResult<&TrendReport> {
        let data = self.windowed(dataset)?;
        let report = trend::trend_tests(&data, self.config.confidence, self.config.bound_type);
        Ok(self.trend.insert(report))
    }

    /// Growth curve over grouped test data. The power law uses the
    /// configured fit method (MLE for Crow-AMSAA, regression for Duane).
    pub fn growth(
        &mut self,
        observations: &[GrowthObservation],
        model: GrowthModel,
    ) -> RelkitResult<&GrowthCurve> {
        let curve = match model {
            GrowthModel::PowerLaw => growth::power_law(observations, self.config.fit_method, &self.config),
            GrowthModel::Loglinear => growth::loglinear(observations, &self.config),
        }
        .inspect_err(|e| warn!("growth analysis failed, keeping previous result: {e}"))?;
        debug!("{:?} growth curve over {} observations", model, curve.points.len());
        Ok(self.growth.insert(curve))
    }

    pub fn crow_amsaa(
        &mut self,
        observations: &[GrowthObservation],
        grouped: bool,
        termination: TestTermination,
    ) -> RelkitResult<&CrowAmsaaAssessment> {
        let assessment = growth::crow_amsaa_assessment(observations, grouped, termination, &self.config)
            .inspect_err(|e| warn!("Crow-AMSAA assessment failed, keeping previous result: {e}"))?;
        info!(
            "Crow-AMSAA: beta={:.6} lambda={:.6} over {} failures",
            assessment.beta.point, assessment.lambda.point, assessment.total_failures
        );
        Ok(self.crow_amsaa.insert(assessment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CensorStatus, Distribution};

    fn rec(unit: &str, left: f64, right: f64, status: CensorStatus, qty: u32) -> FailureRecord {
        FailureRecord::new(unit, left, right, status, qty).unwrap()
    }

    #[test]
    fn test_duplicates_merge_quantities() {
        let ds = SurvivalDataset::new(vec![
            rec("A", 0.0, 10.0, CensorStatus::Event, 1),
            rec("B", 0.0, 12.0, CensorStatus::Event, 1),
            rec("A", 0.0, 10.0, CensorStatus::Event, 2),
        ])
        .unwrap();
        assert_eq!(ds.records().len(), 2);
        assert_eq!(ds.records()[0].quantity, 3);
        assert_eq!(ds.records()[1].unit_id, "B");
        assert_eq!(ds.failure_count(), 4);
    }

    #[test]
    fn test_invalid_record_rejected() {
        let mut bad = rec("A", 0.0, 10.0, CensorStatus::Event, 1);
        bad.left_interval = 20.0;
        assert_eq!(SurvivalDataset::new(vec![bad]).unwrap_err().code(), "out_of_range");
    }

    #[test]
    fn test_window_filters_right_interval() {
        let ds = SurvivalDataset::new(vec![
            FailureRecord::event("A", 5.0).unwrap(),
            FailureRecord::event("A", 15.0).unwrap(),
            FailureRecord::suspension("B", 25.0).unwrap(),
        ])
        .unwrap();
        assert_eq!(ds.window(5.0, 20.0).records().len(), 1);
        assert_eq!(ds.window(0.0, 0.0).records().len(), 3);
        assert_eq!(ds.failure_times(), vec![5.0, 15.0]);
        assert_eq!(ds.suspension_count(), 1);
    }

    #[test]
    fn test_failed_fit_keeps_previous_result() {
        let config = AnalysisConfig { distribution: Distribution::Exponential, ..AnalysisConfig::default() };
        let mut engine = SurvivalAnalysisEngine::new(config);
        let good = SurvivalDataset::new(vec![
            FailureRecord::event("A", 10.0).unwrap(),
            FailureRecord::event("B", 30.0).unwrap(),
        ])
        .unwrap();
        let scale = engine.fit(&good).unwrap().scale.point;
        assert!((scale - 20.0).abs() < 1e-12);

        let only_suspensions =
            SurvivalDataset::new(vec![FailureRecord::suspension("C", 5.0).unwrap()]).unwrap();
        assert!(engine.fit(&only_suspensions).is_err());
        assert_eq!(engine.last_fit().unwrap().scale.point, scale);
    }

    #[test]
    fn test_growth_uses_configured_method() {
        let config = AnalysisConfig { fit_method: crate::models::FitMethod::RankRegression, ..AnalysisConfig::default() };
        let mut engine = SurvivalAnalysisEngine::new(config);
        let observations = [
            GrowthObservation { failures: 1, cumulative_time: 100.0 },
            GrowthObservation { failures: 1, cumulative_time: 400.0 },
        ];
        let curve = engine.growth(&observations, GrowthModel::PowerLaw).unwrap();
        assert_eq!(curve.method, crate::models::FitMethod::RankRegression);
        assert_eq!(curve.points.len(), 2);
        assert!(engine.growth(&[], GrowthModel::Loglinear).is_err());
        assert_eq!(engine.last_growth().unwrap().points.len(), 2);
    }

    #[test]
    fn test_crow_amsaa_keeps_previous_assessment() {
        let mut engine = SurvivalAnalysisEngine::default();
        let observations = [
            GrowthObservation { failures: 1, cumulative_time: 100.0 },
            GrowthObservation { failures: 1, cumulative_time: 400.0 },
            GrowthObservation { failures: 2, cumulative_time: 1600.0 },
            GrowthObservation { failures: 4, cumulative_time: 6400.0 },
        ];
        let beta = engine.crow_amsaa(&observations, true, TestTermination::Time).unwrap().beta.point;
        assert!((beta - 0.5).abs() < 1e-9);
        assert!(engine.crow_amsaa(&observations[..1], true, TestTermination::Time).is_err());
        assert_eq!(engine.last_crow_amsaa().unwrap().beta.point, beta);
    }

    #[test]
    fn test_empty_window_is_missing_data() {
        let config = AnalysisConfig { start_time: 100.0, ..AnalysisConfig::default() };
        let mut engine = SurvivalAnalysisEngine::new(config);
        let ds = SurvivalDataset::new(vec![FailureRecord::event("A", 10.0).unwrap()]).unwrap();
        assert_eq!(engine.kaplan_meier(&ds).unwrap_err().code(), "missing_data");
        assert!(engine.last_kaplan_meier().is_none());
    }
}
