//! Risk indicator engine
//!
//! Twenty independent detectors, each turning a transaction set into an ordinal
//! 1-4 score plus the transactions that explain it. Detectors report failures
//! through [`DetectionError`]; [`evaluate`] converts any failure into the safe
//! default so one broken detector never affects the others.

mod behavioral;
mod documentation;
mod geographic;
mod thresholds;

use crate::aggregator::IndicatorType;
use crate::config::{AnalyzerConfig, Breakpoints};
use crate::geographic_risk::CountryRiskList;
use crate::{Column, Transaction, TransactionSet};
use chrono::{NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

/// Detector failures
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DetectionError {
    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Computation failed: {0}")]
    ComputationFailed(String),

    #[error("Detector panicked: {0}")]
    Panicked(String),
}

/// Indicator identifiers 1-20
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum IndicatorId {
    DocumentReuse = 1,
    DocumentNameMismatch = 2,
    InvalidDocument = 3,
    ThresholdAvoidance = 4,
    FragmentedBeneficiary = 5,
    RoundAmounts = 6,
    Cancellations = 7,
    HighRiskDestination = 8,
    ProfileDeviation = 9,
    PoliticallyExposed = 10,
    HighRiskCorridor = 11,
    AgentVolume = 12,
    IncompleteClientData = 13,
    AboveMunicipalMean = 14,
    SuddenGrowth = 15,
    DestinationConcentration = 16,
    UnusualTiming = 17,
    AgentAsSender = 18,
    NationalityMismatch = 19,
    RepeatedBeneficiaryData = 20,
}

impl IndicatorId {
    pub const ALL: [IndicatorId; 20] = [
        IndicatorId::DocumentReuse,
        IndicatorId::DocumentNameMismatch,
        IndicatorId::InvalidDocument,
        IndicatorId::ThresholdAvoidance,
        IndicatorId::FragmentedBeneficiary,
        IndicatorId::RoundAmounts,
        IndicatorId::Cancellations,
        IndicatorId::HighRiskDestination,
        IndicatorId::ProfileDeviation,
        IndicatorId::PoliticallyExposed,
        IndicatorId::HighRiskCorridor,
        IndicatorId::AgentVolume,
        IndicatorId::IncompleteClientData,
        IndicatorId::AboveMunicipalMean,
        IndicatorId::SuddenGrowth,
        IndicatorId::DestinationConcentration,
        IndicatorId::UnusualTiming,
        IndicatorId::AgentAsSender,
        IndicatorId::NationalityMismatch,
        IndicatorId::RepeatedBeneficiaryData,
    ];

    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }

    /// Report title
    pub fn name(&self) -> &'static str {
        match self {
            IndicatorId::DocumentReuse => "Same document used within a short time span",
            IndicatorId::DocumentNameMismatch => "Document repeated under different names",
            IndicatorId::InvalidDocument => "Invalid DNI/NIE documents",
            IndicatorId::ThresholdAvoidance => "Operations avoiding the 3,000 EUR threshold",
            IndicatorId::FragmentedBeneficiary => "Fragmented operations to one beneficiary",
            IndicatorId::RoundAmounts => "Systematic round amounts for high values",
            IndicatorId::Cancellations => "Client with numerous cancellations",
            IndicatorId::HighRiskDestination => "Transfers to high-risk countries",
            IndicatorId::ProfileDeviation => "Operations outside the client's usual profile",
            IndicatorId::PoliticallyExposed => "Politically exposed clients (PEP)",
            IndicatorId::HighRiskCorridor => "Corridors towards higher-risk destinations",
            IndicatorId::AgentVolume => "Agent volume above the average",
            IndicatorId::IncompleteClientData => "Incomplete or erroneous client data",
            IndicatorId::AboveMunicipalMean => "Operations far above the municipal mean",
            IndicatorId::SuddenGrowth => "Sudden growth in activity",
            IndicatorId::DestinationConcentration => "Substantial volume to a single destination",
            IndicatorId::UnusualTiming => "Operations at unusual dates or hours",
            IndicatorId::AgentAsSender => "Agent acting as sender",
            IndicatorId::NationalityMismatch => "Senders whose nationality differs from the destination",
            IndicatorId::RepeatedBeneficiaryData => "Repeated beneficiary data across clients",
        }
    }

    /// What the detector measures, for report footnotes
    pub fn description(&self) -> &'static str {
        match self {
            IndicatorId::DocumentReuse => "Share of clients operating in short intervals or with many operations",
            IndicatorId::DocumentNameMismatch => "Share of documents presented under more than one sender name",
            IndicatorId::InvalidDocument => "Share of documents failing the DNI/NIE check letter, worst agent",
            IndicatorId::ThresholdAvoidance => "Share of clients concentrating operations just below the reporting threshold",
            IndicatorId::FragmentedBeneficiary => "Share of operations where several senders feed one beneficiary",
            IndicatorId::RoundAmounts => "Share of clients repeating round high amounts",
            IndicatorId::Cancellations => "Share of clients with repeated cancellations",
            IndicatorId::HighRiskDestination => "Share of operations sent to listed countries or with empty beneficiary names",
            IndicatorId::ProfileDeviation => "Share of clients with atypical amounts or destinations",
            IndicatorId::PoliticallyExposed => "Share of clients flagged as politically exposed",
            IndicatorId::HighRiskCorridor => "Share of clients sending to higher-risk corridors",
            IndicatorId::AgentVolume => "Share of agents moving well above the mean agent volume",
            IndicatorId::IncompleteClientData => "Share of clients with missing or inconsistent identity data",
            IndicatorId::AboveMunicipalMean => "Share of operations well above their municipality mean",
            IndicatorId::SuddenGrowth => "Mean month-over-month growth in clients or amounts",
            IndicatorId::DestinationConcentration => "Share of an agent's operations above their destination mean, worst agent",
            IndicatorId::UnusualTiming => "Share of clients operating in bursts or outside business hours",
            IndicatorId::AgentAsSender => "Agent-as-sender activity relative to ordinary clients",
            IndicatorId::NationalityMismatch => "Share of clients sending to a country unrelated to them",
            IndicatorId::RepeatedBeneficiaryData => "Share of senders involved in beneficiaries shared with other senders",
        }
    }

    pub fn indicator_type(&self) -> IndicatorType {
        match self.number() {
            1 | 2 | 3 | 13 | 20 => IndicatorType::Documentation,
            4..=7 => IndicatorType::Thresholds,
            8 | 11 | 16 | 19 => IndicatorType::Geographic,
            _ => IndicatorType::Outliers,
        }
    }

    pub fn default_breakpoints(&self) -> Breakpoints {
        match self {
            IndicatorId::DocumentReuse => Breakpoints::new(12.5, 20.0, 27.5),
            IndicatorId::DocumentNameMismatch => Breakpoints::new(10.0, 15.0, 20.0),
            IndicatorId::InvalidDocument => Breakpoints::new(3.0, 4.0, 5.0),
            IndicatorId::ThresholdAvoidance => Breakpoints::new(12.0, 15.0, 18.0),
            IndicatorId::FragmentedBeneficiary => Breakpoints::new(0.25, 0.5, 1.0),
            IndicatorId::RoundAmounts => Breakpoints::new(0.0, 0.5, 1.0),
            IndicatorId::Cancellations => Breakpoints::new(0.0, 0.5, 1.0),
            IndicatorId::HighRiskDestination => Breakpoints::new(13.0, 14.0, 15.0),
            IndicatorId::ProfileDeviation => Breakpoints::new(0.5, 1.0, 2.0),
            IndicatorId::PoliticallyExposed => Breakpoints::new(1.0, 1.5, 2.0),
            IndicatorId::HighRiskCorridor => Breakpoints::new(20.0, 21.0, 22.0),
            IndicatorId::AgentVolume => Breakpoints::new(0.125, 0.25, 0.5),
            IndicatorId::IncompleteClientData => Breakpoints::new(34.0, 35.5, 37.0),
            IndicatorId::AboveMunicipalMean => Breakpoints::new(21.5, 23.0, 24.5),
            IndicatorId::SuddenGrowth => Breakpoints::new(0.0, 4.0, 8.0),
            IndicatorId::DestinationConcentration => Breakpoints::new(50.0, 60.0, 70.0),
            IndicatorId::UnusualTiming => Breakpoints::new(15.0, 20.0, 25.0),
            IndicatorId::AgentAsSender => Breakpoints::new(0.25, 0.5, 0.75),
            IndicatorId::NationalityMismatch => Breakpoints::new(6.5, 7.0, 8.5),
            IndicatorId::RepeatedBeneficiaryData => Breakpoints::new(20.0, 25.0, 30.0),
        }
    }

    /// Percent weight in the composite score
    pub fn default_weight(&self) -> f64 {
        match self.number() {
            2 | 8 | 10 => 10.0,
            3 | 5 | 12 | 13 | 17 | 20 => 2.5,
            _ => 5.0,
        }
    }
}

impl From<IndicatorId> for u8 {
    fn from(id: IndicatorId) -> u8 {
        id.number()
    }
}

impl TryFrom<u8> for IndicatorId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        IndicatorId::from_number(value).ok_or_else(|| format!("unknown indicator {}", value))
    }
}

impl std::fmt::Display for IndicatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Transaction flagged by a detector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlaggedTransaction {
    pub transaction_id: String,
    pub reason: String,
}

/// Outcome of one indicator for one subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorResult {
    pub indicator: IndicatorId,
    pub score: u8,
    pub risk_ratio: f64,
    pub flagged: Vec<FlaggedTransaction>,
}

impl IndicatorResult {
    /// Score 1 with nothing flagged
    pub fn safe_default(indicator: IndicatorId) -> Self {
        Self {
            indicator,
            score: 1,
            risk_ratio: 0.0,
            flagged: Vec::new(),
        }
    }

    pub(crate) fn scored(indicator: IndicatorId, ratio: f64, breakpoints: Breakpoints, flags: Flags) -> Self {
        let risk_ratio = if ratio.is_finite() { ratio } else { 0.0 };
        Self {
            indicator,
            score: breakpoints.score(risk_ratio),
            risk_ratio,
            flagged: flags.into_flagged(),
        }
    }

    pub fn flagged_ids(&self) -> Vec<&str> {
        self.flagged.iter().map(|f| f.transaction_id.as_str()).collect()
    }

    pub fn is_flagged(&self, transaction_id: &str) -> bool {
        self.flagged.iter().any(|f| f.transaction_id == transaction_id)
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Flag collector keyed by row position; repeated flags merge their reasons
#[derive(Debug, Default)]
pub(crate) struct Flags {
    rows: BTreeMap<usize, FlaggedTransaction>,
}

impl Flags {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn flag(&mut self, row: usize, tx: &Transaction, reason: impl Into<String>) {
        let reason = reason.into();
        match self.rows.get_mut(&row) {
            Some(existing) => {
                if !existing.reason.split(" | ").any(|r| r == reason) {
                    existing.reason.push_str(" | ");
                    existing.reason.push_str(&reason);
                }
            }
            None => {
                self.rows.insert(
                    row,
                    FlaggedTransaction {
                        transaction_id: tx.transaction_id.clone(),
                        reason,
                    },
                );
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    fn into_flagged(self) -> Vec<FlaggedTransaction> {
        self.rows.into_values().collect()
    }
}

/// Shared, read-only inputs of every detector
#[derive(Debug, Clone)]
pub struct DetectionContext {
    pub config: AnalyzerConfig,
    /// Date ages are measured against
    pub reference_date: NaiveDate,
    pub high_risk_destinations: CountryRiskList,
    pub high_risk_corridors: CountryRiskList,
}

impl DetectionContext {
    pub fn new(config: AnalyzerConfig) -> Self {
        let reference_date = config.reference_date.unwrap_or_else(|| Utc::now().date_naive());
        Self {
            high_risk_destinations: CountryRiskList::new(&config.high_risk_destinations),
            high_risk_corridors: CountryRiskList::new(&config.high_risk_corridors),
            reference_date,
            config,
        }
    }

    pub(crate) fn breakpoints(&self, id: IndicatorId) -> Breakpoints {
        self.config.breakpoints_for(id)
    }
}

/// Common detector interface
pub trait Indicator: Send + Sync {
    fn id(&self) -> IndicatorId;

    /// Columns the detector cannot run without
    fn required_columns(&self) -> &'static [Column];

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError>;
}

/// Detector registered for `id`
pub fn detector_for(id: IndicatorId) -> &'static dyn Indicator {
    match id {
        IndicatorId::DocumentReuse => &documentation::DocumentReuse,
        IndicatorId::DocumentNameMismatch => &documentation::DocumentNameMismatch,
        IndicatorId::InvalidDocument => &documentation::InvalidDocument,
        IndicatorId::ThresholdAvoidance => &thresholds::ThresholdAvoidance,
        IndicatorId::FragmentedBeneficiary => &thresholds::FragmentedBeneficiary,
        IndicatorId::RoundAmounts => &thresholds::RoundAmounts,
        IndicatorId::Cancellations => &thresholds::Cancellations,
        IndicatorId::HighRiskDestination => &geographic::HighRiskDestination,
        IndicatorId::ProfileDeviation => &behavioral::ProfileDeviation,
        IndicatorId::PoliticallyExposed => &behavioral::PoliticallyExposed,
        IndicatorId::HighRiskCorridor => &geographic::HighRiskCorridor,
        IndicatorId::AgentVolume => &behavioral::AgentVolume,
        IndicatorId::IncompleteClientData => &documentation::IncompleteClientData,
        IndicatorId::AboveMunicipalMean => &behavioral::AboveMunicipalMean,
        IndicatorId::SuddenGrowth => &behavioral::SuddenGrowth,
        IndicatorId::DestinationConcentration => &geographic::DestinationConcentration,
        IndicatorId::UnusualTiming => &behavioral::UnusualTiming,
        IndicatorId::AgentAsSender => &behavioral::AgentAsSender,
        IndicatorId::NationalityMismatch => &geographic::NationalityMismatch,
        IndicatorId::RepeatedBeneficiaryData => &documentation::RepeatedBeneficiaryData,
    }
}

/// Run one detector, replacing any failure with the safe default
pub fn evaluate(indicator: &dyn Indicator, set: &TransactionSet, ctx: &DetectionContext) -> IndicatorResult {
    let id = indicator.id();
    if set.is_empty() {
        return IndicatorResult::safe_default(id);
    }

    let outcome = set.require(indicator.required_columns()).and_then(|_| {
        panic::catch_unwind(AssertUnwindSafe(|| indicator.detect(set, ctx)))
            .unwrap_or_else(|payload| Err(DetectionError::Panicked(panic_message(payload.as_ref()))))
    });

    match outcome {
        Ok(result) => result,
        Err(DetectionError::MissingColumn(column)) => {
            debug!(indicator = id.number(), %column, "required column absent");
            IndicatorResult::safe_default(id)
        }
        Err(e) => {
            warn!(indicator = id.number(), error = %e, "indicator failed, using safe default");
            IndicatorResult::safe_default(id)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs the registered detectors over a subject's transactions
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    context: DetectionContext,
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default())
    }

    pub fn with_config(config: AnalyzerConfig) -> Self {
        Self {
            context: DetectionContext::new(config),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.context.config
    }

    pub fn context(&self) -> &DetectionContext {
        &self.context
    }

    /// All 20 indicators in parallel, returned in id order
    pub fn run(&self, set: &TransactionSet) -> Vec<IndicatorResult> {
        IndicatorId::ALL
            .par_iter()
            .map(|id| evaluate(detector_for(*id), set, &self.context))
            .collect()
    }

    pub fn run_one(&self, id: IndicatorId, set: &TransactionSet) -> IndicatorResult {
        evaluate(detector_for(id), set, &self.context)
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new()
    }
}

// Shared statistics

/// `part * 100 / whole`, zero for an empty whole.
///
/// Scaling before dividing keeps ratios that land on a breakpoint exact.
pub(crate) fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part * 100) as f64 / whole as f64
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation; undefined below two values
pub(crate) fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Quantile with linear interpolation between closest ranks
pub(crate) fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub(crate) fn is_round_hundred(amount: f64) -> bool {
    amount % 100.0 == 0.0
}

/// Parsed amounts of the set
pub(crate) fn amounts(set: &TransactionSet) -> Vec<f64> {
    set.iter().filter_map(|t| t.amount).collect()
}

/// Row positions grouped by client key; rows without a key are skipped
pub(crate) fn rows_by_client(set: &TransactionSet) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (row, tx) in set.iter().enumerate() {
        if let Some(key) = tx.client_key() {
            groups.entry(key).or_default().push(row);
        }
    }
    groups
}

/// Row positions grouped by a text key
pub(crate) fn rows_by<F>(set: &TransactionSet, key: F) -> BTreeMap<String, Vec<usize>>
where
    F: Fn(&Transaction) -> Option<String>,
{
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (row, tx) in set.iter().enumerate() {
        if let Some(k) = key(tx) {
            groups.entry(k).or_default().push(row);
        }
    }
    groups
}
