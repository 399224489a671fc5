//! Analyzer configuration
//!
//! Breakpoints, weights and detector parameters are business rules, versioned
//! together and loadable from JSON.

use crate::community::CommunityConfig;
use crate::fraud_patterns::PatternThresholds;
use crate::geographic_risk::{HIGH_RISK_CORRIDORS, HIGH_RISK_DESTINATIONS};
use crate::indicators::IndicatorId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("Unable to read configuration: {0}")]
    Io(String),

    #[error("Malformed configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Ratio-to-score breakpoints of one indicator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Breakpoints {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Breakpoints {
    pub const fn new(low: f64, medium: f64, high: f64) -> Self {
        Self { low, medium, high }
    }

    /// Map a risk ratio onto the ordinal 1-4 scale.
    ///
    /// Each step is strict, so a ratio sitting exactly on a breakpoint keeps
    /// the lower score. NaN scores 1.
    pub fn score(&self, ratio: f64) -> u8 {
        if ratio > self.high {
            4
        } else if ratio > self.medium {
            3
        } else if ratio > self.low {
            2
        } else {
            1
        }
    }

    fn is_monotone(&self) -> bool {
        self.low.is_finite()
            && self.medium.is_finite()
            && self.high.is_finite()
            && self.low <= self.medium
            && self.medium <= self.high
    }

    /// Published default table
    pub fn defaults() -> BTreeMap<IndicatorId, Breakpoints> {
        IndicatorId::ALL
            .iter()
            .map(|id| (*id, id.default_breakpoints()))
            .collect()
    }
}

/// Tunable parameters of the individual detectors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorParams {
    pub short_interval_days: i64,
    pub frequent_operations: usize,
    pub very_frequent_operations: usize,
    pub near_threshold_client_share: f64,
    pub fragmentation_min_senders: usize,
    pub fragmentation_window_days: i64,
    pub round_amount_percentile: f64,
    pub round_amount_client_share: f64,
    pub cancellation_min_count: usize,
    pub cancellation_near_min_count: usize,
    pub cancellation_near_band: f64,
    pub min_beneficiary_name_len: usize,
    pub profile_min_operations: usize,
    pub profile_sigma: f64,
    pub profile_max_multiplier: f64,
    pub profile_dominant_min_count: usize,
    pub profile_client_share: f64,
    pub agent_volume_multiplier: f64,
    pub country_match_threshold: f64,
    pub min_age: i32,
    pub max_age: i32,
    pub municipal_mean_multiplier: f64,
    pub destination_group_share: f64,
    pub short_interval_minutes: i64,
    pub business_hours_start: u32,
    pub business_hours_end: u32,
    pub unusual_timing_client_share: f64,
    pub agent_flag_score: u8,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            short_interval_days: 3,
            frequent_operations: 5,
            very_frequent_operations: 10,
            near_threshold_client_share: 35.0, // percent of a client's operations
            fragmentation_min_senders: 3,
            fragmentation_window_days: 180,
            round_amount_percentile: 0.85,
            round_amount_client_share: 0.5,
            cancellation_min_count: 3,
            cancellation_near_min_count: 2,
            cancellation_near_band: 500.0, // around the reporting threshold
            min_beneficiary_name_len: 3,
            profile_min_operations: 3,
            profile_sigma: 2.0,
            profile_max_multiplier: 1.5,
            profile_dominant_min_count: 3,
            profile_client_share: 0.75,
            agent_volume_multiplier: 1.5,
            country_match_threshold: 70.0,
            min_age: 12,
            max_age: 100,
            municipal_mean_multiplier: 1.5,
            destination_group_share: 10.0,
            short_interval_minutes: 60,
            business_hours_start: 9,
            business_hours_end: 22,
            unusual_timing_client_share: 10.0,
            agent_flag_score: 3,
        }
    }
}

/// Full analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Version tag of the breakpoint table
    pub version: String,
    pub reporting_threshold: f64,
    pub near_threshold_ratio: f64,
    pub breakpoints: BTreeMap<IndicatorId, Breakpoints>,
    /// Percent weights; need not sum to 100
    pub weights: BTreeMap<IndicatorId, f64>,
    pub params: IndicatorParams,
    pub high_risk_destinations: Vec<String>,
    pub high_risk_corridors: Vec<String>,
    /// Date used for age checks; today when unset
    pub reference_date: Option<NaiveDate>,
    pub patterns: PatternThresholds,
    pub community: CommunityConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            version: "UMBRALES_DEFAULT-1".to_string(),
            reporting_threshold: 3000.0, // EUR communication threshold
            near_threshold_ratio: 0.85,
            breakpoints: Breakpoints::defaults(),
            weights: IndicatorId::ALL
                .iter()
                .map(|id| (*id, id.default_weight()))
                .collect(),
            params: IndicatorParams::default(),
            high_risk_destinations: HIGH_RISK_DESTINATIONS.iter().map(|c| c.to_string()).collect(),
            high_risk_corridors: HIGH_RISK_CORRIDORS.iter().map(|c| c.to_string()).collect(),
            reference_date: None,
            patterns: PatternThresholds::default(),
            community: CommunityConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Parse and validate a JSON document; absent keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: AnalyzerConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reporting_threshold.is_nan() || self.reporting_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "reporting threshold must be positive, got {}",
                self.reporting_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.near_threshold_ratio) {
            return Err(ConfigError::Invalid(format!(
                "near threshold ratio must lie in [0, 1], got {}",
                self.near_threshold_ratio
            )));
        }
        for (id, bp) in &self.breakpoints {
            if !bp.is_monotone() {
                return Err(ConfigError::Invalid(format!(
                    "breakpoints of indicator {} are not increasing",
                    id
                )));
            }
        }
        for (id, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "weight of indicator {} must be a non-negative number",
                    id
                )));
            }
        }
        let p = &self.params;
        if p.business_hours_start > 24 || p.business_hours_end > 24 {
            return Err(ConfigError::Invalid("business hours must lie within 0..=24".to_string()));
        }
        if p.min_age > p.max_age {
            return Err(ConfigError::Invalid("minimum age exceeds maximum age".to_string()));
        }
        Ok(())
    }

    /// Breakpoints of `id`, falling back to the published default
    pub fn breakpoints_for(&self, id: IndicatorId) -> Breakpoints {
        self.breakpoints
            .get(&id)
            .copied()
            .unwrap_or_else(|| id.default_breakpoints())
    }

    /// Lower bound of the near-threshold band
    pub fn near_threshold_floor(&self) -> f64 {
        self.reporting_threshold * self.near_threshold_ratio
    }

    /// Amount in `[floor, threshold)`
    pub fn is_near_threshold(&self, amount: f64) -> bool {
        amount >= self.near_threshold_floor() && amount < self.reporting_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_breakpoint_steps_are_strict() {
        let bp = Breakpoints::new(13.0, 14.0, 15.0);
        assert_eq!(bp.score(12.0), 1);
        assert_eq!(bp.score(13.0), 1);
        assert_eq!(bp.score(13.5), 2);
        assert_eq!(bp.score(14.5), 3);
        assert_eq!(bp.score(15.0), 3);
        assert_eq!(bp.score(16.0), 4);
        assert_eq!(bp.score(f64::NAN), 1);
    }

    #[test]
    fn test_zero_low_breakpoint() {
        let bp = Breakpoints::new(0.0, 0.5, 1.0);
        assert_eq!(bp.score(0.0), 1);
        assert_eq!(bp.score(0.1), 2);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalyzerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.breakpoints.len(), 20);
        assert_eq!(config.weights.len(), 20);
        assert!((config.weights.values().sum::<f64>() - 100.0).abs() < 1e-9);
        assert_eq!(config.near_threshold_floor(), 2550.0);
        assert!(config.is_near_threshold(2550.0));
        assert!(!config.is_near_threshold(3000.0));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "reporting_threshold": 5000.0, "breakpoints": { "8": { "low": 1.0, "medium": 2.0, "high": 3.0 } } }"#;
        let config = AnalyzerConfig::from_json(json).unwrap();

        assert_eq!(config.reporting_threshold, 5000.0);
        assert_eq!(config.breakpoints_for(IndicatorId::HighRiskDestination).high, 3.0);
        assert_eq!(config.breakpoints.len(), 1);
        assert_eq!(config.breakpoints_for(IndicatorId::DocumentReuse).low, 12.5);
        assert_eq!(config.params, IndicatorParams::default());
    }

    #[test]
    fn test_invalid_breakpoints_rejected() {
        let json = r#"{ "breakpoints": { "1": { "low": 5.0, "medium": 2.0, "high": 3.0 } } }"#;
        assert!(matches!(AnalyzerConfig::from_json(json), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let json = r#"{ "weights": { "3": -1.0 } }"#;
        assert!(matches!(AnalyzerConfig::from_json(json), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(AnalyzerConfig::from_json("{ not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut config = AnalyzerConfig::default();
        config.version = "2025-Q1".to_string();
        config.params.country_match_threshold = 80.0;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

        let loaded = AnalyzerConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = AnalyzerConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
