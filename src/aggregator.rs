//! Weighted aggregation of indicator scores into risk profiles

use crate::indicators::IndicatorId;
use crate::GLOBAL_SUBJECT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Indicator families reported as separate sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndicatorType {
    #[serde(rename = "DOCUMENTACIÓN")]
    Documentation,
    #[serde(rename = "UMBRALES")]
    Thresholds,
    #[serde(rename = "GEOGRÁFICO")]
    Geographic,
    #[serde(rename = "OUTLIERS")]
    Outliers,
}

impl IndicatorType {
    pub const ALL: [IndicatorType; 4] = [
        IndicatorType::Documentation,
        IndicatorType::Thresholds,
        IndicatorType::Geographic,
        IndicatorType::Outliers,
    ];

    /// Indicators tagged with this type
    pub fn members(&self) -> Vec<IndicatorId> {
        IndicatorId::ALL
            .into_iter()
            .filter(|id| id.indicator_type() == *self)
            .collect()
    }
}

impl std::fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IndicatorType::Documentation => write!(f, "DOCUMENTACIÓN"),
            IndicatorType::Thresholds => write!(f, "UMBRALES"),
            IndicatorType::Geographic => write!(f, "GEOGRÁFICO"),
            IndicatorType::Outliers => write!(f, "OUTLIERS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "BAJO")]
    Bajo, // < 1.5
    #[serde(rename = "MEDIO")]
    Medio, // < 2.5
    #[serde(rename = "ALTO")]
    Alto, // < 3.5
    #[serde(rename = "MUY ALTO")]
    MuyAlto,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 1.5 {
            RiskLevel::Bajo
        } else if score < 2.5 {
            RiskLevel::Medio
        } else if score < 3.5 {
            RiskLevel::Alto
        } else {
            RiskLevel::MuyAlto
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RiskLevel::Bajo => write!(f, "BAJO"),
            RiskLevel::Medio => write!(f, "MEDIO"),
            RiskLevel::Alto => write!(f, "ALTO"),
            RiskLevel::MuyAlto => write!(f, "MUY ALTO"),
        }
    }
}

/// Weighted mean of the scores whose indicator carries a weight, clamped to
/// [1.0, 4.0]. Weights are normalized by their own sum, so they need not add
/// up to 100.
pub fn total_score(scores: &BTreeMap<IndicatorId, u8>, weights: &BTreeMap<IndicatorId, f64>) -> f64 {
    let (weighted, weight_sum) = scores
        .iter()
        .filter_map(|(id, score)| weights.get(id).map(|w| (f64::from(*score), *w)))
        .fold((0.0, 0.0), |(acc, sum), (score, w)| (acc + score * w, sum + w));

    if weight_sum <= 0.0 {
        return 1.0;
    }
    (weighted / weight_sum).clamp(1.0, 4.0)
}

/// Same weighted formula restricted to each indicator type
pub fn type_scores(
    scores: &BTreeMap<IndicatorId, u8>,
    weights: &BTreeMap<IndicatorId, f64>,
) -> BTreeMap<IndicatorType, f64> {
    IndicatorType::ALL
        .into_iter()
        .map(|kind| {
            let subset: BTreeMap<IndicatorId, u8> = scores
                .iter()
                .filter(|(id, _)| id.indicator_type() == kind)
                .map(|(id, score)| (*id, *score))
                .collect();
            (kind, total_score(&subset, weights))
        })
        .collect()
}

/// Aggregated risk of one subject: an agent code or the whole batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub subject: String,
    pub scores: BTreeMap<IndicatorId, u8>,
    pub type_scores: BTreeMap<IndicatorType, f64>,
    pub total_score: f64,
    pub level: RiskLevel,
}

impl RiskProfile {
    pub fn from_scores(
        subject: &str,
        scores: BTreeMap<IndicatorId, u8>,
        weights: &BTreeMap<IndicatorId, f64>,
    ) -> Self {
        let total = total_score(&scores, weights);
        let level = RiskLevel::from_score(total);
        debug!(subject, total, %level, "risk profile aggregated");

        Self {
            subject: subject.to_string(),
            type_scores: type_scores(&scores, weights),
            scores,
            total_score: total,
            level,
        }
    }

    pub fn is_global(&self) -> bool {
        self.subject == GLOBAL_SUBJECT
    }

    pub fn score(&self, id: IndicatorId) -> u8 {
        self.scores.get(&id).copied().unwrap_or(1)
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Mean score per indicator across agent profiles; the batch-wide profile is
/// ignored and indicators without agents default to 1.0
pub fn average_agent_scores(profiles: &[&RiskProfile]) -> BTreeMap<IndicatorId, f64> {
    let agents: Vec<&RiskProfile> = profiles.iter().copied().filter(|p| !p.is_global()).collect();

    IndicatorId::ALL
        .into_iter()
        .map(|id| {
            let values: Vec<f64> = agents
                .iter()
                .filter_map(|p| p.scores.get(&id))
                .map(|s| f64::from(*s))
                .collect();
            let average = if values.is_empty() {
                1.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            (id, average)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_weights() -> BTreeMap<IndicatorId, f64> {
        IndicatorId::ALL.into_iter().map(|id| (id, id.default_weight())).collect()
    }

    fn uniform_scores(score: u8) -> BTreeMap<IndicatorId, u8> {
        IndicatorId::ALL.into_iter().map(|id| (id, score)).collect()
    }

    fn create_test_profile(subject: &str, score: u8) -> RiskProfile {
        RiskProfile::from_scores(subject, uniform_scores(score), &default_weights())
    }

    #[test]
    fn test_uniform_scores() {
        for score in 1..=4 {
            let total = total_score(&uniform_scores(score), &default_weights());
            assert!((total - f64::from(score)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_weighted_average() {
        let mut scores = uniform_scores(1);
        scores.insert(IndicatorId::HighRiskDestination, 4);

        // weight 10 out of 100: 1 + 3 * 0.1
        let total = total_score(&scores, &default_weights());
        assert!((total - 1.3).abs() < 1e-9);
        assert_eq!(RiskLevel::from_score(total), RiskLevel::Bajo);
    }

    #[test]
    fn test_weights_normalized_by_present_sum() {
        let scores: BTreeMap<IndicatorId, u8> =
            [(IndicatorId::DocumentReuse, 4), (IndicatorId::InvalidDocument, 1)].into_iter().collect();
        let weights: BTreeMap<IndicatorId, f64> =
            [(IndicatorId::DocumentReuse, 30.0), (IndicatorId::InvalidDocument, 10.0)].into_iter().collect();

        let total = total_score(&scores, &weights);
        assert!((total - 3.25).abs() < 1e-9);
    }

    #[test]
    fn test_no_weights() {
        assert_eq!(total_score(&uniform_scores(4), &BTreeMap::new()), 1.0);
        assert_eq!(total_score(&BTreeMap::new(), &default_weights()), 1.0);
    }

    #[test]
    fn test_risk_level_boundaries() {
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Bajo);
        assert_eq!(RiskLevel::from_score(1.49), RiskLevel::Bajo);
        assert_eq!(RiskLevel::from_score(1.5), RiskLevel::Medio);
        assert_eq!(RiskLevel::from_score(2.5), RiskLevel::Alto);
        assert_eq!(RiskLevel::from_score(3.5), RiskLevel::MuyAlto);
        assert_eq!(RiskLevel::MuyAlto.to_string(), "MUY ALTO");
        assert!(RiskLevel::Alto > RiskLevel::Medio);
    }

    #[test]
    fn test_type_scores() {
        let mut scores = uniform_scores(1);
        for id in IndicatorType::Thresholds.members() {
            scores.insert(id, 4);
        }

        let by_type = type_scores(&scores, &default_weights());

        assert_eq!(by_type.len(), 4);
        assert!((by_type[&IndicatorType::Thresholds] - 4.0).abs() < 1e-9);
        assert!((by_type[&IndicatorType::Documentation] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_type_membership() {
        let total: usize = IndicatorType::ALL.iter().map(|t| t.members().len()).sum();
        assert_eq!(total, 20);
        assert_eq!(IndicatorType::Geographic.members().len(), 4);
        assert_eq!(IndicatorType::Outliers.members().len(), 7);
    }

    #[test]
    fn test_profile_serializes_level_name() {
        let json = create_test_profile("AG001", 4).to_json().unwrap();
        assert!(json.contains("\"MUY ALTO\""));
        assert!(json.contains("\"UMBRALES\""));
    }

    #[test]
    fn test_average_agent_scores_excludes_global() {
        let global = create_test_profile(GLOBAL_SUBJECT, 4);
        let first = create_test_profile("AG001", 1);
        let second = create_test_profile("AG002", 2);

        let averages = average_agent_scores(&[&global, &first, &second]);

        assert_eq!(averages.len(), 20);
        assert!(averages.values().all(|v| (v - 1.5).abs() < 1e-9));
    }

    #[test]
    fn test_average_agent_scores_without_agents() {
        let global = create_test_profile(GLOBAL_SUBJECT, 3);
        let averages = average_agent_scores(&[&global]);
        assert!(averages.values().all(|v| *v == 1.0));
    }

    proptest! {
        #[test]
        fn prop_total_score_in_range(raw in proptest::collection::vec(1u8..=4, 20)) {
            let scores: BTreeMap<IndicatorId, u8> = IndicatorId::ALL.into_iter().zip(raw).collect();
            let total = total_score(&scores, &default_weights());
            prop_assert!((1.0..=4.0).contains(&total));
        }

        #[test]
        fn prop_raising_one_score_never_lowers_total(
            raw in proptest::collection::vec(1u8..=3, 20),
            index in 0usize..20,
        ) {
            let weights = default_weights();
            let scores: BTreeMap<IndicatorId, u8> = IndicatorId::ALL.into_iter().zip(raw).collect();
            let mut raised = scores.clone();
            let id = IndicatorId::ALL[index];
            raised.insert(id, scores[&id] + 1);

            prop_assert!(total_score(&raised, &weights) >= total_score(&scores, &weights));
        }
    }
}
