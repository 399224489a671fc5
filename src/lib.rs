//! # AML Risk Analyzer
//!
//! Anti-money-laundering risk scoring and network analysis for remittance batches.
//!
//! ## Features
//!
//! - **Risk Indicators**: 20 independent detectors, each scored on an ordinal 1-4 scale
//! - **Weighted Aggregation**: composite score and BAJO/MEDIO/ALTO/MUY ALTO level per agent
//! - **Network Analysis**: sender/beneficiary graph with community detection
//! - **Structuring Detection**: smurfing patterns mined directly from the batch
//!
//! Every analysis entry point is total: malformed or degenerate input produces
//! low-risk defaults and empty collections instead of errors.

pub mod aggregator;
pub mod community;
pub mod config;
pub mod fraud_patterns;
pub mod geographic_risk;
pub mod indicators;
pub mod network_analysis;
pub mod validators;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator::{average_agent_scores, total_score, IndicatorType, RiskLevel, RiskProfile};
pub use community::{CommunityConfig, CommunityMethod};
pub use config::{AnalyzerConfig, Breakpoints, ConfigError};
pub use fraud_patterns::{PatternDetector, PatternThresholds, SmurfingReport};
pub use indicators::{DetectionError, IndicatorEngine, IndicatorId, IndicatorResult};
pub use network_analysis::{GraphExport, GraphFilter, NetworkAnalysis};
pub use validators::{resolve_country_fuzzy, validate_national_id};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;
use uuid::Uuid;

/// Subject identifier used for the whole-batch profile
pub const GLOBAL_SUBJECT: &str = "GLOBAL";

/// Input columns supplied by the ingestion layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Column {
    TransactionId,
    Date,
    Time,
    Amount,
    Status,
    OriginCountry,
    SenderFirstName,
    SenderSurname,
    SenderSecondSurname,
    SenderDocumentCountry,
    SenderDocumentNumber,
    SenderBirthCountry,
    SenderBirthDate,
    SenderIsAgent,
    SenderIsPep,
    BeneficiaryFirstName,
    BeneficiarySurname,
    BeneficiarySecondSurname,
    DestinationCountry,
    AgentCity,
    ObligatedSubject,
    AgentCode,
}

impl Column {
    pub const ALL: [Column; 22] = [
        Column::TransactionId,
        Column::Date,
        Column::Time,
        Column::Amount,
        Column::Status,
        Column::OriginCountry,
        Column::SenderFirstName,
        Column::SenderSurname,
        Column::SenderSecondSurname,
        Column::SenderDocumentCountry,
        Column::SenderDocumentNumber,
        Column::SenderBirthCountry,
        Column::SenderBirthDate,
        Column::SenderIsAgent,
        Column::SenderIsPep,
        Column::BeneficiaryFirstName,
        Column::BeneficiarySurname,
        Column::BeneficiarySecondSurname,
        Column::DestinationCountry,
        Column::AgentCity,
        Column::ObligatedSubject,
        Column::AgentCode,
    ];

    /// Canonical header name in the source files
    pub fn header(&self) -> &'static str {
        match self {
            Column::TransactionId => "NUMERO_TRANSACCION",
            Column::Date => "FECHA",
            Column::Time => "HORA",
            Column::Amount => "IMPORTE",
            Column::Status => "ESTADO_OPERACION",
            Column::OriginCountry => "PAIS_ORIGEN",
            Column::SenderFirstName => "NOMBRE_ORDENANTE",
            Column::SenderSurname => "APELLIDO_ORDENANTE",
            Column::SenderSecondSurname => "SEGUNDO_APELLIDO_ORDENANTE",
            Column::SenderDocumentCountry => "PAIS_DOC_ORDENANTE",
            Column::SenderDocumentNumber => "NUM_DOC_ORDENANTE",
            Column::SenderBirthCountry => "PAIS_NAC_ORDENANTE",
            Column::SenderBirthDate => "FECHA_NAC_ORDENANTE",
            Column::SenderIsAgent => "ES_AGENTE",
            Column::SenderIsPep => "ES_PEP",
            Column::BeneficiaryFirstName => "NOMBRE_BENEFICIARIO",
            Column::BeneficiarySurname => "APELLIDO_BENEFICIARIO",
            Column::BeneficiarySecondSurname => "SEGUNDO_APELLIDO_BENEFICIARIO",
            Column::DestinationCountry => "PAIS_DESTINO",
            Column::AgentCity => "ENT_TOW_CIT_RES",
            Column::ObligatedSubject => "ENT_COD_PAR_ENT",
            Column::AgentCode => "ENT_NAT_REF_COD",
        }
    }

    /// Resolve a header (case-insensitive) to its column
    pub fn from_header(header: &str) -> Option<Column> {
        let wanted = header.trim().to_uppercase();
        Column::ALL.iter().copied().find(|c| c.header() == wanted)
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header())
    }
}

/// Operation status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Successful,
    Cancelled,
    Failed,
}

impl TransactionStatus {
    /// Parse the status as written by the ingestion layer (Spanish or English)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "EXITOSA" | "COMPLETADA" | "SUCCESSFUL" | "SUCCESS" => Some(Self::Successful),
            "CANCELADA" | "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
            "FALLIDA" | "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Successful => write!(f, "SUCCESSFUL"),
            TransactionStatus::Cancelled => write!(f, "CANCELLED"),
            TransactionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Sender (ordenante) attributes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SenderDetails {
    pub first_name: Option<String>,
    pub surname: Option<String>,
    pub second_surname: Option<String>,
    pub document_number: Option<String>,
    pub document_country: Option<String>,
    pub birth_country: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub is_agent: Option<bool>,
    pub is_pep: Option<bool>,
}

/// Beneficiary attributes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BeneficiaryDetails {
    pub first_name: Option<String>,
    pub surname: Option<String>,
    pub second_surname: Option<String>,
    pub destination_country: Option<String>,
}

/// Remittance record.
///
/// Every ingested cell is optional: a value the ingestion layer could not
/// parse arrives as `None` and is left out of aggregate statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub transaction_id: String,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub amount: Option<f64>,
    pub status: Option<TransactionStatus>,
    pub origin_country: Option<String>,
    pub sender: SenderDetails,
    pub beneficiary: BeneficiaryDetails,
    pub agent_city: Option<String>,
    pub obligated_subject: Option<String>,
    pub agent_code: Option<String>,
}

impl Transaction {
    /// Create an empty record with only its identifier
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            date: None,
            time: None,
            amount: None,
            status: None,
            origin_country: None,
            sender: SenderDetails::default(),
            beneficiary: BeneficiaryDetails::default(),
            agent_city: None,
            obligated_subject: None,
            agent_code: None,
        }
    }

    /// Behavioral grouping key: document number, else the sender's name parts
    pub fn client_key(&self) -> Option<String> {
        if let Some(doc) = text(&self.sender.document_number) {
            return Some(doc.to_string());
        }
        let name = self.sender_full_name();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    pub fn sender_full_name(&self) -> String {
        join_names(&[
            &self.sender.first_name,
            &self.sender.surname,
            &self.sender.second_surname,
        ])
    }

    pub fn beneficiary_full_name(&self) -> String {
        join_names(&[
            &self.beneficiary.first_name,
            &self.beneficiary.surname,
            &self.beneficiary.second_surname,
        ])
    }

    /// Local wall-clock timestamp when both date and time are known
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        Some(self.date?.and_time(self.time?))
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == Some(TransactionStatus::Cancelled)
    }
}

/// Trimmed, non-empty view of an optional text cell
pub(crate) fn text(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn join_names(parts: &[&Option<String>]) -> String {
    parts
        .iter()
        .filter_map(|p| text(p))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Immutable snapshot of a batch together with the columns it carries
#[derive(Debug, Clone, Default)]
pub struct TransactionSet {
    transactions: Vec<Transaction>,
    columns: BTreeSet<Column>,
}

impl TransactionSet {
    pub fn new(transactions: Vec<Transaction>, columns: impl IntoIterator<Item = Column>) -> Self {
        Self {
            transactions,
            columns: columns.into_iter().collect(),
        }
    }

    /// Snapshot where every known column was supplied
    pub fn with_all_columns(transactions: Vec<Transaction>) -> Self {
        Self::new(transactions, Column::ALL)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn columns(&self) -> &BTreeSet<Column> {
        &self.columns
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    /// Fail with the first absent column
    pub fn require(&self, columns: &[Column]) -> Result<(), DetectionError> {
        match columns.iter().find(|c| !self.has_column(**c)) {
            Some(missing) => Err(DetectionError::MissingColumn(missing.header().to_string())),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.transactions.iter()
    }

    /// Distinct acting-agent codes, sorted
    pub fn agents(&self) -> Vec<String> {
        self.transactions
            .iter()
            .filter_map(|t| text(&t.agent_code))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Subset keeping the same column set
    pub fn filter<F>(&self, predicate: F) -> TransactionSet
    where
        F: Fn(&Transaction) -> bool,
    {
        TransactionSet {
            transactions: self.transactions.iter().filter(|t| predicate(t)).cloned().collect(),
            columns: self.columns.clone(),
        }
    }

    /// Transactions handled by one agent
    pub fn for_agent(&self, agent_code: &str) -> TransactionSet {
        self.filter(|t| text(&t.agent_code) == Some(agent_code))
    }
}

/// Indicator results and profile for one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectAssessment {
    pub profile: RiskProfile,
    pub results: Vec<IndicatorResult>,
}

impl SubjectAssessment {
    /// Indicators that flagged at least one transaction
    pub fn triggered(&self) -> impl Iterator<Item = &IndicatorResult> {
        self.results.iter().filter(|r| !r.flagged.is_empty())
    }
}

/// Complete output of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub transaction_count: usize,
    pub config_version: String,
    pub global: SubjectAssessment,
    pub agents: BTreeMap<String, SubjectAssessment>,
    pub agent_averages: BTreeMap<IndicatorId, f64>,
    pub network: GraphExport,
    pub patterns: SmurfingReport,
}

impl AnalysisReport {
    /// Agents at or above the given level, highest score first
    pub fn agents_at_or_above(&self, level: RiskLevel) -> Vec<&RiskProfile> {
        let mut profiles: Vec<&RiskProfile> = self
            .agents
            .values()
            .map(|a| &a.profile)
            .filter(|p| p.level >= level)
            .collect();
        profiles.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        profiles
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Batch risk analyzer
pub struct RiskAnalyzer {
    engine: IndicatorEngine,
}

impl RiskAnalyzer {
    /// Create analyzer with default configuration
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default())
    }

    /// Create analyzer with custom configuration
    pub fn with_config(config: AnalyzerConfig) -> Self {
        Self {
            engine: IndicatorEngine::with_config(config),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        self.engine.config()
    }

    /// Run all indicators over `set` and aggregate them under `subject`
    pub fn assess(&self, set: &TransactionSet, subject: &str) -> SubjectAssessment {
        let results = self.engine.run(set);
        let scores: BTreeMap<IndicatorId, u8> = results.iter().map(|r| (r.indicator, r.score)).collect();
        let profile = RiskProfile::from_scores(subject, scores, &self.config().weights);
        SubjectAssessment { profile, results }
    }

    pub fn assess_global(&self, set: &TransactionSet) -> SubjectAssessment {
        self.assess(set, GLOBAL_SUBJECT)
    }

    /// Profiles per agent, over all agents or only `selection`
    pub fn assess_agents(
        &self,
        set: &TransactionSet,
        selection: Option<&[String]>,
    ) -> BTreeMap<String, SubjectAssessment> {
        let agents = match selection {
            Some(selected) => selected.to_vec(),
            None => set.agents(),
        };
        agents
            .par_iter()
            .map(|agent| (agent.clone(), self.assess(&set.for_agent(agent), agent)))
            .collect()
    }

    pub fn analyze_network(&self, set: &TransactionSet, filter: &GraphFilter) -> NetworkAnalysis {
        NetworkAnalysis::build(set, filter, &self.config().community)
    }

    pub fn detect_patterns(&self, set: &TransactionSet) -> SmurfingReport {
        PatternDetector::with_thresholds(self.config().patterns.clone()).detect(set)
    }

    /// Run every branch concurrently over the same snapshot
    pub fn analyze(&self, set: &TransactionSet) -> AnalysisReport {
        info!(transactions = set.len(), "starting batch analysis");

        let ((global, agents), (network, patterns)) = rayon::join(
            || rayon::join(|| self.assess_global(set), || self.assess_agents(set, None)),
            || {
                rayon::join(
                    || self.analyze_network(set, &GraphFilter::default()),
                    || self.detect_patterns(set),
                )
            },
        );

        let profiles: Vec<&RiskProfile> = agents.values().map(|a| &a.profile).collect();
        let agent_averages = aggregator::average_agent_scores(&profiles);

        info!(
            level = %global.profile.level,
            score = global.profile.total_score,
            agents = agents.len(),
            communities = network.communities.len(),
            "batch analysis finished"
        );

        AnalysisReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            transaction_count: set.len(),
            config_version: self.config().version.clone(),
            global,
            agents,
            agent_averages,
            network: network.export(),
            patterns,
        }
    }
}

impl Default for RiskAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
