//! Structuring (smurfing) pattern detection
//!
//! Three independent heuristics mined directly from the transaction set,
//! without the graph: many senders feeding one beneficiary, small same-day
//! operations adding up to a large total, and senders making many small
//! transfers.

use crate::{text, Column, Transaction, TransactionSet};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Columns every heuristic relies on
const PATTERN_COLUMNS: &[Column] = &[
    Column::TransactionId,
    Column::Date,
    Column::Amount,
    Column::SenderDocumentNumber,
    Column::BeneficiaryFirstName,
    Column::BeneficiarySurname,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    MultipleSendersSameBeneficiary,
    StructuredTransactions,
    FrequentSmallAmounts,
}

/// Pattern detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternThresholds {
    /// Distinct sender documents per beneficiary
    pub min_senders: usize,
    /// Amounts below this are small (EUR)
    pub small_amount: f64,
    /// Same-day operations per sender
    pub structured_min_count: usize,
    /// Same-day total that must be exceeded (EUR)
    pub structured_min_total: f64,
    /// Small operations per sender
    pub frequent_min_count: usize,
    /// Sample transaction ids kept per pattern
    pub sample_size: usize,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            min_senders: 3,
            small_amount: 1000.0,
            structured_min_count: 3,
            structured_min_total: 3000.0,
            frequent_min_count: 5,
            sample_size: 10,
        }
    }
}

/// Beneficiary receiving from several distinct senders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipleSendersPattern {
    pub beneficiary: String,
    pub num_senders: usize,
    pub total_amount: f64,
    pub transaction_count: usize,
    pub transactions: Vec<String>,
}

/// Small same-day operations of one sender adding up past the total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredPattern {
    pub sender: String,
    pub date: NaiveDate,
    pub transaction_count: usize,
    pub total_amount: f64,
    pub average_amount: f64,
    pub max_amount: f64,
    pub transactions: Vec<String>,
}

/// Sender making many small transfers across the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequentSmallPattern {
    pub sender: String,
    pub small_transaction_count: usize,
    pub total_amount: f64,
    pub average_amount: f64,
    pub date_range_days: Option<i64>,
    pub transactions: Vec<String>,
}

/// Detected patterns grouped by type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmurfingReport {
    pub multiple_senders_same_beneficiary: Vec<MultipleSendersPattern>,
    pub structured_transactions: Vec<StructuredPattern>,
    pub frequent_small_amounts: Vec<FrequentSmallPattern>,
}

impl SmurfingReport {
    /// Check if any suspicious patterns were found
    pub fn has_suspicious_activity(&self) -> bool {
        self.pattern_count() > 0
    }

    /// Get total pattern count
    pub fn pattern_count(&self) -> usize {
        self.multiple_senders_same_beneficiary.len()
            + self.structured_transactions.len()
            + self.frequent_small_amounts.len()
    }

    pub fn count(&self, pattern: PatternType) -> usize {
        match pattern {
            PatternType::MultipleSendersSameBeneficiary => self.multiple_senders_same_beneficiary.len(),
            PatternType::StructuredTransactions => self.structured_transactions.len(),
            PatternType::FrequentSmallAmounts => self.frequent_small_amounts.len(),
        }
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Smurfing pattern detector
pub struct PatternDetector {
    thresholds: PatternThresholds,
}

impl PatternDetector {
    /// Create new detector with default thresholds
    pub fn new() -> Self {
        Self::with_thresholds(PatternThresholds::default())
    }

    /// Create with custom thresholds
    pub fn with_thresholds(thresholds: PatternThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &PatternThresholds {
        &self.thresholds
    }

    /// Run the three heuristics; missing columns give an empty report
    pub fn detect(&self, set: &TransactionSet) -> SmurfingReport {
        if set.is_empty() {
            return SmurfingReport::default();
        }
        if let Err(e) = set.require(PATTERN_COLUMNS) {
            warn!(error = %e, "pattern columns missing, skipping smurfing detection");
            return SmurfingReport::default();
        }

        let report = SmurfingReport {
            multiple_senders_same_beneficiary: self.multiple_senders(set),
            structured_transactions: self.structured(set),
            frequent_small_amounts: self.frequent_small(set),
        };
        debug!(
            multiple_senders = report.multiple_senders_same_beneficiary.len(),
            structured = report.structured_transactions.len(),
            frequent_small = report.frequent_small_amounts.len(),
            "smurfing patterns detected"
        );
        report
    }

    fn sample(&self, rows: &[&Transaction]) -> Vec<String> {
        rows.iter()
            .take(self.thresholds.sample_size)
            .map(|t| t.transaction_id.clone())
            .collect()
    }

    fn multiple_senders(&self, set: &TransactionSet) -> Vec<MultipleSendersPattern> {
        let mut by_beneficiary: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
        for tx in set.iter() {
            let name = tx.beneficiary_full_name();
            if !name.is_empty() {
                by_beneficiary.entry(name).or_default().push(tx);
            }
        }

        by_beneficiary
            .into_iter()
            .filter_map(|(beneficiary, rows)| {
                let senders: BTreeSet<&str> = rows.iter().filter_map(|t| text(&t.sender.document_number)).collect();
                if senders.len() < self.thresholds.min_senders {
                    return None;
                }
                Some(MultipleSendersPattern {
                    num_senders: senders.len(),
                    total_amount: rows.iter().filter_map(|t| t.amount).sum(),
                    transaction_count: rows.len(),
                    transactions: self.sample(&rows),
                    beneficiary,
                })
            })
            .collect()
    }

    fn structured(&self, set: &TransactionSet) -> Vec<StructuredPattern> {
        let mut by_sender_day: BTreeMap<(&str, NaiveDate), Vec<&Transaction>> = BTreeMap::new();
        for tx in set.iter() {
            if let (Some(sender), Some(date)) = (text(&tx.sender.document_number), tx.date) {
                by_sender_day.entry((sender, date)).or_default().push(tx);
            }
        }

        let t = &self.thresholds;
        by_sender_day
            .into_iter()
            .filter(|(_, rows)| rows.len() >= t.structured_min_count)
            .filter_map(|((sender, date), rows)| {
                let amounts: Vec<f64> = rows.iter().filter_map(|r| r.amount).collect();
                let max_amount = amounts.iter().copied().reduce(f64::max)?;
                let total_amount: f64 = amounts.iter().sum();
                if max_amount >= t.small_amount || total_amount <= t.structured_min_total {
                    return None;
                }
                Some(StructuredPattern {
                    sender: sender.to_string(),
                    date,
                    transaction_count: rows.len(),
                    total_amount,
                    average_amount: total_amount / rows.len() as f64,
                    max_amount,
                    transactions: rows.iter().map(|r| r.transaction_id.clone()).collect(),
                })
            })
            .collect()
    }

    fn frequent_small(&self, set: &TransactionSet) -> Vec<FrequentSmallPattern> {
        let mut by_sender: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
        for tx in set.iter() {
            let small = tx.amount.map_or(false, |a| a < self.thresholds.small_amount);
            if let (true, Some(sender)) = (small, text(&tx.sender.document_number)) {
                by_sender.entry(sender).or_default().push(tx);
            }
        }

        by_sender
            .into_iter()
            .filter(|(_, rows)| rows.len() >= self.thresholds.frequent_min_count)
            .map(|(sender, rows)| {
                let total_amount: f64 = rows.iter().filter_map(|r| r.amount).sum();
                let dates: Vec<NaiveDate> = rows.iter().filter_map(|r| r.date).collect();
                let date_range_days = match (dates.iter().min(), dates.iter().max()) {
                    (Some(first), Some(last)) => Some((*last - *first).num_days()),
                    _ => None,
                };
                FrequentSmallPattern {
                    sender: sender.to_string(),
                    small_transaction_count: rows.len(),
                    total_amount,
                    average_amount: total_amount / rows.len() as f64,
                    date_range_days,
                    transactions: self.sample(&rows),
                }
            })
            .collect()
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}
