//! Threshold indicators: 4, 5, 6 and 7

use super::{amounts, is_round_hundred, percentage, quantile, rows_by, rows_by_client, DetectionContext, DetectionError, Flags, Indicator, IndicatorId, IndicatorResult};
use crate::{text, Column, TransactionSet};
use std::collections::BTreeSet;

/// 4: operations placed just below the reporting threshold
pub(crate) struct ThresholdAvoidance;

impl Indicator for ThresholdAvoidance {
    fn id(&self) -> IndicatorId {
        IndicatorId::ThresholdAvoidance
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::Amount, Column::Date, Column::SenderDocumentNumber]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let config = &ctx.config;
        let txs = set.transactions();
        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut risky = 0;

        for rows in clients.values() {
            let near: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&r| txs[r].amount.map_or(false, |a| config.is_near_threshold(a)))
                .collect();
            let share = percentage(near.len(), rows.len());
            if share > config.params.near_threshold_client_share {
                risky += 1;
                for r in near {
                    let amount = txs[r].amount.unwrap_or_default();
                    flags.flag(
                        r,
                        &txs[r],
                        format!(
                            "Amount {:.2} just below the {:.0} threshold ({:.1}% of the client's operations)",
                            amount, config.reporting_threshold, share
                        ),
                    );
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(risky, clients.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

/// 5: several senders feeding one beneficiary within a short window
pub(crate) struct FragmentedBeneficiary;

impl Indicator for FragmentedBeneficiary {
    fn id(&self) -> IndicatorId {
        IndicatorId::FragmentedBeneficiary
    }

    fn required_columns(&self) -> &'static [Column] {
        &[
            Column::Amount,
            Column::SenderDocumentNumber,
            Column::BeneficiaryFirstName,
            Column::BeneficiarySurname,
            Column::Date,
        ]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let params = &ctx.config.params;
        let txs = set.transactions();
        let beneficiaries = rows_by(set, |t| {
            let name = t.beneficiary_full_name().to_uppercase();
            (!name.is_empty()).then_some(name)
        });
        let mut flags = Flags::new();

        for rows in beneficiaries.values() {
            let senders: BTreeSet<&str> = rows
                .iter()
                .filter_map(|&r| text(&txs[r].sender.document_number))
                .collect();
            if senders.len() < params.fragmentation_min_senders {
                continue;
            }

            let dates: Vec<_> = rows.iter().filter_map(|&r| txs[r].date).collect();
            let span = match (dates.iter().min(), dates.iter().max()) {
                (Some(first), Some(last)) => (*last - *first).num_days(),
                _ => continue,
            };
            if span <= params.fragmentation_window_days {
                let reason = format!("{} senders in {} days", senders.len(), span);
                for &r in rows {
                    flags.flag(r, &txs[r], reason.clone());
                }
            }
        }

        let ratio = percentage(flags.len(), txs.len());
        Ok(IndicatorResult::scored(self.id(), ratio, ctx.breakpoints(self.id()), flags))
    }
}

/// 6: round-hundred amounts among the high or near-threshold values
pub(crate) struct RoundAmounts;

impl Indicator for RoundAmounts {
    fn id(&self) -> IndicatorId {
        IndicatorId::RoundAmounts
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::SenderDocumentNumber, Column::Amount]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let config = &ctx.config;
        let txs = set.transactions();
        let high = quantile(&amounts(set), config.params.round_amount_percentile)
            .ok_or_else(|| DetectionError::InsufficientData("no parseable amounts".to_string()))?;

        let is_risky = |amount: f64| is_round_hundred(amount) && (amount >= high || config.is_near_threshold(amount));

        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut risky = 0;

        for rows in clients.values() {
            let round: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&r| txs[r].amount.map_or(false, is_risky))
                .collect();
            let share = percentage(round.len(), rows.len());
            if share > config.params.round_amount_client_share {
                risky += 1;
                for r in round {
                    flags.flag(
                        r,
                        &txs[r],
                        format!("Round high amount {:.0} ({:.1}% of the client's operations)", txs[r].amount.unwrap_or_default(), share),
                    );
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(risky, clients.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

/// 7: clients cancelling repeatedly, mostly around the threshold
pub(crate) struct Cancellations;

impl Indicator for Cancellations {
    fn id(&self) -> IndicatorId {
        IndicatorId::Cancellations
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::Amount, Column::Status, Column::SenderDocumentNumber]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let config = &ctx.config;
        let params = &config.params;
        let txs = set.transactions();
        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut suspicious = 0;

        for rows in clients.values() {
            let cancelled: Vec<usize> = rows.iter().copied().filter(|&r| txs[r].is_cancelled()).collect();
            let near = cancelled
                .iter()
                .filter(|&&r| {
                    txs[r]
                        .amount
                        .map_or(false, |a| (a - config.reporting_threshold).abs() <= params.cancellation_near_band)
                })
                .count();

            if cancelled.len() >= params.cancellation_min_count || near >= params.cancellation_near_min_count {
                suspicious += 1;
                let reason = format!("{} cancelled operations, {} near the threshold", cancelled.len(), near);
                for r in cancelled {
                    flags.flag(r, &txs[r], reason.clone());
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(suspicious, clients.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::test_support::*;
    use crate::{Transaction, TransactionStatus};

    fn context() -> DetectionContext {
        DetectionContext::new(AnalyzerConfig::default())
    }

    #[test]
    fn test_threshold_avoidance() {
        let mut transactions = vec![
            create_test_transaction("T1", "12345678Z", 2900.0),
            create_test_transaction("T2", "12345678Z", 2600.0),
            create_test_transaction("T3", "12345678Z", 150.0),
        ];
        for i in 0..4 {
            transactions.push(create_test_transaction(&format!("C{}", i), &valid_dni(i), 2950.0 - 1000.0));
        }

        let result = ThresholdAvoidance.detect(&full_set(transactions), &context()).unwrap();

        assert_eq!(result.flagged_ids(), vec!["T1", "T2"]);
        assert_eq!(result.risk_ratio, 20.0);
        assert_eq!(result.score, 4);
    }

    #[test]
    fn test_threshold_band_edges() {
        let transactions = vec![
            create_test_transaction("T1", "12345678Z", 3000.0),
            create_test_transaction("T2", &valid_dni(1), 2549.99),
        ];
        let result = ThresholdAvoidance.detect(&full_set(transactions), &context()).unwrap();
        assert!(result.flagged.is_empty());
        assert_eq!(result.score, 1);
    }

    #[test]
    fn test_fragmented_beneficiary() {
        let mut transactions: Vec<Transaction> = (0..3)
            .map(|i| {
                let mut tx = create_test_transaction(&format!("F{}", i), &valid_dni(i), 500.0);
                tx.date = date(2024, 1 + i * 2, 1);
                tx
            })
            .collect();
        for i in 0..97 {
            transactions.push(with_beneficiary(
                create_test_transaction(&format!("N{}", i), &valid_dni(100 + i), 500.0),
                "Ben",
                &format!("Unique{}", i),
                "Francia",
            ));
        }

        let result = FragmentedBeneficiary.detect(&full_set(transactions), &context()).unwrap();

        assert_eq!(result.flagged_ids(), vec!["F0", "F1", "F2"]);
        assert_eq!(result.flagged[0].reason, "3 senders in 121 days");
        assert_eq!(result.risk_ratio, 3.0);
        assert_eq!(result.score, 4);
    }

    #[test]
    fn test_fragmented_outside_window() {
        let transactions: Vec<Transaction> = (0..3)
            .map(|i| {
                let mut tx = create_test_transaction(&format!("F{}", i), &valid_dni(i), 500.0);
                tx.date = date(2023 + i as i32, 1, 1);
                tx
            })
            .collect();
        let result = FragmentedBeneficiary.detect(&full_set(transactions), &context()).unwrap();
        assert!(result.flagged.is_empty());
    }

    #[test]
    fn test_round_amounts() {
        let mut transactions = vec![create_test_transaction("R1", "12345678Z", 5000.0)];
        for i in 0..9 {
            transactions.push(create_test_transaction(&format!("S{}", i), &valid_dni(i), 120.0 + i as f64));
        }

        let result = RoundAmounts.detect(&full_set(transactions), &context()).unwrap();

        assert_eq!(result.flagged_ids(), vec!["R1"]);
        assert_eq!(result.risk_ratio, 10.0);
        assert_eq!(result.score, 4);
    }

    #[test]
    fn test_round_amount_below_percentile() {
        let transactions = vec![
            create_test_transaction("R1", "12345678Z", 200.0),
            create_test_transaction("R2", &valid_dni(1), 1234.0),
            create_test_transaction("R3", &valid_dni(2), 1500.5),
        ];
        let result = RoundAmounts.detect(&full_set(transactions), &context()).unwrap();
        assert!(result.flagged.is_empty());
    }

    #[test]
    fn test_cancellations() {
        let mut near = Vec::new();
        for (i, amount) in [2800.0, 3400.0].iter().enumerate() {
            let mut tx = create_test_transaction(&format!("N{}", i), "12345678Z", *amount);
            tx.status = Some(TransactionStatus::Cancelled);
            near.push(tx);
        }
        let mut single = create_test_transaction("S1", &valid_dni(1), 100.0);
        single.status = Some(TransactionStatus::Cancelled);
        let mut transactions = near;
        transactions.push(single);
        transactions.push(create_test_transaction("OK", &valid_dni(2), 100.0));

        let result = Cancellations.detect(&full_set(transactions), &context()).unwrap();

        assert_eq!(result.flagged_ids(), vec!["N0", "N1"]);
        assert!((result.risk_ratio - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.score, 4);
    }

    #[test]
    fn test_threshold_avoidance_breakpoints() {
        let ctx = context();
        for (risky, score) in breakpoint_steps(IndicatorId::ThresholdAvoidance.default_breakpoints(), 200) {
            let transactions = client_batch(200, |i, tx| {
                if i < risky {
                    tx.amount = Some(2900.0);
                }
            });
            let result = ThresholdAvoidance.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.score, score, "{} of 200 clients below the threshold", risky);
        }
    }

    #[test]
    fn test_fragmented_beneficiary_breakpoints() {
        let ctx = context();
        for (fragmented, score) in breakpoint_steps(IndicatorId::FragmentedBeneficiary.default_breakpoints(), 1200) {
            // the first `fragmented` senders all pay the fixture beneficiary
            let transactions = client_batch(1200, |i, tx| {
                if i >= fragmented {
                    tx.beneficiary.surname = Some(format!("Unique{}", i));
                }
            });
            let result = FragmentedBeneficiary.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.flagged.len(), fragmented);
            assert_eq!(result.score, score, "{} of 1200 fragmented operations", fragmented);
        }
    }

    #[test]
    fn test_round_amounts_breakpoints() {
        let ctx = context();
        for (risky, score) in breakpoint_steps(IndicatorId::RoundAmounts.default_breakpoints(), 400) {
            let transactions = client_batch(400, |i, tx| {
                tx.amount = Some(if i < risky { 5000.0 } else { 120.5 });
            });
            let result = RoundAmounts.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.score, score, "{} of 400 clients with round amounts", risky);
        }
    }

    #[test]
    fn test_cancellations_breakpoints() {
        let ctx = context();
        for (suspicious, score) in breakpoint_steps(IndicatorId::Cancellations.default_breakpoints(), 400) {
            let mut transactions = client_batch(400, |i, tx| {
                if i < suspicious {
                    tx.status = Some(TransactionStatus::Cancelled);
                }
            });
            for i in 0..suspicious {
                for n in 0..2 {
                    let mut tx = create_test_transaction(&format!("X{}-{}", i, n), &valid_dni(i as u32), 100.0);
                    tx.status = Some(TransactionStatus::Cancelled);
                    transactions.push(tx);
                }
            }
            let result = Cancellations.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.score, score, "{} of 400 clients cancelling", suspicious);
        }
    }
}
