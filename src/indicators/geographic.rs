//! Geographic indicators: 8, 11, 16 and 19

use super::{mean, percentage, rows_by, rows_by_client, DetectionContext, DetectionError, Flags, Indicator, IndicatorId, IndicatorResult};
use crate::geographic_risk::normalize_country;
use crate::{text, Column, TransactionSet};
use std::collections::{BTreeMap, BTreeSet};

/// 8: transfers to high-risk countries or to barely identified beneficiaries
pub(crate) struct HighRiskDestination;

impl Indicator for HighRiskDestination {
    fn id(&self) -> IndicatorId {
        IndicatorId::HighRiskDestination
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::DestinationCountry, Column::BeneficiaryFirstName, Column::BeneficiarySurname]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let min_len = ctx.config.params.min_beneficiary_name_len;
        let too_short = |v: &Option<String>| text(v).map_or(true, |s| s.chars().count() < min_len);
        let mut flags = Flags::new();

        for (row, tx) in set.iter().enumerate() {
            if let Some(country) = text(&tx.beneficiary.destination_country) {
                if ctx.high_risk_destinations.contains(country) {
                    flags.flag(row, tx, format!("Transfer to high-risk country: {}", country));
                }
            }
            if too_short(&tx.beneficiary.first_name) || too_short(&tx.beneficiary.surname) {
                flags.flag(row, tx, "Beneficiary with incomplete or suspicious data");
            }
        }

        let ratio = percentage(flags.len(), set.len());
        Ok(IndicatorResult::scored(self.id(), ratio, ctx.breakpoints(self.id()), flags))
    }
}

/// 11: clients using corridors towards higher-risk destinations
pub(crate) struct HighRiskCorridor;

impl Indicator for HighRiskCorridor {
    fn id(&self) -> IndicatorId {
        IndicatorId::HighRiskCorridor
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::DestinationCountry, Column::SenderDocumentNumber]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut risky = 0;

        for rows in clients.values() {
            let corridor_rows: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&r| {
                    text(&txs[r].beneficiary.destination_country)
                        .map_or(false, |c| ctx.high_risk_corridors.contains(c))
                })
                .collect();
            if !corridor_rows.is_empty() {
                risky += 1;
                for r in corridor_rows {
                    flags.flag(r, &txs[r], "Client sending to a high-risk corridor");
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

/// 16: agents whose amounts sit above each destination's own mean
pub(crate) struct DestinationConcentration;

impl Indicator for DestinationConcentration {
    fn id(&self) -> IndicatorId {
        IndicatorId::DestinationConcentration
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::AgentCode, Column::DestinationCountry, Column::Amount]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let destination_of = |r: usize| text(&txs[r].beneficiary.destination_country).map(normalize_country);

        let mut destination_means: BTreeMap<String, f64> = BTreeMap::new();
        for (destination, rows) in rows_by(set, |t| text(&t.beneficiary.destination_country).map(normalize_country)) {
            let values: Vec<f64> = rows.iter().filter_map(|&r| txs[r].amount).collect();
            if let Some(m) = mean(&values) {
                destination_means.insert(destination, m);
            }
        }

        let above = |r: usize| match (txs[r].amount, destination_of(r).and_then(|d| destination_means.get(&d).copied())) {
            (Some(amount), Some(m)) => amount > m,
            _ => false,
        };

        let mut flags = Flags::new();
        let mut worst: f64 = 0.0;

        for (agent, rows) in rows_by(set, |t| text(&t.agent_code).map(str::to_string)) {
            let counted: Vec<usize> = rows.iter().copied().filter(|&r| txs[r].amount.is_some()).collect();
            let above_count = counted.iter().filter(|&&r| above(r)).count();
            worst = worst.max(percentage(above_count, counted.len()));

            let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for r in counted {
                if let Some(d) = destination_of(r) {
                    groups.entry(d).or_default().push(r);
                }
            }
            for (destination, group) in groups {
                let high: Vec<usize> = group.iter().copied().filter(|&r| above(r)).collect();
                let share = percentage(high.len(), group.len());
                if share > ctx.config.params.destination_group_share {
                    let reason = format!(
                        "Agent {} with {:.1}% of operations above the {} mean",
                        agent, share, destination
                    );
                    for r in high {
                        flags.flag(r, &txs[r], reason.clone());
                    }
                }
            }
        }

        Ok(IndicatorResult::scored(self.id(), worst, ctx.breakpoints(self.id()), flags))
    }
}

/// 19: destinations unrelated to the sender's nationality or document
pub(crate) struct NationalityMismatch;

impl Indicator for NationalityMismatch {
    fn id(&self) -> IndicatorId {
        IndicatorId::NationalityMismatch
    }

    fn required_columns(&self) -> &'static [Column] {
        &[
            Column::AgentCode,
            Column::SenderBirthCountry,
            Column::SenderDocumentCountry,
            Column::DestinationCountry,
            Column::SenderDocumentNumber,
        ]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut risky = 0;

        for (client, rows) in &clients {
            let first = &txs[rows[0]];
            let birth = text(&first.sender.birth_country).map(normalize_country);
            let document = text(&first.sender.document_country).map(normalize_country);

            let destinations: BTreeSet<String> = rows
                .iter()
                .filter_map(|&r| text(&txs[r].beneficiary.destination_country).map(normalize_country))
                .collect();
            let foreign = destinations
                .iter()
                .find(|d| birth.as_ref() != Some(*d) && document.as_ref() != Some(*d));

            if let Some(destination) = foreign {
                risky += 1;
                let reason = format!(
                    "Client {}: destination {} differs from nationality {} and document country {}",
                    client,
                    destination,
                    birth.as_deref().unwrap_or("unknown"),
                    document.as_deref().unwrap_or("unknown")
                );
                for &r in rows {
                    flags.flag(r, &txs[r], reason.clone());
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
