//! Documentation indicators: 1, 2, 3, 13 and 20

use super::{percentage, rows_by, rows_by_client, DetectionContext, DetectionError, Flags, Indicator, IndicatorId, IndicatorResult};
use crate::validators::{resolve_country_fuzzy, validate_national_id};
use crate::{text, Column, Transaction, TransactionSet};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 1: same document used repeatedly within a short span
pub(crate) struct DocumentReuse;

impl Indicator for DocumentReuse {
    fn id(&self) -> IndicatorId {
        IndicatorId::DocumentReuse
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::Date, Column::SenderDocumentNumber]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let params = &ctx.config.params;
        let txs = set.transactions();
        let clients = rows_by_client(set);
        let mut flags = Flags::new();
        let mut risky = 0;

        for rows in clients.values() {
            let mut ordered = rows.clone();
            ordered.sort_by_key(|&r| (txs[r].date.is_none(), txs[r].date, r));

            let short_gap = ordered.windows(2).any(|pair| match (txs[pair[0]].date, txs[pair[1]].date) {
                (Some(a), Some(b)) => (b - a).num_days() <= params.short_interval_days,
                _ => false,
            });

            let reason = if short_gap {
                Some(format!("Frequent operations (<= {} days apart)", params.short_interval_days))
            } else if ordered.len() > params.very_frequent_operations {
                Some(format!("More than {} operations", params.very_frequent_operations))
            } else if ordered.len() > params.frequent_operations {
                Some(format!("More than {} operations", params.frequent_operations))
            } else {
                None
            };

            if let Some(reason) = reason {
                risky += 1;
                let first = ordered[0];
                flags.flag(first, &txs[first], reason);
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

/// 2: one document number associated with several names
pub(crate) struct DocumentNameMismatch;

impl Indicator for DocumentNameMismatch {
    fn id(&self) -> IndicatorId {
        IndicatorId::DocumentNameMismatch
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::SenderDocumentNumber, Column::SenderFirstName, Column::SenderSurname]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let documents = rows_by(set, document_of);
        let mut flags = Flags::new();
        let mut risky = 0;

        for (doc, rows) in &documents {
            let names: BTreeSet<String> = rows.iter().map(|&r| txs[r].sender_full_name().to_uppercase()).collect();
            if names.len() > 1 {
                risky += 1;
                let reason = format!("Document {} used under {} different names", doc, names.len());
                for &r in rows {
                    flags.flag(r, &txs[r], reason.clone());
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(risky, documents.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

/// 3: documents failing the DNI/NIE checksum, worst agent
pub(crate) struct InvalidDocument;

impl Indicator for InvalidDocument {
    fn id(&self) -> IndicatorId {
        IndicatorId::InvalidDocument
    }

    fn required_columns(&self) -> &'static [Column] {
        &[Column::SenderDocumentNumber, Column::AgentCode]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let agents = rows_by(set, |t| text(&t.agent_code).map(str::to_string));
        let mut flags = Flags::new();
        let mut worst: f64 = 0.0;

        for rows in agents.values() {
            let mut documents: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for &r in rows {
                if let Some(doc) = text(&txs[r].sender.document_number) {
                    documents.entry(doc).or_default().push(r);
                }
            }

            let mut invalid = 0;
            for (doc, doc_rows) in &documents {
                if !validate_national_id(doc) {
                    invalid += 1;
                    for &r in doc_rows {
                        flags.flag(r, &txs[r], format!("Invalid DNI/NIE document {}", doc));
                    }
                }
            }
            worst = worst.max(percentage(invalid, documents.len()));
        }

        Ok(IndicatorResult::scored(self.id(), worst, ctx.breakpoints(self.id()), flags))
    }
}

/// 13: clients registered with missing or implausible data
pub(crate) struct IncompleteClientData;

impl IncompleteClientData {
    fn problems(tx: &Transaction, ctx: &DetectionContext, countries: &mut HashMap<String, bool>) -> Vec<String> {
        let mandatory = [
            text(&tx.sender.first_name),
            text(&tx.sender.surname),
            text(&tx.beneficiary.first_name),
            text(&tx.beneficiary.surname),
            text(&tx.sender.document_country),
            text(&tx.sender.document_number),
            text(&tx.sender.birth_country),
            text(&tx.beneficiary.destination_country),
        ];
        let birth_date = match tx.sender.birth_date {
            Some(d) if mandatory.iter().all(Option::is_some) => d,
            _ => return vec!["missing mandatory data".to_string()],
        };

        let params = &ctx.config.params;
        let mut problems = Vec::new();
        let age = age_at(birth_date, ctx.reference_date);
        if age < params.min_age || age > params.max_age {
            problems.push(format!("age {} outside [{}, {}]", age, params.min_age, params.max_age));
        }

        let threshold = params.country_match_threshold;
        let mut resolves = |country: &str| {
            *countries
                .entry(country.to_string())
                .or_insert_with(|| resolve_country_fuzzy(country, threshold).is_some())
        };
        if let Some(birth) = text(&tx.sender.birth_country) {
            if !resolves(birth) {
                problems.push(format!("unrecognized birth country '{}'", birth));
            }
        }
        if let Some(destination) = text(&tx.beneficiary.destination_country) {
            if !resolves(destination) {
                problems.push(format!("unrecognized destination country '{}'", destination));
            }
        }
        problems
    }
}

impl Indicator for IncompleteClientData {
    fn id(&self) -> IndicatorId {
        IndicatorId::IncompleteClientData
    }

    fn required_columns(&self) -> &'static [Column] {
        &[
            Column::AgentCode,
            Column::SenderDocumentNumber,
            Column::SenderFirstName,
            Column::SenderSurname,
            Column::BeneficiaryFirstName,
            Column::BeneficiarySurname,
            Column::SenderDocumentCountry,
            Column::SenderBirthCountry,
            Column::DestinationCountry,
            Column::SenderBirthDate,
        ]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let clients = rows_by(set, document_of);
        let mut countries = HashMap::new();
        let mut flags = Flags::new();
        let mut erroneous = 0;

        for (doc, rows) in &clients {
            let problems = Self::problems(&txs[rows[0]], ctx, &mut countries);
            if !problems.is_empty() {
                erroneous += 1;
                let reason = format!("Client {} with incomplete or erroneous data: {}", doc, problems.join(", "));
                for &r in rows {
                    flags.flag(r, &txs[r], reason.clone());
                }
            }
        }

        Ok(IndicatorResult::scored(
            self.id(),
            percentage(erroneous, clients.len()),
            ctx.breakpoints(self.id()),
            flags,
        ))
    }
}

/// 20: the same beneficiary data typed in for several senders
pub(crate) struct RepeatedBeneficiaryData;

impl Indicator for RepeatedBeneficiaryData {
    fn id(&self) -> IndicatorId {
        IndicatorId::RepeatedBeneficiaryData
    }

    fn required_columns(&self) -> &'static [Column] {
        &[
            Column::SenderDocumentNumber,
            Column::BeneficiaryFirstName,
            Column::BeneficiarySurname,
            Column::BeneficiarySecondSurname,
            Column::DestinationCountry,
        ]
    }

    fn detect(&self, set: &TransactionSet, ctx: &DetectionContext) -> Result<IndicatorResult, DetectionError> {
        let txs = set.transactions();
        let all_senders: BTreeSet<String> = txs.iter().filter_map(document_of).collect();

        let mut involved: BTreeSet<String> = BTreeSet::new();
        for rows in rows_by(set, beneficiary_key).values() {
            let senders: BTreeSet<String> = rows.iter().filter_map(|&r| document_of(&txs[r])).collect();
            if senders.len() > 1 {
                involved.extend(senders);
            }
        }

        let ratio = percentage(involved.len(), all_senders.len());
        let mut flags = Flags::new();
        let reason = format!("Beneficiary data repeated across senders ({:.1}% of senders affected)", ratio);
        for (row, tx) in txs.iter().enumerate() {
            if document_of(tx).map_or(false, |doc| involved.contains(&doc)) {
                flags.flag(row, tx, reason.clone());
            }
        }

        Ok(IndicatorResult::scored(self.id(), ratio, ctx.breakpoints(self.id()), flags))
    }
}

fn document_of(tx: &Transaction) -> Option<String> {
    text(&tx.sender.document_number).map(str::to_string)
}

/// `name|surname|second|destination`, lower-cased; none when the name is blank
fn beneficiary_key(tx: &Transaction) -> Option<String> {
    let b = &tx.beneficiary;
    if text(&b.first_name).is_none() && text(&b.surname).is_none() {
        return None;
    }
    let part = |v: &Option<String>| text(v).unwrap_or("").to_lowercase();
    Some(format!(
        "{}|{}|{}|{}",
        part(&b.first_name),
        part(&b.surname),
        part(&b.second_surname),
        part(&b.destination_country)
    ))
}

/// Completed years between `birth` and `on`
fn age_at(birth: NaiveDate, on: NaiveDate) -> i32 {
    let before_birthday = (on.month(), on.day()) < (birth.month(), birth.day());
    on.year() - birth.year() - i32::from(before_birthday)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::test_support::*;

    fn context() -> DetectionContext {
        let mut config = AnalyzerConfig::default();
        config.reference_date = date(2024, 6, 1);
        DetectionContext::new(config)
    }

    #[test]
    fn test_document_reuse_short_gap() {
        let mut a = create_test_transaction("T1", "12345678Z", 100.0);
        let mut b = create_test_transaction("T2", "12345678Z", 100.0);
        a.date = date(2024, 3, 5);
        b.date = date(2024, 3, 3);
        let quiet = create_test_transaction("T3", &valid_dni(7), 100.0);

        let result = DocumentReuse.detect(&full_set(vec![a, b, quiet]), &context()).unwrap();

        // the earlier operation represents the client
        assert_eq!(result.flagged_ids(), vec!["T2"]);
        assert!(result.flagged[0].reason.contains("days apart"));
        assert_eq!(result.risk_ratio, 50.0);
        assert_eq!(result.score, 4);
    }

    #[test]
    fn test_document_reuse_operation_count() {
        let transactions: Vec<Transaction> = (0..6)
            .map(|i| {
                let mut tx = create_test_transaction(&format!("T{}", i), "12345678Z", 100.0);
                tx.date = date(2024, 1 + i, 1);
                tx
            })
            .collect();
        let result = DocumentReuse.detect(&full_set(transactions), &context()).unwrap();

        assert_eq!(result.flagged.len(), 1);
        assert_eq!(result.flagged[0].reason, "More than 5 operations");
    }

    #[test]
    fn test_document_reuse_sparse_client() {
        let mut a = create_test_transaction("T1", "12345678Z", 100.0);
        let mut b = create_test_transaction("T2", "12345678Z", 100.0);
        a.date = date(2024, 1, 1);
        b.date = date(2024, 2, 1);
        let result = DocumentReuse.detect(&full_set(vec![a, b]), &context()).unwrap();
        assert_eq!(result.score, 1);
        assert!(result.flagged.is_empty());
    }

    #[test]
    fn test_name_mismatch() {
        let a = create_test_transaction("T1", "12345678Z", 100.0);
        let mut b = create_test_transaction("T2", "12345678Z", 100.0);
        b.sender.first_name = Some("Pedro".to_string());
        let mut c = create_test_transaction("T3", "12345678Z", 100.0);
        c.sender.first_name = Some("JUAN".to_string());
        let other = create_test_transaction("T4", &valid_dni(1), 100.0);

        let result = DocumentNameMismatch.detect(&full_set(vec![a, b, c, other]), &context()).unwrap();

        assert_eq!(result.flagged_ids(), vec!["T1", "T2", "T3"]);
        assert_eq!(result.risk_ratio, 50.0);
        assert_eq!(result.score, 4);
    }

    #[test]
    fn test_invalid_documents_per_agent() {
        let mut transactions = Vec::new();
        for i in 0..10 {
            transactions.push(create_test_transaction(&format!("A{}", i), &valid_dni(i), 100.0));
        }
        let mut bad = create_test_transaction("B1", "12345678A", 100.0);
        bad.agent_code = Some("AG002".to_string());
        let mut good = create_test_transaction("B2", &valid_dni(99), 100.0);
        good.agent_code = Some("AG002".to_string());
        transactions.extend([bad, good]);

        let result = InvalidDocument.detect(&full_set(transactions), &context()).unwrap();

        // AG002 has one bad document out of two
        assert_eq!(result.risk_ratio, 50.0);
        assert_eq!(result.score, 4);
        assert_eq!(result.flagged_ids(), vec!["B1"]);
    }

    #[test]
    fn test_all_documents_valid() {
        let transactions = (0..5)
            .map(|i| create_test_transaction(&format!("T{}", i), &valid_dni(i), 100.0))
            .collect();
        let result = InvalidDocument.detect(&full_set(transactions), &context()).unwrap();
        assert_eq!(result.score, 1);
    }

    #[test]
    fn test_incomplete_client_data() {
        let complete = create_test_transaction("T1", &valid_dni(1), 100.0);
        let mut missing = create_test_transaction("T2", &valid_dni(2), 100.0);
        missing.beneficiary.surname = None;
        let mut child = create_test_transaction("T3", &valid_dni(3), 100.0);
        child.sender.birth_date = date(2020, 1, 1);
        let mut unknown = create_test_transaction("T4", &valid_dni(4), 100.0);
        unknown.beneficiary.destination_country = Some("Xyzzyland".to_string());

        let result = IncompleteClientData
            .detect(&full_set(vec![complete, missing, child, unknown]), &context())
            .unwrap();

        assert_eq!(result.flagged_ids(), vec!["T2", "T3", "T4"]);
        assert!(result.flagged[0].reason.contains("missing mandatory data"));
        assert!(result.flagged[1].reason.contains("age 4"));
        assert!(result.flagged[2].reason.contains("Xyzzyland"));
        assert_eq!(result.risk_ratio, 75.0);
        assert_eq!(result.score, 4);
    }

    #[test]
    fn test_country_typos_are_tolerated() {
        let mut tx = create_test_transaction("T1", &valid_dni(1), 100.0);
        tx.sender.birth_country = Some("Marruecoss".to_string());
        let result = IncompleteClientData.detect(&full_set(vec![tx]), &context()).unwrap();
        assert!(result.flagged.is_empty());
    }

    #[test]
    fn test_repeated_beneficiary_data() {
        let a = create_test_transaction("T1", &valid_dni(1), 100.0);
        let b = create_test_transaction("T2", &valid_dni(2), 100.0);
        let c = with_beneficiary(create_test_transaction("T3", &valid_dni(3), 100.0), "Luis", "Diaz", "Francia");
        let d = with_beneficiary(create_test_transaction("T4", &valid_dni(4), 100.0), "Ana", "Soto", "Francia");

        let result = RepeatedBeneficiaryData.detect(&full_set(vec![a, b, c, d]), &context()).unwrap();

        assert_eq!(result.flagged_ids(), vec!["T1", "T2"]);
        assert_eq!(result.risk_ratio, 50.0);
        assert_eq!(result.score, 4);
    }

    #[test]
    fn test_age_calculation() {
        let birth = NaiveDate::from_ymd_opt(2000, 6, 2).unwrap();
        assert_eq!(age_at(birth, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()), 23);
        assert_eq!(age_at(birth, NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()), 24);
    }

    #[test]
    fn test_document_reuse_breakpoints() {
        let ctx = context();
        for (risky, score) in breakpoint_steps(IndicatorId::DocumentReuse.default_breakpoints(), 400) {
            let mut transactions = client_batch(400, |_, _| {});
            for i in 0..risky {
                transactions.push(create_test_transaction(&format!("R{}", i), &valid_dni(i as u32), 100.0));
            }
            let result = DocumentReuse.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.score, score, "{} of 400 clients reusing their document", risky);
        }
    }

    #[test]
    fn test_name_mismatch_breakpoints() {
        let ctx = context();
        for (risky, score) in breakpoint_steps(IndicatorId::DocumentNameMismatch.default_breakpoints(), 200) {
            let mut transactions = client_batch(200, |_, _| {});
            for i in 0..risky {
                let mut renamed = create_test_transaction(&format!("R{}", i), &valid_dni(i as u32), 100.0);
                renamed.sender.first_name = Some("Pedro".to_string());
                transactions.push(renamed);
            }
            let result = DocumentNameMismatch.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.score, score, "{} of 200 documents under two names", risky);
        }
    }

    #[test]
    fn test_invalid_document_breakpoints() {
        let ctx = context();
        for (invalid, score) in breakpoint_steps(IndicatorId::InvalidDocument.default_breakpoints(), 200) {
            let transactions = client_batch(200, |i, tx| {
                if i < invalid {
                    tx.sender.document_number = Some(format!("INV{:06}", i));
                }
            });
            let result = InvalidDocument.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.flagged.len(), invalid);
            assert_eq!(result.score, score, "{} of 200 invalid documents", invalid);
        }
    }

    #[test]
    fn test_incomplete_client_data_breakpoints() {
        let ctx = context();
        for (incomplete, score) in breakpoint_steps(IndicatorId::IncompleteClientData.default_breakpoints(), 200) {
            let transactions = client_batch(200, |i, tx| {
                if i < incomplete {
                    tx.beneficiary.surname = None;
                }
            });
            let result = IncompleteClientData.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.score, score, "{} of 200 incomplete clients", incomplete);
        }
    }

    #[test]
    fn test_repeated_beneficiary_breakpoints() {
        let ctx = context();
        for (involved, score) in breakpoint_steps(IndicatorId::RepeatedBeneficiaryData.default_breakpoints(), 200) {
            // the first `involved` senders share the fixture beneficiary
            let transactions = client_batch(200, |i, tx| {
                if i >= involved {
                    tx.beneficiary.surname = Some(format!("Unique{}", i));
                }
            });
            let result = RepeatedBeneficiaryData.detect(&full_set(transactions), &ctx).unwrap();
            assert_eq!(result.flagged.len(), involved);
            assert_eq!(result.score, score, "{} of 200 senders sharing a beneficiary", involved);
        }
    }
}
