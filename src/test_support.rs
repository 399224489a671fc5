//! Fixtures shared by the unit tests

use crate::config::Breakpoints;
use crate::indicators::percentage;
use crate::{BeneficiaryDetails, SenderDetails, Transaction, TransactionSet, TransactionStatus};
use chrono::{NaiveDate, NaiveTime};

pub(crate) fn date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

pub(crate) fn time(hour: u32, minute: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Valid DNI built from `number`
pub(crate) fn valid_dni(number: u32) -> String {
    const LETTERS: &[u8] = b"TRWAGMYFPDXBNJZSQVHLCKE";
    let body = number % 100_000_000;
    format!("{:08}{}", body, LETTERS[(body % 23) as usize] as char)
}

/// Complete, unremarkable transaction: French client sending to France
/// through agent AG001 in Madrid.
pub(crate) fn create_test_transaction(id: &str, document: &str, amount: f64) -> Transaction {
    Transaction {
        transaction_id: id.to_string(),
        date: date(2024, 3, 1),
        time: time(12, 0),
        amount: Some(amount),
        status: Some(TransactionStatus::Successful),
        origin_country: Some("España".to_string()),
        sender: SenderDetails {
            first_name: Some("Juan".to_string()),
            surname: Some("Perez".to_string()),
            second_surname: Some("Lopez".to_string()),
            document_number: Some(document.to_string()),
            document_country: Some("Francia".to_string()),
            birth_country: Some("Francia".to_string()),
            birth_date: date(1980, 5, 10),
            is_agent: Some(false),
            is_pep: Some(false),
        },
        beneficiary: BeneficiaryDetails {
            first_name: Some("Maria".to_string()),
            surname: Some("Garcia".to_string()),
            second_surname: Some("Ruiz".to_string()),
            destination_country: Some("Francia".to_string()),
        },
        agent_city: Some("Madrid".to_string()),
        obligated_subject: Some("SO01".to_string()),
        agent_code: Some("AG001".to_string()),
    }
}

pub(crate) fn full_set(transactions: Vec<Transaction>) -> TransactionSet {
    TransactionSet::with_all_columns(transactions)
}

/// Fixture whose beneficiary is unique to the transaction
pub(crate) fn with_beneficiary(mut tx: Transaction, first: &str, surname: &str, country: &str) -> Transaction {
    tx.beneficiary.first_name = Some(first.to_string());
    tx.beneficiary.surname = Some(surname.to_string());
    tx.beneficiary.destination_country = Some(country.to_string());
    tx
}

/// `(part, score)` pairs around each breakpoint of a `part` out of `whole`
/// percentage: a ratio exactly on a breakpoint keeps the lower score and one
/// more part steps up.
pub(crate) fn breakpoint_steps(breakpoints: Breakpoints, whole: usize) -> Vec<(usize, u8)> {
    let edges = [breakpoints.low, breakpoints.medium, breakpoints.high];
    let mut steps = Vec::new();
    for (i, edge) in edges.iter().enumerate() {
        let part = (edge * whole as f64 / 100.0).round() as usize;
        assert_eq!(percentage(part, whole), *edge, "{} of {} misses the breakpoint", part, whole);
        let next = edges.get(i + 1).copied().unwrap_or(f64::INFINITY);
        assert!(percentage(part + 1, whole) <= next, "{} of {} skips past {}", part + 1, whole, next);

        let below = i as u8 + 1;
        steps.push((part, below));
        steps.push((part + 1, below + 1));
    }
    steps
}

/// One unremarkable operation per client; `adjust` receives the client index
pub(crate) fn client_batch(clients: usize, adjust: impl Fn(usize, &mut Transaction)) -> Vec<Transaction> {
    (0..clients)
        .map(|i| {
            let mut tx = create_test_transaction(&format!("C{}", i), &valid_dni(i as u32), 100.0);
            adjust(i, &mut tx);
            tx
        })
        .collect()
}
