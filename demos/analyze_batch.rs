//! Batch analysis example
//!
//! Builds a small remittance batch with a few planted anomalies, runs the
//! full analysis and prints the per-agent risk, the communities found in the
//! transaction network and the structuring patterns.

use aml_risk_analyzer::{
    AnalyzerConfig, BeneficiaryDetails, CommunityMethod, GraphFilter, RiskAnalyzer, RiskLevel,
    SenderDetails, Transaction, TransactionSet, TransactionStatus,
};
use chrono::{NaiveDate, NaiveTime};

fn transfer(
    id: usize,
    agent: &str,
    document: &str,
    sender: (&str, &str),
    beneficiary: (&str, &str, &str),
    amount: f64,
    day: u32,
    hour: u32,
) -> Transaction {
    Transaction {
        date: NaiveDate::from_ymd_opt(2024, 3, day),
        time: NaiveTime::from_hms_opt(hour, 15, 0),
        amount: Some(amount),
        status: Some(TransactionStatus::Successful),
        origin_country: Some("España".to_string()),
        sender: SenderDetails {
            first_name: Some(sender.0.to_string()),
            surname: Some(sender.1.to_string()),
            document_number: Some(document.to_string()),
            document_country: Some("Colombia".to_string()),
            birth_country: Some("Colombia".to_string()),
            birth_date: NaiveDate::from_ymd_opt(1985, 6, 1),
            is_agent: Some(false),
            is_pep: Some(false),
            ..Default::default()
        },
        beneficiary: BeneficiaryDetails {
            first_name: Some(beneficiary.0.to_string()),
            surname: Some(beneficiary.1.to_string()),
            destination_country: Some(beneficiary.2.to_string()),
            ..Default::default()
        },
        agent_city: Some("Madrid".to_string()),
        obligated_subject: Some("SO01".to_string()),
        agent_code: Some(agent.to_string()),
        ..Transaction::new(format!("TXN-{:04}", id))
    }
}

fn sample_batch() -> TransactionSet {
    let mut transactions = Vec::new();
    let mut id = 0;
    let mut next = || {
        id += 1;
        id
    };

    // Ordinary traffic through AG001
    for day in 1..=20 {
        transactions.push(transfer(
            next(),
            "AG001",
            "12345678Z",
            ("Carlos", "Rojas"),
            ("Lucia", "Rojas", "Colombia"),
            250.0 + f64::from(day) * 10.0,
            day,
            11,
        ));
    }

    // Three different senders feeding one beneficiary through AG002
    for (document, name) in [("X1234567L", "Pedro"), ("Y7654321G", "Marta"), ("00000001R", "Luis")] {
        transactions.push(transfer(
            next(),
            "AG002",
            document,
            (name, "Diaz"),
            ("Ana", "Gomez", "Venezuela"),
            2900.0,
            5,
            23,
        ));
    }

    // Same-day structuring through AG002
    for _ in 0..4 {
        transactions.push(transfer(
            next(),
            "AG002",
            "99999999R",
            ("Jorge", "Vidal"),
            ("Rosa", "Vidal", "Ecuador"),
            950.0,
            8,
            3,
        ));
    }

    TransactionSet::with_all_columns(transactions)
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    println!("=== AML Risk Analyzer ===\n");

    let batch = sample_batch();
    let analyzer = RiskAnalyzer::new();

    // Example 1: Full analysis
    println!("1. Batch Risk");
    let report = analyzer.analyze(&batch);
    println!("   Run ID: {}", report.run_id);
    println!("   Transactions: {}", report.transaction_count);
    println!(
        "   Global: {:.2} ({})",
        report.global.profile.total_score, report.global.profile.level
    );
    for result in report.global.triggered() {
        println!(
            "   - {} score {} ({} flagged)",
            result.indicator,
            result.score,
            result.flagged.len()
        );
    }
    println!();

    // Example 2: Agent ranking
    println!("2. Agents at MEDIO or above");
    for profile in report.agents_at_or_above(RiskLevel::Medio) {
        println!("   {}: {:.2} ({})", profile.subject, profile.total_score, profile.level);
    }
    println!();

    // Example 3: Network communities
    println!("3. Transaction Network");
    let network = analyzer.analyze_network(&batch, &GraphFilter::default().with_min_amount(500.0));
    let summary = network.summary();
    println!(
        "   {} nodes, {} edges, {:.2} EUR",
        summary.nodes, summary.edges, summary.total_value
    );
    if let Some(method) = network.method {
        println!("   Method: {}", method);
    }
    for community in &network.communities {
        println!("   - {}", community.name);
    }
    println!();

    // Example 4: Label propagation with a custom seed
    println!("4. Label Propagation");
    let mut config = AnalyzerConfig::default();
    config.community.method = CommunityMethod::LabelPropagation;
    config.community.seed = 7;
    let custom = RiskAnalyzer::with_config(config);
    let network = custom.analyze_network(&batch, &GraphFilter::default());
    println!("   Communities: {}", network.communities.len());
    println!();

    // Example 5: Structuring patterns
    println!("5. Structuring Patterns");
    let patterns = &report.patterns;
    println!("   Suspicious: {}", patterns.has_suspicious_activity());
    for pattern in &patterns.multiple_senders_same_beneficiary {
        println!(
            "   - {} received from {} senders ({:.2} EUR)",
            pattern.beneficiary, pattern.num_senders, pattern.total_amount
        );
    }
    for pattern in &patterns.structured_transactions {
        println!(
            "   - {} sent {} operations on {} ({:.2} EUR)",
            pattern.sender, pattern.transaction_count, pattern.date, pattern.total_amount
        );
    }
    println!();

    match report.to_json() {
        Ok(json) => println!("Report size: {} bytes of JSON", json.len()),
        Err(e) => eprintln!("Failed to serialize report: {}", e),
    }
}
