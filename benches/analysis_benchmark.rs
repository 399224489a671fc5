use aml_risk_analyzer::{
    BeneficiaryDetails, CommunityConfig, GraphFilter, IndicatorEngine, NetworkAnalysis,
    PatternDetector, RiskAnalyzer, SenderDetails, Transaction, TransactionSet,
};
use chrono::{NaiveDate, NaiveTime};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const COUNTRIES: [&str; 6] = ["Colombia", "Venezuela", "Ecuador", "Marruecos", "Francia", "Perú"];

fn synthetic_batch(size: usize) -> TransactionSet {
    let transactions = (0..size)
        .map(|i| Transaction {
            date: NaiveDate::from_ymd_opt(2024, 1 + (i % 6) as u32, 1 + (i % 28) as u32),
            time: NaiveTime::from_hms_opt((i % 24) as u32, 0, 0),
            amount: Some(100.0 + (i * 37 % 4000) as f64),
            sender: SenderDetails {
                first_name: Some(format!("Sender{}", i % 97)),
                surname: Some("Lopez".to_string()),
                document_number: Some(format!("{:08}Z", i % 97)),
                document_country: Some(COUNTRIES[i % COUNTRIES.len()].to_string()),
                ..Default::default()
            },
            beneficiary: BeneficiaryDetails {
                first_name: Some(format!("Beneficiary{}", i % 53)),
                surname: Some("Garcia".to_string()),
                destination_country: Some(COUNTRIES[(i / 7) % COUNTRIES.len()].to_string()),
                ..Default::default()
            },
            agent_city: Some("Madrid".to_string()),
            agent_code: Some(format!("AG{:03}", i % 12)),
            ..Transaction::new(format!("TXN-{}", i))
        })
        .collect();
    TransactionSet::with_all_columns(transactions)
}

fn benchmark_indicators(c: &mut Criterion) {
    let mut group = c.benchmark_group("indicators");
    let engine = IndicatorEngine::new();

    for size in [100, 1_000, 5_000].iter() {
        let batch = synthetic_batch(*size);
        group.bench_with_input(BenchmarkId::new("run", size), &batch, |b, batch| {
            b.iter(|| black_box(engine.run(batch)));
        });
    }
    group.finish();
}

fn benchmark_network(c: &mut Criterion) {
    let mut group = c.benchmark_group("network");
    let config = CommunityConfig::default();

    for size in [100, 1_000].iter() {
        let batch = synthetic_batch(*size);
        group.bench_with_input(BenchmarkId::new("build", size), &batch, |b, batch| {
            b.iter(|| black_box(NetworkAnalysis::build(batch, &GraphFilter::default(), &config)));
        });
    }
    group.finish();
}

fn benchmark_patterns(c: &mut Criterion) {
    let detector = PatternDetector::new();
    let batch = synthetic_batch(5_000);

    c.bench_function("smurfing_patterns", |b| {
        b.iter(|| black_box(detector.detect(&batch)));
    });
}

fn benchmark_full_analysis(c: &mut Criterion) {
    let analyzer = RiskAnalyzer::new();
    let batch = synthetic_batch(1_000);

    c.bench_function("full_analysis", |b| {
        b.iter(|| black_box(analyzer.analyze(&batch)));
    });
}

criterion_group!(
    benches,
    benchmark_indicators,
    benchmark_network,
    benchmark_patterns,
    benchmark_full_analysis
);
criterion_main!(benches);
