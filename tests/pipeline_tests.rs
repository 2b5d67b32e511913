/// Pipeline orchestration tests with in-process fake providers
/// Covers ordering, degradation, cancellation and scoring without any network
use async_trait::async_trait;
use cnae_prospector::config::{PipelineOptions, RetryPolicy};
use cnae_prospector::errors::AppError;
use cnae_prospector::models::{
    Address, CompanyQuery, CompanyRecord, EnrichmentResult, LeadScore, LeadTier, Source,
};
use cnae_prospector::pipeline::{Pipeline, PipelineStage};
use cnae_prospector::providers::{CompanyProvider, PrimarySource};
use cnae_prospector::scoring::LeadScorer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct FakePrimary {
    records: Vec<CompanyRecord>,
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl PrimarySource for FakePrimary {
    async fn search(&self, query: &CompanyQuery) -> Result<Vec<CompanyRecord>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.records.iter().take(query.limit()).cloned().collect())
    }
}

struct FailingPrimary(AppError);

#[async_trait]
impl PrimarySource for FailingPrimary {
    async fn search(&self, _query: &CompanyQuery) -> Result<Vec<CompanyRecord>, AppError> {
        Err(self.0.clone())
    }
}

/// Returns a city named after the CNPJ; earlier records answer last.
struct FakeLookup {
    source: Source,
    calls: AtomicUsize,
    fail: bool,
    delay: Duration,
}

impl FakeLookup {
    fn new(source: Source) -> Arc<Self> {
        Arc::new(Self {
            source,
            calls: AtomicUsize::new(0),
            fail: false,
            delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl CompanyProvider for FakeLookup {
    fn source(&self) -> Source {
        self.source
    }

    async fn lookup(&self, cnpj: &str) -> Result<EnrichmentResult, AppError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        tokio::time::sleep(self.delay + Duration::from_millis(20u64.saturating_sub(n * 5))).await;
        if self.fail {
            return Err(AppError::NotFound(cnpj.to_string()));
        }

        let mut result = EnrichmentResult::empty(self.source);
        result.details.address = Some(Address {
            city: Some(format!("Cidade {}", cnpj)),
            uf: Some("MG".to_string()),
            ..Address::default()
        });
        result.details.phone = Some("3432101234".to_string());
        Ok(result)
    }
}

fn shells(n: usize, with_address: &[usize]) -> Vec<CompanyRecord> {
    (0..n)
        .map(|i| {
            let mut record = CompanyRecord::new(format!("1122233300{:04}", i), format!("EMPRESA {}", i));
            if with_address.contains(&i) {
                record.details.address = Some(Address {
                    street: Some("Rua Goiás".to_string()),
                    city: Some("Uberlândia".to_string()),
                    ..Address::default()
                });
            }
            record
        })
        .collect()
}

fn primary(records: Vec<CompanyRecord>) -> Arc<FakePrimary> {
    Arc::new(FakePrimary {
        records,
        delay: Duration::ZERO,
        calls: AtomicUsize::new(0),
    })
}

fn options() -> PipelineOptions {
    PipelineOptions {
        concurrency: 3,
        retry: RetryPolicy::none(),
        ..PipelineOptions::default()
    }
}

fn query(limit: usize) -> CompanyQuery {
    CompanyQuery::new("5611-2/01", Some("MG"), None, limit).unwrap()
}

#[tokio::test]
async fn test_order_follows_primary_regardless_of_completion() {
    let fallback = FakeLookup::new(Source::Fallback);
    let pipeline = Pipeline::new(primary(shells(6, &[])), fallback.clone(), None, options());

    let run = pipeline.run(&query(6)).await.unwrap();

    for (i, record) in run.records.iter().enumerate() {
        assert_eq!(record.cnpj, format!("1122233300{:04}", i));
        let city = record.details.address.as_ref().unwrap().city.clone().unwrap();
        assert_eq!(city, format!("Cidade {}", record.cnpj));
    }
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_fallback_only_for_records_without_address() {
    let fallback = FakeLookup::new(Source::Fallback);
    let pipeline = Pipeline::new(primary(shells(5, &[0, 2, 4])), fallback.clone(), None, options());

    let run = pipeline.run(&query(5)).await.unwrap();

    assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
    assert_eq!(run.stats.fallback.requested, 2);
    assert_eq!(run.records[0].sources, vec![Source::Primary]);
    assert_eq!(run.records[1].sources, vec![Source::Primary, Source::Fallback]);
}

/// The pipeline merges whatever a lookup provider returns; restricting the
/// fallback to address fields is the BrasilAPI client's job.
#[tokio::test]
async fn test_every_missing_field_from_a_provider_is_merged() {
    let lookup = FakeLookup::new(Source::Fallback);
    let pipeline = Pipeline::new(primary(shells(1, &[])), lookup, None, options());

    let run = pipeline.run(&query(1)).await.unwrap();

    assert!(run.records[0].has_address());
    assert_eq!(run.records[0].details.phone.as_deref(), Some("3432101234"));
}

#[tokio::test]
async fn test_disabled_enrichment_is_never_called() {
    let fallback = FakeLookup::new(Source::Fallback);
    let enrichment = FakeLookup::new(Source::Enrichment);
    let pipeline = Pipeline::new(
        primary(shells(3, &[])),
        fallback,
        Some(enrichment.clone() as Arc<dyn CompanyProvider>),
        PipelineOptions {
            enrichment_enabled: false,
            ..options()
        },
    );

    let run = pipeline.run(&query(3)).await.unwrap();

    assert_eq!(enrichment.calls.load(Ordering::SeqCst), 0);
    assert!(run.stats.enrichment.is_none());
}

#[tokio::test]
async fn test_enrichment_runs_after_fallback() {
    let fallback = Arc::new(FakeLookup {
        source: Source::Fallback,
        calls: AtomicUsize::new(0),
        fail: true,
        delay: Duration::ZERO,
    });
    let enrichment = FakeLookup::new(Source::Enrichment);
    let pipeline = Pipeline::new(
        primary(shells(2, &[])),
        fallback,
        Some(enrichment.clone() as Arc<dyn CompanyProvider>),
        PipelineOptions {
            enrichment_enabled: true,
            ..options()
        },
    );

    let run = pipeline.run(&query(2)).await.unwrap();

    assert_eq!(run.stats.fallback.failed, 2);
    assert_eq!(enrichment.calls.load(Ordering::SeqCst), 2);
    assert!(run.records.iter().all(|r| r.has_address()));
    assert!(run
        .records
        .iter()
        .all(|r| r.sources == vec![Source::Primary, Source::Enrichment]));
}

#[tokio::test]
async fn test_empty_primary_result_is_success() {
    let fallback = FakeLookup::new(Source::Fallback);
    let pipeline = Pipeline::new(primary(Vec::new()), fallback.clone(), None, options());

    let run = pipeline.run(&query(10)).await.unwrap();

    assert!(run.records.is_empty());
    assert_eq!(run.stage, PipelineStage::PrimaryFetched);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_cnpjs_are_dropped() {
    let mut records = shells(3, &[0, 1, 2]);
    records.push(records[0].clone());
    let pipeline = Pipeline::new(primary(records), FakeLookup::new(Source::Fallback), None, options());

    let run = pipeline.run(&query(4)).await.unwrap();

    assert_eq!(run.records.len(), 3);
    assert_eq!(run.stats.primary, 3);
}

#[tokio::test]
async fn test_primary_failure_is_fatal() {
    let pipeline = Pipeline::new(
        Arc::new(FailingPrimary(AppError::Authentication("bad credentials".to_string()))),
        FakeLookup::new(Source::Fallback),
        None,
        options(),
    );

    let err = pipeline.run(&query(5)).await.unwrap_err();
    assert!(err.is_authentication());
}

#[tokio::test]
async fn test_cancel_before_primary_returns_cancelled() {
    let slow = Arc::new(FakePrimary {
        records: shells(2, &[]),
        delay: Duration::from_secs(10),
        calls: AtomicUsize::new(0),
    });
    let pipeline = Pipeline::new(slow, FakeLookup::new(Source::Fallback), None, options());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = pipeline.run_with_cancel(&query(2), &cancel).await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
}

#[tokio::test]
async fn test_cancel_during_fallback_keeps_partial_results() {
    let slow_fallback = Arc::new(FakeLookup {
        source: Source::Fallback,
        calls: AtomicUsize::new(0),
        fail: false,
        delay: Duration::from_secs(10),
    });
    let pipeline = Pipeline::new(primary(shells(3, &[1])), slow_fallback, None, options());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let run = pipeline.run_with_cancel(&query(3), &cancel).await.unwrap();

    assert_eq!(run.records.len(), 3);
    assert!(run.stats.cancelled);
    assert_eq!(run.stats.fallback.abandoned, 2);
    assert!(run.records[1].has_address());
    assert!(run.records.iter().all(|r| r.lead_score.is_some()));
    assert_eq!(run.stage, PipelineStage::Scored);
}

struct FixedScorer;

impl LeadScorer for FixedScorer {
    fn score(&self, _record: &CompanyRecord) -> LeadScore {
        LeadScore {
            value: 9,
            tier: LeadTier::High,
        }
    }
}

#[tokio::test]
async fn test_scorer_is_pluggable() {
    let pipeline = Pipeline::new(primary(shells(2, &[0, 1])), FakeLookup::new(Source::Fallback), None, options())
        .with_scorer(Arc::new(FixedScorer));

    let run = pipeline.run(&query(2)).await.unwrap();

    assert!(run
        .records
        .iter()
        .all(|r| r.lead_score == Some(LeadScore { value: 9, tier: LeadTier::High })));
}
