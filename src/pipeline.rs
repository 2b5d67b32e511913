//! The prospecting pipeline: primary search, fallback, enrichment, scoring, export.

use crate::auth::{NuvemFiscalAuth, TokenCache};
use crate::config::{Config, PipelineOptions};
use crate::enrichment::{apply_results, fan_out, FanOutSettings, FanOutStats};
use crate::errors::AppError;
use crate::export::Exporter;
use crate::ibge::IbgeResolver;
use crate::models::{dedup_by_cnpj, CompanyQuery, CompanyRecord};
use crate::providers::{harden, CompanyProvider, PrimarySource};
use crate::retry::retry;
use crate::scoring::{score_all, CompletenessScorer, LeadScorer};
use crate::services::{
    build_http_client, build_rate_limiter, BrasilApiClient, NuvemFiscalClient, RapidApiClient,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How far a run got. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Queried,
    PrimaryFetched,
    FallbackApplied,
    EnrichmentApplied,
    Scored,
    Exported,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Queried => "queried",
            PipelineStage::PrimaryFetched => "primary_fetched",
            PipelineStage::FallbackApplied => "fallback_applied",
            PipelineStage::EnrichmentApplied => "enrichment_applied",
            PipelineStage::Scored => "scored",
            PipelineStage::Exported => "exported",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Records kept from the primary source after dedup.
    pub primary: usize,
    pub fallback: FanOutStats,
    /// `None` when enrichment is disabled.
    pub enrichment: Option<FanOutStats>,
    /// The run was cut short and holds partial results.
    pub cancelled: bool,
}

/// One export attempt.
#[derive(Debug)]
pub struct ExportOutcome {
    pub target: &'static str,
    pub result: Result<String, AppError>,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub outcomes: Vec<ExportOutcome>,
}

impl ExportReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &AppError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.target, e)))
    }

    pub fn locations(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|l| (o.target, l.as_str())))
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct PipelineRun {
    pub query: CompanyQuery,
    pub stage: PipelineStage,
    pub records: Vec<CompanyRecord>,
    pub stats: PipelineStats,
}

impl PipelineRun {
    fn new(query: &CompanyQuery) -> Self {
        Self {
            query: query.clone(),
            stage: PipelineStage::Queried,
            records: Vec::new(),
            stats: PipelineStats::default(),
        }
    }

    /// Hands the records to every exporter, in order.
    ///
    /// A failing exporter does not stop the ones after it, and nothing already
    /// written is removed.
    pub async fn export(&mut self, exporters: &[&dyn Exporter], stem: &str) -> ExportReport {
        let mut report = ExportReport::default();

        for exporter in exporters {
            let result = exporter.export(&self.records, stem).await;
            if let Err(e) = &result {
                tracing::error!("❌ {} export failed: {}", exporter.target(), e);
            }
            report.outcomes.push(ExportOutcome {
                target: exporter.target(),
                result,
            });
        }

        if report.outcomes.iter().any(|o| o.result.is_ok()) {
            self.stage = PipelineStage::Exported;
        }
        report
    }
}

/// Primary search → fallback → optional enrichment → score.
pub struct Pipeline {
    primary: Arc<dyn PrimarySource>,
    fallback: Arc<dyn CompanyProvider>,
    enrichment: Option<Arc<dyn CompanyProvider>>,
    scorer: Arc<dyn LeadScorer>,
    options: PipelineOptions,
}

impl Pipeline {
    /// # Arguments
    ///
    /// * `enrichment` - Ignored unless `options.enrichment_enabled` is set.
    pub fn new(
        primary: Arc<dyn PrimarySource>,
        fallback: Arc<dyn CompanyProvider>,
        enrichment: Option<Arc<dyn CompanyProvider>>,
        options: PipelineOptions,
    ) -> Self {
        let enrichment = enrichment.filter(|_| options.enrichment_enabled);
        Self {
            primary,
            fallback,
            enrichment,
            scorer: Arc::new(CompletenessScorer),
            options,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn LeadScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Wires the real upstream clients from configuration.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let client = build_http_client(config.request_timeout)?;
        let limiter = build_rate_limiter(config.rate_limit_requests, config.rate_limit_period);

        let auth = NuvemFiscalAuth::new(
            client.clone(),
            &config.nuvem_fiscal_auth_url,
            &config.nuvem_fiscal_client_id,
            &config.nuvem_fiscal_client_secret,
        );
        let tokens = Arc::new(TokenCache::new(Arc::new(auth)));

        let brasil_api = Arc::new(BrasilApiClient::new(client.clone(), config, limiter.clone()));
        let ibge = Arc::new(IbgeResolver::new(brasil_api.clone()));
        let primary = NuvemFiscalClient::new(client.clone(), config, tokens, ibge, limiter.clone());

        let options = config.pipeline_options();
        let enrichment = if options.enrichment_enabled {
            RapidApiClient::new(client, config, limiter)
                .map(|rapid| harden(Arc::new(rapid), config))
        } else {
            None
        };

        tracing::info!(
            "✓ Pipeline ready (enrichment: {}, concurrency: {}, cache: {})",
            enrichment.is_some(),
            options.concurrency,
            config.cache_enabled
        );

        Ok(Self::new(
            Arc::new(primary),
            harden(brasil_api, config),
            enrichment,
            options,
        ))
    }

    pub async fn run(&self, query: &CompanyQuery) -> Result<PipelineRun, AppError> {
        self.run_with_cancel(query, &CancellationToken::new()).await
    }

    /// Runs the pipeline for one query.
    ///
    /// Cancellation before the primary search completes returns
    /// `AppError::Cancelled`. Afterwards the records gathered so far are
    /// scored and returned with `stats.cancelled` set.
    ///
    /// # Returns
    ///
    /// * `Err` only for primary-source failures. Fallback and enrichment
    ///   failures leave their fields empty.
    pub async fn run_with_cancel(
        &self,
        query: &CompanyQuery,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, AppError> {
        let mut run = PipelineRun::new(query);
        tracing::info!(
            "🚀 Prospecting CNAE {} in {} (limit {})",
            query.cnae(),
            query
                .city()
                .map(|c| format!("{}/{}", c, query.uf().unwrap_or_default()))
                .or_else(|| query.uf().map(str::to_string))
                .unwrap_or_else(|| "Brasil".to_string()),
            query.limit()
        );

        let records = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("⚠️ Cancelled before the primary search finished");
                return Err(AppError::Cancelled);
            }
            fetched = self.fetch_primary(query) => fetched?,
        };

        let mut records = dedup_by_cnpj(records);
        records.truncate(query.limit());
        run.stats.primary = records.len();
        run.records = records;
        run.stage = PipelineStage::PrimaryFetched;

        if run.records.is_empty() {
            tracing::info!("No companies found for CNAE {}", query.cnae());
            return Ok(run);
        }

        let settings = FanOutSettings {
            concurrency: self.options.concurrency,
            retry: self.options.retry,
            deadline: self
                .options
                .fanout_timeout
                .map(|t| tokio::time::Instant::now() + t),
            cancel: cancel.clone(),
        };

        let (fallback, stats) = fan_out(
            self.fallback.as_ref(),
            &run.records,
            CompanyRecord::needs_fallback,
            &settings,
        )
        .await;
        apply_results(&mut run.records, &fallback);
        run.stats.fallback = stats;
        run.stage = PipelineStage::FallbackApplied;

        if let Some(enrichment) = &self.enrichment {
            if !cancel.is_cancelled() {
                let (enriched, stats) = fan_out(
                    enrichment.as_ref(),
                    &run.records,
                    CompanyRecord::needs_enrichment,
                    &settings,
                )
                .await;
                apply_results(&mut run.records, &enriched);
                run.stats.enrichment = Some(stats);
            }
        }
        run.stage = PipelineStage::EnrichmentApplied;

        run.stats.cancelled = cancel.is_cancelled()
            || run.stats.fallback.abandoned > 0
            || run.stats.enrichment.is_some_and(|s| s.abandoned > 0);

        score_all(&mut run.records, self.scorer.as_ref());
        run.stage = PipelineStage::Scored;

        tracing::info!(
            "✅ {} companies processed ({} with address){}",
            run.records.len(),
            run.records.iter().filter(|r| r.has_address()).count(),
            if run.stats.cancelled { ", partial" } else { "" }
        );
        Ok(run)
    }

    /// Primary search with retries. When throttling outlasts the retry budget,
    /// one more attempt is made with half the limit.
    async fn fetch_primary(&self, query: &CompanyQuery) -> Result<Vec<CompanyRecord>, AppError> {
        let outcome = retry(&self.options.retry, "Primary search", || {
            self.primary.search(query)
        })
        .await;

        match outcome {
            Err(e)
                if e.is_rate_limit()
                    && self.options.reduce_scope_on_rate_limit
                    && query.limit() > 1 =>
            {
                let reduced = query.with_limit(query.limit() / 2);
                tracing::warn!(
                    "⚠️ Rate limited, retrying primary search with limit {}",
                    reduced.limit()
                );
                self.primary.search(&reduced).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_are_ordered() {
        assert!(PipelineStage::Queried < PipelineStage::PrimaryFetched);
        assert!(PipelineStage::Scored < PipelineStage::Exported);
        assert_eq!(PipelineStage::FallbackApplied.to_string(), "fallback_applied");
    }

    #[test]
    fn test_report_collects_failures() {
        let report = ExportReport {
            outcomes: vec![
                ExportOutcome {
                    target: "CSV",
                    result: Ok("data/exports/a.csv".to_string()),
                },
                ExportOutcome {
                    target: "Google Sheets",
                    result: Err(AppError::Export("denied".to_string())),
                },
            ],
        };

        assert!(!report.all_succeeded());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.locations().next(), Some(("CSV", "data/exports/a.csv")));
    }
}
