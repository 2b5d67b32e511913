//! Uniform capabilities over the upstream clients, plus caching and circuit-breaking wrappers.

use crate::circuit_breaker::{create_provider_circuit_breaker, ProviderCircuitBreaker};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{CompanyDetails, CompanyQuery, CompanyRecord, EnrichmentResult, Source};
use crate::services::{BrasilApiClient, NuvemFiscalClient, RapidApiClient};
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Source of record shells for a query.
#[async_trait]
pub trait PrimarySource: Send + Sync {
    async fn search(&self, query: &CompanyQuery) -> Result<Vec<CompanyRecord>, AppError>;
}

/// Per-CNPJ partial lookup. An empty result means "no data", not an error.
#[async_trait]
pub trait CompanyProvider: Send + Sync {
    fn source(&self) -> Source;

    async fn lookup(&self, cnpj: &str) -> Result<EnrichmentResult, AppError>;
}

#[async_trait]
impl<T: CompanyProvider + ?Sized> CompanyProvider for Arc<T> {
    fn source(&self) -> Source {
        (**self).source()
    }

    async fn lookup(&self, cnpj: &str) -> Result<EnrichmentResult, AppError> {
        (**self).lookup(cnpj).await
    }
}

#[async_trait]
impl PrimarySource for NuvemFiscalClient {
    async fn search(&self, query: &CompanyQuery) -> Result<Vec<CompanyRecord>, AppError> {
        let municipio = self.resolve_municipio(query).await?;
        self.list_companies(query, municipio.as_deref()).await
    }
}

#[async_trait]
impl CompanyProvider for BrasilApiClient {
    fn source(&self) -> Source {
        Source::Fallback
    }

    async fn lookup(&self, cnpj: &str) -> Result<EnrichmentResult, AppError> {
        Ok(EnrichmentResult {
            source: Source::Fallback,
            details: CompanyDetails {
                address: self.lookup_address(cnpj).await?,
                ..CompanyDetails::default()
            },
        })
    }
}

#[async_trait]
impl CompanyProvider for RapidApiClient {
    fn source(&self) -> Source {
        Source::Enrichment
    }

    async fn lookup(&self, cnpj: &str) -> Result<EnrichmentResult, AppError> {
        Ok(EnrichmentResult {
            source: Source::Enrichment,
            details: self.fetch_company(cnpj).await?,
        })
    }
}

/// Remembers successful lookups per CNPJ for a fixed time.
pub struct CachedProvider<P> {
    inner: P,
    cache: Cache<String, EnrichmentResult>,
}

impl<P: CompanyProvider> CachedProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(10_000)
                .build(),
        }
    }
}

#[async_trait]
impl<P: CompanyProvider> CompanyProvider for CachedProvider<P> {
    fn source(&self) -> Source {
        self.inner.source()
    }

    async fn lookup(&self, cnpj: &str) -> Result<EnrichmentResult, AppError> {
        if let Some(hit) = self.cache.get(cnpj).await {
            tracing::debug!("✓ {} cache hit for {}", self.source(), cnpj);
            return Ok(hit);
        }

        let result = self.inner.lookup(cnpj).await?;
        self.cache.insert(cnpj.to_string(), result.clone()).await;
        Ok(result)
    }
}

/// Rejects lookups without a network call once the provider keeps failing.
///
/// Only retryable errors (outages, throttling) count as failures.
pub struct GuardedProvider<P> {
    inner: P,
    breaker: ProviderCircuitBreaker,
}

impl<P: CompanyProvider> GuardedProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            breaker: create_provider_circuit_breaker(),
        }
    }
}

#[async_trait]
impl<P: CompanyProvider> CompanyProvider for GuardedProvider<P> {
    fn source(&self) -> Source {
        self.inner.source()
    }

    async fn lookup(&self, cnpj: &str) -> Result<EnrichmentResult, AppError> {
        let outcome = self
            .breaker
            .call_with(|e: &AppError| e.is_retryable(), self.inner.lookup(cnpj))
            .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::debug!("{} circuit open, skipping {}", self.source(), cnpj);
                Err(AppError::CircuitOpen(self.source().to_string()))
            }
        }
    }
}

/// Wraps a provider with the configured cache and a circuit breaker.
pub fn harden(provider: Arc<dyn CompanyProvider>, config: &Config) -> Arc<dyn CompanyProvider> {
    let provider: Arc<dyn CompanyProvider> = if config.cache_enabled {
        Arc::new(CachedProvider::new(provider, config.cache_ttl))
    } else {
        provider
    };
    Arc::new(GuardedProvider::new(provider))
}
