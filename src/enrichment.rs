//! Concurrent per-record lookups, joined back into primary order.

use crate::config::RetryPolicy;
use crate::errors::AppError;
use crate::models::{CompanyRecord, EnrichmentResult};
use crate::providers::CompanyProvider;
use crate::retry::retry_if;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Counters for one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanOutStats {
    /// Records that needed a lookup.
    pub requested: usize,
    /// Lookups that returned data.
    pub filled: usize,
    /// Lookups that returned nothing.
    pub empty: usize,
    /// Lookups that failed and were degraded to "no data".
    pub failed: usize,
    /// Lookups still pending when the deadline or cancellation hit.
    pub abandoned: usize,
}

/// How a fan-out pass is bounded.
#[derive(Debug, Clone)]
pub struct FanOutSettings {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

/// Outages are retried; throttling, credentials and everything else degrade at once.
fn worth_retrying(err: &AppError) -> bool {
    matches!(err.root(), AppError::UpstreamUnavailable(_))
}

/// Looks up every record accepted by `needs_lookup`, at most
/// `settings.concurrency` at a time.
///
/// Errors never propagate: a failed lookup leaves its slot empty. When the
/// deadline passes or `settings.cancel` fires, in-flight lookups are dropped
/// and whatever completed is returned.
///
/// # Returns
///
/// * `Vec<Option<EnrichmentResult>>` - one slot per input record, same order.
/// * `FanOutStats` - what happened.
pub async fn fan_out<F>(
    provider: &dyn CompanyProvider,
    records: &[CompanyRecord],
    needs_lookup: F,
    settings: &FanOutSettings,
) -> (Vec<Option<EnrichmentResult>>, FanOutStats)
where
    F: Fn(&CompanyRecord) -> bool,
{
    let targets: Vec<(usize, String)> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| needs_lookup(r))
        .map(|(i, r)| (i, r.cnpj.clone()))
        .collect();

    let mut slots: Vec<Option<EnrichmentResult>> = vec![None; records.len()];
    let mut stats = FanOutStats {
        requested: targets.len(),
        ..FanOutStats::default()
    };
    if targets.is_empty() {
        return (slots, stats);
    }

    let source = provider.source();
    let retry = settings.retry;
    tracing::info!(
        "🔄 {} lookups for {} record(s), concurrency {}",
        source,
        targets.len(),
        settings.concurrency
    );

    let mut pending = stream::iter(targets)
        .map(|(index, cnpj)| async move {
            let operation = format!("{} lookup {}", source, cnpj);
            let outcome = retry_if(&retry, &operation, worth_retrying, || provider.lookup(&cnpj)).await;
            (index, cnpj, outcome)
        })
        .buffer_unordered(settings.concurrency.max(1));

    let deadline = async {
        match settings.deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut completed = 0;
    loop {
        tokio::select! {
            biased;
            _ = settings.cancel.cancelled() => {
                tracing::warn!("⚠️ {} lookups cancelled, keeping partial results", source);
                break;
            }
            _ = &mut deadline => {
                tracing::warn!("⚠️ {} lookups timed out, keeping partial results", source);
                break;
            }
            next = pending.next() => match next {
                Some((index, cnpj, Ok(result))) => {
                    completed += 1;
                    if result.is_empty() {
                        tracing::debug!("{} has no data for {}", source, cnpj);
                        stats.empty += 1;
                    } else {
                        stats.filled += 1;
                        slots[index] = Some(result);
                    }
                }
                Some((_, cnpj, Err(e))) => {
                    completed += 1;
                    stats.failed += 1;
                    tracing::warn!("⚠️ {} lookup for {} failed, continuing without it: {}", source, cnpj, e);
                }
                None => break,
            }
        }
    }

    stats.abandoned = stats.requested - completed;
    tracing::info!(
        "✅ {} lookups done: {} filled, {} empty, {} failed, {} abandoned",
        source,
        stats.filled,
        stats.empty,
        stats.failed,
        stats.abandoned
    );
    (slots, stats)
}

/// Applies fan-out results in place. Present fields are never replaced.
pub fn apply_results(records: &mut [CompanyRecord], results: &[Option<EnrichmentResult>]) {
    for (record, result) in records.iter_mut().zip(results) {
        if let Some(result) = result {
            record.apply(result);
        }
    }
}
