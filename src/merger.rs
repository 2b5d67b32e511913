//! Fill-only-if-missing merge of per-source partial records.

use crate::models::{CompanyRecord, EnrichmentResult};

/// Merges a primary shell with fallback and enrichment data.
///
/// For every optional field the primary value wins, then fallback, then
/// enrichment. A present value is never replaced by a lower-priority source.
/// CNPJ and legal name always come from the primary.
///
/// # Arguments
///
/// * `primary` - Shell built from the primary source.
/// * `fallback` - Address data from the fallback source (may be empty).
/// * `enrichment` - Double-check data (may be empty).
pub fn merge(
    primary: CompanyRecord,
    fallback: &EnrichmentResult,
    enrichment: &EnrichmentResult,
) -> CompanyRecord {
    merge_prioritized(primary, [fallback, enrichment])
}

/// Same policy over any number of sources, highest priority first.
fn merge_prioritized<'a, I>(primary: CompanyRecord, sources: I) -> CompanyRecord
where
    I: IntoIterator<Item = &'a EnrichmentResult>,
{
    let mut merged = primary;
    for source in sources {
        merged.apply(source);
    }
    merged
}
