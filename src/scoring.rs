use crate::models::{CompanyRecord, LeadScore, LeadTier};

/// Computes a sales-priority score for a merged record.
///
/// Implementations must be deterministic: equal records yield equal scores.
pub trait LeadScorer: Send + Sync {
    fn score(&self, record: &CompanyRecord) -> LeadScore;
}

/// Default completeness-based rule.
///
/// Placeholder business rule pending product input: base 5, +2 when the
/// registration is active, +1 for email, +1 for phone, +1 for micro or small
/// companies, clamped to 1..=10.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletenessScorer;

const SMALL_COMPANY_SIZES: [&str; 5] = [
    "MICRO EMPRESA",
    "ME",
    "PEQUENA EMPRESA",
    "EMPRESA DE PEQUENO PORTE",
    "EPP",
];

impl LeadScorer for CompletenessScorer {
    fn score(&self, record: &CompanyRecord) -> LeadScore {
        let details = &record.details;
        let mut score: i32 = 5;

        if details
            .status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("ATIVA"))
        {
            score += 2;
        }
        if details.email.is_some() {
            score += 1;
        }
        if details.phone.is_some() {
            score += 1;
        }
        if details
            .company_size
            .as_deref()
            .is_some_and(|size| SMALL_COMPANY_SIZES.contains(&size.trim().to_uppercase().as_str()))
        {
            score += 1;
        }

        let value = score.clamp(1, 10) as u8;
        LeadScore {
            value,
            tier: tier_for(value),
        }
    }
}

pub fn tier_for(value: u8) -> LeadTier {
    match value {
        8.. => LeadTier::High,
        6..=7 => LeadTier::Medium,
        _ => LeadTier::Low,
    }
}

/// Annotates every record with its score. Only `lead_score` is written.
pub fn score_all(records: &mut [CompanyRecord], scorer: &dyn LeadScorer) {
    for record in records.iter_mut() {
        record.lead_score = Some(scorer.score(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CompanyRecord {
        CompanyRecord::new("11222333000181", "Restaurante Teste LTDA")
    }

    #[test]
    fn test_bare_record_scores_base() {
        let score = CompletenessScorer.score(&record());
        assert_eq!(score.value, 5);
        assert_eq!(score.tier, LeadTier::Low);
    }

    #[test]
    fn test_complete_active_small_company_scores_max() {
        let mut r = record();
        r.details.status = Some("ATIVA".to_string());
        r.details.email = Some("contato@teste.com.br".to_string());
        r.details.phone = Some("34999998888".to_string());
        r.details.company_size = Some("Micro Empresa".to_string());

        let score = CompletenessScorer.score(&r);
        assert_eq!(score.value, 10);
        assert_eq!(score.to_string(), "10/10 - Alto Potencial");
    }

    #[test]
    fn test_inactive_scores_below_active() {
        let mut active = record();
        active.details.status = Some("ATIVA".to_string());
        let mut closed = record();
        closed.details.status = Some("BAIXADA".to_string());

        assert!(CompletenessScorer.score(&closed).value < CompletenessScorer.score(&active).value);
    }

    #[test]
    fn test_score_all_only_touches_score() {
        let mut records = vec![record()];
        let before = records[0].clone();
        score_all(&mut records, &CompletenessScorer);

        assert!(records[0].lead_score.is_some());
        records[0].lead_score = None;
        assert_eq!(records[0], before);
    }
}
