use crate::cnae::{normalize_cnae, normalize_uf};
use crate::errors::AppError;
use crate::validation::{format_cnpj, only_digits};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Validated search parameters. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyQuery {
    cnae: String,
    uf: Option<String>,
    city: Option<String>,
    limit: usize,
}

impl CompanyQuery {
    pub const MAX_LIMIT: usize = 1000;

    /// Validates and canonicalises query parameters.
    ///
    /// # Arguments
    ///
    /// * `cnae` - CNAE code, `NNNN-N/NN` or its 7 digits.
    /// * `uf` - Optional state code.
    /// * `city` - Optional city name. Requires `uf`.
    /// * `limit` - Maximum number of companies, `1..=1000`.
    ///
    /// # Returns
    ///
    /// * `Result<Self, AppError>` - `AppError::Validation` on any malformed input.
    pub fn new(
        cnae: &str,
        uf: Option<&str>,
        city: Option<&str>,
        limit: usize,
    ) -> Result<Self, AppError> {
        let cnae = normalize_cnae(cnae)?;
        let uf = uf
            .filter(|s| !s.trim().is_empty())
            .map(normalize_uf)
            .transpose()?;
        let city = city
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        if city.is_some() && uf.is_none() {
            return Err(AppError::Validation(
                "Informe a UF junto com a cidade".to_string(),
            ));
        }
        if limit == 0 || limit > Self::MAX_LIMIT {
            return Err(AppError::Validation(format!(
                "Limite deve estar entre 1 e {}",
                Self::MAX_LIMIT
            )));
        }

        Ok(Self {
            cnae,
            uf,
            city,
            limit,
        })
    }

    pub fn cnae(&self) -> &str {
        &self.cnae
    }

    /// CNAE without punctuation, as upstream filters expect it.
    pub fn cnae_digits(&self) -> String {
        only_digits(&self.cnae)
    }

    pub fn uf(&self) -> Option<&str> {
        self.uf.as_deref()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Same query with a smaller result limit (never below 1).
    pub fn with_limit(&self, limit: usize) -> Self {
        Self {
            limit: limit.clamp(1, self.limit),
            ..self.clone()
        }
    }
}

/// Which upstream contributed a piece of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Nuvem Fiscal.
    Primary,
    /// BrasilAPI.
    Fallback,
    /// RapidAPI double check.
    Enrichment,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Source::Primary => "Nuvem Fiscal",
            Source::Fallback => "BrasilAPI",
            Source::Enrichment => "RapidAPI",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub uf: Option<String>,
    /// Digits only.
    pub cep: Option<String>,
}

impl Address {
    /// An address counts only if it has a street, a city or a CEP.
    pub fn is_usable(&self) -> bool {
        self.street.is_some() || self.city.is_some() || self.cep.is_some()
    }

    pub fn into_option(self) -> Option<Address> {
        self.is_usable().then_some(self)
    }

    /// Single-line form: `Rua X, nº 10, Centro, Uberlândia/MG, CEP: 38400000`.
    pub fn full(&self) -> String {
        let mut parts = Vec::new();

        if let Some(street) = &self.street {
            parts.push(street.clone());
        }
        if let Some(number) = &self.number {
            parts.push(format!("nº {}", number));
        }
        if let Some(complement) = &self.complement {
            parts.push(complement.clone());
        }
        if let Some(neighborhood) = &self.neighborhood {
            parts.push(neighborhood.clone());
        }
        match (&self.city, &self.uf) {
            (Some(city), Some(uf)) => parts.push(format!("{}/{}", city, uf)),
            (Some(city), None) => parts.push(city.clone()),
            (None, Some(uf)) => parts.push(uf.clone()),
            (None, None) => {}
        }
        if let Some(cep) = &self.cep {
            parts.push(format!("CEP: {}", cep));
        }

        parts.join(", ")
    }
}

/// The optional, mergeable part of a company record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyDetails {
    pub trade_name: Option<String>,
    /// Registration status, upper-case (`ATIVA`, `BAIXADA`, ...).
    pub status: Option<String>,
    pub cnae: Option<String>,
    pub activity: Option<String>,
    /// Porte (`MICRO EMPRESA`, `EMPRESA DE PEQUENO PORTE`, ...).
    pub company_size: Option<String>,
    pub opening_date: Option<NaiveDate>,
    /// Digits only, with area code.
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<Address>,
}

fn fill<T: Clone>(slot: &mut Option<T>, candidate: &Option<T>) -> bool {
    if slot.is_none() && candidate.is_some() {
        *slot = candidate.clone();
        true
    } else {
        false
    }
}

impl CompanyDetails {
    /// Copies every field of `other` that is absent here. Present values are never replaced.
    ///
    /// # Returns
    ///
    /// * `usize` - number of fields filled.
    pub fn fill_gaps(&mut self, other: &CompanyDetails) -> usize {
        [
            fill(&mut self.trade_name, &other.trade_name),
            fill(&mut self.status, &other.status),
            fill(&mut self.cnae, &other.cnae),
            fill(&mut self.activity, &other.activity),
            fill(&mut self.company_size, &other.company_size),
            fill(&mut self.opening_date, &other.opening_date),
            fill(&mut self.phone, &other.phone),
            fill(&mut self.email, &other.email),
            fill(&mut self.address, &other.address),
        ]
        .into_iter()
        .filter(|filled| *filled)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        *self == CompanyDetails::default()
    }
}

/// Partial record produced by one source for one CNPJ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentResult {
    pub source: Source,
    pub details: CompanyDetails,
}

impl EnrichmentResult {
    pub fn empty(source: Source) -> Self {
        Self {
            source,
            details: CompanyDetails::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeadTier {
    #[serde(rename = "Alto Potencial")]
    High,
    #[serde(rename = "Médio Potencial")]
    Medium,
    #[serde(rename = "Baixo Potencial")]
    Low,
}

impl fmt::Display for LeadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LeadTier::High => "Alto Potencial",
            LeadTier::Medium => "Médio Potencial",
            LeadTier::Low => "Baixo Potencial",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeadScore {
    /// 1..=10
    pub value: u8,
    pub tier: LeadTier,
}

impl fmt::Display for LeadScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/10 - {}", self.value, self.tier)
    }
}

/// Columns owned by the sales team. Blank at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrmFields {
    pub observations: String,
    pub owner: String,
    pub contact_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyRecord {
    /// 14 digits. Unique within a result set.
    pub cnpj: String,
    pub legal_name: String,
    #[serde(flatten)]
    pub details: CompanyDetails,
    pub lead_score: Option<LeadScore>,
    /// Sources that contributed at least one field, in merge order.
    pub sources: Vec<Source>,
    pub crm: CrmFields,
}

impl CompanyRecord {
    /// Creates a shell as returned by the primary source.
    pub fn new(cnpj: impl Into<String>, legal_name: impl Into<String>) -> Self {
        Self {
            cnpj: cnpj.into(),
            legal_name: legal_name.into(),
            details: CompanyDetails::default(),
            lead_score: None,
            sources: vec![Source::Primary],
            crm: CrmFields::default(),
        }
    }

    pub fn with_details(mut self, details: CompanyDetails) -> Self {
        self.details = details;
        self
    }

    pub fn formatted_cnpj(&self) -> String {
        format_cnpj(&self.cnpj)
    }

    pub fn has_address(&self) -> bool {
        self.details
            .address
            .as_ref()
            .is_some_and(Address::is_usable)
    }

    /// Fallback is consulted only for records without an address.
    pub fn needs_fallback(&self) -> bool {
        !self.has_address()
    }

    /// Enrichment is consulted when any field it can supply is still absent.
    pub fn needs_enrichment(&self) -> bool {
        !self.has_address()
            || self.details.phone.is_none()
            || self.details.email.is_none()
            || self.details.cnae.is_none()
    }

    /// Fills absent fields from a lower-priority source.
    ///
    /// CNPJ and legal name are never touched.
    pub fn apply(&mut self, result: &EnrichmentResult) -> usize {
        let filled = self.details.fill_gaps(&result.details);
        if filled > 0 && !self.sources.contains(&result.source) {
            self.sources.push(result.source);
        }
        filled
    }

    /// `Nuvem Fiscal + BrasilAPI`
    pub fn sources_label(&self) -> String {
        self.sources
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

/// Removes records whose CNPJ was already seen, keeping the first occurrence.
pub fn dedup_by_cnpj(records: Vec<CompanyRecord>) -> Vec<CompanyRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            let fresh = seen.insert(r.cnpj.clone());
            if !fresh {
                tracing::warn!("⚠️ Duplicate CNPJ {} dropped from result set", r.cnpj);
            }
            fresh
        })
        .collect()
}
