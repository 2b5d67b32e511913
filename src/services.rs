use crate::auth::TokenCache;
use crate::cnae::normalize_cnae;
use crate::config::Config;
use crate::errors::AppError;
use crate::ibge::IbgeResolver;
use crate::models::{Address, CompanyDetails, CompanyQuery, CompanyRecord};
use crate::validation::{clean_cnpj, is_valid_cnpj, is_valid_email, only_digits};
use chrono::NaiveDate;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Response};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Outbound request budget shared by every upstream client.
pub type SharedRateLimiter = Arc<DefaultDirectRateLimiter>;

/// Builds a limiter allowing `requests` calls per `period`, with bursts up to `requests`.
pub fn build_rate_limiter(requests: u32, period: Duration) -> SharedRateLimiter {
    let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(period / burst.get())
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);
    Arc::new(RateLimiter::direct(quota))
}

/// HTTP client with the configured request timeout.
pub fn build_http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("cnae-prospector/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Turns a non-success response into the matching `AppError`.
async fn check_status(service: &str, response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    tracing::warn!("{} returned error {}: {}", service, status, error_text);
    Err(AppError::from_status(service, status, &headers, &error_text))
}

// ---------------------------------------------------------------------------
// JSON extraction helpers
// ---------------------------------------------------------------------------

/// Non-empty trimmed string, or a number rendered as text.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First key of `keys` holding a usable value.
fn first_text(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(text))
}

/// A plain string, or the description of a `{codigo, descricao}` style object.
fn described(value: &Value) -> Option<String> {
    if value.is_object() {
        first_text(value, &["descricao", "description", "text", "nome"])
    } else {
        text(value)
    }
}

/// A plain string, or the code of a `{codigo, descricao}` style object.
fn code_of(value: &Value) -> Option<String> {
    if value.is_object() {
        first_text(value, &["codigo", "code", "id"])
    } else {
        text(value)
    }
}

fn clean_email(raw: Option<String>) -> Option<String> {
    raw.map(|e| e.trim().to_lowercase())
        .filter(|e| is_valid_email(e))
}

/// Digits with area code, without country code. Anything shorter than a landline is dropped.
fn clean_phone(raw: Option<String>) -> Option<String> {
    let mut digits = only_digits(&raw?);
    if digits.len() > 11 && digits.starts_with("55") {
        digits = digits[2..].to_string();
    }
    (10..=11).contains(&digits.len()).then_some(digits)
}

fn clean_cnae(raw: Option<String>) -> Option<String> {
    raw.map(|code| normalize_cnae(&code).unwrap_or(code))
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    let raw = raw?;
    let day = raw.get(..10).unwrap_or(raw.as_str());
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(day, "%d/%m/%Y"))
        .ok()
}

/// Street prefixed with its type (`RUA`, `AVENIDA`) unless already included.
fn street_with_type(obj: &Value, type_keys: &[&str], street_keys: &[&str]) -> Option<String> {
    let street = first_text(obj, street_keys)?;
    match first_text(obj, type_keys) {
        Some(kind) if !street.to_uppercase().starts_with(&kind.to_uppercase()) => {
            Some(format!("{} {}", kind, street))
        }
        _ => Some(street),
    }
}

fn uf_of(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| {
            obj.get(*k).and_then(|v| {
                if v.is_object() {
                    first_text(v, &["sigla", "uf"])
                } else {
                    text(v)
                }
            })
        })
        .map(|uf| uf.to_uppercase())
}

fn city_of(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(described))
}

fn cep_of(obj: &Value) -> Option<String> {
    first_text(obj, &["cep"])
        .map(|c| only_digits(&c))
        .filter(|c| !c.is_empty())
}

/// Parses one item of the Nuvem Fiscal `/cnpj` listing into a record shell.
///
/// Address fields may be flat or nested under `endereco`; status, size and
/// CNAE may be strings or `{codigo, descricao}` objects.
///
/// # Returns
///
/// * `Option<CompanyRecord>` - `None` when the item has no 14-digit CNPJ.
pub fn parse_nuvem_fiscal_company(item: &Value) -> Option<CompanyRecord> {
    let raw_cnpj = item.get("cnpj").and_then(text);
    let Some(cnpj) = raw_cnpj.as_deref().and_then(clean_cnpj) else {
        tracing::warn!("⚠️ Skipping Nuvem Fiscal item with invalid CNPJ: {:?}", raw_cnpj);
        return None;
    };
    if !is_valid_cnpj(&cnpj) {
        tracing::warn!("⚠️ CNPJ {} from Nuvem Fiscal fails check digits, keeping it", cnpj);
    }

    let address_obj = item.get("endereco").filter(|v| v.is_object()).unwrap_or(item);
    let address = Address {
        street: street_with_type(address_obj, &["tipo_logradouro"], &["logradouro"]),
        number: first_text(address_obj, &["numero"]),
        complement: first_text(address_obj, &["complemento"]),
        neighborhood: first_text(address_obj, &["bairro"]),
        city: city_of(address_obj, &["municipio", "cidade"]),
        uf: uf_of(address_obj, &["uf"]),
        cep: cep_of(address_obj),
    }
    .into_option();

    let cnae_value = item.get("cnae_principal").or_else(|| item.get("atividade_principal"));
    let cnae = clean_cnae(cnae_value.and_then(code_of));
    let activity = first_text(item, &["cnae_principal_descricao"]).or_else(|| {
        cnae_value
            .filter(|v| v.is_object())
            .and_then(described)
    });

    let phone = first_text(item, &["telefone", "ddd_telefone_1"]).or_else(|| {
        item.get("telefones")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(|t| {
                let ddd = first_text(t, &["ddd"]).unwrap_or_default();
                first_text(t, &["numero"]).map(|n| format!("{}{}", ddd, n))
            })
    });

    let details = CompanyDetails {
        trade_name: first_text(item, &["nome_fantasia"]),
        status: item
            .get("situacao_cadastral")
            .or_else(|| item.get("situacao"))
            .and_then(described)
            .map(|s| s.to_uppercase()),
        cnae,
        activity,
        company_size: item.get("porte").and_then(described).map(|s| s.to_uppercase()),
        opening_date: parse_date(first_text(item, &["data_abertura", "data_inicio_atividade"])),
        phone: clean_phone(phone),
        email: clean_email(first_text(item, &["email"])),
        address,
    };

    let legal_name = first_text(item, &["razao_social", "nome_empresarial"])
        .or_else(|| details.trade_name.clone())
        .unwrap_or_default();

    Some(CompanyRecord::new(cnpj, legal_name).with_details(details))
}

/// Parses a BrasilAPI `/cnpj/v1` payload. Only address fields are taken.
pub fn parse_brasilapi_address(payload: &Value) -> Option<Address> {
    Address {
        street: street_with_type(payload, &["descricao_tipo_de_logradouro"], &["logradouro"]),
        number: first_text(payload, &["numero"]),
        complement: first_text(payload, &["complemento"]),
        neighborhood: first_text(payload, &["bairro"]),
        city: city_of(payload, &["municipio", "cidade"]),
        uf: uf_of(payload, &["uf"]),
        cep: cep_of(payload),
    }
    .into_option()
}

/// Finds the company object inside the assorted RapidAPI payload shapes.
pub fn extract_rapidapi_company<'a>(payload: &'a Value, cnpj: &str) -> Option<&'a Value> {
    if let Some(company) = payload.get("empresa").filter(|v| v.is_object()) {
        return Some(company);
    }
    if let Some(company) = payload.get("data").filter(|v| v.is_object()) {
        return Some(company);
    }
    if let Some(list) = payload.get("empresas").and_then(Value::as_array) {
        let found = list.iter().find(|e| {
            e.get("cnpj")
                .and_then(text)
                .and_then(|c| clean_cnpj(&c))
                .as_deref()
                == Some(cnpj)
        });
        if found.is_some() {
            return found;
        }
    }
    payload.get("cnpj").is_some().then_some(payload)
}

/// CNAE code and description from `cnae` or `atividade_principal`.
fn rapidapi_cnae(company: &Value) -> (Option<String>, Option<String>) {
    if let Some(cnae) = company.get("cnae") {
        return match cnae {
            Value::Object(_) => (
                first_text(cnae, &["codigo", "code"]),
                first_text(cnae, &["descricao", "text", "description"]),
            ),
            other => (text(other), None),
        };
    }

    let main = match company.get("atividade_principal") {
        Some(Value::Array(list)) => list.first(),
        Some(v @ Value::Object(_)) => Some(v),
        _ => None,
    };
    match main {
        Some(activity) => (
            first_text(activity, &["code", "codigo"]),
            first_text(activity, &["text", "descricao"]),
        ),
        None => (None, None),
    }
}

/// Maps a RapidAPI company object to address, phone, email and CNAE.
pub fn parse_rapidapi_company(company: &Value) -> CompanyDetails {
    let address = Address {
        street: first_text(company, &["logradouro", "rua"]),
        number: first_text(company, &["numero"]),
        complement: first_text(company, &["complemento"]),
        neighborhood: first_text(company, &["bairro"]),
        city: city_of(company, &["municipio", "cidade"]),
        uf: uf_of(company, &["uf", "estado", "estado_sigla"]),
        cep: cep_of(company),
    }
    .into_option();

    let (cnae, activity) = rapidapi_cnae(company);

    CompanyDetails {
        cnae: clean_cnae(cnae),
        activity,
        phone: clean_phone(first_text(
            company,
            &["telefone", "telefone1", "ddd_telefone_1", "ddd_telefone_2"],
        )),
        email: clean_email(first_text(company, &["email", "email_contato"])),
        address,
        ..CompanyDetails::default()
    }
}

// ---------------------------------------------------------------------------
// Nuvem Fiscal (primary)
// ---------------------------------------------------------------------------

pub struct NuvemFiscalClient {
    client: Client,
    base_url: String,
    natureza: Option<String>,
    tokens: Arc<TokenCache>,
    ibge: Arc<IbgeResolver>,
    limiter: SharedRateLimiter,
}

impl NuvemFiscalClient {
    pub fn new(
        client: Client,
        config: &Config,
        tokens: Arc<TokenCache>,
        ibge: Arc<IbgeResolver>,
        limiter: SharedRateLimiter,
    ) -> Self {
        Self {
            client,
            base_url: config.nuvem_fiscal_base_url.trim_end_matches('/').to_string(),
            natureza: config.nuvem_fiscal_natureza.clone(),
            tokens,
            ibge,
            limiter,
        }
    }

    /// Resolves the query's city to an IBGE code, if a city was given.
    pub async fn resolve_municipio(&self, query: &CompanyQuery) -> Result<Option<String>, AppError> {
        let (Some(city), Some(uf)) = (query.city(), query.uf()) else {
            return Ok(None);
        };

        match self.ibge.resolve(city, uf).await? {
            Some(code) => Ok(Some(code)),
            None => Err(AppError::Validation(format!(
                "Município não encontrado: {}/{}",
                city, uf
            ))),
        }
    }

    /// Lists companies by CNAE (and municipality), one page of `query.limit()` items.
    ///
    /// A rejected bearer token is invalidated and the call retried once with a
    /// fresh one; a second rejection is fatal.
    pub async fn list_companies(
        &self,
        query: &CompanyQuery,
        municipio: Option<&str>,
    ) -> Result<Vec<CompanyRecord>, AppError> {
        let token = self.tokens.token().await?;

        match self.request_listing(query, municipio, &token).await {
            Err(e) if e.is_authentication() => {
                tracing::warn!("⚠️ Nuvem Fiscal rejected the cached token, refreshing");
                self.tokens.invalidate(&token).await;
                let token = self.tokens.token().await?;
                self.request_listing(query, municipio, &token).await
            }
            other => other,
        }
    }

    async fn request_listing(
        &self,
        query: &CompanyQuery,
        municipio: Option<&str>,
        token: &str,
    ) -> Result<Vec<CompanyRecord>, AppError> {
        let mut params: Vec<(&str, String)> = vec![
            ("cnae_principal", query.cnae_digits()),
            ("$top", query.limit().to_string()),
        ];
        if let Some(code) = municipio {
            params.push(("municipio", code.to_string()));
        }
        if let Some(natureza) = &self.natureza {
            params.push(("natureza_juridica", natureza.clone()));
        }

        let url = reqwest::Url::parse_with_params(&format!("{}/cnpj", self.base_url), &params)
            .map_err(|e| AppError::Config(format!("Failed to build URL: {}", e)))?;

        tracing::info!(
            "🔍 Nuvem Fiscal search: CNAE {} municipio {:?} limit {}",
            query.cnae(),
            municipio,
            query.limit()
        );

        self.limiter.until_ready().await;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(format!("Nuvem Fiscal request failed: {}", e))
            })?;
        let response = check_status("Nuvem Fiscal", response).await?;

        let payload: Value = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to parse Nuvem Fiscal response: {}", e))
        })?;

        let items = payload
            .get("data")
            .and_then(Value::as_array)
            .or_else(|| payload.as_array())
            .cloned()
            .unwrap_or_default();

        let records: Vec<CompanyRecord> = items
            .iter()
            .filter_map(parse_nuvem_fiscal_company)
            .take(query.limit())
            .collect();

        tracing::info!("✅ Nuvem Fiscal returned {} companies", records.len());
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// BrasilAPI (fallback + IBGE)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Municipality {
    pub name: String,
    pub ibge_code: String,
}

pub struct BrasilApiClient {
    client: Client,
    base_url: String,
    limiter: SharedRateLimiter,
}

impl BrasilApiClient {
    pub fn new(client: Client, config: &Config, limiter: SharedRateLimiter) -> Self {
        Self {
            client,
            base_url: config.brasilapi_base_url.trim_end_matches('/').to_string(),
            limiter,
        }
    }

    /// Fetches the registered address of a CNPJ.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - BrasilAPI has no record or no usable address.
    pub async fn lookup_address(&self, cnpj: &str) -> Result<Option<Address>, AppError> {
        let url = format!("{}/api/cnpj/v1/{}", self.base_url, cnpj);
        tracing::debug!("BrasilAPI lookup for CNPJ {}", cnpj);

        self.limiter.until_ready().await;
        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("BrasilAPI request failed: {}", e))
        })?;

        let response = match check_status("BrasilAPI", response).await {
            Ok(r) => r,
            Err(AppError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let payload: Value = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to parse BrasilAPI response: {}", e))
        })?;

        Ok(parse_brasilapi_address(&payload))
    }

    /// Lists the municipalities of a state with their IBGE codes.
    pub async fn list_municipalities(&self, uf: &str) -> Result<Vec<Municipality>, AppError> {
        let url = format!("{}/api/ibge/municipios/v1/{}", self.base_url, uf);
        tracing::info!("🗺️ Loading municipalities for {}", uf);

        self.limiter.until_ready().await;
        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("BrasilAPI request failed: {}", e))
        })?;
        let response = check_status("BrasilAPI", response).await?;

        let payload: Value = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to parse BrasilAPI response: {}", e))
        })?;

        Ok(payload
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|m| {
                        Some(Municipality {
                            name: first_text(m, &["nome"])?,
                            ibge_code: first_text(m, &["codigo_ibge", "codigo"])?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// RapidAPI (double check)
// ---------------------------------------------------------------------------

pub struct RapidApiClient {
    client: Client,
    base_url: String,
    host: String,
    key: String,
    limiter: SharedRateLimiter,
}

impl RapidApiClient {
    /// # Returns
    ///
    /// * `None` when no RapidAPI key is configured.
    pub fn new(client: Client, config: &Config, limiter: SharedRateLimiter) -> Option<Self> {
        Some(Self {
            client,
            base_url: config.rapidapi_base_url.trim_end_matches('/').to_string(),
            host: config.rapidapi_host.clone(),
            key: config.rapidapi_key.clone()?,
            limiter,
        })
    }

    /// Endpoint variants, tried in order. Providers on RapidAPI disagree on the path.
    fn candidate_urls(&self, cnpj: &str) -> Vec<reqwest::Url> {
        let mut urls = Vec::new();
        let base = self.base_url.as_str();

        if base.ends_with(".php") {
            urls.push(reqwest::Url::parse_with_params(base, &[("cnpj", cnpj)]));
            urls.push(reqwest::Url::parse_with_params(
                base,
                &[("campo", "cnpj"), ("q", cnpj)],
            ));
        }
        urls.push(reqwest::Url::parse(&format!("{}/empresa/{}", base, cnpj)));
        urls.push(reqwest::Url::parse_with_params(base, &[("cnpj", cnpj)]));

        urls.into_iter().filter_map(Result::ok).collect()
    }

    /// Looks a CNPJ up across the endpoint variants.
    ///
    /// Rate limits and credential errors stop immediately; 404s and server
    /// errors move on to the next variant.
    pub async fn fetch_company(&self, cnpj: &str) -> Result<CompanyDetails, AppError> {
        let mut last_error: Option<AppError> = None;

        for url in self.candidate_urls(cnpj) {
            self.limiter.until_ready().await;
            let sent = self
                .client
                .get(url.clone())
                .header("X-RapidAPI-Key", &self.key)
                .header("X-RapidAPI-Host", &self.host)
                .send()
                .await;

            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!("RapidAPI request to {} failed: {}", url.path(), e);
                    last_error = Some(AppError::from(e));
                    continue;
                }
            };

            let response = match check_status("RapidAPI", response).await {
                Ok(r) => r,
                Err(AppError::NotFound(_)) => continue,
                Err(e @ (AppError::RateLimit { .. } | AppError::Authentication(_))) => {
                    return Err(e)
                }
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };

            let Ok(payload) = response.json::<Value>().await else {
                tracing::debug!("RapidAPI endpoint {} returned non-JSON body", url.path());
                continue;
            };

            if let Some(company) = extract_rapidapi_company(&payload, cnpj) {
                tracing::debug!("✓ RapidAPI data found for {} via {}", cnpj, url.path());
                return Ok(parse_rapidapi_company(company));
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(CompanyDetails::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nuvem_fiscal_flat_item() {
        let item = json!({
            "cnpj": "11.222.333/0001-81",
            "razao_social": "RESTAURANTE SABOR LTDA",
            "nome_fantasia": "Sabor Mineiro",
            "situacao_cadastral": {"codigo": "2", "descricao": "Ativa"},
            "porte": "Micro Empresa",
            "cnae_principal": "5611201",
            "cnae_principal_descricao": "Restaurantes e similares",
            "data_abertura": "2015-03-10",
            "ddd_telefone_1": "3432101234",
            "email": "CONTATO@SABOR.COM.BR",
            "logradouro": "Av. João Naves de Ávila",
            "numero": "1331",
            "bairro": "Santa Mônica",
            "municipio": "Uberlândia",
            "uf": "mg",
            "cep": "38408-100"
        });

        let record = parse_nuvem_fiscal_company(&item).unwrap();
        assert_eq!(record.cnpj, "11222333000181");
        assert_eq!(record.legal_name, "RESTAURANTE SABOR LTDA");
        assert_eq!(record.details.status.as_deref(), Some("ATIVA"));
        assert_eq!(record.details.cnae.as_deref(), Some("5611-2/01"));
        assert_eq!(record.details.company_size.as_deref(), Some("MICRO EMPRESA"));
        assert_eq!(record.details.phone.as_deref(), Some("3432101234"));
        assert_eq!(record.details.email.as_deref(), Some("contato@sabor.com.br"));
        assert_eq!(
            record.details.opening_date,
            NaiveDate::from_ymd_opt(2015, 3, 10)
        );
        let address = record.details.address.unwrap();
        assert_eq!(address.uf.as_deref(), Some("MG"));
        assert_eq!(address.cep.as_deref(), Some("38408100"));
    }

    #[test]
    fn test_parse_nuvem_fiscal_nested_item() {
        let item = json!({
            "cnpj": "11444777000161",
            "razao_social": "BAR DO ZE LTDA",
            "endereco": {
                "tipo_logradouro": "RUA",
                "logradouro": "GOIAS",
                "numero": "10",
                "municipio": {"codigo_ibge": "3170206", "descricao": "UBERLANDIA"},
                "uf": "MG",
                "cep": "38400000"
            },
            "telefones": [{"ddd": "34", "numero": "999998888"}]
        });

        let record = parse_nuvem_fiscal_company(&item).unwrap();
        let address = record.details.address.unwrap();
        assert_eq!(address.street.as_deref(), Some("RUA GOIAS"));
        assert_eq!(address.city.as_deref(), Some("UBERLANDIA"));
        assert_eq!(record.details.phone.as_deref(), Some("34999998888"));
        assert!(record.details.email.is_none());
    }

    #[test]
    fn test_parse_nuvem_fiscal_keeps_bad_check_digits() {
        let record = parse_nuvem_fiscal_company(&json!({
            "cnpj": "11.222.333/0001-82",
            "razao_social": "DIGITO ERRADO LTDA"
        }))
        .unwrap();
        assert_eq!(record.cnpj, "11222333000182");
    }

    #[test]
    fn test_parse_nuvem_fiscal_without_address_or_cnpj() {
        let shell = parse_nuvem_fiscal_company(&json!({
            "cnpj": "11444777000161",
            "razao_social": "SEM ENDERECO LTDA",
            "logradouro": "",
            "email": "999999@gmail.com"
        }))
        .unwrap();
        assert!(shell.details.address.is_none());
        assert!(shell.details.email.is_none());

        assert!(parse_nuvem_fiscal_company(&json!({"cnpj": "123"})).is_none());
    }

    #[test]
    fn test_parse_brasilapi_address() {
        let payload = json!({
            "cnpj": "11222333000181",
            "descricao_tipo_de_logradouro": "AVENIDA",
            "logradouro": "RONDON PACHECO",
            "numero": "500",
            "bairro": "TABAJARAS",
            "municipio": "UBERLANDIA",
            "uf": "MG",
            "cep": "38400-242",
            "email": "ignored@example.com"
        });

        let address = parse_brasilapi_address(&payload).unwrap();
        assert_eq!(address.street.as_deref(), Some("AVENIDA RONDON PACHECO"));
        assert_eq!(address.cep.as_deref(), Some("38400242"));
        assert!(parse_brasilapi_address(&json!({"cnpj": "1"})).is_none());
    }

    #[test]
    fn test_extract_rapidapi_company_shapes() {
        let cnpj = "11222333000181";

        let wrapped = json!({"empresa": {"cnpj": cnpj, "email": "a@b.com"}});
        assert!(extract_rapidapi_company(&wrapped, cnpj).is_some());

        let listed = json!({"empresas": [
            {"cnpj": "11444777000161"},
            {"cnpj": "11.222.333/0001-81", "cidade": "Uberlândia"}
        ]});
        let found = extract_rapidapi_company(&listed, cnpj).unwrap();
        assert_eq!(found["cidade"], "Uberlândia");

        let flat = json!({"cnpj": cnpj});
        assert!(extract_rapidapi_company(&flat, cnpj).is_some());

        assert!(extract_rapidapi_company(&json!({"message": "not found"}), cnpj).is_none());
    }

    #[test]
    fn test_parse_rapidapi_company() {
        let company = json!({
            "rua": "Rua Goiás",
            "cidade": "Uberlândia",
            "estado": "mg",
            "cep": "38400-000",
            "email_contato": "vendas@empresa.com.br",
            "telefone1": "(34) 3210-1234",
            "atividade_principal": [{"code": "56.11-2-01", "text": "Restaurantes e similares"}]
        });

        let details = parse_rapidapi_company(&company);
        assert_eq!(details.address.unwrap().uf.as_deref(), Some("MG"));
        assert_eq!(details.email.as_deref(), Some("vendas@empresa.com.br"));
        assert_eq!(details.phone.as_deref(), Some("3432101234"));
        assert_eq!(details.cnae.as_deref(), Some("5611-2/01"));
        assert_eq!(details.activity.as_deref(), Some("Restaurantes e similares"));
    }

    #[test]
    fn test_rate_limiter_allows_configured_burst() {
        let limiter = build_rate_limiter(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }
}
