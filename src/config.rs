use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where the Google service-account key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetsCredentials {
    /// Base64-encoded JSON key (`GOOGLE_SHEETS_CREDENTIALS_B64`).
    Base64(String),
    /// Raw JSON key (`GOOGLE_SHEETS_CREDENTIALS_JSON`).
    Json(String),
    /// Path to a JSON key file (`GOOGLE_SHEETS_CREDENTIALS_PATH`).
    Path(PathBuf),
}

/// Backoff schedule for retryable upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Knobs handed to the pipeline constructor.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// RapidAPI double check. Off means the enrichment provider is never called.
    pub enrichment_enabled: bool,
    /// Maximum in-flight fallback/enrichment lookups.
    pub concurrency: usize,
    /// Deadline for the whole fan-out phase.
    pub fanout_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// Retry the primary search once with half the limit after rate-limit exhaustion.
    pub reduce_scope_on_rate_limit: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            enrichment_enabled: false,
            concurrency: 4,
            fanout_timeout: None,
            retry: RetryPolicy::default(),
            reduce_scope_on_rate_limit: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub nuvem_fiscal_client_id: String,
    pub nuvem_fiscal_client_secret: String,
    pub nuvem_fiscal_base_url: String,
    pub nuvem_fiscal_auth_url: String,
    /// `natureza_juridica` filter sent with every search.
    pub nuvem_fiscal_natureza: Option<String>,
    pub brasilapi_base_url: String,
    pub enable_rapidapi_enrichment: bool,
    pub rapidapi_key: Option<String>,
    pub rapidapi_host: String,
    pub rapidapi_base_url: String,
    pub google_sheets_id: Option<String>,
    pub google_sheets_credentials: Option<SheetsCredentials>,
    pub google_sheets_api_base_url: String,
    pub production: bool,
    pub log_level: String,
    pub port: u16,
    pub export_dir: PathBuf,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit_requests: u32,
    pub rate_limit_period: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub enrichment_concurrency: usize,
    pub pipeline_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nuvem_fiscal_client_id: String::new(),
            nuvem_fiscal_client_secret: String::new(),
            nuvem_fiscal_base_url: "https://api.nuvemfiscal.com.br".to_string(),
            nuvem_fiscal_auth_url: "https://auth.nuvemfiscal.com.br/oauth/token".to_string(),
            nuvem_fiscal_natureza: Some("2062".to_string()),
            brasilapi_base_url: "https://brasilapi.com.br".to_string(),
            enable_rapidapi_enrichment: false,
            rapidapi_key: None,
            rapidapi_host: DEFAULT_RAPIDAPI_HOST.to_string(),
            rapidapi_base_url: format!("https://{}", DEFAULT_RAPIDAPI_HOST),
            google_sheets_id: None,
            google_sheets_credentials: None,
            google_sheets_api_base_url: "https://sheets.googleapis.com".to_string(),
            production: false,
            log_level: "info".to_string(),
            port: 8000,
            export_dir: PathBuf::from("data/exports"),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            rate_limit_requests: 10,
            rate_limit_period: Duration::from_secs(1),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            enrichment_concurrency: 4,
            pipeline_timeout: None,
        }
    }
}

const DEFAULT_RAPIDAPI_HOST: &str = "cnpj-busca-empresa.p.rapidapi.com";

/// Reads an optional variable, treating blank values as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}

fn bool_var(name: &str, default: bool) -> bool {
    optional_var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn url_var(name: &str, default: &str) -> anyhow::Result<String> {
    let url = optional_var(name).unwrap_or_else(|| default.to_string());
    let parsed = url::Url::parse(url.trim())
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL ({}): {}", name, e, url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim().trim_end_matches('/').to_string())
}

impl Config {
    /// Loads configuration from the process environment (and `.env`).
    ///
    /// Nuvem Fiscal credentials are mandatory; everything else has a default.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let rapidapi_host =
            optional_var("RAPIDAPI_HOST").unwrap_or_else(|| DEFAULT_RAPIDAPI_HOST.to_string());
        let rapidapi_key = optional_var("RAPIDAPI_KEY");
        let enable_rapidapi_enrichment = bool_var("ENABLE_RAPIDAPI_ENRICHMENT", false);
        if enable_rapidapi_enrichment && rapidapi_key.is_none() {
            tracing::warn!(
                "⚠️ ENABLE_RAPIDAPI_ENRICHMENT is set but RAPIDAPI_KEY is missing, enrichment disabled"
            );
        }

        let google_sheets_credentials = optional_var("GOOGLE_SHEETS_CREDENTIALS_B64")
            .map(SheetsCredentials::Base64)
            .or_else(|| optional_var("GOOGLE_SHEETS_CREDENTIALS_JSON").map(SheetsCredentials::Json))
            .or_else(|| {
                optional_var("GOOGLE_SHEETS_CREDENTIALS_PATH")
                    .map(|p| SheetsCredentials::Path(PathBuf::from(p)))
            });

        let max_attempts: u32 = parse_var("MAX_RETRIES", defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            anyhow::bail!("MAX_RETRIES must be at least 1");
        }

        let rate_limit_requests: u32 =
            parse_var("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?;
        if rate_limit_requests == 0 {
            anyhow::bail!("RATE_LIMIT_REQUESTS must be at least 1");
        }

        let enrichment_concurrency: usize =
            parse_var("ENRICHMENT_CONCURRENCY", defaults.enrichment_concurrency)?;
        if enrichment_concurrency == 0 {
            anyhow::bail!("ENRICHMENT_CONCURRENCY must be at least 1");
        }

        let config = Self {
            nuvem_fiscal_client_id: std::env::var("NUVEM_FISCAL_CLIENT_ID")
                .map_err(|_| anyhow::anyhow!("NUVEM_FISCAL_CLIENT_ID environment variable required"))
                .and_then(|id| {
                    if id.trim().is_empty() {
                        anyhow::bail!("NUVEM_FISCAL_CLIENT_ID cannot be empty");
                    }
                    Ok(id)
                })?,
            nuvem_fiscal_client_secret: std::env::var("NUVEM_FISCAL_CLIENT_SECRET")
                .map_err(|_| {
                    anyhow::anyhow!("NUVEM_FISCAL_CLIENT_SECRET environment variable required")
                })
                .and_then(|secret| {
                    if secret.trim().is_empty() {
                        anyhow::bail!("NUVEM_FISCAL_CLIENT_SECRET cannot be empty");
                    }
                    Ok(secret)
                })?,
            nuvem_fiscal_base_url: url_var("NUVEM_FISCAL_BASE_URL", &defaults.nuvem_fiscal_base_url)?,
            nuvem_fiscal_auth_url: url_var("NUVEM_FISCAL_AUTH_URL", &defaults.nuvem_fiscal_auth_url)?,
            // Explicitly empty disables the filter; unset keeps the default.
            nuvem_fiscal_natureza: match std::env::var("NUVEM_FISCAL_FILTER_NATUREZA") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v.trim().to_string()),
                Err(_) => defaults.nuvem_fiscal_natureza.clone(),
            },
            brasilapi_base_url: url_var("BRASILAPI_BASE_URL", &defaults.brasilapi_base_url)?,
            enable_rapidapi_enrichment: enable_rapidapi_enrichment && rapidapi_key.is_some(),
            rapidapi_base_url: url_var("RAPIDAPI_BASE_URL", &format!("https://{}", rapidapi_host))?,
            rapidapi_host,
            rapidapi_key,
            google_sheets_id: optional_var("GOOGLE_SHEETS_ID"),
            google_sheets_credentials,
            google_sheets_api_base_url: url_var(
                "GOOGLE_SHEETS_API_BASE_URL",
                &defaults.google_sheets_api_base_url,
            )?,
            production: bool_var("PRODUCTION", false),
            log_level: optional_var("LOG_LEVEL").unwrap_or(defaults.log_level),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            export_dir: optional_var("EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 30u64)?),
            retry: RetryPolicy {
                max_attempts,
                initial_delay: Duration::from_millis(parse_var("RETRY_DELAY_MS", 1000u64)?),
                max_delay: Duration::from_millis(parse_var("RETRY_MAX_DELAY_MS", 30_000u64)?),
            },
            rate_limit_requests,
            rate_limit_period: Duration::from_secs(parse_var("RATE_LIMIT_PERIOD_SECS", 1u64)?),
            cache_enabled: bool_var("CACHE_ENABLED", true),
            cache_ttl: Duration::from_secs(parse_var("CACHE_TTL_SECS", 3600u64)?),
            enrichment_concurrency,
            pipeline_timeout: optional_var("PIPELINE_TIMEOUT_SECS")
                .map(|v| {
                    v.trim().parse::<u64>().map_err(|_| {
                        anyhow::anyhow!("PIPELINE_TIMEOUT_SECS has an invalid value: {}", v)
                    })
                })
                .transpose()?
                .map(Duration::from_secs),
        };

        if config.rate_limit_period.is_zero() {
            anyhow::bail!("RATE_LIMIT_PERIOD_SECS must be at least 1");
        }

        Ok(config)
    }

    /// Builds the explicit pipeline options from this configuration.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            enrichment_enabled: self.enable_rapidapi_enrichment && self.rapidapi_key.is_some(),
            concurrency: self.enrichment_concurrency,
            fanout_timeout: self.pipeline_timeout,
            retry: self.retry,
            reduce_scope_on_rate_limit: true,
        }
    }

    /// True when a spreadsheet and credentials are both configured.
    pub fn sheets_configured(&self) -> bool {
        self.google_sheets_id.is_some() && self.google_sheets_credentials.is_some()
    }
}
