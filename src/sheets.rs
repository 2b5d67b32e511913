//! Google Sheets export through a service account.

use crate::auth::{IssuedToken, TokenCache, TokenSource};
use crate::config::{Config, SheetsCredentials};
use crate::errors::AppError;
use crate::export::{crm_row, Exporter, CRM_HEADERS};
use crate::models::CompanyRecord;
use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// The fields of a Google service-account key file we need.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("Invalid service account JSON: {}", e)))
    }

    /// Loads the key from whichever credential source is configured.
    pub fn load(credentials: &SheetsCredentials) -> Result<Self, AppError> {
        match credentials {
            SheetsCredentials::Base64(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| {
                        AppError::Config(format!("Invalid GOOGLE_SHEETS_CREDENTIALS_B64: {}", e))
                    })?;
                let raw = String::from_utf8(bytes).map_err(|e| {
                    AppError::Config(format!("GOOGLE_SHEETS_CREDENTIALS_B64 is not UTF-8: {}", e))
                })?;
                Self::from_json(&raw)
            }
            SheetsCredentials::Json(raw) => Self::from_json(raw),
            SheetsCredentials::Path(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    AppError::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json(&raw)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// OAuth2 JWT-bearer flow for a service account.
pub struct ServiceAccountAuth {
    client: Client,
    key: ServiceAccountKey,
}

impl ServiceAccountAuth {
    pub fn new(client: Client, key: ServiceAccountKey) -> Self {
        Self { client, key }
    }

    /// Signed RS256 assertion valid for one hour.
    pub fn assertion(&self) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| AppError::Config(format!("Invalid service account private key: {}", e)))?;

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| AppError::Config(format!("Failed to sign service account JWT: {}", e)))
    }
}

#[async_trait]
impl TokenSource for ServiceAccountAuth {
    async fn fetch_token(&self) -> Result<IssuedToken, AppError> {
        let assertion = self.assertion()?;
        tracing::info!("🔑 Requesting Google access token for {}", self.key.client_email);

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Google auth request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Authentication(format!(
                "Google rejected service account {} ({}): {}",
                self.key.client_email, status, error_text
            )));
        }

        let token: GoogleTokenResponse = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to parse Google token: {}", e))
        })?;

        Ok(IssuedToken {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in.unwrap_or(3600)),
        })
    }
}

/// Appends records to a spreadsheet in CRM layout.
pub struct GoogleSheetsExporter {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    tokens: TokenCache,
    clear_first: bool,
}

impl GoogleSheetsExporter {
    /// Builds the exporter from configuration.
    ///
    /// # Returns
    ///
    /// * `AppError::Config` when the spreadsheet id or credentials are missing or unreadable.
    pub fn from_config(client: Client, config: &Config, clear_first: bool) -> Result<Self, AppError> {
        let spreadsheet_id = config
            .google_sheets_id
            .clone()
            .ok_or_else(|| AppError::Config("GOOGLE_SHEETS_ID is not set".to_string()))?;
        let credentials = config.google_sheets_credentials.as_ref().ok_or_else(|| {
            AppError::Config("Google Sheets credentials are not configured".to_string())
        })?;
        let key = ServiceAccountKey::load(credentials)?;
        let auth = ServiceAccountAuth::new(client.clone(), key);

        Ok(Self::new(
            client,
            &config.google_sheets_api_base_url,
            &spreadsheet_id,
            Arc::new(auth),
            clear_first,
        ))
    }

    pub fn new(
        client: Client,
        api_base: &str,
        spreadsheet_id: &str,
        tokens: Arc<dyn TokenSource>,
        clear_first: bool,
    ) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            tokens: TokenCache::new(tokens),
            clear_first,
        }
    }

    pub fn spreadsheet_url(&self) -> String {
        format!("https://docs.google.com/spreadsheets/d/{}", self.spreadsheet_id)
    }

    fn values_url(&self, suffix: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.api_base, self.spreadsheet_id, suffix
        )
    }

    async fn checked(&self, response: reqwest::Response) -> Result<Value, AppError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| AppError::Export(format!("Invalid Google Sheets response: {}", e)));
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::error!("Google Sheets returned error {}: {}", status, error_text);
        Err(match status.as_u16() {
            403 => AppError::Export(
                "Google Sheets permission denied: share the spreadsheet with the service account"
                    .to_string(),
            ),
            404 => AppError::Export(format!("Spreadsheet {} not found", self.spreadsheet_id)),
            _ => AppError::Export(format!(
                "Google Sheets returned status {}: {}",
                status, error_text
            )),
        })
    }

    async fn header_present(&self, token: &str) -> Result<bool, AppError> {
        let response = self
            .client
            .get(self.values_url("A1:Z1"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Export(format!("Google Sheets request failed: {}", e)))?;
        let body = self.checked(response).await?;

        Ok(body
            .get("values")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_array)
            .is_some_and(|first| !first.is_empty()))
    }

    async fn clear(&self, token: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.values_url("A:Z:clear"))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| AppError::Export(format!("Google Sheets request failed: {}", e)))?;
        self.checked(response).await?;
        Ok(())
    }

    async fn append(&self, token: &str, rows: Vec<Vec<String>>) -> Result<(), AppError> {
        let url = reqwest::Url::parse_with_params(
            &self.values_url("A1:append"),
            &[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ],
        )
        .map_err(|e| AppError::Config(format!("Failed to build URL: {}", e)))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": rows }))
            .send()
            .await
            .map_err(|e| AppError::Export(format!("Google Sheets request failed: {}", e)))?;
        self.checked(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Exporter for GoogleSheetsExporter {
    fn target(&self) -> &'static str {
        "Google Sheets"
    }

    async fn export(&self, records: &[CompanyRecord], _stem: &str) -> Result<String, AppError> {
        if records.is_empty() {
            return Err(AppError::Validation(
                "Nenhuma empresa para exportar".to_string(),
            ));
        }

        let token = self
            .tokens
            .token()
            .await
            .map_err(|e| AppError::Export(format!("Google authentication failed: {}", e)))?;

        if self.clear_first {
            self.clear(&token).await?;
        }
        let write_header = self.clear_first || !self.header_present(&token).await?;

        let consulted_at = chrono::Local::now().format("%d/%m/%Y %H:%M").to_string();
        let mut rows: Vec<Vec<String>> = Vec::with_capacity(records.len() + 1);
        if write_header {
            rows.push(CRM_HEADERS.iter().map(|h| h.to_string()).collect());
        }
        rows.extend(records.iter().map(|r| crm_row(r, &consulted_at)));

        self.append(&token, rows).await?;

        let url = self.spreadsheet_url();
        tracing::info!("📤 {} records sent to Google Sheets: {}", records.len(), url);
        Ok(url)
    }
}
