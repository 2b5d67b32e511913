//! OAuth access tokens: acquisition and a shared, refresh-once cache.

use crate::errors::AppError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Tokens are considered expired this long before the server says so.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A bearer token and its lifetime as reported by the issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

/// Anything that can mint a fresh access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<IssuedToken, AppError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Process-wide token cache shared by every concurrent request.
///
/// Readers take the read lock; a refresh happens under the write lock and is
/// re-checked after acquiring it, so concurrent callers never trigger
/// duplicate token requests.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    cached: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
        }
    }

    fn usable(cached: &Option<CachedToken>) -> Option<String> {
        cached
            .as_ref()
            .filter(|t| Instant::now() < t.expires_at)
            .map(|t| t.value.clone())
    }

    /// Returns a valid token, requesting a new one only when none is cached
    /// or the cached one has expired.
    pub async fn token(&self) -> Result<String, AppError> {
        if let Some(token) = Self::usable(&*self.cached.read().await) {
            return Ok(token);
        }

        let mut guard = self.cached.write().await;
        if let Some(token) = Self::usable(&guard) {
            return Ok(token);
        }

        let issued = self.source.fetch_token().await?;
        let lifetime = issued.expires_in.saturating_sub(EXPIRY_MARGIN);
        *guard = Some(CachedToken {
            value: issued.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        tracing::debug!("🔑 Access token cached for {:?}", lifetime);

        Ok(issued.access_token)
    }

    /// Drops the cached token if it is still the one the caller saw rejected.
    pub async fn invalidate(&self, rejected: &str) {
        let mut guard = self.cached.write().await;
        if guard.as_ref().is_some_and(|t| t.value == rejected) {
            *guard = None;
            tracing::info!("🔑 Cached access token invalidated");
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Nuvem Fiscal OAuth2 client-credentials flow.
pub struct NuvemFiscalAuth {
    client: Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
}

impl NuvemFiscalAuth {
    pub fn new(client: Client, auth_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            client,
            auth_url: auth_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for NuvemFiscalAuth {
    async fn fetch_token(&self) -> Result<IssuedToken, AppError> {
        tracing::info!("🔑 Requesting Nuvem Fiscal access token");

        let response = self
            .client
            .post(&self.auth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", "cnpj"),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(format!("Nuvem Fiscal auth request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Nuvem Fiscal auth returned error {}: {}", status, error_text);
            // The token endpoint answers 400 for wrong client credentials.
            if status.as_u16() == 400 {
                return Err(AppError::Authentication(format!(
                    "Nuvem Fiscal rejected client credentials: {}",
                    error_text
                )));
            }
            return Err(AppError::from_status(
                "Nuvem Fiscal auth",
                status,
                &headers,
                &error_text,
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to parse Nuvem Fiscal token: {}", e))
        })?;

        tracing::info!("✅ Nuvem Fiscal access token obtained");
        Ok(IssuedToken {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in.unwrap_or(3600)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        lifetime: Duration,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch_token(&self) -> Result<IssuedToken, AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(IssuedToken {
                access_token: format!("token-{}", n),
                expires_in: self.lifetime,
            })
        }
    }

    fn source(lifetime: Duration) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            lifetime,
        })
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let src = source(Duration::from_secs(3600));
        let cache = Arc::new(TokenCache::new(src.clone()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-0");
        }
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refreshed() {
        // Lifetime below the safety margin: never reused.
        let src = source(Duration::from_secs(30));
        let cache = TokenCache::new(src.clone());

        assert_eq!(cache.token().await.unwrap(), "token-0");
        assert_eq!(cache.token().await.unwrap(), "token-1");
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_only_drops_rejected_token() {
        let src = source(Duration::from_secs(3600));
        let cache = TokenCache::new(src.clone());

        let first = cache.token().await.unwrap();
        cache.invalidate("some-other-token").await;
        assert_eq!(cache.token().await.unwrap(), first);

        cache.invalidate(&first).await;
        assert_eq!(cache.token().await.unwrap(), "token-1");
    }
}
