use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Upstream rejected our credentials. Fatal for the whole query.
    Authentication(String),
    /// Upstream throttled the request.
    RateLimit {
        /// Name of the throttling service.
        service: String,
        /// Delay suggested by the `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },
    /// Network failure, timeout or 5xx from an upstream.
    UpstreamUnavailable(String),
    /// Call refused locally because the provider's circuit is open.
    CircuitOpen(String),
    /// Source has no data for the key.
    NotFound(String),
    /// Malformed query parameters. Raised before any network call.
    Validation(String),
    /// Output could not be written (file, spreadsheet).
    Export(String),
    /// Missing or inconsistent configuration.
    Config(String),
    /// Operation cancelled before any record was fetched.
    Cancelled,
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Classifies a non-success upstream HTTP status.
    ///
    /// # Arguments
    ///
    /// * `service` - Name of the upstream, used in messages.
    /// * `status` - The HTTP status returned.
    /// * `headers` - Response headers (read for `Retry-After`).
    /// * `body` - Response body text, kept for diagnostics.
    pub fn from_status(
        service: &str,
        status: reqwest::StatusCode,
        headers: &HeaderMap,
        body: &str,
    ) -> Self {
        match status.as_u16() {
            401 | 403 => AppError::Authentication(format!(
                "{} rejected credentials ({}): {}",
                service, status, body
            )),
            429 => AppError::RateLimit {
                service: service.to_string(),
                retry_after: headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs),
            },
            404 => AppError::NotFound(format!("{}: {}", service, body)),
            400 | 422 => AppError::Validation(format!(
                "{} rejected the request ({}): {}",
                service, status, body
            )),
            _ => AppError::UpstreamUnavailable(format!(
                "{} returned status {}: {}",
                service, status, body
            )),
        }
    }

    /// Strips context wrappers and returns the underlying error.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            AppError::RateLimit { .. } | AppError::UpstreamUnavailable(_)
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self.root(), AppError::RateLimit { .. })
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self.root(), AppError::Authentication(_))
    }

    /// Server-suggested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root() {
            AppError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Authentication(msg) => write!(f, "Authentication error: {}", msg),
            AppError::RateLimit {
                service,
                retry_after,
            } => match retry_after {
                Some(delay) => write!(
                    f,
                    "Rate limited by {} (retry after {}s)",
                    service,
                    delay.as_secs()
                ),
                None => write!(f, "Rate limited by {}", service),
            },
            AppError::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {}", msg),
            AppError::CircuitOpen(service) => write!(f, "Circuit open for {}", service),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Export(msg) => write!(f, "Export error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Cancelled => write!(f, "Operation cancelled"),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::RateLimit { .. } => {
                tracing::warn!("{}", self);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Upstream rate limit reached, try again later".to_string(),
                )
            }
            AppError::Authentication(msg) => {
                tracing::error!("Upstream authentication failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service authentication failed".to_string(),
                )
            }
            AppError::UpstreamUnavailable(msg) | AppError::CircuitOpen(msg) => {
                tracing::error!("Upstream unavailable: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service unavailable".to_string(),
                )
            }
            AppError::Export(msg) | AppError::Config(msg) => {
                tracing::error!("{}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Operation cancelled".to_string(),
            ),
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return (*source.clone()).into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    /// Transport-level failures (connect, timeout, decode) are upstream outages.
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for I/O errors raised while writing exports.
impl<T> ResultExt<T> for Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::Export(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::Export(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_status_classification() {
        let headers = HeaderMap::new();
        let cases = [
            (401, "auth"),
            (403, "auth"),
            (404, "not_found"),
            (400, "validation"),
            (500, "upstream"),
            (503, "upstream"),
        ];

        for (code, expected) in cases {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            let err = AppError::from_status("Nuvem Fiscal", status, &headers, "");
            let kind = match err {
                AppError::Authentication(_) => "auth",
                AppError::NotFound(_) => "not_found",
                AppError::Validation(_) => "validation",
                AppError::UpstreamUnavailable(_) => "upstream",
                _ => "other",
            };
            assert_eq!(kind, expected, "status {}", code);
        }
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

        let err = AppError::from_status(
            "BrasilAPI",
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            &headers,
            "slow down",
        );

        assert!(err.is_rate_limit());
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_context_preserves_kind() {
        let err: Result<(), AppError> =
            Err(AppError::Authentication("bad secret".to_string()));
        let err = err.context("Nuvem Fiscal search").unwrap_err();

        assert!(err.is_authentication());
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("Nuvem Fiscal search: "));
    }

    #[test]
    fn test_open_circuit_is_not_retryable() {
        let err = AppError::CircuitOpen("BrasilAPI".to_string());

        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Circuit open for BrasilAPI");
    }
}
