//! Logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `log_level` applies to this crate and
/// `tower_http`. Production output is JSON lines.
pub fn init_tracing(log_level: &str, production: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("cnae_prospector={level},tower_http={level}", level = log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if production {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
