use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type shared by the per-CNPJ providers.
pub type ProviderCircuitBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for a secondary lookup provider (fallback or enrichment).
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, lookups pass through.
/// - **OPEN**: Provider keeps failing, lookups are rejected without a network call.
/// - **HALF_OPEN**: Testing if the provider recovered.
///
/// Clones share state, so one breaker can guard every in-flight lookup of a provider.
///
/// # Returns
///
/// * `ProviderCircuitBreaker` - The configured circuit breaker instance.
pub fn create_provider_circuit_breaker() -> ProviderCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
