//! Protection around calls to external AI providers.
//!
//! - [`CircuitBreaker`]: per-provider failure tracking that fails fast while a provider is unhealthy
//! - [`CircuitBreakerRegistry`]: one breaker per provider name, owned by the orchestrator
//! - [`RetryExecutor`]: bounded exponential-backoff retries over retryable [`ProviderErrorKind`]s
//!
//! [`ProviderErrorKind`]: crate::error::ProviderErrorKind

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitError, CircuitState,
    CircuitStats,
};
pub use retry::{RetryExecutor, RetryPolicy};
