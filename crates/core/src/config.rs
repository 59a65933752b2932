//! Core runtime configuration.
//!
//! Two layers live here:
//! - [`ProcessingConfig`]: per-call orchestration settings, with named presets per [`TaskKind`].
//! - [`CoreConfig`]: process configuration resolved once at startup and passed into services as
//!   `Arc<CoreConfig>`. Environment variables are never read during request handling; the
//!   `*_from_env_value` helpers take the already-read value so they stay pure and testable.

use crate::constants::{
    DEFAULT_AUDIT_CAPACITY, DEFAULT_BREAKER_COOLDOWN_MS, DEFAULT_BREAKER_FAILURE_THRESHOLD,
    DEFAULT_PROVIDER_NAME, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS,
    ENV_BREAKER_COOLDOWN_MS, ENV_BREAKER_FAILURE_THRESHOLD,
};
use crate::error::{ConfigError, ConfigResult};
use crate::resilience::CircuitBreakerConfig;
use cds_types::NonEmptyText;
use std::time::Duration;

/// The clinical computations that carry a named preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    Diagnosis,
    Treatment,
    DrugInteraction,
    Notes,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Diagnosis,
        TaskKind::Treatment,
        TaskKind::DrugInteraction,
        TaskKind::Notes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Diagnosis => "diagnosis",
            TaskKind::Treatment => "treatment",
            TaskKind::DrugInteraction => "drugInteraction",
            TaskKind::Notes => "notes",
        }
    }

    /// The default [`ProcessingConfig`] for this task.
    pub fn preset(&self) -> ProcessingConfig {
        let (threshold, hybrid, timeout_ms, retries) = match self {
            TaskKind::Diagnosis => (0.75, true, 10_000, 2),
            TaskKind::Treatment => (0.80, true, 15_000, 2),
            TaskKind::DrugInteraction => (0.85, false, 8_000, 1),
            TaskKind::Notes => (0.60, true, 20_000, 1),
        };
        ProcessingConfig {
            confidence_threshold: threshold,
            enable_hybrid: hybrid,
            timeout: Duration::from_millis(timeout_ms),
            max_retries: retries,
            task: self.as_str().to_owned(),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::Invalid(format!("unknown task '{s}'")))
    }
}

/// Per-call orchestration settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    confidence_threshold: f64,
    enable_hybrid: bool,
    #[serde(rename = "timeoutMs", serialize_with = "serialize_millis")]
    timeout: Duration,
    max_retries: u32,
    task: String,
}

impl ProcessingConfig {
    /// Create a validated `ProcessingConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the threshold is outside `[0, 1]` (or NaN), the
    /// timeout is zero, or the task name is blank.
    pub fn new(
        confidence_threshold: f64,
        enable_hybrid: bool,
        timeout: Duration,
        max_retries: u32,
        task: impl Into<String>,
    ) -> ConfigResult<Self> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence threshold must be within [0, 1], got {confidence_threshold}"
            )));
        }
        if timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        let task = NonEmptyText::new(task.into())
            .map_err(|_| ConfigError::Invalid("task name cannot be empty".into()))?;

        Ok(Self {
            confidence_threshold,
            enable_hybrid,
            timeout,
            max_retries,
            task: task.into_inner(),
        })
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn enable_hybrid(&self) -> bool {
        self.enable_hybrid
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ConfigResult<Self> {
        if timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

fn serialize_millis<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    provider_name: NonEmptyText,
    provider_url: Option<String>,
    provider_api_key: Option<String>,
    breaker: CircuitBreakerConfig,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    audit_capacity: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the retry delays are inverted, the breaker threshold
    /// is zero, or the audit channel has no capacity.
    pub fn new(
        provider_name: NonEmptyText,
        provider_url: Option<String>,
        provider_api_key: Option<String>,
        breaker: CircuitBreakerConfig,
        retry_base_delay: Duration,
        retry_max_delay: Duration,
        audit_capacity: usize,
    ) -> ConfigResult<Self> {
        if breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit breaker failure threshold must be at least 1".into(),
            ));
        }
        if retry_base_delay > retry_max_delay {
            return Err(ConfigError::Invalid(
                "retry base delay cannot exceed the maximum delay".into(),
            ));
        }
        if audit_capacity == 0 {
            return Err(ConfigError::Invalid(
                "audit channel capacity must be at least 1".into(),
            ));
        }

        let provider_url = provider_url
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty());
        let provider_api_key = provider_api_key.filter(|k| !k.trim().is_empty());

        Ok(Self {
            provider_name,
            provider_url,
            provider_api_key,
            breaker,
            retry_base_delay,
            retry_max_delay,
            audit_capacity,
        })
    }

    /// A configuration with default breaker, retry and audit settings and no provider endpoint.
    pub fn with_defaults(provider_name: NonEmptyText) -> Self {
        Self {
            provider_name,
            provider_url: None,
            provider_api_key: None,
            breaker: CircuitBreakerConfig::default(),
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            retry_max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider_name.as_str()
    }

    pub fn provider_url(&self) -> Option<&str> {
        self.provider_url.as_deref()
    }

    pub fn provider_api_key(&self) -> Option<&str> {
        self.provider_api_key.as_deref()
    }

    pub fn breaker(&self) -> &CircuitBreakerConfig {
        &self.breaker
    }

    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    pub fn retry_max_delay(&self) -> Duration {
        self.retry_max_delay
    }

    pub fn audit_capacity(&self) -> usize {
        self.audit_capacity
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a millisecond duration from an optional environment value.
///
/// If `value` is `None` or empty/whitespace, returns `default_ms`.
pub fn millis_from_env_value(
    name: &'static str,
    value: Option<String>,
    default_ms: u64,
) -> ConfigResult<Duration> {
    let ms = match trimmed(value) {
        Some(v) => v.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
            name,
            value: v.clone(),
            reason: e.to_string(),
        })?,
        None => default_ms,
    };
    Ok(Duration::from_millis(ms))
}

/// Parse a positive integer from an optional environment value.
///
/// If `value` is `None` or empty/whitespace, returns `default`. Zero is rejected.
pub fn positive_from_env_value<T>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> ConfigResult<T>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let Some(v) = trimmed(value) else {
        return Ok(default);
    };
    let parsed = v.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        name,
        value: v.clone(),
        reason: e.to_string(),
    })?;
    if parsed == T::default() {
        return Err(ConfigError::InvalidValue {
            name,
            value: v,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(parsed)
}

/// Parse the provider name from an optional environment value.
pub fn provider_name_from_env_value(value: Option<String>) -> ConfigResult<NonEmptyText> {
    let name = trimmed(value).unwrap_or_else(|| DEFAULT_PROVIDER_NAME.into());
    NonEmptyText::new(name).map_err(|e| ConfigError::Invalid(e.to_string()))
}

/// Build the circuit breaker configuration from optional environment values.
pub fn breaker_from_env_values(
    threshold: Option<String>,
    cooldown_ms: Option<String>,
) -> ConfigResult<CircuitBreakerConfig> {
    Ok(CircuitBreakerConfig {
        failure_threshold: positive_from_env_value(
            ENV_BREAKER_FAILURE_THRESHOLD,
            threshold,
            DEFAULT_BREAKER_FAILURE_THRESHOLD,
        )?,
        cooldown: millis_from_env_value(
            ENV_BREAKER_COOLDOWN_MS,
            cooldown_ms,
            DEFAULT_BREAKER_COOLDOWN_MS,
        )?,
    })
}
