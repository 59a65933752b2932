//! Error types for the decision core.
//!
//! Errors on the AI path ([`ProviderError`]) are always absorbed into a fallback decision by
//! the orchestrator. Only [`FallbackError`] escapes to callers: it means the deterministic
//! logic itself is broken.

/// Boxed error used at the seams where callers supply their own error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of provider failures, used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderErrorKind {
    Transient,
    SchemaValidation,
    Rejected,
    CircuitOpen,
}

/// Failures on the AI path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("AI provider unavailable: {0}")]
    Transient(String),
    #[error("AI response failed schema validation: {0}")]
    SchemaValidation(String),
    #[error("AI provider rejected the request: {0}")]
    Rejected(String),
    #[error("circuit open for AI provider '{0}'")]
    CircuitOpen(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Transient(_) => ProviderErrorKind::Transient,
            ProviderError::SchemaValidation(_) => ProviderErrorKind::SchemaValidation,
            ProviderError::Rejected(_) => ProviderErrorKind::Rejected,
            ProviderError::CircuitOpen(_) => ProviderErrorKind::CircuitOpen,
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// The deterministic fallback failed. Always fatal for the request.
#[derive(Debug, thiserror::Error)]
#[error("deterministic fallback failed for task '{task}': {source}")]
pub struct FallbackError {
    pub task: String,
    #[source]
    pub source: BoxError,
}

impl FallbackError {
    pub fn new(task: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            task: task.into(),
            source: source.into(),
        }
    }
}

/// A fallback panicked; carries the panic payload when it was a string.
#[derive(Debug, thiserror::Error)]
#[error("fallback panicked: {0}")]
pub struct FallbackPanic(pub String);

/// A fallback produced data that does not satisfy its own output schema.
#[derive(Debug, thiserror::Error)]
#[error("fallback output violates schema '{schema}': {reason}")]
pub struct FallbackSchemaViolation {
    pub schema: &'static str,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read knowledge file: {0}")]
    FileRead(std::io::Error),
    #[error("knowledge file schema mismatch at {path}: {reason}")]
    SchemaMismatch { path: String, reason: String },
    #[error("invalid compliance rule '{rule_id}': {source}")]
    InvalidRule {
        rule_id: String,
        #[source]
        source: crate::rules::RuleParseError,
    },
    #[error("duplicate id '{0}' in knowledge file")]
    DuplicateId(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink rejected record: {0}")]
    Rejected(String),
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

pub type AuditResult<T> = std::result::Result<T, AuditError>;
