//! AI provider boundary.
//!
//! A provider turns a [`ProviderRequest`] into an untyped JSON value. The orchestrator decodes
//! that value into the caller's [`OutputSchema`] type inside each attempt, so a response that
//! fails validation is treated exactly like a failed call (and is retried).

pub mod http;

pub use http::HttpJsonProvider;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProviderError, ProviderResult};

/// A structured output type an AI provider must produce.
pub trait OutputSchema: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name sent to the provider so it knows which shape to return.
    const SCHEMA_NAME: &'static str;

    /// Semantic checks beyond what deserialisation enforces.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl<T> OutputSchema for Vec<T>
where
    T: OutputSchema,
{
    const SCHEMA_NAME: &'static str = "list";

    fn validate(&self) -> Result<(), String> {
        self.iter().try_for_each(OutputSchema::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRequest {
    pub task: String,
    pub schema: &'static str,
    #[serde(flatten)]
    pub prompt: Prompt,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable name used for the provider's circuit breaker and in audit records.
    fn name(&self) -> &str;

    async fn generate(&self, request: &ProviderRequest) -> ProviderResult<serde_json::Value>;
}

/// Decode and validate a raw provider value against `T`.
///
/// # Errors
///
/// Returns [`ProviderError::SchemaValidation`] naming the failing path when deserialisation
/// fails, or the reason reported by [`OutputSchema::validate`].
pub fn decode_output<T: OutputSchema>(value: serde_json::Value) -> ProviderResult<T> {
    let decoded: T = serde_path_to_error::deserialize(value)
        .map_err(|e| ProviderError::SchemaValidation(format!("{}: {}", T::SCHEMA_NAME, e)))?;
    decoded
        .validate()
        .map_err(|reason| ProviderError::SchemaValidation(format!("{}: {}", T::SCHEMA_NAME, reason)))?;
    Ok(decoded)
}

/// Provider used when no endpoint is configured. Every call is rejected, so requests resolve
/// through their deterministic fallback without waiting on retries.
#[derive(Debug, Clone)]
pub struct OfflineProvider {
    name: String,
}

impl OfflineProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AiProvider for OfflineProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _request: &ProviderRequest) -> ProviderResult<serde_json::Value> {
        Err(ProviderError::Rejected(
            "no AI provider endpoint configured".into(),
        ))
    }
}
