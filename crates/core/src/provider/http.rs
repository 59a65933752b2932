//! JSON-over-HTTP AI provider.
//!
//! Posts the [`ProviderRequest`] as JSON to a single endpoint and expects the structured output
//! object as the response body. Failures are classified for the retry policy:
//! - connection errors, timeouts, `429` and `5xx` are transient
//! - any other non-success status is a rejection
//! - a body that is not JSON is a schema validation failure

use async_trait::async_trait;
use std::time::Duration;

use super::{AiProvider, ProviderRequest};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Clone)]
pub struct HttpJsonProvider {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpJsonProvider {
    /// Create a provider posting to `endpoint`.
    ///
    /// `request_timeout` bounds a single HTTP exchange; the orchestrator's own timeout still
    /// bounds the whole retried call.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Rejected(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn classify_status(status: reqwest::StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        None
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(ProviderError::Transient(format!("provider returned {status}")))
    } else {
        Some(ProviderError::Rejected(format!("provider returned {status}")))
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::SchemaValidation("response body is not valid JSON".into())
    } else if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient("provider request failed".into())
    } else {
        ProviderError::Rejected("provider request could not be sent".into())
    }
}

#[async_trait]
impl AiProvider for HttpJsonProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &ProviderRequest) -> ProviderResult<serde_json::Value> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(classify_transport)
    }
}
