//! The result every decision call returns.

use std::time::Duration;

/// Where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMethod {
    Ai,
    Hybrid,
    Fallback,
}

impl ProcessingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMethod::Ai => "AI",
            ProcessingMethod::Hybrid => "HYBRID",
            ProcessingMethod::Fallback => "FALLBACK",
        }
    }
}

impl std::fmt::Display for ProcessingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the returned data should be trusted. Ordered `Fallback < Medium < High`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    Fallback,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOutcome<T> {
    pub data: T,
    pub method: ProcessingMethod,
    pub confidence_level: ConfidenceLevel,
    #[serde(
        rename = "aiLatencyMs",
        serialize_with = "serialize_latency",
        skip_serializing_if = "Option::is_none"
    )]
    pub ai_latency: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl<T> ProcessingOutcome<T> {
    pub fn ai(data: T, confidence_level: ConfidenceLevel) -> Self {
        Self {
            data,
            method: ProcessingMethod::Ai,
            confidence_level,
            ai_latency: None,
            fallback_reason: None,
        }
    }

    pub fn hybrid(data: T, reason: impl Into<String>) -> Self {
        Self {
            data,
            method: ProcessingMethod::Hybrid,
            confidence_level: ConfidenceLevel::Medium,
            ai_latency: None,
            fallback_reason: Some(reason.into()),
        }
    }

    pub fn fallback(data: T, reason: impl Into<String>) -> Self {
        Self {
            data,
            method: ProcessingMethod::Fallback,
            confidence_level: ConfidenceLevel::Fallback,
            ai_latency: None,
            fallback_reason: Some(reason.into()),
        }
    }

    /// A deterministic answer that did not need the AI path at all.
    pub fn deterministic(data: T) -> Self {
        Self {
            data,
            method: ProcessingMethod::Fallback,
            confidence_level: ConfidenceLevel::High,
            ai_latency: None,
            fallback_reason: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.ai_latency = Some(latency);
        self
    }

    pub fn is_ai_assisted(&self) -> bool {
        matches!(self.method, ProcessingMethod::Ai | ProcessingMethod::Hybrid)
    }

    /// Transform the data while keeping provenance.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProcessingOutcome<U> {
        ProcessingOutcome {
            data: f(self.data),
            method: self.method,
            confidence_level: self.confidence_level,
            ai_latency: self.ai_latency,
            fallback_reason: self.fallback_reason,
        }
    }
}

fn serialize_latency<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(d) => serializer.serialize_u64(d.as_millis() as u64),
        None => serializer.serialize_none(),
    }
}
