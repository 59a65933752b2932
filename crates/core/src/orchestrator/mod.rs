//! Fallback orchestration for AI-assisted clinical computations.
//!
//! [`FallbackOrchestrator::process_with_fallback`] guarantees a schema-valid answer:
//! - the retried, breaker-gated AI call races a timeout; the losing future is dropped, which
//!   cancels any in-flight provider request
//! - every AI-path failure (timeout, transport, open circuit, invalid output) becomes a
//!   fallback decision
//! - a usable AI answer is scored and either returned, merged with the fallback, or replaced
//! - only a failing fallback escapes, as [`FallbackError`]

pub mod confidence;
pub mod merge;
pub mod outcome;

pub use confidence::extract_confidence;
pub use merge::{merge, union_by_id};
pub use outcome::{ConfidenceLevel, ProcessingMethod, ProcessingOutcome};

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::ProcessingConfig;
use crate::constants::{HIGH_CONFIDENCE, LOW_CONFIDENCE_REASON, MERGE_INVALID_REASON};
use crate::error::{
    BoxError, FallbackError, FallbackPanic, FallbackSchemaViolation, ProviderError,
};
use crate::provider::{decode_output, AiProvider, OutputSchema, Prompt, ProviderRequest};
use crate::resilience::{CircuitBreakerRegistry, CircuitError, RetryExecutor, RetryPolicy};

/// Runs AI calls with retries, a per-provider circuit breaker and a deterministic safety net.
pub struct FallbackOrchestrator {
    provider: Arc<dyn AiProvider>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl FallbackOrchestrator {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            breakers,
            retry,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Produce a `T` for `prompt`, falling back to `fallback` whenever the AI path cannot be
    /// trusted.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError`] only when `fallback` returns an error, panics, or produces data
    /// that fails `T`'s own validation. AI-path errors never surface here.
    pub async fn process_with_fallback<T, F, Fut>(
        &self,
        prompt: Prompt,
        fallback: F,
        config: &ProcessingConfig,
    ) -> Result<ProcessingOutcome<T>, FallbackError>
    where
        T: OutputSchema,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let task = config.task();
        let request = ProviderRequest {
            task: task.to_owned(),
            schema: T::SCHEMA_NAME,
            prompt,
        };

        let started = Instant::now();
        let raced = tokio::time::timeout(config.timeout(), self.call_ai::<T>(&request, config)).await;
        let latency = started.elapsed();

        let (ai_data, raw) = match raced {
            Err(_) => {
                let reason = format!("AI timeout after {}ms", config.timeout().as_millis());
                tracing::warn!(task, provider = self.provider.name(), "{reason}");
                let data = run_fallback(task, fallback).await?;
                return Ok(ProcessingOutcome::fallback(data, reason).with_latency(latency));
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    task,
                    provider = self.provider.name(),
                    error = %err,
                    "AI call failed, using fallback"
                );
                let data = run_fallback(task, fallback).await?;
                return Ok(ProcessingOutcome::fallback(data, err.to_string()).with_latency(latency));
            }
            Ok(Ok(answer)) => answer,
        };

        let confidence = extract_confidence(&raw);
        let threshold = config.confidence_threshold();

        if confidence >= HIGH_CONFIDENCE {
            tracing::info!(task, confidence, "AI answer accepted with high confidence");
            return Ok(ProcessingOutcome::ai(ai_data, ConfidenceLevel::High).with_latency(latency));
        }
        if confidence >= threshold {
            tracing::info!(task, confidence, "AI answer accepted with medium confidence");
            return Ok(
                ProcessingOutcome::ai(ai_data, ConfidenceLevel::Medium).with_latency(latency)
            );
        }

        let fallback_data = run_fallback(task, fallback).await?;

        if !config.enable_hybrid() {
            tracing::info!(task, confidence, threshold, "AI answer below threshold, using fallback");
            return Ok(
                ProcessingOutcome::fallback(fallback_data, LOW_CONFIDENCE_REASON)
                    .with_latency(latency),
            );
        }

        match hybrid(&fallback_data, raw) {
            Some(merged) => {
                tracing::info!(task, confidence, threshold, "AI answer merged with fallback");
                Ok(ProcessingOutcome::hybrid(merged, LOW_CONFIDENCE_REASON).with_latency(latency))
            }
            None => {
                tracing::warn!(task, "hybrid merge did not validate, using fallback");
                Ok(
                    ProcessingOutcome::fallback(fallback_data, MERGE_INVALID_REASON)
                        .with_latency(latency),
                )
            }
        }
    }

    /// One retried AI call; every attempt goes through the provider's breaker and is decoded
    /// against `T`, so invalid output counts as a failed attempt.
    async fn call_ai<T: OutputSchema>(
        &self,
        request: &ProviderRequest,
        config: &ProcessingConfig,
    ) -> Result<(T, serde_json::Value), ProviderError> {
        let provider = &self.provider;
        let breaker = self.breakers.get(provider.name());
        let breaker = &breaker;
        let executor = RetryExecutor::new(self.retry.clone().with_max_retries(config.max_retries()));

        executor
            .run(|attempt| async move {
                tracing::debug!(task = %request.task, attempt, provider = provider.name(), "calling AI provider");
                breaker
                    .execute(|| async {
                        let raw = provider.generate(request).await?;
                        let decoded = decode_output::<T>(raw.clone())?;
                        Ok::<_, ProviderError>((decoded, raw))
                    })
                    .await
                    .map_err(|err| match err {
                        CircuitError::Open { name } => ProviderError::CircuitOpen(name),
                        CircuitError::Inner(inner) => inner,
                    })
            })
            .await
    }
}

/// Merge the fallback with the raw AI value and re-validate; `None` when the merge is not a
/// valid `T`.
fn hybrid<T: OutputSchema>(fallback: &T, raw: serde_json::Value) -> Option<T> {
    let fallback_value = serde_json::to_value(fallback).ok()?;
    decode_output::<T>(merge(fallback_value, raw)).ok()
}

/// Invoke the fallback, converting errors, panics and invalid output into [`FallbackError`].
async fn run_fallback<T, F, Fut>(task: &str, fallback: F) -> Result<T, FallbackError>
where
    T: OutputSchema,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, BoxError>>,
{
    let result = AssertUnwindSafe(async move { fallback().await })
        .catch_unwind()
        .await;

    let source: BoxError = match result {
        Ok(Ok(data)) => match data.validate() {
            Ok(()) => return Ok(data),
            Err(reason) => Box::new(FallbackSchemaViolation {
                schema: T::SCHEMA_NAME,
                reason,
            }),
        },
        Ok(Err(err)) => err,
        Err(payload) => Box::new(FallbackPanic(panic_message(payload.as_ref()))),
    };

    tracing::error!(task, error = %source, "deterministic fallback failed");
    Err(FallbackError::new(task, source))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderResult;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Finding {
        id: String,
        text: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Assessment {
        summary: String,
        #[serde(default)]
        findings: Vec<Finding>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    }

    impl OutputSchema for Assessment {
        const SCHEMA_NAME: &'static str = "assessment";

        fn validate(&self) -> Result<(), String> {
            if self.summary.is_empty() {
                Err("summary cannot be empty".into())
            } else {
                Ok(())
            }
        }
    }

    enum Step {
        Reply(Value),
        Fail(ProviderError),
        Hang,
    }

    /// Provider replaying a script of responses; the last step repeats.
    struct ScriptedProvider {
        steps: parking_lot::Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: parking_lot::Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: &ProviderRequest) -> ProviderResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut steps = self.steps.lock();
                if steps.len() > 1 {
                    steps.pop_front()
                } else {
                    steps.front().map(|s| match s {
                        Step::Reply(v) => Step::Reply(v.clone()),
                        Step::Fail(e) => Step::Fail(e.clone()),
                        Step::Hang => Step::Hang,
                    })
                }
            };
            match step {
                Some(Step::Reply(v)) => Ok(v),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Hang) | None => std::future::pending().await,
            }
        }
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> FallbackOrchestrator {
        orchestrator_with_breaker(provider, 100)
    }

    fn orchestrator_with_breaker(
        provider: Arc<ScriptedProvider>,
        failure_threshold: u32,
    ) -> FallbackOrchestrator {
        FallbackOrchestrator::new(
            provider,
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
                failure_threshold,
                cooldown: Duration::from_secs(60),
            })),
            RetryPolicy::ai_provider(Duration::from_millis(10), Duration::from_millis(40))
                .without_jitter(),
        )
    }

    fn config(threshold: f64, hybrid: bool) -> ProcessingConfig {
        ProcessingConfig::new(threshold, hybrid, Duration::from_millis(500), 2, "diagnosis")
            .unwrap()
    }

    fn fallback_assessment() -> Assessment {
        Assessment {
            summary: "rule-based".into(),
            findings: vec![
                Finding {
                    id: "monitor".into(),
                    text: "monitor vitals".into(),
                },
                Finding {
                    id: "refer".into(),
                    text: "refer to GP".into(),
                },
            ],
            confidence: None,
        }
    }

    async fn ok_fallback() -> Result<Assessment, BoxError> {
        Ok(fallback_assessment())
    }

    async fn panicking_fallback() -> Result<Assessment, BoxError> {
        panic!("rule table corrupted")
    }

    fn prompt() -> Prompt {
        Prompt::new("system", "patient summary")
    }

    #[tokio::test]
    async fn test_high_confidence_returns_raw_ai_result() {
        let raw = json!({ "summary": "ai", "findings": [{ "id": "x", "text": "ai" }], "confidence": 0.9 });
        let provider = ScriptedProvider::new(vec![Step::Reply(raw.clone())]);
        let fallback_calls = AtomicU32::new(0);

        let outcome = orchestrator(provider)
            .process_with_fallback(
                prompt(),
                || async {
                    fallback_calls.fetch_add(1, Ordering::SeqCst);
                    ok_fallback().await
                },
                &config(0.7, true),
            )
            .await
            .unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Ai);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::High);
        assert_eq!(outcome.data, serde_json::from_value::<Assessment>(raw).unwrap());
        assert!(outcome.ai_latency.is_some());
        assert!(outcome.fallback_reason.is_none());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_confidence_equal_to_threshold_is_medium_ai() {
        let provider = ScriptedProvider::new(vec![Step::Reply(
            json!({ "summary": "ai", "confidence": 0.70 }),
        )]);

        let outcome = orchestrator(provider)
            .process_with_fallback(prompt(), ok_fallback, &config(0.70, true))
            .await
            .unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Ai);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Medium);
    }

    #[tokio::test]
    async fn test_low_confidence_with_hybrid_merges() {
        let provider = ScriptedProvider::new(vec![Step::Reply(json!({
            "summary": "ai summary",
            "findings": [
                { "id": "refer", "text": "urgent cardiology referral" },
                { "id": "ecg", "text": "12-lead ECG" }
            ],
            "confidence": 0.4
        }))]);

        let outcome = orchestrator(provider)
            .process_with_fallback(prompt(), ok_fallback, &config(0.75, true))
            .await
            .unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Hybrid);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Medium);
        assert_eq!(outcome.fallback_reason.as_deref(), Some(LOW_CONFIDENCE_REASON));
        assert_eq!(outcome.data.summary, "ai summary");
        let ids: Vec<_> = outcome.data.findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["monitor", "refer", "ecg"]);
        assert_eq!(outcome.data.findings[1].text, "urgent cardiology referral");
    }

    #[tokio::test]
    async fn test_low_confidence_without_hybrid_uses_fallback() {
        let provider =
            ScriptedProvider::new(vec![Step::Reply(json!({ "summary": "ai", "confidence": 0.2 }))]);

        let outcome = orchestrator(provider)
            .process_with_fallback(prompt(), ok_fallback, &config(0.75, false))
            .await
            .unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Fallback);
        assert_eq!(outcome.data, fallback_assessment());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ai_failure_reason_is_error_message() {
        let err = ProviderError::Transient("connection reset".into());
        let provider = ScriptedProvider::new(vec![Step::Fail(err.clone())]);

        let outcome = orchestrator(provider.clone())
            .process_with_fallback(prompt(), ok_fallback, &config(0.75, true))
            .await
            .unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        assert_eq!(outcome.fallback_reason, Some(err.to_string()));
        assert!(outcome.ai_latency.is_some());
        assert_eq!(provider.calls(), 3, "max_retries = 2 means three attempts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_output_is_retried_then_recovers() {
        let provider = ScriptedProvider::new(vec![
            Step::Reply(json!({ "summary": "" })),
            Step::Reply(json!({ "summary": "ai", "confidence": 0.95 })),
        ]);

        let outcome = orchestrator(provider.clone())
            .process_with_fallback(prompt(), ok_fallback, &config(0.75, true))
            .await
            .unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Ai);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_times_out_to_fallback() {
        let provider = ScriptedProvider::new(vec![Step::Hang]);
        let started = Instant::now();

        let outcome = orchestrator(provider)
            .process_with_fallback(prompt(), ok_fallback, &config(0.75, true))
            .await
            .unwrap();

        assert_eq!(outcome.method, ProcessingMethod::Fallback);
        let reason = outcome.fallback_reason.unwrap();
        assert!(reason.contains("timeout"), "reason was {reason}");
        assert_eq!(reason, "AI timeout after 500ms");
        assert!(started.elapsed() <= Duration::from_millis(510));
    }

    #[tokio::test]
    async fn test_fallback_error_is_wrapped_not_swallowed() {
        let provider = ScriptedProvider::new(vec![Step::Fail(ProviderError::Rejected("403".into()))]);

        let err = orchestrator(provider)
            .process_with_fallback::<Assessment, _, _>(
                prompt(),
                || async { Err::<Assessment, BoxError>(Box::new(std::io::Error::other("table missing"))) },
                &config(0.75, true),
            )
            .await
            .unwrap_err();

        assert_eq!(err.task, "diagnosis");
        let cause = std::error::Error::source(&err).expect("cause preserved");
        assert_eq!(cause.to_string(), "table missing");
        assert!(cause.downcast_ref::<std::io::Error>().is_some());
    }

    #[tokio::test]
    async fn test_fallback_panic_is_wrapped() {
        let provider = ScriptedProvider::new(vec![Step::Reply(json!({ "summary": "ai", "confidence": 0.1 }))]);

        let err = orchestrator(provider)
            .process_with_fallback::<Assessment, _, _>(
                prompt(),
                panicking_fallback,
                &config(0.75, true),
            )
            .await
            .unwrap_err();

        let panic = err
            .source
            .downcast_ref::<FallbackPanic>()
            .expect("panic should be wrapped");
        assert_eq!(panic.0, "rule table corrupted");
    }

    #[tokio::test]
    async fn test_invalid_fallback_output_is_fatal() {
        let provider = ScriptedProvider::new(vec![Step::Fail(ProviderError::Rejected("no".into()))]);

        let err = orchestrator(provider)
            .process_with_fallback::<Assessment, _, _>(
                prompt(),
                || async {
                    Ok(Assessment {
                        summary: String::new(),
                        findings: vec![],
                        confidence: None,
                    })
                },
                &config(0.75, true),
            )
            .await
            .unwrap_err();

        assert!(err.source.downcast_ref::<FallbackSchemaViolation>().is_some());
    }

    #[tokio::test]
    async fn test_open_circuit_skips_provider() {
        let provider = ScriptedProvider::new(vec![Step::Fail(ProviderError::Rejected("500".into()))]);
        let orch = orchestrator_with_breaker(provider.clone(), 1);

        let first = orch
            .process_with_fallback(prompt(), ok_fallback, &config(0.75, true))
            .await
            .unwrap();
        assert_eq!(first.method, ProcessingMethod::Fallback);
        assert_eq!(orch.breakers().get("scripted").state(), CircuitState::Open);

        let second = orch
            .process_with_fallback(prompt(), ok_fallback, &config(0.75, true))
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1, "open circuit must not reach the provider");
        assert_eq!(
            second.fallback_reason,
            Some(ProviderError::CircuitOpen("scripted".into()).to_string())
        );
    }
}
