//! Constants used throughout the decision core.
//!
//! Thresholds, environment variable names and defaults live here so the
//! orchestrator, configuration and engines agree on them.

/// Confidence at or above which an AI answer is reported as `HIGH`.
pub const HIGH_CONFIDENCE: f64 = 0.85;

/// Confidence assumed when the AI output carries no recognisable signal.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Confidence mapped from `extractionQuality` values.
pub const EXTRACTION_COMPLETE: f64 = 0.9;
pub const EXTRACTION_PARTIAL: f64 = 0.7;
pub const EXTRACTION_UNCERTAIN: f64 = 0.3;

/// Fallback reason used when the AI answer is scored below the threshold.
pub const LOW_CONFIDENCE_REASON: &str = "confidence below threshold";

/// Fallback reason used when a hybrid merge cannot be validated against the schema.
pub const MERGE_INVALID_REASON: &str = "hybrid merge failed schema validation";

/// Fallback reason used when the safety filters removed every recommendation.
pub const ALL_FILTERED_REASON: &str = "all recommendations filtered for patient safety";

/// Evidence grade attached to generic fallback recommendations.
pub const EXPERT_OPINION: &str = "expert-opinion";

/// Provider name recorded in audit entries when a protocol answered the request.
pub const PROTOCOL_PROVIDER: &str = "protocol-store";

/// Provider name recorded in audit entries for purely rule-based answers.
pub const RULES_PROVIDER: &str = "rules";

/// ICD-10 code used when no differential can be derived.
pub const UNDIFFERENTIATED_CODE: &str = "R69";

/// Environment variable names read once at startup.
pub const ENV_PROVIDER_NAME: &str = "CDS_PROVIDER_NAME";
pub const ENV_PROVIDER_URL: &str = "CDS_PROVIDER_URL";
pub const ENV_PROVIDER_API_KEY: &str = "CDS_PROVIDER_API_KEY";
pub const ENV_BREAKER_FAILURE_THRESHOLD: &str = "CDS_BREAKER_FAILURE_THRESHOLD";
pub const ENV_BREAKER_COOLDOWN_MS: &str = "CDS_BREAKER_COOLDOWN_MS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "CDS_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "CDS_RETRY_MAX_DELAY_MS";
pub const ENV_AUDIT_CAPACITY: &str = "CDS_AUDIT_CAPACITY";

/// Defaults applied when the environment leaves a value unset.
pub const DEFAULT_PROVIDER_NAME: &str = "offline";
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 30_000;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 2_000;
pub const DEFAULT_AUDIT_CAPACITY: usize = 256;
