use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cds_core::config::{
    breaker_from_env_values, millis_from_env_value, positive_from_env_value,
    provider_name_from_env_value,
};
use cds_core::constants::{
    DEFAULT_AUDIT_CAPACITY, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS,
    ENV_AUDIT_CAPACITY, ENV_BREAKER_COOLDOWN_MS, ENV_BREAKER_FAILURE_THRESHOLD,
    ENV_PROVIDER_API_KEY, ENV_PROVIDER_NAME, ENV_PROVIDER_URL, ENV_RETRY_BASE_DELAY_MS,
    ENV_RETRY_MAX_DELAY_MS,
};
use cds_core::rules::RuleExpr;
use cds_core::{
    provider_from_config, CoreConfig, DecisionServices, KnowledgeBase, PatientContext, TaskKind,
    TracingAuditSink,
};
use cds_types::ConditionCode;

#[derive(Parser)]
#[command(name = "cds")]
#[command(about = "Clinical decision support runner")]
struct Cli {
    /// Knowledge file (YAML) with protocols, symptom rules, interactions and compliance rules
    #[arg(long, global = true)]
    knowledge: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Treatment recommendations for one or more ICD-10 codes
    Recommend {
        /// Condition codes, e.g. I10 E11.9
        #[arg(required = true)]
        codes: Vec<String>,
        /// Patient context (JSON)
        #[arg(long)]
        patient: Option<PathBuf>,
    },
    /// Differential diagnosis for presenting symptoms
    Assess {
        /// Symptoms, one per argument
        #[arg(required = true)]
        symptoms: Vec<String>,
        /// Patient context (JSON)
        #[arg(long)]
        patient: Option<PathBuf>,
    },
    /// Drug-drug interaction check
    Interactions {
        /// Medication names
        #[arg(required = true)]
        medications: Vec<String>,
    },
    /// Evaluate compliance rules, or a single rule expression, against a patient
    Rules {
        /// Patient context (JSON)
        #[arg(long)]
        patient: Option<PathBuf>,
        /// Rule expression to evaluate instead of the loaded rule set
        #[arg(long)]
        expr: Option<String>,
    },
    /// Print the processing presets for every task
    Presets,
}

/// Entry point for the decision support runner.
///
/// # Environment Variables
/// - `CDS_PROVIDER_NAME`: provider name used for circuit breaking and audit (default: "offline")
/// - `CDS_PROVIDER_URL`: HTTP endpoint of the AI provider; unset means offline
/// - `CDS_PROVIDER_API_KEY`: bearer token sent to the provider
/// - `CDS_BREAKER_FAILURE_THRESHOLD`, `CDS_BREAKER_COOLDOWN_MS`: circuit breaker tuning
/// - `CDS_RETRY_BASE_DELAY_MS`, `CDS_RETRY_MAX_DELAY_MS`: retry backoff bounds
/// - `CDS_AUDIT_CAPACITY`: audit queue size
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cds=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Presets = cli.command {
        let presets: Vec<_> = TaskKind::ALL.iter().map(TaskKind::preset).collect();
        return print_json(&presets);
    }

    let config = Arc::new(config_from_env()?);
    let knowledge = match &cli.knowledge {
        Some(path) => KnowledgeBase::load(path)?,
        None => {
            tracing::warn!("no knowledge file given; only AI and generic fallbacks are available");
            KnowledgeBase::default()
        }
    };
    let provider = provider_from_config(&config)?;
    let services = DecisionServices::new(config, knowledge, provider, Arc::new(TracingAuditSink));

    let result = run(&services, cli.command).await;

    let audit = services.shutdown().await;
    tracing::info!(
        submitted = audit.submitted,
        recorded = audit.recorded,
        dropped = audit.dropped,
        failed = audit.failed,
        "audit drained"
    );
    result
}

async fn run(services: &DecisionServices, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Recommend { codes, patient } => {
            let patient = load_patient(patient.as_deref())?;
            let codes = codes
                .iter()
                .map(|c| ConditionCode::parse(c))
                .collect::<Result<Vec<_>, _>>()?;

            let mut out = serde_json::Map::new();
            for (code, result) in services
                .treatment
                .get_recommendations_for_conditions(&codes, &patient)
                .await
            {
                let entry = match result {
                    Ok(outcome) => serde_json::to_value(outcome)?,
                    Err(e) => {
                        tracing::error!(code = %code, error = %e, "no recommendations available");
                        json!({ "error": e.to_string() })
                    }
                };
                out.insert(code.to_string(), entry);
            }
            print_json(&Value::Object(out))
        }
        Commands::Assess { symptoms, patient } => {
            let patient = load_patient(patient.as_deref())?;
            let outcome = services.diagnosis.assess(&symptoms, &patient).await?;
            print_json(&outcome)
        }
        Commands::Interactions { medications } => {
            let outcome = services.interactions.check(&medications).await?;
            print_json(&outcome)
        }
        Commands::Rules { patient, expr } => {
            let patient = load_patient(patient.as_deref())?;
            match expr {
                Some(source) => {
                    let rule = RuleExpr::parse(&source)?;
                    let matched = rule.evaluate(&patient.to_document());
                    print_json(&json!({ "rule": rule.to_string(), "matched": matched }))
                }
                None => print_json(&services.evaluate_compliance(&patient)),
            }
        }
        Commands::Presets => Ok(()),
    }
}

fn config_from_env() -> anyhow::Result<CoreConfig> {
    let var = |name: &str| std::env::var(name).ok();

    let config = CoreConfig::new(
        provider_name_from_env_value(var(ENV_PROVIDER_NAME))?,
        var(ENV_PROVIDER_URL),
        var(ENV_PROVIDER_API_KEY),
        breaker_from_env_values(
            var(ENV_BREAKER_FAILURE_THRESHOLD),
            var(ENV_BREAKER_COOLDOWN_MS),
        )?,
        millis_from_env_value(
            ENV_RETRY_BASE_DELAY_MS,
            var(ENV_RETRY_BASE_DELAY_MS),
            DEFAULT_RETRY_BASE_DELAY_MS,
        )?,
        millis_from_env_value(
            ENV_RETRY_MAX_DELAY_MS,
            var(ENV_RETRY_MAX_DELAY_MS),
            DEFAULT_RETRY_MAX_DELAY_MS,
        )?,
        positive_from_env_value(
            ENV_AUDIT_CAPACITY,
            var(ENV_AUDIT_CAPACITY),
            DEFAULT_AUDIT_CAPACITY,
        )?,
    )?;
    Ok(config)
}

fn load_patient(path: Option<&Path>) -> anyhow::Result<PatientContext> {
    let Some(path) = path else {
        return Ok(PatientContext::new("anonymous"));
    };
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
