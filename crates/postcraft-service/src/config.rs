//! Service configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use postcraft_core::DEFAULT_STARTING_GRANT;
use postcraft_generation::{OpenAiConfig, RetryPolicy};

use crate::crypto::DEFAULT_TOLERANCE_SECONDS;
use crate::orchestrator::DEFAULT_MAX_OPEN_STREAMS;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/postcraft").
    pub data_dir: String,

    /// HS256 secret used to validate user tokens.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT audience (default: "postcraft").
    pub auth_audience: String,

    /// OpenAI-compatible API base URL.
    pub llm_api_base: String,

    /// LLM API key.
    pub llm_api_key: Option<String>,

    /// Model name.
    pub llm_model: String,

    /// Bound on one whole model interaction, in seconds (default: 45).
    pub llm_timeout_seconds: u64,

    /// Attempts to establish a model stream (default: 3).
    pub llm_max_attempts: u32,

    /// Stripe webhook signing secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Accepted age of a webhook signature, in seconds (default: 300).
    pub webhook_tolerance_seconds: i64,

    /// Credits granted to new accounts (default: 10).
    pub starting_grant: i64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds (not applied to streaming generation).
    pub request_timeout_seconds: u64,

    /// Generation streams allowed to run at once.
    pub max_open_streams: usize,
}

/// LLM secrets file structure.
#[derive(Debug, Deserialize)]
struct LlmSecrets {
    api_key: String,
    #[serde(default)]
    api_base: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    webhook_secret: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let llm = load_llm_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            llm_api_base: llm
                .as_ref()
                .and_then(|s| s.api_base.clone())
                .or_else(|| std::env::var("LLM_API_BASE").ok())
                .unwrap_or(defaults.llm_api_base),
            llm_api_key: llm
                .as_ref()
                .map(|s| s.api_key.clone())
                .or_else(|| std::env::var("LLM_API_KEY").ok()),
            llm_model: llm
                .as_ref()
                .and_then(|s| s.model.clone())
                .or_else(|| std::env::var("LLM_MODEL").ok())
                .unwrap_or(defaults.llm_model),
            llm_timeout_seconds: env_parse("LLM_TIMEOUT_SECONDS")
                .unwrap_or(defaults.llm_timeout_seconds),
            llm_max_attempts: env_parse("LLM_MAX_ATTEMPTS").unwrap_or(defaults.llm_max_attempts),
            stripe_webhook_secret: load_stripe_secret(),
            webhook_tolerance_seconds: env_parse("WEBHOOK_TOLERANCE_SECONDS")
                .unwrap_or(defaults.webhook_tolerance_seconds),
            starting_grant: env_parse("STARTING_GRANT").unwrap_or(defaults.starting_grant),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            max_open_streams: env_parse("MAX_OPEN_STREAMS").unwrap_or(defaults.max_open_streams),
        }
    }

    /// Settings for the model client.
    #[must_use]
    pub fn openai(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_base: self.llm_api_base.clone(),
            api_key: self.llm_api_key.clone().unwrap_or_default(),
            model: self.llm_model.clone(),
            request_timeout: self.llm_timeout(),
            ..OpenAiConfig::default()
        }
    }

    /// Bound on one model interaction.
    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    /// Request timeout for batch generation: the model bound plus the ordinary
    /// request budget for the precheck, persistence and debit around it.
    #[must_use]
    pub fn generation_route_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds + self.request_timeout_seconds)
    }

    /// Retry policy for establishing model streams.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.llm_max_attempts)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Load LLM secrets from file, if one exists.
fn load_llm_secrets() -> Option<LlmSecrets> {
    let secret_paths = [".secrets/llm.json", "../.secrets/llm.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<LlmSecrets>(path) {
            tracing::info!(path = %path, "Loaded LLM secrets from file");
            return Some(secrets);
        }
    }

    tracing::debug!("LLM secrets file not found, using environment variables");
    None
}

/// Load the Stripe webhook secret from file or environment.
fn load_stripe_secret() -> Option<String> {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return Some(secrets.webhook_secret);
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    std::env::var("STRIPE_WEBHOOK_SECRET").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let openai = OpenAiConfig::default();
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/postcraft".into(),
            auth_jwt_secret: None,
            auth_audience: "postcraft".into(),
            llm_api_base: openai.api_base,
            llm_api_key: None,
            llm_model: openai.model,
            llm_timeout_seconds: 45,
            llm_max_attempts: 3,
            stripe_webhook_secret: None,
            webhook_tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
            starting_grant: DEFAULT_STARTING_GRANT,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            max_open_streams: DEFAULT_MAX_OPEN_STREAMS,
        }
    }
}
