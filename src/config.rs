//! Configuration system for the document triage service
//!
//! Every field has a default, so an empty TOML file (or no file at all)
//! yields a working local setup: in-memory trace store, receivers on
//! `localhost:8001`, and the model tier enabled when its API key is present.

use crate::action::Action;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Base URL of the default action receivers
pub const DEFAULT_RECEIVER_BASE_URL: &str = "http://localhost:8001";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub trace_store: TraceStoreSection,
    #[serde(default)]
    pub actions: ActionsSection,
    #[serde(default)]
    pub pdf: PdfSection,
}

/// HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted upload in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Serve the simulated downstream receivers alongside the pipeline
    #[serde(default = "default_true")]
    pub simulate_receivers: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            simulate_receivers: true,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_max_upload_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

/// Language-model intent classification tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Disable to classify with schema and keyword rules only
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Provider name; only "openai" (and compatible endpoints) is supported
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Upper bound for one classification call, retries included
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            model: default_model(),
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: 0.0,
            max_tokens: default_llm_max_tokens(),
        }
    }
}

impl LlmSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    10
}

fn default_llm_max_tokens() -> u32 {
    10
}

/// Which backend holds the decision traces
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceBackendKind {
    #[default]
    Memory,
    Redis,
}

/// Decision trace store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceStoreSection {
    #[serde(default)]
    pub backend: TraceBackendKind,
    /// Required when backend = "redis", e.g. "redis://redis:6379/0"
    pub redis_url: Option<String>,
    /// Per-operation timeout for the backing store
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TraceStoreSection {
    fn default() -> Self {
        Self {
            backend: TraceBackendKind::Memory,
            redis_url: None,
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl TraceStoreSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_timeout_ms() -> u64 {
    3000
}

/// Action delivery settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionsSection {
    /// Total delivery attempts per action, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before attempt n+1 is base_delay * 2^(n-1)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Per-request timeout
    #[serde(default = "default_action_timeout_secs")]
    pub timeout_secs: u64,
    /// Action name to receiver URL. A configured table replaces the defaults.
    #[serde(default = "default_endpoints")]
    pub endpoints: BTreeMap<String, String>,
}

impl Default for ActionsSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_action_timeout_secs(),
            endpoints: default_endpoints(),
        }
    }
}

impl ActionsSection {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_action_timeout_secs() -> u64 {
    5
}

/// The five receivers every deployment starts with
pub fn default_endpoints() -> BTreeMap<String, String> {
    endpoints_for_base_url(DEFAULT_RECEIVER_BASE_URL)
}

/// Default receiver paths mounted under `base_url`
pub fn endpoints_for_base_url(base_url: &str) -> BTreeMap<String, String> {
    let base = base_url.trim_end_matches('/');
    [
        (Action::Escalate, "/crm/escalate"),
        (Action::Routine, "/crm/log"),
        (Action::Alert, "/risk_alert"),
        (Action::Flagged, "/compliance/flag"),
        (Action::Accepted, "/compliance/accept"),
    ]
    .into_iter()
    .map(|(action, path)| (action.as_str().to_string(), format!("{base}{path}")))
    .collect()
}

/// PDF analysis settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PdfSection {
    /// Invoice totals above this value are flagged
    #[serde(default = "default_invoice_total_threshold")]
    pub invoice_total_threshold: f64,
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,
    /// Parser threads allowed at once, timed-out ones included
    #[serde(default = "default_max_concurrent_extractions")]
    pub max_concurrent_extractions: usize,
}

impl Default for PdfSection {
    fn default() -> Self {
        Self {
            invoice_total_threshold: default_invoice_total_threshold(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
            max_concurrent_extractions: default_max_concurrent_extractions(),
        }
    }
}

impl PdfSection {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

fn default_invoice_total_threshold() -> f64 {
    10_000.0
}

fn default_extraction_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_extractions() -> usize {
    4
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.actions.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "actions.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.pdf.max_concurrent_extractions == 0 {
            return Err(ConfigError::InvalidConfig(
                "pdf.max_concurrent_extractions must be at least 1".to_string(),
            ));
        }

        for (name, endpoint) in &self.actions.endpoints {
            if Action::from_name(name).is_none() {
                return Err(ConfigError::InvalidConfig(format!(
                    "actions.endpoints has unknown action '{name}'"
                )));
            }
            validate_endpoint_url(name, endpoint)?;
        }

        if !self.actions.endpoints.contains_key(Action::Routine.as_str()) {
            return Err(ConfigError::InvalidConfig(
                "actions.endpoints must map the 'routine' fallback action".to_string(),
            ));
        }

        if self.trace_store.backend == TraceBackendKind::Redis
            && self
                .trace_store
                .redis_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::InvalidConfig(
                "trace_store.backend = \"redis\" requires trace_store.redis_url".to_string(),
            ));
        }

        if self.llm.enabled && self.llm.provider != "openai" {
            return Err(ConfigError::InvalidConfig(format!(
                "Unsupported LLM provider: {}",
                self.llm.provider
            )));
        }

        if self.pdf.invoice_total_threshold < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "pdf.invoice_total_threshold must not be negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the LLM API key from its environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::EnvVarNotFound(self.llm.api_key_env.clone()))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[llm]
enabled = false

[actions]
max_attempts = 2
base_delay_ms = 10
timeout_secs = 1
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn validate_endpoint_url(action: &str, endpoint: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(endpoint).map_err(|e| {
        ConfigError::InvalidConfig(format!(
            "Endpoint for action '{action}' is not a valid URL ({endpoint}): {e}"
        ))
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::InvalidConfig(format!(
            "Endpoint for action '{action}' must use http or https, got {scheme}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.actions.max_attempts, 3);
        assert_eq!(config.actions.base_delay(), Duration::from_secs(1));
        assert_eq!(config.trace_store.backend, TraceBackendKind::Memory);
        assert_eq!(config.pdf.invoice_total_threshold, 10_000.0);
    }

    #[test]
    fn test_default_endpoints_cover_five_actions() {
        let endpoints = default_endpoints();
        assert_eq!(endpoints.len(), 5);
        assert_eq!(endpoints["escalate"], "http://localhost:8001/crm/escalate");
        assert_eq!(endpoints["routine"], "http://localhost:8001/crm/log");
        assert_eq!(endpoints["alert"], "http://localhost:8001/risk_alert");
        assert_eq!(endpoints["flagged"], "http://localhost:8001/compliance/flag");
        assert_eq!(endpoints["accepted"], "http://localhost:8001/compliance/accept");
        assert!(!endpoints.contains_key("accept"));
    }

    #[test]
    fn test_endpoints_for_base_url_trims_trailing_slash() {
        let endpoints = endpoints_for_base_url("http://crm.internal:9000/");
        assert_eq!(endpoints["routine"], "http://crm.internal:9000/crm/log");
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 9090
simulate_receivers = false

[llm]
model = "gpt-4o"
api_key_env = "TRIAGE_LLM_KEY"
timeout_secs = 4

[trace_store]
backend = "redis"
redis_url = "redis://redis:6379/0"

[actions]
max_attempts = 5
base_delay_ms = 250

[actions.endpoints]
routine = "http://crm:8000/log"
accept = "http://crm:8000/accept"

[pdf]
invoice_total_threshold = 5000.0
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert!(!config.server.simulate_receivers);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.timeout(), Duration::from_secs(4));
        assert_eq!(config.trace_store.backend, TraceBackendKind::Redis);
        assert_eq!(config.actions.max_attempts, 5);
        assert_eq!(config.actions.endpoints.len(), 2);
        assert_eq!(config.pdf.invoice_total_threshold, 5000.0);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = AppConfig::from_toml_str("[actions]\nmax_attempts = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_action_endpoint_rejected() {
        let toml_content = r#"
[actions.endpoints]
routine = "http://localhost:8001/crm/log"
teleport = "http://localhost:8001/teleport"
"#;
        let result = AppConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("teleport")));
    }

    #[test]
    fn test_invalid_endpoint_url_rejected() {
        let toml_content = r#"
[actions.endpoints]
routine = "not a url"
"#;
        assert!(AppConfig::from_toml_str(toml_content).is_err());

        let toml_content = r#"
[actions.endpoints]
routine = "ftp://files.example.com/log"
"#;
        assert!(AppConfig::from_toml_str(toml_content).is_err());
    }

    #[test]
    fn test_missing_routine_fallback_rejected() {
        let toml_content = r#"
[actions.endpoints]
escalate = "http://localhost:8001/crm/escalate"
"#;
        let result = AppConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("routine")));
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let result = AppConfig::from_toml_str("[trace_store]\nbackend = \"redis\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_unsupported_provider_rejected_only_when_enabled() {
        assert!(AppConfig::from_toml_str("[llm]\nprovider = \"gemini\"\n").is_err());
        assert!(AppConfig::from_toml_str("[llm]\nenabled = false\nprovider = \"gemini\"\n").is_ok());
    }

    #[test]
    fn test_missing_api_key_is_reported() {
        let mut config = AppConfig::test_config();
        config.llm.api_key_env = "DOC_TRIAGE_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(matches!(
            config.get_llm_api_key(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "DOC_TRIAGE_TEST_KEY_THAT_IS_NEVER_SET"
        ));
    }

    #[test]
    fn test_test_config_is_valid() {
        let config = AppConfig::test_config();
        assert!(config.validate().is_ok());
        assert!(!config.llm.enabled);
        assert_eq!(config.actions.max_attempts, 2);
    }
}
