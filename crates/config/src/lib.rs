//! Configuration loading, validation, and management for servechat.
//!
//! Loads configuration from `~/.servechat/config.toml` (or an explicit
//! path) with environment variable overrides. Validates all settings at
//! startup.

use serde::{Deserialize, Serialize};
use servechat_core::ModelConfig;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.servechat/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model serving endpoint
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Tool loop limits and prompt
    #[serde(default)]
    pub agent: AgentConfig,

    /// Trace and feedback sinks
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// HTTP API
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Offline catalog fixture served by the catalog tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog: Vec<CatalogConfig>,
}

/// Where the model lives and how to call it.
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Full OpenAI-compatible base URL; takes precedence over `host`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Workspace host; the base URL becomes `https://{host}/serving-endpoints`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Deadline for a single model call
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_model_name() -> String {
    ModelConfig::default().model_name
}
fn default_max_tokens() -> u32 {
    ModelConfig::default().max_tokens
}
fn default_temperature() -> f32 {
    ModelConfig::default().temperature
}
fn default_timeout_seconds() -> u64 {
    ModelConfig::default().timeout_seconds
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("base_url", &self.base_url)
            .field("host", &self.host)
            .field("token", &redact(&self.token))
            .field("model_name", &self.model_name)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            host: None,
            token: None,
            model_name: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl EndpointConfig {
    /// The per-call settings bundle handed to the model client.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model_name: self.model_name.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout_seconds: self.timeout_seconds,
        }
    }

    /// The effective base URL, if either `base_url` or `host` is set.
    pub fn resolved_base_url(&self) -> Option<String> {
        if let Some(url) = &self.base_url {
            return Some(url.trim_end_matches('/').to_string());
        }
        self.host.as_deref().map(serving_endpoints_url)
    }
}

/// Turn a workspace host (with or without scheme) into its serving-endpoints base URL.
pub fn serving_endpoints_url(host: &str) -> String {
    let host = host
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("https://{host}/serving-endpoints")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seeded as the first turn when a conversation has no system prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Model round trips allowed per loop invocation
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Consecutive rounds with an unknown tool name before giving up
    #[serde(default = "default_max_unknown_tool_streak")]
    pub max_unknown_tool_streak: usize,

    /// Retries after a transport failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Default deadline for a tool executor
    #[serde(default = "default_tool_timeout_seconds")]
    pub tool_timeout_seconds: u64,
}

fn default_system_prompt() -> String {
    "You are a helpful data assistant that can explore the catalog.\n\n\
     You have access to tools that let you:\n\
     - List all catalogs in the workspace\n\
     - List schemas within a specific catalog\n\
     - List tables within a specific schema\n\
     - List volumes within a specific schema\n\n\
     Use these tools to help users understand their data structure and find the \
     information they need. When listing items, present them in a clear, organized format."
        .into()
}
fn default_max_iterations() -> usize {
    10
}
fn default_max_unknown_tool_streak() -> usize {
    3
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_tool_timeout_seconds() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_iterations: default_max_iterations(),
            max_unknown_tool_streak: default_max_unknown_tool_streak(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            tool_timeout_seconds: default_tool_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether rounds are recorded at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON-lines trace file; defaults to `~/.servechat/traces.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_file: Option<PathBuf>,

    /// Experiment label attached to every trace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,

    /// Workspace URL used to build the experiment link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_url: Option<String>,

    /// Traces kept in memory for the HTTP API
    #[serde(default = "default_max_traces")]
    pub max_traces: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_traces() -> usize {
    1000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trace_file: None,
            experiment_id: None,
            tracking_url: None,
            max_traces: default_max_traces(),
        }
    }
}

impl TelemetryConfig {
    /// The JSON-lines trace file path, falling back to the config directory.
    pub fn trace_path(&self) -> PathBuf {
        self.trace_file
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("traces.jsonl"))
    }

    /// Link to the experiment's trace view, when both pieces are known.
    pub fn experiment_link(&self) -> Option<String> {
        let id = self.experiment_id.as_deref()?;
        let base = self.tracking_url.as_deref()?.trim_end_matches('/');
        Some(format!("{base}/ml/experiments/{id}/traces"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Request body cap in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Reported by the health endpoint
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}
fn default_environment() -> String {
    "development".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
            environment: default_environment(),
        }
    }
}

/// One catalog in the offline fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub name: String,

    #[serde(default)]
    pub schemas: Vec<SchemaConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub name: String,

    #[serde(default)]
    pub tables: Vec<TableConfig>,

    #[serde(default)]
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,

    /// "TABLE", "VIEW", "MANAGED", ...
    #[serde(default = "default_table_type")]
    pub table_type: String,
}

fn default_table_type() -> String {
    "TABLE".into()
}

impl AppConfig {
    /// Load configuration from the default path (~/.servechat/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from an explicit path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Recognised variables (first match wins within each group):
    /// - `SERVECHAT_API_KEY`, `DATABRICKS_TOKEN`
    /// - `SERVECHAT_BASE_URL` (full URL), `DATABRICKS_HOST` (workspace host)
    /// - `SERVECHAT_MODEL`
    /// - `MLFLOW_EXPERIMENT_ID`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("SERVECHAT_API_KEY").or_else(|| get("DATABRICKS_TOKEN")) {
            self.endpoint.token = Some(token);
        }

        if let Some(url) = get("SERVECHAT_BASE_URL") {
            self.endpoint.base_url = Some(url);
        } else if let Some(host) = get("DATABRICKS_HOST") {
            self.telemetry
                .tracking_url
                .get_or_insert_with(|| format!("https://{}", host_only(&host)));
            self.endpoint.host = Some(host);
        }

        if let Some(model) = get("SERVECHAT_MODEL") {
            self.endpoint.model_name = model;
        }

        if let Some(experiment) = get("MLFLOW_EXPERIMENT_ID") {
            self.telemetry.experiment_id = Some(experiment);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".servechat")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.endpoint.temperature) {
            return Err(ConfigError::ValidationError(
                "endpoint.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.endpoint.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "endpoint.max_tokens must be > 0".into(),
            ));
        }
        if self.endpoint.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "endpoint.timeout_seconds must be > 0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be >= 1".into(),
            ));
        }
        if self.agent.tool_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.tool_timeout_seconds must be > 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for catalog in &self.catalog {
            if !seen.insert(catalog.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate catalog '{}'",
                    catalog.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an endpoint token is available.
    pub fn has_token(&self) -> bool {
        self.endpoint.token.is_some()
    }

    /// Render the configuration as TOML with secrets masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.endpoint.token.is_some() {
            shown.endpoint.token = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}

fn host_only(host: &str) -> &str {
    host.trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to render configuration: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint.model_name, "databricks-claude-sonnet-4");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.max_unknown_tool_streak, 3);
        assert_eq!(config.agent.max_retries, 2);
        assert_eq!(config.gateway.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.endpoint.model_name, config.endpoint.model_name);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.endpoint.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.endpoint.max_tokens, 1000);
    }

    #[test]
    fn load_from_file_with_catalog_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[endpoint]
host = "adb-123.azuredatabricks.net"
model_name = "my-endpoint"

[agent]
max_iterations = 4

[[catalog]]
name = "main"

[[catalog.schemas]]
name = "sales"
volumes = ["raw"]

[[catalog.schemas.tables]]
name = "orders"

[[catalog.schemas.tables]]
name = "orders_v"
table_type = "VIEW"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.endpoint.model_name, "my-endpoint");
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.max_retries, 2);
        let schema = &config.catalog[0].schemas[0];
        assert_eq!(schema.tables[0].table_type, "TABLE");
        assert_eq!(schema.tables[1].table_type, "VIEW");
        assert_eq!(schema.volumes, vec!["raw"]);
        assert_eq!(
            config.endpoint.resolved_base_url().as_deref(),
            Some("https://adb-123.azuredatabricks.net/serving-endpoints")
        );
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[endpoint\nmodel_name = 3").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn duplicate_catalogs_rejected() {
        let mut config = AppConfig::default();
        let main = CatalogConfig {
            name: "main".into(),
            schemas: vec![],
        };
        config.catalog = vec![main.clone(), main];
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("DATABRICKS_TOKEN", "dapi-secret"),
            ("DATABRICKS_HOST", "https://adb-1.cloud.databricks.com/"),
            ("SERVECHAT_MODEL", "other-endpoint"),
            ("MLFLOW_EXPERIMENT_ID", "42"),
        ]));
        assert_eq!(config.endpoint.token.as_deref(), Some("dapi-secret"));
        assert_eq!(config.endpoint.model_name, "other-endpoint");
        assert_eq!(
            config.endpoint.resolved_base_url().as_deref(),
            Some("https://adb-1.cloud.databricks.com/serving-endpoints")
        );
        assert_eq!(
            config.telemetry.experiment_link().as_deref(),
            Some("https://adb-1.cloud.databricks.com/ml/experiments/42/traces")
        );
    }

    #[test]
    fn servechat_vars_take_priority() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("SERVECHAT_API_KEY", "primary"),
            ("DATABRICKS_TOKEN", "secondary"),
            ("SERVECHAT_BASE_URL", "http://localhost:9999/v1/"),
            ("DATABRICKS_HOST", "ignored.example.com"),
        ]));
        assert_eq!(config.endpoint.token.as_deref(), Some("primary"));
        assert_eq!(
            config.endpoint.resolved_base_url().as_deref(),
            Some("http://localhost:9999/v1")
        );
        assert!(config.endpoint.host.is_none());
    }

    #[test]
    fn debug_and_toml_output_redact_token() {
        let mut config = AppConfig::default();
        config.endpoint.token = Some("dapi-supersecret".into());

        let debug = format!("{config:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("[REDACTED]"));

        let rendered = config.to_redacted_toml().unwrap();
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn serving_endpoints_url_normalises_scheme() {
        assert_eq!(
            serving_endpoints_url("https://host.example.com"),
            "https://host.example.com/serving-endpoints"
        );
        assert_eq!(
            serving_endpoints_url("host.example.com"),
            "https://host.example.com/serving-endpoints"
        );
    }

    #[test]
    fn default_config_renders_every_section() {
        let toml_str = AppConfig::default().to_redacted_toml().unwrap();
        assert!(toml_str.contains("databricks-claude-sonnet-4"));
        assert!(toml_str.contains("max_iterations"));
    }
}
