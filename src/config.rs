use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default)]
    pub listener: ListenerConfig,
    pub targets: Vec<TargetConfig>,
}

/// Where the callback listener binds, and optionally the public base URL
/// advertised to providers (e.g. a tunnel in front of the listener).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listener_host")]
    pub host: String,
    #[serde(default = "default_listener_port")]
    pub port: u16,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub endpoint: String,
    pub api_key: String,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_param_name")]
    pub param_name: String,
    #[serde(default = "default_response_path")]
    pub response_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub mode: TargetMode,
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub webhook: WebhookParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookParams {
    #[serde(default = "default_callback_param")]
    pub callback_param: String,
    #[serde(default)]
    pub callback_wrapper_param: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
    /// Dotted path to the verdict inside the callback payload. Falls back to
    /// the target's `response_path` when unset.
    #[serde(default)]
    pub result_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    #[default]
    Sync,
    Webhook,
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMode::Sync => write!(f, "sync"),
            TargetMode::Webhook => write!(f, "webhook"),
        }
    }
}

/// One comparison against a field of the API response. A target is
/// considered to accept an email only when every rule in its list passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    pub operator: RuleOperator,
    pub value: serde_json::Value,
}

/// The comparison operators a rule may use. Deserialization fails on any
/// other operator string, so a bad operator never reaches evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "in")]
    In,
}

fn default_rps() -> u32 {
    16
}

fn default_listener_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listener_port() -> u16 {
    8765
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_param_name() -> String {
    "email".to_string()
}

fn default_response_path() -> String {
    "data".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_callback_param() -> String {
    "callback_url".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    120
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            host: default_listener_host(),
            port: default_listener_port(),
            base_url: None,
        }
    }
}

impl Default for WebhookParams {
    fn default() -> Self {
        WebhookParams {
            callback_param: default_callback_param(),
            callback_wrapper_param: None,
            timeout_secs: default_webhook_timeout_secs(),
            result_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            requests_per_second: default_rps(),
            listener: ListenerConfig::default(),
            targets: vec![TargetConfig::default()],
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            name: "example-validator".to_string(),
            endpoint: "https://api.example.com/v1/validate".to_string(),
            api_key: "REPLACE_ME".to_string(),
            api_key_header: default_api_key_header(),
            method: HttpMethod::Get,
            headers: HashMap::new(),
            param_name: default_param_name(),
            response_path: default_response_path(),
            timeout_secs: default_timeout_secs(),
            mode: TargetMode::Sync,
            validation_rules: vec![ValidationRule {
                field: "reason".to_string(),
                operator: RuleOperator::Equal,
                value: serde_json::Value::String("valid_email".to_string()),
            }],
            webhook: WebhookParams::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file: {path}"))?;
        Ok(())
    }

    /// Run-level sanity checks. Per-target problems are reported by
    /// `TargetConfig::validate` so one broken target does not take down
    /// the whole run.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.requests_per_second == 0 {
            anyhow::bail!("requests_per_second must be at least 1");
        }
        if self.targets.is_empty() {
            anyhow::bail!("no targets configured");
        }
        Ok(())
    }
}

impl TargetConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("target name must not be empty");
        }
        if self.endpoint.trim().is_empty() {
            anyhow::bail!("target '{}' has an empty endpoint", self.name);
        }
        Url::parse(&self.endpoint)
            .with_context(|| format!("target '{}' endpoint is not a valid URL", self.name))?;
        if self.api_key.trim().is_empty() {
            anyhow::bail!("target '{}' has an empty api_key", self.name);
        }
        Ok(())
    }

    /// Path used to evaluate a webhook-delivered payload.
    pub fn result_path(&self) -> &str {
        self.webhook
            .result_path
            .as_deref()
            .unwrap_or(&self.response_path)
    }
}
