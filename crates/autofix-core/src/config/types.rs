//! Configuration type definitions for the service.
//!
//! Every section has defaults matching the documented environment surface, so
//! the only value an operator must provide is the provider credential.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::AutofixError;

/// Placeholder some deployments ship in their `.env` templates. Treated the
/// same as an unset key.
pub const PLACEHOLDER_API_KEY: &str = "YOUR_OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub websocket: WebSocketSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default = "default_execution_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_true")]
    pub safe_mode: bool,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketSettings {
    #[serde(default = "default_ws_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_ws_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Snippets held per connection while a suggestion is in flight.
    #[serde(default = "default_ws_max_pending")]
    pub max_pending: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// `["*"]` means any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Requests per minute across all clients. Zero disables the limiter.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_execution_timeout() -> u64 {
    5
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.2
}

fn default_request_timeout() -> u64 {
    30
}

fn default_ws_max_connections() -> usize {
    50
}

fn default_ws_idle_timeout() -> u64 {
    30
}

fn default_ws_max_pending() -> usize {
    8
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_rate_limit() -> u32 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_execution_timeout(),
            interpreter: default_interpreter(),
            safe_mode: true,
            work_dir: None,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            max_connections: default_ws_max_connections(),
            idle_timeout_secs: default_ws_idle_timeout(),
            max_pending: default_ws_max_pending(),
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            rate_limit_requests: default_rate_limit(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ExecutionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LlmSettings {
    /// The credential, if one is set and is not the template placeholder.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != PLACEHOLDER_API_KEY)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl WebSocketSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl SecuritySettings {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl AppConfig {
    /// Checks everything the service needs before it starts accepting
    /// submissions. A missing credential is fatal here rather than per request.
    pub fn validate(&self) -> Result<(), AutofixError> {
        if self.llm.credential().is_none() {
            return Err(AutofixError::MissingCredential(
                "OPENAI_API_KEY is missing! Set it in your .env file or system environment."
                    .to_string(),
            ));
        }

        if self.execution.timeout_secs == 0 {
            return Err(AutofixError::ConfigError(
                "EXECUTION_TIMEOUT must be at least 1 second".to_string(),
            ));
        }

        if self.execution.interpreter.trim().is_empty() {
            return Err(AutofixError::ConfigError(
                "PYTHON_INTERPRETER must not be empty".to_string(),
            ));
        }

        if self.llm.model.trim().is_empty() {
            return Err(AutofixError::ConfigError("AI_MODEL must not be empty".to_string()));
        }

        if self.llm.max_tokens == 0 {
            return Err(AutofixError::ConfigError(
                "AI_MAX_TOKENS must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AutofixError::ConfigError(format!(
                "AI_TEMPERATURE must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(AutofixError::ConfigError(
                "AI_REQUEST_TIMEOUT must be at least 1 second".to_string(),
            ));
        }

        if self.websocket.max_connections == 0 {
            return Err(AutofixError::ConfigError(
                "WS_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        if self.websocket.idle_timeout_secs == 0 {
            return Err(AutofixError::ConfigError(
                "WS_TIMEOUT must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }
}
