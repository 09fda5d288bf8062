//! Builds an [`AppConfig`] from environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::types::*;
use crate::errors::AutofixError;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<AppConfig, AutofixError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load and validate configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<AppConfig, AutofixError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::read_lookup(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Same as [`ConfigLoader::from_lookup`] without the final validation.
    pub fn read_lookup<F>(lookup: &F) -> Result<AppConfig, AutofixError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        // Server
        if let Some(host) = non_empty(lookup, "HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_var(lookup, "PORT")? {
            config.server.port = port;
        }

        // Execution
        if let Some(timeout) = parse_var(lookup, "EXECUTION_TIMEOUT")? {
            config.execution.timeout_secs = timeout;
        }
        if let Some(interpreter) = non_empty(lookup, "PYTHON_INTERPRETER") {
            config.execution.interpreter = interpreter;
        }
        if let Some(safe_mode) = parse_bool(lookup, "SAFE_MODE")? {
            config.execution.safe_mode = safe_mode;
        }
        if let Some(work_dir) = non_empty(lookup, "EXECUTION_WORK_DIR") {
            config.execution.work_dir = Some(PathBuf::from(work_dir));
        }

        // LLM
        config.llm.api_key = lookup("OPENAI_API_KEY").map(|key| key.trim().to_string());
        if let Some(api_base) = non_empty(lookup, "OPENAI_API_BASE") {
            config.llm.api_base = api_base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty(lookup, "AI_MODEL") {
            config.llm.model = model;
        }
        if let Some(max_tokens) = parse_var(lookup, "AI_MAX_TOKENS")? {
            config.llm.max_tokens = max_tokens;
        }
        if let Some(temperature) = parse_var(lookup, "AI_TEMPERATURE")? {
            config.llm.temperature = temperature;
        }
        if let Some(timeout) = parse_var(lookup, "AI_REQUEST_TIMEOUT")? {
            config.llm.request_timeout_secs = timeout;
        }

        // WebSocket
        if let Some(max_connections) = parse_var(lookup, "WS_MAX_CONNECTIONS")? {
            config.websocket.max_connections = max_connections;
        }
        if let Some(idle) = parse_var(lookup, "WS_TIMEOUT")? {
            config.websocket.idle_timeout_secs = idle;
        }
        if let Some(max_pending) = parse_var(lookup, "WS_MAX_PENDING")? {
            config.websocket.max_pending = max_pending;
        }

        // Security
        if let Some(origins) = non_empty(lookup, "ALLOWED_ORIGINS") {
            config.security.allowed_origins = origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }
        if let Some(limit) = parse_var(lookup, "RATE_LIMIT_REQUESTS")? {
            config.security.rate_limit_requests = limit;
        }

        // Logging
        if let Some(level) = non_empty(lookup, "LOG_LEVEL") {
            config.logging.level = level.to_lowercase();
        }
        if let Some(file) = non_empty(lookup, "LOG_FILE") {
            config.logging.file = Some(PathBuf::from(file));
        }

        Ok(config)
    }

    /// Load variables from a `.env` file into the process environment.
    ///
    /// Variables that are already set win over the file. Returns the number
    /// of variables applied.
    pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<usize, AutofixError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AutofixError::ConfigError(format!(
                "Failed to read env file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut applied = 0;
        for (key, value) in parse_env_content(&content) {
            if env::var_os(&key).is_none() {
                env::set_var(&key, value);
                applied += 1;
            }
        }

        Ok(applied)
    }
}

/// Parses `KEY=value` lines, skipping blanks and `#` comments. An optional
/// `export ` prefix and matching quotes around the value are stripped.
pub fn parse_env_content(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = strip_matching_quotes(value);
            pairs.push((key.to_string(), value.to_string()));
        }
    }

    pairs
}

fn strip_matching_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, AutofixError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            AutofixError::ConfigError(format!("Invalid value '{}' for {}: {}", raw, key, e))
        }),
        None => Ok(None),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, AutofixError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(AutofixError::ConfigError(format!(
                "Invalid value '{}' for {}: expected true or false",
                raw, key
            ))),
        },
        None => Ok(None),
    }
}
