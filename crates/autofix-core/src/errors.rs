//! Error types shared by the provider layer, the diagnosis client and configuration.
//!
//! Execution and diagnosis failures are normally reported as data
//! (`ExecutionResult`, `DiagnosisResult`); these variants describe what went
//! wrong underneath and are what the provider layer and the config loader
//! return through `Result`.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AutofixError {
    #[error("LLM interaction failed: {0}")]
    LLMError(String),
    #[error("LLM request timed out after {0} seconds")]
    LLMTimeout(u64),
    #[error("Missing credential: {0}")]
    MissingCredential(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
}

impl From<reqwest::Error> for AutofixError {
    fn from(err: reqwest::Error) -> Self {
        AutofixError::LLMError(err.to_string())
    }
}
