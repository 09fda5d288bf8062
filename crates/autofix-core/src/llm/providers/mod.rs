//! LLM provider implementations

use std::sync::Arc;

use crate::config::LlmSettings;
use crate::errors::AutofixError;
use crate::llm::LLM;

pub mod openai;

/// Create the provider client described by the configuration.
pub fn create_llm_client(settings: &LlmSettings) -> Result<Arc<dyn LLM>, AutofixError> {
    openai::create_client(settings)
}
