//! Language model provider abstraction.
//!
//! The diagnosis client only needs "send these messages, get text back", so
//! the trait is deliberately small. The OpenAI-compatible implementation
//! lives in [`providers::openai`]; tests substitute their own.

pub use crate::core_types::{GenerationParams, LLMResponse, Message};
use crate::errors::AutofixError;
use async_trait::async_trait;

pub mod providers;

pub use providers::openai::OpenAIClient;

#[async_trait]
pub trait LLM: Send + Sync {
    async fn generate(
        &self,
        messages: Vec<Message>,
        params: GenerationParams,
    ) -> Result<LLMResponse, AutofixError>;
}
