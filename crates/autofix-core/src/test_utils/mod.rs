pub mod mock_llm_server;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core_types::{GenerationParams, LLMResponse, Message};
use crate::errors::AutofixError;
use crate::llm::LLM;

/// In-process LLM that replays queued replies and records every call.
pub struct ScriptedLLM {
    replies: Mutex<VecDeque<Result<String, AutofixError>>>,
    calls: Mutex<Vec<(Vec<Message>, GenerationParams)>>,
}

impl ScriptedLLM {
    pub fn new(replies: Vec<Result<String, AutofixError>>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from(replies)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<Message>, GenerationParams)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLM for ScriptedLLM {
    async fn generate(
        &self,
        messages: Vec<Message>,
        params: GenerationParams,
    ) -> Result<LLMResponse, AutofixError> {
        self.calls.lock().unwrap().push((messages, params));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AutofixError::LLMError("no scripted reply left".to_string())))?;
        Ok(LLMResponse {
            content: Some(reply),
            finish_reason: Some("stop".to_string()),
            usage: None,
        })
    }
}
