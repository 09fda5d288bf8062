use crate::config::LlmSettings;
use crate::core_types::{GenerationParams, LLMResponse, Message, Usage};
use crate::errors::AutofixError;
use crate::llm::LLM;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use serde_json::{json, Value};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    request_timeout: Duration,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: build_http_client(DEFAULT_REQUEST_TIMEOUT),
            api_key,
            api_base: "https://api.openai.com/v1".to_string(),
            model,
            temperature: None,
            max_tokens: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Bound every request, connect included. Without this a stalled
    /// provider would hold the caller forever.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self.client = build_http_client(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request_body(&self, messages: &[Message], params: GenerationParams) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if let Some(temp) = params.temperature.or(self.temperature) {
            body["temperature"] = temp.into();
        }

        if let Some(max_tokens) = params.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = max_tokens.into();
        }

        body
    }

    fn map_transport_error(&self, e: reqwest::Error) -> AutofixError {
        if e.is_timeout() {
            AutofixError::LLMTimeout(self.request_timeout.as_secs())
        } else {
            AutofixError::LLMError(format!("HTTP request failed: {}", e))
        }
    }
}

fn build_http_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        log::warn!("Falling back to default HTTP client: {}", e);
        Client::new()
    })
}

#[async_trait]
impl LLM for OpenAIClient {
    async fn generate(
        &self,
        messages: Vec<Message>,
        params: GenerationParams,
    ) -> Result<LLMResponse, AutofixError> {
        if self.api_key.trim().is_empty() {
            return Err(AutofixError::MissingCredential(
                "OpenAI API key not set.".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request_body(&messages, params);

        log::debug!("OpenAI API request to {} ({} messages)", url, messages.len());

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        log::debug!("OpenAI API response ({}): {} bytes", status, response_text.len());

        if !status.is_success() {
            return Err(AutofixError::LLMError(format!(
                "API request failed with status {}: {}",
                status,
                extract_error_message(&response_text)
            )));
        }

        let response_json: Value = serde_json::from_str(&response_text)
            .map_err(|e| AutofixError::ParsingError(format!("Invalid JSON response: {}", e)))?;

        parse_response(response_json)
    }
}

/// Prefer the provider's `error.message` over the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn parse_response(response: Value) -> Result<LLMResponse, AutofixError> {
    let choices = response["choices"]
        .as_array()
        .ok_or_else(|| AutofixError::ParsingError("No choices in response".to_string()))?;

    let choice = choices
        .first()
        .ok_or_else(|| AutofixError::ParsingError("Empty choices array".to_string()))?;

    // Chat completions put the text under `message`, legacy completions
    // under `text`.
    let content = choice["message"]["content"]
        .as_str()
        .or_else(|| choice["text"].as_str())
        .map(|s| s.to_string());

    if content.is_none() {
        return Err(AutofixError::ParsingError(
            "Response has no message content".to_string(),
        ));
    }

    let finish_reason = choice["finish_reason"].as_str().map(|s| s.to_string());
    let usage = serde_json::from_value::<Usage>(response["usage"].clone()).ok();

    Ok(LLMResponse {
        content,
        finish_reason,
        usage,
    })
}

/// Create an OpenAI LLM client from configuration
pub fn create_client(settings: &LlmSettings) -> Result<std::sync::Arc<dyn LLM>, AutofixError> {
    let api_key = settings.credential().ok_or_else(|| {
        AutofixError::MissingCredential("No API key found for OpenAI. Set OPENAI_API_KEY".to_string())
    })?;

    let client = OpenAIClient::new(api_key.to_string(), settings.model.clone())
        .with_api_base(settings.api_base.clone())
        .with_temperature(settings.temperature)
        .with_max_tokens(settings.max_tokens)
        .with_request_timeout(settings.request_timeout());

    Ok(std::sync::Arc::new(client))
}
