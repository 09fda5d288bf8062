//! Diagnosis client.
//!
//! Wraps an [`LLM`] with the fixed prompt templates used to explain failing
//! code. Every provider problem is folded into a [`DiagnosisResult`] so that
//! callers can report it next to the execution failure that triggered it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;
use crate::core_types::{GenerationParams, Message};
use crate::errors::AutofixError;
use crate::llm::LLM;

const SYSTEM_PROMPT: &str = "You are a Python expert.";

/// Returned in place of an empty completion.
pub const EMPTY_RESPONSE_TEXT: &str = "No response from AI.";

/// Which template a diagnosis request is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Explicit review of code the user asked about.
    Analysis,
    /// Escalation after a failed execution, with the captured error text.
    Failure,
    /// Short suggestions for the live editing channel.
    Suggestion,
}

impl PromptKind {
    fn render(self, source: &str, context: Option<&str>) -> String {
        match self {
            PromptKind::Analysis => format!(
                "You are a Python expert. The user has submitted the following code:\n\n\
                 {source}\n\n\
                 Please do the following:\n\
                 1. Identify any bugs or issues in the code.\n\
                 2. Provide a brief explanation of the problem.\n\
                 3. Offer a corrected version of the code if applicable."
            ),
            PromptKind::Failure => {
                let error = context.unwrap_or("(no error output captured)");
                format!(
                    "You are an expert Python debugger. The following code failed when it was run.\n\
                     Provide a detailed analysis, including the error type, possible cause, \
                     and an optimized fixed version of the code.\n\n\
                     Code:\n```\n{source}\n```\n\n\
                     Error:\n```\n{error}\n```"
                )
            }
            PromptKind::Suggestion => format!(
                "You are a Python coding assistant. The user wants real-time suggestions \
                 for the following code snippet:\n\n\
                 {source}\n\n\
                 Please:\n\
                 - Identify potential bugs or improvements.\n\
                 - Suggest concise changes or best practices."
            ),
        }
    }
}

/// Why a diagnosis did not produce text. Kept out of the serialized shape;
/// transports use it to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisErrorKind {
    MissingCredential,
    Timeout,
    Provider,
}

impl From<&AutofixError> for DiagnosisErrorKind {
    fn from(err: &AutofixError) -> Self {
        match err {
            AutofixError::MissingCredential(_) => DiagnosisErrorKind::MissingCredential,
            AutofixError::LLMTimeout(_) => DiagnosisErrorKind::Timeout,
            _ => DiagnosisErrorKind::Provider,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip)]
    pub error_kind: Option<DiagnosisErrorKind>,
}

impl DiagnosisResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            suggestion_text: Some(text.into()),
            error_message: None,
            error_kind: None,
        }
    }

    pub fn failure(err: &AutofixError) -> Self {
        let message = match err {
            AutofixError::MissingCredential(_) => "OpenAI API key not set.".to_string(),
            other => other.to_string(),
        };
        Self {
            succeeded: false,
            suggestion_text: None,
            error_message: Some(message),
            error_kind: Some(err.into()),
        }
    }
}

/// Sends prompts to the provider with configured sampling limits.
///
/// Stateless: the same instance is shared across requests and each call is
/// independent of the ones before it.
#[derive(Clone)]
pub struct DiagnosisClient {
    llm: Arc<dyn LLM>,
    max_tokens: u32,
    temperature: f32,
}

impl DiagnosisClient {
    pub fn new(llm: Arc<dyn LLM>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            llm,
            max_tokens,
            temperature,
        }
    }

    pub fn from_settings(llm: Arc<dyn LLM>, settings: &LlmSettings) -> Self {
        Self::new(llm, settings.max_tokens, settings.temperature)
    }

    /// Analysis when `context` is absent, failure escalation when it carries
    /// the captured error text.
    pub async fn diagnose(&self, source: &str, context: Option<&str>) -> DiagnosisResult {
        let kind = if context.is_some() {
            PromptKind::Failure
        } else {
            PromptKind::Analysis
        };
        self.diagnose_with(kind, source, context).await
    }

    /// Live-channel suggestion with half the token budget.
    pub async fn suggest(&self, source: &str) -> DiagnosisResult {
        self.diagnose_with(PromptKind::Suggestion, source, None).await
    }

    pub async fn diagnose_with(
        &self,
        kind: PromptKind,
        source: &str,
        context: Option<&str>,
    ) -> DiagnosisResult {
        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(kind.render(source, context)),
        ];
        let params = self.params_for(kind);

        log::info!("Requesting {:?} diagnosis ({} bytes of code)", kind, source.len());

        match self.llm.generate(messages, params).await {
            Ok(response) => {
                let text = format_suggestion(response.content.as_deref().unwrap_or(""));
                log::info!("Diagnosis completed ({} chars)", text.len());
                DiagnosisResult::success(text)
            }
            Err(e) => {
                log::error!("Diagnosis failed: {}", e);
                DiagnosisResult::failure(&e)
            }
        }
    }

    fn params_for(&self, kind: PromptKind) -> GenerationParams {
        let max_tokens = match kind {
            PromptKind::Suggestion => (self.max_tokens / 2).max(1),
            _ => self.max_tokens,
        };
        GenerationParams {
            max_tokens: Some(max_tokens),
            temperature: Some(self.temperature),
        }
    }
}

/// Trims the completion and collapses runs of blank lines into one.
pub fn format_suggestion(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return EMPTY_RESPONSE_TEXT.to_string();
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut blank_run = false;
    for line in trimmed.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if !blank_run {
                out.push('\n');
            }
            blank_run = true;
            continue;
        }
        blank_run = false;
        if !out.is_empty() && !out.ends_with("\n\n") {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}
