//! Execute-then-diagnose pipeline.
//!
//! One execution attempt, and at most one diagnosis attempt, per submission.
//! A diagnosis is attached exactly when the execution failed.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::diagnosis::{DiagnosisClient, DiagnosisResult};
use crate::errors::AutofixError;
use crate::executors::{CodeExecutor, ExecutionResult, ProcessExecutor};
use crate::llm::providers::create_llm_client;

/// A single block of user-supplied source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSubmission {
    pub source: String,
}

impl CodeSubmission {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub execution: ExecutionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<DiagnosisResult>,
}

#[derive(Clone)]
pub struct Pipeline {
    executor: Arc<dyn CodeExecutor>,
    diagnosis: DiagnosisClient,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(executor: Arc<dyn CodeExecutor>, diagnosis: DiagnosisClient, timeout: Duration) -> Self {
        Self {
            executor,
            diagnosis,
            timeout,
        }
    }

    /// Wire the subprocess executor and the configured provider together.
    pub fn from_config(config: &AppConfig) -> Result<Self, AutofixError> {
        let llm = create_llm_client(&config.llm)?;
        let executor: Arc<dyn CodeExecutor> = Arc::new(ProcessExecutor::from_settings(&config.execution));
        Ok(Self::new(
            executor,
            DiagnosisClient::from_settings(llm, &config.llm),
            config.execution.timeout(),
        ))
    }

    pub fn diagnosis_client(&self) -> &DiagnosisClient {
        &self.diagnosis
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute_only(&self, submission: &CodeSubmission) -> ExecutionResult {
        self.executor.execute(&submission.source, self.timeout).await
    }

    pub async fn run(&self, submission: &CodeSubmission) -> PipelineOutcome {
        let execution = self.execute_only(submission).await;

        let Some(context) = execution.failure_context() else {
            log::debug!("Execution succeeded in {} ms, no diagnosis needed", execution.duration_ms);
            return PipelineOutcome {
                execution,
                diagnosis: None,
            };
        };

        log::info!(
            "Execution failed (timed_out={}), escalating to diagnosis",
            execution.timed_out
        );
        let diagnosis = self
            .diagnosis
            .diagnose(&submission.source, Some(&context))
            .await;

        PipelineOutcome {
            execution,
            diagnosis: Some(diagnosis),
        }
    }
}
