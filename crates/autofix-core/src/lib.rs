//! Execute-then-diagnose core for the AutoFixIDE service.
//!
//! Submitted code is run in a timeout-bounded child process; when it fails,
//! the code and its error output are sent to a completion provider once and
//! the suggestion is returned next to the raw failure.
//!
//! - [`executors`]: timeout-bounded subprocess execution with scoped scratch files
//! - [`diagnosis`]: prompt templates and provider failure handling
//! - [`pipeline`]: the composition of the two
//! - [`config`]: environment-driven configuration, validated once at startup

pub mod config;
pub mod core_types;
pub mod diagnosis;
pub mod errors;
pub mod executors;
pub mod llm;
pub mod pipeline;

pub use config::*;
pub use diagnosis::{DiagnosisClient, DiagnosisErrorKind, DiagnosisResult, PromptKind};
pub use errors::AutofixError;
pub use executors::{CodeExecutor, ExecutionResult, ProcessExecutor};
pub use llm::LLM;
pub use pipeline::{CodeSubmission, Pipeline, PipelineOutcome};

#[cfg(test)]
pub mod test_utils;
