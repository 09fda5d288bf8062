use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autofix_core::config::{AppConfig, ConfigLoader};
use autofix_core::{CodeSubmission, DiagnosisErrorKind, Pipeline};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Minimal OpenAI-compatible provider. Answers with `reply`, or with a 500
/// when `reply` is `None`.
struct Provider {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct ProviderState {
    reply: Option<String>,
    hits: Arc<AtomicUsize>,
}

async fn completions(
    State(state): State<ProviderState>,
    Json(_body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    match &state.reply {
        Some(text) => Ok(Json(json!({
            "choices": [{"message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
        }))),
        None => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

impl Provider {
    async fn start(reply: Option<&str>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = ProviderState {
            reply: reply.map(str::to_string),
            hits: hits.clone(),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, hits }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn config_for(provider: &Provider, work_dir: &std::path::Path) -> AppConfig {
    let base = format!("http://{}/v1", provider.addr);
    let work_dir = work_dir.display().to_string();
    ConfigLoader::from_lookup(|key| match key {
        "OPENAI_API_KEY" => Some("sk-integration".to_string()),
        "OPENAI_API_BASE" => Some(base.clone()),
        "EXECUTION_TIMEOUT" => Some("5".to_string()),
        "AI_REQUEST_TIMEOUT" => Some("5".to_string()),
        "EXECUTION_WORK_DIR" => Some(work_dir.clone()),
        _ => None,
    })
    .unwrap()
}

#[tokio::test]
async fn successful_run_has_no_diagnosis() {
    let _ = env_logger::builder().is_test(true).try_init();
    let provider = Provider::start(Some("unused")).await;
    let work_dir = tempfile::TempDir::new().unwrap();
    let pipeline = Pipeline::from_config(&config_for(&provider, work_dir.path())).unwrap();

    let outcome = pipeline.run(&CodeSubmission::new("print('ok')")).await;

    assert_eq!(outcome.execution.stdout.trim(), "ok");
    assert_eq!(outcome.execution.stderr.trim(), "");
    assert!(outcome.diagnosis.is_none());
    assert_eq!(provider.hits(), 0);
    assert_eq!(std::fs::read_dir(work_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn failing_run_is_diagnosed_once() {
    let provider = Provider::start(Some("The divisor is zero; check it first.")).await;
    let work_dir = tempfile::TempDir::new().unwrap();
    let pipeline = Pipeline::from_config(&config_for(&provider, work_dir.path())).unwrap();

    let outcome = pipeline.run(&CodeSubmission::new("print(1/0)")).await;

    assert!(!outcome.execution.timed_out);
    assert!(outcome.execution.stderr.contains("ZeroDivisionError"));
    let diagnosis = outcome.diagnosis.expect("failed run should be diagnosed");
    assert!(diagnosis.succeeded);
    assert_eq!(
        diagnosis.suggestion_text.as_deref(),
        Some("The divisor is zero; check it first.")
    );
    assert_eq!(provider.hits(), 1);
}

#[tokio::test]
async fn provider_outage_is_reported_not_raised() {
    let provider = Provider::start(None).await;
    let work_dir = tempfile::TempDir::new().unwrap();
    let pipeline = Pipeline::from_config(&config_for(&provider, work_dir.path())).unwrap();

    let outcome = pipeline.run(&CodeSubmission::new("raise ValueError('bad input')")).await;

    assert!(outcome.execution.stderr.contains("ValueError"));
    let diagnosis = outcome.diagnosis.unwrap();
    assert!(!diagnosis.succeeded);
    assert_eq!(diagnosis.error_kind, Some(DiagnosisErrorKind::Provider));
    assert!(diagnosis.error_message.unwrap().contains("500"));
    assert_eq!(provider.hits(), 1);
}

#[tokio::test]
async fn unreachable_provider_is_bounded() {
    // Nothing listens on the discard port; the client fails fast.
    let work_dir = tempfile::TempDir::new().unwrap();
    let config = ConfigLoader::from_lookup(|key| match key {
        "OPENAI_API_KEY" => Some("sk-integration".to_string()),
        "OPENAI_API_BASE" => Some("http://127.0.0.1:9/v1".to_string()),
        "AI_REQUEST_TIMEOUT" => Some("3".to_string()),
        "EXECUTION_WORK_DIR" => Some(work_dir.path().display().to_string()),
        _ => None,
    })
    .unwrap();
    let pipeline = Pipeline::from_config(&config).unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run(&CodeSubmission::new("import sys\nsys.exit(3)")),
    )
    .await
    .expect("diagnosis must be bounded by the request timeout");

    assert_eq!(outcome.execution.exit_code, Some(3));
    assert!(!outcome.diagnosis.unwrap().succeeded);
}
