//! HTTP and WebSocket transport for the execute-then-diagnose pipeline.
//!
//! `POST /run` executes a submission and attaches a diagnosis when it fails,
//! `POST /debug` asks for an analysis without running anything, and `/ws`
//! streams short suggestions for each snippet a client sends.

pub mod error;
pub mod rate_limit;
pub mod ws;

pub use error::{Result, ServerError};
pub use rate_limit::RateLimiter;

use autofix_core::config::AppConfig;
use autofix_core::{CodeSubmission, DiagnosisResult, Pipeline, PipelineOutcome};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::Json;
use axum::routing::{get, post};
use axum::{middleware, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const TIMEOUT_MESSAGE: &str = "Execution timed out.";

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

/// Body of `POST /run`. Either `output`/`errors` or `error` is present.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct RunResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<DiagnosisResult>,
}

impl From<PipelineOutcome> for RunResponse {
    fn from(outcome: PipelineOutcome) -> Self {
        let execution = outcome.execution;
        if execution.timed_out {
            return Self {
                output: None,
                errors: None,
                error: Some(TIMEOUT_MESSAGE.to_string()),
                diagnosis: outcome.diagnosis,
            };
        }
        if !execution.started {
            return Self {
                output: None,
                errors: None,
                error: execution.exit_error,
                diagnosis: outcome.diagnosis,
            };
        }
        Self {
            output: Some(execution.stdout.trim().to_string()),
            errors: Some(execution.stderr.trim().to_string()),
            error: None,
            diagnosis: outcome.diagnosis,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DebugResponse {
    pub analysis: String,
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
    /// Requests per minute, zero for unlimited.
    pub rate_limit_requests: u32,
    pub ws_max_connections: usize,
    pub ws_idle_timeout: Duration,
    /// Snippets queued per connection while a suggestion is in flight.
    pub ws_max_pending: usize,
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            cors_origins: None,
            rate_limit_requests: 100,
            ws_max_connections: 50,
            ws_idle_timeout: Duration::from_secs(30),
            ws_max_pending: 8,
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        let cors_origins = if config.security.allows_any_origin() {
            None
        } else {
            Some(config.security.allowed_origins.clone())
        };

        Self::new()
            .with_bind_addr_str(&config.server.bind_addr())
            .map(|server| Self {
                cors_origins,
                rate_limit_requests: config.security.rate_limit_requests,
                ws_max_connections: config.websocket.max_connections,
                ws_idle_timeout: config.websocket.idle_timeout(),
                ws_max_pending: config.websocket.max_pending,
                ..server
            })
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Resolve and set the bind address from `host:port`. Host names are
    /// looked up once; an IPv4 result wins over IPv6.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        let resolved: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address '{}': {}", addr, e)))?
            .collect();
        self.bind_addr = resolved
            .iter()
            .find(|candidate| candidate.is_ipv4())
            .or_else(|| resolved.first())
            .copied()
            .ok_or_else(|| {
                ServerError::config_error(format!("Bind address '{}' did not resolve", addr))
            })?;
        Ok(self)
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit_requests = requests_per_minute;
        self
    }

    pub fn with_ws_limits(mut self, max_connections: usize, idle_timeout: Duration) -> Self {
        self.ws_max_connections = max_connections;
        self.ws_idle_timeout = idle_timeout;
        self
    }

    pub fn with_ws_max_pending(mut self, max_pending: usize) -> Self {
        self.ws_max_pending = max_pending;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub config: ServerConfig,
    /// One permit per open WebSocket.
    pub ws_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, config: ServerConfig) -> Self {
        let ws_slots = Arc::new(Semaphore::new(config.ws_max_connections));
        Self {
            pipeline,
            config,
            ws_slots,
        }
    }
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({"message": "AutoFixIDE is running!"}))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn parse_code(payload: std::result::Result<Json<CodeRequest>, JsonRejection>) -> Result<CodeSubmission> {
    let Json(request) = payload.map_err(|rejection| ServerError::invalid_request(rejection.body_text()))?;
    Ok(CodeSubmission::new(request.code))
}

/// Handler for the /run POST endpoint.
async fn run_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<RunResponse>> {
    let submission = parse_code(payload)?;
    log::info!("Executing submission ({} bytes)", submission.source.len());

    let outcome = state.pipeline.run(&submission).await;
    if outcome.execution.timed_out {
        log::error!("Code execution timed out.");
    }

    Ok(Json(RunResponse::from(outcome)))
}

/// Handler for the /debug POST endpoint.
async fn debug_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<DebugResponse>> {
    let submission = parse_code(payload)?;
    log::info!("Analyzing submission ({} bytes)", submission.source.len());

    let result = state
        .pipeline
        .diagnosis_client()
        .diagnose(&submission.source, None)
        .await;

    match (result.succeeded, result.suggestion_text.clone()) {
        (true, Some(analysis)) => Ok(Json(DebugResponse { analysis })),
        _ => Err(ServerError::from_diagnosis(&result)),
    }
}

fn cors_layer(origins: Option<&Vec<String>>) -> CorsLayer {
    let Some(origins) = origins else {
        return CorsLayer::permissive();
    };
    let parsed: std::result::Result<Vec<HeaderValue>, _> =
        origins.iter().map(|origin| origin.parse::<HeaderValue>()).collect();
    match parsed {
        Ok(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            log::warn!("Invalid CORS origin in {:?} ({}), allowing any origin", origins, e);
            CorsLayer::permissive()
        }
    }
}

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let limiter = Arc::new(RateLimiter::per_minute(state.config.rate_limit_requests));
    let enable_logging = state.config.enable_logging;
    let cors = cors_layer(state.config.cors_origins.as_ref());

    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/run", post(run_handler))
        .route("/debug", post(debug_handler))
        .route("/ws", get(ws::ws_handler))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit::rate_limit))
        .with_state(state);

    if enable_logging {
        router = router.layer(middleware::from_fn(
            |request: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| async {
                let request_id = uuid::Uuid::new_v4().to_string();
                let method = request.method().clone();
                let uri = request.uri().clone();

                if uri.path() == "/health" {
                    log::debug!("Request {} {} {}", request_id, method, uri);
                } else {
                    log::info!("Request {} {} {}", request_id, method, uri);
                }

                let start = std::time::Instant::now();
                let response = next.run(request).await;
                log::info!(
                    "Response {} {} in {:?}",
                    request_id,
                    response.status(),
                    start.elapsed()
                );

                response
            },
        ));
    }

    router.layer(TraceLayer::new_for_http()).layer(cors)
}

pub struct AutofixServer {
    pipeline: Pipeline,
    config: ServerConfig,
}

impl AutofixServer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self::with_config(pipeline, ServerConfig::default())
    }

    pub fn with_config(pipeline: Pipeline, config: ServerConfig) -> Self {
        Self { pipeline, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn build_router(&self) -> Router {
        build_router(AppState::new(self.pipeline.clone(), self.config.clone()))
    }

    async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            ServerError::config_error(format!("Failed to bind to {}: {}", self.config.bind_addr, e))
        })
    }

    fn log_endpoints(&self) {
        let addr = self.config.bind_addr;
        log::info!("AutoFixIDE server starting on {}", addr);
        log::info!("Run endpoint: http://{}/run", addr);
        log::info!("Debug endpoint: http://{}/debug", addr);
        log::info!("WebSocket endpoint: ws://{}/ws", addr);
    }

    /// Start the server and stop accepting connections once `shutdown_signal`
    /// resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.log_endpoints();

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("AutoFixIDE server shut down gracefully");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use autofix_core::core_types::{GenerationParams, LLMResponse, Message};
    use autofix_core::{AutofixError, CodeExecutor, DiagnosisClient, ExecutionResult, LLM};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt; // for `oneshot`

    /// Answers by looking at the source instead of running it.
    struct FakeExecutor;

    #[async_trait]
    impl CodeExecutor for FakeExecutor {
        async fn execute(&self, source: &str, _timeout: Duration) -> ExecutionResult {
            let mut result = ExecutionResult {
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
                exit_error: None,
                exit_code: Some(0),
                duration_ms: 1,
                started: true,
            };
            match source {
                "print('ok')" => result.stdout = "ok\n".to_string(),
                "while True: pass" => {
                    result.timed_out = true;
                    result.exit_code = None;
                }
                _ => {
                    let stderr = "Traceback (most recent call last):\nZeroDivisionError: division by zero\n";
                    result.stderr = stderr.to_string();
                    result.exit_error = Some(stderr.trim().to_string());
                    result.exit_code = Some(1);
                }
            }
            result
        }
    }

    struct FakeLLM {
        reply: std::result::Result<String, AutofixError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLM for FakeLLM {
        async fn generate(
            &self,
            _messages: Vec<Message>,
            _params: GenerationParams,
        ) -> std::result::Result<LLMResponse, AutofixError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map(|content| LLMResponse {
                content: Some(content),
                finish_reason: None,
                usage: None,
            })
        }
    }

    fn state_with(
        reply: std::result::Result<String, AutofixError>,
        config: ServerConfig,
    ) -> (AppState, Arc<FakeLLM>) {
        let llm = Arc::new(FakeLLM {
            reply,
            calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::new(
            Arc::new(FakeExecutor),
            DiagnosisClient::new(llm.clone(), 512, 0.2),
            Duration::from_secs(5),
        );
        (AppState::new(pipeline, config), llm)
    }

    fn app(reply: std::result::Result<String, AutofixError>) -> (Router, Arc<FakeLLM>) {
        let (state, llm) = state_with(reply, ServerConfig::default().with_logging(false));
        (build_router(state), llm)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let (router, _) = app(Ok("unused".to_string()));
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "AutoFixIDE is running!");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (router, _) = app(Ok("unused".to_string()));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_run_success_has_no_diagnosis() {
        let (router, llm) = app(Ok("unused".to_string()));
        let response = router
            .oneshot(post_json("/run", json!({"code": "print('ok')"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body, json!({"output": "ok", "errors": ""}));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_failure_attaches_diagnosis() {
        let (router, llm) = app(Ok("Guard the divisor.".to_string()));
        let response = router
            .oneshot(post_json("/run", json!({"code": "print(1/0)"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["output"], "");
        assert!(body["errors"].as_str().unwrap().contains("ZeroDivisionError"));
        assert_eq!(body["diagnosis"]["succeeded"], true);
        assert_eq!(body["diagnosis"]["suggestion_text"], "Guard the divisor.");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_timeout_reports_error() {
        let (router, _) = app(Err(AutofixError::LLMError("provider down".to_string())));
        let response = router
            .oneshot(post_json("/run", json!({"code": "while True: pass"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Execution timed out.");
        assert!(body.get("output").is_none());
        assert_eq!(body["diagnosis"]["succeeded"], false);
        assert!(body["diagnosis"]["error_message"]
            .as_str()
            .unwrap()
            .contains("provider down"));
    }

    #[tokio::test]
    async fn test_run_rejects_malformed_body() {
        let (router, _) = app(Ok("unused".to_string()));
        let response = router
            .oneshot(post_json("/run", json!({"source": "print(1)"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["type"], "invalid_request");
    }

    #[tokio::test]
    async fn test_debug_returns_analysis() {
        let (router, llm) = app(Ok("\nLooks fine.\n".to_string()));
        let response = router
            .oneshot(post_json("/debug", json!({"code": "x = 1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"analysis": "Looks fine."}));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_debug_error_statuses() {
        let cases = [
            (
                AutofixError::MissingCredential("unset".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (AutofixError::LLMTimeout(30), StatusCode::GATEWAY_TIMEOUT),
            (
                AutofixError::LLMError("401 Unauthorized".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (error, expected) in cases {
            let (router, _) = app(Err(error));
            let response = router
                .oneshot(post_json("/debug", json!({"code": "x = 1"})))
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
            if expected == StatusCode::BAD_REQUEST {
                assert_eq!(json_body(response).await["error"], "OpenAI API key not set.");
            }
        }
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_excess_requests() {
        let (state, _) = state_with(
            Ok("unused".to_string()),
            ServerConfig::default().with_logging(false).with_rate_limit(2),
        );
        let router = build_router(state);

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_ws_rejected_when_full() {
        let (state, _) = state_with(
            Ok("unused".to_string()),
            ServerConfig::default()
                .with_logging(false)
                .with_ws_limits(1, Duration::from_secs(30)),
        );
        let _held = state.ws_slots.clone().try_acquire_owned().unwrap();
        let router = build_router(state);

        let response = router
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["type"], "overloaded");
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let (router, _) = app(Ok("unused".to_string()));
        let response = router
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_server_config_from_app_config() {
        let mut app_config = AppConfig::default();
        app_config.server.host = "127.0.0.1".to_string();
        app_config.server.port = 9000;
        app_config.security.allowed_origins = vec!["http://localhost:3000".to_string()];
        app_config.security.rate_limit_requests = 10;
        app_config.websocket.max_connections = 5;
        app_config.websocket.max_pending = 2;

        let config = ServerConfig::from_app_config(&app_config).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(
            config.cors_origins,
            Some(vec!["http://localhost:3000".to_string()])
        );
        assert_eq!(config.rate_limit_requests, 10);
        assert_eq!(config.ws_max_connections, 5);
        assert_eq!(config.ws_max_pending, 2);

        app_config.server.host = "not a host".to_string();
        assert!(ServerConfig::from_app_config(&app_config).is_err());
    }

    #[test]
    fn test_bind_addr_accepts_host_names() {
        let config = ServerConfig::new().with_bind_addr_str("localhost:9100").unwrap();
        assert!(config.bind_addr.ip().is_loopback());
        assert_eq!(config.bind_addr.port(), 9100);

        let literal = ServerConfig::new().with_bind_addr_str("127.0.0.1:8000").unwrap();
        assert_eq!(literal.bind_addr, "127.0.0.1:8000".parse().unwrap());

        assert!(ServerConfig::new().with_bind_addr_str("localhost").is_err());
    }
}
