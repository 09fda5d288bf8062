//! Live suggestion channel.
//!
//! Every text frame is treated as a code snippet and answered with exactly
//! one text frame. Frames that arrive while a suggestion is being generated
//! are queued and answered in order, up to `ws_max_pending` of them; past
//! that a frame is answered at once with an error and never reaches the
//! provider. When the client goes away the in-flight provider call is
//! dropped with the session.

use std::collections::VecDeque;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tokio::sync::OwnedSemaphorePermit;

use autofix_core::DiagnosisResult;

use crate::error::ServerError;
use crate::AppState;

const QUEUE_FULL_REPLY: &str = "Error generating suggestions: too many pending messages";

enum Incoming {
    Code(String),
    Ignore,
    Closed,
}

fn classify(frame: Option<Result<Message, axum::Error>>) -> Incoming {
    match frame {
        Some(Ok(Message::Text(text))) => Incoming::Code(text.as_str().to_string()),
        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Incoming::Code(text),
            Err(_) => {
                log::warn!("Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len());
                Incoming::Ignore
            }
        },
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Incoming::Ignore,
        Some(Ok(Message::Close(_))) | None => Incoming::Closed,
        Some(Err(e)) => {
            log::warn!("WebSocket receive error: {}", e);
            Incoming::Closed
        }
    }
}

/// The text sent back for one snippet.
pub fn reply_text(result: &DiagnosisResult) -> String {
    match (&result.suggestion_text, &result.error_message) {
        (Some(text), _) if result.succeeded => text.clone(),
        (_, Some(error)) => format!("Error generating suggestions: {}", error),
        _ => "Error generating suggestions: no response".to_string(),
    }
}

/// Rejects with 503 before upgrading once every connection slot is taken.
pub async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let permit = match state.ws_slots.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return ServerError::Overloaded(format!(
                "Too many WebSocket connections (max {}).",
                state.config.ws_max_connections
            ))
            .into_response();
        }
    };

    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state, permit)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn next_code(socket: &mut WebSocket, idle: Duration) -> Option<String> {
    loop {
        let frame = match tokio::time::timeout(idle, socket.recv()).await {
            Ok(frame) => frame,
            Err(_) => {
                log::info!("WebSocket idle for {:?}, closing", idle);
                let _ = socket.send(Message::Close(None)).await;
                return None;
            }
        };
        match classify(frame) {
            Incoming::Code(code) => return Some(code),
            Incoming::Ignore => continue,
            Incoming::Closed => return None,
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, _permit: OwnedSemaphorePermit) {
    let session = uuid::Uuid::new_v4();
    let idle = state.config.ws_idle_timeout;
    let max_pending = state.config.ws_max_pending;
    let mut pending: VecDeque<String> = VecDeque::new();
    log::info!("WebSocket {} connected", session);

    loop {
        let code = match pending.pop_front() {
            Some(code) => code,
            None => match next_code(&mut socket, idle).await {
                Some(code) => code,
                None => break,
            },
        };

        let suggestion = state.pipeline.diagnosis_client().suggest(&code);
        tokio::pin!(suggestion);

        let result = loop {
            tokio::select! {
                result = &mut suggestion => break Some(result),
                frame = socket.recv() => match classify(frame) {
                    Incoming::Code(more) if pending.len() < max_pending => pending.push_back(more),
                    Incoming::Code(_) => {
                        log::warn!("WebSocket {} queue full ({}), rejecting snippet", session, max_pending);
                        if let Err(e) = socket.send(Message::Text(QUEUE_FULL_REPLY.into())).await {
                            log::warn!("WebSocket {} send failed: {}", session, e);
                            break None;
                        }
                    }
                    Incoming::Ignore => {}
                    Incoming::Closed => break None,
                },
            }
        };

        let Some(result) = result else {
            log::info!("WebSocket {} disconnected mid-request, dropping call", session);
            break;
        };

        if !result.succeeded {
            log::error!(
                "WebSocket {} suggestion failed: {}",
                session,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }

        if let Err(e) = socket.send(Message::Text(reply_text(&result).into())).await {
            log::warn!("WebSocket {} send failed: {}", session, e);
            break;
        }
    }

    log::info!("WebSocket {} closed", session);
}
