//! Pinned-session WebSocket stream.
//!
//! Connecting pins one idle session under an owner-held lock; every message
//! on the stream runs against that session. Errors are reported on the
//! stream while the pin survives; the lock is released on disconnect, and a
//! silently dead client is reclaimed by the lock TTL.

use crate::state::AppState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures::SinkExt;
use serde_json::{json, Value};
use sideflow_core::{ExecuteRequest, StreamHandle};
use std::sync::Arc;

pub async fn session_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let handle = match state.dispatcher.open_stream().await {
        Ok(handle) => handle,
        Err(err) => {
            let payload = json!({"type": "error", "message": err.to_string()});
            let _ = socket.send(Message::Text(payload.to_string().into())).await;
            let _ = socket.close().await;
            return;
        }
    };

    let greeting = json!({
        "type": "connected",
        "session_id": handle.session_id,
    });
    if socket
        .send(Message::Text(greeting.to_string().into()))
        .await
        .is_err()
    {
        release(&state, &handle);
        return;
    }

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => {
                let response = handle_message(&state, &handle, text.as_str()).await;
                if socket
                    .send(Message::Text(response.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    release(&state, &handle);
}

fn release(state: &AppState, handle: &StreamHandle) {
    if let Err(err) = state.dispatcher.close_stream(handle) {
        tracing::warn!(session_id = %handle.session_id, error = %err, "stream lock release failed");
    }
}

async fn handle_message(state: &AppState, handle: &StreamHandle, text: &str) -> Value {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        return json!({"type": "error", "message": "message is not valid JSON"});
    };

    match message.get("type").and_then(Value::as_str) {
        Some("execute_side") => {
            let request: ExecuteRequest = match serde_json::from_value(message.clone()) {
                Ok(request) => request,
                Err(err) => {
                    return json!({"type": "error", "message": format!("invalid request: {err}")})
                }
            };
            if request.suite.is_some() && request.test.is_some() {
                return json!({
                    "type": "error",
                    "message": "at most one of 'suite' and 'test' may be set"
                });
            }
            match state.dispatcher.stream_execute(handle, &request).await {
                Ok(source) => json!({"type": "result", "data": source}),
                Err(failure) => json!({"type": "error", "message": failure.error.to_string()}),
            }
        }
        Some("execute_js") => {
            let Some(code) = message.get("code").and_then(Value::as_str) else {
                return json!({"type": "error", "message": "'code' is required"});
            };
            match state.dispatcher.stream_js(handle, code).await {
                Ok(result) => json!({"type": "result", "data": result}),
                Err(err) => json!({"type": "error", "message": err.to_string()}),
            }
        }
        Some("get_page_source") => match state.dispatcher.stream_page_source(handle).await {
            Ok(source) => json!({"type": "result", "data": source}),
            Err(err) => json!({"type": "error", "message": err.to_string()}),
        },
        Some(other) => json!({
            "type": "error",
            "message": format!("unsupported message type: {other}")
        }),
        None => json!({"type": "error", "message": "message type is required"}),
    }
}
