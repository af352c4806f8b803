//! Dedicated streaming chat route.
//!
//! `POST /api/v1/chat/completions` answers with newline-delimited
//! `{"content": "...", "type": "text"}` objects as upstream produces them.
//! The route sits outside the bridge's auth middleware: a bearer credential
//! is resolved for logging when present, and anonymous callers are served.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::chat::{relay, ChatRequest, StreamChunk};
use crate::server::middleware::add_no_cache_headers;
use crate::server::state::ServerState;

/// Chunks buffered between the relay task and the response body
const CHUNK_BUFFER: usize = 32;

pub async fn chat_completions(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> Response {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let auth = state.authenticator.authenticate(credential).await;

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejected chat body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request body" })),
            )
                .into_response();
        }
    };

    debug!("Chat request from {}", auth.username().unwrap_or("anonymous"));

    let (mut tx, rx) = mpsc::channel::<StreamChunk>(CHUNK_BUFFER);
    let cancel = CancellationToken::new();
    let provider = state.chat.clone();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            // Headers are already sent; the relay has logged the cause and
            // ending the body is all that is left
            if let Err(status) = relay(&cancel, provider.as_ref(), &request.message, &mut tx).await {
                debug!("Chat stream ended early: {:?}", status.code());
            }
        });
    }

    // Client disconnect drops the body, which stops the relay
    let guard = cancel.drop_guard();
    let lines = async_stream::stream! {
        let _guard = guard;
        let mut chunks = ReceiverStream::new(rx);
        while let Some(chunk) = chunks.next().await {
            match serde_json::to_vec(&chunk) {
                Ok(mut line) => {
                    line.push(b'\n');
                    yield Ok::<_, Infallible>(Bytes::from(line));
                }
                Err(e) => {
                    error!("Failed to encode chat chunk: {}", e);
                    break;
                }
            }
        }
    };

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(lines),
    )
        .into_response();
    add_no_cache_headers(&mut response);
    response
}
