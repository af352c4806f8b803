//! REST/JSON bridge handler.
//!
//! Routing and authentication already ran in middleware; this handler
//! assembles the request message, dispatches it and renders the reply the
//! way grpc-gateway does.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::auth::AuthenticationResult;
use crate::gateway::{build_request, MatchedRoute};
use crate::rpc::status::{gateway_error_body, http_status};
use crate::rpc::{client_ip, ReplyStream, RequestContext, RpcReply};
use crate::server::middleware::add_no_cache_headers;
use crate::server::state::ServerState;

pub async fn handle(
    State(state): State<ServerState>,
    matched: Option<Extension<MatchedRoute>>,
    auth: Option<Extension<AuthenticationResult>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(Extension(matched)) = matched else {
        return error_response(&Status::not_found("Not Found"));
    };

    let request = match build_request(&matched, uri.query(), &body) {
        Ok(request) => request,
        Err(status) => return error_response(&status),
    };

    let cancel = CancellationToken::new();
    // Fires if the client disconnects while the handler is still running
    let guard = cancel.clone().drop_guard();

    let ctx = RequestContext {
        method: Some(matched.rpc.clone()),
        metadata: MetadataMap::from_headers(headers.clone()),
        auth: auth.map(|Extension(a)| a).unwrap_or_default(),
        cancel,
        client_ip: client_ip(&headers),
    };

    match state.registry.dispatch(&ctx, &matched.rpc, request).await {
        Ok(RpcReply::Unary(message)) => Json(message).into_response(),
        Ok(RpcReply::Body(body)) => (
            [(header::CONTENT_TYPE, body.content_type)],
            body.data,
        )
            .into_response(),
        Ok(RpcReply::Stream(stream)) => stream_response(stream, guard),
        Err(status) => error_response(&status),
    }
}

/// Newline-delimited `{"result": ...}` lines, ending with an `{"error": ...}`
/// line if the stream fails
fn stream_response(stream: ReplyStream, guard: DropGuard) -> Response {
    let lines = async_stream::stream! {
        let _guard = guard;
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let (line, last) = match item {
                Ok(message) => (json!({ "result": message }), false),
                Err(status) => (json!({ "error": gateway_error_body(&status) }), true),
            };
            yield Ok::<_, Infallible>(ndjson_line(&line));
            if last {
                break;
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

fn ndjson_line(value: &Value) -> Bytes {
    let mut line = value.to_string().into_bytes();
    line.push(b'\n');
    Bytes::from(line)
}

fn error_response(status: &Status) -> Response {
    (http_status(status.code()), Json(gateway_error_body(status))).into_response()
}
