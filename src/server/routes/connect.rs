//! Connect transport handler: `POST /memos.api.v1.<Service>/<Method>`.
//!
//! Every call runs through the interceptor chain. `application/json` is a
//! unary call; `application/connect+json` is a server-stream call with
//! enveloped messages.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::Status;

use crate::rpc::connect::{
    decode_request_envelope, end_stream_frame, message_frame, Protocol, CONTENT_TYPE_CONNECT_JSON,
};
use crate::rpc::status::{connect_error_body, http_status};
use crate::rpc::{HttpBody, ReplyStream, RequestContext, RpcCall, RpcReply, API_PACKAGE};
use crate::server::state::ServerState;

pub async fn handle(
    State(state): State<ServerState>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let in_package = service
        .strip_prefix(API_PACKAGE)
        .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1);
    if !in_package {
        return StatusCode::NOT_FOUND.into_response();
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some(protocol) = Protocol::from_content_type(content_type) else {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    };

    let request = match parse_request(protocol, &body) {
        Ok(request) => request,
        Err(status) => return error_response(protocol, &status),
    };

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let call = RpcCall {
        ctx: RequestContext::new(Some(format!("/{service}/{method}")), cancel),
        headers,
        request,
    };

    let result = state.chain.call(call).await;

    match (protocol, result) {
        (_, Err(status)) => error_response(protocol, &status),
        (Protocol::Unary, Ok(RpcReply::Unary(message))) => Json(message).into_response(),
        (Protocol::Unary, Ok(RpcReply::Body(body))) => Json(http_body_message(&body)).into_response(),
        (Protocol::Unary, Ok(RpcReply::Stream(_))) => error_response(
            protocol,
            &Status::unimplemented(format!("streaming method requires {CONTENT_TYPE_CONNECT_JSON}")),
        ),
        (Protocol::Streaming, Ok(RpcReply::Stream(stream))) => stream_response(stream, guard),
        (Protocol::Streaming, Ok(RpcReply::Unary(message))) => single_message_response(&message),
        (Protocol::Streaming, Ok(RpcReply::Body(body))) => single_message_response(&http_body_message(&body)),
    }
}

fn parse_request(protocol: Protocol, body: &[u8]) -> Result<Value, Status> {
    let payload = match protocol {
        Protocol::Unary => Bytes::copy_from_slice(body),
        Protocol::Streaming => decode_request_envelope(body)?,
    };
    if payload.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(&payload).map_err(|e| Status::invalid_argument(format!("invalid JSON message: {e}")))
}

/// `google.api.HttpBody` in its JSON form
fn http_body_message(body: &HttpBody) -> Value {
    json!({
        "contentType": body.content_type,
        "data": STANDARD.encode(&body.data),
    })
}

/// Unary errors use the HTTP status; stream errors go in the end-of-stream
/// envelope of a 200 response
fn error_response(protocol: Protocol, status: &Status) -> Response {
    match protocol {
        Protocol::Unary => (http_status(status.code()), Json(connect_error_body(status))).into_response(),
        Protocol::Streaming => streaming_body(Body::from(end_stream_frame(Some(status)))),
    }
}

fn single_message_response(message: &Value) -> Response {
    let mut frames = Vec::new();
    match message_frame(message) {
        Ok(frame) => {
            frames.extend_from_slice(&frame);
            frames.extend_from_slice(&end_stream_frame(None));
        }
        Err(status) => frames.extend_from_slice(&end_stream_frame(Some(&status))),
    }
    streaming_body(Body::from(frames))
}

fn stream_response(stream: ReplyStream, guard: DropGuard) -> Response {
    let frames = async_stream::stream! {
        let _guard = guard;
        let mut stream = stream;
        let mut failure = None;
        while let Some(item) = stream.next().await {
            match item.and_then(|message| message_frame(&message)) {
                Ok(frame) => yield Ok::<_, Infallible>(frame),
                Err(status) => {
                    failure = Some(status);
                    break;
                }
            }
        }
        yield Ok(end_stream_frame(failure.as_ref()));
    };
    streaming_body(Body::from_stream(frames))
}

fn streaming_body(body: Body) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE_CONNECT_JSON)],
        body,
    )
        .into_response()
}
