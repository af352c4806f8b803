//! Middleware for route resolution, authentication, logging and CORS

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::{Duration, Instant};
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::auth::{authorize, AuthenticationResult, Decision};
use crate::config::CorsSettings;
use crate::gateway::MatchedRoute;
use crate::server::state::ServerState;

/// Body of every authentication rejection on the REST side
const UNAUTHENTICATED_BODY: &str = r#"{"code": 16, "message": "authentication required"}"#;

/// Resolve the REST route up front so the auth check knows the RPC method
pub async fn route_middleware(State(state): State<ServerState>, mut request: Request, next: Next) -> Response {
    if let Some(matched) = state.routes.match_route(request.method(), request.uri().path()) {
        debug!("{} {} -> {}", request.method(), request.uri().path(), matched.rpc);
        request.extensions_mut().insert(matched);
    }
    next.run(request).await
}

/// Credential resolution and the public-method check for REST requests.
///
/// On success the [`AuthenticationResult`] is attached to the request
/// extensions for the handler.
pub async fn auth_middleware(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let method = parts.extensions.get::<MatchedRoute>().map(|m| m.rpc.clone());

    match authorize_request(&state, &parts.headers, method.as_deref()).await {
        Ok(auth) => {
            parts.extensions.insert(auth);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(response) => response,
    }
}

/// Authenticate `headers` and apply the policy for `method`
pub async fn authorize_request(
    state: &ServerState,
    headers: &HeaderMap,
    method: Option<&str>,
) -> Result<AuthenticationResult, Response> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let result = state.authenticator.authenticate(header).await;
    match authorize(result, method, &state.public_methods) {
        Decision::Allow(auth) | Decision::Deferred(auth) => Ok(auth),
        Decision::Reject(status) => {
            debug!("Rejected {}: {}", method.unwrap_or("-"), status.message());
            Err(unauthenticated_response())
        }
    }
}

fn unauthenticated_response() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(UNAUTHENTICATED_BODY))
        .unwrap_or_else(|_| StatusCode::UNAUTHORIZED.into_response())
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        warn!("{} {} {} ({:?})", method, uri, status, duration);
    } else {
        info!("{} {} {} ({:?})", method, uri, status, duration);
    }

    response
}

/// Disable caching of streamed responses
pub fn add_no_cache_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

/// CORS for the REST bridge: any origin, allowlisted headers, no credentials
pub fn gateway_cors(config: &CorsSettings) -> CorsLayer {
    let headers: Vec<HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|h| match h.parse::<HeaderName>() {
            Ok(name) => Some(name),
            Err(_) => {
                warn!("CORS: ignoring invalid header name '{}'", h);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(headers)
        .allow_credentials(false)
        .max_age(Duration::from_secs(config.max_age))
}

/// CORS for the Connect transport: echo the origin and allow credentials
pub fn connect_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
