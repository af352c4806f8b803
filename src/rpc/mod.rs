//! Transport-neutral RPC plumbing.
//!
//! Services implement [`RpcService`] over JSON messages and are looked up by
//! fully-qualified method name (`/memos.api.v1.<Service>/<Method>`) through a
//! [`ServiceRegistry`]. Both the REST bridge and the Connect transport
//! dispatch into the same registry.

pub mod connect;
pub mod interceptor;
pub mod status;

pub use interceptor::{
    AuthInterceptor, Interceptor, InterceptorChain, LoggingInterceptor, MetadataInterceptor, Next,
    RecoveryInterceptor, RpcCall,
};

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::auth::AuthenticationResult;

/// Protobuf package of every routed service
pub const API_PACKAGE: &str = "memos.api.v1";

/// `/memos.api.v1.<service>/<method>`
pub fn full_method(service: &str, method: &str) -> String {
    format!("/{API_PACKAGE}.{service}/{method}")
}

/// Split `/pkg.Service/Method` into `("pkg.Service", "Method")`
pub fn split_method(full: &str) -> Option<(&str, &str)> {
    let (service, method) = full.strip_prefix('/')?.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

/// Client address from `x-forwarded-for` (first hop) or `x-real-ip`
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for").or_else(|| header("x-real-ip")).map(str::to_owned)
}

/// Per-request state handed to interceptors and services
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Fully-qualified RPC method, when routing determined one
    pub method: Option<String>,
    pub metadata: MetadataMap,
    pub auth: AuthenticationResult,
    /// Fires when the client goes away
    pub cancel: CancellationToken,
    pub client_ip: Option<String>,
}

impl RequestContext {
    pub fn new(method: Option<String>, cancel: CancellationToken) -> Self {
        Self {
            method,
            cancel,
            ..Self::default()
        }
    }
}

pub type ReplyStream = BoxStream<'static, Result<Value, Status>>;

/// Raw HTTP payload, for methods that return files
#[derive(Debug, Clone)]
pub struct HttpBody {
    pub content_type: String,
    pub data: Bytes,
}

pub enum RpcReply {
    Unary(Value),
    /// Server stream of messages
    Stream(ReplyStream),
    Body(HttpBody),
}

impl std::fmt::Debug for RpcReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcReply::Unary(value) => f.debug_tuple("Unary").field(value).finish(),
            RpcReply::Stream(_) => f.write_str("Stream(..)"),
            RpcReply::Body(body) => f.debug_tuple("Body").field(body).finish(),
        }
    }
}

#[async_trait]
pub trait RpcService: Send + Sync {
    /// Fully-qualified service name, e.g. `memos.api.v1.ChatService`
    fn name(&self) -> &str;

    async fn call(&self, ctx: &RequestContext, method: &str, request: Value) -> Result<RpcReply, Status>;
}

/// Service lookup by name
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn RpcService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one with the same name
    pub fn register(&mut self, service: Arc<dyn RpcService>) {
        self.services.insert(service.name().to_owned(), service);
    }

    pub fn with(mut self, service: Arc<dyn RpcService>) -> Self {
        self.register(service);
        self
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub async fn dispatch(&self, ctx: &RequestContext, full_method: &str, request: Value) -> Result<RpcReply, Status> {
        let (service, method) = split_method(full_method)
            .ok_or_else(|| Status::unimplemented(format!("malformed method name {full_method}")))?;
        let handler = self
            .services
            .get(service)
            .ok_or_else(|| Status::unimplemented(format!("unknown service {service}")))?;
        handler.call(ctx, method, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tonic::Code;

    struct Echo;

    #[async_trait]
    impl RpcService for Echo {
        fn name(&self) -> &str {
            "memos.api.v1.EchoService"
        }

        async fn call(&self, _ctx: &RequestContext, method: &str, request: Value) -> Result<RpcReply, Status> {
            match method {
                "Echo" => Ok(RpcReply::Unary(request)),
                other => Err(Status::unimplemented(format!("method {other} not implemented"))),
            }
        }
    }

    #[test]
    fn test_split_method() {
        assert_eq!(
            split_method("/memos.api.v1.MemoService/GetMemo"),
            Some(("memos.api.v1.MemoService", "GetMemo"))
        );
        assert_eq!(split_method("memos.api.v1.MemoService/GetMemo"), None);
        assert_eq!(split_method("/memos.api.v1.MemoService/"), None);
        assert_eq!(split_method("/a/b/c"), None);
        assert_eq!(full_method("ChatService", "Chat"), "/memos.api.v1.ChatService/Chat");
    }

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.2"));
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_dispatch() {
        let registry = ServiceRegistry::new().with(Arc::new(Echo));
        let ctx = RequestContext::default();

        match registry.dispatch(&ctx, "/memos.api.v1.EchoService/Echo", json!({"a": 1})).await {
            Ok(RpcReply::Unary(value)) => assert_eq!(value, json!({"a": 1})),
            other => panic!("unexpected {other:?}"),
        }

        let err = registry
            .dispatch(&ctx, "/memos.api.v1.NopeService/Echo", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);

        let err = registry
            .dispatch(&ctx, "/memos.api.v1.EchoService/Other", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }
}
