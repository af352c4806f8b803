//! Interceptor chain for the Connect transport.
//!
//! Each interceptor receives the call and a [`Next`] handle for the rest of
//! the chain. It may pass the call on (possibly after changing its context),
//! wrap the reply, or stop with a `Status`. The end of the chain dispatches
//! into the [`ServiceRegistry`].

use async_trait::async_trait;
use axum::http::HeaderMap;
use futures::FutureExt;
use futures::StreamExt;
use serde_json::Value;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use tracing::{debug, error, info};

use super::{client_ip, ReplyStream, RequestContext, RpcReply, ServiceRegistry};
use crate::auth::{authorize, Authenticator, Decision, PublicMethodSet};

/// One in-flight RPC
#[derive(Debug)]
pub struct RpcCall {
    pub ctx: RequestContext,
    /// Raw transport headers, before normalization into metadata
    pub headers: HeaderMap,
    pub request: Value,
}

impl RpcCall {
    pub fn method(&self) -> &str {
        self.ctx.method.as_deref().unwrap_or_default()
    }
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, call: RpcCall, next: Next<'_>) -> Result<RpcReply, Status>;
}

/// Remainder of the chain
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    registry: &'a ServiceRegistry,
}

impl<'a> Next<'a> {
    pub async fn run(self, call: RpcCall) -> Result<RpcReply, Status> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                head.intercept(
                    call,
                    Next {
                        rest,
                        registry: self.registry,
                    },
                )
                .await
            }
            None => {
                let method = call.method().to_owned();
                self.registry.dispatch(&call.ctx, &method, call.request).await
            }
        }
    }
}

/// Ordered interceptors in front of a registry
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    registry: Arc<ServiceRegistry>,
}

impl InterceptorChain {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            interceptors: Vec::new(),
            registry,
        }
    }

    /// Append an interceptor; it runs after the ones already added
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// metadata -> logging -> recovery -> auth -> handler
    pub fn standard(
        registry: Arc<ServiceRegistry>,
        authenticator: Authenticator,
        public: Arc<PublicMethodSet>,
        log_stacktraces: bool,
    ) -> Self {
        Self::new(registry)
            .with(MetadataInterceptor)
            .with(LoggingInterceptor { log_stacktraces })
            .with(RecoveryInterceptor)
            .with(AuthInterceptor { authenticator, public })
    }

    pub async fn call(&self, call: RpcCall) -> Result<RpcReply, Status> {
        Next {
            rest: &self.interceptors,
            registry: &self.registry,
        }
        .run(call)
        .await
    }
}

/// Normalizes transport headers into RPC metadata
pub struct MetadataInterceptor;

#[async_trait]
impl Interceptor for MetadataInterceptor {
    async fn intercept(&self, mut call: RpcCall, next: Next<'_>) -> Result<RpcReply, Status> {
        call.ctx.client_ip = client_ip(&call.headers);
        call.ctx.metadata = MetadataMap::from_headers(call.headers.clone());
        next.run(call).await
    }
}

/// Logs method, duration and outcome of every call
pub struct LoggingInterceptor {
    /// Also log a backtrace for failed calls (demo mode)
    pub log_stacktraces: bool,
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, call: RpcCall, next: Next<'_>) -> Result<RpcReply, Status> {
        let method = call.method().to_owned();
        let client = call.ctx.client_ip.clone().unwrap_or_default();
        let start = Instant::now();

        let result = next.run(call).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(RpcReply::Stream(_)) => info!("{} stream opened ({:?}) {}", method, elapsed, client),
            Ok(_) => info!("{} OK ({:?}) {}", method, elapsed, client),
            Err(status) if is_client_error(status.code()) => {
                info!("{} {:?}: {} ({:?}) {}", method, status.code(), status.message(), elapsed, client)
            }
            Err(status) => {
                error!("{} {:?}: {} ({:?}) {}", method, status.code(), status.message(), elapsed, client);
                if self.log_stacktraces {
                    error!("{}", Backtrace::force_capture());
                }
            }
        }

        result
    }
}

fn is_client_error(code: Code) -> bool {
    matches!(
        code,
        Code::Cancelled
            | Code::InvalidArgument
            | Code::NotFound
            | Code::AlreadyExists
            | Code::PermissionDenied
            | Code::Unauthenticated
            | Code::FailedPrecondition
            | Code::OutOfRange
    )
}

/// Turns panics below it into `internal` errors, including panics raised
/// while a server stream is being polled.
pub struct RecoveryInterceptor;

#[async_trait]
impl Interceptor for RecoveryInterceptor {
    async fn intercept(&self, call: RpcCall, next: Next<'_>) -> Result<RpcReply, Status> {
        let method = call.method().to_owned();

        match AssertUnwindSafe(next.run(call)).catch_unwind().await {
            Ok(Ok(RpcReply::Stream(stream))) => Ok(RpcReply::Stream(recover_stream(stream, method))),
            Ok(result) => result,
            Err(panic) => {
                error!("Panic in {}: {}", method, panic_message(panic.as_ref()));
                Err(Status::internal("internal error"))
            }
        }
    }
}

fn recover_stream(stream: ReplyStream, method: String) -> ReplyStream {
    Box::pin(async_stream::stream! {
        let mut stream = stream;
        loop {
            match AssertUnwindSafe(stream.next()).catch_unwind().await {
                Ok(Some(item)) => yield item,
                Ok(None) => break,
                Err(panic) => {
                    error!("Panic in {} stream: {}", method, panic_message(panic.as_ref()));
                    yield Err(Status::internal("internal error"));
                    break;
                }
            }
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Resolves credentials and applies the public-method policy
pub struct AuthInterceptor {
    pub authenticator: Authenticator,
    pub public: Arc<PublicMethodSet>,
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept(&self, mut call: RpcCall, next: Next<'_>) -> Result<RpcReply, Status> {
        let header = call
            .ctx
            .metadata
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        let result = tokio::select! {
            biased;
            _ = call.ctx.cancel.cancelled() => return Err(Status::cancelled("request cancelled")),
            result = self.authenticator.authenticate(&header) => result,
        };

        match authorize(result, call.ctx.method.as_deref(), &self.public) {
            Decision::Allow(auth) | Decision::Deferred(auth) => {
                debug!("{} authorized ({})", call.method(), auth.credential_kind());
                call.ctx.auth = auth;
                next.run(call).await
            }
            Decision::Reject(status) => Err(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{HttpBody, RpcService};
    use crate::store::{MemoryStore, Role, User};
    use chrono::Duration;
    use futures::stream;
    use parking_lot::Mutex;
    use serde_json::json;

    struct TestService;

    #[async_trait]
    impl RpcService for TestService {
        fn name(&self) -> &str {
            "memos.api.v1.TestService"
        }

        async fn call(&self, ctx: &RequestContext, method: &str, _request: Value) -> Result<RpcReply, Status> {
            match method {
                "Whoami" => Ok(RpcReply::Unary(json!({
                    "user": ctx.auth.username(),
                    "ip": ctx.client_ip,
                    "agent": ctx.metadata.get("user-agent").and_then(|v| v.to_str().ok()),
                }))),
                "Panic" | "PanicPrivate" => panic!("handler exploded"),
                "PanicStream" => {
                    let items = stream::iter(vec![Ok::<_, Status>(json!({"n": 1})), Ok(json!({"n": 2}))]).map(|item| {
                        if item.as_ref().map(|v| v["n"] == 2).unwrap_or(false) {
                            panic!("stream exploded");
                        }
                        item
                    });
                    Ok(RpcReply::Stream(items.boxed()))
                }
                "Blob" => Ok(RpcReply::Body(HttpBody {
                    content_type: "text/plain".into(),
                    data: "x".into(),
                })),
                _ => Err(Status::unimplemented(method.to_owned())),
            }
        }
    }

    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Interceptor for Record {
        async fn intercept(&self, call: RpcCall, next: Next<'_>) -> Result<RpcReply, Status> {
            self.log.lock().push(self.label);
            next.run(call).await
        }
    }

    fn public() -> Arc<PublicMethodSet> {
        Arc::new(PublicMethodSet::new(["/memos.api.v1.TestService/Panic", "/memos.api.v1.TestService/PanicStream"]))
    }

    fn chain() -> (InterceptorChain, Authenticator) {
        let registry = Arc::new(ServiceRegistry::new().with(Arc::new(TestService)));
        let authenticator = Authenticator::new(Arc::new(MemoryStore::new()), "chain-secret");
        (
            InterceptorChain::standard(registry, authenticator.clone(), public(), false),
            authenticator,
        )
    }

    fn call(method: &str, headers: HeaderMap) -> RpcCall {
        RpcCall {
            ctx: RequestContext::new(Some(method.to_owned()), Default::default()),
            headers,
            request: json!({}),
        }
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ServiceRegistry::new().with(Arc::new(TestService)));
        let chain = InterceptorChain::new(registry)
            .with(Record { label: "first", log: log.clone() })
            .with(Record { label: "second", log: log.clone() })
            .with(Record { label: "third", log: log.clone() });

        let result = chain.call(call("/memos.api.v1.TestService/Blob", HeaderMap::new())).await;
        assert!(matches!(result, Ok(RpcReply::Body(_))));
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_auth_rejects_anonymous_private_method() {
        let (chain, _) = chain();
        let status = chain
            .call(call("/memos.api.v1.TestService/Whoami", HeaderMap::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(status.message(), "authentication required");
    }

    #[tokio::test]
    async fn test_identity_and_metadata_reach_handler() {
        let (chain, authenticator) = chain();
        let token = authenticator
            .sign_access_token(&User::new(2, "grace", Role::User), Duration::hours(1))
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("user-agent", "tests/1.0".parse().unwrap());

        match chain.call(call("/memos.api.v1.TestService/Whoami", headers)).await {
            Ok(RpcReply::Unary(value)) => {
                assert_eq!(value["user"], "grace");
                assert_eq!(value["ip"], "203.0.113.7");
                assert_eq!(value["agent"], "tests/1.0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_panic_recovered() {
        let (chain, _) = chain();
        let status = chain
            .call(call("/memos.api.v1.TestService/Panic", HeaderMap::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_authenticated_panic_recovered() {
        let (chain, authenticator) = chain();
        let token = authenticator
            .sign_access_token(&User::new(2, "grace", Role::User), Duration::hours(1))
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());

        let status = chain
            .call(call("/memos.api.v1.TestService/PanicPrivate", headers))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);

        // Same method without credentials is turned away before the handler runs
        let status = chain
            .call(call("/memos.api.v1.TestService/PanicPrivate", HeaderMap::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn test_stream_panic_recovered() {
        let (chain, _) = chain();
        let reply = chain
            .call(call("/memos.api.v1.TestService/PanicStream", HeaderMap::new()))
            .await
            .unwrap();
        let RpcReply::Stream(stream) = reply else {
            panic!("expected stream");
        };

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &json!({"n": 1}));
        assert_eq!(items[1].as_ref().unwrap_err().code(), Code::Internal);
    }
}
