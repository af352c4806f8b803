//! Shared fixtures for the HTTP-level tests
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use chrono::Duration;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;

use memos_gateway::auth::Authenticator;
use memos_gateway::chat::{ChatProvider, FragmentStream, ProviderError};
use memos_gateway::config::{Args, GatewayConfig};
use memos_gateway::server::{create_app, ServerState};
use memos_gateway::store::{Attachment, MemoryStore, Role, Store, TokenFile, User, Visibility};

pub const SECRET: &str = "integration-test-secret";

pub const UNAUTHENTICATED_BODY: &str = r#"{"code": 16, "message": "authentication required"}"#;

/// Replays a fixed list of fragments; `Err` entries become upstream errors
pub struct ScriptedProvider {
    items: Vec<Result<&'static str, &'static str>>,
}

impl ScriptedProvider {
    pub fn new(items: Vec<Result<&'static str, &'static str>>) -> Self {
        Self { items }
    }

    pub fn hello() -> Self {
        Self::new(vec![Ok("Hel"), Ok(""), Ok("lo")])
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn stream(&self, _message: &str) -> Result<FragmentStream, ProviderError> {
        let items: Vec<Result<String, ProviderError>> = self
            .items
            .iter()
            .map(|i| i.map(str::to_owned).map_err(|e| ProviderError::Stream(e.to_owned())))
            .collect();
        Ok(stream::iter(items).boxed())
    }
}

pub struct TestApp {
    pub app: Router,
    /// Personal access token of alice (id 1, USER)
    pub pat: String,
    /// Access token of bob (id 2, ADMIN)
    pub jwt: String,
}

pub async fn test_app(provider: impl ChatProvider + 'static) -> TestApp {
    let mut config = GatewayConfig::load(&Args::default()).unwrap();
    config.auth.secret = SECRET.to_owned();
    config.server.request_timeout_secs = 0;

    let alice = User::new(1, "alice", Role::User);
    let bob = User::new(2, "bob", Role::Admin);

    let mut tokens = TokenFile::in_memory();
    let pat = tokens.create(&alice, "tests", None).await.unwrap();

    let store = MemoryStore::from_token_file(&tokens);
    store.insert_user(bob.clone());
    for (name, visibility) in [
        ("attachments/pub", Visibility::Public),
        ("attachments/priv", Visibility::Private),
    ] {
        store.insert_attachment(Attachment {
            name: name.to_owned(),
            filename: "note.txt".to_owned(),
            mime_type: "text/plain".to_owned(),
            creator_id: alice.id,
            visibility,
            blob: Bytes::from_static(b"hello"),
        });
    }
    let store: Arc<dyn Store> = Arc::new(store);

    let jwt = Authenticator::new(store.clone(), SECRET)
        .sign_access_token(&bob, Duration::hours(1))
        .unwrap();

    let state = ServerState::new(config, store, Arc::new(provider)).unwrap();
    TestApp {
        app: create_app(state),
        pat,
        jwt,
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, content_type: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(body.into()).unwrap()
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    request(Method::GET, uri, token, None, Body::empty())
}

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Parse newline-delimited JSON
pub async fn body_lines(response: Response) -> Vec<Value> {
    let bytes = body_bytes(response).await;
    std::str::from_utf8(&bytes)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}
