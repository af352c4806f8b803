//! REST/JSON bridge routing.
//!
//! Maps HTTP method + path onto fully-qualified RPC methods, the way
//! grpc-gateway does from `google.api.http` annotations. The first matching
//! route wins, so routes with a custom verb are listed before the plain
//! variable route they would otherwise shadow.

pub mod template;

pub use template::{PathTemplate, TemplateError};

use axum::http::Method;
use serde_json::{Map, Value};
use tonic::Status;

use crate::rpc::full_method;

/// How the HTTP body maps into the request message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyRule {
    NoBody,
    /// `body: "*"`, the whole body is the request
    All,
    /// `body: "<field>"`
    Field(String),
}

#[derive(Debug, Clone)]
pub struct GatewayRoute {
    pub method: Method,
    pub template: PathTemplate,
    /// Fully-qualified RPC method
    pub rpc: String,
    pub body: BodyRule,
}

/// A route match, with path bindings
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    pub rpc: String,
    pub body: BodyRule,
    pub bindings: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<GatewayRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, method: Method, template: &str, service: &str, rpc: &str, body: BodyRule) -> Result<(), TemplateError> {
        self.routes.push(GatewayRoute {
            method,
            template: PathTemplate::parse(template)?,
            rpc: full_method(service, rpc),
            body,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn match_route(&self, method: &Method, path: &str) -> Option<MatchedRoute> {
        self.routes
            .iter()
            .filter(|r| &r.method == method)
            .find_map(|r| {
                r.template.matches(path).map(|bindings| MatchedRoute {
                    rpc: r.rpc.clone(),
                    body: r.body.clone(),
                    bindings,
                })
            })
    }

    /// Routes of the memos v1 API
    pub fn standard() -> Result<Self, TemplateError> {
        use BodyRule::{All, NoBody};
        let field = |f: &str| BodyRule::Field(f.to_owned());
        let (get, post, patch, delete) = (Method::GET, Method::POST, Method::PATCH, Method::DELETE);

        let mut t = Self::new();

        t.add(get.clone(), "/api/v1/instance/profile", "InstanceService", "GetInstanceProfile", NoBody)?;
        t.add(get.clone(), "/api/v1/{name=instance/settings/*}", "InstanceService", "GetInstanceSetting", NoBody)?;
        t.add(patch.clone(), "/api/v1/{setting.name=instance/settings/*}", "InstanceService", "UpdateInstanceSetting", field("setting"))?;

        t.add(post.clone(), "/api/v1/auth/sessions", "AuthService", "CreateSession", All)?;
        t.add(get.clone(), "/api/v1/auth/sessions/current", "AuthService", "GetCurrentSession", NoBody)?;
        t.add(delete.clone(), "/api/v1/auth/sessions/current", "AuthService", "DeleteSession", NoBody)?;
        t.add(post.clone(), "/api/v1/auth/refresh", "AuthService", "RefreshToken", All)?;

        t.add(get.clone(), "/api/v1/users:search", "UserService", "SearchUsers", NoBody)?;
        t.add(get.clone(), "/api/v1/users:stats", "UserService", "ListAllUserStats", NoBody)?;
        t.add(get.clone(), "/api/v1/{name=users/*}:getStats", "UserService", "GetUserStats", NoBody)?;
        t.add(get.clone(), "/api/v1/users", "UserService", "ListUsers", NoBody)?;
        t.add(post.clone(), "/api/v1/users", "UserService", "CreateUser", field("user"))?;
        t.add(get.clone(), "/api/v1/{name=users/*}", "UserService", "GetUser", NoBody)?;
        t.add(patch.clone(), "/api/v1/{user.name=users/*}", "UserService", "UpdateUser", field("user"))?;
        t.add(delete.clone(), "/api/v1/{name=users/*}", "UserService", "DeleteUser", NoBody)?;
        t.add(get.clone(), "/api/v1/{name=users/*}/avatar", "UserService", "GetUserAvatar", NoBody)?;
        t.add(get.clone(), "/api/v1/{parent=users/*}/accessTokens", "UserService", "ListUserAccessTokens", NoBody)?;
        t.add(post.clone(), "/api/v1/{parent=users/*}/accessTokens", "UserService", "CreateUserAccessToken", field("access_token"))?;
        t.add(delete.clone(), "/api/v1/{name=users/*/accessTokens/*}", "UserService", "DeleteUserAccessToken", NoBody)?;

        t.add(get.clone(), "/api/v1/{parent=users/*}/shortcuts", "ShortcutService", "ListShortcuts", NoBody)?;
        t.add(post.clone(), "/api/v1/{parent=users/*}/shortcuts", "ShortcutService", "CreateShortcut", field("shortcut"))?;
        t.add(get.clone(), "/api/v1/{name=users/*/shortcuts/*}", "ShortcutService", "GetShortcut", NoBody)?;
        t.add(patch.clone(), "/api/v1/{shortcut.name=users/*/shortcuts/*}", "ShortcutService", "UpdateShortcut", field("shortcut"))?;
        t.add(delete.clone(), "/api/v1/{name=users/*/shortcuts/*}", "ShortcutService", "DeleteShortcut", NoBody)?;

        t.add(get.clone(), "/api/v1/memos", "MemoService", "ListMemos", NoBody)?;
        t.add(post.clone(), "/api/v1/memos", "MemoService", "CreateMemo", field("memo"))?;
        t.add(get.clone(), "/api/v1/{name=memos/*}", "MemoService", "GetMemo", NoBody)?;
        t.add(patch.clone(), "/api/v1/{memo.name=memos/*}", "MemoService", "UpdateMemo", field("memo"))?;
        t.add(delete.clone(), "/api/v1/{name=memos/*}", "MemoService", "DeleteMemo", NoBody)?;
        t.add(get.clone(), "/api/v1/{name=memos/*}/comments", "MemoService", "ListMemoComments", NoBody)?;
        t.add(post.clone(), "/api/v1/{name=memos/*}/comments", "MemoService", "CreateMemoComment", field("comment"))?;
        t.add(get.clone(), "/api/v1/{name=memos/*}/reactions", "MemoService", "ListMemoReactions", NoBody)?;
        t.add(post.clone(), "/api/v1/{name=memos/*}/reactions", "MemoService", "UpsertMemoReaction", All)?;
        t.add(get.clone(), "/api/v1/{name=memos/*}/attachments", "MemoService", "ListMemoAttachments", NoBody)?;
        t.add(patch.clone(), "/api/v1/{name=memos/*}/attachments", "MemoService", "SetMemoAttachments", All)?;
        t.add(get.clone(), "/api/v1/{name=memos/*}/relations", "MemoService", "ListMemoRelations", NoBody)?;
        t.add(patch.clone(), "/api/v1/{name=memos/*}/relations", "MemoService", "SetMemoRelations", All)?;

        t.add(get.clone(), "/api/v1/attachments", "AttachmentService", "ListAttachments", NoBody)?;
        t.add(post.clone(), "/api/v1/attachments", "AttachmentService", "CreateAttachment", field("attachment"))?;
        t.add(get.clone(), "/api/v1/{name=attachments/*}", "AttachmentService", "GetAttachment", NoBody)?;
        t.add(patch.clone(), "/api/v1/{attachment.name=attachments/*}", "AttachmentService", "UpdateAttachment", field("attachment"))?;
        t.add(delete.clone(), "/api/v1/{name=attachments/*}", "AttachmentService", "DeleteAttachment", NoBody)?;
        t.add(get.clone(), "/file/{name=attachments/*}/{filename}", "AttachmentService", "GetAttachmentBinary", NoBody)?;

        t.add(get.clone(), "/api/v1/activities", "ActivityService", "ListActivities", NoBody)?;
        t.add(get.clone(), "/api/v1/{name=activities/*}", "ActivityService", "GetActivity", NoBody)?;

        t.add(get.clone(), "/api/v1/identityProviders", "IdentityProviderService", "ListIdentityProviders", NoBody)?;
        t.add(post.clone(), "/api/v1/identityProviders", "IdentityProviderService", "CreateIdentityProvider", field("identity_provider"))?;
        t.add(get.clone(), "/api/v1/{name=identityProviders/*}", "IdentityProviderService", "GetIdentityProvider", NoBody)?;
        t.add(
            patch,
            "/api/v1/{identity_provider.name=identityProviders/*}",
            "IdentityProviderService",
            "UpdateIdentityProvider",
            field("identity_provider"),
        )?;
        t.add(delete, "/api/v1/{name=identityProviders/*}", "IdentityProviderService", "DeleteIdentityProvider", NoBody)?;

        t.add(post, "/api/v1/chat", "ChatService", "Chat", All)?;

        Ok(t)
    }
}

/// Assemble the JSON request message for a matched route.
///
/// Query parameters apply only when the body does not already fill the
/// whole message; path bindings always win.
pub fn build_request(matched: &MatchedRoute, query: Option<&str>, body: &[u8]) -> Result<Value, Status> {
    let mut request = Value::Object(Map::new());

    match &matched.body {
        BodyRule::NoBody => {}
        BodyRule::All => {
            if !body.is_empty() {
                request = parse_body(body)?;
                if !request.is_object() {
                    return Err(Status::invalid_argument("request body must be a JSON object"));
                }
            }
        }
        BodyRule::Field(field) => {
            if !body.is_empty() {
                set_path(&mut request, field, parse_body(body)?);
            }
        }
    }

    if matched.body != BodyRule::All {
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
                .map_err(|e| Status::invalid_argument(format!("invalid query string: {e}")))?;
            for (key, value) in pairs {
                append_path(&mut request, &key, Value::String(value));
            }
        }
    }

    for (field, value) in &matched.bindings {
        set_path(&mut request, field, Value::String(value.clone()));
    }

    Ok(request)
}

fn parse_body(body: &[u8]) -> Result<Value, Status> {
    serde_json::from_slice(body).map_err(|e| Status::invalid_argument(format!("invalid JSON body: {e}")))
}

fn object_at<'a>(root: &'a mut Value, path: &[&str]) -> &'a mut Map<String, Value> {
    let mut current = root;
    for key in path {
        current = ensure_object(current)
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current)
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Set a dotted field path, creating intermediate objects
fn set_path(root: &mut Value, path: &str, value: Value) {
    let keys: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    object_at(root, parents).insert(last.to_string(), value);
}

/// Like [`set_path`], but a repeated key turns into an array
fn append_path(root: &mut Value, path: &str, value: Value) {
    let keys: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let map = object_at(root, parents);
    match map.get_mut(*last) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(last.to_string(), value);
        }
    }
}
