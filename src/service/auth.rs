use async_trait::async_trait;
use serde_json::{json, Value};
use tonic::Status;

use super::unimplemented;
use crate::auth::AuthenticationResult;
use crate::rpc::{RequestContext, RpcReply, RpcService};

/// Session introspection
pub struct AuthService;

#[async_trait]
impl RpcService for AuthService {
    fn name(&self) -> &str {
        "memos.api.v1.AuthService"
    }

    async fn call(&self, ctx: &RequestContext, method: &str, _request: Value) -> Result<RpcReply, Status> {
        match method {
            "GetCurrentSession" => current_session(&ctx.auth).map(RpcReply::Unary),
            other => Err(unimplemented(self.name(), other)),
        }
    }
}

fn current_session(auth: &AuthenticationResult) -> Result<Value, Status> {
    let (Some(id), Some(username), Some(role)) = (auth.user_id(), auth.username(), auth.role()) else {
        return Err(Status::unauthenticated("user not found"));
    };

    Ok(json!({
        "user": {
            "name": format!("users/{id}"),
            "username": username,
            "role": role.as_str(),
        },
        "credential": auth.credential_kind(),
    }))
}
