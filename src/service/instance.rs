use async_trait::async_trait;
use serde_json::{json, Value};
use tonic::Status;

use super::unimplemented;
use crate::config::Mode;
use crate::rpc::{RequestContext, RpcReply, RpcService};

pub struct InstanceService {
    mode: Mode,
}

impl InstanceService {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl RpcService for InstanceService {
    fn name(&self) -> &str {
        "memos.api.v1.InstanceService"
    }

    async fn call(&self, _ctx: &RequestContext, method: &str, _request: Value) -> Result<RpcReply, Status> {
        match method {
            "GetInstanceProfile" => Ok(RpcReply::Unary(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "mode": self.mode.as_str(),
            }))),
            other => Err(unimplemented(self.name(), other)),
        }
    }
}
