//! Services reachable through both transports.
//!
//! Only the methods the gateway itself can answer are implemented here; the
//! rest of the memos API answers `unimplemented` until a backend is wired in.

mod attachment;
mod auth;
mod chat;
mod instance;

pub use attachment::AttachmentService;
pub use auth::AuthService;
pub use chat::ChatService;
pub use instance::InstanceService;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tonic::Status;

use crate::chat::ChatProvider;
use crate::config::Mode;
use crate::rpc::{RequestContext, RpcReply, RpcService, ServiceRegistry, API_PACKAGE};
use crate::store::Store;
use crate::thumbnail::Thumbnailer;

/// Services without a local implementation
const UNIMPLEMENTED_SERVICES: &[&str] = &[
    "UserService",
    "MemoService",
    "ShortcutService",
    "ActivityService",
    "IdentityProviderService",
];

/// Answers `unimplemented` for every method
pub struct UnimplementedService {
    name: String,
}

impl UnimplementedService {
    pub fn new(service: &str) -> Self {
        Self {
            name: format!("{API_PACKAGE}.{service}"),
        }
    }
}

#[async_trait]
impl RpcService for UnimplementedService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _ctx: &RequestContext, method: &str, _request: Value) -> Result<RpcReply, Status> {
        Err(unimplemented(&self.name, method))
    }
}

pub(crate) fn unimplemented(service: &str, method: &str) -> Status {
    Status::unimplemented(format!("method {method} not implemented on {service}"))
}

/// Registry with every routed service
pub fn default_registry(
    mode: Mode,
    store: Arc<dyn Store>,
    chat: Arc<dyn ChatProvider>,
    thumbnailer: Thumbnailer,
) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new()
        .with(Arc::new(InstanceService::new(mode)))
        .with(Arc::new(AuthService))
        .with(Arc::new(ChatService::new(chat)))
        .with(Arc::new(AttachmentService::new(store, thumbnailer)));

    for service in UNIMPLEMENTED_SERVICES {
        registry.register(Arc::new(UnimplementedService::new(service)));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tonic::Code;

    #[tokio::test]
    async fn test_unimplemented_service() {
        let service = UnimplementedService::new("MemoService");
        assert_eq!(service.name(), "memos.api.v1.MemoService");

        let status = service
            .call(&RequestContext::default(), "ListMemos", json!({}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
        assert!(status.message().contains("ListMemos"));
    }
}
