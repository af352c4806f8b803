use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tracing::debug;

use super::unimplemented;
use crate::chat::{relay, ChatProvider, ChatRequest, StreamChunk};
use crate::rpc::{RequestContext, RpcReply, RpcService};

/// Chunks buffered between the relay task and the response writer
const CHUNK_BUFFER: usize = 32;

/// Server-streaming chat relay
pub struct ChatService {
    provider: Arc<dyn ChatProvider>,
}

impl ChatService {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl RpcService for ChatService {
    fn name(&self) -> &str {
        "memos.api.v1.ChatService"
    }

    async fn call(&self, ctx: &RequestContext, method: &str, request: Value) -> Result<RpcReply, Status> {
        if method != "Chat" {
            return Err(unimplemented(self.name(), method));
        }

        let request: ChatRequest = serde_json::from_value(request)
            .map_err(|e| Status::invalid_argument(format!("invalid chat request: {e}")))?;

        let (mut tx, rx) = mpsc::channel::<Result<StreamChunk, Status>>(CHUNK_BUFFER);
        let cancel = ctx.cancel.child_token();
        let provider = self.provider.clone();

        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(status) = relay(&cancel, provider.as_ref(), &request.message, &mut tx).await {
                    // receiver may already be gone
                    let _ = tx.send(Err(status)).await;
                }
                debug!("Chat relay task finished");
            });
        }

        // Dropping the response stream stops the relay even mid-read
        let guard = cancel.drop_guard();
        let stream = ReceiverStream::new(rx).map(move |item| {
            let _ = &guard;
            item.and_then(|chunk| {
                serde_json::to_value(chunk).map_err(|e| Status::internal(format!("failed to encode chunk: {e}")))
            })
        });

        Ok(RpcReply::Stream(stream.boxed()))
    }
}
