use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tonic::Status;
use tracing::warn;

use super::unimplemented;
use crate::auth::AuthenticationResult;
use crate::error::Error;
use crate::rpc::{HttpBody, RequestContext, RpcReply, RpcService};
use crate::store::{Attachment, Store, Visibility};
use crate::thumbnail::{ThumbnailError, Thumbnailer};

/// Attachment downloads
///
/// `GetAttachmentBinary` is a public method, so the caller may be anonymous;
/// visibility of the attachment itself is checked here.
pub struct AttachmentService {
    store: Arc<dyn Store>,
    thumbnailer: Thumbnailer,
}

impl AttachmentService {
    pub fn new(store: Arc<dyn Store>, thumbnailer: Thumbnailer) -> Self {
        Self { store, thumbnailer }
    }

    async fn get_binary(&self, ctx: &RequestContext, request: Value) -> Result<RpcReply, Status> {
        let name = request["name"]
            .as_str()
            .filter(|n| n.starts_with("attachments/"))
            .ok_or_else(|| Status::invalid_argument("invalid attachment name"))?;

        let attachment = self
            .store
            .get_attachment(name)
            .await
            .map_err(|e| Status::from(Error::Store(e)))?
            .ok_or_else(|| Status::not_found("attachment not found"))?;

        check_visibility(&attachment, &ctx.auth)?;

        if wants_thumbnail(&request["thumbnail"]) && Thumbnailer::supports(&attachment.mime_type) {
            match self
                .thumbnailer
                .generate(attachment.blob.clone(), &attachment.mime_type, &ctx.cancel)
                .await
            {
                Ok(thumb) => {
                    return Ok(RpcReply::Body(HttpBody {
                        content_type: thumb.mime_type,
                        data: thumb.data,
                    }))
                }
                Err(ThumbnailError::Guard(e)) => return Err(Status::cancelled(e.to_string())),
                Err(e) => warn!("Serving original for {}: {}", attachment.name, e),
            }
        }

        Ok(RpcReply::Body(HttpBody {
            content_type: attachment.mime_type,
            data: attachment.blob,
        }))
    }
}

#[async_trait]
impl RpcService for AttachmentService {
    fn name(&self) -> &str {
        "memos.api.v1.AttachmentService"
    }

    async fn call(&self, ctx: &RequestContext, method: &str, request: Value) -> Result<RpcReply, Status> {
        match method {
            "GetAttachmentBinary" => self.get_binary(ctx, request).await,
            other => Err(unimplemented(self.name(), other)),
        }
    }
}

fn check_visibility(attachment: &Attachment, auth: &AuthenticationResult) -> Result<(), Status> {
    match attachment.visibility {
        Visibility::Public => Ok(()),
        Visibility::Protected if auth.is_authenticated() => Ok(()),
        Visibility::Private if auth.user_id() == Some(attachment.creator_id) => Ok(()),
        Visibility::Private if auth.is_authenticated() => Err(Status::permission_denied("permission denied")),
        _ => Err(Status::unauthenticated("unauthorized access")),
    }
}

/// Query values arrive as strings, JSON bodies may carry a real bool
fn wants_thumbnail(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "true" | "1"),
        _ => false,
    }
}
