//! Streaming chat relay.
//!
//! [`relay`] pulls text fragments from a [`ChatProvider`] and hands each
//! non-empty one to a [`ChunkSink`] as a [`StreamChunk`], in upstream order.
//! The same relay backs the dedicated NDJSON route and the Connect
//! server-stream; the two differ only in their sink.

pub mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, error};

/// One incremental piece of generated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: "text".to_owned(),
        }
    }
}

/// Body of a chat request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("chat provider not configured: {0}")]
    NotConfigured(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Stream(String),
}

pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

/// Upstream chat-completion service
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a streaming completion for `message`
    async fn stream(&self, message: &str) -> Result<FragmentStream, ProviderError>;
}

#[derive(Error, Debug)]
pub enum EmitError {
    /// The receiving side went away
    #[error("stream closed by peer")]
    Closed,

    #[error("emit failed: {0}")]
    Failed(Status),
}

/// Where relayed chunks go
#[async_trait]
pub trait ChunkSink: Send {
    async fn emit(&mut self, chunk: StreamChunk) -> Result<(), EmitError>;
}

#[async_trait]
impl ChunkSink for mpsc::Sender<StreamChunk> {
    async fn emit(&mut self, chunk: StreamChunk) -> Result<(), EmitError> {
        self.send(chunk).await.map_err(|_| EmitError::Closed)
    }
}

#[async_trait]
impl ChunkSink for mpsc::Sender<Result<StreamChunk, Status>> {
    async fn emit(&mut self, chunk: StreamChunk) -> Result<(), EmitError> {
        self.send(Ok(chunk)).await.map_err(|_| EmitError::Closed)
    }
}

/// Relay one chat completion from `provider` into `sink`.
///
/// Returns `Ok(())` when upstream finishes, the sink closes, or `cancel`
/// fires. The upstream stream is dropped on every exit path.
pub async fn relay<S>(
    cancel: &CancellationToken,
    provider: &dyn ChatProvider,
    message: &str,
    sink: &mut S,
) -> Result<(), Status>
where
    S: ChunkSink + ?Sized,
{
    let mut fragments = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Chat relay cancelled before upstream opened");
            return Ok(());
        }
        opened = provider.stream(message) => opened.map_err(open_status)?,
    };

    let mut relayed = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Chat relay cancelled after {} chunks", relayed);
                return Ok(());
            }
            next = fragments.next() => next,
        };

        match next {
            None => {
                debug!("Upstream finished after {} chunks", relayed);
                return Ok(());
            }
            Some(Ok(fragment)) if fragment.is_empty() => continue,
            Some(Ok(fragment)) => match sink.emit(StreamChunk::text(fragment)).await {
                Ok(()) => relayed += 1,
                Err(EmitError::Closed) => {
                    debug!("Client disconnected, stopping relay after {} chunks", relayed);
                    return Ok(());
                }
                Err(EmitError::Failed(status)) => return Err(status),
            },
            Some(Err(e)) => {
                error!("Upstream stream error after {} chunks: {}", relayed, e);
                return Err(Status::internal(format!("upstream stream error: {e}")));
            }
        }
    }
}

fn open_status(err: ProviderError) -> Status {
    match err {
        ProviderError::NotConfigured(msg) => Status::failed_precondition(msg),
        other => {
            error!("Failed to open upstream stream: {}", other);
            Status::internal(format!("failed to open upstream stream: {other}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tonic::Code;

    struct Scripted {
        fragments: Vec<Result<&'static str, &'static str>>,
        reads: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(fragments: Vec<Result<&'static str, &'static str>>) -> Self {
            Self {
                fragments,
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for Scripted {
        async fn stream(&self, _message: &str) -> Result<FragmentStream, ProviderError> {
            let reads = self.reads.clone();
            let items: Vec<_> = self
                .fragments
                .iter()
                .map(|f| f.map(str::to_owned).map_err(|e| ProviderError::Stream(e.to_owned())))
                .collect();
            Ok(stream::iter(items)
                .inspect(move |_| {
                    reads.fetch_add(1, Ordering::SeqCst);
                })
                .boxed())
        }
    }

    struct Pending;

    #[async_trait]
    impl ChatProvider for Pending {
        async fn stream(&self, _message: &str) -> Result<FragmentStream, ProviderError> {
            Ok(stream::pending().boxed())
        }
    }

    struct Unconfigured;

    #[async_trait]
    impl ChatProvider for Unconfigured {
        async fn stream(&self, _message: &str) -> Result<FragmentStream, ProviderError> {
            Err(ProviderError::NotConfigured("OPENAI_API_KEY is not set".into()))
        }
    }

    #[derive(Default)]
    struct Collect(Vec<StreamChunk>);

    #[async_trait]
    impl ChunkSink for Collect {
        async fn emit(&mut self, chunk: StreamChunk) -> Result<(), EmitError> {
            self.0.push(chunk);
            Ok(())
        }
    }

    struct Gone;

    #[async_trait]
    impl ChunkSink for Gone {
        async fn emit(&mut self, _chunk: StreamChunk) -> Result<(), EmitError> {
            Err(EmitError::Closed)
        }
    }

    #[tokio::test]
    async fn test_chunks_in_order_empty_skipped() {
        let provider = Scripted::new(vec![Ok("Hello"), Ok(""), Ok(" world")]);
        let mut sink = Collect::default();

        relay(&CancellationToken::new(), &provider, "hi", &mut sink).await.unwrap();

        assert_eq!(sink.0, vec![StreamChunk::text("Hello"), StreamChunk::text(" world")]);
    }

    #[tokio::test]
    async fn test_disconnect_stops_reading() {
        let provider = Scripted::new(vec![Ok("a"), Ok("b"), Ok("c")]);
        let reads = provider.reads.clone();

        let result = relay(&CancellationToken::new(), &provider, "hi", &mut Gone).await;

        assert!(result.is_ok());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_after_first_chunk() {
        let provider = Scripted::new(vec![Ok("partial"), Err("connection reset"), Ok("never")]);
        let mut sink = Collect::default();

        let status = relay(&CancellationToken::new(), &provider, "hi", &mut sink)
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "upstream stream error: connection reset");
        assert_eq!(sink.0, vec![StreamChunk::text("partial")]);
    }

    #[tokio::test]
    async fn test_cancel_during_upstream_read() {
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { relay(&cancel, &Pending, "hi", &mut Collect::default()).await })
        };

        tokio::task::yield_now().await;
        cancel.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("relay did not stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let status = relay(&CancellationToken::new(), &Unconfigured, "hi", &mut Collect::default())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed() {
        let (mut tx, rx) = mpsc::channel::<StreamChunk>(1);
        drop(rx);
        assert!(matches!(tx.emit(StreamChunk::text("x")).await, Err(EmitError::Closed)));
    }

    #[test]
    fn test_chunk_wire_shape() {
        let json = serde_json::to_string(&StreamChunk::text("hi")).unwrap();
        assert_eq!(json, r#"{"content":"hi","type":"text"}"#);
    }
}
