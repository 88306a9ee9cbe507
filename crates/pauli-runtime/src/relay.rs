//! Copies engine output streams to host streams.
//!
//! Each relay runs as its own task until the source closes. A failing relay
//! is logged and reported, never fatal: the completion signal comes from the
//! watcher, not from the relay.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::backend::{ChunkStream, StreamOrigin};

/// Destination of relayed bytes.
#[derive(Debug, Clone)]
pub enum Sink {
    /// The process's standard output.
    Stdout,
    /// The process's standard error.
    Stderr,
    /// An in-memory buffer shared with the caller.
    Capture(Arc<Mutex<Vec<u8>>>),
}

impl Sink {
    /// Creates a capture sink and returns it with its buffer.
    #[must_use]
    pub fn capture() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (Self::Capture(Arc::clone(&buffer)), buffer)
    }

    pub(crate) fn writer(&self) -> Box<dyn AsyncWrite + Send + Unpin> {
        match self {
            Self::Stdout => Box::new(tokio::io::stdout()),
            Self::Stderr => Box::new(tokio::io::stderr()),
            Self::Capture(buffer) => Box::new(CaptureWriter(Arc::clone(buffer))),
        }
    }
}

/// Host destinations for the two output channels.
#[derive(Debug, Clone)]
pub struct Sinks {
    /// Receives stdout and pseudo-terminal output.
    pub out: Sink,
    /// Receives stderr output.
    pub err: Sink,
}

impl Default for Sinks {
    fn default() -> Self {
        Self {
            out: Sink::Stdout,
            err: Sink::Stderr,
        }
    }
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// What a relay did before its source closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Bytes copied to the host.
    pub bytes: u64,
    /// Failure that ended the relay early, if any.
    pub failure: Option<String>,
}

impl RelayReport {
    /// Returns whether the source closed without error.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Copies a stream to the host until it closes.
pub async fn relay(label: &str, mut stream: ChunkStream, sinks: &Sinks) -> RelayReport {
    let mut out = sinks.out.writer();
    let mut err = sinks.err.writer();
    let mut report = RelayReport::default();

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(stream = label, error = %e, "stream relay interrupted, output may be incomplete");
                report.failure = Some(e.to_string());
                break;
            }
        };
        let writer = match chunk.origin {
            StreamOrigin::Stderr => &mut err,
            StreamOrigin::Stdout | StreamOrigin::Console => &mut out,
        };
        let written = async {
            writer.write_all(&chunk.bytes).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!(stream = label, error = %e, "cannot write relayed output");
            report.failure = Some(e.to_string());
            break;
        }
        report.bytes += chunk.bytes.len() as u64;
    }

    tracing::trace!(stream = label, bytes = report.bytes, "stream relay finished");
    report
}

/// Spawns [`relay`] as an independent task.
#[must_use]
pub fn spawn(label: &'static str, stream: ChunkStream, sinks: Sinks) -> JoinHandle<RelayReport> {
    tokio::spawn(async move { relay(label, stream, &sinks).await })
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::backend::{EngineError, EngineResult, OutputChunk};

    fn captured(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
    }

    #[tokio::test]
    async fn relays_chunks_by_origin() {
        let (out, out_buf) = Sink::capture();
        let (err, err_buf) = Sink::capture();
        let source: ChunkStream = Box::pin(stream::iter(vec![
            Ok(OutputChunk::console("hello ")),
            Ok(OutputChunk {
                origin: StreamOrigin::Stderr,
                bytes: b"warning".to_vec(),
            }),
            Ok(OutputChunk {
                origin: StreamOrigin::Stdout,
                bytes: b"world".to_vec(),
            }),
        ]));
        let report = relay("exec", source, &Sinks { out, err }).await;
        assert!(report.is_complete());
        assert_eq!(report.bytes, 18);
        assert_eq!(captured(&out_buf), "hello world");
        assert_eq!(captured(&err_buf), "warning");
    }

    #[tokio::test]
    async fn stream_failure_is_reported_not_propagated() {
        let (out, out_buf) = Sink::capture();
        let source: ChunkStream = Box::pin(stream::iter(vec![
            Ok(OutputChunk::console("partial")),
            Err(EngineError::Fatal("broken pipe".into())),
            Ok(OutputChunk::console("never")),
        ]));
        let report = spawn("exec", source, Sinks { out, err: Sink::Stderr })
            .await
            .unwrap();
        assert_eq!(report.failure.as_deref(), Some("broken pipe"));
        assert_eq!(captured(&out_buf), "partial");
    }

    #[tokio::test]
    async fn empty_stream_completes() {
        let (out, _) = Sink::capture();
        let source: ChunkStream = Box::pin(stream::iter(Vec::<EngineResult<OutputChunk>>::new()));
        let report = relay("logs", source, &Sinks { out, err: Sink::Stderr }).await;
        assert_eq!(report, RelayReport::default());
    }
}
