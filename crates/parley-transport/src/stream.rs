//! Server-sent progress events and their cancellable stream wrapper.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// One decoded progress notification for an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Step {
        #[serde(default)]
        label: Option<String>,
    },
    Done,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    /// Event types this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Parse the payload of one `data:` frame.
pub fn parse_event(data: &str) -> Result<ProgressEvent, TransportError> {
    serde_json::from_str(data).map_err(|e| TransportError::MalformedEvent(e.to_string()))
}

// =============================================================================
// SSE framing
// =============================================================================

/// Incremental `text/event-stream` decoder.
///
/// Bytes arrive in arbitrary chunks; complete events are returned as their
/// joined `data` payloads. Comment lines, `id:` and `retry:` are ignored,
/// and named events other than `message` are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the data payload of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = find_blank_line(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&frame[..end]);
            if let Some(data) = frame_data(&text) {
                payloads.push(data);
            }
        }
        payloads
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Data payload of one frame. Frames named anything other than `message`
/// (the server's `open` handshake, for one) are not progress messages.
fn frame_data(frame: &str) -> Option<String> {
    let mut data: Option<String> = None;
    let mut event: Option<&str> = None;
    for line in frame.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match data.as_mut() {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(rest);
                }
                None => data = Some(rest.to_string()),
            }
        }
    }
    match event {
        Some(name) if !name.is_empty() && name != "message" => None,
        _ => data,
    }
}

// =============================================================================
// Stream handle
// =============================================================================

/// Cloneable close switch for one progress stream.
///
/// Closing is idempotent and may happen from any task; the owning
/// [`ProgressStream`] yields nothing further once closed.
#[derive(Debug, Clone, Default)]
pub struct StreamHandle {
    token: CancellationToken,
}

impl StreamHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProgressEvent, TransportError>> + Send>>;

/// An open progress subscription.
pub struct ProgressStream {
    inner: Option<EventStream>,
    handle: StreamHandle,
}

impl ProgressStream {
    pub fn new<S>(events: S) -> Self
    where
        S: Stream<Item = Result<ProgressEvent, TransportError>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(events)),
            handle: StreamHandle::new(),
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none() || self.handle.is_closed()
    }

    /// Close the stream and drop the underlying connection.
    pub fn close(&mut self) {
        self.handle.close();
        self.inner = None;
    }

    /// Next event, or `None` once the stream ended or was closed.
    pub async fn next_event(&mut self) -> Option<Result<ProgressEvent, TransportError>> {
        let Self { inner, handle } = self;
        let stream = inner.as_mut()?;
        if handle.is_closed() {
            *inner = None;
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = handle.token.cancelled() => None,
            item = stream.next() => item,
        };
        if next.is_none() {
            *inner = None;
        }
        next
    }
}

impl std::fmt::Debug for ProgressStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}
