use std::collections::HashMap;

use parley_core::types::CorrelationId;
use parley_transport::StreamHandle;

/// Lifecycle of one in-flight send: `Opening -> Streaming -> Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Progress stream requested, not yet open.
    Opening,
    /// Stream open, or known to be unavailable.
    Streaming,
    /// Primary request finished; nothing further is applied.
    Resolved,
}

/// Which source resolved the placeholder first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    StreamDone,
    StreamError(String),
    Response,
    Failed(String),
    /// A newer send removed the placeholder.
    Superseded,
    /// History replaced the timeline while the request was in flight.
    Discarded,
}

/// Ephemeral bookkeeping for one send, keyed by its correlation id.
#[derive(Debug)]
pub struct PendingRequest {
    correlation_id: CorrelationId,
    phase: RequestPhase,
    stream: Option<StreamHandle>,
    outcome: Option<Resolution>,
}

impl PendingRequest {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            phase: RequestPhase::Opening,
            stream: None,
            outcome: None,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<&Resolution> {
        self.outcome.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Record the open stream. Ignored once resolved.
    pub fn attach_stream(&mut self, handle: StreamHandle) -> bool {
        if self.phase != RequestPhase::Opening || self.is_settled() {
            return false;
        }
        self.stream = Some(handle);
        self.phase = RequestPhase::Streaming;
        true
    }

    /// The stream could not be opened; the request proceeds without it.
    pub fn stream_unavailable(&mut self) -> bool {
        if self.phase != RequestPhase::Opening {
            return false;
        }
        self.phase = RequestPhase::Streaming;
        true
    }

    /// Fill the outcome slot. Only the first resolver wins.
    pub fn resolve(&mut self, resolution: Resolution) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(resolution);
        true
    }

    /// Primary request finished: enter `Resolved` and release the stream.
    pub fn finish(&mut self) {
        self.phase = RequestPhase::Resolved;
        self.close_stream();
    }

    /// Idempotent.
    pub fn close_stream(&mut self) {
        if let Some(handle) = self.stream.take() {
            handle.close();
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.close_stream();
    }
}

/// All in-flight sends of one session.
#[derive(Debug, Default)]
pub struct PendingRequests {
    requests: HashMap<CorrelationId, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: PendingRequest) {
        if let Some(mut previous) = self.requests.insert(request.correlation_id, request) {
            previous.close_stream();
        }
    }

    pub fn get(&self, id: &CorrelationId) -> Option<&PendingRequest> {
        self.requests.get(id)
    }

    pub fn get_mut(&mut self, id: &CorrelationId) -> Option<&mut PendingRequest> {
        self.requests.get_mut(id)
    }

    pub fn remove(&mut self, id: &CorrelationId) -> Option<PendingRequest> {
        self.requests.remove(id)
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.requests.contains_key(id)
    }

    /// Close every stream while keeping the requests registered.
    pub fn close_streams(&mut self) -> usize {
        let mut closed = 0;
        for request in self.requests.values_mut() {
            if request.has_stream() {
                request.close_stream();
                closed += 1;
            }
        }
        closed
    }

    /// Forget every request, closing its stream. Late responses for these
    /// ids find nothing and are dropped.
    pub fn discard_all(&mut self) -> usize {
        let count = self.requests.len();
        for (_, mut request) in self.requests.drain() {
            request.resolve(Resolution::Discarded);
            request.finish();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
