//! Folding progress events and the primary response into the timeline.
//!
//! Each function is one synchronous transition applied under the session
//! lock. Every lookup goes through the pending map by correlation id, so a
//! late event or response for a request that no longer exists does nothing.

use parley_core::config::SessionConfig;
use parley_core::types::{CorrelationId, EntryPayload, ProgressStatus, TimelineEntry};
use parley_transport::{ProgressEvent, StreamHandle};
use tracing::{debug, trace};

use crate::pending::{PendingRequest, PendingRequests, Resolution};
use crate::timeline::TimelineStore;

/// What applying a progress event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventEffect {
    /// The placeholder was patched.
    pub changed: bool,
    /// The caller should stop reading and close the stream.
    pub close: bool,
}

/// Start a send: neutralize every earlier placeholder, then append a fresh
/// one and register the request.
pub fn begin(
    timeline: &mut TimelineStore,
    pending: &mut PendingRequests,
    request_id: CorrelationId,
    config: &SessionConfig,
) {
    for stale in timeline.progress_ids() {
        timeline.remove(&stale);
        if let Some(previous) = pending.get_mut(&stale) {
            previous.resolve(Resolution::Superseded);
            previous.close_stream();
            debug!(correlation_id = %stale, "earlier placeholder superseded");
        }
    }
    timeline.append(TimelineEntry::placeholder(request_id, &config.queued_label));
    pending.insert(PendingRequest::new(request_id));
}

/// Register an opened stream. Returns `false` when the request is already
/// settled or gone, in which case the caller must close the stream.
pub fn stream_opened(
    pending: &mut PendingRequests,
    request_id: CorrelationId,
    handle: StreamHandle,
) -> bool {
    pending
        .get_mut(&request_id)
        .is_some_and(|request| request.attach_stream(handle))
}

/// The stream could not be opened: show the static fallback label.
pub fn stream_unavailable(
    timeline: &mut TimelineStore,
    pending: &mut PendingRequests,
    request_id: CorrelationId,
    config: &SessionConfig,
) -> bool {
    let Some(request) = pending.get_mut(&request_id) else {
        return false;
    };
    if !request.stream_unavailable() || request.is_settled() {
        return false;
    }
    timeline.patch(&request_id, |payload| {
        set_progress(payload, None, &config.fallback_label)
    })
}

/// Apply one progress event to the request's placeholder.
pub fn apply_event(
    timeline: &mut TimelineStore,
    pending: &mut PendingRequests,
    request_id: CorrelationId,
    event: ProgressEvent,
    config: &SessionConfig,
) -> EventEffect {
    let Some(request) = pending.get_mut(&request_id) else {
        trace!(correlation_id = %request_id, "event for unknown request dropped");
        return EventEffect {
            changed: false,
            close: true,
        };
    };
    if request.is_settled() {
        trace!(correlation_id = %request_id, "event after resolution dropped");
        return EventEffect {
            changed: false,
            close: true,
        };
    }

    match event {
        ProgressEvent::Step { label } => {
            let label = label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| config.step_label.clone());
            EventEffect {
                changed: timeline.patch(&request_id, |payload| {
                    set_progress(payload, None, &label)
                }),
                close: false,
            }
        }
        ProgressEvent::Done => {
            request.resolve(Resolution::StreamDone);
            request.close_stream();
            EventEffect {
                changed: timeline.patch(&request_id, |payload| {
                    set_progress(payload, Some(ProgressStatus::Done), &config.done_label)
                }),
                close: true,
            }
        }
        ProgressEvent::Error { message } => {
            let label = message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| config.stream_error_label.clone());
            request.resolve(Resolution::StreamError(label.clone()));
            request.close_stream();
            EventEffect {
                changed: timeline.patch(&request_id, |payload| {
                    set_progress(payload, Some(ProgressStatus::Error), &label)
                }),
                close: true,
            }
        }
        ProgressEvent::Unknown => {
            trace!(correlation_id = %request_id, "unknown progress event ignored");
            EventEffect::default()
        }
    }
}

/// The primary response arrived: it always wins. The placeholder is removed
/// and the authoritative entry appended at the tail.
///
/// Returns `false` when the request was discarded and the response dropped.
pub fn resolve_response(
    timeline: &mut TimelineStore,
    pending: &mut PendingRequests,
    request_id: CorrelationId,
    entry: Option<TimelineEntry>,
) -> bool {
    let Some(mut request) = pending.remove(&request_id) else {
        debug!(correlation_id = %request_id, "response for discarded request dropped");
        return false;
    };
    request.resolve(Resolution::Response);
    request.finish();
    debug!(
        correlation_id = %request_id,
        outcome = ?request.outcome(),
        "request resolved"
    );

    timeline.remove(&request_id);
    if let Some(entry) = entry {
        timeline.append(entry);
    }
    true
}

/// The primary request failed: flip the placeholder to the error state.
pub fn mark_failed(
    timeline: &mut TimelineStore,
    pending: &mut PendingRequests,
    request_id: CorrelationId,
    reason: &str,
    config: &SessionConfig,
) -> bool {
    let Some(request) = pending.get_mut(&request_id) else {
        return false;
    };
    request.resolve(Resolution::Failed(reason.to_string()));
    request.close_stream();
    timeline.patch(&request_id, |payload| {
        set_progress(payload, Some(ProgressStatus::Error), &config.failure_label)
    })
}

/// Replace the failed placeholder with the apology turn.
pub fn apologize(
    timeline: &mut TimelineStore,
    pending: &mut PendingRequests,
    request_id: CorrelationId,
    config: &SessionConfig,
) -> bool {
    let Some(mut request) = pending.remove(&request_id) else {
        debug!(correlation_id = %request_id, "failure for discarded request dropped");
        return false;
    };
    request.finish();
    timeline.remove(&request_id);
    timeline.append(TimelineEntry::assistant_text(
        CorrelationId::new(),
        &config.apology_text,
    ));
    true
}

fn set_progress(payload: &mut EntryPayload, status: Option<ProgressStatus>, label: &str) {
    if let EntryPayload::Progress(progress) = payload {
        if let Some(status) = status {
            progress.status = status;
        }
        progress.label = label.to_string();
    }
}
