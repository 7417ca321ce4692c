use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, ConversationSummary, CorrelationId};

/// Notifications the session controller publishes to external collaborators.
///
/// Consumers (a chat list, a renderer, a status bar) subscribe to the
/// session's broadcast channel instead of listening on any global bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A backing conversation was created lazily by the first send.
    /// Emitted at most once per conversation.
    ConversationCreated { conversation: ConversationSummary },

    /// The timeline changed; re-read the snapshot.
    TimelineChanged { revision: u64 },

    /// History for a conversation replaced the timeline.
    HistoryLoaded {
        conversation_id: ConversationId,
        entry_count: usize,
    },

    /// A survey submission failed and the control was returned to editable.
    SurveySubmitFailed {
        entry: CorrelationId,
        batch_id: Option<String>,
        message: String,
    },

    /// Credentials could not be refreshed; the user must sign in again.
    AuthenticationRequired,
}

impl SessionEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ConversationCreated { .. } => "conversation_created",
            SessionEvent::TimelineChanged { .. } => "timeline_changed",
            SessionEvent::HistoryLoaded { .. } => "history_loaded",
            SessionEvent::SurveySubmitFailed { .. } => "survey_submit_failed",
            SessionEvent::AuthenticationRequired => "authentication_required",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let summary = ConversationSummary {
            id: ConversationId::new("c1"),
            title: "hello".into(),
            archived: false,
            created_at: None,
            updated_at: None,
        };
        assert_eq!(
            SessionEvent::ConversationCreated {
                conversation: summary
            }
            .name(),
            "conversation_created"
        );
        assert_eq!(
            SessionEvent::TimelineChanged { revision: 3 }.name(),
            "timeline_changed"
        );
        assert_eq!(
            SessionEvent::AuthenticationRequired.name(),
            "authentication_required"
        );
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let event = SessionEvent::SurveySubmitFailed {
            entry: CorrelationId::new(),
            batch_id: Some("b1".into()),
            message: "timeout".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
