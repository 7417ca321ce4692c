//! Error types for the session controller.

use parley_core::types::SurveyKind;
use parley_transport::TransportError;

/// Failures the facade propagates to its caller.
///
/// Send failures are absorbed into the timeline and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Survey interaction and submission failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurveyError {
    #[error("no timeline entry with that correlation id")]
    UnknownEntry,
    #[error("entry does not carry a survey")]
    NotASurvey,
    #[error("expected a {expected} survey, found {found}")]
    WrongSurveyKind {
        expected: SurveyKind,
        found: SurveyKind,
    },
    #[error("unknown batch: {0}")]
    UnknownBatch(String),
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("survey is not ready to submit")]
    NotReady,
    #[error("a submission is already in flight")]
    InFlight,
    #[error("survey has already been submitted")]
    Locked,
    #[error("batch has no answers")]
    EmptyBatch,
    #[error("no active conversation")]
    NoConversation,
    #[error("submission failed: {0}")]
    Submit(#[from] TransportError),
}
