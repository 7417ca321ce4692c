//! Session controller for the Parley client.
//!
//! Keeps one mutable timeline consistent while three asynchronous sources
//! update it: optimistic local entries, the advisory progress stream, and the
//! authoritative response. Renderers only ever read [`Session::snapshot`].

pub mod error;
pub mod ingest;
pub mod pending;
pub mod reconcile;
pub mod session;
pub mod survey;
pub mod timeline;

pub use error::{SessionError, SurveyError};
pub use ingest::{ingest_history, ingest_record};
pub use pending::{PendingRequest, PendingRequests, RequestPhase, Resolution};
pub use session::{SendOutcome, Session};
pub use survey::{
    BatchPhase, DraftAnswer, LimitedMultiDraft, PickOutcome, SingleSelectDraft, SkillsChoice,
    SurveyBatchState, SurveyTracker,
};
pub use timeline::{EntryRef, TimelineStore};
