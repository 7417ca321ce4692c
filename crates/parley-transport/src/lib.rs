//! Transport client for the assistant service.
//!
//! Thin request/response and event-stream wrapper: bearer authentication with
//! a single silent refresh, typed failures, and a cancellable handle for every
//! progress stream.

pub mod auth;
pub mod client;
pub mod error;
pub mod stream;
pub mod wire;

pub use auth::TokenStore;
pub use client::{AssistantApi, HttpTransport};
pub use error::TransportError;
pub use stream::{ProgressEvent, ProgressStream, SseDecoder, StreamHandle};
pub use wire::{
    AuthTokens, ConversationPatch, EmploymentSubmission, InsightReceipt, InsightSubmission,
    MessageRecord, SkillsReceipt, SkillsSubmission, WireInsightResponse, WireInsightSurvey,
    WireSubmission,
};
