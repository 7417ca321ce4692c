//! Request and response bodies exchanged with the assistant service.
//!
//! Field names follow the service's JSON (a mix of snake_case and camelCase).
//! Everything optional on the wire is optional here; defaults are filled in
//! once by the session's ingestion step, not at render sites.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parley_core::types::{
    BatchSubmission, ConfirmedSubmission, InsightAnswer, InsightBatch, InsightResponse,
    InsightSurvey, SourceRef,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Messages
// =============================================================================

/// A persisted or freshly produced message as the server describes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Legacy discriminator: `"text"`, `"progress"`, or `"insight-survey"`.
    #[serde(default, rename = "type")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_md: Option<String>,
    #[serde(default, rename = "surveyType")]
    pub survey_type: Option<String>,
    #[serde(default)]
    pub survey: Option<serde_json::Value>,
    /// Short follow-up prompt shown after the main content.
    #[serde(default)]
    pub enc_question: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<SourceRef>>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SendMessageBody<'a> {
    pub prompt: &'a str,
    pub request_id: String,
}

// =============================================================================
// Conversations
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateConversationBody<'a> {
    pub title: &'a str,
}

/// Partial update for a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

// =============================================================================
// Authentication
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshBody<'a> {
    pub refresh_token: &'a str,
}

// =============================================================================
// Survey submissions
// =============================================================================

/// Single-select submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmploymentSubmission {
    pub chat_id: String,
    pub employment_category_id: String,
    pub vault_version: Option<String>,
}

/// Limited multi-select submission. `skills_selected` is omitted when the
/// system decides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillsSubmission {
    pub chat_id: String,
    pub employment_category_id: Option<String>,
    pub vault_version: Option<String>,
    pub let_system_decide: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills_selected: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SkillsReceipt {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub skills_count: Option<usize>,
}

impl SkillsReceipt {
    pub fn is_system_decide(&self) -> bool {
        self.mode.as_deref() == Some("system_decide")
    }
}

/// One batch of batched-insight answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightSubmission {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "msgId")]
    pub msg_id: Option<String>,
    #[serde(rename = "batchId")]
    pub batch_id: String,
    pub responses: Vec<WireInsightResponse>,
    #[serde(rename = "submittedAt")]
    pub submitted_at: DateTime<Utc>,
}

/// Wire form of an answer: exactly one of `answerId` / `answerIds` is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireInsightResponse {
    #[serde(rename = "insightId")]
    pub insight_id: String,
    #[serde(
        rename = "answerId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub answer_id: Option<String>,
    #[serde(
        rename = "answerIds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub answer_ids: Option<Vec<String>>,
}

impl WireInsightResponse {
    /// Pick exactly one answer shape. A list wins over a single id; a record
    /// with neither is dropped.
    pub fn into_response(self) -> Option<InsightResponse> {
        let answer = match (self.answer_ids, self.answer_id) {
            (Some(ids), _) => InsightAnswer::Many(ids),
            (None, Some(id)) if !id.is_empty() => InsightAnswer::One(id),
            _ => return None,
        };
        Some(InsightResponse {
            insight_id: self.insight_id,
            answer,
        })
    }
}

impl From<&InsightResponse> for WireInsightResponse {
    fn from(r: &InsightResponse) -> Self {
        match &r.answer {
            InsightAnswer::One(id) => Self {
                insight_id: r.insight_id.clone(),
                answer_id: Some(id.clone()),
                answer_ids: None,
            },
            InsightAnswer::Many(ids) => Self {
                insight_id: r.insight_id.clone(),
                answer_id: None,
                answer_ids: Some(ids.clone()),
            },
        }
    }
}

/// A recorded batch submission as stored by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WireSubmission {
    #[serde(default)]
    pub responses: Vec<WireInsightResponse>,
    #[serde(default, rename = "submittedAt")]
    pub submitted_at: Option<String>,
}

impl WireSubmission {
    pub fn into_confirmed(self) -> ConfirmedSubmission {
        ConfirmedSubmission {
            responses: self
                .responses
                .into_iter()
                .filter_map(WireInsightResponse::into_response)
                .collect(),
            submitted_at: self
                .submitted_at
                .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InsightReceipt {
    /// Server-confirmed snapshot, when the service echoes one.
    #[serde(default)]
    pub submission: Option<WireSubmission>,
}

/// Batched-insight survey body as embedded in a message record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WireInsightSurvey {
    #[serde(default, rename = "vaultVersion")]
    pub vault_version: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub batches: Vec<InsightBatch>,
    #[serde(default, rename = "submittedBatches")]
    pub submitted_batches: HashMap<String, WireSubmission>,
}

impl WireInsightSurvey {
    pub fn into_survey(self) -> InsightSurvey {
        let submissions = self
            .submitted_batches
            .into_iter()
            .map(|(batch_id, sub)| (batch_id, BatchSubmission::Confirmed(sub.into_confirmed())))
            .collect();
        InsightSurvey {
            vault_version: self.vault_version,
            language: self.language,
            batches: self.batches,
            submissions,
        }
    }
}
