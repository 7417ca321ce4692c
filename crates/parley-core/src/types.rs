use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Client-generated identifier binding an optimistic entry, its progress
/// stream, and the eventual authoritative response.
///
/// Unique per logical user action and stable across all patches to the entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned conversation identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier, present once an entry is confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Author of a timeline entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse a wire role. Anything other than `"user"` is an assistant turn.
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some(r) if r.eq_ignore_ascii_case("user") => Role::User,
            _ => Role::Assistant,
        }
    }
}

/// Discriminant of [`EntryPayload`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Text,
    Progress,
    SurveyEnvelope,
}

/// Status of a progress placeholder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Running,
    Done,
    Error,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProgressStatus::Running)
    }
}

/// The three survey variants an assistant turn can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyKind {
    SingleSelect,
    LimitedMultiSelect,
    BatchedInsight,
}

impl fmt::Display for SurveyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SurveyKind::SingleSelect => "single-select",
            SurveyKind::LimitedMultiSelect => "limited-multi-select",
            SurveyKind::BatchedInsight => "batched-insight",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Timeline entry
// =============================================================================

/// The atomic unit rendered in the timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Server identifier, once confirmed.
    pub id: Option<EntryId>,
    pub correlation_id: CorrelationId,
    pub role: Role,
    pub payload: EntryPayload,
}

impl TimelineEntry {
    /// Optimistic user turn.
    pub fn user_text(correlation_id: CorrelationId, content: &str) -> Self {
        Self {
            id: None,
            correlation_id,
            role: Role::User,
            payload: EntryPayload::Text(TextPayload::plain(content)),
        }
    }

    /// Plain assistant text that never came from the server (apologies, confirmations).
    pub fn assistant_text(correlation_id: CorrelationId, content: &str) -> Self {
        Self {
            id: None,
            correlation_id,
            role: Role::Assistant,
            payload: EntryPayload::Text(TextPayload::plain(content)),
        }
    }

    /// Running progress placeholder.
    pub fn placeholder(correlation_id: CorrelationId, label: &str) -> Self {
        Self {
            id: None,
            correlation_id,
            role: Role::Assistant,
            payload: EntryPayload::Progress(ProgressPayload {
                status: ProgressStatus::Running,
                label: label.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.payload.kind()
    }

    pub fn text(&self) -> Option<&TextPayload> {
        match &self.payload {
            EntryPayload::Text(t) => Some(t),
            EntryPayload::SurveyEnvelope(env) => Some(&env.text),
            EntryPayload::Progress(_) => None,
        }
    }

    pub fn progress(&self) -> Option<&ProgressPayload> {
        match &self.payload {
            EntryPayload::Progress(p) => Some(p),
            _ => None,
        }
    }

    pub fn survey(&self) -> Option<&Survey> {
        match &self.payload {
            EntryPayload::SurveyEnvelope(env) => Some(&env.survey),
            _ => None,
        }
    }

    /// True for a progress entry whose status is still `running`.
    pub fn is_running_progress(&self) -> bool {
        matches!(&self.payload, EntryPayload::Progress(p) if p.status == ProgressStatus::Running)
    }

    /// Whether in-place patches may still be applied.
    ///
    /// Text is immutable once appended, progress freezes when it leaves
    /// `running`, and survey envelopes stay patchable for submission state.
    pub fn is_patchable(&self) -> bool {
        match &self.payload {
            EntryPayload::Text(_) => false,
            EntryPayload::Progress(p) => !p.status.is_terminal(),
            EntryPayload::SurveyEnvelope(_) => true,
        }
    }
}

/// Closed tagged union of entry payloads, decided once at ingestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPayload {
    Text(TextPayload),
    Progress(ProgressPayload),
    SurveyEnvelope(SurveyEnvelope),
}

impl EntryPayload {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryPayload::Text(_) => EntryKind::Text,
            EntryPayload::Progress(_) => EntryKind::Progress,
            EntryPayload::SurveyEnvelope(_) => EntryKind::SurveyEnvelope,
        }
    }
}

/// How text content should be presented.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RenderMode {
    Plain,
    /// Content parsed as JSON; `pretty` holds the indented form.
    Json { pretty: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub content: String,
    pub mode: RenderMode,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub followup_question: Option<String>,
}

impl TextPayload {
    pub fn plain(content: &str) -> Self {
        Self {
            content: content.to_string(),
            mode: RenderMode::Plain,
            sources: Vec::new(),
            followup_question: None,
        }
    }

    /// The string a renderer should display.
    pub fn rendered(&self) -> &str {
        match &self.mode {
            RenderMode::Plain => &self.content,
            RenderMode::Json { pretty } => pretty,
        }
    }
}

/// A citation fragment attached to assistant text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub breadcrumb: Option<String>,
}

impl SourceRef {
    /// Trimmed breadcrumb, falling back to the chunk id.
    pub fn display_name(&self) -> &str {
        self.breadcrumb
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .or_else(|| self.chunk_id.as_deref().map(str::trim))
            .unwrap_or("")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub status: ProgressStatus,
    pub label: String,
}

/// An assistant turn carrying a survey, plus whatever text came with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurveyEnvelope {
    pub text: TextPayload,
    pub survey: Survey,
}

// =============================================================================
// Surveys
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "survey_kind", rename_all = "snake_case")]
pub enum Survey {
    SingleSelect(SingleSelectSurvey),
    LimitedMultiSelect(LimitedMultiSurvey),
    BatchedInsight(InsightSurvey),
}

impl Survey {
    pub fn kind(&self) -> SurveyKind {
        match self {
            Survey::SingleSelect(_) => SurveyKind::SingleSelect,
            Survey::LimitedMultiSelect(_) => SurveyKind::LimitedMultiSelect,
            Survey::BatchedInsight(_) => SurveyKind::BatchedInsight,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub desc: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleSelectSurvey {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub help: Option<String>,
    #[serde(default)]
    pub options: Vec<SurveyOption>,
    #[serde(default)]
    pub vault_version: Option<String>,
}

impl SingleSelectSurvey {
    pub fn has_option(&self, id: &str) -> bool {
        self.options.iter().any(|o| o.id == id)
    }
}

const DEFAULT_MAX_PICKS: usize = 4;

fn default_max_picks() -> usize {
    DEFAULT_MAX_PICKS
}

/// A null or zero limit means the default.
fn max_picks<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<usize>::deserialize(deserializer)?
        .filter(|max| *max > 0)
        .unwrap_or(DEFAULT_MAX_PICKS))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitedMultiSurvey {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub help: Option<String>,
    #[serde(default)]
    pub options: Vec<SurveyOption>,
    #[serde(default = "default_max_picks", deserialize_with = "max_picks")]
    pub max: usize,
    /// Whether the "let the system decide" toggle is offered.
    #[serde(default, rename = "let_system_decide")]
    pub allow_system_decide: bool,
    #[serde(default)]
    pub employment_category_id: Option<String>,
    #[serde(default)]
    pub vault_version: Option<String>,
}

impl LimitedMultiSurvey {
    pub fn has_option(&self, id: &str) -> bool {
        self.options.iter().any(|o| o.id == id)
    }
}

/// A batched-insight survey: independent batches, each submitted on its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsightSurvey {
    #[serde(default)]
    pub vault_version: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    pub batches: Vec<InsightBatch>,
    /// Submission state per batch id. Batches absent from the map are unsubmitted.
    #[serde(default)]
    pub submissions: HashMap<String, BatchSubmission>,
}

impl InsightSurvey {
    pub fn batch(&self, batch_id: &str) -> Option<&InsightBatch> {
        self.batches.iter().find(|b| b.batch_id == batch_id)
    }

    pub fn submission(&self, batch_id: &str) -> &BatchSubmission {
        self.submissions
            .get(batch_id)
            .unwrap_or(&BatchSubmission::Unsubmitted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightBatch {
    #[serde(rename = "batchId")]
    pub batch_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub questions: Vec<InsightQuestion>,
}

impl InsightBatch {
    pub fn question(&self, insight_id: &str) -> Option<&InsightQuestion> {
        self.questions.iter().find(|q| q.insight_id == insight_id)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionMode {
    #[default]
    Single,
    Multi,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightQuestion {
    #[serde(rename = "insightId")]
    pub insight_id: String,
    #[serde(rename = "uiQuestion", default)]
    pub ui_question: String,
    #[serde(rename = "type", default)]
    pub mode: QuestionMode,
    #[serde(default)]
    pub options: Vec<InsightOption>,
}

impl InsightQuestion {
    pub fn has_option(&self, answer_id: &str) -> bool {
        self.options.iter().any(|o| o.answer_id == answer_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightOption {
    #[serde(rename = "answerId")]
    pub answer_id: String,
    #[serde(default)]
    pub label: String,
}

/// Lifecycle of one batch: `Unsubmitted -> InFlight -> Confirmed`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchSubmission {
    #[default]
    Unsubmitted,
    InFlight,
    Confirmed(ConfirmedSubmission),
}

impl BatchSubmission {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, BatchSubmission::Confirmed(_))
    }
}

/// The server-confirmed answers for a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedSubmission {
    pub responses: Vec<InsightResponse>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// One answered question. Exactly one answer shape per question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightResponse {
    pub insight_id: String,
    pub answer: InsightAnswer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightAnswer {
    One(String),
    Many(Vec<String>),
}

// =============================================================================
// Conversations
// =============================================================================

/// Conversation metadata as listed by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}
