//! Normalization of server records into timeline entries.
//!
//! Every default is filled here, once. The entry kind is decided at this
//! boundary and never re-derived downstream; legacy tags are translated here
//! and nowhere else.

use parley_core::types::{
    CorrelationId, EntryId, EntryPayload, LimitedMultiSurvey, RenderMode, Role, SingleSelectSurvey,
    SourceRef, Survey, SurveyEnvelope, SurveyKind, TextPayload, TimelineEntry,
};
use parley_transport::{MessageRecord, WireInsightSurvey};
use tracing::{debug, warn};

const LEGACY_INSIGHT_TYPE: &str = "insight-survey";

/// Convert one server record. Progress records are never persisted content
/// and yield `None`.
pub fn ingest_record(record: MessageRecord) -> Option<TimelineEntry> {
    if record.record_type.as_deref() == Some("progress") {
        debug!(id = ?record.id, "skipping progress record");
        return None;
    }

    let MessageRecord {
        id,
        role,
        record_type,
        content,
        content_md,
        survey_type,
        survey,
        enc_question,
        sources,
    } = record;

    let text = text_payload(
        content.or(content_md).unwrap_or_default(),
        sources.unwrap_or_default(),
        enc_question,
    );

    let payload = match survey_kind(survey_type.as_deref(), record_type.as_deref()) {
        Some(kind) => match parse_survey(kind, survey) {
            Some(survey) => EntryPayload::SurveyEnvelope(SurveyEnvelope { text, survey }),
            None => {
                warn!(id = ?id, %kind, "survey body unusable, showing text only");
                EntryPayload::Text(text)
            }
        },
        None => EntryPayload::Text(text),
    };

    Some(TimelineEntry {
        id: id.map(EntryId),
        correlation_id: CorrelationId::new(),
        role: Role::from_wire(role.as_deref()),
        payload,
    })
}

/// Convert a full history listing, preserving order.
pub fn ingest_history(records: Vec<MessageRecord>) -> Vec<TimelineEntry> {
    records.into_iter().filter_map(ingest_record).collect()
}

fn text_payload(
    content: String,
    sources: Vec<SourceRef>,
    followup: Option<String>,
) -> TextPayload {
    let mode = render_mode(&content);
    TextPayload {
        content,
        mode,
        sources,
        followup_question: followup
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty()),
    }
}

/// Content that looks like a JSON object or array and parses as one is shown
/// pretty-printed; everything else is plain.
pub fn render_mode(content: &str) -> RenderMode {
    let trimmed = content.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return RenderMode::Plain;
    }
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => RenderMode::Json { pretty },
            Err(_) => RenderMode::Plain,
        },
        Err(_) => RenderMode::Plain,
    }
}

fn survey_kind(survey_type: Option<&str>, record_type: Option<&str>) -> Option<SurveyKind> {
    match survey_type {
        Some("ec_survey") => Some(SurveyKind::SingleSelect),
        Some("skills_survey") => Some(SurveyKind::LimitedMultiSelect),
        Some("insight_survey") => Some(SurveyKind::BatchedInsight),
        Some(other) if !other.is_empty() => {
            warn!(survey_type = other, "unknown survey type ignored");
            None
        }
        _ if record_type == Some(LEGACY_INSIGHT_TYPE) => Some(SurveyKind::BatchedInsight),
        _ => None,
    }
}

fn parse_survey(kind: SurveyKind, body: Option<serde_json::Value>) -> Option<Survey> {
    let body = body?;
    let parsed = match kind {
        SurveyKind::SingleSelect => {
            serde_json::from_value::<SingleSelectSurvey>(body).map(Survey::SingleSelect)
        }
        SurveyKind::LimitedMultiSelect => {
            serde_json::from_value::<LimitedMultiSurvey>(body).map(Survey::LimitedMultiSelect)
        }
        SurveyKind::BatchedInsight => serde_json::from_value::<WireInsightSurvey>(body)
            .map(|wire| Survey::BatchedInsight(wire.into_survey())),
    };
    match parsed {
        Ok(survey) => Some(survey),
        Err(e) => {
            debug!(%kind, error = %e, "survey body failed to parse");
            None
        }
    }
}
