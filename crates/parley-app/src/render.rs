//! Plain-text rendering of timeline entries.

use std::collections::HashMap;
use std::fmt::Write;

use parley_core::types::{
    BatchSubmission, EntryPayload, InsightAnswer, InsightBatch, InsightSurvey, LimitedMultiSurvey,
    ProgressStatus, Role, SingleSelectSurvey, SourceRef, Survey, TextPayload, TimelineEntry,
};
use parley_session::{DraftAnswer, LimitedMultiDraft, Session, SingleSelectDraft, SurveyBatchState};

const SOURCE_NAME_MAX: usize = 20;

/// Local draft state shown next to a survey entry.
#[derive(Debug, Default)]
pub struct Drafts {
    pub single: Option<SingleSelectDraft>,
    pub multi: Option<LimitedMultiDraft>,
    pub batches: HashMap<String, SurveyBatchState>,
}

impl Drafts {
    pub fn of(session: &Session, entry: &TimelineEntry) -> Self {
        let id = &entry.correlation_id;
        match entry.survey() {
            Some(Survey::SingleSelect(_)) => Self {
                single: session.single_select_draft(id),
                ..Self::default()
            },
            Some(Survey::LimitedMultiSelect(_)) => Self {
                multi: session.skills_draft(id),
                ..Self::default()
            },
            Some(Survey::BatchedInsight(survey)) => Self {
                batches: survey
                    .batches
                    .iter()
                    .filter_map(|b| session.batch_draft(id, &b.batch_id))
                    .map(|state| (state.batch_id().to_string(), state))
                    .collect(),
                ..Self::default()
            },
            None => Self::default(),
        }
    }
}

/// Render the whole timeline, numbering entries so commands can refer to them.
pub fn render_timeline(session: &Session) -> String {
    let mut out = String::new();
    for (index, entry) in session.snapshot().iter().enumerate() {
        let drafts = Drafts::of(session, entry);
        out.push_str(&render_entry(index, entry, &drafts));
    }
    out
}

pub fn render_entry(index: usize, entry: &TimelineEntry, drafts: &Drafts) -> String {
    let speaker = match entry.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let mut out = String::new();
    match &entry.payload {
        EntryPayload::Text(text) => {
            let _ = writeln!(out, "[{index}] {speaker}> {}", text.rendered());
            push_text_extras(&mut out, text);
        }
        EntryPayload::Progress(progress) => {
            let marker = match progress.status {
                ProgressStatus::Running => "...",
                ProgressStatus::Done => "ok",
                ProgressStatus::Error => "!!",
            };
            let _ = writeln!(out, "[{index}] {speaker}> ({marker}) {}", progress.label);
        }
        EntryPayload::SurveyEnvelope(envelope) => {
            let _ = writeln!(out, "[{index}] {speaker}> {}", envelope.text.rendered());
            push_text_extras(&mut out, &envelope.text);
            match &envelope.survey {
                Survey::SingleSelect(survey) => {
                    push_single_select(&mut out, survey, drafts.single.as_ref())
                }
                Survey::LimitedMultiSelect(survey) => {
                    push_limited_multi(&mut out, survey, drafts.multi.as_ref())
                }
                Survey::BatchedInsight(survey) => push_insight(&mut out, survey, &drafts.batches),
            }
        }
    }
    out
}

fn push_text_extras(out: &mut String, text: &TextPayload) {
    if let Some(strip) = sources_strip(&text.sources) {
        let _ = writeln!(out, "    {strip}");
    }
    if let Some(question) = &text.followup_question {
        let _ = writeln!(out, "    Quick question: {question}");
    }
}

/// Display names of the sources, each cut to a fixed width.
pub fn sources_strip(sources: &[SourceRef]) -> Option<String> {
    let names: Vec<String> = sources
        .iter()
        .map(SourceRef::display_name)
        .filter(|name| !name.is_empty())
        .map(|name| truncate(name, SOURCE_NAME_MAX))
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(format!("sources: {}", names.join(" | ")))
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

fn mark(on: bool) -> &'static str {
    if on {
        "[x]"
    } else {
        "[ ]"
    }
}

fn push_header(out: &mut String, title: Option<&str>, help: Option<&str>) {
    if let Some(title) = title {
        let _ = writeln!(out, "    == {title} ==");
    }
    if let Some(help) = help {
        let _ = writeln!(out, "    {help}");
    }
}

fn push_single_select(
    out: &mut String,
    survey: &SingleSelectSurvey,
    draft: Option<&SingleSelectDraft>,
) {
    push_header(out, survey.title.as_deref(), survey.help.as_deref());
    let selected = draft.and_then(SingleSelectDraft::selected);
    for option in &survey.options {
        let _ = write!(
            out,
            "    {} {}: {}",
            mark(selected == Some(option.id.as_str())),
            option.id,
            option.label
        );
        if let Some(desc) = &option.desc {
            let _ = write!(out, " ({desc})");
        }
        out.push('\n');
    }
    match draft {
        Some(d) if d.is_inert() => out.push_str("    (submitted)\n"),
        Some(d) if d.is_submitting() => out.push_str("    (sending...)\n"),
        _ => {}
    }
}

fn push_limited_multi(
    out: &mut String,
    survey: &LimitedMultiSurvey,
    draft: Option<&LimitedMultiDraft>,
) {
    push_header(out, survey.title.as_deref(), survey.help.as_deref());
    let _ = writeln!(out, "    pick up to {}", survey.max);
    let picks = draft.map(LimitedMultiDraft::picks).unwrap_or_default();
    for option in &survey.options {
        let picked = picks.iter().any(|p| p == &option.id);
        let _ = writeln!(out, "    {} {}: {}", mark(picked), option.id, option.label);
    }
    if survey.allow_system_decide {
        let on = draft.is_some_and(LimitedMultiDraft::system_decides);
        let _ = writeln!(out, "    {} let the system decide", mark(on));
    }
    match draft {
        Some(d) if d.is_inert() => out.push_str("    (submitted)\n"),
        Some(d) if d.is_submitting() => out.push_str("    (sending...)\n"),
        _ => {}
    }
}

fn push_insight(
    out: &mut String,
    survey: &InsightSurvey,
    drafts: &HashMap<String, SurveyBatchState>,
) {
    for batch in &survey.batches {
        let status = match survey.submission(&batch.batch_id) {
            BatchSubmission::Unsubmitted => "open",
            BatchSubmission::InFlight => "sending...",
            BatchSubmission::Confirmed(_) => "submitted",
        };
        let _ = writeln!(out, "    -- {} [{}] ({status})", batch.title, batch.batch_id);
        push_batch_questions(out, survey, batch, drafts.get(&batch.batch_id));
    }
}

fn push_batch_questions(
    out: &mut String,
    survey: &InsightSurvey,
    batch: &InsightBatch,
    draft: Option<&SurveyBatchState>,
) {
    let confirmed = match survey.submission(&batch.batch_id) {
        BatchSubmission::Confirmed(confirmed) => Some(confirmed),
        _ => None,
    };
    for question in &batch.questions {
        let _ = writeln!(out, "      {}: {}", question.insight_id, question.ui_question);
        for option in &question.options {
            let chosen = match confirmed {
                Some(confirmed) => confirmed
                    .responses
                    .iter()
                    .filter(|r| r.insight_id == question.insight_id)
                    .any(|r| match &r.answer {
                        InsightAnswer::One(id) => id == &option.answer_id,
                        InsightAnswer::Many(ids) => ids.contains(&option.answer_id),
                    }),
                None => match draft.map(|d| d.answer(&question.insight_id)) {
                    Some(DraftAnswer::Single(id)) => id == &option.answer_id,
                    Some(DraftAnswer::Multi(ids)) => ids.contains(&option.answer_id),
                    _ => false,
                },
            };
            let _ = writeln!(
                out,
                "        {} {}: {}",
                mark(chosen),
                option.answer_id,
                option.label
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::{CorrelationId, RenderMode, SurveyEnvelope};

    fn text_entry(content: &str) -> TimelineEntry {
        TimelineEntry::assistant_text(CorrelationId::new(), content)
    }

    #[test]
    fn test_truncate_adds_ellipsis() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("abcdefghijklmnopqrstuvwxyz", 20), "abcdefghijklmnopqrst…");
    }

    #[test]
    fn test_sources_strip_uses_display_names() {
        let sources = vec![
            SourceRef {
                chunk_id: Some("c1".into()),
                breadcrumb: Some("Handbook > Onboarding > First week".into()),
            },
            SourceRef {
                chunk_id: Some("c2".into()),
                breadcrumb: None,
            },
            SourceRef::default(),
        ];
        assert_eq!(
            sources_strip(&sources).as_deref(),
            Some("sources: Handbook > Onboardin… | c2")
        );
        assert!(sources_strip(&[]).is_none());
    }

    #[test]
    fn test_text_with_followup() {
        let mut entry = text_entry("Here is the plan.");
        if let EntryPayload::Text(text) = &mut entry.payload {
            text.followup_question = Some("Want a weekly schedule?".into());
        }
        let rendered = render_entry(2, &entry, &Drafts::default());
        assert_eq!(
            rendered,
            "[2] assistant> Here is the plan.\n    Quick question: Want a weekly schedule?\n"
        );
    }

    #[test]
    fn test_json_is_pretty_printed() {
        let mut entry = text_entry("{\"a\":1}");
        if let EntryPayload::Text(text) = &mut entry.payload {
            text.mode = RenderMode::Json {
                pretty: "{\n  \"a\": 1\n}".into(),
            };
        }
        let rendered = render_entry(0, &entry, &Drafts::default());
        assert!(rendered.contains("{\n  \"a\": 1\n}"));
    }

    #[test]
    fn test_progress_line() {
        let entry = TimelineEntry::placeholder(CorrelationId::new(), "Analyzing");
        assert_eq!(
            render_entry(1, &entry, &Drafts::default()),
            "[1] assistant> (...) Analyzing\n"
        );
    }

    #[test]
    fn test_single_select_marks_choice() {
        let survey: SingleSelectSurvey = serde_json::from_value(serde_json::json!({
            "title": "Employment",
            "options": [{"id": "A", "label": "Employed"}, {"id": "B", "label": "Student"}]
        }))
        .unwrap();
        let entry = TimelineEntry {
            id: None,
            correlation_id: CorrelationId::new(),
            role: Role::Assistant,
            payload: EntryPayload::SurveyEnvelope(SurveyEnvelope {
                text: TextPayload::plain("Pick one"),
                survey: Survey::SingleSelect(survey),
            }),
        };
        let rendered = render_entry(0, &entry, &Drafts::default());
        assert!(rendered.contains("== Employment =="));
        assert!(rendered.contains("[ ] A: Employed"));
        assert!(!rendered.contains("(submitted)"));
    }
}
