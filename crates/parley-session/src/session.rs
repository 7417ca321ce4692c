//! Session facade: the entry point external collaborators call.
//!
//! All controller state lives behind one mutex and is only touched inside
//! synchronous closures, so no guard is ever held across an `.await` and a
//! renderer never observes a half-applied transition. Collaborators learn
//! about changes from the broadcast channel returned by [`Session::subscribe`].

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use parley_core::config::SessionConfig;
use parley_core::events::SessionEvent;
use parley_core::types::{
    BatchSubmission, ConfirmedSubmission, ConversationId, CorrelationId, EntryPayload,
    InsightSurvey, LimitedMultiSurvey, SingleSelectSurvey, Survey, SurveyKind, TimelineEntry,
};
use parley_transport::{
    AssistantApi, EmploymentSubmission, InsightSubmission, ProgressEvent, ProgressStream,
    SkillsSubmission, TransportError, WireInsightResponse, WireSubmission,
};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::error::{SessionError, SurveyError};
use crate::ingest;
use crate::pending::PendingRequests;
use crate::reconcile;
use crate::survey::{
    LimitedMultiDraft, PickOutcome, SingleSelectDraft, SkillsChoice, SurveyBatchState,
    SurveyTracker, EMPLOYMENT_RECORDED, SKILLS_RECORDED, SKILLS_SYSTEM_DECIDES,
};
use crate::timeline::TimelineStore;

/// How a `send_text` call ended. Failures are already reflected in the
/// timeline; this is informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Ignored,
    Delivered {
        request_id: CorrelationId,
    },
    /// The send failed and an apology was appended.
    Failed {
        request_id: CorrelationId,
        error: TransportError,
    },
}

#[derive(Debug, Default)]
struct SessionState {
    timeline: TimelineStore,
    pending: PendingRequests,
    surveys: SurveyTracker,
    conversation: Option<ConversationId>,
}

/// One conversation view over the assistant service.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Session {
    api: Arc<dyn AssistantApi>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(api: Arc<dyn AssistantApi>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            api,
            config,
            state: Mutex::new(SessionState::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Ordered, owned copy of the timeline for rendering.
    pub fn snapshot(&self) -> Vec<TimelineEntry> {
        self.read_state(|s| s.timeline.snapshot())
    }

    pub fn revision(&self) -> u64 {
        self.read_state(|s| s.timeline.revision())
    }

    pub fn conversation(&self) -> Option<ConversationId> {
        self.read_state(|s| s.conversation.clone())
    }

    /// Number of sends still waiting for their primary response.
    pub fn in_flight(&self) -> usize {
        self.read_state(|s| s.pending.len())
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send a user message.
    ///
    /// Blank input is ignored. Otherwise the user entry and a progress
    /// placeholder are appended immediately, a conversation is created if
    /// none exists, and the primary request races the progress stream until
    /// the response (or a failure) resolves the placeholder.
    pub async fn send_text(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            trace!("blank input ignored");
            return SendOutcome::Ignored;
        }

        let request_id = CorrelationId::new();
        self.with_state(|s| {
            s.timeline
                .append(TimelineEntry::user_text(CorrelationId::new(), text));
            reconcile::begin(&mut s.timeline, &mut s.pending, request_id, &self.config);
        });
        debug!(correlation_id = %request_id, "send started");

        let conversation = match self.ensure_conversation(text).await {
            Ok(conversation) => conversation,
            Err(error) => return self.fail_send(request_id, error),
        };

        let send = self.api.send_message(&conversation, text, request_id);
        let open = self.api.open_progress(&conversation, request_id);
        tokio::pin!(send);
        tokio::pin!(open);

        let mut opening = true;
        let mut stream: Option<ProgressStream> = None;

        let result = loop {
            tokio::select! {
                biased;

                result = &mut send => break result,

                opened = &mut open, if opening => {
                    opening = false;
                    match opened {
                        Ok(mut opened) => {
                            let handle = opened.handle();
                            let attached = self.with_state(|s| {
                                reconcile::stream_opened(&mut s.pending, request_id, handle)
                            });
                            if attached {
                                stream = Some(opened);
                            } else {
                                opened.close();
                            }
                        }
                        Err(e) => {
                            warn!(correlation_id = %request_id, error = %e, "progress stream unavailable");
                            self.with_state(|s| {
                                reconcile::stream_unavailable(
                                    &mut s.timeline,
                                    &mut s.pending,
                                    request_id,
                                    &self.config,
                                )
                            });
                        }
                    }
                }

                item = next_event(&mut stream), if stream.is_some() => match item {
                    Some(Ok(event)) => {
                        let effect = self.with_state(|s| {
                            reconcile::apply_event(
                                &mut s.timeline,
                                &mut s.pending,
                                request_id,
                                event,
                                &self.config,
                            )
                        });
                        if effect.close {
                            close_stream(&mut stream);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(correlation_id = %request_id, error = %e, "progress event ignored");
                    }
                    None => {
                        trace!(correlation_id = %request_id, "progress stream ended");
                        stream = None;
                    }
                },
            }
        };
        close_stream(&mut stream);

        match result {
            Ok(record) => {
                let entry = ingest::ingest_record(record);
                let applied = self.with_state(|s| {
                    reconcile::resolve_response(&mut s.timeline, &mut s.pending, request_id, entry)
                });
                debug!(correlation_id = %request_id, applied, "response received");
                SendOutcome::Delivered { request_id }
            }
            Err(error) => self.fail_send(request_id, error),
        }
    }

    fn fail_send(&self, request_id: CorrelationId, error: TransportError) -> SendOutcome {
        warn!(correlation_id = %request_id, error = %error, "send failed");
        let reason = error.to_string();
        self.with_state(|s| {
            reconcile::mark_failed(
                &mut s.timeline,
                &mut s.pending,
                request_id,
                &reason,
                &self.config,
            )
        });
        self.with_state(|s| {
            reconcile::apologize(&mut s.timeline, &mut s.pending, request_id, &self.config)
        });
        self.note_auth(&error);
        SendOutcome::Failed { request_id, error }
    }

    /// Return the active conversation, creating one titled after `first_text`
    /// when there is none.
    ///
    /// If two sends race to create, the first to finish wins and the other
    /// server conversation is left unused.
    async fn ensure_conversation(&self, first_text: &str) -> Result<ConversationId, TransportError> {
        if let Some(conversation) = self.conversation() {
            return Ok(conversation);
        }

        let title = conversation_title(first_text, self.config.title_max_chars);
        let summary = self.api.create_conversation(&title).await?;
        let adopted = self.with_state(|s| match &s.conversation {
            Some(existing) => Err(existing.clone()),
            None => {
                s.conversation = Some(summary.id.clone());
                Ok(())
            }
        });

        match adopted {
            Ok(()) => {
                info!(conversation = %summary.id, title = %summary.title, "conversation created");
                let id = summary.id.clone();
                self.emit(SessionEvent::ConversationCreated {
                    conversation: summary,
                });
                Ok(id)
            }
            Err(existing) => {
                warn!(orphan = %summary.id, conversation = %existing, "concurrent conversation creation, keeping the first");
                Ok(existing)
            }
        }
    }

    // =========================================================================
    // History and lifecycle
    // =========================================================================

    /// Replace the timeline with the persisted history of `conversation` and
    /// make it the active conversation.
    ///
    /// In-flight sends are discarded: their late responses are dropped.
    pub async fn load_history(&self, conversation: &ConversationId) -> Result<usize, SessionError> {
        let records = match self.api.list_messages(conversation).await {
            Ok(records) => records,
            Err(error) => {
                warn!(conversation = %conversation, error = %error, "history load failed");
                self.note_auth(&error);
                return Err(error.into());
            }
        };

        let entries = ingest::ingest_history(records);
        let entry_count = entries.len();
        let discarded = self.with_state(|s| {
            let discarded = s.pending.discard_all();
            s.surveys.clear();
            s.timeline.replace_all(entries);
            s.conversation = Some(conversation.clone());
            discarded
        });

        info!(conversation = %conversation, entry_count, discarded, "history loaded");
        self.emit(SessionEvent::HistoryLoaded {
            conversation_id: conversation.clone(),
            entry_count,
        });
        Ok(entry_count)
    }

    /// Start over with an empty timeline and no conversation. The next send
    /// creates a new one.
    pub fn reset(&self) {
        let discarded = self.with_state(|s| {
            let discarded = s.pending.discard_all();
            s.surveys.clear();
            s.timeline.replace_all(Vec::new());
            s.conversation = None;
            discarded
        });
        info!(discarded, "session reset");
    }

    /// Close every open progress stream. Safe to call repeatedly.
    pub fn shutdown(&self) -> usize {
        let closed = self.read_state_mut(|s| s.pending.close_streams());
        debug!(closed, "session shut down");
        closed
    }

    // =========================================================================
    // Survey drafts
    // =========================================================================

    pub fn select_option(&self, entry: CorrelationId, option_id: &str) -> Result<bool, SurveyError> {
        self.with_state(|s| {
            let survey = single_select(&s.timeline, &entry)?;
            let changed = s.surveys.select_option(entry, survey, option_id)?;
            if changed {
                s.timeline.touch();
            }
            Ok(changed)
        })
    }

    pub fn toggle_skill(
        &self,
        entry: CorrelationId,
        option_id: &str,
    ) -> Result<PickOutcome, SurveyError> {
        self.with_state(|s| {
            let survey = limited_multi(&s.timeline, &entry)?;
            let outcome = s.surveys.toggle_pick(entry, survey, option_id)?;
            if outcome != PickOutcome::Rejected {
                s.timeline.touch();
            } else {
                debug!(entry = %entry, option = option_id, "pick rejected");
            }
            Ok(outcome)
        })
    }

    pub fn set_system_decides(&self, entry: CorrelationId, on: bool) -> Result<bool, SurveyError> {
        self.with_state(|s| {
            let survey = limited_multi(&s.timeline, &entry)?;
            let changed = s.surveys.set_system_decides(entry, survey, on)?;
            if changed {
                s.timeline.touch();
            }
            Ok(changed)
        })
    }

    /// Record an answer in one batch. `Ok(false)` means the batch is locked.
    pub fn answer_insight(
        &self,
        entry: CorrelationId,
        batch_id: &str,
        insight_id: &str,
        answer_id: &str,
    ) -> Result<bool, SurveyError> {
        self.with_state(|s| {
            let survey = batched_insight(&s.timeline, &entry)?;
            let changed = s
                .surveys
                .answer_insight(entry, survey, batch_id, insight_id, answer_id)?;
            if changed {
                s.timeline.touch();
            }
            Ok(changed)
        })
    }

    pub fn single_select_draft(&self, entry: &CorrelationId) -> Option<SingleSelectDraft> {
        self.read_state(|s| s.surveys.single_draft(entry).cloned())
    }

    pub fn skills_draft(&self, entry: &CorrelationId) -> Option<LimitedMultiDraft> {
        self.read_state(|s| s.surveys.multi_draft(entry).cloned())
    }

    pub fn batch_draft(&self, entry: &CorrelationId, batch_id: &str) -> Option<SurveyBatchState> {
        self.read_state(|s| s.surveys.batch_state(entry, batch_id).cloned())
    }

    // =========================================================================
    // Survey submission
    // =========================================================================

    /// Submit the chosen employment category. On success the survey stays
    /// visible but inert and a confirmation turn is appended.
    pub async fn submit_single_select(&self, entry: CorrelationId) -> Result<(), SurveyError> {
        let body = self.with_state(|s| {
            let chat_id = active_conversation(s)?;
            let survey = single_select(&s.timeline, &entry)?;
            let vault_version = survey.vault_version.clone();
            let employment_category_id = s.surveys.begin_single_submit(entry)?;
            s.timeline.touch();
            Ok::<_, SurveyError>(EmploymentSubmission {
                chat_id,
                employment_category_id,
                vault_version,
            })
        })?;

        match self.api.submit_employment(&body).await {
            Ok(_) => {
                info!(entry = %entry, category = %body.employment_category_id, "employment category recorded");
                self.with_state(|s| {
                    s.surveys.finish_single_submit(entry, true);
                    s.timeline.append(TimelineEntry::assistant_text(
                        CorrelationId::new(),
                        EMPLOYMENT_RECORDED,
                    ));
                });
                Ok(())
            }
            Err(error) => {
                self.with_state(|s| {
                    s.surveys.finish_single_submit(entry, false);
                    s.timeline.touch();
                });
                Err(self.submit_failed(entry, None, error))
            }
        }
    }

    /// Submit the skills selection, or hand the choice to the system.
    pub async fn submit_skills(&self, entry: CorrelationId) -> Result<(), SurveyError> {
        let body = self.with_state(|s| {
            let chat_id = active_conversation(s)?;
            let survey = limited_multi(&s.timeline, &entry)?;
            let choice = s.surveys.begin_skills_submit(entry, survey)?;
            let body = SkillsSubmission {
                chat_id,
                employment_category_id: survey.employment_category_id.clone(),
                vault_version: survey.vault_version.clone(),
                let_system_decide: choice == SkillsChoice::SystemDecides,
                skills_selected: match choice {
                    SkillsChoice::Picks(picks) => Some(picks),
                    SkillsChoice::SystemDecides => None,
                },
            };
            s.timeline.touch();
            Ok::<_, SurveyError>(body)
        })?;

        match self.api.submit_skills(&body).await {
            Ok(receipt) => {
                info!(entry = %entry, mode = ?receipt.mode, count = ?receipt.skills_count, "skills recorded");
                let confirmation = if receipt.is_system_decide() {
                    SKILLS_SYSTEM_DECIDES
                } else {
                    SKILLS_RECORDED
                };
                self.with_state(|s| {
                    s.surveys.finish_skills_submit(entry, true);
                    s.timeline.append(TimelineEntry::assistant_text(
                        CorrelationId::new(),
                        confirmation,
                    ));
                });
                Ok(())
            }
            Err(error) => {
                self.with_state(|s| {
                    s.surveys.finish_skills_submit(entry, false);
                    s.timeline.touch();
                });
                Err(self.submit_failed(entry, None, error))
            }
        }
    }

    /// Submit one batch of a batched-insight survey.
    ///
    /// The batch is in flight until the server answers; on success the entry
    /// is patched with the confirmed snapshot (the server's echo when it sends
    /// one) and local answers are discarded. On failure the batch returns to
    /// editable with its answers intact.
    pub async fn submit_survey_batch(
        &self,
        entry: CorrelationId,
        batch_id: &str,
    ) -> Result<(), SurveyError> {
        let (body, responses) = self.with_state(|s| {
            let chat_id = active_conversation(s)?;
            let survey = batched_insight(&s.timeline, &entry)?;
            let responses = s.surveys.begin_batch_submit(entry, survey, batch_id)?;
            let msg_id = s
                .timeline
                .find(&entry)
                .and_then(|e| e.id.as_ref())
                .map(|id| id.0.clone());
            s.timeline.patch(&entry, |payload| {
                set_batch(payload, batch_id, BatchSubmission::InFlight)
            });
            let body = InsightSubmission {
                chat_id,
                msg_id,
                batch_id: batch_id.to_string(),
                responses: responses.iter().map(WireInsightResponse::from).collect(),
                submitted_at: Utc::now(),
            };
            Ok::<_, SurveyError>((body, responses))
        })?;
        debug!(entry = %entry, batch = batch_id, answers = responses.len(), "submitting batch");

        match self.api.submit_insights(&body).await {
            Ok(receipt) => {
                let confirmed = receipt
                    .submission
                    .map(WireSubmission::into_confirmed)
                    .unwrap_or(ConfirmedSubmission {
                        responses,
                        submitted_at: Some(body.submitted_at),
                    });
                self.with_state(|s| {
                    s.surveys.confirm_batch(entry, batch_id);
                    s.timeline.patch(&entry, |payload| {
                        set_batch(payload, batch_id, BatchSubmission::Confirmed(confirmed))
                    });
                });
                info!(entry = %entry, batch = batch_id, "batch confirmed");
                Ok(())
            }
            Err(error) => {
                self.with_state(|s| {
                    s.surveys.revert_batch(entry, batch_id);
                    s.timeline.patch(&entry, |payload| {
                        set_batch(payload, batch_id, BatchSubmission::Unsubmitted)
                    });
                });
                Err(self.submit_failed(entry, Some(batch_id.to_string()), error))
            }
        }
    }

    fn submit_failed(
        &self,
        entry: CorrelationId,
        batch_id: Option<String>,
        error: TransportError,
    ) -> SurveyError {
        warn!(entry = %entry, batch = ?batch_id, error = %error, "survey submission failed");
        self.emit(SessionEvent::SurveySubmitFailed {
            entry,
            batch_id,
            message: error.to_string(),
        });
        self.note_auth(&error);
        SurveyError::Submit(error)
    }

    // =========================================================================
    // State and events
    // =========================================================================

    /// Run one synchronous transition under the lock, then announce the new
    /// revision if the timeline changed.
    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, before, after) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let before = state.timeline.revision();
            let result = f(&mut state);
            (result, before, state.timeline.revision())
        };
        if after != before {
            self.emit(SessionEvent::TimelineChanged { revision: after });
        }
        result
    }

    fn read_state<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Mutation that never changes what is rendered.
    fn read_state_mut<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn emit(&self, event: SessionEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            trace!(event = name, "no subscribers");
        }
    }

    fn note_auth(&self, error: &TransportError) {
        if error.is_auth_expired() {
            warn!("credentials expired, sign-in required");
            self.emit(SessionEvent::AuthenticationRequired);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("conversation", &self.conversation())
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.read_state_mut(|s| s.pending.close_streams());
    }
}

/// First `max_chars` characters of the message as typed.
fn conversation_title(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

async fn next_event(
    stream: &mut Option<ProgressStream>,
) -> Option<Result<ProgressEvent, TransportError>> {
    match stream {
        Some(stream) => stream.next_event().await,
        None => std::future::pending().await,
    }
}

fn close_stream(stream: &mut Option<ProgressStream>) {
    if let Some(mut stream) = stream.take() {
        stream.close();
    }
}

fn active_conversation(state: &SessionState) -> Result<String, SurveyError> {
    state
        .conversation
        .as_ref()
        .map(|c| c.as_str().to_string())
        .ok_or(SurveyError::NoConversation)
}

fn find_survey<'a>(
    timeline: &'a TimelineStore,
    entry: &CorrelationId,
) -> Result<&'a Survey, SurveyError> {
    timeline
        .find(entry)
        .ok_or(SurveyError::UnknownEntry)?
        .survey()
        .ok_or(SurveyError::NotASurvey)
}

fn single_select<'a>(
    timeline: &'a TimelineStore,
    entry: &CorrelationId,
) -> Result<&'a SingleSelectSurvey, SurveyError> {
    match find_survey(timeline, entry)? {
        Survey::SingleSelect(survey) => Ok(survey),
        other => Err(wrong_kind(SurveyKind::SingleSelect, other)),
    }
}

fn limited_multi<'a>(
    timeline: &'a TimelineStore,
    entry: &CorrelationId,
) -> Result<&'a LimitedMultiSurvey, SurveyError> {
    match find_survey(timeline, entry)? {
        Survey::LimitedMultiSelect(survey) => Ok(survey),
        other => Err(wrong_kind(SurveyKind::LimitedMultiSelect, other)),
    }
}

fn batched_insight<'a>(
    timeline: &'a TimelineStore,
    entry: &CorrelationId,
) -> Result<&'a InsightSurvey, SurveyError> {
    match find_survey(timeline, entry)? {
        Survey::BatchedInsight(survey) => Ok(survey),
        other => Err(wrong_kind(SurveyKind::BatchedInsight, other)),
    }
}

fn wrong_kind(expected: SurveyKind, found: &Survey) -> SurveyError {
    SurveyError::WrongSurveyKind {
        expected,
        found: found.kind(),
    }
}

fn set_batch(payload: &mut EntryPayload, batch_id: &str, submission: BatchSubmission) {
    let EntryPayload::SurveyEnvelope(envelope) = payload else {
        return;
    };
    let Survey::BatchedInsight(survey) = &mut envelope.survey else {
        return;
    };
    match submission {
        BatchSubmission::Unsubmitted => {
            survey.submissions.remove(batch_id);
        }
        other => {
            survey.submissions.insert(batch_id.to_string(), other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_title_truncates_on_chars() {
        assert_eq!(conversation_title("hello", 40), "hello");
        assert_eq!(conversation_title("  hi  ", 3), "  h");
        let long = "é".repeat(50);
        assert_eq!(conversation_title(&long, 40).chars().count(), 40);
    }

    #[test]
    fn test_set_batch_ignores_other_payloads() {
        let mut payload = EntryPayload::Text(parley_core::types::TextPayload::plain("x"));
        set_batch(&mut payload, "b1", BatchSubmission::InFlight);
        assert_eq!(payload.kind(), parley_core::types::EntryKind::Text);
    }
}
