//! Local answer state for surveys and the rules that gate submission.
//!
//! The tracker never talks to the server. The facade asks it to begin a
//! submission (validating and locking the draft), performs the call, then
//! reports back with `finish_*`, `confirm_batch`, or `revert_batch`.

use std::collections::{BTreeMap, HashMap};

use parley_core::types::{
    BatchSubmission, CorrelationId, InsightAnswer, InsightResponse, InsightSurvey,
    LimitedMultiSurvey, QuestionMode, SingleSelectSurvey,
};

use crate::error::SurveyError;

pub const EMPLOYMENT_RECORDED: &str = "We have recorded your employment category.";
pub const SKILLS_SYSTEM_DECIDES: &str =
    "The system will pick a skill development plan for you, so there is no need to choose where to start.";
pub const SKILLS_RECORDED: &str = "Great, now we know which skills you want to improve.";

// =============================================================================
// Single select
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingleSelectDraft {
    selected: Option<String>,
    submitting: bool,
    submitted: bool,
}

impl SingleSelectDraft {
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Submitted surveys stay visible but accept nothing further.
    pub fn is_inert(&self) -> bool {
        self.submitted
    }

    pub fn can_submit(&self) -> bool {
        self.selected.is_some() && !self.submitting && !self.submitted
    }

    fn is_editable(&self) -> bool {
        !self.submitting && !self.submitted
    }
}

// =============================================================================
// Limited multi select
// =============================================================================

/// Result of toggling one pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickOutcome {
    Added,
    Removed,
    /// Over the limit, or the draft is locked.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitedMultiDraft {
    picks: Vec<String>,
    system_decides: bool,
    max: usize,
    submitting: bool,
    submitted: bool,
}

impl LimitedMultiDraft {
    pub fn new(max: usize) -> Self {
        Self {
            picks: Vec::new(),
            system_decides: false,
            max,
            submitting: false,
            submitted: false,
        }
    }

    /// Picks in first-selected order.
    pub fn picks(&self) -> &[String] {
        &self.picks
    }

    pub fn system_decides(&self) -> bool {
        self.system_decides
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn is_inert(&self) -> bool {
        self.submitted
    }

    /// Either "system decides", or between one and `max` picks.
    pub fn can_submit(&self) -> bool {
        if self.submitting || self.submitted {
            return false;
        }
        self.system_decides || (1..=self.max).contains(&self.picks.len())
    }

    pub fn toggle_pick(&mut self, option_id: &str) -> PickOutcome {
        if self.submitting || self.submitted {
            return PickOutcome::Rejected;
        }
        if let Some(pos) = self.picks.iter().position(|p| p == option_id) {
            self.picks.remove(pos);
            return PickOutcome::Removed;
        }
        if self.system_decides || self.picks.len() >= self.max {
            return PickOutcome::Rejected;
        }
        self.picks.push(option_id.to_string());
        PickOutcome::Added
    }

    /// Turning "system decides" on clears every pick.
    pub fn set_system_decides(&mut self, on: bool) -> bool {
        if self.submitting || self.submitted {
            return false;
        }
        self.system_decides = on;
        if on {
            self.picks.clear();
        }
        true
    }
}

/// What a skills submission sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillsChoice {
    SystemDecides,
    Picks(Vec<String>),
}

// =============================================================================
// Batched insight
// =============================================================================

/// A locally accumulated answer to one question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DraftAnswer {
    #[default]
    Unanswered,
    Single(String),
    Multi(Vec<String>),
}

impl DraftAnswer {
    fn to_answer(&self) -> Option<InsightAnswer> {
        match self {
            DraftAnswer::Single(id) if !id.is_empty() => Some(InsightAnswer::One(id.clone())),
            DraftAnswer::Multi(ids) if !ids.is_empty() => Some(InsightAnswer::Many(ids.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPhase {
    #[default]
    Unsubmitted,
    InFlight,
    Confirmed,
}

impl From<&BatchSubmission> for BatchPhase {
    fn from(submission: &BatchSubmission) -> Self {
        match submission {
            BatchSubmission::Unsubmitted => BatchPhase::Unsubmitted,
            BatchSubmission::InFlight => BatchPhase::InFlight,
            BatchSubmission::Confirmed(_) => BatchPhase::Confirmed,
        }
    }
}

/// Answers for one batch, frozen once the batch leaves `Unsubmitted`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurveyBatchState {
    batch_id: String,
    answers: BTreeMap<String, DraftAnswer>,
    phase: BatchPhase,
}

impl SurveyBatchState {
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            ..Self::default()
        }
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn is_locked(&self) -> bool {
        self.phase != BatchPhase::Unsubmitted
    }

    pub fn answer(&self, insight_id: &str) -> &DraftAnswer {
        self.answers
            .get(insight_id)
            .unwrap_or(&DraftAnswer::Unanswered)
    }

    pub fn choose_single(&mut self, insight_id: &str, answer_id: &str) -> bool {
        if self.is_locked() {
            return false;
        }
        self.answers.insert(
            insight_id.to_string(),
            DraftAnswer::Single(answer_id.to_string()),
        );
        true
    }

    pub fn toggle_multi(&mut self, insight_id: &str, answer_id: &str) -> bool {
        if self.is_locked() {
            return false;
        }
        let slot = self.answers.entry(insight_id.to_string()).or_default();
        let mut ids = match std::mem::take(slot) {
            DraftAnswer::Multi(ids) => ids,
            _ => Vec::new(),
        };
        match ids.iter().position(|id| id == answer_id) {
            Some(pos) => {
                ids.remove(pos);
            }
            None => ids.push(answer_id.to_string()),
        }
        *slot = DraftAnswer::Multi(ids);
        true
    }

    /// Exactly one answer shape per question; questions without an answer
    /// are left out.
    pub fn build_responses(&self) -> Vec<InsightResponse> {
        self.answers
            .iter()
            .filter_map(|(insight_id, draft)| {
                draft.to_answer().map(|answer| InsightResponse {
                    insight_id: insight_id.clone(),
                    answer,
                })
            })
            .collect()
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Drafts for every survey in the timeline, keyed by entry correlation id.
#[derive(Debug, Default)]
pub struct SurveyTracker {
    single: HashMap<CorrelationId, SingleSelectDraft>,
    multi: HashMap<CorrelationId, LimitedMultiDraft>,
    batches: HashMap<(CorrelationId, String), SurveyBatchState>,
}

impl SurveyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.single.clear();
        self.multi.clear();
        self.batches.clear();
    }

    pub fn single_draft(&self, entry: &CorrelationId) -> Option<&SingleSelectDraft> {
        self.single.get(entry)
    }

    pub fn multi_draft(&self, entry: &CorrelationId) -> Option<&LimitedMultiDraft> {
        self.multi.get(entry)
    }

    pub fn batch_state(&self, entry: &CorrelationId, batch_id: &str) -> Option<&SurveyBatchState> {
        self.batches.get(&(*entry, batch_id.to_string()))
    }

    // ---- single select ----

    /// Returns `false` when the draft no longer accepts changes.
    pub fn select_option(
        &mut self,
        entry: CorrelationId,
        survey: &SingleSelectSurvey,
        option_id: &str,
    ) -> Result<bool, SurveyError> {
        if !survey.has_option(option_id) {
            return Err(SurveyError::UnknownOption(option_id.to_string()));
        }
        let draft = self.single.entry(entry).or_default();
        if !draft.is_editable() {
            return Ok(false);
        }
        draft.selected = Some(option_id.to_string());
        Ok(true)
    }

    pub fn begin_single_submit(&mut self, entry: CorrelationId) -> Result<String, SurveyError> {
        let draft = self.single.entry(entry).or_default();
        if draft.submitted {
            return Err(SurveyError::Locked);
        }
        if draft.submitting {
            return Err(SurveyError::InFlight);
        }
        let selected = draft.selected.clone().ok_or(SurveyError::NotReady)?;
        draft.submitting = true;
        Ok(selected)
    }

    pub fn finish_single_submit(&mut self, entry: CorrelationId, succeeded: bool) {
        if let Some(draft) = self.single.get_mut(&entry) {
            draft.submitting = false;
            draft.submitted = succeeded;
        }
    }

    // ---- limited multi select ----

    pub fn toggle_pick(
        &mut self,
        entry: CorrelationId,
        survey: &LimitedMultiSurvey,
        option_id: &str,
    ) -> Result<PickOutcome, SurveyError> {
        if !survey.has_option(option_id) {
            return Err(SurveyError::UnknownOption(option_id.to_string()));
        }
        Ok(self.multi_entry(entry, survey).toggle_pick(option_id))
    }

    pub fn set_system_decides(
        &mut self,
        entry: CorrelationId,
        survey: &LimitedMultiSurvey,
        on: bool,
    ) -> Result<bool, SurveyError> {
        if on && !survey.allow_system_decide {
            return Err(SurveyError::NotReady);
        }
        Ok(self.multi_entry(entry, survey).set_system_decides(on))
    }

    pub fn begin_skills_submit(
        &mut self,
        entry: CorrelationId,
        survey: &LimitedMultiSurvey,
    ) -> Result<SkillsChoice, SurveyError> {
        let draft = self.multi_entry(entry, survey);
        if draft.submitted {
            return Err(SurveyError::Locked);
        }
        if draft.submitting {
            return Err(SurveyError::InFlight);
        }
        if !draft.can_submit() {
            return Err(SurveyError::NotReady);
        }
        draft.submitting = true;
        Ok(if draft.system_decides {
            SkillsChoice::SystemDecides
        } else {
            SkillsChoice::Picks(draft.picks.clone())
        })
    }

    pub fn finish_skills_submit(&mut self, entry: CorrelationId, succeeded: bool) {
        if let Some(draft) = self.multi.get_mut(&entry) {
            draft.submitting = false;
            draft.submitted = succeeded;
        }
    }

    fn multi_entry(
        &mut self,
        entry: CorrelationId,
        survey: &LimitedMultiSurvey,
    ) -> &mut LimitedMultiDraft {
        self.multi
            .entry(entry)
            .or_insert_with(|| LimitedMultiDraft::new(survey.max))
    }

    // ---- batched insight ----

    /// Record an answer: single-mode questions replace, multi-mode toggle.
    ///
    /// Returns `false` when the batch is locked (in flight or confirmed).
    pub fn answer_insight(
        &mut self,
        entry: CorrelationId,
        survey: &InsightSurvey,
        batch_id: &str,
        insight_id: &str,
        answer_id: &str,
    ) -> Result<bool, SurveyError> {
        let batch = survey
            .batch(batch_id)
            .ok_or_else(|| SurveyError::UnknownBatch(batch_id.to_string()))?;
        let question = batch
            .question(insight_id)
            .ok_or_else(|| SurveyError::UnknownOption(insight_id.to_string()))?;
        if !question.has_option(answer_id) {
            return Err(SurveyError::UnknownOption(answer_id.to_string()));
        }
        if BatchPhase::from(survey.submission(batch_id)) != BatchPhase::Unsubmitted {
            return Ok(false);
        }

        let state = self.batch_entry(entry, batch_id);
        Ok(match question.mode {
            QuestionMode::Single => state.choose_single(insight_id, answer_id),
            QuestionMode::Multi => state.toggle_multi(insight_id, answer_id),
        })
    }

    /// Lock the batch and return the responses to send.
    pub fn begin_batch_submit(
        &mut self,
        entry: CorrelationId,
        survey: &InsightSurvey,
        batch_id: &str,
    ) -> Result<Vec<InsightResponse>, SurveyError> {
        if survey.batch(batch_id).is_none() {
            return Err(SurveyError::UnknownBatch(batch_id.to_string()));
        }
        match BatchPhase::from(survey.submission(batch_id)) {
            BatchPhase::Confirmed => return Err(SurveyError::Locked),
            BatchPhase::InFlight => return Err(SurveyError::InFlight),
            BatchPhase::Unsubmitted => {}
        }

        let state = self.batch_entry(entry, batch_id);
        match state.phase {
            BatchPhase::Confirmed => return Err(SurveyError::Locked),
            BatchPhase::InFlight => return Err(SurveyError::InFlight),
            BatchPhase::Unsubmitted => {}
        }
        let responses = state.build_responses();
        if responses.is_empty() {
            return Err(SurveyError::EmptyBatch);
        }
        state.phase = BatchPhase::InFlight;
        Ok(responses)
    }

    /// The server accepted the batch. Local answers are dropped; the
    /// confirmed snapshot lives on the timeline entry.
    pub fn confirm_batch(&mut self, entry: CorrelationId, batch_id: &str) {
        let state = self.batch_entry(entry, batch_id);
        state.answers.clear();
        state.phase = BatchPhase::Confirmed;
    }

    /// The submission failed: the batch becomes editable with its answers intact.
    pub fn revert_batch(&mut self, entry: CorrelationId, batch_id: &str) {
        if let Some(state) = self.batches.get_mut(&(entry, batch_id.to_string())) {
            state.phase = BatchPhase::Unsubmitted;
        }
    }

    fn batch_entry(&mut self, entry: CorrelationId, batch_id: &str) -> &mut SurveyBatchState {
        self.batches
            .entry((entry, batch_id.to_string()))
            .or_insert_with(|| SurveyBatchState::new(batch_id))
    }
}
