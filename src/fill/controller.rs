use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gpui::{SharedString, Window};

use crate::builder::FieldDefinition;
use crate::i18n::I18nManager;

use super::validation::validate_fields;

/// Lifecycle of one fill session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FillPhase {
    Filling,
    Submitting,
    Submitted,
}

/// A submitted value. Text kinds (short text, long text, email, dropdown)
/// carry a string; checkbox fields carry the checked option labels in the
/// order they were checked, without duplicates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AnswerValue {
    Text(String),
    Checks(Vec<String>),
}

impl AnswerValue {
    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Text(value) => value.is_empty(),
            AnswerValue::Checks(values) => values.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(value) => Some(value),
            AnswerValue::Checks(_) => None,
        }
    }

    pub fn as_checks(&self) -> Option<&[String]> {
        match self {
            AnswerValue::Text(_) => None,
            AnswerValue::Checks(values) => Some(values),
        }
    }

    pub fn rendered(&self) -> String {
        match self {
            AnswerValue::Text(value) => value.clone(),
            AnswerValue::Checks(values) => values.join(", "),
        }
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<Vec<String>> for AnswerValue {
    fn from(values: Vec<String>) -> Self {
        AnswerValue::Checks(values)
    }
}

/// Answers keyed by field id. Fields the user has not touched have no entry.
pub type AnswerMap = BTreeMap<String, AnswerValue>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FillOptions {
    pub focus_first_error_on_submit: bool,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            focus_first_error_on_submit: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FillSnapshot {
    pub phase: FillPhase,
    pub answers: AnswerMap,
    pub errors: BTreeMap<String, SharedString>,
    pub submit_count: u32,
    pub is_valid: bool,
    pub required_field_count: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FillError {
    StatePoisoned(&'static str),
    InvalidPhaseTransition { from: FillPhase, to: FillPhase },
    AlreadySubmitting,
}

impl Display for FillError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FillError::StatePoisoned(context) => {
                write!(f, "fill state lock poisoned while {context}")
            }
            FillError::InvalidPhaseTransition { from, to } => {
                write!(f, "invalid fill phase transition: {from:?} -> {to:?}")
            }
            FillError::AlreadySubmitting => f.write_str("a submission is already in flight"),
        }
    }
}

impl std::error::Error for FillError {}

pub type FillResult<T> = Result<T, FillError>;

/// What the submission collaborator reports back. The failure detail is
/// opaque to the engine; it is logged and the session returns to `Filling`.
pub type SubmitOutcome = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type FocusHandler = Arc<dyn Fn(&mut Window, &mut gpui::App) + Send + Sync>;
type ResetHandler = Arc<dyn Fn() + Send + Sync>;

struct FillState {
    fields: Vec<FieldDefinition>,
    answers: AnswerMap,
    errors: BTreeMap<String, SharedString>,
    phase: FillPhase,
    submit_count: u32,
    first_error: Option<String>,
}

/// Drives one interactive fill session over a form definition: collects
/// answers, validates on submit, and walks the
/// `Filling -> Submitting -> Submitted` machine. Clones share state, so the
/// controller can be handed into view callbacks.
#[derive(Clone)]
pub struct FillController {
    options: FillOptions,
    i18n: I18nManager,
    state: Arc<RwLock<FillState>>,
    focus_handlers: Arc<RwLock<BTreeMap<String, FocusHandler>>>,
    reset_handler: Arc<RwLock<Option<ResetHandler>>>,
}

impl FillController {
    pub fn new(fields: Vec<FieldDefinition>, options: FillOptions, i18n: I18nManager) -> Self {
        Self {
            options,
            i18n,
            state: Arc::new(RwLock::new(FillState {
                fields,
                answers: AnswerMap::new(),
                errors: BTreeMap::new(),
                phase: FillPhase::Filling,
                submit_count: 0,
                first_error: None,
            })),
            focus_handlers: Arc::new(RwLock::new(BTreeMap::new())),
            reset_handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn i18n(&self) -> &I18nManager {
        &self.i18n
    }

    pub fn phase(&self) -> FillResult<FillPhase> {
        Ok(read_lock(&self.state, "reading fill phase")?.phase)
    }

    pub fn snapshot(&self) -> FillResult<FillSnapshot> {
        let state = read_lock(&self.state, "creating fill snapshot")?;
        Ok(FillSnapshot {
            phase: state.phase,
            answers: state.answers.clone(),
            errors: state.errors.clone(),
            submit_count: state.submit_count,
            is_valid: state.errors.is_empty(),
            required_field_count: state.fields.iter().filter(|field| field.required).count(),
        })
    }

    /// Swaps in a new definition. When the field count changes, collected
    /// answers and errors no longer line up with the form and are discarded,
    /// returning the session to `Filling`.
    pub fn set_definition(&self, fields: Vec<FieldDefinition>) -> FillResult<()> {
        let mut state = write_lock(&self.state, "replacing fill definition")?;
        let field_count_changed = fields.len() != state.fields.len();
        state.fields = fields;
        if field_count_changed {
            state.answers.clear();
            state.errors.clear();
            state.first_error = None;
            state.phase = FillPhase::Filling;
        }
        Ok(())
    }

    /// Records an answer. Only honored while `Filling`; an error previously
    /// recorded for the field is cleared eagerly, without revalidating.
    pub fn set_answer(&self, field_id: &str, value: impl Into<AnswerValue>) -> FillResult<()> {
        let mut state = write_lock(&self.state, "recording answer")?;
        if state.phase != FillPhase::Filling {
            return Ok(());
        }
        state.answers.insert(field_id.to_string(), value.into());
        clear_field_error(&mut state, field_id);
        Ok(())
    }

    /// Flips one checkbox option in or out of the field's checked set,
    /// preserving the order options were checked in.
    pub fn toggle_check(&self, field_id: &str, option: &str) -> FillResult<()> {
        let mut state = write_lock(&self.state, "toggling checkbox option")?;
        if state.phase != FillPhase::Filling {
            return Ok(());
        }
        let entry = state
            .answers
            .entry(field_id.to_string())
            .or_insert_with(|| AnswerValue::Checks(Vec::new()));
        if let AnswerValue::Checks(values) = entry {
            match values.iter().position(|value| value == option) {
                Some(index) => {
                    values.remove(index);
                }
                None => values.push(option.to_string()),
            }
        } else {
            *entry = AnswerValue::Checks(vec![option.to_string()]);
        }
        clear_field_error(&mut state, field_id);
        Ok(())
    }

    pub fn answer(&self, field_id: &str) -> FillResult<Option<AnswerValue>> {
        Ok(read_lock(&self.state, "reading answer")?
            .answers
            .get(field_id)
            .cloned())
    }

    pub fn error(&self, field_id: &str) -> FillResult<Option<SharedString>> {
        Ok(read_lock(&self.state, "reading field error")?
            .errors
            .get(field_id)
            .cloned())
    }

    pub fn errors(&self) -> FillResult<BTreeMap<String, SharedString>> {
        Ok(read_lock(&self.state, "reading field errors")?
            .errors
            .clone())
    }

    /// Validates every field and stores the result as the session's error
    /// set. Returns the computed errors; an empty map means the form can be
    /// submitted.
    pub fn validate(&self) -> FillResult<BTreeMap<String, SharedString>> {
        let mut state = write_lock(&self.state, "validating answers")?;
        let errors = validate_fields(&state.fields, &state.answers, &self.i18n);
        state.first_error = state
            .fields
            .iter()
            .map(|field| field.id().to_string())
            .find(|id| errors.contains_key(id));
        state.errors = errors.clone();
        Ok(errors)
    }

    /// Validates, then hands the answers to the submission collaborator.
    ///
    /// Returns `Ok(true)` when the session reached `Submitted`. `Ok(false)`
    /// means the session stayed in `Filling`: either validation recorded
    /// errors, or the collaborator rejected the submission (logged, not
    /// surfaced as a field error, so the user can retry). A submit while one
    /// is already in flight fails with [`FillError::AlreadySubmitting`]
    /// without invoking the collaborator again.
    pub fn submit(&self, f: impl FnOnce(&AnswerMap) -> SubmitOutcome) -> FillResult<bool> {
        let answers = match self.begin_submit()? {
            Some(answers) => answers,
            None => return Ok(false),
        };
        self.finish_submit(f(&answers))
    }

    pub async fn submit_async<F, Fut>(&self, f: F) -> FillResult<bool>
    where
        F: FnOnce(AnswerMap) -> Fut,
        Fut: Future<Output = SubmitOutcome>,
    {
        let answers = match self.begin_submit()? {
            Some(answers) => answers,
            None => return Ok(false),
        };
        let outcome = f(answers).await;
        self.finish_submit(outcome)
    }

    /// [`submit`](Self::submit), then focuses the first invalid field when
    /// the options ask for it.
    pub fn submit_in(
        &self,
        window: &mut Window,
        cx: &mut gpui::App,
        f: impl FnOnce(&AnswerMap) -> SubmitOutcome,
    ) -> FillResult<bool> {
        let submitted = self.submit(f)?;
        if self.options.focus_first_error_on_submit {
            let _ = self.focus_first_error(window, cx)?;
        }
        Ok(submitted)
    }

    /// Clears answers and errors, returns to `Filling`, and notifies the
    /// reset collaborator if one is registered. Ignored while a submission
    /// is in flight.
    pub fn reset(&self) -> FillResult<()> {
        {
            let mut state = write_lock(&self.state, "resetting fill session")?;
            if state.phase == FillPhase::Submitting {
                return Ok(());
            }
            state.answers.clear();
            state.errors.clear();
            state.first_error = None;
            state.phase = FillPhase::Filling;
        }
        let handler = read_lock(&self.reset_handler, "reading reset handler")?.clone();
        if let Some(handler) = handler {
            handler();
        }
        Ok(())
    }

    pub fn register_focus_handler(
        &self,
        field_id: impl Into<String>,
        handler: impl Fn(&mut Window, &mut gpui::App) + Send + Sync + 'static,
    ) -> FillResult<()> {
        let mut handlers = write_lock(&self.focus_handlers, "registering focus handler")?;
        handlers.insert(field_id.into(), Arc::new(handler));
        Ok(())
    }

    pub fn set_reset_handler(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> FillResult<()> {
        let mut slot = write_lock(&self.reset_handler, "registering reset handler")?;
        *slot = Some(Arc::new(handler));
        Ok(())
    }

    pub fn focus_first_error(&self, window: &mut Window, cx: &mut gpui::App) -> FillResult<bool> {
        let first_error = read_lock(&self.state, "reading first error id")?
            .first_error
            .clone();
        let Some(field_id) = first_error else {
            return Ok(false);
        };
        let handler = read_lock(&self.focus_handlers, "reading focus handlers")?
            .get(&field_id)
            .cloned();
        if let Some(handler) = handler {
            handler(window, cx);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn required_field_count(&self) -> FillResult<usize> {
        Ok(read_lock(&self.state, "counting required fields")?
            .fields
            .iter()
            .filter(|field| field.required)
            .count())
    }

    /// The submitted-state recap: `(label, rendered value)` for every field
    /// with a non-empty answer, in definition order.
    pub fn answered_summary(&self) -> FillResult<Vec<(SharedString, String)>> {
        let state = read_lock(&self.state, "summarizing answers")?;
        Ok(state
            .fields
            .iter()
            .filter_map(|field| {
                let answer = state.answers.get(field.id())?;
                if answer.is_empty() {
                    return None;
                }
                Some((field.label.clone(), answer.rendered()))
            })
            .collect())
    }

    fn begin_submit(&self) -> FillResult<Option<AnswerMap>> {
        {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if state.phase == FillPhase::Submitting {
                return Err(FillError::AlreadySubmitting);
            }
            state.submit_count = state.submit_count.saturating_add(1);
        }

        if !self.validate()?.is_empty() {
            return Ok(None);
        }

        let mut state = write_lock(&self.state, "moving fill phase to submitting")?;
        if state.phase == FillPhase::Submitted {
            // A fresh attempt after a completed one restarts the machine.
            transition_phase(&mut state, FillPhase::Filling)?;
        }
        transition_phase(&mut state, FillPhase::Submitting)?;
        Ok(Some(state.answers.clone()))
    }

    fn finish_submit(&self, outcome: SubmitOutcome) -> FillResult<bool> {
        let mut state = write_lock(&self.state, "completing submit")?;
        match outcome {
            Ok(()) => {
                transition_phase(&mut state, FillPhase::Submitted)?;
                Ok(true)
            }
            Err(error) => {
                log::warn!("form submission failed: {error}");
                transition_phase(&mut state, FillPhase::Filling)?;
                Ok(false)
            }
        }
    }
}

fn clear_field_error(state: &mut FillState, field_id: &str) {
    state.errors.remove(field_id);
    if state.first_error.as_deref() == Some(field_id) {
        state.first_error = None;
    }
}

fn transition_phase(state: &mut FillState, next: FillPhase) -> FillResult<()> {
    let current = state.phase;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (FillPhase::Filling, FillPhase::Submitting)
            | (FillPhase::Submitting, FillPhase::Submitted)
            | (FillPhase::Submitting, FillPhase::Filling)
            | (FillPhase::Submitted, FillPhase::Filling)
    );
    if !allowed {
        return Err(FillError::InvalidPhaseTransition {
            from: current,
            to: next,
        });
    }
    state.phase = next;
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FillResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FillError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FillResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FillError::StatePoisoned(context))
}
