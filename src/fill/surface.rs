use gpui::SharedString;

use crate::builder::{FieldControl, FieldDefinition};
use crate::i18n::I18nManager;

use super::controller::{AnswerMap, AnswerValue};

/// The input surface a view renders for one field, with the current answer
/// already folded in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldSurface {
    /// Single-line text entry.
    SingleLine {
        value: String,
        placeholder: SharedString,
    },
    /// Multi-line text entry.
    MultiLine {
        value: String,
        placeholder: SharedString,
    },
    /// Single-line entry with email affordances (keyboard, autofill).
    EmailLine {
        value: String,
        placeholder: SharedString,
    },
    /// Single-selection control. `selected: None` means the sentinel
    /// placeholder option is showing.
    OptionPicker {
        selected: Option<String>,
        sentinel: SharedString,
        options: Vec<SharedString>,
    },
    /// One toggle per option; checked state per option label.
    ToggleGroup { options: Vec<(SharedString, bool)> },
}

pub fn resolve_surface(
    field: &FieldDefinition,
    answers: &AnswerMap,
    i18n: &I18nManager,
) -> FieldSurface {
    let answer = answers.get(field.id());
    match field.control() {
        FieldControl::ShortText => FieldSurface::SingleLine {
            value: text_answer(answer),
            placeholder: placeholder_for(field, i18n, "fill.answer_placeholder"),
        },
        FieldControl::LongText => FieldSurface::MultiLine {
            value: text_answer(answer),
            placeholder: placeholder_for(field, i18n, "fill.answer_placeholder"),
        },
        FieldControl::Email => FieldSurface::EmailLine {
            value: text_answer(answer),
            placeholder: placeholder_for(field, i18n, "fill.email_placeholder"),
        },
        FieldControl::Dropdown { options } => {
            let selected = answer
                .and_then(AnswerValue::as_text)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string);
            FieldSurface::OptionPicker {
                selected,
                sentinel: placeholder_for(field, i18n, "fill.select_placeholder"),
                options: options.clone(),
            }
        }
        FieldControl::Checkbox { options } => {
            let checked = answer.and_then(AnswerValue::as_checks).unwrap_or_default();
            FieldSurface::ToggleGroup {
                options: options
                    .iter()
                    .map(|option| {
                        let option_label: &str = option;
                        (
                            option.clone(),
                            checked.iter().any(|value| value == option_label),
                        )
                    })
                    .collect(),
            }
        }
    }
}

fn text_answer(answer: Option<&AnswerValue>) -> String {
    answer
        .and_then(AnswerValue::as_text)
        .unwrap_or_default()
        .to_string()
}

fn placeholder_for(
    field: &FieldDefinition,
    i18n: &I18nManager,
    fallback_key: &str,
) -> SharedString {
    field
        .placeholder
        .clone()
        .filter(|placeholder| !placeholder.is_empty())
        .unwrap_or_else(|| i18n.t(fallback_key))
}
