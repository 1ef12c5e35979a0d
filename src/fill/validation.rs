use std::collections::BTreeMap;

use gpui::SharedString;

use crate::builder::{FieldDefinition, FieldKind};
use crate::i18n::I18nManager;

use super::controller::{AnswerMap, AnswerValue};

/// Checks every field of the definition against the answers collected so
/// far. A field gets at most one error: a missing required answer wins over
/// the email-format rule, and the format rule only applies to a present,
/// non-empty value.
pub(super) fn validate_fields(
    fields: &[FieldDefinition],
    answers: &AnswerMap,
    i18n: &I18nManager,
) -> BTreeMap<String, SharedString> {
    let mut errors = BTreeMap::new();
    for field in fields {
        let answer = answers.get(field.id());
        if field.required && answer.is_none_or(AnswerValue::is_empty) {
            errors.insert(field.id().to_string(), i18n.t("fill.error.required"));
            continue;
        }
        if field.kind() == FieldKind::Email
            && let Some(AnswerValue::Text(value)) = answer
            && !value.is_empty()
            && !is_valid_email(value)
        {
            errors.insert(field.id().to_string(), i18n.t("fill.error.email"));
        }
    }
    errors
}

/// Accepts addresses of the shape `local@domain` where neither part contains
/// whitespace or a second `@`, and the domain carries an interior dot.
pub fn is_valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    if local.chars().any(char::is_whitespace) || domain.chars().any(char::is_whitespace) {
        return false;
    }
    domain
        .char_indices()
        .any(|(index, ch)| ch == '.' && index > 0 && index + 1 < domain.len())
}
