use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::builder::{FieldControl, FieldDefinition, FieldKind};

/// Wire representation of one field, as the form-persistence API stores and
/// returns it. `placeholder` travels inside the free-form `properties` map;
/// unknown property keys are preserved on load and ignored by the builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedField {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Value>>,
}

pub fn kind_code(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::ShortText => "text",
        FieldKind::LongText => "textarea",
        FieldKind::Email => "email",
        FieldKind::Dropdown => "dropdown",
        FieldKind::Checkbox => "checkbox",
    }
}

/// Inverse of [`kind_code`]. An unrecognized code degrades to
/// [`FieldKind::ShortText`] so one malformed record never blocks loading the
/// rest of a form.
pub fn kind_from_code(code: &str) -> FieldKind {
    match code {
        "textarea" => FieldKind::LongText,
        "email" => FieldKind::Email,
        "dropdown" => FieldKind::Dropdown,
        "checkbox" => FieldKind::Checkbox,
        _ => FieldKind::ShortText,
    }
}

pub fn to_persisted(fields: &[FieldDefinition]) -> Vec<PersistedField> {
    fields.iter().map(persist_field).collect()
}

fn persist_field(field: &FieldDefinition) -> PersistedField {
    let properties = field.placeholder.as_ref().map(|placeholder| {
        BTreeMap::from([(
            "placeholder".to_string(),
            Value::String(placeholder.to_string()),
        )])
    });
    PersistedField {
        id: field.id().to_string(),
        kind: kind_code(field.kind()).to_string(),
        label: field.label.to_string(),
        required: field.required,
        options: field
            .options()
            .map(|options| options.iter().map(ToString::to_string).collect()),
        properties,
    }
}

pub fn from_persisted(records: Vec<PersistedField>) -> Vec<FieldDefinition> {
    records.into_iter().map(restore_field).collect()
}

fn restore_field(record: PersistedField) -> FieldDefinition {
    let kind = kind_from_code(&record.kind);
    // A persisted option-backed record without an options key becomes an
    // empty list; seeding the default option is an authoring-time concern.
    let options = if kind.has_options() {
        record
            .options
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect()
    } else {
        Vec::new()
    };
    let placeholder = record
        .properties
        .as_ref()
        .and_then(|properties| properties.get("placeholder"))
        .and_then(Value::as_str)
        .map(|placeholder| placeholder.to_string().into());
    FieldDefinition::new(
        record.id,
        FieldControl::for_kind(kind, options),
        record.label.into(),
        record.required,
        placeholder,
    )
}
