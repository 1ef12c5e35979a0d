use gpui::SharedString;

use crate::i18n::I18nManager;
use crate::id::unique_field_id;

use super::field::{FieldControl, FieldDefinition, FieldKind};

/// Creates field definitions with localized defaults and process-unique ids.
#[derive(Clone)]
pub struct FieldFactory {
    i18n: I18nManager,
}

impl FieldFactory {
    pub fn new(i18n: I18nManager) -> Self {
        Self { i18n }
    }

    pub fn i18n(&self) -> &I18nManager {
        &self.i18n
    }

    /// Creates a fresh field of `kind`.
    ///
    /// The label starts as the localized "untitled question" text, the field
    /// is optional, and option-backed kinds are seeded with a single default
    /// option.
    pub fn create(&self, kind: FieldKind) -> FieldDefinition {
        let options = if kind.has_options() {
            vec![self.default_option_label()]
        } else {
            Vec::new()
        };
        FieldDefinition::new(
            unique_field_id(),
            FieldControl::for_kind(kind, options),
            self.i18n.t("builder.untitled_question"),
            false,
            None,
        )
    }

    /// Copies `source` under a fresh id, marking the label as a copy.
    pub fn duplicate(&self, source: &FieldDefinition) -> FieldDefinition {
        let source_label: &str = &source.label;
        FieldDefinition::new(
            unique_field_id(),
            source.control().clone(),
            self.i18n
                .t_with("builder.copy_label", &[("label", source_label)]),
            source.required,
            source.placeholder.clone(),
        )
    }

    pub(crate) fn default_option_label(&self) -> SharedString {
        self.i18n.t("builder.default_option")
    }
}
