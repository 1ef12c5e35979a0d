use gpui::SharedString;

use crate::i18n::I18nManager;

use super::field::FieldDefinition;
use super::store::FormStore;

/// Localized editing surface for one field.
///
/// The editor owns a working copy of the field; nothing it does is visible in
/// the [`FormStore`] until [`save`](FieldEditor::save) commits the draft.
/// Malformed input (empty label, empty option text) is ignored rather than
/// reported; render-time validation is where such problems surface.
pub struct FieldEditor {
    draft: FieldDefinition,
}

impl FieldEditor {
    /// Opens an editor over a copy of `field`.
    ///
    /// An option-backed field that arrives without any options (forms loaded
    /// from persisted data predating the seeded-default invariant) is
    /// normalized to a single default option before editing begins.
    pub fn open(field: FieldDefinition, i18n: &I18nManager) -> Self {
        let mut draft = field;
        if let Some(options) = draft.options_mut()
            && options.is_empty()
        {
            options.push(i18n.t("builder.default_option"));
        }
        Self { draft }
    }

    pub fn draft(&self) -> &FieldDefinition {
        &self.draft
    }

    pub fn set_label(&mut self, label: impl Into<SharedString>) {
        self.draft.label = label.into();
    }

    /// Sets the hint text. An empty or whitespace-only value clears it.
    pub fn set_placeholder(&mut self, placeholder: impl Into<SharedString>) {
        let placeholder = placeholder.into();
        self.draft.placeholder = if placeholder.trim().is_empty() {
            None
        } else {
            Some(placeholder)
        };
    }

    pub fn set_required(&mut self, required: bool) {
        self.draft.required = required;
    }

    /// Appends a trimmed option. Ignored for kinds without options and for
    /// text that is empty after trimming.
    pub fn add_option(&mut self, text: impl Into<SharedString>) {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let trimmed: SharedString = trimmed.to_string().into();
        if let Some(options) = self.draft.options_mut() {
            options.push(trimmed);
        }
    }

    /// Rewrites the option at `index` in place. Out-of-range indices and
    /// option-less kinds are ignored.
    pub fn set_option(&mut self, index: usize, text: impl Into<SharedString>) {
        let text = text.into();
        if let Some(options) = self.draft.options_mut()
            && let Some(slot) = options.get_mut(index)
        {
            *slot = text;
        }
    }

    /// Removes the option at `index`. Removing the last remaining option is
    /// legal; an empty list is a valid transient state of the draft.
    pub fn remove_option(&mut self, index: usize) {
        if let Some(options) = self.draft.options_mut()
            && index < options.len()
        {
            options.remove(index);
        }
    }

    /// Commits the draft into `store`, replacing the entry with the same id,
    /// and closes the editor.
    pub fn save(self, store: &mut FormStore) {
        store.replace(self.draft);
    }

    /// Discards the draft and closes the editor. The store is untouched.
    pub fn cancel(self) {}

    /// Removes this field from `store` and closes the editor.
    pub fn delete(self, store: &mut FormStore) {
        store.remove(self.draft.id());
    }
}
