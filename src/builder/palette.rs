use gpui::SharedString;

use crate::i18n::I18nManager;

use super::factory::FieldFactory;
use super::field::FieldKind;
use super::store::FormStore;

/// One entry of the field-type palette the authoring sidebar offers.
#[derive(Clone, Debug)]
pub struct PaletteEntry {
    pub kind: FieldKind,
    pub label: SharedString,
}

pub fn palette_entries(i18n: &I18nManager) -> Vec<PaletteEntry> {
    FieldKind::ALL
        .into_iter()
        .map(|kind| PaletteEntry {
            kind,
            label: i18n.t(palette_label_key(kind)),
        })
        .collect()
}

fn palette_label_key(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::ShortText => "builder.palette.short_text",
        FieldKind::LongText => "builder.palette.long_text",
        FieldKind::Email => "builder.palette.email",
        FieldKind::Dropdown => "builder.palette.dropdown",
        FieldKind::Checkbox => "builder.palette.checkbox",
    }
}

/// Tracks the palette drag gesture.
///
/// Dragging carries a field *kind*, not a field instance: dropping creates a
/// brand-new field of that kind at the end of the store. At most one kind is
/// in flight at a time.
#[derive(Clone, Copy, Debug, Default)]
pub struct DragState {
    dragged: Option<FieldKind>,
}

impl DragState {
    pub fn on_drag_start(&mut self, kind: FieldKind) {
        self.dragged = Some(kind);
    }

    pub fn dragged(&self) -> Option<FieldKind> {
        self.dragged
    }

    /// Consumes the in-flight kind, appending a freshly created field to
    /// `store`. Returns the new field's id, or `None` when nothing was being
    /// dragged.
    pub fn on_drop(&mut self, factory: &FieldFactory, store: &mut FormStore) -> Option<String> {
        let kind = self.dragged.take()?;
        let field = factory.create(kind);
        let id = field.id().to_string();
        store.append(field);
        Some(id)
    }
}

pub fn can_move_up(index: usize) -> bool {
    index > 0
}

pub fn can_move_down(index: usize, len: usize) -> bool {
    index + 1 < len
}

/// Moves the field at `index` one slot toward the front. Returns whether the
/// store changed; the top field never moves.
pub fn move_up(store: &mut FormStore, index: usize) -> bool {
    if !can_move_up(index) || index >= store.len() {
        return false;
    }
    store.move_field(index, index - 1);
    true
}

/// Moves the field at `index` one slot toward the back. Returns whether the
/// store changed; the bottom field never moves.
pub fn move_down(store: &mut FormStore, index: usize) -> bool {
    if !can_move_down(index, store.len()) {
        return false;
    }
    store.move_field(index, index + 1);
    true
}
