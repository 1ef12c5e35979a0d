pub use crate::bridge::{
    BridgeError, BridgeResult, FormConfigStore, FormRecord, InMemoryFormConfigStore,
    PersistedField, from_persisted, to_persisted,
};
pub use crate::builder::{
    DragState, FieldControl, FieldDefinition, FieldEditor, FieldFactory, FieldKind, FormStore,
    PaletteEntry, palette_entries,
};
pub use crate::fill::{
    AnswerMap, AnswerValue, FieldSurface, FillController, FillError, FillOptions, FillPhase,
    FillResult, FillSnapshot, SubmitOutcome, resolve_surface,
};
pub use crate::i18n::{I18nManager, Locale};
