use gpui::SharedString;

/// Closed set of question kinds the builder offers.
///
/// A field's kind is fixed at creation; changing it means deleting the field
/// and creating a new one.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FieldKind {
    ShortText,
    LongText,
    Email,
    Dropdown,
    Checkbox,
}

impl FieldKind {
    pub const ALL: [FieldKind; 5] = [
        FieldKind::ShortText,
        FieldKind::LongText,
        FieldKind::Email,
        FieldKind::Dropdown,
        FieldKind::Checkbox,
    ];

    pub fn has_options(self) -> bool {
        matches!(self, FieldKind::Dropdown | FieldKind::Checkbox)
    }
}

/// Per-kind payload of a field definition.
///
/// Option lists exist only on the two option-backed variants, so "options
/// present iff Dropdown/Checkbox" holds by construction rather than by
/// convention on an optional struct field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldControl {
    ShortText,
    LongText,
    Email,
    Dropdown { options: Vec<SharedString> },
    Checkbox { options: Vec<SharedString> },
}

impl FieldControl {
    pub(crate) fn for_kind(kind: FieldKind, options: Vec<SharedString>) -> Self {
        match kind {
            FieldKind::ShortText => FieldControl::ShortText,
            FieldKind::LongText => FieldControl::LongText,
            FieldKind::Email => FieldControl::Email,
            FieldKind::Dropdown => FieldControl::Dropdown { options },
            FieldKind::Checkbox => FieldControl::Checkbox { options },
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldControl::ShortText => FieldKind::ShortText,
            FieldControl::LongText => FieldKind::LongText,
            FieldControl::Email => FieldKind::Email,
            FieldControl::Dropdown { .. } => FieldKind::Dropdown,
            FieldControl::Checkbox { .. } => FieldKind::Checkbox,
        }
    }

    pub fn options(&self) -> Option<&[SharedString]> {
        match self {
            FieldControl::Dropdown { options } | FieldControl::Checkbox { options } => {
                Some(options)
            }
            _ => None,
        }
    }

    pub fn options_mut(&mut self) -> Option<&mut Vec<SharedString>> {
        match self {
            FieldControl::Dropdown { options } | FieldControl::Checkbox { options } => {
                Some(options)
            }
            _ => None,
        }
    }
}

/// One question of a form definition.
///
/// `id` and the control's kind are immutable after creation; everything else
/// is edited through the [`FieldEditor`](crate::builder::FieldEditor).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldDefinition {
    id: String,
    control: FieldControl,
    pub label: SharedString,
    pub required: bool,
    pub placeholder: Option<SharedString>,
}

impl FieldDefinition {
    pub(crate) fn new(
        id: String,
        control: FieldControl,
        label: SharedString,
        required: bool,
        placeholder: Option<SharedString>,
    ) -> Self {
        Self {
            id,
            control,
            label,
            required,
            placeholder,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> FieldKind {
        self.control.kind()
    }

    pub fn control(&self) -> &FieldControl {
        &self.control
    }

    pub fn options(&self) -> Option<&[SharedString]> {
        self.control.options()
    }

    pub fn options_mut(&mut self) -> Option<&mut Vec<SharedString>> {
        self.control.options_mut()
    }
}
