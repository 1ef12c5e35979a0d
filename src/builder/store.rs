use super::factory::FieldFactory;
use super::field::FieldDefinition;

/// Ordered collection of field definitions for one authoring session.
///
/// Order is significant: it is both render order and storage order. Field ids
/// are unique within the store; the factory's id allocator guarantees this
/// for appended fields.
#[derive(Clone, Debug, Default)]
pub struct FormStore {
    fields: Vec<FieldDefinition>,
}

impl FormStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Vec<FieldDefinition>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<FieldDefinition> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.id() == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.id() == id)
    }

    pub fn append(&mut self, field: FieldDefinition) {
        self.fields.push(field);
    }

    /// Replaces the field whose id matches `field`, keeping its position.
    ///
    /// A stale id (field deleted since the caller took its copy) drops the
    /// update silently; the miss is logged for diagnostics.
    pub fn replace(&mut self, field: FieldDefinition) {
        match self.index_of(field.id()) {
            Some(index) => self.fields[index] = field,
            None => log::debug!("dropping update for unknown field id {}", field.id()),
        }
    }

    pub fn remove(&mut self, id: &str) {
        if let Some(index) = self.index_of(id) {
            self.fields.remove(index);
        }
    }

    /// Appends a copy of the matching field with a fresh id and a label
    /// marked as a copy. Returns the copy, or `None` when `id` is unknown.
    pub fn duplicate(&mut self, id: &str, factory: &FieldFactory) -> Option<&FieldDefinition> {
        let copy = factory.duplicate(self.field(id)?);
        self.fields.push(copy);
        self.fields.last()
    }

    /// Moves the field at `from` so it ends up at index `to` of the resulting
    /// sequence (remove-then-insert semantics). Out-of-range indices leave
    /// the sequence untouched.
    pub fn move_field(&mut self, from: usize, to: usize) {
        if from >= self.fields.len() || to >= self.fields.len() {
            return;
        }
        let field = self.fields.remove(from);
        self.fields.insert(to, field);
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }
}
