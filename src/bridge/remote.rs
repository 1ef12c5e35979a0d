use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::builder::FormStore;

use super::format::{PersistedField, from_persisted, to_persisted};

/// Payload shape of the form-persistence endpoints: one record per event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormRecord {
    pub event_id: String,
    pub form_config: Vec<PersistedField>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BridgeError {
    SaveFailed(String),
    LoadFailed(String),
    DeleteFailed(String),
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::SaveFailed(error) => write!(f, "failed to save form config: {error}"),
            BridgeError::LoadFailed(error) => write!(f, "failed to load form config: {error}"),
            BridgeError::DeleteFailed(error) => {
                write!(f, "failed to delete form config: {error}")
            }
        }
    }
}

impl std::error::Error for BridgeError {}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Persistence collaborator for form configurations.
///
/// Implementations wrap whatever transport the host uses (the production
/// deployment talks to the events API); the engine only needs save, load,
/// and delete keyed by event id.
pub trait FormConfigStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn save(&self, record: FormRecord) -> Result<FormRecord, Self::Error>;
    fn load(&self, event_id: &str) -> Result<Option<FormRecord>, Self::Error>;
    fn delete(&self, event_id: &str) -> Result<String, Self::Error>;
}

#[derive(Clone, Default)]
pub struct InMemoryFormConfigStore {
    state: Arc<RwLock<BTreeMap<String, Vec<PersistedField>>>>,
}

impl InMemoryFormConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormConfigStore for InMemoryFormConfigStore {
    type Error = Infallible;

    fn save(&self, record: FormRecord) -> Result<FormRecord, Self::Error> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.insert(record.event_id.clone(), record.form_config.clone());
        Ok(record)
    }

    fn load(&self, event_id: &str) -> Result<Option<FormRecord>, Self::Error> {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(state.get(event_id).map(|form_config| FormRecord {
            event_id: event_id.to_string(),
            form_config: form_config.clone(),
        }))
    }

    fn delete(&self, event_id: &str) -> Result<String, Self::Error> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.remove(event_id);
        Ok(format!("form for event {event_id} deleted"))
    }
}

impl FormStore {
    /// Bridges the current definition out and hands it to the persistence
    /// collaborator under `event_id`.
    pub fn save_to<S>(&self, store: &S, event_id: impl Into<String>) -> BridgeResult<FormRecord>
    where
        S: FormConfigStore,
    {
        let record = FormRecord {
            event_id: event_id.into(),
            form_config: to_persisted(self.fields()),
        };
        store
            .save(record)
            .map_err(|error| BridgeError::SaveFailed(error.to_string()))
    }

    /// Replaces the current definition with the persisted one for
    /// `event_id`. Returns `false`, leaving the store untouched, when no
    /// record exists.
    pub fn load_from<S>(&mut self, store: &S, event_id: &str) -> BridgeResult<bool>
    where
        S: FormConfigStore,
    {
        let Some(record) = store
            .load(event_id)
            .map_err(|error| BridgeError::LoadFailed(error.to_string()))?
        else {
            return Ok(false);
        };
        *self = FormStore::from_fields(from_persisted(record.form_config));
        Ok(true)
    }

    /// Deletes the persisted record for `event_id`, returning the
    /// collaborator's status message. The in-memory definition is untouched.
    pub fn delete_from<S>(&self, store: &S, event_id: &str) -> BridgeResult<String>
    where
        S: FormConfigStore,
    {
        store
            .delete(event_id)
            .map_err(|error| BridgeError::DeleteFailed(error.to_string()))
    }
}
