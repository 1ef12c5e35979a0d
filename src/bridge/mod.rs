mod format;
mod remote;


pub use format::{PersistedField, from_persisted, kind_code, kind_from_code, to_persisted};
pub use remote::{
    BridgeError, BridgeResult, FormConfigStore, FormRecord, InMemoryFormConfigStore,
};
