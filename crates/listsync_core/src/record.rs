use std::collections::BTreeMap;

use engine_logging::engine_warn;
use serde_json::Value;

use crate::steady::{is_steady, SteadyStatus};

/// Local cache of the current page, keyed by identity.
pub type RecordMap = BTreeMap<String, ItemRecord>;

/// Last failure observed for a single record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RecordError {
    /// Response status, when the failure came from the server.
    pub status: Option<u16>,
    pub message: String,
}

impl RecordError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// One resource of the list together with its error state.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: String,
    pub data: Value,
    /// Position within the page the record was fetched with.
    pub index: usize,
    pub error: Option<RecordError>,
}

impl ItemRecord {
    pub fn new(id: impl Into<String>, data: Value, index: usize) -> Self {
        Self {
            id: id.into(),
            data,
            index,
            error: None,
        }
    }

    /// Replaces the data wholesale; a successful observation clears the error.
    pub fn replace_data(&mut self, data: Value) {
        self.data = data;
        self.error = None;
    }

    pub fn set_error(&mut self, error: RecordError) {
        self.error = Some(error);
    }

    pub fn is_steady(&self, spec: &SteadyStatus) -> bool {
        is_steady(&self.data, spec)
    }
}

/// Reads the identity key of a raw row.
///
/// String identities are used as-is and numeric ones are printed; any other
/// shape has no usable identity.
pub fn identity_of(row: &Value, id_key: &str) -> Option<String> {
    match row.get(id_key)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Wraps a fetched page into records keyed by identity.
pub fn wrap_rows(rows: Vec<Value>, id_key: &str) -> RecordMap {
    let mut records = RecordMap::new();
    for (index, row) in rows.into_iter().enumerate() {
        match identity_of(&row, id_key) {
            Some(id) => {
                records.insert(id.clone(), ItemRecord::new(id, row, index));
            }
            None => {
                engine_warn!("Skipping row {} without identity field {:?}", index, id_key);
            }
        }
    }
    records
}
