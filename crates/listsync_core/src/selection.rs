use serde_json::Value;

use crate::record::identity_of;

/// Rows currently selected in the list, with their identity keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    rows: Vec<Value>,
    ids: Vec<String>,
}

impl Selection {
    pub fn from_rows(rows: Vec<Value>, id_key: &str) -> Self {
        let ids = rows.iter().filter_map(|row| identity_of(row, id_key)).collect();
        Self { rows, ids }
    }

    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.ids.clear();
    }

    /// Whether every selected row may be deleted.
    ///
    /// Only boolean flags are honored: `disable_delete: true` or
    /// `can_delete: false` on any row forbids the batch.
    pub fn allow_batch_delete(&self) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        !self.rows.iter().any(|row| {
            matches!(row.get("disable_delete"), Some(Value::Bool(true)))
                || matches!(row.get("can_delete"), Some(Value::Bool(false)))
        })
    }
}
