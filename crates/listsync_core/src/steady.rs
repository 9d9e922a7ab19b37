use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field checked when a steady status is given in shorthand form.
const SHORTHAND_FIELD: &str = "status";

/// Substring that marks a status value as a terminal failure.
const FAILURE_MARKER: &str = "fail";

/// Expected value(s) at one field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expected {
    AnyOf(Vec<Value>),
    One(Value),
}

impl Expected {
    fn matches(&self, current: Option<&Value>) -> bool {
        let Some(current) = current else {
            return false;
        };
        match self {
            Expected::One(value) => value == current,
            Expected::AnyOf(values) => values.iter().any(|value| value == current),
        }
    }
}

impl From<&str> for Expected {
    fn from(value: &str) -> Self {
        Expected::One(Value::String(value.to_string()))
    }
}

impl From<Vec<&str>> for Expected {
    fn from(values: Vec<&str>) -> Self {
        Expected::AnyOf(values.into_iter().map(|v| Value::String(v.to_string())).collect())
    }
}

/// Terminal condition a record must reach before polling stops.
///
/// Maps a field path (lodash `get` syntax, e.g. `status` or `metadata.phase`
/// or `nics[0].state`) to the value or set of values that count as settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SteadyStatusRepr", into = "BTreeMap<String, Expected>")]
pub struct SteadyStatus {
    fields: BTreeMap<String, Expected>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SteadyStatusRepr {
    Fields(BTreeMap<String, Expected>),
    Shorthand(Expected),
}

impl From<SteadyStatusRepr> for SteadyStatus {
    fn from(repr: SteadyStatusRepr) -> Self {
        match repr {
            SteadyStatusRepr::Fields(fields) => Self { fields },
            SteadyStatusRepr::Shorthand(expected) => Self::status(expected),
        }
    }
}

impl From<SteadyStatus> for BTreeMap<String, Expected> {
    fn from(status: SteadyStatus) -> Self {
        status.fields
    }
}

impl SteadyStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single-field `{status: expected}` specification.
    pub fn status(expected: impl Into<Expected>) -> Self {
        Self::new().with(SHORTHAND_FIELD, expected)
    }

    pub fn with(mut self, path: impl Into<String>, expected: impl Into<Expected>) -> Self {
        self.fields.insert(path.into(), expected.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Expected)> {
        self.fields.iter().map(|(path, expected)| (path.as_str(), expected))
    }
}

/// Returns true when `data` satisfies every field of `spec`.
///
/// A checked field whose value contains `fail` (any case) settles the whole
/// record, so a failure marker in one field masks a mismatch in another.
/// An empty specification is always steady.
pub fn is_steady(data: &Value, spec: &SteadyStatus) -> bool {
    let mut all_match = true;
    for (path, expected) in &spec.fields {
        let current = lookup_path(data, path);
        if is_failure(current) {
            return true;
        }
        all_match &= expected.matches(current);
    }
    all_match
}

fn is_failure(current: Option<&Value>) -> bool {
    match current {
        Some(Value::String(text)) => text.to_ascii_lowercase().contains(FAILURE_MARKER),
        _ => false,
    }
}

/// Resolves a dotted field path with optional `[n]` array indexes.
pub fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path_segments(path) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['.', '[', ']']).filter(|segment| !segment.is_empty())
}
