use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::params::{merge_filter_expressions, Params, FILTER_PARAM};

/// Transform applied to a user-entered filter value before it is sent.
pub type Formatter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// User-selected filter values, keyed by filter key.
pub type FilterState = BTreeMap<String, Value>;

/// Declared filter options, keyed by filter key.
pub type FilterOptions = BTreeMap<String, FilterOption>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter key {0:?} has no declared filter option")]
    Undeclared(String),
}

/// How one filter key is turned into request parameters.
#[derive(Clone, Default)]
pub struct FilterOption {
    pub formatter: Option<Formatter>,
    /// Appends the value to the generic `filter` expression list instead of
    /// sending it as a parameter named after the key.
    pub expression: bool,
}

impl FilterOption {
    /// A key sent as a named query parameter.
    pub fn param() -> Self {
        Self::default()
    }

    /// A key contributing to the `filter` expression list.
    pub fn expression() -> Self {
        Self {
            formatter: None,
            expression: true,
        }
    }

    pub fn with_formatter(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.formatter = Some(Arc::new(f));
        self
    }

    fn format(&self, value: &Value) -> Value {
        match &self.formatter {
            Some(formatter) => formatter(value),
            None => value.clone(),
        }
    }
}

impl fmt::Debug for FilterOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterOption")
            .field("formatter", &self.formatter.as_ref().map(|_| ".."))
            .field("expression", &self.expression)
            .finish()
    }
}

/// Checks that every active filter key has a declared option.
pub fn validate_filter(filter: &FilterState, options: &FilterOptions) -> Result<(), FilterError> {
    match filter.keys().find(|key| !options.contains_key(*key)) {
        Some(key) => Err(FilterError::Undeclared(key.clone())),
        None => Ok(()),
    }
}

/// Combines `base` with the compiled filter.
///
/// Expression keys are appended after any expressions already present in
/// `base`; other keys become named parameters overriding `base`.
pub fn compile_filter_params(
    mut base: Params,
    filter: &FilterState,
    options: &FilterOptions,
) -> Result<Params, FilterError> {
    let mut expressions = merge_filter_expressions(&base);
    for (key, value) in filter {
        let option = options
            .get(key)
            .ok_or_else(|| FilterError::Undeclared(key.clone()))?;
        let value = option.format(value);
        if option.expression {
            expressions.push(value);
        } else {
            base.insert(key.clone(), value);
        }
    }
    if expressions.is_empty() {
        base.remove(FILTER_PARAM);
    } else {
        base.insert(FILTER_PARAM.to_string(), Value::Array(expressions));
    }
    Ok(base)
}
