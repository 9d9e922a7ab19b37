use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Query parameters sent along with list and get requests.
pub type Params = Map<String, Value>;

/// Name of the parameter carrying the generic filter expression list.
pub const FILTER_PARAM: &str = "filter";

/// Caller-supplied parameters merged into every request.
#[derive(Clone, Default)]
pub enum BaseParams {
    #[default]
    None,
    Static(Params),
    /// Evaluated on every request so the caller can track changing context.
    Provider(Arc<dyn Fn() -> Params + Send + Sync>),
}

impl BaseParams {
    pub fn provider(f: impl Fn() -> Params + Send + Sync + 'static) -> Self {
        BaseParams::Provider(Arc::new(f))
    }

    pub fn resolve(&self) -> Params {
        match self {
            BaseParams::None => Params::new(),
            BaseParams::Static(params) => params.clone(),
            BaseParams::Provider(f) => f(),
        }
    }
}

impl fmt::Debug for BaseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseParams::None => write!(f, "BaseParams::None"),
            BaseParams::Static(params) => f.debug_tuple("BaseParams::Static").field(params).finish(),
            BaseParams::Provider(_) => write!(f, "BaseParams::Provider(..)"),
        }
    }
}

/// Collects the filter expressions already present in `params`.
///
/// A single expression and a list of expressions are both accepted.
pub fn merge_filter_expressions(params: &Params) -> Vec<Value> {
    match params.get(FILTER_PARAM) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_is_evaluated_each_time() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        let base = BaseParams::provider(move || {
            let n = seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut params = Params::new();
            params.insert("n".into(), json!(n));
            params
        });
        assert_eq!(base.resolve()["n"], json!(0));
        assert_eq!(base.resolve()["n"], json!(1));
    }

    #[test]
    fn filter_expressions_accept_single_and_list() {
        let mut params = Params::new();
        assert!(merge_filter_expressions(&params).is_empty());
        params.insert(FILTER_PARAM.into(), json!("status.equals(ready)"));
        assert_eq!(merge_filter_expressions(&params), vec![json!("status.equals(ready)")]);
        params.insert(FILTER_PARAM.into(), json!(["a", "b"]));
        assert_eq!(merge_filter_expressions(&params), vec![json!("a"), json!("b")]);
    }
}
