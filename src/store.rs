use serde_json::Value;

use crate::error::Result;

/// A fully shaped find operation, as handed to [`Store::find`].
#[derive(Debug, Clone, PartialEq)]
pub struct FindRequest {
    pub criteria: Value,
    /// Field projection; `None` returns whole documents.
    pub select: Option<Value>,
    /// Relation expansion spec; an empty string expands nothing.
    pub populate: Value,
    /// Plain data records when true, hydrated model records otherwise.
    pub lean: bool,
    pub skip: u64,
    pub sort: Option<Value>,
    /// `None` returns every match from `skip` onward.
    pub limit: Option<u64>,
}

/// The document database the pager shapes queries for.
///
/// Every call is a single operation; the pager never wraps two calls in a
/// transaction.
pub trait Store {
    fn count(&self, criteria: &Value) -> Result<u64>;

    fn find(&self, request: &FindRequest) -> Result<Vec<Value>>;

    fn aggregate(&self, stages: &[Value]) -> Result<Vec<Value>>;

    /// Version string reported by the server, e.g. `"3.4.10"`.
    fn server_version(&self) -> Result<String>;
}

impl<S: Store + ?Sized> Store for &S {
    fn count(&self, criteria: &Value) -> Result<u64> {
        (**self).count(criteria)
    }

    fn find(&self, request: &FindRequest) -> Result<Vec<Value>> {
        (**self).find(request)
    }

    fn aggregate(&self, stages: &[Value]) -> Result<Vec<Value>> {
        (**self).aggregate(stages)
    }

    fn server_version(&self) -> Result<String> {
        (**self).server_version()
    }
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn count(&self, criteria: &Value) -> Result<u64> {
        (**self).count(criteria)
    }

    fn find(&self, request: &FindRequest) -> Result<Vec<Value>> {
        (**self).find(request)
    }

    fn aggregate(&self, stages: &[Value]) -> Result<Vec<Value>> {
        (**self).aggregate(stages)
    }

    fn server_version(&self) -> Result<String> {
        (**self).server_version()
    }
}
