use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::PagerConfig;
use crate::error::Result;
use crate::options::{self, PaginateOptions, ResolvedOptions};
use crate::result::{self, Callback, PagedResult, Pending};
use crate::schema::Schema;
use crate::store::{FindRequest, Store};

/// Paginates find-style queries and aggregation pipelines over one
/// collection of a [`Store`].
///
/// Holds no per-call state: calls from different threads are independent.
pub struct Paginator<S> {
    pub(crate) store: S,
    pub(crate) schema: Arc<dyn Schema>,
    pub(crate) defaults: Option<PaginateOptions>,
    pub(crate) config: PagerConfig,
}

impl<S: Store> Paginator<S> {
    pub fn new(store: S, schema: impl Schema + 'static) -> Self {
        Self {
            store,
            schema: Arc::new(schema),
            defaults: None,
            config: PagerConfig::default(),
        }
    }

    /// Schema-level default options, used for every key a call leaves unset.
    pub fn with_defaults(mut self, defaults: PaginateOptions) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Apply host configuration. Defaults already set through
    /// [`with_defaults`](Self::with_defaults) take precedence over it.
    pub fn with_config(mut self, config: PagerConfig) -> Self {
        let from_config = config.default_options();
        self.defaults = Some(match self.defaults.take() {
            Some(existing) => existing.merged_with(&from_config),
            None => from_config,
        });
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn schema(&self) -> &dyn Schema {
        self.schema.as_ref()
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub(crate) fn resolve(&self, options: Option<PaginateOptions>) -> ResolvedOptions {
        options::normalize(options, self.defaults.as_ref())
    }

    /// Count the documents matching `criteria`, then fetch the requested
    /// page of them.
    ///
    /// When nothing matches, the result reports `limit: 0` whatever page size
    /// was asked for. When no limit applies, `limit` equals `total`.
    pub fn paginate(
        &self,
        criteria: Value,
        options: Option<PaginateOptions>,
        callback: Option<Callback<'_, PagedResult>>,
    ) -> Result<PagedResult> {
        let o = self.resolve(options);
        result::complete(self.run_paginate(criteria, &o), callback)
    }

    fn run_paginate(&self, criteria: Value, o: &ResolvedOptions) -> Result<PagedResult> {
        let schema = self.schema.as_ref();
        let criteria = o.shape_criteria(criteria, schema);
        let sort = Some(o.shape_sort(o.sort.clone().unwrap_or(Value::Null), schema))
            .filter(|s| !is_empty_spec(s));

        let total = self.store.count(&criteria)?;
        debug!(total, page = o.page, limit = ?o.limit, skip = o.skip, "counted matches");
        if total == 0 {
            return Ok(PagedResult::empty(0, o.page, Vec::new()));
        }

        let request = FindRequest {
            criteria,
            select: o.select.clone(),
            populate: o.populate.clone(),
            lean: o.lean,
            skip: o.skip,
            sort,
            limit: o.limit,
        };
        let data = self.store.find(&request)?;
        debug!(returned = data.len(), "fetched page");

        Ok(PagedResult {
            total,
            limit: o.limit.unwrap_or(total),
            page: o.page,
            data,
        })
    }
}

impl<S: Store + Send + Sync + 'static> Paginator<S> {
    /// Run [`paginate`](Self::paginate) on a background thread.
    pub fn spawn_paginate(
        self: &Arc<Self>,
        criteria: Value,
        options: Option<PaginateOptions>,
    ) -> Pending<PagedResult> {
        let this = Arc::clone(self);
        Pending::spawn(move || this.paginate(criteria, options, None))
    }
}

/// Null, `""`, `{}` and `[]` carry no sort keys.
pub(crate) fn is_empty_spec(spec: &Value) -> bool {
    match spec {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}
