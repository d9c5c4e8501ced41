//! Pagination options and the rules that turn caller options plus
//! schema-level defaults into one resolved set.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::schema::Schema;

// ---------------------------------------------------------------------------
// Value-or-provider settings
// ---------------------------------------------------------------------------

/// An option given either directly or as a zero-argument provider that is
/// called once per normalization.
pub enum Setting<T> {
    Literal(T),
    Provider(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> Setting<T> {
    pub fn provider(f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Setting::Provider(Arc::new(f))
    }

    pub fn resolve(&self) -> T {
        match self {
            Setting::Literal(v) => v.clone(),
            Setting::Provider(f) => f(),
        }
    }
}

impl<T: Clone> Clone for Setting<T> {
    fn clone(&self) -> Self {
        match self {
            Setting::Literal(v) => Setting::Literal(v.clone()),
            Setting::Provider(f) => Setting::Provider(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Setting<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Setting::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Page size: a fixed number, or a provider that receives `max_limit`.
#[derive(Clone)]
pub enum Limit {
    Fixed(u64),
    Provider(Arc<dyn Fn(Option<u64>) -> Option<u64> + Send + Sync>),
}

impl fmt::Debug for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Fixed(n) => f.debug_tuple("Fixed").field(n).finish(),
            Limit::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Converters
// ---------------------------------------------------------------------------

/// Turns a raw sort description into the store's native sort clause.
pub trait SortConverter: Send + Sync {
    fn convert(&self, sort: Value, schema: &dyn Schema) -> Value;
}

/// Turns raw criteria into the store's native criteria.
pub trait CriteriaConverter: Send + Sync {
    fn convert(&self, criteria: Value, schema: &dyn Schema) -> Value;
}

/// Final pass over native criteria, e.g. to add mandatory filters.
pub trait CriteriaWrapper: Send + Sync {
    fn wrap(&self, criteria: Value) -> Value;
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl SortConverter for Identity {
    fn convert(&self, sort: Value, _schema: &dyn Schema) -> Value {
        sort
    }
}

impl CriteriaConverter for Identity {
    fn convert(&self, criteria: Value, _schema: &dyn Schema) -> Value {
        criteria
    }
}

impl CriteriaWrapper for Identity {
    fn wrap(&self, criteria: Value) -> Value {
        criteria
    }
}

impl<F> SortConverter for F
where
    F: Fn(Value, &dyn Schema) -> Value + Send + Sync,
{
    fn convert(&self, sort: Value, schema: &dyn Schema) -> Value {
        self(sort, schema)
    }
}

impl<F> CriteriaConverter for F
where
    F: Fn(Value, &dyn Schema) -> Value + Send + Sync,
{
    fn convert(&self, criteria: Value, schema: &dyn Schema) -> Value {
        self(criteria, schema)
    }
}

impl<F> CriteriaWrapper for F
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn wrap(&self, criteria: Value) -> Value {
        self(criteria)
    }
}

// ---------------------------------------------------------------------------
// Caller options
// ---------------------------------------------------------------------------

/// Options for one pagination call, or schema-level defaults. Every field is
/// optional; unset fields fall back to the defaults and then to the
/// normalization rules.
#[derive(Clone, Default)]
pub struct PaginateOptions {
    pub limit: Option<Limit>,
    pub max_limit: Option<u64>,
    pub page: Option<u64>,
    pub lean: Option<bool>,
    pub select: Option<Setting<Value>>,
    pub populate: Option<Setting<Value>>,
    pub sort: Option<Setting<Value>>,
    pub convert_sort: Option<Arc<dyn SortConverter>>,
    pub convert_criteria: Option<Arc<dyn CriteriaConverter>>,
    pub criteria_wrapper: Option<Arc<dyn CriteriaWrapper>>,
}

impl PaginateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(Limit::Fixed(limit));
        self
    }

    /// Compute the limit from `max_limit` at normalization time.
    pub fn limit_with(
        mut self,
        f: impl Fn(Option<u64>) -> Option<u64> + Send + Sync + 'static,
    ) -> Self {
        self.limit = Some(Limit::Provider(Arc::new(f)));
        self
    }

    pub fn max_limit(mut self, max_limit: u64) -> Self {
        self.max_limit = Some(max_limit);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn lean(mut self, lean: bool) -> Self {
        self.lean = Some(lean);
        self
    }

    pub fn select(mut self, select: Value) -> Self {
        self.select = Some(Setting::Literal(select));
        self
    }

    pub fn select_with(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.select = Some(Setting::provider(f));
        self
    }

    pub fn populate(mut self, populate: Value) -> Self {
        self.populate = Some(Setting::Literal(populate));
        self
    }

    pub fn populate_with(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.populate = Some(Setting::provider(f));
        self
    }

    pub fn sort(mut self, sort: Value) -> Self {
        self.sort = Some(Setting::Literal(sort));
        self
    }

    pub fn sort_with(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.sort = Some(Setting::provider(f));
        self
    }

    pub fn convert_sort(mut self, converter: impl SortConverter + 'static) -> Self {
        self.convert_sort = Some(Arc::new(converter));
        self
    }

    pub fn convert_criteria(mut self, converter: impl CriteriaConverter + 'static) -> Self {
        self.convert_criteria = Some(Arc::new(converter));
        self
    }

    pub fn criteria_wrapper(mut self, wrapper: impl CriteriaWrapper + 'static) -> Self {
        self.criteria_wrapper = Some(Arc::new(wrapper));
        self
    }

    /// Fill every unset field from `defaults`. Fields set here always win.
    pub fn merged_with(self, defaults: &PaginateOptions) -> Self {
        Self {
            limit: self.limit.or_else(|| defaults.limit.clone()),
            max_limit: self.max_limit.or(defaults.max_limit),
            page: self.page.or(defaults.page),
            lean: self.lean.or(defaults.lean),
            select: self.select.or_else(|| defaults.select.clone()),
            populate: self.populate.or_else(|| defaults.populate.clone()),
            sort: self.sort.or_else(|| defaults.sort.clone()),
            convert_sort: self.convert_sort.or_else(|| defaults.convert_sort.clone()),
            convert_criteria: self
                .convert_criteria
                .or_else(|| defaults.convert_criteria.clone()),
            criteria_wrapper: self
                .criteria_wrapper
                .or_else(|| defaults.criteria_wrapper.clone()),
        }
    }
}

impl fmt::Debug for PaginateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginateOptions")
            .field("limit", &self.limit)
            .field("max_limit", &self.max_limit)
            .field("page", &self.page)
            .field("lean", &self.lean)
            .field("select", &self.select)
            .field("populate", &self.populate)
            .field("sort", &self.sort)
            .field("convert_sort", &self.convert_sort.is_some())
            .field("convert_criteria", &self.convert_criteria.is_some())
            .field("criteria_wrapper", &self.criteria_wrapper.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Options after normalization: every provider called, every default applied.
#[derive(Clone)]
pub struct ResolvedOptions {
    /// `None` means unbounded.
    pub limit: Option<u64>,
    pub max_limit: Option<u64>,
    pub page: u64,
    pub skip: u64,
    pub lean: bool,
    pub select: Option<Value>,
    pub populate: Value,
    pub sort: Option<Value>,
    pub convert_sort: Arc<dyn SortConverter>,
    pub convert_criteria: Arc<dyn CriteriaConverter>,
    pub criteria_wrapper: Arc<dyn CriteriaWrapper>,
}

impl ResolvedOptions {
    /// `criteria_wrapper(convert_criteria(criteria, schema))`
    pub fn shape_criteria(&self, criteria: Value, schema: &dyn Schema) -> Value {
        self.criteria_wrapper
            .wrap(self.convert_criteria.convert(criteria, schema))
    }

    pub fn shape_sort(&self, sort: Value, schema: &dyn Schema) -> Value {
        self.convert_sort.convert(sort, schema)
    }
}

impl fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("limit", &self.limit)
            .field("max_limit", &self.max_limit)
            .field("page", &self.page)
            .field("skip", &self.skip)
            .field("lean", &self.lean)
            .field("select", &self.select)
            .field("populate", &self.populate)
            .field("sort", &self.sort)
            .finish_non_exhaustive()
    }
}

/// Merge `options` over `defaults` and resolve the result.
///
/// Never fails: a zero limit, max limit or page counts as unset, and a limit above
/// `max_limit` is clamped to it. A limit provider's answer is taken as is.
pub fn normalize(
    options: Option<PaginateOptions>,
    defaults: Option<&PaginateOptions>,
) -> ResolvedOptions {
    let o = match defaults {
        Some(defaults) => options.unwrap_or_default().merged_with(defaults),
        None => options.unwrap_or_default(),
    };

    let max_limit = o.max_limit.filter(|m| *m > 0);
    let limit = match &o.limit {
        Some(Limit::Provider(f)) => f(max_limit),
        Some(Limit::Fixed(l)) if *l > 0 && !max_limit.is_some_and(|max| *l > max) => Some(*l),
        _ => max_limit,
    }
    .filter(|l| *l > 0);

    let page = o.page.filter(|p| *p > 0).unwrap_or(1);
    let skip = (page - 1).saturating_mul(limit.unwrap_or(0));

    ResolvedOptions {
        limit,
        max_limit,
        page,
        skip,
        lean: o.lean.unwrap_or(true),
        select: o.select.as_ref().map(Setting::resolve),
        populate: o
            .populate
            .as_ref()
            .map(Setting::resolve)
            .unwrap_or_else(|| Value::String(String::new())),
        sort: o.sort.as_ref().map(Setting::resolve),
        convert_sort: o.convert_sort.unwrap_or_else(|| Arc::new(Identity)),
        convert_criteria: o.convert_criteria.unwrap_or_else(|| Arc::new(Identity)),
        criteria_wrapper: o.criteria_wrapper.unwrap_or_else(|| Arc::new(Identity)),
    }
}
