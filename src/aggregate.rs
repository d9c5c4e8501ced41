use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::options::{PaginateOptions, ResolvedOptions};
use crate::paginate::{Paginator, is_empty_spec};
use crate::result::{self, Aggregated, Callback, PagedResult, Pending};
use crate::schema::Schema;
use crate::store::Store;

/// A caller pipeline split into pass-through stages and the control stages
/// the pager places itself.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct StageSet {
    pub sort: Option<Value>,
    pub skip: Option<Value>,
    pub limit: Option<Value>,
    /// The pipeline counts on its own; its output is returned unwrapped.
    pub count_mode: bool,
    pub passthrough: Vec<Value>,
}

/// Scan `pipeline` (one stage object or a list of them).
///
/// `$sort`, `$skip` and `$limit` are lifted out, the last one of each kind
/// winning. `$match` conditions go through the criteria converter and
/// wrapper. Fails on the first stage that is not an object with exactly one
/// key.
pub(crate) fn partition(
    pipeline: Value,
    o: &ResolvedOptions,
    schema: &dyn Schema,
) -> Result<StageSet> {
    let stages = match pipeline {
        Value::Array(stages) => stages,
        stage @ Value::Object(_) => vec![stage],
        other => {
            return Err(Error::InvalidPipelineStage(format!(
                "pipeline must be a stage object or a list of stages, got {other}"
            )));
        }
    };

    let mut set = StageSet::default();
    for (idx, stage) in stages.into_iter().enumerate() {
        let Value::Object(obj) = stage else {
            return Err(Error::InvalidPipelineStage(format!(
                "stage {idx} is not an object"
            )));
        };
        let found = obj.len();
        let mut entries = obj.into_iter();
        let (Some((name, body)), None) = (entries.next(), entries.next()) else {
            return Err(Error::InvalidPipelineStage(format!(
                "stage {idx} must declare exactly one operation, found {found}"
            )));
        };
        trace!(idx, stage = %name, "classifying stage");

        match name.as_str() {
            "$sort" => set.sort = Some(json!({ "$sort": o.shape_sort(body, schema) })),
            "$skip" => set.skip = Some(json!({ "$skip": body })),
            "$limit" => set.limit = Some(json!({ "$limit": body })),
            "$match" => set
                .passthrough
                .push(json!({ "$match": o.shape_criteria(body, schema) })),
            "$count" => {
                set.count_mode = true;
                set.passthrough.push(json!({ "$count": body }));
            }
            _ => {
                let mut stage = serde_json::Map::new();
                stage.insert(name, body);
                set.passthrough.push(Value::Object(stage));
            }
        }
    }
    Ok(set)
}

/// Append the page controls: the pipeline's own stage of each kind when it
/// had one, else the one derived from the options.
fn append_page_stages(stages: &mut Vec<Value>, set: StageSet, o: &ResolvedOptions, schema: &dyn Schema) {
    let sort = set.sort.or_else(|| {
        Some(o.shape_sort(o.sort.clone().unwrap_or(Value::Null), schema))
            .filter(|s| !is_empty_spec(s))
            .map(|s| json!({ "$sort": s }))
    });
    stages.extend(sort);
    stages.push(set.skip.unwrap_or_else(|| json!({ "$skip": o.skip })));
    stages.extend(set.limit.or_else(|| o.limit.map(|l| json!({ "$limit": l }))));
}

impl<S: Store> Paginator<S> {
    /// Run an aggregation pipeline one page at a time.
    ///
    /// The server version is checked first. A pipeline with its own `$count`
    /// stage runs once and its rows come back as [`Aggregated::Raw`].
    /// Otherwise a count pipeline runs before the data pipeline, and explicit
    /// `$sort`/`$skip`/`$limit` stages take precedence over `options`.
    pub fn aggregate_paginated(
        &self,
        pipeline: Value,
        options: Option<PaginateOptions>,
        callback: Option<Callback<'_, Aggregated>>,
    ) -> Result<Aggregated> {
        let o = self.resolve(options);
        result::complete(self.run_aggregate(pipeline, &o), callback)
    }

    fn run_aggregate(&self, pipeline: Value, o: &ResolvedOptions) -> Result<Aggregated> {
        let version = self.store.server_version()?;
        if !self.config.supports_server(&version) {
            warn!(%version, required = %self.config.min_server_version, "server too old for paginated aggregation");
            return Err(Error::UnsupportedServerVersion {
                version,
                required: self.config.min_server_version.clone(),
            });
        }

        let schema = self.schema.as_ref();
        let set = partition(pipeline, o, schema).inspect_err(|e| {
            warn!(error = %e, "rejected pipeline");
        })?;

        if set.count_mode {
            debug!(stages = set.passthrough.len(), "pipeline counts on its own");
            return Ok(Aggregated::Raw(self.store.aggregate(&set.passthrough)?));
        }

        let mut count_pipeline = set.passthrough.clone();
        count_pipeline.push(json!({ "$count": "total" }));
        let counted = self.store.aggregate(&count_pipeline)?;
        let Some(row) = counted.first() else {
            debug!(page = o.page, "aggregation matched nothing");
            return Ok(Aggregated::Page(PagedResult::empty(
                o.limit.unwrap_or(0),
                o.page,
                counted,
            )));
        };
        let total = row.get("total").and_then(Value::as_u64).ok_or_else(|| {
            Error::InvalidPipeline(format!("count pipeline returned {row} without a total"))
        })?;

        let mut stages = set.passthrough.clone();
        append_page_stages(&mut stages, set, o, schema);
        debug!(total, stages = stages.len(), page = o.page, "running data pipeline");
        let data = self.store.aggregate(&stages)?;

        Ok(Aggregated::Page(PagedResult {
            total,
            limit: o.limit.unwrap_or(total),
            page: o.page,
            data,
        }))
    }
}

impl<S: Store + Send + Sync + 'static> Paginator<S> {
    /// Run [`aggregate_paginated`](Self::aggregate_paginated) on a background thread.
    pub fn spawn_aggregate_paginated(
        self: &Arc<Self>,
        pipeline: Value,
        options: Option<PaginateOptions>,
    ) -> Pending<Aggregated> {
        let this = Arc::clone(self);
        Pending::spawn(move || this.aggregate_paginated(pipeline, options, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{self, PaginateOptions};
    use crate::schema::SchemaDef;

    fn resolved(options: PaginateOptions) -> ResolvedOptions {
        options::normalize(Some(options), None)
    }

    fn schema() -> SchemaDef {
        SchemaDef::new("customers").field("name")
    }

    #[test]
    fn single_stage_is_wrapped() {
        let set = partition(json!({"$match": {"deleted": false}}), &resolved(PaginateOptions::new()), &schema())
            .unwrap();
        assert_eq!(set.passthrough, vec![json!({"$match": {"deleted": false}})]);
        assert!(!set.count_mode);
    }

    #[test]
    fn control_stages_are_lifted_last_wins() {
        let set = partition(
            json!([
                {"$sort": {"name": 1}},
                {"$match": {"deleted": false}},
                {"$skip": 1},
                {"$project": {"name": 1}},
                {"$skip": 4},
                {"$limit": 2}
            ]),
            &resolved(PaginateOptions::new()),
            &schema(),
        )
        .unwrap();
        assert_eq!(set.sort, Some(json!({"$sort": {"name": 1}})));
        assert_eq!(set.skip, Some(json!({"$skip": 4})));
        assert_eq!(set.limit, Some(json!({"$limit": 2})));
        assert_eq!(
            set.passthrough,
            vec![json!({"$match": {"deleted": false}}), json!({"$project": {"name": 1}})]
        );
    }

    #[test]
    fn count_stage_sets_count_mode() {
        let set = partition(
            json!([{"$match": {}}, {"$count": "n"}]),
            &resolved(PaginateOptions::new()),
            &schema(),
        )
        .unwrap();
        assert!(set.count_mode);
        assert_eq!(set.passthrough.last(), Some(&json!({"$count": "n"})));
    }

    #[test]
    fn match_goes_through_converters() {
        let o = resolved(
            PaginateOptions::new()
                .convert_criteria(|c: Value, _: &dyn Schema| json!({"name": c}))
                .criteria_wrapper(|c: Value| json!({"$and": [c, {"deleted": false}]})),
        );
        let set = partition(json!([{"$match": "Customer 1"}]), &o, &schema()).unwrap();
        assert_eq!(
            set.passthrough,
            vec![json!({"$match": {"$and": [{"name": "Customer 1"}, {"deleted": false}]}})]
        );
    }

    #[test]
    fn multi_key_stage_fails_fast() {
        let err = partition(
            json!([{"$skip": 1, "$limit": 1}, {"$bogus": 1, "$other": 2}]),
            &resolved(PaginateOptions::new()),
            &schema(),
        )
        .unwrap_err();
        match err {
            Error::InvalidPipelineStage(msg) => assert!(msg.starts_with("stage 0")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn scalar_pipeline_rejected() {
        assert!(matches!(
            partition(json!(3), &resolved(PaginateOptions::new()), &schema()),
            Err(Error::InvalidPipelineStage(_))
        ));
    }

    #[test]
    fn option_controls_fill_missing_stages() {
        let o = resolved(PaginateOptions::new().limit(5).page(2).sort(json!({"name": -1})));
        let mut stages = vec![json!({"$match": {}})];
        append_page_stages(&mut stages, StageSet::default(), &o, &schema());
        assert_eq!(
            stages,
            vec![
                json!({"$match": {}}),
                json!({"$sort": {"name": -1}}),
                json!({"$skip": 5}),
                json!({"$limit": 5})
            ]
        );
    }

    #[test]
    fn sort_converter_supplies_default_order() {
        let o = resolved(PaginateOptions::new().convert_sort(|s: Value, _: &dyn Schema| {
            if s.is_null() { json!({"profit": -1}) } else { s }
        }));
        let mut stages = Vec::new();
        append_page_stages(&mut stages, StageSet::default(), &o, &schema());
        assert_eq!(stages, vec![json!({"$sort": {"profit": -1}}), json!({"$skip": 0})]);
    }

    #[test]
    fn unbounded_options_emit_skip_only() {
        let mut stages = Vec::new();
        append_page_stages(&mut stages, StageSet::default(), &resolved(PaginateOptions::new()), &schema());
        assert_eq!(stages, vec![json!({"$skip": 0})]);
    }

    #[test]
    fn pipeline_controls_beat_options() {
        let o = resolved(PaginateOptions::new().limit(5).page(2).sort(json!({"name": -1})));
        let set = StageSet {
            sort: Some(json!({"$sort": {"profit": 1}})),
            skip: Some(json!({"$skip": 1})),
            limit: Some(json!({"$limit": 1})),
            ..StageSet::default()
        };
        let mut stages = Vec::new();
        append_page_stages(&mut stages, set, &o, &schema());
        assert_eq!(
            stages,
            vec![
                json!({"$sort": {"profit": 1}}),
                json!({"$skip": 1}),
                json!({"$limit": 1})
            ]
        );
    }
}
