use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::query::{self, Query, SortOrder};
use crate::value::FieldValue;

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expression {
    Literal(Value),
    FieldRef(String),
}

impl Expression {
    fn parse(val: &Value) -> Self {
        match val {
            Value::String(s) if s.starts_with('$') => Expression::FieldRef(s[1..].to_string()),
            other => Expression::Literal(other.clone()),
        }
    }

    fn eval(&self, doc: &Value) -> Value {
        match self {
            Expression::Literal(v) => v.clone(),
            Expression::FieldRef(path) => query::resolve_field(doc, path).cloned().unwrap_or(Value::Null),
        }
    }
}

fn number_to_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

pub(crate) fn set_field(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let Value::Object(map) = current else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        let entry = map.entry(part.to_string()).or_insert_with(|| json!({}));
        if !entry.is_object() {
            *entry = json!({});
        }
        current = entry;
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ProjectionField {
    Include,
    Exclude,
    Compute(Expression),
}

/// A field projection, as used by `$project` stages and by find-style `select`.
#[derive(Debug, Clone)]
pub struct Projection {
    fields: Vec<(String, ProjectionField)>,
}

impl Projection {
    /// Parse an object (`{"name": 1, "profit": 0}`) or a space separated
    /// string (`"name -profit"`).
    pub fn parse(spec: &Value) -> Result<Self> {
        let fields = match spec {
            Value::String(s) => s
                .split_whitespace()
                .map(|token| match token.strip_prefix('-') {
                    Some(field) => (field.to_string(), ProjectionField::Exclude),
                    None => (token.trim_start_matches('+').to_string(), ProjectionField::Include),
                })
                .collect(),
            Value::Object(obj) => obj
                .iter()
                .map(|(field, v)| {
                    let pf = match v {
                        Value::Bool(true) => ProjectionField::Include,
                        Value::Bool(false) => ProjectionField::Exclude,
                        Value::Number(n) if n.as_i64() == Some(0) => ProjectionField::Exclude,
                        Value::Number(_) => ProjectionField::Include,
                        other => ProjectionField::Compute(Expression::parse(other)),
                    };
                    (field.clone(), pf)
                })
                .collect(),
            _ => {
                return Err(Error::InvalidPipeline(
                    "projection must be an object or a string".into(),
                ));
            }
        };
        Ok(Self { fields })
    }

    pub fn apply(&self, doc: Value) -> Value {
        let inclusion = self.fields.iter().any(|(name, pf)| match pf {
            ProjectionField::Include => name != "_id",
            ProjectionField::Compute(_) => true,
            ProjectionField::Exclude => false,
        });

        if !inclusion {
            let mut doc = doc;
            if let Value::Object(map) = &mut doc {
                for (name, _) in &self.fields {
                    map.shift_remove(name.as_str());
                }
            }
            return doc;
        }

        let mut result = Map::new();
        let id_excluded = self
            .fields
            .iter()
            .any(|(name, pf)| name == "_id" && matches!(pf, ProjectionField::Exclude));
        if !id_excluded {
            if let Some(id) = doc.get("_id") {
                result.insert("_id".to_string(), id.clone());
            }
        }
        for (name, pf) in &self.fields {
            match pf {
                ProjectionField::Include => {
                    if let Some(v) = query::resolve_field(&doc, name) {
                        result.insert(name.clone(), v.clone());
                    }
                }
                ProjectionField::Compute(expr) => {
                    result.insert(name.clone(), expr.eval(&doc));
                }
                ProjectionField::Exclude => {}
            }
        }
        Value::Object(result)
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum GroupKey {
    Null,
    Single(Expression),
    Compound(Vec<(String, Expression)>),
}

impl GroupKey {
    fn eval(&self, doc: &Value) -> Value {
        match self {
            GroupKey::Null => Value::Null,
            GroupKey::Single(expr) => expr.eval(doc),
            GroupKey::Compound(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, expr)| (name.clone(), expr.eval(doc)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    Count,
    First(Expression),
    Last(Expression),
    Push(Expression),
}

enum AccumulatorState {
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Extreme(Option<Value>),
    Count(u64),
    Item(Option<Value>),
    Push(Vec<Value>),
}

impl Accumulator {
    fn parse(val: &Value) -> Result<Self> {
        let (op, arg) = val
            .as_object()
            .filter(|o| o.len() == 1)
            .and_then(|o| o.iter().next())
            .ok_or_else(|| {
                Error::InvalidPipeline("accumulator must have exactly one operator".into())
            })?;
        let expr = Expression::parse(arg);
        Ok(match op.as_str() {
            "$sum" => Accumulator::Sum(expr),
            "$avg" => Accumulator::Avg(expr),
            "$min" => Accumulator::Min(expr),
            "$max" => Accumulator::Max(expr),
            "$count" => Accumulator::Count,
            "$first" => Accumulator::First(expr),
            "$last" => Accumulator::Last(expr),
            "$push" => Accumulator::Push(expr),
            _ => return Err(Error::InvalidPipeline(format!("unknown accumulator: {op}"))),
        })
    }

    fn initial(&self) -> AccumulatorState {
        match self {
            Accumulator::Sum(_) => AccumulatorState::Sum(0.0),
            Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
            Accumulator::Min(_) | Accumulator::Max(_) => AccumulatorState::Extreme(None),
            Accumulator::Count => AccumulatorState::Count(0),
            Accumulator::First(_) | Accumulator::Last(_) => AccumulatorState::Item(None),
            Accumulator::Push(_) => AccumulatorState::Push(Vec::new()),
        }
    }

    fn fold(&self, state: &mut AccumulatorState, doc: &Value) {
        match (self, state) {
            (Accumulator::Sum(expr), AccumulatorState::Sum(s)) => {
                if let Some(n) = expr.eval(doc).as_f64() {
                    *s += n;
                }
            }
            (Accumulator::Avg(expr), AccumulatorState::Avg { sum, count }) => {
                if let Some(n) = expr.eval(doc).as_f64() {
                    *sum += n;
                    *count += 1;
                }
            }
            (Accumulator::Min(expr) | Accumulator::Max(expr), AccumulatorState::Extreme(cur)) => {
                let val = expr.eval(doc);
                if val.is_null() {
                    return;
                }
                let replace = match cur {
                    None => true,
                    Some(existing) => {
                        let ord = FieldValue::from_json(&val).cmp(&FieldValue::from_json(existing));
                        if matches!(self, Accumulator::Min(_)) {
                            ord.is_lt()
                        } else {
                            ord.is_gt()
                        }
                    }
                };
                if replace {
                    *cur = Some(val);
                }
            }
            (Accumulator::Count, AccumulatorState::Count(c)) => *c += 1,
            (Accumulator::First(expr), AccumulatorState::Item(cur)) => {
                if cur.is_none() {
                    *cur = Some(expr.eval(doc));
                }
            }
            (Accumulator::Last(expr), AccumulatorState::Item(cur)) => {
                *cur = Some(expr.eval(doc));
            }
            (Accumulator::Push(expr), AccumulatorState::Push(items)) => {
                items.push(expr.eval(doc));
            }
            _ => {}
        }
    }
}

impl AccumulatorState {
    fn finish(self) -> Value {
        match self {
            AccumulatorState::Sum(s) => number_to_value(s),
            AccumulatorState::Avg { count: 0, .. } => Value::Null,
            AccumulatorState::Avg { sum, count } => number_to_value(sum / count as f64),
            AccumulatorState::Extreme(v) | AccumulatorState::Item(v) => v.unwrap_or(Value::Null),
            AccumulatorState::Count(c) => Value::Number(c.into()),
            AccumulatorState::Push(items) => Value::Array(items),
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Stage {
    Match(Query),
    Sort(Vec<(String, SortOrder)>),
    Skip(u64),
    Limit(u64),
    Project(Projection),
    Count(String),
    Group {
        key: GroupKey,
        accumulators: Vec<(String, Accumulator)>,
    },
    Unwind {
        path: String,
        preserve_null: bool,
    },
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
}

fn parse_group(body: &Value) -> Result<Stage> {
    let obj = body
        .as_object()
        .ok_or_else(|| Error::InvalidPipeline("$group must be an object".into()))?;
    let id = obj
        .get("_id")
        .ok_or_else(|| Error::InvalidPipeline("$group requires '_id' field".into()))?;
    let key = match id {
        Value::Null => GroupKey::Null,
        Value::Object(map) => GroupKey::Compound(
            map.iter()
                .map(|(k, v)| (k.clone(), Expression::parse(v)))
                .collect(),
        ),
        other => GroupKey::Single(Expression::parse(other)),
    };
    let accumulators = obj
        .iter()
        .filter(|(name, _)| name.as_str() != "_id")
        .map(|(name, spec)| Ok((name.clone(), Accumulator::parse(spec)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Stage::Group { key, accumulators })
}

fn parse_unwind(body: &Value) -> Result<Stage> {
    let (path, preserve_null) = match body {
        Value::String(s) => (s.as_str(), false),
        Value::Object(obj) => (
            obj.get("path").and_then(Value::as_str).unwrap_or_default(),
            obj.get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        _ => {
            return Err(Error::InvalidPipeline(
                "$unwind must be a string or object".into(),
            ));
        }
    };
    let path = path
        .strip_prefix('$')
        .ok_or_else(|| Error::InvalidPipeline("$unwind path must start with $".into()))?;
    Ok(Stage::Unwind {
        path: path.to_string(),
        preserve_null,
    })
}

fn parse_lookup(body: &Value) -> Result<Stage> {
    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidPipeline(format!("$lookup requires '{name}' string")))
    };
    Ok(Stage::Lookup {
        from: field("from")?,
        local_field: field("localField")?,
        foreign_field: field("foreignField")?,
        as_field: field("as")?,
    })
}

fn parse_stage(stage: &Value) -> Result<Stage> {
    let (name, body) = stage
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.iter().next())
        .ok_or_else(|| {
            Error::InvalidPipeline("each pipeline stage must be an object with one key".into())
        })?;
    let count = |what: &str| {
        body.as_u64()
            .ok_or_else(|| Error::InvalidPipeline(format!("{what} must be a non-negative integer")))
    };
    Ok(match name.as_str() {
        "$match" => Stage::Match(query::parse_query(body)?),
        "$sort" => Stage::Sort(query::parse_sort_spec(body)?),
        "$skip" => Stage::Skip(count("$skip")?),
        "$limit" => Stage::Limit(count("$limit")?),
        "$project" => Stage::Project(Projection::parse(body)?),
        "$count" => Stage::Count(
            body.as_str()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::InvalidPipeline("$count must be a non-empty string".into()))?
                .to_string(),
        ),
        "$group" => parse_group(body)?,
        "$unwind" => parse_unwind(body)?,
        "$lookup" => parse_lookup(body)?,
        _ => return Err(Error::InvalidPipeline(format!("unknown stage: {name}"))),
    })
}

pub(crate) fn sort_docs(docs: &mut [Value], keys: &[(String, SortOrder)]) {
    docs.sort_by(|a, b| {
        for (field, order) in keys {
            let av = query::resolve_field(a, field).map_or(FieldValue::Null, FieldValue::from_json);
            let bv = query::resolve_field(b, field).map_or(FieldValue::Null, FieldValue::from_json);
            let cmp = match order {
                SortOrder::Asc => av.cmp(&bv),
                SortOrder::Desc => bv.cmp(&av),
            };
            if cmp.is_ne() {
                return cmp;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn exec_group(docs: Vec<Value>, key: &GroupKey, accumulators: &[(String, Accumulator)]) -> Vec<Value> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Value, Vec<AccumulatorState>)> = HashMap::new();

    for doc in &docs {
        let key_val = key.eval(doc);
        let key_str = key_val.to_string();
        let (_, states) = groups.entry(key_str.clone()).or_insert_with(|| {
            order.push(key_str);
            (key_val, accumulators.iter().map(|(_, acc)| acc.initial()).collect())
        });
        for ((_, acc), state) in accumulators.iter().zip(states.iter_mut()) {
            acc.fold(state, doc);
        }
    }

    order
        .iter()
        .filter_map(|k| groups.remove(k))
        .map(|(key_val, states)| {
            let mut out = Map::new();
            out.insert("_id".to_string(), key_val);
            for ((name, _), state) in accumulators.iter().zip(states) {
                out.insert(name.clone(), state.finish());
            }
            Value::Object(out)
        })
        .collect()
}

fn exec_unwind(docs: Vec<Value>, path: &str, preserve_null: bool) -> Vec<Value> {
    let mut out = Vec::new();
    for doc in docs {
        match query::resolve_field(&doc, path).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    set_field(&mut copy, path, item);
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve_null {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A parsed aggregation pipeline, executed in memory.
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn parse(stages: &[Value]) -> Result<Self> {
        Ok(Self {
            stages: stages.iter().map(parse_stage).collect::<Result<_>>()?,
        })
    }

    /// Run every stage over `docs`. `lookup_fn` resolves `$lookup` stages
    /// against another collection.
    pub fn execute<F>(&self, docs: Vec<Value>, lookup_fn: &F) -> Result<Vec<Value>>
    where
        F: Fn(&str, &Value) -> Result<Vec<Value>>,
    {
        let mut current = docs;
        for stage in &self.stages {
            current = match stage {
                Stage::Match(q) => current
                    .into_iter()
                    .filter(|doc| query::matches_value(q, doc))
                    .collect(),
                Stage::Sort(keys) => {
                    sort_docs(&mut current, keys);
                    current
                }
                Stage::Skip(n) => current.into_iter().skip(*n as usize).collect(),
                Stage::Limit(n) => current.into_iter().take(*n as usize).collect(),
                Stage::Project(p) => current.into_iter().map(|d| p.apply(d)).collect(),
                Stage::Count(field) => {
                    // An empty input yields no count row.
                    if current.is_empty() {
                        Vec::new()
                    } else {
                        vec![json!({ field.as_str(): current.len() })]
                    }
                }
                Stage::Group { key, accumulators } => exec_group(current, key, accumulators),
                Stage::Unwind { path, preserve_null } => exec_unwind(current, path, *preserve_null),
                Stage::Lookup {
                    from,
                    local_field,
                    foreign_field,
                    as_field,
                } => {
                    let mut out = Vec::with_capacity(current.len());
                    for mut doc in current {
                        let local = query::resolve_field(&doc, local_field)
                            .cloned()
                            .unwrap_or(Value::Null);
                        let foreign = lookup_fn(from, &json!({ foreign_field.as_str(): local }))?;
                        set_field(&mut doc, as_field, Value::Array(foreign));
                        out.push(doc);
                    }
                    out
                }
            };
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_lookup(_col: &str, _q: &Value) -> Result<Vec<Value>> {
        Ok(vec![])
    }

    fn run(stages: Value, docs: Vec<Value>) -> Vec<Value> {
        let stages = stages.as_array().cloned().unwrap();
        Pipeline::parse(&stages).unwrap().execute(docs, &no_lookup).unwrap()
    }

    fn customers() -> Vec<Value> {
        (0..5)
            .map(|i| json!({"_id": i, "name": format!("Customer {i}"), "deleted": i % 2 == 0, "profit": i * 10}))
            .collect()
    }

    #[test]
    fn match_sort_skip_limit() {
        let out = run(
            json!([
                {"$match": {"deleted": false}},
                {"$sort": {"profit": -1}},
                {"$skip": 0},
                {"$limit": 1}
            ]),
            customers(),
        );
        assert_eq!(out, vec![customers()[3].clone()]);
    }

    #[test]
    fn count_names_output_field() {
        let out = run(json!([{"$count": "total"}]), customers());
        assert_eq!(out, vec![json!({"total": 5})]);
    }

    #[test]
    fn count_on_empty_input_yields_no_rows() {
        let out = run(json!([{"$match": {"name": "nobody"}}, {"$count": "total"}]), customers());
        assert!(out.is_empty());
    }

    #[test]
    fn group_sum_and_push() {
        let out = run(
            json!([
                {"$group": {"_id": "$deleted", "profit": {"$sum": "$profit"}, "n": {"$sum": 1}, "names": {"$push": "$name"}}}
            ]),
            customers(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["_id"], json!(true));
        assert_eq!(out[0]["profit"], json!(60));
        assert_eq!(out[0]["n"], json!(3));
        assert_eq!(out[1]["names"], json!(["Customer 1", "Customer 3"]));
    }

    #[test]
    fn group_min_max_avg() {
        let out = run(
            json!([{"$group": {"_id": null, "lo": {"$min": "$profit"}, "hi": {"$max": "$profit"}, "avg": {"$avg": "$profit"}}}]),
            customers(),
        );
        assert_eq!(out, vec![json!({"_id": null, "lo": 0, "hi": 40, "avg": 20})]);
    }

    #[test]
    fn project_string_spec() {
        let p = Projection::parse(&json!("name")).unwrap();
        assert_eq!(p.apply(customers().remove(1)), json!({"_id": 1, "name": "Customer 1"}));
        let p = Projection::parse(&json!("-profit -deleted")).unwrap();
        assert_eq!(p.apply(customers().remove(1)), json!({"_id": 1, "name": "Customer 1"}));
    }

    #[test]
    fn unwind_array() {
        let out = run(
            json!([{"$unwind": "$tags"}]),
            vec![json!({"tags": ["a", "b"]}), json!({"tags": []})],
        );
        assert_eq!(out, vec![json!({"tags": "a"}), json!({"tags": "b"})]);
    }

    #[test]
    fn lookup_uses_callback() {
        let lookup = |from: &str, q: &Value| -> Result<Vec<Value>> {
            assert_eq!(from, "users");
            Ok(vec![json!({"_id": q["_id"].clone(), "username": "test"})])
        };
        let stages = vec![json!({"$lookup": {"from": "users", "localField": "createdBy", "foreignField": "_id", "as": "author"}})];
        let out = Pipeline::parse(&stages)
            .unwrap()
            .execute(vec![json!({"createdBy": 7})], &lookup)
            .unwrap();
        assert_eq!(out[0]["author"], json!([{"_id": 7, "username": "test"}]));
    }

    #[test]
    fn unknown_stage_rejected() {
        let err = Pipeline::parse(&[json!({"$explode": {}})]).err().unwrap();
        assert!(matches!(err, Error::InvalidPipeline(_)));
    }

    #[test]
    fn multi_key_stage_rejected() {
        let err = Pipeline::parse(&[json!({"$skip": 1, "$limit": 2})]).err().unwrap();
        assert!(matches!(err, Error::InvalidPipeline(_)));
    }
}
