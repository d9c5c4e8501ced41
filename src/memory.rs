//! In-process document store implementing [`Store`].
//!
//! Each collection keeps its documents in insertion order together with the
//! [`SchemaDef`] that declares its references, so `populate` can expand them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Value, json};
use tracing::trace;

use crate::error::{Error, Result};
use crate::pipeline::{self, Pipeline, Projection};
use crate::query;
use crate::schema::SchemaDef;
use crate::store::{FindRequest, Store};

const VERSION_FIELD: &str = "_version";

struct MemoryCollection {
    schema: SchemaDef,
    next_id: u64,
    docs: Vec<Value>,
}

impl MemoryCollection {
    fn new(schema: SchemaDef) -> Self {
        Self {
            schema,
            next_id: 1,
            docs: Vec::new(),
        }
    }

    fn insert(&mut self, mut data: Value) -> Result<Value> {
        let obj = data.as_object_mut().ok_or(Error::NotAnObject)?;
        if !obj.contains_key("_id") {
            obj.insert("_id".to_string(), Value::Number(self.next_id.into()));
            self.next_id += 1;
        }
        obj.insert(VERSION_FIELD.to_string(), Value::Number(1.into()));
        let id = obj["_id"].clone();
        self.docs.push(data);
        Ok(id)
    }

    fn update(&mut self, criteria: &Value, set: &Value) -> Result<u64> {
        let q = query::parse_query(criteria)?;
        let fields = set
            .as_object()
            .ok_or_else(|| Error::InvalidQuery("update must be an object".into()))?;
        let mut updated = 0;
        for doc in self.docs.iter_mut().filter(|d| query::matches_value(&q, d)) {
            for (path, value) in fields {
                pipeline::set_field(doc, path, value.clone());
            }
            let version = doc.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0);
            pipeline::set_field(doc, VERSION_FIELD, Value::Number((version + 1).into()));
            updated += 1;
        }
        Ok(updated)
    }

    fn matching(&self, criteria: &Value) -> Result<Vec<Value>> {
        let q = query::parse_query(criteria)?;
        Ok(self
            .docs
            .iter()
            .filter(|d| query::matches_value(&q, d))
            .cloned()
            .collect())
    }
}

/// An in-memory database of named collections.
///
/// Thread-safe: a `RwLock` guards the collection map and one more guards
/// each collection.
pub struct MemoryDb {
    server_version: RwLock<String>,
    collections: RwLock<HashMap<String, Arc<RwLock<MemoryCollection>>>>,
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDb {
    pub fn new() -> Self {
        Self {
            server_version: RwLock::new("3.4.0".to_string()),
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// The version string reported through [`Store::server_version`].
    pub fn set_server_version(&self, version: impl Into<String>) {
        *self.server_version.write().unwrap() = version.into();
    }

    /// Create a collection for `schema`, or replace its schema if it exists.
    pub fn define(&self, schema: SchemaDef) {
        let mut cols = self.collections.write().unwrap();
        match cols.get(schema.name()) {
            Some(col) => col.write().unwrap().schema = schema,
            None => {
                let name = schema.name().to_string();
                cols.insert(name, Arc::new(RwLock::new(MemoryCollection::new(schema))));
            }
        }
    }

    fn get_or_create(&self, name: &str) -> Arc<RwLock<MemoryCollection>> {
        {
            let cols = self.collections.read().unwrap();
            if let Some(col) = cols.get(name) {
                return Arc::clone(col);
            }
        }
        let mut cols = self.collections.write().unwrap();
        Arc::clone(
            cols.entry(name.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(MemoryCollection::new(SchemaDef::new(name))))),
        )
    }

    fn get(&self, name: &str) -> Result<Arc<RwLock<MemoryCollection>>> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Insert a document, assigning an integer `_id` when it has none.
    /// Returns the document's `_id`.
    pub fn insert(&self, collection: &str, doc: Value) -> Result<Value> {
        self.get_or_create(collection).write().unwrap().insert(doc)
    }

    pub fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<Value>> {
        let col = self.get_or_create(collection);
        let mut col = col.write().unwrap();
        docs.into_iter().map(|d| col.insert(d)).collect()
    }

    /// Set fields (dot paths allowed) on every match, bumping `_version`.
    pub fn update(&self, collection: &str, criteria: &Value, set: &Value) -> Result<u64> {
        self.get(collection)?.write().unwrap().update(criteria, set)
    }

    /// A [`Store`] bound to one collection.
    pub fn collection(self: &Arc<Self>, name: &str) -> CollectionStore {
        CollectionStore {
            db: Arc::clone(self),
            name: name.to_string(),
        }
    }

    fn snapshot(&self, name: &str) -> Result<(SchemaDef, Vec<Value>)> {
        let col = self.get(name)?;
        let col = col.read().unwrap();
        Ok((col.schema.clone(), col.docs.clone()))
    }

    fn find_in(&self, name: &str, criteria: &Value) -> Result<Vec<Value>> {
        let found = self.get(name)?.read().unwrap().matching(criteria)?;
        Ok(found.into_iter().map(strip_version).collect())
    }
}

fn strip_version(mut doc: Value) -> Value {
    if let Value::Object(map) = &mut doc {
        map.shift_remove(VERSION_FIELD);
    }
    doc
}

// ---------------------------------------------------------------------------
// Populate
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PopulatePath {
    path: String,
    from: Option<String>,
    select: Option<Value>,
}

fn parse_populate(spec: &Value) -> Result<Vec<PopulatePath>> {
    match spec {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .split_whitespace()
            .map(|p| PopulatePath {
                path: p.to_string(),
                from: None,
                select: None,
            })
            .collect()),
        Value::Array(items) => {
            let mut paths = Vec::new();
            for item in items {
                paths.extend(parse_populate(item)?);
            }
            Ok(paths)
        }
        Value::Object(obj) => {
            let path = obj
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidQuery("populate object requires 'path'".into()))?;
            Ok(vec![PopulatePath {
                path: path.to_string(),
                from: obj.get("model").and_then(Value::as_str).map(str::to_string),
                select: obj.get("select").cloned(),
            }])
        }
        _ => Err(Error::InvalidQuery(
            "populate must be a string, object or array".into(),
        )),
    }
}

/// Collection handle implementing [`Store`].
#[derive(Clone)]
pub struct CollectionStore {
    db: Arc<MemoryDb>,
    name: String,
}

impl CollectionStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn populate(&self, schema: &SchemaDef, docs: &mut [Value], spec: &Value) -> Result<()> {
        for p in parse_populate(spec)? {
            let from = match p.from.as_deref().or_else(|| schema.ref_target(&p.path)) {
                Some(from) => from.to_string(),
                None => {
                    return Err(Error::InvalidQuery(format!(
                        "cannot populate '{}': not a reference of '{}'",
                        p.path, self.name
                    )));
                }
            };
            let projection = p.select.as_ref().map(Projection::parse).transpose()?;
            trace!(path = %p.path, %from, "populating");

            for doc in docs.iter_mut() {
                let Some(local) = query::resolve_field(doc, &p.path).cloned() else {
                    continue;
                };
                let resolve_one = |id: &Value| -> Result<Value> {
                    let found = self.db.find_in(&from, &json!({ "_id": id }))?;
                    Ok(match (found.into_iter().next(), &projection) {
                        (Some(d), Some(proj)) => proj.apply(d),
                        (Some(d), None) => d,
                        (None, _) => Value::Null,
                    })
                };
                let expanded = match &local {
                    Value::Array(ids) => Value::Array(
                        ids.iter().map(|id| resolve_one(id)).collect::<Result<Vec<_>>>()?,
                    ),
                    Value::Null => Value::Null,
                    id => resolve_one(id)?,
                };
                pipeline::set_field(doc, &p.path, expanded);
            }
        }
        Ok(())
    }
}

impl Store for CollectionStore {
    fn count(&self, criteria: &Value) -> Result<u64> {
        let col = self.db.get(&self.name)?;
        let q = query::parse_query(criteria)?;
        let col = col.read().unwrap();
        Ok(col.docs.iter().filter(|d| query::matches_value(&q, d)).count() as u64)
    }

    fn find(&self, request: &FindRequest) -> Result<Vec<Value>> {
        let (schema, docs) = self.db.snapshot(&self.name)?;
        let q = query::parse_query(&request.criteria)?;
        let mut docs: Vec<Value> = docs
            .into_iter()
            .filter(|d| query::matches_value(&q, d))
            .collect();

        if let Some(sort) = &request.sort {
            pipeline::sort_docs(&mut docs, &query::parse_sort_spec(sort)?);
        }
        let take = request.limit.map_or(usize::MAX, |l| l as usize);
        let mut docs: Vec<Value> = docs
            .into_iter()
            .skip(request.skip as usize)
            .take(take)
            .collect();

        if let Some(select) = &request.select {
            let projection = Projection::parse(select)?;
            docs = docs
                .into_iter()
                .map(|d| {
                    let version = d.get(VERSION_FIELD).cloned();
                    let mut projected = projection.apply(d);
                    if let (Some(v), Value::Object(map)) = (version, &mut projected) {
                        map.insert(VERSION_FIELD.to_string(), v);
                    }
                    projected
                })
                .collect();
        }
        self.populate(&schema, &mut docs, &request.populate)?;

        Ok(if request.lean {
            docs.into_iter().map(strip_version).collect()
        } else {
            docs
        })
    }

    fn aggregate(&self, stages: &[Value]) -> Result<Vec<Value>> {
        let pipeline = Pipeline::parse(stages)?;
        let (_, docs) = self.db.snapshot(&self.name)?;
        let docs = docs.into_iter().map(strip_version).collect();
        let lookup = |from: &str, criteria: &Value| self.db.find_in(from, criteria);
        pipeline.execute(docs, &lookup)
    }

    fn server_version(&self) -> Result<String> {
        Ok(self.db.server_version.read().unwrap().clone())
    }
}
