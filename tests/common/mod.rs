//! Shared fixtures: ten customers created by one user.
//!
//! Customer `i` is named `"Customer {i}"`, has `profit = i * 10` and is
//! marked deleted when `i` is even.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use docpager::{
    CollectionStore, Error, FindRequest, MemoryDb, Paginator, Result, SchemaDef, Store,
};

pub const QTY_CUSTOMERS: u64 = 10;

pub fn seeded_db() -> Arc<MemoryDb> {
    let db = Arc::new(MemoryDb::new());
    db.define(SchemaDef::new("users").field("username").field("password"));
    db.define(customer_schema());

    let user = db
        .insert("users", json!({"username": "test", "password": "123456"}))
        .expect("insert user");
    let customers = (0..QTY_CUSTOMERS)
        .map(|i| {
            json!({
                "name": format!("Customer {i}"),
                "date": "2024-01-15T10:30:00Z",
                "deleted": i % 2 == 0,
                "createdBy": user.clone(),
                "profit": i * 10,
            })
        })
        .collect();
    db.insert_many("customers", customers).expect("insert customers");
    db
}

pub fn customer_schema() -> SchemaDef {
    SchemaDef::new("customers")
        .field("name")
        .field("date")
        .field("deleted")
        .field("profit")
        .reference("createdBy", "users")
}

pub fn customers() -> Paginator<CollectionStore> {
    Paginator::new(seeded_db().collection("customers"), customer_schema())
}

pub fn names(data: &[Value]) -> Vec<String> {
    data.iter()
        .map(|d| d["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Wraps a store and records which operations ran.
pub struct Recording<S> {
    pub inner: S,
    pub calls: Mutex<Vec<String>>,
}

impl<S> Recording<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str) {
        self.calls.lock().unwrap().push(op.to_string());
    }
}

impl<S: Store> Store for Recording<S> {
    fn count(&self, criteria: &Value) -> Result<u64> {
        self.record("count");
        self.inner.count(criteria)
    }

    fn find(&self, request: &FindRequest) -> Result<Vec<Value>> {
        self.record("find");
        self.inner.find(request)
    }

    fn aggregate(&self, stages: &[Value]) -> Result<Vec<Value>> {
        self.record("aggregate");
        self.inner.aggregate(stages)
    }

    fn server_version(&self) -> Result<String> {
        self.record("server_version");
        self.inner.server_version()
    }
}

/// A store whose count operation always fails.
pub struct BrokenCount(pub CollectionStore);

impl Store for BrokenCount {
    fn count(&self, _criteria: &Value) -> Result<u64> {
        Err(Error::Store("error while counting customers".into()))
    }

    fn find(&self, request: &FindRequest) -> Result<Vec<Value>> {
        self.0.find(request)
    }

    fn aggregate(&self, stages: &[Value]) -> Result<Vec<Value>> {
        self.0.aggregate(stages)
    }

    fn server_version(&self) -> Result<String> {
        self.0.server_version()
    }
}
