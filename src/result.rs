use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult {
    pub total: u64,
    pub limit: u64,
    pub page: u64,
    pub data: Vec<Value>,
}

impl PagedResult {
    pub(crate) fn empty(limit: u64, page: u64, data: Vec<Value>) -> Self {
        Self {
            total: 0,
            limit,
            page,
            data,
        }
    }
}

/// Outcome of a paginated aggregation: a page, or the raw rows of a
/// pipeline that counts on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Aggregated {
    Page(PagedResult),
    Raw(Vec<Value>),
}

impl Aggregated {
    pub fn page(&self) -> Option<&PagedResult> {
        match self {
            Aggregated::Page(p) => Some(p),
            Aggregated::Raw(_) => None,
        }
    }

    pub fn into_page(self) -> Option<PagedResult> {
        match self {
            Aggregated::Page(p) => Some(p),
            Aggregated::Raw(_) => None,
        }
    }
}

/// Completion callback: receives the outcome once, by reference.
pub type Callback<'a, T> = Box<dyn FnOnce(std::result::Result<&T, &Error>) + Send + 'a>;

/// Deliver one outcome to the optional callback, then hand it back to the
/// caller. Both channels always see the same outcome.
pub(crate) fn complete<T>(outcome: Result<T>, callback: Option<Callback<'_, T>>) -> Result<T> {
    if let Some(cb) = callback {
        cb(outcome.as_ref());
    }
    outcome
}

/// Handle to a call running on a background thread.
pub struct Pending<T> {
    rx: mpsc::Receiver<Result<T>>,
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn spawn(f: impl FnOnce() -> Result<T> + Send + 'static) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        std::thread::spawn(move || {
            // The receiver may already be gone; nobody is waiting then.
            let _ = tx.send(f());
        });
        Self { rx }
    }

    /// Block until the call finishes.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| Error::Background("worker ended without a result".into()))?
    }

    /// The outcome if the call has already finished.
    pub fn try_wait(&self) -> Option<Result<T>> {
        self.rx.try_recv().ok()
    }
}
