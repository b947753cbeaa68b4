//! Frames exchanged with a browser over the search websocket.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::protocol::{SearchResult, Stats};
use crate::codec::{Op, Registry};
use crate::query::Query;

/// A search as submitted by the browser. `id` is chosen by the browser and
/// echoed on every frame answering it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserQuery {
    pub id: u64,
    #[serde(default)]
    pub backend: String,
    #[serde(flatten)]
    pub query: Query,
}

impl BrowserQuery {
    /// True when both would produce the same results for the user.
    pub fn same_search(&self, other: &BrowserQuery) -> bool {
        self.backend == other.backend
            && self.query.line == other.query.line
            && self.query.file == other.query.file
            && self.query.repo == other.query.repo
            && self.query.fold_case == other.query.fold_case
    }
}

/// False when `query` would repeat the last dispatched search.
pub fn should_dispatch(last: Option<&BrowserQuery>, query: &BrowserQuery) -> bool {
    !last.is_some_and(|last| last.same_search(query))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub id: u64,
    pub result: SearchResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDone {
    pub id: u64,
    /// Milliseconds between dispatch and the backend's stats.
    pub time: u64,
    pub stats: Stats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryErrorFrame {
    pub id: u64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrowserOp {
    Query(BrowserQuery),
    Result(ResultFrame),
    SearchDone(SearchDone),
    QueryError(QueryErrorFrame),
    Error(ErrorFrame),
}

impl BrowserOp {
    pub fn error(message: impl Into<String>) -> Self {
        BrowserOp::Error(ErrorFrame {
            error: message.into(),
        })
    }

    pub fn query_error(id: u64, message: impl Into<String>) -> Self {
        BrowserOp::QueryError(QueryErrorFrame {
            id,
            error: message.into(),
        })
    }

    /// The search this frame answers, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            BrowserOp::Query(q) => Some(q.id),
            BrowserOp::Result(f) => Some(f.id),
            BrowserOp::SearchDone(f) => Some(f.id),
            BrowserOp::QueryError(f) => Some(f.id),
            BrowserOp::Error(_) => None,
        }
    }
}

impl Op for BrowserOp {
    fn opcode(&self) -> &'static str {
        match self {
            BrowserOp::Query(_) => "query",
            BrowserOp::Result(_) => "result",
            BrowserOp::SearchDone(_) => "search_done",
            BrowserOp::QueryError(_) => "query_error",
            BrowserOp::Error(_) => "error",
        }
    }

    fn body(&self) -> Result<Value, serde_json::Error> {
        match self {
            BrowserOp::Query(q) => serde_json::to_value(q),
            BrowserOp::Result(f) => serde_json::to_value(f),
            BrowserOp::SearchDone(f) => serde_json::to_value(f),
            BrowserOp::QueryError(f) => serde_json::to_value(f),
            BrowserOp::Error(f) => serde_json::to_value(f),
        }
    }
}

static REGISTRY: LazyLock<Registry<BrowserOp>> = LazyLock::new(|| {
    let mut registry = Registry::new();
    registry
        .register("query", |body| serde_json::from_value(body).map(BrowserOp::Query))
        .register("result", |body| serde_json::from_value(body).map(BrowserOp::Result))
        .register("search_done", |body| {
            serde_json::from_value(body).map(BrowserOp::SearchDone)
        })
        .register("query_error", |body| {
            serde_json::from_value(body).map(BrowserOp::QueryError)
        })
        .register("error", |body| serde_json::from_value(body).map(BrowserOp::Error));
    registry
});

/// Decoders for the browser websocket protocol.
pub fn registry() -> &'static Registry<BrowserOp> {
    &REGISTRY
}
