//! Messages exchanged with a search backend daemon.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{Op, Registry};
use crate::query::Query;

/// Sent by the backend once, right after the connection is established.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub repos: Vec<RepoInfo>,
    #[serde(default)]
    pub has_tags: bool,
    /// Unix seconds at which the backend's index was built.
    #[serde(default)]
    pub index_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPath {
    #[serde(default)]
    pub tree: String,
    #[serde(default)]
    pub version: String,
    pub path: String,
}

/// A matching line together with every path it occurs in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultContext {
    #[serde(default)]
    pub paths: Vec<ResultPath>,
    #[serde(default)]
    pub lno: usize,
    #[serde(default)]
    pub context_before: Vec<String>,
    #[serde(default)]
    pub context_after: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub contexts: Vec<ResultContext>,
    /// Byte range of the match within `line`.
    #[serde(default)]
    pub bounds: [usize; 2],
    pub line: String,
}

/// Timing summary that terminates a successful query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub re2_time: i64,
    #[serde(default)]
    pub git_time: i64,
    #[serde(default)]
    pub sort_time: i64,
    #[serde(default)]
    pub index_time: i64,
    #[serde(default)]
    pub analyze_time: i64,
    /// Why the search stopped, e.g. `NONE` or `MATCH_LIMIT`.
    #[serde(default)]
    pub why: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendOp {
    Info(ServerInfo),
    Query(Query),
    Result(SearchResult),
    Stats(Stats),
    Error(String),
}

impl BackendOp {
    /// True for the messages that end a query's result stream.
    pub fn is_terminator(&self) -> bool {
        matches!(self, BackendOp::Stats(_) | BackendOp::Error(_))
    }
}

impl Op for BackendOp {
    fn opcode(&self) -> &'static str {
        match self {
            BackendOp::Info(_) => "info",
            BackendOp::Query(_) => "query",
            BackendOp::Result(_) => "result",
            BackendOp::Stats(_) => "stats",
            BackendOp::Error(_) => "error",
        }
    }

    fn body(&self) -> Result<Value, serde_json::Error> {
        match self {
            BackendOp::Info(info) => serde_json::to_value(info),
            BackendOp::Query(query) => serde_json::to_value(query),
            BackendOp::Result(result) => serde_json::to_value(result),
            BackendOp::Stats(stats) => serde_json::to_value(stats),
            BackendOp::Error(message) => serde_json::to_value(message),
        }
    }
}

impl Op for Query {
    fn opcode(&self) -> &'static str {
        "query"
    }

    fn body(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

static REGISTRY: LazyLock<Registry<BackendOp>> = LazyLock::new(|| {
    let mut registry = Registry::new();
    registry
        .register("info", |body| serde_json::from_value(body).map(BackendOp::Info))
        .register("query", |body| serde_json::from_value(body).map(BackendOp::Query))
        .register("result", |body| serde_json::from_value(body).map(BackendOp::Result))
        .register("stats", |body| serde_json::from_value(body).map(BackendOp::Stats))
        .register("error", |body| serde_json::from_value(body).map(BackendOp::Error));
    registry
});

/// Decoders for the backend RPC protocol.
pub fn registry() -> &'static Registry<BackendOp> {
    &REGISTRY
}

/// A repository as advertised to browsers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub name: String,
    pub version: String,
    /// `owner/repo` on GitHub, when the backend knows it.
    pub github: String,
}

/// The pool's view of what a backend serves, refreshed on every connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    pub trees: Vec<Tree>,
    pub has_tags: bool,
    pub index_time: Option<DateTime<Utc>>,
}

impl From<&ServerInfo> for BackendInfo {
    fn from(info: &ServerInfo) -> Self {
        let trees = info
            .repos
            .iter()
            .map(|repo| Tree {
                name: repo.name.clone(),
                version: repo.metadata.get("version").cloned().unwrap_or_default(),
                github: repo.metadata.get("github").cloned().unwrap_or_default(),
            })
            .collect();
        Self {
            name: info.name.clone(),
            trees,
            has_tags: info.has_tags,
            index_time: if info.index_time > 0 {
                Utc.timestamp_opt(info.index_time, 0).single()
            } else {
                None
            },
        }
    }
}
