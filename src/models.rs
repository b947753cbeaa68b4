use serde::{Deserialize, Serialize};

use crate::backend::{BackendInfo, PoolStats, SearchResult, Stats};
use crate::blame::annotate::{DiffRow, FileLine};
use crate::history::Hunk;

/// Query string of the search endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub info: Stats,
    pub results: Vec<SearchResult>,
    pub search_type: String,
}

/// One configured backend as reported by `GET /api/v1/backends`
#[derive(Debug, Clone, Serialize)]
pub struct BackendSummary {
    pub id: String,
    pub addr: String,
    pub info: BackendInfo,
    pub pool: PoolStats,
}

/// A file annotated with blame as of one commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBlameResponse {
    pub repo: String,
    pub commit: String,
    pub path: String,
    /// Most recent earlier commit that changed the file, or empty
    pub previous_commit: String,
    /// Next commit that changes the file, or empty
    pub next_commit: String,
    pub lines: Vec<FileLine>,
}

/// One path's side-by-side rows within a commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFile {
    pub path: String,
    pub previous_commit: String,
    pub next_commit: String,
    pub hunks: Vec<Hunk>,
    pub rows: Vec<DiffRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResponse {
    pub repo: String,
    pub commit: String,
    /// First parent the diff is taken against, if any
    pub parent: Option<String>,
    pub files: Vec<DiffFile>,
}
