//! Commit history reduced to unified-diff hunk headers.
//!
//! A [`GitHistory`] is built once from the output of `git log -U0` (see
//! [`ingest`]) and is immutable afterwards. Diffs live in a single arena and
//! are referenced by [`DiffId`] from both the per-commit and the per-path
//! indexes, so a hunk appended while parsing is visible from either side.

pub mod ingest;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use ingest::{parse_log, strip_log, IngestError};

/// Width every commit hash is truncated to before it is stored or compared.
pub const HASH_LEN: usize = 16;

/// A unified-diff hunk header `@@ -old_start,old_length +new_start,new_length @@`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_length: usize,
    pub new_start: usize,
    pub new_length: usize,
}

impl Hunk {
    pub const fn new(old_start: usize, old_length: usize, new_start: usize, new_length: usize) -> Self {
        Self {
            old_start,
            old_length,
            new_start,
            new_length,
        }
    }

    /// The same hunk seen from the other side of the diff.
    pub const fn swapped(self) -> Self {
        Self {
            old_start: self.new_start,
            old_length: self.new_length,
            new_start: self.old_start,
            new_length: self.old_length,
        }
    }
}

/// The hunks one commit applied to one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub hash: String,
    pub path: String,
    pub hunks: Vec<Hunk>,
}

/// Index of a [`Diff`] inside the [`GitHistory`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiffId(usize);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GitHistory {
    hashes: Vec<String>,
    positions: HashMap<String, usize>,
    diffs: Vec<Diff>,
    commits: HashMap<String, Vec<DiffId>>,
    files: HashMap<String, Vec<DiffId>>,
}

impl GitHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit hashes in log order, each [`HASH_LEN`] characters.
    pub fn hashes(&self) -> &[String] {
        &self.hashes
    }

    pub fn diff(&self, id: DiffId) -> &Diff {
        &self.diffs[id.0]
    }

    /// Diffs introduced by `hash`, one per touched path.
    pub fn commit_diffs(&self, hash: &str) -> Option<&[DiffId]> {
        self.commits.get(short_hash(hash)).map(Vec::as_slice)
    }

    /// Diffs affecting `path`, oldest first.
    pub fn file_diffs(&self, path: &str) -> Option<&[DiffId]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Position of `hash` within [`Self::hashes`].
    pub fn position(&self, hash: &str) -> Option<usize> {
        self.positions.get(short_hash(hash)).copied()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn diff_count(&self) -> usize {
        self.diffs.len()
    }

    /// Append a commit to the log order.
    pub fn push_commit(&mut self, hash: &str) {
        let hash = short_hash(hash).to_string();
        self.positions.insert(hash.clone(), self.hashes.len());
        self.commits.entry(hash.clone()).or_default();
        self.hashes.push(hash);
    }

    /// Start a new diff for `path` under the most recent commit.
    pub fn push_diff(&mut self, path: &str) -> Option<DiffId> {
        let hash = self.hashes.last()?.clone();
        let id = DiffId(self.diffs.len());
        self.diffs.push(Diff {
            hash: hash.clone(),
            path: path.to_string(),
            hunks: Vec::new(),
        });
        self.commits.entry(hash).or_default().push(id);
        self.files.entry(path.to_string()).or_default().push(id);
        Some(id)
    }

    pub fn push_hunk(&mut self, id: DiffId, hunk: Hunk) {
        self.diffs[id.0].hunks.push(hunk);
    }
}

/// Truncate a commit hash to [`HASH_LEN`] characters.
pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(HASH_LEN) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_truncates() {
        assert_eq!(
            short_hash("0123456789abcdef0123456789abcdef01234567"),
            "0123456789abcdef"
        );
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn test_diff_shared_between_indexes() {
        let mut history = GitHistory::new();
        history.push_commit("a1");
        let id = history.push_diff("README").unwrap();
        history.push_hunk(id, Hunk::new(0, 0, 1, 3));

        let by_commit = history.commit_diffs("a1").unwrap();
        let by_path = history.file_diffs("README").unwrap();
        assert_eq!(by_commit, by_path);
        assert_eq!(history.diff(by_path[0]).hunks, vec![Hunk::new(0, 0, 1, 3)]);
    }

    #[test]
    fn test_push_diff_without_commit() {
        let mut history = GitHistory::new();
        assert!(history.push_diff("README").is_none());
    }

    #[test]
    fn test_hunk_swapped() {
        assert_eq!(Hunk::new(1, 2, 3, 4).swapped(), Hunk::new(3, 4, 1, 2));
    }
}
