//! Line attribution computed from hunk headers alone.
//!
//! A file version is described by a list of [`BlameSegment`]s: runs of
//! consecutive lines that were introduced together by one commit. [`step`]
//! replays one commit's hunks over the previous version's segments to get
//! the next version's. Folding it forward yields the blame of every line;
//! folding it forward to the newest version, wiping the attribution and
//! folding back in reverse yields the commit that next removes each line.

pub mod annotate;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::{short_hash, DiffId, GitHistory, Hunk};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("no such file: {0}")]
    NoSuchFile(String),

    #[error("no such commit: {0}")]
    UnknownCommit(String),

    #[error("file {path} does not exist at commit {commit}")]
    FileDoesNotExist { path: String, commit: String },

    #[error("commit {commit} did not change file {path}")]
    CommitDidNotChangeFile { commit: String, path: String },
}

/// `line_count` lines introduced by `commit_hash`, the first of which was
/// line `line_start` in that commit's version of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameSegment {
    pub line_count: usize,
    pub line_start: usize,
    pub commit_hash: String,
}

impl BlameSegment {
    pub fn new(line_count: usize, line_start: usize, commit_hash: impl Into<String>) -> Self {
        Self {
            line_count,
            line_start,
            commit_hash: commit_hash.into(),
        }
    }
}

/// One line of a flattened blame or future vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameLine {
    pub commit_hash: String,
    pub line_number: usize,
}

pub type BlameVector = Vec<BlameLine>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameResult {
    pub blame_vector: BlameVector,
    pub future_vector: BlameVector,
    pub previous_commit_hash: String,
    pub next_commit_hash: String,
    pub hunks: Vec<Hunk>,
}

/// Walks the previous version's segments while building the next version's.
struct Stepper<'a> {
    old: &'a [BlameSegment],
    index: usize,
    offset: usize,
    o_line: usize,
    n_line: usize,
    out: Vec<BlameSegment>,
}

impl<'a> Stepper<'a> {
    fn new(old: &'a [BlameSegment]) -> Self {
        Self {
            old,
            index: 0,
            offset: 0,
            o_line: 1,
            n_line: 1,
            out: Vec::with_capacity(old.len() + 2),
        }
    }

    /// Copy `n` unchanged lines, splitting the current segment if needed.
    fn forward(&mut self, n: usize) {
        self.consume(n, true);
    }

    /// Drop `n` deleted lines.
    fn skip(&mut self, n: usize) {
        self.consume(n, false);
    }

    fn consume(&mut self, mut n: usize, keep: bool) {
        while n > 0 {
            let Some(segment) = self.old.get(self.index) else {
                break;
            };
            let take = n.min(segment.line_count - self.offset);
            if keep {
                self.out.push(BlameSegment {
                    line_count: take,
                    line_start: segment.line_start + self.offset,
                    commit_hash: segment.commit_hash.clone(),
                });
                self.n_line += take;
            }
            self.o_line += take;
            self.offset += take;
            if self.offset == segment.line_count {
                self.index += 1;
                self.offset = 0;
            }
            n -= take;
        }
    }

    fn emit(&mut self, line_count: usize, commit_hash: &str) {
        self.out.push(BlameSegment::new(line_count, self.n_line, commit_hash));
        self.n_line += line_count;
    }

    fn finish(mut self) -> Vec<BlameSegment> {
        self.forward(usize::MAX);
        self.out
    }
}

/// Apply one commit's hunks to the segments of the previous file version.
pub fn step(segments: &[BlameSegment], hunks: &[Hunk], commit_hash: &str) -> Vec<BlameSegment> {
    let mut stepper = Stepper::new(segments);
    for hunk in hunks {
        if hunk.old_length > 0 {
            stepper.forward(hunk.old_start.saturating_sub(stepper.o_line));
            stepper.skip(hunk.old_length);
        }
        if hunk.new_length > 0 {
            stepper.forward(hunk.new_start.saturating_sub(stepper.n_line));
            stepper.emit(hunk.new_length, commit_hash);
        }
    }
    stepper.finish()
}

/// Undo one commit's hunks; the lines it deleted come back tagged with it.
pub fn step_reverse(
    segments: &[BlameSegment],
    hunks: &[Hunk],
    commit_hash: &str,
) -> Vec<BlameSegment> {
    let swapped: Vec<Hunk> = hunks.iter().map(|h| h.swapped()).collect();
    step(segments, &swapped, commit_hash)
}

/// Collapse all segments into one unattributed run of the same length.
pub fn wipe(segments: &[BlameSegment]) -> Vec<BlameSegment> {
    let total: usize = segments.iter().map(|s| s.line_count).sum();
    if total == 0 {
        Vec::new()
    } else {
        vec![BlameSegment::new(total, 1, "")]
    }
}

/// Expand segments into one entry per line.
pub fn flatten(segments: &[BlameSegment]) -> BlameVector {
    segments
        .iter()
        .flat_map(|s| {
            (0..s.line_count).map(move |k| BlameLine {
                commit_hash: s.commit_hash.clone(),
                line_number: s.line_start + k,
            })
        })
        .collect()
}

/// Blame of `path` as of `commit`, which need not have touched the file.
pub fn file_blame(
    history: &GitHistory,
    commit: &str,
    path: &str,
) -> Result<BlameResult, HistoryError> {
    let diffs = history
        .file_diffs(path)
        .ok_or_else(|| HistoryError::NoSuchFile(path.to_string()))?;
    let position = history
        .position(commit)
        .ok_or_else(|| HistoryError::UnknownCommit(commit.to_string()))?;

    // number of diffs at or before `commit`
    let upto = diffs.partition_point(|id| diff_position(history, *id) <= position);
    if upto == 0 {
        return Err(HistoryError::FileDoesNotExist {
            path: path.to_string(),
            commit: commit.to_string(),
        });
    }
    let i = upto - 1;
    let latest = history.diff(diffs[i]);

    let previous_commit_hash = if latest.hash == short_hash(commit) {
        hash_at(history, diffs, i.checked_sub(1))
    } else {
        latest.hash.clone()
    };
    let (blame_vector, future_vector) = blame_vectors(history, diffs, upto, upto);

    Ok(BlameResult {
        blame_vector,
        future_vector,
        previous_commit_hash,
        next_commit_hash: hash_at(history, diffs, Some(upto)),
        hunks: latest.hunks.clone(),
    })
}

/// Blame of both sides of the change `commit` made to `path`.
///
/// The blame vector describes the file just before `commit`, the future
/// vector the file just after it, and `hunks` is the change itself.
pub fn diff_blame(
    history: &GitHistory,
    commit: &str,
    path: &str,
) -> Result<BlameResult, HistoryError> {
    let diffs = history
        .file_diffs(path)
        .ok_or_else(|| HistoryError::NoSuchFile(path.to_string()))?;
    if history.position(commit).is_none() {
        return Err(HistoryError::UnknownCommit(commit.to_string()));
    }
    let hash = short_hash(commit);
    let i = diffs
        .iter()
        .position(|id| history.diff(*id).hash == hash)
        .ok_or_else(|| HistoryError::CommitDidNotChangeFile {
            commit: commit.to_string(),
            path: path.to_string(),
        })?;

    let (blame_vector, future_vector) = blame_vectors(history, diffs, i, i + 1);
    Ok(BlameResult {
        blame_vector,
        future_vector,
        previous_commit_hash: hash_at(history, diffs, i.checked_sub(1)),
        next_commit_hash: hash_at(history, diffs, Some(i + 1)),
        hunks: history.diff(diffs[i]).hunks.clone(),
    })
}

/// Blame after the first `blame_upto` diffs, and the future of the version
/// after the first `future_from` diffs.
fn blame_vectors(
    history: &GitHistory,
    diffs: &[DiffId],
    blame_upto: usize,
    future_from: usize,
) -> (BlameVector, BlameVector) {
    let mut segments = Vec::new();
    for id in &diffs[..blame_upto] {
        let diff = history.diff(*id);
        segments = step(&segments, &diff.hunks, &diff.hash);
    }
    let blame = flatten(&segments);

    for id in &diffs[blame_upto..] {
        let diff = history.diff(*id);
        segments = step(&segments, &diff.hunks, &diff.hash);
    }
    segments = wipe(&segments);
    for id in diffs[future_from..].iter().rev() {
        let diff = history.diff(*id);
        segments = step_reverse(&segments, &diff.hunks, &diff.hash);
    }

    (blame, flatten(&segments))
}

fn diff_position(history: &GitHistory, id: DiffId) -> usize {
    history.position(&history.diff(id).hash).unwrap_or(usize::MAX)
}

fn hash_at(history: &GitHistory, diffs: &[DiffId], index: Option<usize>) -> String {
    index
        .and_then(|i| diffs.get(i))
        .map(|id| history.diff(*id).hash.clone())
        .unwrap_or_default()
}
