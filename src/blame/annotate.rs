//! Interleaves blame results with file contents for display.

use serde::{Deserialize, Serialize};

use super::{BlameLine, BlameResult};

/// Unchanged runs longer than this are collapsed.
const MAX_CONTEXT: usize = 9;
/// Real lines kept at each end of a collapsed run.
const CONTEXT_EDGE: usize = 3;
/// Placeholder rows standing in for the collapsed middle.
const ELLIPSIS_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Both,
    Left,
    Right,
    Ellipsis,
}

/// One row of a two-sided diff.
///
/// `old_commit_hash` is the commit that introduced the left-hand line and
/// `new_commit_hash` the commit that next changes the right-hand line. On a
/// `left` row the new hash is empty (this commit removed the line), on a
/// `right` row the old hash is empty (this commit added it). On a `both` row
/// an empty new hash means the line is still present at the newest commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRow {
    pub kind: RowKind,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub old_commit_hash: String,
    pub new_commit_hash: String,
    pub text: String,
}

/// One line of a blamed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLine {
    pub number: usize,
    pub blame: BlameLine,
    pub future: BlameLine,
    pub text: String,
}

struct RowWriter<'a> {
    result: &'a BlameResult,
    old_lines: Vec<&'a str>,
    new_lines: Vec<&'a str>,
    o_line: usize,
    n_line: usize,
    rows: Vec<DiffRow>,
}

impl<'a> RowWriter<'a> {
    fn both(&mut self) {
        let text = self
            .new_lines
            .get(self.n_line - 1)
            .or_else(|| self.old_lines.get(self.o_line - 1))
            .copied()
            .unwrap_or_default();
        self.rows.push(DiffRow {
            kind: RowKind::Both,
            old_line: Some(self.o_line),
            new_line: Some(self.n_line),
            old_commit_hash: hash_of(&self.result.blame_vector, self.o_line),
            new_commit_hash: hash_of(&self.result.future_vector, self.n_line),
            text: text.to_string(),
        });
        self.o_line += 1;
        self.n_line += 1;
    }

    fn left(&mut self) {
        self.rows.push(DiffRow {
            kind: RowKind::Left,
            old_line: Some(self.o_line),
            new_line: None,
            old_commit_hash: hash_of(&self.result.blame_vector, self.o_line),
            new_commit_hash: String::new(),
            text: line_of(&self.old_lines, self.o_line),
        });
        self.o_line += 1;
    }

    fn right(&mut self) {
        self.rows.push(DiffRow {
            kind: RowKind::Right,
            old_line: None,
            new_line: Some(self.n_line),
            old_commit_hash: String::new(),
            new_commit_hash: hash_of(&self.result.future_vector, self.n_line),
            text: line_of(&self.new_lines, self.n_line),
        });
        self.n_line += 1;
    }

    fn ellipsis(&mut self) {
        self.rows.push(DiffRow {
            kind: RowKind::Ellipsis,
            old_line: None,
            new_line: None,
            old_commit_hash: String::new(),
            new_commit_hash: String::new(),
            text: String::new(),
        });
    }

    /// Emit `count` unchanged lines, collapsing long runs.
    fn context(&mut self, count: usize) {
        if count <= MAX_CONTEXT {
            for _ in 0..count {
                self.both();
            }
            return;
        }
        for _ in 0..CONTEXT_EDGE {
            self.both();
        }
        for _ in 0..ELLIPSIS_ROWS {
            self.ellipsis();
        }
        let hidden = count - 2 * CONTEXT_EDGE;
        self.o_line += hidden;
        self.n_line += hidden;
        for _ in 0..CONTEXT_EDGE {
            self.both();
        }
    }
}

/// Build the rows of a two-sided diff from a diff blame and the file
/// contents before and after the commit.
pub fn annotate_diff(result: &BlameResult, old_text: &str, new_text: &str) -> Vec<DiffRow> {
    let mut writer = RowWriter {
        result,
        old_lines: old_text.lines().collect(),
        new_lines: new_text.lines().collect(),
        o_line: 1,
        n_line: 1,
        rows: Vec::new(),
    };

    for hunk in &result.hunks {
        // a zero-length side names the line after which the change happens
        let old_before = if hunk.old_length == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        writer.context(old_before.saturating_sub(writer.o_line - 1));
        for _ in 0..hunk.old_length {
            writer.left();
        }

        let new_before = if hunk.new_length == 0 {
            hunk.new_start
        } else {
            hunk.new_start.saturating_sub(1)
        };
        writer.context(new_before.saturating_sub(writer.n_line - 1));
        for _ in 0..hunk.new_length {
            writer.right();
        }
    }

    let old_remaining = result.blame_vector.len().max(writer.old_lines.len());
    writer.context(old_remaining.saturating_sub(writer.o_line - 1));
    writer.rows
}

/// Pair each line of `text` with its blame and future entries.
pub fn annotate_file(result: &BlameResult, text: &str) -> Vec<FileLine> {
    result
        .blame_vector
        .iter()
        .zip(&result.future_vector)
        .zip(text.lines().map(Some).chain(std::iter::repeat(None)))
        .enumerate()
        .map(|(i, ((blame, future), line))| FileLine {
            number: i + 1,
            blame: blame.clone(),
            future: future.clone(),
            text: line.unwrap_or_default().to_string(),
        })
        .collect()
}

fn hash_of(vector: &[BlameLine], line: usize) -> String {
    vector
        .get(line - 1)
        .map(|entry| entry.commit_hash.clone())
        .unwrap_or_default()
}

fn line_of(lines: &[&str], line: usize) -> String {
    lines.get(line - 1).copied().unwrap_or_default().to_string()
}
