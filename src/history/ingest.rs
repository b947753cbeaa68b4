//! Reader for the `git log -U0` stream.
//!
//! Only four kinds of lines matter: `commit <hash>`, `--- <path>`,
//! `+++ <path>` and `@@ -a,b +c,d @@` hunk headers. Everything else is
//! ignored, and the `+`/`-` payload following a hunk header is skipped by
//! count. The stripped variant drops the payload and marks each header with
//! a trailing `-` (`@@ -a,b +c,d @@-`) so the reader knows nothing follows.

use std::io::{BufRead, Write};

use thiserror::Error;

use super::{GitHistory, Hunk, HASH_LEN};

/// Arguments after `git log` that produce the stream this module reads.
pub const GIT_LOG_ARGS: &[&str] = &[
    "log",
    "-U0",
    "--first-parent",
    "-m",
    "--no-renames",
    "--reverse",
    "--format=commit %H",
    "--no-prefix",
    "--no-ext-diff",
    "--no-textconv",
];

const DEV_NULL: &str = "/dev/null";

/// Read buffer size; lines longer than this still parse, the buffer grows.
const READ_BUFFER: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error reading git log: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: malformed commit line: {text}")]
    MalformedCommit { line: usize, text: String },

    #[error("line {line}: malformed hunk header: {text}")]
    MalformedHunk { line: usize, text: String },

    #[error("line {line}: {what} outside of a {parent}")]
    OutOfPlace {
        line: usize,
        what: &'static str,
        parent: &'static str,
    },

    #[error("git log ended with {missing} payload lines missing")]
    Truncated { missing: usize },
}

/// One meaningful line of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    Commit(String),
    OldPath(String),
    NewPath(String),
    Hunk(Hunk),
}

struct Scanner<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
    skip: usize,
}

impl<R: BufRead> Scanner<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(4096),
            line: 0,
            skip: 0,
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>, IngestError> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                if self.skip > 0 {
                    return Err(IngestError::Truncated { missing: self.skip });
                }
                return Ok(None);
            }
            self.line += 1;
            let line = trim_eol(&self.buf);

            if self.skip > 0 {
                // "\ No newline at end of file" rides along with the payload
                if !line.starts_with(b"\\") {
                    self.skip -= 1;
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix(b"commit ") {
                let hash = parse_commit(rest).ok_or_else(|| IngestError::MalformedCommit {
                    line: self.line,
                    text: lossy(line),
                })?;
                return Ok(Some(Record::Commit(hash)));
            }
            if let Some(rest) = line.strip_prefix(b"--- ") {
                return Ok(Some(Record::OldPath(lossy(rest))));
            }
            if let Some(rest) = line.strip_prefix(b"+++ ") {
                return Ok(Some(Record::NewPath(lossy(rest))));
            }
            if line.starts_with(b"@@ ") {
                let (hunk, stripped) =
                    parse_hunk_header(line).ok_or_else(|| IngestError::MalformedHunk {
                        line: self.line,
                        text: lossy(line),
                    })?;
                if !stripped {
                    self.skip = hunk.old_length + hunk.new_length;
                }
                return Ok(Some(Record::Hunk(hunk)));
            }
        }
    }
}

/// Build a [`GitHistory`] from a full or stripped log stream.
pub fn parse_log<R: BufRead>(reader: R) -> Result<GitHistory, IngestError> {
    let mut scanner = Scanner::new(reader);
    let mut history = GitHistory::new();
    let mut old_path: Option<String> = None;
    let mut current = None;

    while let Some(record) = scanner.next_record()? {
        match record {
            Record::Commit(hash) => {
                history.push_commit(&hash);
                old_path = None;
                current = None;
            }
            Record::OldPath(path) => old_path = Some(path),
            Record::NewPath(new_path) => {
                let path = match old_path.take() {
                    Some(old) if old != DEV_NULL => old,
                    _ => new_path,
                };
                current = Some(history.push_diff(&path).ok_or(IngestError::OutOfPlace {
                    line: scanner.line,
                    what: "file header",
                    parent: "commit",
                })?);
            }
            Record::Hunk(hunk) => {
                let id = current.ok_or(IngestError::OutOfPlace {
                    line: scanner.line,
                    what: "hunk header",
                    parent: "file section",
                })?;
                history.push_hunk(id, hunk);
            }
        }
    }

    tracing::debug!(
        commits = history.hashes().len(),
        diffs = history.diff_count(),
        "parsed git log"
    );
    Ok(history)
}

/// Rewrite a full log into the stripped variant.
pub fn strip_log<R: BufRead, W: Write>(reader: R, mut writer: W) -> Result<(), IngestError> {
    let mut scanner = Scanner::new(reader);
    while let Some(record) = scanner.next_record()? {
        match record {
            Record::Commit(hash) => writeln!(writer, "commit {hash}")?,
            Record::OldPath(path) => writeln!(writer, "--- {path}")?,
            Record::NewPath(path) => writeln!(writer, "+++ {path}")?,
            Record::Hunk(h) => writeln!(
                writer,
                "@@ -{},{} +{},{} @@-",
                h.old_start, h.old_length, h.new_start, h.new_length
            )?,
        }
    }
    writer.flush()?;
    Ok(())
}

/// Open a buffered reader sized for very long log lines.
pub fn log_reader<R: std::io::Read>(inner: R) -> std::io::BufReader<R> {
    std::io::BufReader::with_capacity(READ_BUFFER, inner)
}

fn parse_commit(rest: &[u8]) -> Option<String> {
    let hash = std::str::from_utf8(rest).ok()?.split_whitespace().next()?;
    if hash.len() < HASH_LEN || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash[..HASH_LEN].to_string())
}

/// Parse `@@ -a[,b] +c[,d] @@[-]...`. The flag is true for the stripped form.
fn parse_hunk_header(line: &[u8]) -> Option<(Hunk, bool)> {
    let line = std::str::from_utf8(line).ok()?;
    let rest = line.strip_prefix("@@ -")?;
    let (old, rest) = rest.split_once(' ')?;
    let rest = rest.strip_prefix('+')?;
    let (new, rest) = rest.split_once(' ')?;
    let rest = rest.strip_prefix("@@")?;

    let (old_start, old_length) = parse_range(old)?;
    let (new_start, new_length) = parse_range(new)?;
    // line ends and the payload size must be representable
    old_start.checked_add(old_length)?;
    new_start.checked_add(new_length)?;
    old_length.checked_add(new_length)?;
    Some((
        Hunk::new(old_start, old_length, new_start, new_length),
        rest.starts_with('-'),
    ))
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once(',') {
        Some((start, len)) => Some((parse_number(start)?, parse_number(len)?)),
        None => Some((parse_number(range)?, 1)),
    }
}

fn parse_number(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
