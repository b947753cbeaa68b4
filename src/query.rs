//! Search expression parsing.
//!
//! A query is a run of whitespace-separated words. Words of the form
//! `key:value` with a known key set a field; everything else is part of the
//! free-text regex. A value may contain a parenthesised or bracketed group,
//! which is taken whole, spaces included.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const KEYS: &[&str] = &[
    "file",
    "-file",
    "repo",
    "-repo",
    "tags",
    "-tags",
    "case",
    "lit",
    "max_matches",
];

/// A parsed query, as sent to a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_file: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_repo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tags: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_tags: String,
    #[serde(default)]
    pub fold_case: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_matches: Option<u32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("got {0}: twice")]
    Duplicate(String),

    #[error("you cannot provide multiple of case:, lit:, and a bare regex")]
    MultipleRegex,

    #[error("value given to max_matches: must be a valid integer, got {0:?}")]
    InvalidMaxMatches(String),
}

/// Parse a search expression such as `foo file:\.rs$ -repo:(vendor|third_party)`.
pub fn parse_query(input: &str) -> Result<Query, ParseError> {
    let text = input.trim();
    let mut ops: HashMap<&'static str, String> = HashMap::new();
    let mut bare = String::new();
    let mut pos = 0;

    while let Some(c) = text[pos..].chars().next() {
        if c.is_whitespace() {
            bare.push(c);
            pos += c.len_utf8();
            continue;
        }

        match operator_at(&text[pos..]) {
            Some(key) => {
                pos += key.len() + 1;
                let value = read_word(text, &mut pos);
                // the space ending an operator is not part of the regex
                if let Some(space) = text[pos..].chars().next() {
                    pos += space.len_utf8();
                }
                if ops.insert(key, value.to_string()).is_some() {
                    return Err(ParseError::Duplicate(key.to_string()));
                }
            }
            None => bare.push_str(read_word(text, &mut pos)),
        }
    }

    if ops.contains_key("case") && ops.contains_key("lit") {
        return Err(ParseError::MultipleRegex);
    }

    let mut bits = Vec::new();
    for bit in [
        Some(bare.trim().to_string()),
        ops.get("case").map(|v| v.trim().to_string()),
        ops.get("lit").map(|v| regex::escape(v.trim())),
    ]
    .into_iter()
    .flatten()
    {
        if !bit.is_empty() {
            bits.push(bit);
        }
    }
    if bits.len() > 1 {
        return Err(ParseError::MultipleRegex);
    }

    let line = bits.pop().unwrap_or_default();
    let fold_case = if ops.contains_key("case") || ops.contains_key("lit") {
        false
    } else {
        !line.chars().any(|c| c.is_ascii_uppercase())
    };

    let max_matches = match ops.get("max_matches").map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Some(
            v.parse::<u32>()
                .map_err(|_| ParseError::InvalidMaxMatches(v.to_string()))?,
        ),
        _ => None,
    };

    let mut take = |key: &str| ops.remove(key).unwrap_or_default();
    Ok(Query {
        file: take("file"),
        not_file: take("-file"),
        repo: take("repo"),
        not_repo: take("-repo"),
        tags: take("tags"),
        not_tags: take("-tags"),
        line,
        fold_case,
        max_matches,
    })
}

/// The known key of a `key:` prefix at the start of `rest`.
fn operator_at(rest: &str) -> Option<&'static str> {
    let (key, _) = rest.split_once(':')?;
    if key.is_empty()
        || !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return None;
    }
    KEYS.iter().copied().find(|k| *k == key)
}

/// Consume one word starting at `pos`: up to the next unescaped whitespace
/// outside of any group.
fn read_word<'a>(text: &'a str, pos: &mut usize) -> &'a str {
    let start = *pos;
    while let Some(c) = text[*pos..].chars().next() {
        match c {
            c if c.is_whitespace() => break,
            '\\' => *pos = skip_escape(text, *pos),
            '(' => *pos = skip_group(text, *pos),
            '[' => *pos = skip_class(text, *pos),
            _ => *pos += c.len_utf8(),
        }
    }
    &text[start..*pos]
}

/// Position after a backslash and the character it escapes.
fn skip_escape(text: &str, pos: usize) -> usize {
    let next = pos + 1;
    next + text[next..].chars().next().map_or(0, char::len_utf8)
}

/// Position after the parenthesis matching the one at `pos`, or the end of
/// the text if it is unbalanced.
fn skip_group(text: &str, mut pos: usize) -> usize {
    let mut depth = 0usize;
    while let Some(c) = text[pos..].chars().next() {
        match c {
            '\\' => {
                pos = skip_escape(text, pos);
                continue;
            }
            '[' => {
                pos = skip_class(text, pos);
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return pos + 1;
                }
            }
            _ => {}
        }
        pos += c.len_utf8();
    }
    pos
}

/// Position after the `]` closing the character class at `pos`.
fn skip_class(text: &str, pos: usize) -> usize {
    let mut i = pos + 1;
    if text[i..].starts_with('^') {
        i += 1;
    }
    // a leading `]` is a literal member of the class
    if text[i..].starts_with(']') {
        i += 1;
    }
    while let Some(c) = text[i..].chars().next() {
        match c {
            '\\' => i = skip_escape(text, i),
            ']' => return i + 1,
            _ => i += c.len_utf8(),
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_with_spaced_group() {
        let q = parse_query("case:abc file:( )").unwrap();
        assert_eq!(q.line, "abc");
        assert_eq!(q.file, "( )");
        assert!(!q.fold_case);
    }

    #[test]
    fn test_nested_groups_and_split_bare_text() {
        let q = parse_query("a file:((abc()())()) c").unwrap();
        assert_eq!(q.line, "a c");
        assert_eq!(q.file, "((abc()())())");
        assert!(q.fold_case);
    }

    #[test]
    fn test_lit_is_escaped() {
        let q = parse_query("lit:.").unwrap();
        assert_eq!(q.line, "\\.");
        assert!(!q.fold_case);
    }

    #[test]
    fn test_negated_file() {
        let q = parse_query("-file:Godep re").unwrap();
        assert_eq!(q.line, "re");
        assert_eq!(q.not_file, "Godep");
        assert!(q.fold_case);
    }

    #[test]
    fn test_case_and_bare_regex_conflict() {
        assert_eq!(parse_query("case:a b"), Err(ParseError::MultipleRegex));
        assert_eq!(parse_query("case:a lit:b"), Err(ParseError::MultipleRegex));
    }

    #[test]
    fn test_uppercase_disables_fold_case() {
        assert!(!parse_query("HashMap").unwrap().fold_case);
        assert!(parse_query("hashmap").unwrap().fold_case);
    }

    #[test]
    fn test_bare_spaces_preserved() {
        let q = parse_query("  fn  main  ").unwrap();
        assert_eq!(q.line, "fn  main");
    }

    #[test]
    fn test_unknown_key_is_bare_text() {
        let q = parse_query("http://example").unwrap();
        assert_eq!(q.line, "http://example");
        assert_eq!(parse_query("std::vec").unwrap().line, "std::vec");
    }

    #[test]
    fn test_max_matches() {
        assert_eq!(parse_query("x max_matches:50").unwrap().max_matches, Some(50));
        assert_eq!(parse_query("x max_matches:").unwrap().max_matches, None);
        assert_eq!(
            parse_query("x max_matches:lots"),
            Err(ParseError::InvalidMaxMatches("lots".to_string()))
        );
    }

    #[test]
    fn test_duplicate_key() {
        assert_eq!(
            parse_query("file:a file:b"),
            Err(ParseError::Duplicate("file".to_string()))
        );
    }

    #[test]
    fn test_repo_tags_and_classes() {
        let q = parse_query("[a ]b repo:linux -repo:(old|new) tags:fn -tags:var").unwrap();
        assert_eq!(q.line, "[a ]b");
        assert_eq!(q.repo, "linux");
        assert_eq!(q.not_repo, "(old|new)");
        assert_eq!(q.tags, "fn");
        assert_eq!(q.not_tags, "var");
    }

    #[test]
    fn test_escaped_paren_does_not_open_group() {
        let q = parse_query(r"foo\( bar").unwrap();
        assert_eq!(q.line, r"foo\( bar");
    }
}
