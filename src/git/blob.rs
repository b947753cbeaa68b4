//! File contents at a given commit, read through libgit2.

use std::path::Path;

use anyhow::{Context, Result};
use git2::{Commit, ErrorCode, Repository};

fn find_commit<'r>(repo: &'r Repository, rev: &str) -> Result<Commit<'r>> {
    repo.revparse_single(rev)
        .and_then(|object| object.peel_to_commit())
        .with_context(|| format!("Failed to resolve commit {rev}"))
}

/// Contents of `path` as of `commit`, or `None` when the file does not
/// exist there. Invalid UTF-8 is replaced.
pub fn read_file_at(repo: &Repository, commit: &str, path: &str) -> Result<Option<String>> {
    let tree = find_commit(repo, commit)?.tree()?;
    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let object = entry.to_object(repo)?;
    Ok(object
        .as_blob()
        .map(|blob| String::from_utf8_lossy(blob.content()).into_owned()))
}

/// Full hash of the first parent of `commit`, matching the side git log
/// diffs against.
pub fn parent_commit(repo: &Repository, commit: &str) -> Result<Option<String>> {
    let commit = find_commit(repo, commit)?;
    Ok(commit.parent_ids().next().map(|id| id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Oid, Signature};

    fn commit_file(repo: &Repository, path: &str, content: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(path), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(path)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parents: Vec<Commit> = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parents: Vec<&Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, "update", &tree, &parents)
            .unwrap()
    }

    #[test]
    fn test_read_file_at_each_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let first = commit_file(&repo, "README", "one\ntwo\n");
        let second = commit_file(&repo, "README", "one\n2\n");

        assert_eq!(
            read_file_at(&repo, &first.to_string(), "README").unwrap(),
            Some("one\ntwo\n".to_string())
        );
        // abbreviated hashes resolve too
        assert_eq!(
            read_file_at(&repo, &second.to_string()[..16], "README").unwrap(),
            Some("one\n2\n".to_string())
        );
        assert_eq!(read_file_at(&repo, &first.to_string(), "missing").unwrap(), None);
    }

    #[test]
    fn test_parent_commit() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let first = commit_file(&repo, "a.txt", "a\n");
        let second = commit_file(&repo, "a.txt", "b\n");

        assert_eq!(parent_commit(&repo, &first.to_string()).unwrap(), None);
        assert_eq!(
            parent_commit(&repo, &second.to_string()).unwrap(),
            Some(first.to_string())
        );
        assert!(parent_commit(&repo, "0123456789abcdef").is_err());
    }
}
