//! Running `git log` and loading its output into a [`GitHistory`].

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{ChildStdout, Command, Stdio};

use anyhow::{bail, Context, Result};

use crate::config::RepoConfig;
use crate::history::ingest::{log_reader, GIT_LOG_ARGS};
use crate::history::{parse_log, strip_log, GitHistory, IngestError};

/// Run `git log` for `revision` in `repo` and hand its output to `consume`.
/// Fails if either the consumer or git does.
pub fn with_log<T>(
    repo: &Path,
    revision: &str,
    consume: impl FnOnce(BufReader<ChildStdout>) -> Result<T, IngestError>,
) -> Result<T> {
    tracing::info!("Reading git log of {} at {}", repo.display(), revision);
    let mut child = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(GIT_LOG_ARGS)
        .arg(revision)
        .arg("--")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .context("Failed to run git")?;
    let stdout = child
        .stdout
        .take()
        .context("git log stdout was not captured")?;

    let consumed = consume(log_reader(stdout));
    if consumed.is_err() {
        let _ = child.kill();
    }
    let status = child.wait().context("Failed to wait for git log")?;
    let value = consumed.with_context(|| format!("Failed to read git log of {}", repo.display()))?;
    if !status.success() {
        bail!("git log in {} exited with {status}", repo.display());
    }
    Ok(value)
}

/// Write the stripped log of `revision` in `repo` to `out`.
pub fn write_stripped_log(repo: &Path, revision: &str, out: impl Write) -> Result<()> {
    with_log(repo, revision, |reader| strip_log(reader, out))
}

/// Load the history a repository entry describes, building its stripped
/// log cache first when the entry names one that does not exist yet.
pub fn load_history(repo: &RepoConfig) -> Result<GitHistory> {
    let Some(cache) = &repo.stripped_log else {
        return with_log(&repo.path, &repo.revision, parse_log);
    };

    if !cache.exists() {
        build_cache(repo, cache)?;
    }
    let file = File::open(cache).with_context(|| format!("Failed to open {}", cache.display()))?;
    let history = parse_log(log_reader(file))
        .with_context(|| format!("Failed to parse stripped log {}", cache.display()))?;
    tracing::info!(
        "Loaded {}: {} commits, {} diffs",
        repo.name,
        history.hashes().len(),
        history.diff_count()
    );
    Ok(history)
}

/// Write the stripped log next to `cache` and move it into place.
fn build_cache(repo: &RepoConfig, cache: &Path) -> Result<()> {
    tracing::info!("Building stripped log cache {}", cache.display());
    let tmp_path = cache.with_extension("tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    if let Err(err) = write_stripped_log(&repo.path, &repo.revision, BufWriter::new(file)) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    std::fs::rename(&tmp_path, cache)
        .with_context(|| format!("Failed to move cache into {}", cache.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const STRIPPED: &str = "\
commit 1111111111111111111111111111111111111111
--- /dev/null
+++ README
@@ -0,0 +1,2 @@-
commit 2222222222222222222222222222222222222222
--- README
+++ README
@@ -2,1 +2,1 @@-
";

    #[test]
    fn test_load_existing_cache_skips_git() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("repo.log");
        std::fs::write(&cache, STRIPPED).unwrap();

        let history = load_history(&RepoConfig {
            name: "repo".to_string(),
            path: PathBuf::from("/nonexistent"),
            revision: "HEAD".to_string(),
            stripped_log: Some(cache),
        })
        .unwrap();
        assert_eq!(history.hashes().len(), 2);
        assert_eq!(history.file_diffs("README").map(<[_]>::len), Some(2));
    }

    #[test]
    fn test_git_failure_leaves_no_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("repo.log");
        let result = load_history(&RepoConfig {
            name: "repo".to_string(),
            path: dir.path().join("not-a-repo"),
            revision: "HEAD".to_string(),
            stripped_log: Some(cache.clone()),
        });
        assert!(result.is_err());
        assert!(!cache.exists());
        assert!(!cache.with_extension("tmp").exists());
    }
}
