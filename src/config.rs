use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// Search backends, in the order they are offered to browsers
    pub backends: Vec<BackendConfig>,
    /// Repositories served by the blame viewer
    pub repos: Vec<RepoConfig>,
    /// Connections per backend when an entry does not say
    pub pool_size: usize,
    /// Upper bound on one HTTP search, in seconds
    pub query_timeout_secs: u64,
}

/// One search backend daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    /// `host:port` of the backend
    pub addr: String,
    /// 0 means the global default
    #[serde(default)]
    pub pool_size: usize,
}

/// A git repository whose history is loaded for blame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Cached stripped log; built from `git log` when missing
    #[serde(default)]
    pub stripped_log: Option<PathBuf>,
}

fn default_revision() -> String {
    "HEAD".to_string()
}

/// Layout of the file named by `CODESEARCH_CONFIG`.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    backends: Vec<BackendConfig>,
    #[serde(default)]
    repos: Vec<RepoConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8910".to_string(),
            backends: Vec::new(),
            repos: Vec::new(),
            pool_size: 4,
            query_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from `lookup`, which plays the role of the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("CODESEARCH_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(val) = lookup("CODESEARCH_POOL_SIZE") {
            config.pool_size = val
                .parse()
                .with_context(|| format!("CODESEARCH_POOL_SIZE must be a number, got {val:?}"))?;
        }
        if let Some(val) = lookup("CODESEARCH_QUERY_TIMEOUT_SECS") {
            config.query_timeout_secs = val.parse().with_context(|| {
                format!("CODESEARCH_QUERY_TIMEOUT_SECS must be a number, got {val:?}")
            })?;
        }

        if let Some(path) = lookup("CODESEARCH_CONFIG") {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            let file: FileConfig = serde_json::from_str(&data)
                .with_context(|| format!("parsing config file {path}"))?;
            config.backends = file.backends;
            config.repos = file.repos;
        }
        if let Some(list) = lookup("CODESEARCH_BACKENDS") {
            config.backends.extend(parse_backend_list(&list)?);
        }

        if config.pool_size == 0 {
            bail!("CODESEARCH_POOL_SIZE must be at least 1");
        }
        for backend in &mut config.backends {
            if backend.pool_size == 0 {
                backend.pool_size = config.pool_size;
            }
        }
        config.check_unique()?;
        Ok(config)
    }

    pub fn query_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.query_timeout_secs)
    }

    fn check_unique(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.id.as_str()) {
                bail!("backend {:?} is configured twice", backend.id);
            }
        }
        seen.clear();
        for repo in &self.repos {
            if !seen.insert(repo.name.as_str()) {
                bail!("repository {:?} is configured twice", repo.name);
            }
        }
        Ok(())
    }
}

/// Parse the `id=host:port,...` shorthand. An entry without `id=` uses its
/// address as the id.
pub fn parse_backend_list(list: &str) -> anyhow::Result<Vec<BackendConfig>> {
    let mut backends = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, addr) = match entry.split_once('=') {
            Some((id, addr)) => (id.trim(), addr.trim()),
            None => (entry, entry),
        };
        if id.is_empty() || addr.is_empty() {
            bail!("malformed backend entry {entry:?}, expected id=host:port");
        }
        backends.push(BackendConfig {
            id: id.to_string(),
            addr: addr.to_string(),
            pool_size: 0,
        });
    }
    Ok(backends)
}
