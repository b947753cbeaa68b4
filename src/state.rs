use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use crate::backend::{Backends, Pool};
use crate::config::{Config, RepoConfig};
use crate::history::GitHistory;

/// A repository whose history has been loaded for blame.
pub struct BlameRepo {
    pub config: RepoConfig,
    pub history: GitHistory,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub backends: Arc<Backends>,
    pub repos: Arc<HashMap<String, Arc<BlameRepo>>>,
}

impl AppState {
    /// Start a pool per backend and load every repository's history.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let mut backends = Backends::new();
        for backend in &config.backends {
            tracing::info!(
                "Backend {} at {} ({} connections)",
                backend.id,
                backend.addr,
                backend.pool_size
            );
            backends.insert(backend.id.clone(), Pool::connect(&backend.addr, backend.pool_size));
        }

        let mut repos = HashMap::new();
        for repo in &config.repos {
            let repo_config = repo.clone();
            let history = tokio::task::spawn_blocking(move || crate::git::load_history(&repo_config))
                .await?
                .with_context(|| format!("Failed to load history of {}", repo.name))?;
            repos.insert(
                repo.name.clone(),
                BlameRepo {
                    config: repo.clone(),
                    history,
                },
            );
        }

        Ok(Self::from_parts(config, backends, repos))
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(
        config: Config,
        backends: Backends,
        repos: HashMap<String, BlameRepo>,
    ) -> Self {
        Self {
            config,
            backends: Arc::new(backends),
            repos: Arc::new(
                repos
                    .into_iter()
                    .map(|(name, repo)| (name, Arc::new(repo)))
                    .collect(),
            ),
        }
    }

    pub fn repo(&self, name: &str) -> Option<Arc<BlameRepo>> {
        self.repos.get(name).cloned()
    }
}
