//! Connections to the search backends.

pub mod client;
pub mod pool;
pub mod protocol;

pub use client::{Client, ClientError, QueryEvent, SearchOutcome};
pub use pool::{Pool, PoolError, PoolStats, PooledClient};
pub use protocol::{BackendInfo, SearchResult, ServerInfo, Stats, Tree};

/// Every configured backend pool, keyed by id, in configuration order.
#[derive(Clone, Default)]
pub struct Backends {
    pools: Vec<(String, Pool)>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pool under `id`. Returns the pool it replaced, which the
    /// caller should close.
    pub fn insert(&mut self, id: impl Into<String>, pool: Pool) -> Option<Pool> {
        let id = id.into();
        match self.pools.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, slot)) => Some(std::mem::replace(slot, pool)),
            None => {
                self.pools.push((id, pool));
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Pool> {
        self.pools
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, pool)| pool)
    }

    /// Resolve `id`, falling back to the first backend when it is empty.
    pub fn resolve(&self, id: &str) -> Result<(&str, &Pool), PoolError> {
        let found = if id.is_empty() {
            self.pools.first()
        } else {
            self.pools.iter().find(|(existing, _)| existing == id)
        };
        found
            .map(|(id, pool)| (id.as_str(), pool))
            .ok_or_else(|| PoolError::UnknownBackend(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pool)> {
        self.pools.iter().map(|(id, pool)| (id.as_str(), pool))
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub async fn close_all(&self) {
        for (_, pool) in &self.pools {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::Arc;

    fn idle_pool(address: &str) -> Pool {
        let dial: pool::DialFn =
            Arc::new(|| std::future::pending::<Result<Client, ClientError>>().boxed());
        Pool::with_dialer(address, 1, dial)
    }

    #[tokio::test]
    async fn test_resolve_defaults_to_first() {
        let mut backends = Backends::new();
        backends.insert("linux", idle_pool("a:1"));
        backends.insert("go", idle_pool("b:1"));

        let (id, pool) = backends.resolve("").unwrap();
        assert_eq!(id, "linux");
        assert_eq!(pool.address(), "a:1");
        assert_eq!(backends.resolve("go").unwrap().1.address(), "b:1");
        assert_eq!(
            backends.resolve("nope").err(),
            Some(PoolError::UnknownBackend("nope".to_string()))
        );
        backends.close_all().await;
    }

    #[tokio::test]
    async fn test_insert_replaces_same_id() {
        let mut backends = Backends::new();
        assert!(backends.insert("linux", idle_pool("a:1")).is_none());
        let old = backends.insert("linux", idle_pool("c:1")).unwrap();
        assert_eq!(old.address(), "a:1");
        old.close().await;
        assert_eq!(backends.len(), 1);
        assert_eq!(backends.get("linux").unwrap().address(), "c:1");
        backends.close_all().await;
    }

    #[test]
    fn test_empty_has_no_default() {
        assert!(matches!(
            Backends::new().resolve(""),
            Err(PoolError::UnknownBackend(_))
        ));
    }
}
