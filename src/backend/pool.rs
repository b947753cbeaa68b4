//! A fixed number of supervised connections to one backend.
//!
//! A pool of size N owns N tokens. Each token is either waiting in the
//! pending queue for the supervisor to dial a connection, embodied in an
//! idle [`Client`], or held by a caller as a [`PooledClient`]. Dropping a
//! `PooledClient` checks it back in, so a caller cancelled mid-query still
//! returns its token. Broken or busy clients are closed and their token goes
//! back to the pending queue.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{Client, ClientError};
use super::protocol::{BackendInfo, ServerInfo};

pub const MIN_BACKOFF: Duration = Duration::from_millis(10);
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Opens one new connection to the backend.
pub type DialFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Client, ClientError>> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("backend pool is closed")]
    Closed,

    #[error("unknown backend: {0}")]
    UnknownBackend(String),
}

/// Token accounting, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub pending: usize,
    pub checked_out: usize,
}

struct Inner {
    address: String,
    size: usize,
    idle_tx: mpsc::Sender<Client>,
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<Client>>,
    pending_tx: Mutex<Option<mpsc::Sender<()>>>,
    info: RwLock<BackendInfo>,
    closed: CancellationToken,
    idle: AtomicUsize,
    pending: AtomicUsize,
    checked_out: AtomicUsize,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Start a pool that dials `address` over TCP. Must be called from
    /// within a tokio runtime.
    pub fn connect(address: &str, size: usize) -> Self {
        let addr = address.to_string();
        let dial: DialFn = Arc::new(move || {
            let addr = addr.clone();
            async move { Client::connect(&addr).await }.boxed()
        });
        Self::with_dialer(address, size, dial)
    }

    /// Start a pool that opens connections with `dial`.
    pub fn with_dialer(address: &str, size: usize, dial: DialFn) -> Self {
        let size = size.max(1);
        let (idle_tx, idle_rx) = mpsc::channel(size);
        let (pending_tx, pending_rx) = mpsc::channel(size);
        for _ in 0..size {
            // capacity is `size`, so this cannot fail
            let _ = pending_tx.try_send(());
        }

        let inner = Arc::new(Inner {
            address: address.to_string(),
            size,
            idle_tx,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            pending_tx: Mutex::new(Some(pending_tx)),
            info: RwLock::new(BackendInfo::default()),
            closed: CancellationToken::new(),
            idle: AtomicUsize::new(0),
            pending: AtomicUsize::new(size),
            checked_out: AtomicUsize::new(0),
            supervisor: Mutex::new(None),
        });
        let handle = tokio::spawn(supervise(inner.clone(), pending_rx, dial));
        *inner.supervisor.lock() = Some(handle);
        Self { inner }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Snapshot of what the backend last advertised.
    pub fn info(&self) -> BackendInfo {
        self.inner.info.read().clone()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.inner.size,
            idle: self.inner.idle.load(Ordering::SeqCst),
            pending: self.inner.pending.load(Ordering::SeqCst),
            checked_out: self.inner.checked_out.load(Ordering::SeqCst),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Wait for an idle client and take exclusive ownership of it.
    /// Cancel-safe; fails once the pool is closed.
    pub async fn check_out(&self) -> Result<PooledClient, PoolError> {
        let closed = &self.inner.closed;
        let mut idle = tokio::select! {
            _ = closed.cancelled() => return Err(PoolError::Closed),
            guard = self.inner.idle_rx.lock() => guard,
        };
        let client = tokio::select! {
            _ = closed.cancelled() => return Err(PoolError::Closed),
            client = idle.recv() => client.ok_or(PoolError::Closed)?,
        };
        self.inner.checked_out.fetch_add(1, Ordering::SeqCst);
        self.inner.idle.fetch_sub(1, Ordering::SeqCst);
        Ok(PooledClient {
            inner: self.inner.clone(),
            client: Some(client),
        })
    }

    /// Hand a client back. Same as dropping it; never blocks.
    pub fn check_in(&self, client: PooledClient) {
        drop(client);
    }

    /// Stop reconnecting, fail pending check-outs and close idle clients.
    pub async fn close(&self) {
        self.inner.closed.cancel();
        self.inner.pending_tx.lock().take();
        let supervisor = self.inner.supervisor.lock().take();
        if let Some(handle) = supervisor {
            let _ = handle.await;
        }

        let mut idle = self.inner.idle_rx.lock().await;
        idle.close();
        while let Ok(mut client) = idle.try_recv() {
            self.inner.idle.fetch_sub(1, Ordering::SeqCst);
            client.close();
        }
        tracing::info!(backend = %self.inner.address, "backend pool closed");
    }
}

impl Inner {
    /// Broken or busy clients are closed and their token goes back to the
    /// supervisor.
    fn release(&self, mut client: Client) {
        self.checked_out.fetch_sub(1, Ordering::SeqCst);
        if !client.is_idle() || self.closed.is_cancelled() {
            if let Some(reason) = client.error() {
                tracing::debug!(backend = %self.address, "dropping broken client: {reason}");
            }
            client.close();
            self.return_token();
            return;
        }

        self.idle.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.idle_tx.try_send(client) {
            self.idle.fetch_sub(1, Ordering::SeqCst);
            let mut client = match err {
                mpsc::error::TrySendError::Full(c) | mpsc::error::TrySendError::Closed(c) => c,
            };
            client.close();
            self.return_token();
        }
    }

    fn return_token(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.pending_tx.lock().as_ref() {
            let _ = tx.try_send(());
        }
    }

    fn record_info(&self, info: &ServerInfo) {
        let fresh = BackendInfo::from(info);
        let mut current = self.info.write();
        if *current != fresh {
            tracing::info!(
                backend = %self.address,
                name = %fresh.name,
                trees = fresh.trees.len(),
                "backend info updated"
            );
            *current = fresh;
        }
    }
}

/// A client checked out of a [`Pool`]. Goes back to the pool on drop.
pub struct PooledClient {
    inner: Arc<Inner>,
    // only `None` inside `drop`
    client: Option<Client>,
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("pooled client already released")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("pooled client already released")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.inner.release(client);
        }
    }
}

/// Double `delay`, capped at [`MAX_BACKOFF`].
pub fn next_backoff(delay: Duration) -> Duration {
    (delay * 2).min(MAX_BACKOFF)
}

/// Turn pending tokens into idle clients until the pool closes.
async fn supervise(inner: Arc<Inner>, mut pending: mpsc::Receiver<()>, dial: DialFn) {
    let mut delay = MIN_BACKOFF;
    loop {
        let token = tokio::select! {
            _ = inner.closed.cancelled() => break,
            token = pending.recv() => token,
        };
        if token.is_none() {
            break;
        }

        let client = loop {
            let attempt = tokio::select! {
                _ = inner.closed.cancelled() => return,
                attempt = dial() => attempt,
            };
            match attempt {
                Ok(client) => break client,
                Err(err) => {
                    tracing::warn!(
                        backend = %inner.address,
                        retry_in_ms = delay.as_millis() as u64,
                        "connecting to backend failed: {err}"
                    );
                    tokio::select! {
                        _ = inner.closed.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = next_backoff(delay);
                }
            }
        };

        delay = MIN_BACKOFF;
        inner.record_info(client.info());
        tracing::debug!(backend = %inner.address, "backend connection established");

        inner.pending.fetch_sub(1, Ordering::SeqCst);
        inner.idle.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = inner.idle_tx.try_send(client) {
            inner.idle.fetch_sub(1, Ordering::SeqCst);
            inner.pending.fetch_add(1, Ordering::SeqCst);
            let mut client = match err {
                mpsc::error::TrySendError::Full(c) | mpsc::error::TrySendError::Closed(c) => c,
            };
            client.close();
        }
    }
    tracing::debug!(backend = %inner.address, "backend supervisor exiting");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::client::tests::{connected_pair, FakeBackend};
    use crate::backend::client::QueryEvent;
    use crate::backend::protocol::{BackendOp, Stats};
    use crate::query::Query;
    use std::sync::atomic::AtomicBool;

    /// A dialer handing out in-memory connections; the backend ends are
    /// delivered on the returned channel.
    pub(crate) fn fake_dialer(name: &'static str) -> (DialFn, mpsc::UnboundedReceiver<FakeBackend>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dial: DialFn = Arc::new(move || {
            let tx = tx.clone();
            async move {
                let (client, backend) = connected_pair(name).await;
                let _ = tx.send(backend);
                Ok(client)
            }
            .boxed()
        });
        (dial, rx)
    }

    fn assert_conserved(pool: &Pool) {
        let stats = pool.stats();
        assert_eq!(stats.idle + stats.pending + stats.checked_out, stats.size);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(next_backoff(MIN_BACKOFF), Duration::from_millis(20));
        assert_eq!(next_backoff(Duration::from_secs(8)), MAX_BACKOFF);
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_check_out_and_in() {
        let (dial, _backends) = fake_dialer("one");
        let pool = Pool::with_dialer("fake:1", 2, dial);

        let a = pool.check_out().await.unwrap();
        let b = pool.check_out().await.unwrap();
        assert_eq!(pool.stats().checked_out, 2);
        assert_conserved(&pool);
        assert_eq!(pool.info().name, "one");
        assert_eq!(pool.info().trees[0].github, "org/repo");

        pool.check_in(a);
        pool.check_in(b);
        assert_eq!(pool.stats().idle, 2);
        assert_conserved(&pool);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_broken_client_is_replaced() {
        let (dial, mut backends) = fake_dialer("one");
        let pool = Pool::with_dialer("fake:1", 1, dial);

        let mut client = pool.check_out().await.unwrap();
        let first_backend = backends.recv().await.unwrap();
        client
            .query(&Query {
                line: "x".to_string(),
                ..Query::default()
            })
            .await
            .unwrap();
        drop(first_backend);
        assert!(client.next_event().await.is_err());

        pool.check_in(client);
        assert_eq!(pool.stats().checked_out, 0);
        assert_conserved(&pool);

        // the supervisor dials a replacement
        let mut replacement = pool.check_out().await.unwrap();
        assert!(replacement.is_idle());
        let mut second_backend = backends.recv().await.unwrap();
        let q = Query::default();
        replacement.query(&q).await.unwrap();
        second_backend.expect_query().await;
        second_backend.send(BackendOp::Stats(Stats::default())).await;
        assert!(matches!(
            replacement.next_event().await.unwrap(),
            QueryEvent::Done(_)
        ));
        pool.check_in(replacement);
        assert_eq!(pool.stats().idle, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_dial_failures_back_off_then_succeed() {
        let (good, _backends) = fake_dialer("late");
        let failed_once = Arc::new(AtomicBool::new(false));
        let flag = failed_once.clone();
        let dial: DialFn = Arc::new(move || {
            if flag.swap(true, Ordering::SeqCst) {
                good()
            } else {
                async {
                    Err(ClientError::Connect {
                        addr: "fake:1".to_string(),
                        source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                    })
                }
                .boxed()
            }
        });
        let pool = Pool::with_dialer("fake:1", 1, dial);
        let client = pool.check_out().await.unwrap();
        assert!(failed_once.load(Ordering::SeqCst));
        pool.check_in(client);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_close_fails_waiting_check_outs() {
        let dial: DialFn =
            Arc::new(|| std::future::pending::<Result<Client, ClientError>>().boxed());
        let pool = Pool::with_dialer("fake:1", 1, dial);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.check_out().await.err() })
        };
        tokio::task::yield_now().await;
        pool.close().await;
        assert_eq!(waiter.await.unwrap(), Some(PoolError::Closed));
        assert!(matches!(pool.check_out().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_dropping_client_mid_query_returns_token() {
        let (dial, mut backends) = fake_dialer("one");
        let pool = Pool::with_dialer("fake:1", 1, dial);

        let search = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut client = pool.check_out().await.unwrap();
                client.search(&Query::default()).await
            })
        };
        let mut silent = backends.recv().await.unwrap();
        silent.expect_query().await;
        search.abort();
        assert!(search.await.unwrap_err().is_cancelled());

        assert_eq!(pool.stats().checked_out, 0);
        assert_conserved(&pool);

        // the busy client was closed and a fresh one dialed in its place
        let client = tokio::time::timeout(Duration::from_secs(5), pool.check_out())
            .await
            .unwrap()
            .unwrap();
        assert!(client.is_idle());
        drop(client);
        assert_eq!(pool.stats().idle, 1);
        assert_conserved(&pool);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_check_in_after_close_closes_client() {
        let (dial, _backends) = fake_dialer("one");
        let pool = Pool::with_dialer("fake:1", 1, dial);
        let client = pool.check_out().await.unwrap();
        pool.close().await;
        pool.check_in(client);
        assert_eq!(pool.stats().idle, 0);
        assert_conserved(&pool);
    }
}
