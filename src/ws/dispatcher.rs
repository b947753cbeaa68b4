//! Per-websocket query loop.
//!
//! A session owns at most one running backend query. A query that arrives
//! while another is running becomes pending and marks the running one
//! stale; a stale query's results are swallowed and the pending query
//! starts as soon as its terminator arrives.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::{
    registry, should_dispatch, BrowserOp, BrowserQuery, ResultFrame, SearchDone,
};
use crate::backend::{Backends, ClientError, Pool, PoolError, PooledClient, QueryEvent};
use crate::codec::Op;

/// The browser went away.
struct Disconnected;

type Flow = Result<(), Disconnected>;

struct Running {
    query: BrowserQuery,
    pool: Pool,
    /// `None` while waiting for the pool.
    client: Option<PooledClient>,
    started: Instant,
    stale: bool,
}

enum Step {
    Frame(Option<String>),
    CheckedOut(Result<PooledClient, PoolError>),
    Event(Result<QueryEvent, ClientError>),
}

struct Session {
    id: Uuid,
    backends: Arc<Backends>,
    outgoing: mpsc::Sender<BrowserOp>,
    running: Option<Running>,
    pending: Option<BrowserQuery>,
    last: Option<BrowserQuery>,
}

/// Serve one browser session until `incoming` closes or `outgoing` is
/// dropped. Frames on `incoming` are raw websocket text.
pub async fn run_session(
    backends: Arc<Backends>,
    mut incoming: mpsc::Receiver<String>,
    outgoing: mpsc::Sender<BrowserOp>,
) {
    let mut session = Session {
        id: Uuid::new_v4(),
        backends,
        outgoing,
        running: None,
        pending: None,
        last: None,
    };
    tracing::debug!(session = %session.id, "search session opened");

    loop {
        let step = {
            let (acquiring, client) = match session.running.as_mut() {
                Some(running) => match running.client.as_mut() {
                    Some(client) => (None, Some(client)),
                    None => (Some(&running.pool), None),
                },
                None => (None, None),
            };
            tokio::select! {
                frame = incoming.recv() => Step::Frame(frame),
                checked_out = check_out(acquiring) => Step::CheckedOut(checked_out),
                event = next_event(client) => Step::Event(event),
            }
        };

        let flow = match step {
            Step::Frame(None) => break,
            Step::Frame(Some(text)) => session.on_frame(&text).await,
            Step::CheckedOut(result) => session.on_checked_out(result).await,
            Step::Event(event) => session.on_event(event).await,
        };
        if flow.is_err() {
            break;
        }
    }

    session.shutdown();
    tracing::debug!(session = %session.id, "search session closed");
}

async fn check_out(pool: Option<&Pool>) -> Result<PooledClient, PoolError> {
    match pool {
        Some(pool) => pool.check_out().await,
        None => std::future::pending().await,
    }
}

async fn next_event(client: Option<&mut PooledClient>) -> Result<QueryEvent, ClientError> {
    match client {
        Some(client) => client.next_event().await,
        None => std::future::pending().await,
    }
}

async fn emit(outgoing: &mpsc::Sender<BrowserOp>, op: BrowserOp) -> Flow {
    outgoing.send(op).await.map_err(|_| Disconnected)
}

impl Session {
    async fn on_frame(&mut self, text: &str) -> Flow {
        match registry().decode(text) {
            Ok(BrowserOp::Query(query)) => self.on_query(query).await,
            Ok(other) => {
                let message = format!("unexpected opcode: {}", other.opcode());
                emit(&self.outgoing, BrowserOp::error(message)).await
            }
            Err(err) => {
                tracing::debug!(session = %self.id, "bad frame from browser: {err}");
                emit(&self.outgoing, BrowserOp::error(err.to_string())).await
            }
        }
    }

    async fn on_query(&mut self, query: BrowserQuery) -> Flow {
        if let Some(running) = self.running.as_mut() {
            tracing::debug!(
                session = %self.id,
                superseded = running.query.id,
                id = query.id,
                "query superseded"
            );
            running.stale = true;
            self.pending = Some(query);
            return Ok(());
        }
        if !should_dispatch(self.last.as_ref(), &query) {
            tracing::debug!(session = %self.id, id = query.id, "repeated query ignored");
            return Ok(());
        }
        self.start(query).await
    }

    async fn start(&mut self, query: BrowserQuery) -> Flow {
        let pool = match self.backends.resolve(&query.backend) {
            Ok((_, pool)) => pool.clone(),
            Err(err) => {
                let reply = BrowserOp::query_error(query.id, err.to_string());
                return emit(&self.outgoing, reply).await;
            }
        };
        tracing::debug!(
            session = %self.id,
            id = query.id,
            line = %query.query.line,
            "dispatching query"
        );
        self.last = Some(query.clone());
        self.running = Some(Running {
            query,
            pool,
            client: None,
            started: Instant::now(),
            stale: false,
        });
        Ok(())
    }

    async fn start_pending(&mut self) -> Flow {
        match self.pending.take() {
            Some(query) => self.start(query).await,
            None => Ok(()),
        }
    }

    async fn on_checked_out(&mut self, result: Result<PooledClient, PoolError>) -> Flow {
        // check-out is only polled while a query is running
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };

        let mut client = match result {
            Ok(client) => client,
            Err(err) => {
                let id = running.query.id;
                let stale = running.stale;
                self.running = None;
                if !stale {
                    emit(&self.outgoing, BrowserOp::query_error(id, err.to_string())).await?;
                }
                return self.start_pending().await;
            }
        };

        if running.stale {
            running.pool.check_in(client);
            self.running = None;
            return self.start_pending().await;
        }

        match client.query(&running.query.query).await {
            Ok(()) => {
                running.client = Some(client);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    session = %self.id,
                    id = running.query.id,
                    "sending query failed: {err}"
                );
                running.pool.check_in(client);
                self.requeue().await
            }
        }
    }

    async fn on_event(&mut self, event: Result<QueryEvent, ClientError>) -> Flow {
        let (id, stale, started) = match self.running.as_ref() {
            Some(running) => (running.query.id, running.stale, running.started),
            None => return Ok(()),
        };

        match event {
            Ok(QueryEvent::Result(result)) => {
                if stale {
                    return Ok(());
                }
                emit(&self.outgoing, BrowserOp::Result(ResultFrame { id, result })).await
            }
            Ok(QueryEvent::Done(stats)) => {
                let time = started.elapsed().as_millis() as u64;
                self.finish();
                if !stale {
                    let done = BrowserOp::SearchDone(SearchDone { id, time, stats });
                    emit(&self.outgoing, done).await?;
                }
                self.start_pending().await
            }
            Ok(QueryEvent::Failed(message)) => {
                self.finish();
                if !stale {
                    emit(&self.outgoing, BrowserOp::query_error(id, message)).await?;
                }
                self.start_pending().await
            }
            Err(err) => {
                tracing::warn!(session = %self.id, id, "backend failed mid-query: {err}");
                self.requeue().await
            }
        }
    }

    /// Return the running query's client to its pool.
    fn finish(&mut self) {
        if let Some(mut running) = self.running.take() {
            if let Some(client) = running.client.take() {
                running.pool.check_in(client);
            }
        }
    }

    /// Retry the last query after the backend dropped it, unless a newer
    /// query is already waiting.
    async fn requeue(&mut self) -> Flow {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        if let Some(client) = running.client.take() {
            running.pool.check_in(client);
        }
        if self.pending.is_none() {
            self.pending = Some(running.query);
            self.last = None;
        }
        self.start_pending().await
    }

    /// Cancel whatever is in flight.
    fn shutdown(&mut self) {
        if let Some(mut running) = self.running.take() {
            if let Some(mut client) = running.client.take() {
                client.close();
                running.pool.check_in(client);
            }
        }
    }
}
