//! One persistent connection to a backend daemon.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::{registry, BackendOp, SearchResult, ServerInfo, Stats};
use crate::codec::{self, CodecError, Op};
use crate::query::Query;

/// How long a freshly connected backend has to send its `info` message.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Decoded messages buffered between the socket reader and the caller.
const OP_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connecting to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("backend did not complete the handshake in time")]
    HandshakeTimeout,

    #[error("backend protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("backend closed the connection")]
    Disconnected,

    #[error("unexpected {0} message from backend")]
    Unexpected(&'static str),

    #[error("a query is already in flight on this connection")]
    Busy,

    #[error("no query in flight on this connection")]
    Idle,

    #[error("connection is closed: {0}")]
    Closed(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// One step of a query's result stream.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    Result(SearchResult),
    /// The query finished; no more events follow.
    Done(Stats),
    /// The backend rejected the query; no more events follow.
    Failed(String),
}

/// Everything a finished query produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub stats: Stats,
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type OpReceiver = mpsc::Receiver<Result<BackendOp, CodecError>>;

/// A connection that runs at most one query at a time.
///
/// Once [`Client::error`] returns `Some`, the connection is dead and should
/// be handed back to its pool, which will replace it.
pub struct Client {
    info: ServerInfo,
    writer: Option<Writer>,
    ops: OpReceiver,
    reader: JoinHandle<()>,
    in_flight: bool,
    failure: Option<String>,
}

impl Client {
    /// Dial `addr` over TCP and complete the handshake.
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(backend = %addr, "could not set TCP_NODELAY: {err}");
        }
        Self::handshake(stream).await
    }

    /// Wrap an established transport, reading the backend's `info` message.
    pub async fn handshake<S>(stream: S) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, registry().read(&mut reader))
            .await
            .map_err(|_| ClientError::HandshakeTimeout)??;
        let info = match first {
            Some(BackendOp::Info(info)) => info,
            Some(other) => return Err(ClientError::Unexpected(other.opcode())),
            None => return Err(ClientError::Disconnected),
        };

        let (tx, ops) = mpsc::channel(OP_BUFFER);
        let reader = tokio::spawn(read_ops(reader, tx));
        Ok(Self {
            info,
            writer: Some(Box::new(write_half)),
            ops,
            reader,
            in_flight: false,
            failure: None,
        })
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Why the connection died, if it has.
    pub fn error(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// True when the connection is healthy and no query is running.
    pub fn is_idle(&self) -> bool {
        self.failure.is_none() && !self.in_flight
    }

    /// Send `query`; its results are then read with [`Client::next_event`].
    pub async fn query(&mut self, query: &Query) -> Result<(), ClientError> {
        self.ensure_open()?;
        if self.in_flight {
            return Err(ClientError::Busy);
        }
        let sent = match self.writer.as_mut() {
            Some(writer) => codec::write(writer, query).await.map_err(ClientError::from),
            None => Err(ClientError::Closed("writer gone".to_string())),
        };
        if let Err(err) = sent {
            return Err(self.fail(err));
        }
        self.in_flight = true;
        Ok(())
    }

    /// Next result or terminator of the running query. Cancel-safe.
    pub async fn next_event(&mut self) -> Result<QueryEvent, ClientError> {
        self.ensure_open()?;
        if !self.in_flight {
            return Err(ClientError::Idle);
        }
        let op = match self.ops.recv().await {
            Some(Ok(op)) => op,
            Some(Err(err)) => return Err(self.fail(err.into())),
            None => return Err(self.fail(ClientError::Disconnected)),
        };
        match op {
            BackendOp::Result(result) => Ok(QueryEvent::Result(result)),
            BackendOp::Stats(stats) => {
                self.in_flight = false;
                Ok(QueryEvent::Done(stats))
            }
            BackendOp::Error(message) => {
                self.in_flight = false;
                Ok(QueryEvent::Failed(message))
            }
            other => Err(self.fail(ClientError::Unexpected(other.opcode()))),
        }
    }

    /// Run `query` to completion, collecting every result.
    ///
    /// A rejected query is reported as [`ClientError::Query`] and leaves
    /// the connection usable.
    pub async fn search(&mut self, query: &Query) -> Result<SearchOutcome, ClientError> {
        self.query(query).await?;
        let mut results = Vec::new();
        loop {
            match self.next_event().await? {
                QueryEvent::Result(result) => results.push(result),
                QueryEvent::Done(stats) => return Ok(SearchOutcome { results, stats }),
                QueryEvent::Failed(message) => return Err(ClientError::Query(message)),
            }
        }
    }

    /// Tear down the connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.reader.abort();
        self.writer = None;
        self.ops.close();
        if self.failure.is_none() {
            self.failure = Some("closed".to_string());
        }
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        match &self.failure {
            Some(reason) => Err(ClientError::Closed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Record a fatal error and close the connection.
    fn fail(&mut self, err: ClientError) -> ClientError {
        tracing::warn!(backend = %self.info.name, "backend connection failed: {err}");
        self.failure = Some(err.to_string());
        self.in_flight = false;
        self.close();
        err
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Decode messages off the socket until it closes or a message is bad.
async fn read_ops<R>(mut reader: BufReader<R>, tx: mpsc::Sender<Result<BackendOp, CodecError>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match registry().read(&mut reader).await {
            Ok(Some(op)) => {
                if tx.send(Ok(op)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::protocol::RepoInfo;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, DuplexStream};

    /// Backend side of an in-memory connection.
    pub(crate) struct FakeBackend {
        reader: BufReader<tokio::io::ReadHalf<DuplexStream>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
    }

    impl FakeBackend {
        pub(crate) async fn send(&mut self, op: BackendOp) {
            codec::write(&mut self.writer, &op).await.unwrap();
        }

        pub(crate) async fn expect_query(&mut self) -> Query {
            match registry().read(&mut self.reader).await.unwrap() {
                Some(BackendOp::Query(query)) => query,
                other => panic!("expected query, got {other:?}"),
            }
        }

        pub(crate) async fn send_raw(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        /// True once the client side has hung up.
        pub(crate) async fn closed(&mut self) -> bool {
            let mut line = String::new();
            matches!(self.reader.read_line(&mut line).await, Ok(0) | Err(_))
        }
    }

    pub(crate) fn server_info(name: &str) -> ServerInfo {
        ServerInfo {
            name: name.to_string(),
            repos: vec![RepoInfo {
                name: "repo".to_string(),
                metadata: [("github".to_string(), "org/repo".to_string())].into(),
            }],
            has_tags: false,
            index_time: 0,
        }
    }

    /// A connected client/backend pair that has completed the handshake.
    pub(crate) async fn connected_pair(name: &str) -> (Client, FakeBackend) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(far);
        let mut backend = FakeBackend {
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        backend.send(BackendOp::Info(server_info(name))).await;
        let client = Client::handshake(near).await.unwrap();
        (client, backend)
    }

    fn result(line: &str) -> SearchResult {
        SearchResult {
            line: line.to_string(),
            ..SearchResult::default()
        }
    }

    fn query(line: &str) -> Query {
        Query {
            line: line.to_string(),
            ..Query::default()
        }
    }

    #[tokio::test]
    async fn test_handshake_exposes_info() {
        let (client, _backend) = connected_pair("linux").await;
        assert_eq!(client.info().name, "linux");
        assert!(client.is_idle());
    }

    #[tokio::test]
    async fn test_handshake_rejects_other_opcodes() {
        let (near, mut far) = tokio::io::duplex(1024);
        far.write_all(b"{\"opcode\":\"stats\",\"body\":{}}\n").await.unwrap();
        let err = Client::handshake(near).await.err().unwrap();
        assert!(matches!(err, ClientError::Unexpected("stats")));
    }

    #[tokio::test]
    async fn test_query_streams_until_stats() {
        let (mut client, mut backend) = connected_pair("b").await;
        client.query(&query("foo")).await.unwrap();
        assert_eq!(backend.expect_query().await.line, "foo");

        backend.send(BackendOp::Result(result("one"))).await;
        backend.send(BackendOp::Result(result("two"))).await;
        backend.send(BackendOp::Stats(Stats::default())).await;

        assert_eq!(
            client.next_event().await.unwrap(),
            QueryEvent::Result(result("one"))
        );
        assert_eq!(
            client.next_event().await.unwrap(),
            QueryEvent::Result(result("two"))
        );
        assert!(matches!(
            client.next_event().await.unwrap(),
            QueryEvent::Done(_)
        ));
        assert!(client.is_idle());
        assert!(matches!(client.next_event().await, Err(ClientError::Idle)));
    }

    #[tokio::test]
    async fn test_second_query_while_in_flight_is_busy() {
        let (mut client, _backend) = connected_pair("b").await;
        client.query(&query("foo")).await.unwrap();
        assert!(matches!(
            client.query(&query("bar")).await,
            Err(ClientError::Busy)
        ));
        assert!(client.error().is_none());
    }

    #[tokio::test]
    async fn test_query_error_keeps_client_usable() {
        let (mut client, mut backend) = connected_pair("b").await;
        let handle = tokio::spawn(async move {
            backend.expect_query().await;
            backend
                .send(BackendOp::Error("invalid regex".to_string()))
                .await;
            backend
        });
        let err = client.search(&query("(")).await.unwrap_err();
        assert!(matches!(err, ClientError::Query(ref m) if m == "invalid regex"));
        assert!(client.is_idle());
        drop(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_before_terminator_is_fatal() {
        let (mut client, mut backend) = connected_pair("b").await;
        client.query(&query("foo")).await.unwrap();
        backend.send(BackendOp::Result(result("one"))).await;
        drop(backend);

        assert!(matches!(
            client.next_event().await.unwrap(),
            QueryEvent::Result(_)
        ));
        assert!(matches!(
            client.next_event().await,
            Err(ClientError::Disconnected)
        ));
        assert!(client.error().is_some());
        assert!(matches!(
            client.query(&query("bar")).await,
            Err(ClientError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_message_is_fatal() {
        let (mut client, mut backend) = connected_pair("b").await;
        client.query(&query("foo")).await.unwrap();
        backend.send_raw("{\"opcode\":\"bogus\",\"body\":{}}\n").await;
        let err = client.next_event().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Codec(CodecError::UnknownOpcode(_))
        ));
        assert!(client.error().is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_hangs_up() {
        let (mut client, mut backend) = connected_pair("b").await;
        client.close();
        client.close();
        assert_eq!(client.error(), Some("closed"));
        assert!(backend.closed().await);
    }
}
