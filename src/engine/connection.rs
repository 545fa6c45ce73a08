//! Connection lifecycle and inbound event queue
//!
//! A [`Connection`] splits its stream: writes go straight to the write half,
//! while a reader task turns everything the peer does into an ordered queue
//! of [`ConnectionEvent`]s. A send step awaits exactly one queued event, so
//! whichever of data/error/close arrives first decides the step and nothing
//! else can complete it.
//!
//! There is no framing: one read is one `Data` event. Bytes that arrive while
//! no request is outstanding are dropped by [`Connection::discard_stale`]
//! before the next request is written.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::config::default_read_buffer;
use crate::common::{Error, Result};

use super::context::ExecutionContext;
use super::events::{EngineEvent, EventSink};

/// Something the peer did
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Bytes from a single read
    Data(Vec<u8>),
    /// The read side failed
    Error(io::Error),
    /// The peer closed the connection
    Closed { had_error: bool },
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// One transport connection, exclusively owned by one run
pub struct Connection {
    peer: String,
    writer: BoxedWriter,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    /// Error or close pulled off the queue while discarding stale data
    pending: Option<ConnectionEvent>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Wrap a connected stream
    ///
    /// Must be called from within a tokio runtime; the reader task is
    /// spawned immediately.
    pub fn new<S>(stream: S, peer: impl Into<String>, read_buffer: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Sync + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(pump(read_half, tx, read_buffer.max(1)));

        Self {
            peer: peer.into(),
            writer: Box::new(write_half),
            events,
            pending: None,
            reader,
        }
    }

    /// Address or label of the remote end
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write a whole buffer and flush it
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf).await?;
        self.writer.flush().await
    }

    /// Wait for the first of data, error or close
    ///
    /// Consumes exactly one event. Once the reader has stopped and the queue
    /// is empty this reports a clean close.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        if let Some(event) = self.pending.take() {
            return event;
        }
        self.events
            .recv()
            .await
            .unwrap_or(ConnectionEvent::Closed { had_error: false })
    }

    /// Drop queued data nobody asked for
    ///
    /// Returns the number of bytes dropped. A queued error or close is kept
    /// and is the next thing [`next_event`](Self::next_event) reports.
    pub fn discard_stale(&mut self) -> usize {
        if self.pending.is_some() {
            return 0;
        }
        let mut dropped = 0;
        while let Ok(event) = self.events.try_recv() {
            match event {
                ConnectionEvent::Data(bytes) => dropped += bytes.len(),
                other => {
                    self.pending = Some(other);
                    break;
                }
            }
        }
        dropped
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

/// Forward reads into the event queue until EOF, error, or the owner is gone
async fn pump<R>(mut reader: R, tx: mpsc::UnboundedSender<ConnectionEvent>, buffer_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::trace!("connection closed by peer");
                let _ = tx.send(ConnectionEvent::Closed { had_error: false });
                return;
            }
            Ok(n) => {
                tracing::trace!(bytes = n, "connection data");
                if tx.send(ConnectionEvent::Data(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::trace!(error = %e, "connection read failed");
                let _ = tx.send(ConnectionEvent::Error(e));
                let _ = tx.send(ConnectionEvent::Closed { had_error: true });
                return;
            }
        }
    }
}

/// Opens transport connections for runs
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Connection>;
}

/// Plain TCP connector
#[derive(Debug, Clone)]
pub struct TcpConnector {
    read_buffer: usize,
}

impl TcpConnector {
    pub fn new(read_buffer: usize) -> Self {
        Self { read_buffer }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(default_read_buffer())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Connection> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::connection_failed(host, port, e))?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("{}:{}", host, port));
        tracing::debug!(%peer, "connected");
        Ok(Connection::new(stream, peer, self.read_buffer))
    }
}

/// Open the run's connection, attach it and announce the run
///
/// Runs before the first compiled step. A failure is reported on the event
/// channel and aborts the run before `started` is emitted.
pub async fn establish(
    connector: &dyn Connector,
    host: &str,
    port: u16,
    context: &mut ExecutionContext,
    events: &EventSink,
) -> Result<()> {
    let attached = match connector.connect(host, port).await {
        Ok(connection) => {
            tracing::debug!(
                run_id = context.run_id(),
                peer = connection.peer(),
                "connection attached"
            );
            context.attach_connection(connection)
        }
        Err(e) => Err(e),
    };
    if let Err(e) = attached {
        tracing::debug!(run_id = context.run_id(), error = %e, "connection setup failed");
        events.emit(EngineEvent::error(&e));
        return Err(e);
    }

    events.emit(EngineEvent::Started);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_data_then_close() {
        let (client, mut server) = duplex(64);
        let mut conn = Connection::new(client, "mem", 64);

        conn.write(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        match conn.next_event().await {
            ConnectionEvent::Data(bytes) => assert_eq!(bytes, b"pong"),
            other => panic!("Expected data, got {:?}", other),
        }

        drop(server);
        assert!(matches!(
            conn.next_event().await,
            ConnectionEvent::Closed { had_error: false }
        ));
        // Reader is gone; further waits keep reporting a close
        assert!(matches!(
            conn.next_event().await,
            ConnectionEvent::Closed { had_error: false }
        ));
    }

    #[tokio::test]
    async fn test_discard_stale_drops_data_keeps_close() {
        let (client, mut server) = duplex(64);
        let mut conn = Connection::new(client, "mem", 64);

        server.write_all(b"late").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        server.write_all(b"r").await.unwrap();
        drop(server);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(conn.discard_stale(), 5);
        // The close is held back, not dropped with the data
        assert_eq!(conn.discard_stale(), 0);
        assert!(matches!(
            conn.next_event().await,
            ConnectionEvent::Closed { had_error: false }
        ));
    }

    #[tokio::test]
    async fn test_read_failure_queues_error_then_close() {
        let (client, _server) = duplex(64);
        let mut conn = Connection::new(testing::FailingStream { inner: client }, "mem", 64);

        assert!(matches!(conn.next_event().await, ConnectionEvent::Error(_)));
        assert!(matches!(
            conn.next_event().await,
            ConnectionEvent::Closed { had_error: true }
        ));
    }

    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self, host: &str, port: u16) -> Result<Connection> {
            Err(Error::connection_failed(
                host,
                port,
                io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            ))
        }
    }

    #[tokio::test]
    async fn test_establish_failure_reports_error() {
        let (sink, mut stream) = events::channel();
        let mut ctx = ExecutionContext::with_run_id("r1");

        let result = establish(&FailingConnector, "localhost", 1, &mut ctx, &sink).await;
        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
        assert!(!ctx.is_connected());

        let events = stream.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpConnector::default().connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
    }
}
