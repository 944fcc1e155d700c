//! Connection Handler Module
//!
//! Each client gets its own handler task that reads frames, submits them to
//! the worker in arrival order and writes the replies back.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned, session opened on the worker
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Parse every whole frame │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Submit each, in order   │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Flush replies at once   │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error / timeout
//!        │
//!        ▼
//! 5. Session closed on the worker, handler task ends
//! ```
//!
//! ## Buffer Management
//!
//! TCP is a stream protocol: one read may hold part of a frame or several
//! frames. Incoming bytes accumulate in a BytesMut buffer and whole frames
//! are split off its front.

use crate::commands::Origin;
use crate::protocol::{Frame, FrameParser, ParseError};
use crate::storage::SessionId;
use crate::worker::{WorkerError, WorkerHandle};
use bytes::BytesMut;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Largest bulk string accepted from a client (8 MB).
pub const MAX_REQUEST_BULK: usize = 8 * 1024 * 1024;

/// Largest buffered request: one maximal bulk string plus framing.
const MAX_BUFFER_SIZE: usize = MAX_REQUEST_BULK + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Socket deadlines. `None` waits forever.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Option<Duration>,
    pub write: Option<Duration>,
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    worker: WorkerHandle,

    parser: FrameParser,

    timeouts: Timeouts,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        worker: WorkerHandle,
        stats: Arc<ConnectionStats>,
        timeouts: Timeouts,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            worker,
            parser: FrameParser::with_max_bulk(MAX_REQUEST_BULK),
            timeouts,
            stats,
        }
    }

    /// Opens a session, serves the client until it goes away, then closes
    /// the session so its watches are released.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let opened = self.worker.open_session(Origin::Remote(self.addr)).await;
        let result = match opened {
            Ok(session) => {
                let result = self.main_loop(session).await;
                if self.worker.close_session(session).await.is_err() {
                    debug!(client = %self.addr, "Worker gone before session close");
                }
                result
            }
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self, session: SessionId) -> Result<(), ConnectionError> {
        loop {
            let mut replies = 0;
            loop {
                let request = match self.try_parse_frame() {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(e) => {
                        // Tell the client why before hanging up.
                        let reply = Frame::error(format!("ERR {}", e));
                        self.write_frame(&reply).await?;
                        self.flush().await?;
                        return Err(e.into());
                    }
                };

                let reply = self.worker.execute(session, request).await?;
                self.stats.command_processed();
                self.write_frame(&reply).await?;
                replies += 1;
            }

            if replies > 0 {
                self.flush().await?;
            }

            self.read_more_data().await?;
        }
    }

    /// Attempts to parse a frame from the buffer.
    fn try_parse_frame(&mut self) -> Result<Option<Frame>, ParseError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((frame, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Ok(Some(frame))
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Parse error");
                Err(e)
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let read = self.stream.get_mut().read_buf(&mut self.buffer);
        let n = with_deadline(self.timeouts.read, "read", read).await??;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial frame in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Queues one reply in the write buffer.
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let bytes = frame.encode();
        let write = self.stream.write_all(&bytes);
        with_deadline(self.timeouts.write, "write", write).await??;
        self.stats.bytes_written(bytes.len());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        let flush = self.stream.flush();
        with_deadline(self.timeouts.write, "write", flush).await??;
        trace!(client = %self.addr, "Flushed replies");
        Ok(())
    }
}

/// Runs `io`, failing with a timeout error once `deadline` passes.
async fn with_deadline<T>(
    deadline: Option<Duration>,
    operation: &'static str,
    io: impl Future<Output = std::io::Result<T>>,
) -> Result<std::io::Result<T>, ConnectionError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, io)
            .await
            .map_err(|_| ConnectionError::Timeout(operation)),
        None => Ok(io.await),
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame from the client
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The worker stopped while this client was connected
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial frame)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,

    #[error("{0} timed out")]
    Timeout(&'static str),
}

/// Handles a client connection.
///
/// Creates a ConnectionHandler and runs it to completion. Errors are already
/// logged by the handler.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    worker: WorkerHandle,
    stats: Arc<ConnectionStats>,
    timeouts: Timeouts,
) {
    let handler = ConnectionHandler::new(stream, addr, worker, stats, timeouts);
    let _ = handler.run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Processor;
    use crate::worker;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn create_test_server(timeouts: Timeouts) -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (handle, _join) = worker::spawn(Processor::new(16));
        let stats = Arc::new(ConnectionStats::new());

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    handle.clone(),
                    stats,
                    timeouts,
                ));
            }
        });

        (addr, stats)
    }

    /// Reads until `expected` bytes arrived or nothing more comes.
    async fn read_reply(client: &mut TcpStream, expected: usize) -> String {
        let mut buf = vec![0u8; 1024];
        let mut total = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);

        while total < expected && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(200), client.read(&mut buf[total..])).await {
                Ok(Ok(n)) if n > 0 => total += n,
                _ => break,
            }
        }
        String::from_utf8_lossy(&buf[..total]).into_owned()
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _) = create_test_server(Timeouts::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n+ping\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+pong\r\n");
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _) = create_test_server(Timeouts::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n+set\r\n+name\r\n$4\r\nFrost\r\n")
            .await
            .unwrap();
        // "Frost" is five bytes; the declared length of four is a protocol error
        let reply = read_reply(&mut client, 64).await;
        assert!(reply.starts_with("-ERR protocol error"), "{}", reply);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*3\r\n+set\r\n+name\r\n$5\r\nFrost\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client, 5).await, "+ok\r\n");

        client.write_all(b"*2\r\n+get\r\n+name\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client, 11).await, "$5\r\nFrost\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands_answer_in_order() {
        let (addr, _) = create_test_server(Timeouts::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n+set\r\n+k1\r\n$2\r\nv1\r\n*3\r\n+set\r\n+k2\r\n:2\r\n*2\r\n+get\r\n+k1\r\n*2\r\n+incr\r\n+k2\r\n")
            .await
            .unwrap();

        // +ok +ok $2 v1 :3
        let expected = "+ok\r\n+ok\r\n$2\r\nv1\r\n:3\r\n";
        assert_eq!(read_reply(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_transaction_over_two_connections() {
        let (addr, _) = create_test_server(Timeouts::default()).await;
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        a.write_all(b"*2\r\n+watch\r\n+x\r\n*1\r\n+multi\r\n*2\r\n+get\r\n+x\r\n")
            .await
            .unwrap();
        let expected = "+ok\r\n+ok\r\n+queued\r\n";
        assert_eq!(read_reply(&mut a, expected.len()).await, expected);

        b.write_all(b"*3\r\n+set\r\n+x\r\n+v2\r\n").await.unwrap();
        assert_eq!(read_reply(&mut b, 5).await, "+ok\r\n");

        a.write_all(b"*1\r\n+exec\r\n").await.unwrap();
        assert_eq!(read_reply(&mut a, 4).await, "*0\r\n");
    }

    #[tokio::test]
    async fn test_command_error_keeps_connection_open() {
        let (addr, _) = create_test_server(Timeouts::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n+nope\r\n").await.unwrap();
        let reply = read_reply(&mut client, 34).await;
        assert_eq!(reply, "-ERR unrecognized command 'nope'\r\n");

        client.write_all(b"*1\r\n+ping\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client, 7).await, "+pong\r\n");
    }

    #[tokio::test]
    async fn test_oversized_bulk_is_refused_before_payload() {
        let (addr, stats) = create_test_server(Timeouts::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let header = format!("*3\r\n+set\r\n+big\r\n${}\r\n", MAX_REQUEST_BULK + 1);
        client.write_all(header.as_bytes()).await.unwrap();
        let reply = read_reply(&mut client, 64).await;
        assert!(reply.starts_with("-ERR frame too large"), "{}", reply);

        // the server hangs up instead of waiting for the payload
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_read_timeout_closes_idle_connection() {
        let timeouts = Timeouts {
            read: Some(Duration::from_millis(50)),
            write: None,
        };
        let (addr, stats) = create_test_server(timeouts).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server(Timeouts::default()).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*1\r\n+ping\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = client.read(&mut buf).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
