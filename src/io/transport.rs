//! Transport layer - Pure I/O abstraction for message exchange
//!
//! `StreamTransport` turns two independent half-duplex handles (a child's
//! stdin/stdout pair, or the two halves of a TCP connection) into one
//! bidirectional transport. It carries raw text chunks and knows nothing
//! about message framing.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for reader operations
const READ_BUFFER_SIZE: usize = 4096;

/// Default capacity for UTF-8 accumulation buffer
const UTF8_ACCUMULATION_BUFFER_CAPACITY: usize = 8192;

/// How long close() waits for queued writes to reach the peer
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Core transport trait for bidirectional message exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a message (raw string)
    async fn send(&mut self, message: &str) -> Result<(), Self::Error>;

    /// Receive a message (raw string)
    async fn receive(&mut self) -> Result<String, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stream Transport Implementation
// ============================================================================

/// Error types for stream transports
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("provide an address to create a tcp transport")]
    EmptyAddress,

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Duplex transport over a writable half and a readable half
///
/// The write half is owned by a writer task fed through a channel; the read
/// half is owned by a reader task that forwards decoded UTF-8 chunks.
#[derive(Debug)]
pub struct StreamTransport {
    /// Human-readable source of the streams ("stdio", "tcp", ...)
    label: &'static str,

    /// Channel for sending messages to the write half
    writer_sender: Option<mpsc::UnboundedSender<String>>,

    /// Channel for receiving chunks from the read half
    reader_receiver: Option<mpsc::UnboundedReceiver<String>>,

    /// Writer task handle, awaited on close so the write end closes first
    writer_task: Option<JoinHandle<()>>,

    /// Reader task handle
    reader_task: Option<JoinHandle<()>>,

    /// Connection status
    connected: bool,
}

/// Internal state for the reader task that handles byte accumulation
struct ReaderState {
    /// Buffer for accumulating raw bytes before UTF-8 conversion
    byte_buffer: Vec<u8>,

    /// Buffer capacity to avoid frequent reallocations
    buffer_capacity: usize,
}

impl ReaderState {
    fn new() -> Self {
        Self {
            byte_buffer: Vec::with_capacity(UTF8_ACCUMULATION_BUFFER_CAPACITY),
            buffer_capacity: UTF8_ACCUMULATION_BUFFER_CAPACITY,
        }
    }

    fn add_bytes(&mut self, bytes: &[u8]) {
        self.byte_buffer.extend_from_slice(bytes);
    }

    /// Take the longest valid UTF-8 prefix out of the buffer
    ///
    /// A trailing partial code point stays buffered until more bytes arrive.
    fn extract_valid_utf8(&mut self) -> Option<String> {
        if self.byte_buffer.is_empty() {
            return None;
        }

        let valid_end = match std::str::from_utf8(&self.byte_buffer) {
            Ok(_) => self.byte_buffer.len(),
            Err(e) if e.valid_up_to() == 0 => {
                // Bytes that can never become valid are replaced, not buffered forever.
                let invalid = e.error_len()?;
                self.byte_buffer.drain(..invalid);
                return Some(char::REPLACEMENT_CHARACTER.to_string());
            }
            Err(e) => e.valid_up_to(),
        };

        let bytes: Vec<u8> = self.byte_buffer.drain(..valid_end).collect();
        String::from_utf8(bytes).ok()
    }

    fn compact(&mut self) {
        if self.byte_buffer.capacity() > self.buffer_capacity * 2 {
            self.byte_buffer.shrink_to(self.buffer_capacity);
        }
    }
}

impl StreamTransport {
    /// Build a transport from any write half and read half
    pub fn new<W, R>(label: &'static str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (writer_sender, writer_receiver) = mpsc::unbounded_channel();
        let (reader_sender, reader_receiver) = mpsc::unbounded_channel();

        let writer_task = tokio::spawn(Self::writer_task(label, writer, writer_receiver));
        let reader_task = tokio::spawn(Self::reader_task(label, reader, reader_sender));

        Self {
            label,
            writer_sender: Some(writer_sender),
            reader_receiver: Some(reader_receiver),
            writer_task: Some(writer_task),
            reader_task: Some(reader_task),
            connected: true,
        }
    }

    /// Create a transport from child process streams
    pub fn from_child(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::new("stdio", stdin, stdout)
    }

    /// Create a transport from an established TCP connection
    pub fn from_tcp(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("StreamTransport: could not set TCP_NODELAY: {}", e);
        }
        let (read_half, write_half) = stream.into_split();
        Self::new("tcp", write_half, read_half)
    }

    /// Open a TCP connection and wrap it
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        if addr.is_empty() {
            return Err(TransportError::EmptyAddress);
        }

        info!("Connecting to language server at {}", addr);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self::from_tcp(stream))
    }

    /// Where the streams came from
    #[cfg(test)]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Background task that owns the write half
    async fn writer_task<W>(
        label: &'static str,
        mut writer: W,
        mut receiver: mpsc::UnboundedReceiver<String>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        while let Some(message) = receiver.recv().await {
            trace!("StreamTransport[{}]: writing {} bytes", label, message.len());

            if let Err(e) = writer.write_all(message.as_bytes()).await {
                error!("StreamTransport[{}]: failed to write: {}", label, e);
                break;
            }

            if let Err(e) = writer.flush().await {
                error!("StreamTransport[{}]: failed to flush: {}", label, e);
                break;
            }
        }

        if let Err(e) = writer.shutdown().await {
            trace!("StreamTransport[{}]: shutdown of write half: {}", label, e);
        }

        trace!("StreamTransport[{}]: writer task finished", label);
    }

    /// Background task that owns the read half, forwarding UTF-8 chunks
    async fn reader_task<R>(label: &'static str, reader: R, sender: mpsc::UnboundedSender<String>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(reader);
        let mut state = ReaderState::new();
        let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

        loop {
            match reader.read(read_buffer.as_mut()).await {
                Ok(0) => {
                    trace!("StreamTransport[{}]: reader reached EOF", label);
                    if let Some(rest) = state.extract_valid_utf8() {
                        let _ = sender.send(rest);
                    }
                    if !state.byte_buffer.is_empty() {
                        warn!(
                            "StreamTransport[{}]: {} incomplete UTF-8 bytes dropped at EOF",
                            label,
                            state.byte_buffer.len()
                        );
                    }
                    break;
                }
                Ok(n) => {
                    state.add_bytes(&read_buffer[..n]);

                    while let Some(chunk) = state.extract_valid_utf8() {
                        if sender.send(chunk).is_err() {
                            trace!("StreamTransport[{}]: receiver dropped, stopping", label);
                            return;
                        }
                    }

                    state.compact();
                }
                Err(e) => {
                    error!("StreamTransport[{}]: failed to read: {}", label, e);
                    break;
                }
            }
        }

        trace!("StreamTransport[{}]: reader task finished", label);
    }
}

#[async_trait]
impl Transport for StreamTransport {
    type Error = TransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let sender = self
            .writer_sender
            .as_ref()
            .ok_or(TransportError::Disconnected)?;

        sender
            .send(message.to_string())
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let receiver = self
            .reader_receiver
            .as_mut()
            .ok_or(TransportError::Disconnected)?;

        receiver.recv().await.ok_or(TransportError::Disconnected)
    }

    /// Close the write end, then the read end. Closing again is a no-op.
    async fn close(&mut self) -> Result<(), Self::Error> {
        if self.writer_task.is_none() && self.reader_task.is_none() {
            self.connected = false;
            return Ok(());
        }

        debug!("StreamTransport[{}]: closing", self.label);
        self.connected = false;

        // Dropping the sender lets the writer drain, shut down and drop the write half.
        self.writer_sender.take();
        if let Some(task) = self.writer_task.take() {
            let abort = task.abort_handle();
            match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("StreamTransport[{}]: writer task ended: {}", self.label, e),
                Err(_) => {
                    warn!(
                        "StreamTransport[{}]: peer is not reading, abandoning queued writes",
                        self.label
                    );
                    abort.abort();
                }
            }
        }

        self.reader_receiver.take();
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

#[cfg(test)]
pub use mock::{MockTransport, MockTransportError};

#[cfg(test)]
mod mock {
    use super::Transport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Error type for mock transport
    #[derive(Debug, thiserror::Error)]
    pub enum MockTransportError {
        #[error("Transport is disconnected")]
        Disconnected,
        #[error("No more responses available")]
        NoMoreResponses,
    }

    /// Mock transport for testing - allows controlling sent/received messages
    pub struct MockTransport {
        sent_messages: Arc<Mutex<Vec<String>>>,
        responses: Arc<Mutex<VecDeque<String>>>,
        connected: bool,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                sent_messages: Arc::new(Mutex::new(Vec::new())),
                responses: Arc::new(Mutex::new(VecDeque::new())),
                connected: true,
            }
        }

        /// Create a mock transport with predefined responses
        pub fn with_responses(responses: Vec<String>) -> Self {
            let transport = Self::new();
            transport.responses.lock().unwrap().extend(responses);
            transport
        }

        /// Get all messages that were sent via this transport
        pub fn sent_messages(&self) -> Vec<String> {
            self.sent_messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        type Error = MockTransportError;

        async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
            if !self.connected {
                return Err(MockTransportError::Disconnected);
            }

            self.sent_messages.lock().unwrap().push(message.to_string());
            Ok(())
        }

        async fn receive(&mut self) -> Result<String, Self::Error> {
            if !self.connected {
                return Err(MockTransportError::Disconnected);
            }

            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(MockTransportError::NoMoreResponses)
        }

        async fn close(&mut self) -> Result<(), Self::Error> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
