//! LSP message framing layer
//!
//! Handles message framing using Content-Length headers:
//! `Content-Length: <length>\r\n\r\n<content>`

use crate::io::transport::Transport;
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::trace;

/// Error types for LSP framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(T),

    #[error("Invalid LSP message format: {0}")]
    InvalidFormat(String),

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Maximum message size to prevent memory exhaustion
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

const HEADER_SEPARATOR: &str = "\r\n\r\n";

/// Wraps any transport so that send/receive deal in whole JSON-RPC payloads
pub struct LspFraming<T: Transport> {
    /// Underlying transport
    transport: T,

    /// Buffer for accumulating partial messages
    receive_buffer: String,

    /// Queue of complete messages ready to be returned
    message_queue: VecDeque<String>,
}

impl<T: Transport> LspFraming<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            receive_buffer: String::new(),
            message_queue: VecDeque::new(),
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns Some(message) if a complete message is buffered
    fn try_parse_message(&mut self) -> Result<Option<String>, FramingError<T::Error>> {
        let Some(header_end) = self.receive_buffer.find(HEADER_SEPARATOR) else {
            return Ok(None);
        };

        let content_length = Self::parse_content_length(&self.receive_buffer[..header_end])?;
        let content_start = header_end + HEADER_SEPARATOR.len();
        let available = self.receive_buffer.len() - content_start;

        if available < content_length {
            trace!(
                "LspFraming: incomplete message, need {} more bytes",
                content_length - available
            );
            return Ok(None);
        }

        let content_end = content_start + content_length;
        let message = self
            .receive_buffer
            .get(content_start..content_end)
            .ok_or_else(|| {
                FramingError::InvalidFormat(format!(
                    "Content-Length {content_length} does not end on a character boundary"
                ))
            })?
            .to_string();
        self.receive_buffer.drain(..content_end);

        trace!("LspFraming: parsed complete message ({} bytes)", content_length);
        Ok(Some(message))
    }

    /// Parse Content-Length from the header block (other headers are ignored)
    fn parse_content_length(header: &str) -> Result<usize, FramingError<T::Error>> {
        for line in header.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if !name.trim().eq_ignore_ascii_case("content-length") {
                continue;
            }

            let value = value.trim();
            let length = value
                .parse::<usize>()
                .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;

            if length > MAX_MESSAGE_SIZE {
                return Err(FramingError::MessageTooLarge {
                    size: length,
                    max: MAX_MESSAGE_SIZE,
                });
            }

            return Ok(length);
        }

        Err(FramingError::InvalidFormat(
            "Missing Content-Length header".to_string(),
        ))
    }

    /// Pull one chunk from the transport and queue any complete messages
    async fn process_transport_data(&mut self) -> Result<(), FramingError<T::Error>> {
        let new_data = self
            .transport
            .receive()
            .await
            .map_err(FramingError::Transport)?;

        self.receive_buffer.push_str(&new_data);

        while let Some(message) = self.try_parse_message()? {
            self.message_queue.push_back(message);
        }

        Ok(())
    }
}

#[async_trait]
impl<T: Transport> Transport for LspFraming<T> {
    type Error = FramingError<T::Error>;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        let framed_message = format!("Content-Length: {}\r\n\r\n{}", message.len(), message);

        trace!("LspFraming: sending framed message ({} bytes)", message.len());

        self.transport
            .send(&framed_message)
            .await
            .map_err(FramingError::Transport)
    }

    /// Cancel-safe: a partially received message stays in the buffer.
    async fn receive(&mut self) -> Result<String, Self::Error> {
        loop {
            if let Some(message) = self.message_queue.pop_front() {
                return Ok(message);
            }
            self.process_transport_data().await?;
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.transport
            .close()
            .await
            .map_err(FramingError::Transport)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::{MockTransport, MockTransportError};

    #[tokio::test]
    async fn test_lsp_framing_send() {
        let mut framing = LspFraming::new(MockTransport::new());

        let message = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        framing.send(message).await.unwrap();

        let sent = framing.transport().sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            format!("Content-Length: {}\r\n\r\n{}", message.len(), message)
        );
    }

    #[tokio::test]
    async fn test_lsp_framing_receive() {
        let message = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let framed = format!("Content-Length: {}\r\n\r\n{}", message.len(), message);

        let mut framing = LspFraming::new(MockTransport::with_responses(vec![framed]));

        assert_eq!(framing.receive().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_lsp_framing_partial_message() {
        let message = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let header = format!("Content-Length: {}\r\n\r\n", message.len());

        let mut framing = LspFraming::new(MockTransport::with_responses(vec![
            format!("{}{}", header, &message[..10]),
            message[10..].to_string(),
        ]));

        assert_eq!(framing.receive().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_lsp_framing_multiple_messages_in_one_chunk() {
        let message1 = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let message2 = r#"{"jsonrpc":"2.0","method":"window/logMessage"}"#;
        let combined = format!(
            "Content-Length: {}\r\n\r\n{}Content-Length: {}\r\n\r\n{}",
            message1.len(),
            message1,
            message2.len(),
            message2
        );

        let mut framing = LspFraming::new(MockTransport::with_responses(vec![combined]));

        assert_eq!(framing.receive().await.unwrap(), message1);
        assert_eq!(framing.receive().await.unwrap(), message2);
    }

    #[tokio::test]
    async fn test_lsp_framing_extra_headers_and_multibyte_body() {
        let message = r#"{"result":"héllo"}"#;
        let framed = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{}",
            message.len(),
            message
        );

        let mut framing = LspFraming::new(MockTransport::with_responses(vec![framed]));

        assert_eq!(framing.receive().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_lsp_framing_invalid_content_length() {
        let invalid = "Content-Length: invalid\r\n\r\n{}".to_string();
        let mut framing = LspFraming::new(MockTransport::with_responses(vec![invalid]));

        match framing.receive().await {
            Err(FramingError::InvalidContentLength(value)) => assert_eq!(value, "invalid"),
            other => panic!("Expected InvalidContentLength error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lsp_framing_message_too_large() {
        let large_size = MAX_MESSAGE_SIZE + 1;
        let invalid = format!("Content-Length: {large_size}\r\n\r\n");
        let mut framing = LspFraming::new(MockTransport::with_responses(vec![invalid]));

        match framing.receive().await {
            Err(FramingError::MessageTooLarge { size, max }) => {
                assert_eq!(size, large_size);
                assert_eq!(max, MAX_MESSAGE_SIZE);
            }
            other => panic!("Expected MessageTooLarge error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lsp_framing_surfaces_transport_end() {
        let mut framing = LspFraming::new(MockTransport::new());

        assert!(matches!(
            framing.receive().await,
            Err(FramingError::Transport(MockTransportError::NoMoreResponses))
        ));
    }
}
