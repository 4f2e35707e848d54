//! JSONL transport over AsyncBufRead/AsyncWrite.
//!
//! The hub frontend speaks newline-delimited JSON-RPC on stdio; the same
//! transport runs against in-memory buffers in tests.

use crate::protocol::{RpcNotification, RpcRequest, RpcResponse};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reads JSON-RPC requests line-by-line and writes responses and
/// notifications as JSONL. Generic over reader and writer for testability.
pub struct JsonlTransport<R, W> {
    reader: R,
    writer: W,
}

impl<R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin> JsonlTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Access the underlying writer.
    pub fn writer_ref(&self) -> &W {
        &self.writer
    }

    /// Read the next request. Returns `Ok(None)` on EOF; skips blank lines.
    pub async fn read_message(&mut self) -> Result<Option<RpcRequest>, TransportError> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let request: RpcRequest = serde_json::from_str(trimmed)?;
            return Ok(Some(request));
        }
    }

    /// Write a response as a single JSONL line.
    pub async fn write_response(&mut self, response: &RpcResponse) -> Result<(), TransportError> {
        let json = serde_json::to_string(response)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write a notification as a single JSONL line.
    pub async fn write_notification(
        &mut self,
        notification: &RpcNotification,
    ) -> Result<(), TransportError> {
        let json = serde_json::to_string(notification)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}
