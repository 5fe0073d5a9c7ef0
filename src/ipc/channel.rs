//! Newline-delimited JSON framing over arbitrary async byte streams.
//!
//! Used both for the parent↔core channel (stdin/stdout of this process) and
//! the core↔worker channels (stdin/stdout of each spawned subprocess) — the
//! framing is identical in both directions.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Reads newline-delimited JSON values from any `AsyncBufRead`.
pub struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: tokio::io::AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Reads the next line and parses it as JSON. `Ok(None)` means EOF
    /// (the peer closed the stream). A line that fails to parse yields
    /// `Err(Parse)` but does not close the reader — the caller decides
    /// whether to keep reading; a parse fault must not take the whole
    /// channel down.
    pub async fn next_value(&mut self) -> OrchestratorResult<Option<serde_json::Value>> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            return Ok(Some(serde_json::Value::Null));
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| OrchestratorError::Parse(e.to_string()))
    }
}

/// Writes newline-delimited JSON values to any `AsyncWrite`, serializing
/// concurrent writers behind a mutex.
#[derive(Clone)]
pub struct LineWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn write_value(&self, value: &serde_json::Value) -> OrchestratorResult<()> {
        let mut line = serde_json::to_string(value).map_err(|e| OrchestratorError::Parse(e.to_string()))?;
        line.push('\n');
        let mut guard = self.inner.lock().await;
        guard.write_all(line.as_bytes()).await?;
        guard.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_value() {
        let (a, b) = duplex(4096);
        let (a_read, _a_write) = tokio::io::split(a);
        let (_b_read, b_write) = tokio::io::split(b);

        let writer = LineWriter::new(b_write);
        writer.write_value(&json!({"hello": "world"})).await.unwrap();

        let mut reader = LineReader::new(a_read);
        let value = reader.next_value().await.unwrap().unwrap();
        assert_eq!(value, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn eof_yields_none() {
        let (a, b) = duplex(64);
        drop(b);
        let mut reader = LineReader::new(a);
        let result = reader.next_value().await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn malformed_line_yields_parse_error_without_closing() {
        let (a, b) = duplex(1024);
        let (a_read, _a_write) = tokio::io::split(a);
        let (_b_read, mut b_write) = tokio::io::split(b);

        b_write.write_all(b"not json\n").await.unwrap();
        b_write.write_all(b"{\"ok\":true}\n").await.unwrap();

        let mut reader = LineReader::new(a_read);
        let first = reader.next_value().await;
        assert!(matches!(first, Err(OrchestratorError::Parse(_))));

        let second = reader.next_value().await.unwrap().unwrap();
        assert_eq!(second, json!({"ok": true}));
    }
}
