//! Connection wrapper carrying control lines and raw bytes.

use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

use super::error::WireError;

/// A protocol connection: buffered line reads plus raw chunk I/O.
///
/// Both the sender stream and the collector session compose a `Wire` by
/// value; exactly one `Wire` is associated with a stream at a time, and a
/// reconnect replaces the whole value. Generic over the underlying stream so
/// tests can run on `tokio::io::duplex` instead of TCP.
#[derive(Debug)]
pub struct Wire<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Wire<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Write one control message, appending a newline and flushing.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] if the write or flush fails.
    pub async fn write_message(&mut self, msg: &str) -> Result<(), WireError> {
        self.writer.write_all(msg.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        tracing::trace!(msg, "Wrote message");
        Ok(())
    }

    /// Block until one newline-terminated line is available and return it
    /// with the trailing newline stripped.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Closed`] on clean EOF and
    /// [`WireError::Transport`] on any other I/O failure. After either, the
    /// connection is no longer usable and must be closed by the caller.
    pub async fn await_message(&mut self) -> Result<String, WireError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(WireError::Closed);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        tracing::trace!(line, "Read message");
        Ok(line)
    }

    /// [`Self::await_message`] with a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Timeout`] when the deadline elapses, otherwise
    /// as [`Self::await_message`].
    pub async fn await_message_timeout(&mut self, dur: Duration) -> Result<String, WireError> {
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = dur.as_millis() as u64;
        match tokio::time::timeout(dur, self.await_message()).await {
            Ok(inner) => inner,
            Err(_) => Err(WireError::Timeout(timeout_ms)),
        }
    }

    /// Write raw payload bytes during the streaming phase.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] if the write fails.
    pub async fn write_chunk(&mut self, buf: &[u8]) -> Result<(), WireError> {
        self.writer.write_all(buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read raw payload bytes during the streaming phase.
    ///
    /// Returns the number of bytes read; `0` means the peer closed its write
    /// side.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Transport`] if the read fails.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, WireError> {
        let n = self.reader.read(buf).await?;
        Ok(n)
    }

    /// Shut down the write side, signalling EOF to the peer.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(error = %e, "Error during connection shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_await_roundtrip() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = Wire::new(a);
        let mut right = Wire::new(b);

        left.write_message("STREAMID ab12cd").await.unwrap();
        let line = right.await_message().await.unwrap();
        assert_eq!(line, "STREAMID ab12cd");
    }

    #[tokio::test]
    async fn test_await_strips_crlf() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = Wire::new(a);
        let mut right = Wire::new(b);

        left.write_chunk(b"OK 0 12\r\n").await.unwrap();
        assert_eq!(right.await_message().await.unwrap(), "OK 0 12");
    }

    #[tokio::test]
    async fn test_await_on_closed_peer_is_closed_error() {
        let (a, b) = tokio::io::duplex(64);
        let mut right = Wire::new(b);
        drop(a);

        let result = right.await_message().await;
        assert!(matches!(result, Err(WireError::Closed)));
    }

    #[tokio::test]
    async fn test_await_timeout() {
        let (_a, b) = tokio::io::duplex(64);
        let mut right = Wire::new(b);

        let result = right
            .await_message_timeout(Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(WireError::Timeout(20))));
    }

    #[tokio::test]
    async fn test_raw_chunks_pass_through_unframed() {
        let (a, b) = tokio::io::duplex(8192);
        let mut left = Wire::new(a);
        let mut right = Wire::new(b);

        left.write_chunk(b"line1\nline2\n").await.unwrap();
        left.shutdown().await;

        let mut buf = [0u8; 64];
        let mut got = Vec::new();
        loop {
            let n = right.read_chunk(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"line1\nline2\n");
    }
}
