//! One accepted connection: command dispatch and the streaming copy phase.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::protocol::{message, ClientCommand, ServerReply, Wire, WireError, BANNER, CHUNK_SIZE};
use crate::server::registry::SessionRegistry;
use crate::server::sink::OutputSink;

/// How long the copy phase pauses before its single EOF retry.
const EOF_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Server-side session state machine for one accepted connection.
///
/// Owns the connection exclusively. Lifecycle: greet with `HELLO` and
/// `STREAMID`, then loop awaiting commands until the peer closes, sends
/// `CLOSE`, or a transport error ends the session.
pub struct Session<S> {
    wire: Wire<S>,
    stream_id: String,
    base_directory: PathBuf,
    registry: Arc<SessionRegistry>,
    metrics: Arc<dyn Metrics>,
    cancel: CancellationToken,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// Create a session over an accepted connection.
    pub fn new(
        wire: Wire<S>,
        stream_id: String,
        base_directory: PathBuf,
        registry: Arc<SessionRegistry>,
        metrics: Arc<dyn Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            wire,
            stream_id,
            base_directory,
            registry,
            metrics,
            cancel,
        }
    }

    /// The server-assigned stream id.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Run the session to completion.
    ///
    /// Registers in the session registry for its lifetime; any exit path
    /// deregisters and drops the connection.
    pub async fn run(mut self) {
        self.registry.insert(&self.stream_id).await;

        if let Err(e) = self.greet().await {
            tracing::warn!(stream = %self.stream_id, error = %e, "Failed to greet client");
        } else if let Err(e) = self.handle_commands().await {
            tracing::debug!(stream = %self.stream_id, error = %e, "Session ended");
        }

        self.registry.remove(&self.stream_id).await;
        self.wire.shutdown().await;
        tracing::info!(stream = %self.stream_id, "Closed session");
    }

    async fn greet(&mut self) -> Result<(), WireError> {
        self.wire
            .write_message(&ServerReply::Hello(BANNER.to_string()).render())
            .await?;
        self.wire
            .write_message(&ServerReply::StreamId(self.stream_id.clone()).render())
            .await
    }

    /// Await and dispatch commands until the session ends.
    ///
    /// Blank lines are skipped. A rejected `INIT` does not consume a command
    /// index; dispatched commands, including unknown ones, do.
    async fn handle_commands(&mut self) -> Result<(), WireError> {
        let mut cmd_idx: u64 = 0;
        loop {
            let line = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!(stream = %self.stream_id, "Session cancelled");
                    return Ok(());
                }
                line = self.wire.await_message() => line?,
            };

            let Some(cmd) = ClientCommand::parse(&line) else {
                continue;
            };
            self.registry.touch(&self.stream_id).await;
            tracing::debug!(stream = %self.stream_id, idx = cmd_idx, cmd = %cmd.name, "Process command");

            match cmd.name.as_str() {
                "INIT" => {
                    if self.handle_init(&cmd.args, cmd_idx).await? {
                        cmd_idx += 1;
                    }
                }
                "CLOSE" => {
                    tracing::info!(stream = %self.stream_id, "Close requested");
                    self.reply_best_effort(&ServerReply::Ok(vec![cmd_idx.to_string()]).render())
                        .await;
                    return Ok(());
                }
                other => {
                    self.wire
                        .write_message(&format!("ERR 500 Unknown command {other}"))
                        .await?;
                    cmd_idx += 1;
                }
            }
        }
    }

    /// Handle `INIT STREAM <hostname>:<remote-path>`.
    ///
    /// Returns whether the command consumed an index (i.e. was dispatched
    /// rather than rejected).
    async fn handle_init(&mut self, args: &[String], cmd_idx: u64) -> Result<bool, WireError> {
        if args.len() < 2 {
            self.wire
                .write_message("ERR 500 Missing arguments for INIT")
                .await?;
            return Ok(false);
        }
        let Some((hostname, remote_path)) = message::parse_stream_target(&args[1]) else {
            self.wire
                .write_message("ERR 500 Missing hostname:path pair for INIT")
                .await?;
            return Ok(false);
        };
        let (hostname, remote_path) = (hostname.to_string(), remote_path.to_string());
        tracing::info!(stream = %self.stream_id, hostname = %hostname, remote = %remote_path, "Init stream");

        let mut sink =
            match OutputSink::open(&self.base_directory, &hostname, &remote_path).await {
                Ok(sink) => sink,
                Err(e) => {
                    tracing::error!(
                        stream = %self.stream_id,
                        hostname = %hostname,
                        remote = %remote_path,
                        error = %e,
                        "Failed to open stream sink"
                    );
                    self.wire
                        .write_message("ERR 500 Failed to open stream sink")
                        .await?;
                    return Ok(false);
                }
            };

        self.registry
            .set_target(&self.stream_id, &hostname, &remote_path)
            .await;
        self.wire
            .write_message(
                &ServerReply::Ok(vec![self.stream_id.clone(), cmd_idx.to_string()]).render(),
            )
            .await?;

        self.metrics.stream_opened();
        let (copied, copy_err) = self.copy_stream(&mut sink).await;
        self.metrics.stream_closed();

        if let Err(e) = sink.sync().await {
            tracing::error!(stream = %self.stream_id, error = %e, "Failed to sync sink");
        }
        tracing::info!(
            stream = %self.stream_id,
            local = %sink.local_path().display(),
            bytes = copied,
            "Stream phase completed"
        );

        match copy_err {
            None => {
                self.reply_best_effort(
                    &ServerReply::Ok(vec![cmd_idx.to_string(), copied.to_string()]).render(),
                )
                .await;
            }
            Some(e) => {
                tracing::error!(stream = %self.stream_id, bytes = copied, error = %e, "Stream copy failed");
                self.reply_best_effort(&format!(
                    "ERR 500 Failed after {copied} bytes from stream {}",
                    self.stream_id
                ))
                .await;
            }
        }
        Ok(true)
    }

    /// Copy raw bytes from the connection into the sink.
    ///
    /// EOF during active streaming is first treated as "peer paused": the
    /// sink is flushed and the read retried once after a short pause. A
    /// second EOF concludes the phase. Returns the byte count and, for
    /// non-EOF failures, the error.
    async fn copy_stream(&mut self, sink: &mut OutputSink) -> (u64, Option<WireError>) {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        let mut eof_retries = 0;

        loop {
            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                read = self.wire.read_chunk(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    if let Err(e) = sink.sync().await {
                        return (total, Some(WireError::Transport(e)));
                    }
                    eof_retries += 1;
                    if eof_retries < 2 {
                        tracing::debug!(
                            stream = %self.stream_id,
                            retry = eof_retries,
                            "EOF on stream, retrying read shortly"
                        );
                        tokio::time::sleep(EOF_RETRY_PAUSE).await;
                        continue;
                    }
                    tracing::debug!(stream = %self.stream_id, "EOF reached");
                    break;
                }
                Ok(n) => {
                    if let Err(e) = sink.write_chunk(&buf[..n]).await {
                        return (total, Some(WireError::Transport(e)));
                    }
                    total += n as u64;
                    eof_retries = 0;
                    self.metrics.add_bytes_received(n as u64);
                    self.registry.touch(&self.stream_id).await;
                    tracing::trace!(stream = %self.stream_id, read = n, total, "Copied chunk to sink");
                }
                Err(e) => return (total, Some(e)),
            }
        }
        (total, None)
    }

    /// Write a reply, logging instead of failing when the peer is already
    /// gone. End-of-phase replies race against the client closing.
    async fn reply_best_effort(&mut self, msg: &str) {
        if let Err(e) = self.wire.write_message(msg).await {
            tracing::debug!(stream = %self.stream_id, error = %e, "Could not deliver reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use tokio::io::DuplexStream;

    fn spawn_session(
        base: PathBuf,
        registry: Arc<SessionRegistry>,
    ) -> (Wire<DuplexStream>, tokio::task::JoinHandle<()>) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let session = Session::new(
            Wire::new(server_side),
            "ab12cd".to_string(),
            base,
            registry,
            Arc::new(NoopMetrics),
            CancellationToken::new(),
        );
        let handle = tokio::spawn(session.run());
        (Wire::new(client_side), handle)
    }

    async fn read_handshake(wire: &mut Wire<DuplexStream>) -> String {
        let hello = wire.await_message().await.unwrap();
        assert!(hello.starts_with("HELLO "), "got {hello}");
        let streamid = wire.await_message().await.unwrap();
        let reply = ServerReply::parse(&streamid).unwrap();
        match reply {
            ServerReply::StreamId(id) => {
                assert!(!id.is_empty());
                id
            }
            other => panic!("expected STREAMID, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_order_hello_then_streamid() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let (mut wire, handle) = spawn_session(dir.path().to_path_buf(), registry);

        let id = read_handshake(&mut wire).await;
        assert_eq!(id, "ab12cd");

        drop(wire);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_rejected_session_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let (mut wire, handle) = spawn_session(dir.path().to_path_buf(), registry);
        read_handshake(&mut wire).await;

        wire.write_message("FOO bar").await.unwrap();
        let reply = wire.await_message().await.unwrap();
        assert_eq!(reply, "ERR 500 Unknown command FOO");

        // Session still accepts a CLOSE afterwards.
        wire.write_message("CLOSE ab12cd").await.unwrap();
        let reply = wire.await_message().await.unwrap();
        assert!(reply.starts_with("OK "), "got {reply}");

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_init_missing_arguments_is_rejected_with_err() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let (mut wire, handle) = spawn_session(dir.path().to_path_buf(), registry);
        read_handshake(&mut wire).await;

        wire.write_message("INIT STREAM").await.unwrap();
        let reply = wire.await_message().await.unwrap();
        assert_eq!(reply, "ERR 500 Missing arguments for INIT");

        wire.write_message("INIT STREAM no-pair-here").await.unwrap();
        let reply = wire.await_message().await.unwrap();
        assert_eq!(reply, "ERR 500 Missing hostname:path pair for INIT");

        drop(wire);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_init_streams_bytes_into_sink() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let (mut wire, handle) = spawn_session(dir.path().to_path_buf(), Arc::clone(&registry));
        read_handshake(&mut wire).await;

        wire.write_message("INIT STREAM web01:/var/log/auth.log")
            .await
            .unwrap();
        let reply = ServerReply::parse(&wire.await_message().await.unwrap()).unwrap();
        assert_eq!(
            reply,
            ServerReply::Ok(vec!["ab12cd".to_string(), "0".to_string()])
        );

        let info = registry.get("ab12cd").await.unwrap();
        assert_eq!(info.hostname.as_deref(), Some("web01"));

        wire.write_chunk(b"line1\nline2\n").await.unwrap();
        wire.shutdown().await;

        // End-of-phase reply carries the command index and byte count.
        let reply = wire.await_message().await.unwrap();
        assert_eq!(reply, "OK 0 12");

        handle.await.unwrap();
        let sink = dir.path().join("web01").join("var_log_auth.log.out.log");
        assert_eq!(std::fs::read_to_string(sink).unwrap(), "line1\nline2\n");
        assert!(!registry.contains("ab12cd").await);
    }

    #[tokio::test]
    async fn test_rejected_init_does_not_consume_command_index() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let (mut wire, handle) = spawn_session(dir.path().to_path_buf(), registry);
        read_handshake(&mut wire).await;

        wire.write_message("INIT STREAM").await.unwrap();
        wire.await_message().await.unwrap();

        // The next accepted INIT still gets index 0.
        wire.write_message("INIT STREAM web01:/var/log/auth.log")
            .await
            .unwrap();
        let reply = wire.await_message().await.unwrap();
        assert_eq!(reply, "OK ab12cd 0");

        drop(wire);
        handle.await.unwrap();
    }
}
