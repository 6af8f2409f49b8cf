//! Client-side stream: connection ownership and the handshake state machine.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::protocol::{ClientCommand, ServerReply, Wire, WireError};

/// Deadline for each handshake line.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for the end-of-phase acknowledgement during close. Must exceed
/// the collector's EOF retry pause.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a stream is in its lifecycle.
///
/// `connect` walks Disconnected through AwaitInitAck to Ready; any failure
/// on the way drops the connection and returns to Disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No connection.
    Disconnected,
    /// TCP connect in flight.
    Connecting,
    /// Waiting for the banner line.
    AwaitHello,
    /// Waiting for `STREAMID`.
    AwaitStreamId,
    /// `INIT` sent, waiting for `OK`.
    AwaitInitAck,
    /// Raw-copy mode; byte transfers only.
    Ready,
    /// Explicitly closed, not to be reused.
    Closed,
}

/// One outbound stream to the collector.
///
/// Owns its connection exclusively; a reconnect replaces the connection,
/// never duplicates it. The file being shipped is owned by the tailer, not
/// by the stream.
#[derive(Debug)]
pub struct ClientStream {
    server: String,
    hostname: String,
    remote_path: String,
    stream_id: Option<String>,
    wire: Option<Wire<TcpStream>>,
    state: StreamState,
}

impl ClientStream {
    /// Create a disconnected stream for the given identity.
    #[must_use]
    pub fn new(server: String, hostname: String, remote_path: String) -> Self {
        Self {
            server,
            hostname,
            remote_path,
            stream_id: None,
            wire: None,
            state: StreamState::Disconnected,
        }
    }

    /// The server-assigned stream id, once the handshake completed.
    #[must_use]
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the stream is in raw-copy mode.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == StreamState::Ready
    }

    /// The announced `hostname:path` identity.
    #[must_use]
    pub fn identity(&self) -> (&str, &str) {
        (&self.hostname, &self.remote_path)
    }

    /// Run the full handshake: connect, await banner and `STREAMID`, send
    /// `INIT`, await the ack.
    ///
    /// Does not retry; reconnect policy belongs to the tailer. On any
    /// failure the connection is dropped and the stream returns to
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// [`WireError::Transport`] when the TCP connect fails,
    /// [`WireError::Malformed`] on a bad `STREAMID` or ack line,
    /// [`WireError::Rejected`] when the collector answers `ERR`, and
    /// timeout/closed errors from the underlying awaits.
    pub async fn connect(&mut self) -> Result<(), WireError> {
        self.wire = None;
        self.state = StreamState::Connecting;

        let result = self.handshake().await;
        if let Err(ref e) = result {
            tracing::warn!(server = %self.server, error = %e, "Handshake failed");
            self.wire = None;
            self.state = StreamState::Disconnected;
        }
        result
    }

    async fn handshake(&mut self) -> Result<(), WireError> {
        let stream = TcpStream::connect(&self.server)
            .await
            .map_err(WireError::Transport)?;
        let mut wire = Wire::new(stream);

        self.state = StreamState::AwaitHello;
        let banner = wire.await_message_timeout(HANDSHAKE_TIMEOUT).await?;
        tracing::info!(server = %self.server, banner = %banner, "Connected to collector");

        self.state = StreamState::AwaitStreamId;
        let line = wire.await_message_timeout(HANDSHAKE_TIMEOUT).await?;
        let ServerReply::StreamId(id) = ServerReply::parse(&line)? else {
            return Err(WireError::Malformed(format!(
                "expected STREAMID, got: {line}"
            )));
        };
        tracing::debug!(stream = %id, "Received stream id");

        self.state = StreamState::AwaitInitAck;
        wire.write_message(&ClientCommand::render_init(
            &self.hostname,
            &self.remote_path,
        ))
        .await?;
        let line = wire.await_message_timeout(HANDSHAKE_TIMEOUT).await?;
        match ServerReply::parse(&line)? {
            ServerReply::Ok(_) => {}
            ServerReply::Err { code, message } => {
                return Err(WireError::Rejected { code, message });
            }
            other => {
                return Err(WireError::Malformed(format!(
                    "expected OK for INIT, got: {other:?}"
                )));
            }
        }

        self.stream_id = Some(id);
        self.wire = Some(wire);
        self.state = StreamState::Ready;
        tracing::info!(
            stream = %self.stream_id.as_deref().unwrap_or_default(),
            hostname = %self.hostname,
            remote = %self.remote_path,
            "Stream ready"
        );
        Ok(())
    }

    /// Send one chunk of raw file bytes.
    ///
    /// # Errors
    ///
    /// [`WireError::Closed`] when no connection exists, otherwise transport
    /// errors from the write.
    pub async fn send_chunk(&mut self, buf: &[u8]) -> Result<(), WireError> {
        let Some(wire) = self.wire.as_mut() else {
            return Err(WireError::Closed);
        };
        wire.write_chunk(buf).await?;
        Ok(())
    }

    /// Drop the connection without the closing exchange. Used before a
    /// reconnect.
    pub fn disconnect(&mut self) {
        if self.wire.take().is_some() {
            tracing::debug!(
                stream = %self.stream_id.as_deref().unwrap_or("-"),
                "Dropped connection"
            );
        }
        self.state = StreamState::Disconnected;
    }

    /// Graceful close: half-close the connection so the collector sees EOF
    /// and concludes the streaming phase, await its final `OK`, then drop.
    /// The stream is finished afterwards.
    ///
    /// In raw-copy mode any command line would land in the sink as payload,
    /// so the close is signalled by EOF, never by a `CLOSE` line.
    pub async fn close(&mut self) {
        if let Some(mut wire) = self.wire.take() {
            let id = self.stream_id.as_deref().unwrap_or("-").to_string();
            tracing::info!(stream = %id, "Closing stream");
            wire.shutdown().await;
            match wire.await_message_timeout(CLOSE_TIMEOUT).await {
                Ok(reply) => {
                    tracing::debug!(stream = %id, reply = %reply, "Stream closed");
                }
                Err(e) => {
                    tracing::debug!(stream = %id, error = %e, "No close acknowledgement");
                }
            }
        }
        self.state = StreamState::Closed;
    }
}
