//! Resilient tailer: forwards newly appended bytes, surviving input-file
//! rotation and transport failures.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::stream::ClientStream;
use super::ClientError;
use crate::protocol::{WireError, CHUNK_SIZE};

/// Idle time after which the loop switches to the long sleep.
const IDLE_THRESHOLD: Duration = Duration::from_secs(5);
/// Sleep between checks once a file has gone quiet.
const IDLE_SLEEP: Duration = Duration::from_secs(30);
/// Sleep between checks while a file is active.
const BUSY_SLEEP: Duration = Duration::from_secs(2);
/// Cap on the reconnect backoff.
const MAX_BACKOFF_SECS: u64 = 30;

/// Backoff before the nth consecutive reconnect: `min(retry * 2, 30)`
/// seconds. Resets to zero after any successful transfer round.
#[must_use]
pub fn backoff_delay(retry: u32) -> Duration {
    Duration::from_secs((u64::from(retry) * 2).min(MAX_BACKOFF_SECS))
}

/// Signals the stream manager sends to a running tailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerSignal {
    /// New data may be available; cut the idle sleep short.
    Wake,
    /// The input file was recreated; restart from offset 0.
    Restart,
    /// The input file went away; finish the stream gracefully.
    Stop,
}

/// Tails one local file and ships appended bytes through a [`ClientStream`].
///
/// Exclusively owns the input file handle and its stream. The position is
/// monotonically non-decreasing except for the rotation heuristic (file
/// shrank below the position, reset to 0) and the optional rewind-on-error
/// compatibility behavior.
pub struct Tailer {
    stream: ClientStream,
    input_path: PathBuf,
    position: u64,
    input: Option<File>,
    last_read: Instant,
    rewind_on_error: bool,
    signals: Option<mpsc::UnboundedReceiver<TailerSignal>>,
    cancel: CancellationToken,
}

impl Tailer {
    /// Create a tailer starting at the given byte offset.
    #[must_use]
    pub fn new(
        stream: ClientStream,
        input_path: PathBuf,
        start_position: u64,
        rewind_on_error: bool,
        signals: mpsc::UnboundedReceiver<TailerSignal>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            input_path,
            position: start_position,
            input: None,
            last_read: Instant::now(),
            rewind_on_error,
            signals: Some(signals),
            cancel,
        }
    }

    /// The current byte offset into the input file. Bytes before it have
    /// been sent.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.input_path
    }

    /// Run the send loop until cancelled, stopped by the manager, or a
    /// terminal error occurs.
    ///
    /// Each iteration reconnects if needed, reopens the input at the current
    /// offset, forwards pending bytes, then sleeps per the idle policy.
    /// Transient transport failures back off and force a reconnect; anything
    /// else ends the loop. The input handle is closed on every exit path and
    /// the stream is closed gracefully.
    ///
    /// Returns the total bytes shipped over the tailer's lifetime.
    ///
    /// # Errors
    ///
    /// [`ClientError::Input`] when the input file cannot be opened or read,
    /// [`ClientError::Wire`] for non-transient transport failures.
    pub async fn run(mut self) -> Result<u64, ClientError> {
        let mut total: u64 = 0;
        let mut retry: u32 = 0;
        let mut outcome: Result<(), ClientError> = Ok(());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Failed reconnects are not delayed here; pacing comes from the
            // idle sleep at the bottom of the loop.
            if !self.stream.is_connected() {
                if let Err(e) = self.stream.connect().await {
                    tracing::warn!(
                        path = %self.input_path.display(),
                        error = %e,
                        "Reconnect failed, will retry"
                    );
                }
            }

            if let Err(e) = self.open_input().await {
                tracing::error!(path = %self.input_path.display(), error = %e, "Unable to open input file");
                outcome = Err(ClientError::Input {
                    path: self.input_path.clone(),
                    source: e,
                });
                break;
            }

            if self.stream.is_connected() {
                let (sent, err) = self.send_pending().await;
                total += sent;
                match err {
                    None => retry = 0,
                    Some(e) if e.is_transient() => {
                        retry += 1;
                        self.apply_rewind(sent);
                        let delay = backoff_delay(retry);
                        tracing::warn!(
                            path = %self.input_path.display(),
                            retry,
                            delay_secs = delay.as_secs(),
                            error = %e,
                            "Transient transport failure, backing off before reconnect"
                        );
                        if self.wait_cancellable(delay).await {
                            break;
                        }
                        self.stream.disconnect();
                        continue;
                    }
                    Some(e) => {
                        tracing::error!(
                            path = %self.input_path.display(),
                            bytes = total,
                            error = %e,
                            "Terminal error during stream data"
                        );
                        outcome = Err(e.into());
                        break;
                    }
                }
            }

            let sleep = if self.last_read.elapsed() > IDLE_THRESHOLD {
                IDLE_SLEEP
            } else {
                BUSY_SLEEP
            };
            if self.idle_wait(sleep).await {
                break;
            }
        }

        self.input = None;
        self.stream.close().await;
        tracing::info!(path = %self.input_path.display(), bytes = total, "Tailer finished");
        outcome.map(|()| total)
    }

    /// Reopen the input file and seek to the current position, resetting to
    /// 0 first when the file has shrunk below it (rotation/truncation
    /// heuristic).
    async fn open_input(&mut self) -> std::io::Result<()> {
        self.input = None;
        let file = File::open(&self.input_path).await?;
        let size = file.metadata().await?.len();
        if size < self.position {
            tracing::warn!(
                path = %self.input_path.display(),
                position = self.position,
                size,
                "Input file shrank below position, restarting from 0"
            );
            self.position = 0;
        }
        let mut file = file;
        file.seek(SeekFrom::Start(self.position)).await?;
        self.input = Some(file);
        Ok(())
    }

    /// Copy available bytes from the current offset to the connection in
    /// fixed-size chunks until EOF-for-now. Returns the bytes shipped this
    /// round and the failure, if any.
    async fn send_pending(&mut self) -> (u64, Option<WireError>) {
        let Some(file) = self.input.as_mut() else {
            return (0, Some(WireError::Closed));
        };
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent: u64 = 0;

        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return (sent, Some(WireError::Transport(e))),
            };
            if let Err(e) = self.stream.send_chunk(&buf[..n]).await {
                return (sent, Some(e));
            }
            self.position += n as u64;
            self.last_read = Instant::now();
            sent += n as u64;
            tracing::trace!(
                path = %self.input_path.display(),
                chunk = n,
                position = self.position,
                "Sent chunk"
            );
        }

        if sent > 0 {
            tracing::debug!(
                path = %self.input_path.display(),
                bytes = sent,
                position = self.position,
                "Sent pending data"
            );
        }
        (sent, None)
    }

    /// Compatibility behavior: pull the position back by one buffer after a
    /// transport failure mid-round, trading possible duplication for not
    /// losing bytes whose delivery is uncertain.
    fn apply_rewind(&mut self, sent_this_round: u64) {
        if self.rewind_on_error && sent_this_round > CHUNK_SIZE as u64 {
            self.position = self.position.saturating_sub(CHUNK_SIZE as u64);
            tracing::warn!(
                path = %self.input_path.display(),
                position = self.position,
                "Rewound position by one buffer after transport failure"
            );
        }
    }

    /// Sleep for the idle duration, waking early on manager signals or
    /// cancellation. Returns whether the send loop should exit.
    async fn idle_wait(&mut self, dur: Duration) -> bool {
        let Some(rx) = self.signals.as_mut() else {
            return self.wait_cancellable(dur).await;
        };
        tokio::select! {
            biased;

            () = self.cancel.cancelled() => true,

            sig = rx.recv() => {
                match sig {
                    Some(TailerSignal::Wake) => false,
                    Some(TailerSignal::Restart) => {
                        tracing::info!(
                            path = %self.input_path.display(),
                            "Input file recreated, restarting from 0"
                        );
                        self.position = 0;
                        self.input = None;
                        false
                    }
                    Some(TailerSignal::Stop) => {
                        tracing::info!(
                            path = %self.input_path.display(),
                            "Stop requested, finishing stream"
                        );
                        true
                    }
                    None => {
                        self.signals = None;
                        false
                    }
                }
            }

            () = tokio::time::sleep(dur) => false,
        }
    }

    async fn wait_cancellable(&self, dur: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => true,
            () = tokio::time::sleep(dur) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_tailer(path: PathBuf, position: u64) -> (Tailer, mpsc::UnboundedSender<TailerSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = ClientStream::new(
            "127.0.0.1:1".to_string(),
            "web01".to_string(),
            path.display().to_string(),
        );
        let tailer = Tailer::new(stream, path, position, true, rx, CancellationToken::new());
        (tailer, tx)
    }

    #[test]
    fn test_backoff_follows_linear_capped_curve() {
        assert_eq!(backoff_delay(0), Duration::from_secs(0));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(5), Duration::from_secs(10));
        assert_eq!(backoff_delay(15), Duration::from_secs(30));
        assert_eq!(backoff_delay(100), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let mut last = Duration::ZERO;
        for retry in 0..40 {
            let delay = backoff_delay(retry);
            assert!(delay >= last, "delay decreased at retry {retry}");
            last = delay;
        }
    }

    #[tokio::test]
    async fn test_open_input_seeks_to_position() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hello world").unwrap();
        file.flush().unwrap();

        let (mut tailer, _tx) = test_tailer(file.path().to_path_buf(), 6);
        tailer.open_input().await.unwrap();
        assert_eq!(tailer.position(), 6);

        let mut rest = String::new();
        tailer
            .input
            .as_mut()
            .unwrap()
            .read_to_string(&mut rest)
            .await
            .unwrap();
        assert_eq!(rest, "world");
    }

    #[tokio::test]
    async fn test_open_input_resets_position_when_file_shrank() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "short").unwrap();
        file.flush().unwrap();

        let (mut tailer, _tx) = test_tailer(file.path().to_path_buf(), 500);
        tailer.open_input().await.unwrap();
        assert_eq!(tailer.position(), 0);
    }

    #[tokio::test]
    async fn test_open_input_missing_file_errors() {
        let (mut tailer, _tx) = test_tailer(PathBuf::from("/nonexistent/logship-test.log"), 0);
        assert!(tailer.open_input().await.is_err());
    }

    #[tokio::test]
    async fn test_restart_signal_resets_position() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (mut tailer, tx) = test_tailer(file.path().to_path_buf(), 1024);

        tx.send(TailerSignal::Restart).unwrap();
        let cancelled = tailer.idle_wait(Duration::from_millis(100)).await;
        assert!(!cancelled);
        assert_eq!(tailer.position(), 0);
    }

    #[tokio::test]
    async fn test_wake_signal_cuts_sleep_short() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (mut tailer, tx) = test_tailer(file.path().to_path_buf(), 0);

        tx.send(TailerSignal::Wake).unwrap();
        let start = Instant::now();
        tailer.idle_wait(Duration::from_secs(30)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rewind_applies_only_beyond_one_buffer() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (mut tailer, _tx) = test_tailer(file.path().to_path_buf(), 10_000);

        // Small round: no rewind.
        tailer.apply_rewind(100);
        assert_eq!(tailer.position(), 10_000);

        // Round that moved more than one buffer: one buffer rewound.
        tailer.apply_rewind(CHUNK_SIZE as u64 + 1);
        assert_eq!(tailer.position(), 10_000 - CHUNK_SIZE as u64);
    }

    #[tokio::test]
    async fn test_rewind_disabled_by_config() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (tx, rx) = mpsc::unbounded_channel::<TailerSignal>();
        drop(tx);
        let stream = ClientStream::new(
            "127.0.0.1:1".to_string(),
            "web01".to_string(),
            "x".to_string(),
        );
        let mut tailer = Tailer::new(
            stream,
            file.path().to_path_buf(),
            10_000,
            false,
            rx,
            CancellationToken::new(),
        );
        tailer.apply_rewind(CHUNK_SIZE as u64 + 1);
        assert_eq!(tailer.position(), 10_000);
    }

    #[tokio::test]
    async fn test_stop_signal_ends_the_loop() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (tailer, tx) = test_tailer(file.path().to_path_buf(), 0);

        tx.send(TailerSignal::Stop).unwrap();
        let total = tokio::time::timeout(Duration::from_secs(5), tailer.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_cancelled_tailer_exits_cleanly() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let (tailer, _tx) = test_tailer(file.path().to_path_buf(), 0);
        tailer.cancel.cancel();

        let total = tailer.run().await.unwrap();
        assert_eq!(total, 0);
    }
}
